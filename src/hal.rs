//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     provides a unified interface for the hub's physical inputs and outputs:
//!     dht22 (ambient temperature/humidity), bh1750 (light), pir (motion),
//!     ds18b20 probes on the 1-wire bus, and relay outputs.
//!     abstracts away the difference between running on a real Raspberry Pi
//!     (using `rppal`) and a development machine (using mocks).
//!
//! design philosophy:
//!     - "Compile Anywhere": The host should compile on Windows/Mac/Linux.
//!     - Every read returns a Result; the caller decides what a failed read
//!       means (readings.rs keeps the last good value).
//!
//! relationships:
//!     - used by: readings.rs (per-tick refresh), hub.rs (outputs, bus scan)
//!     - uses: rppal (on feature="hardware"), onewire.rs (1-wire sysfs)
//!
//! ==============================================================================

use crate::onewire::BusAddress;
use anyhow::Result;

pub trait HardwareProvider: Send + Sync {
    /// (temperature °C, relative humidity %)
    fn read_dht22(&self, pin: u8) -> Result<(f64, f64)>;
    /// ambient light in lux
    fn read_light(&self, i2c_addr: u8) -> Result<f64>;
    fn read_motion(&self, pin: u8) -> Result<bool>;
    fn scan_bus(&self) -> Result<Vec<BusAddress>>;
    fn read_bus_sensor(&self, address: &BusAddress) -> Result<f64>;
    fn write_output(&self, pin: u8, level: bool) -> Result<()>;
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For WSL / Non-Hardware Build)
// ==============================================================================================
#[cfg(not(feature = "hardware"))]
pub struct Hal {
    w1_devices: std::path::PathBuf,
    bus: Vec<BusAddress>,
}

#[cfg(not(feature = "hardware"))]
impl Hal {
    /// Probes found under `w1_devices` (e.g. a w1-gpio overlay on a dev box)
    /// are read for real; otherwise two synthetic probes stand in.
    pub fn new(w1_devices: std::path::PathBuf) -> Self {
        tracing::info!("Using MOCK HAL (No hardware access)");
        let bus = ["28-000000000001", "28-000000000002"]
            .iter()
            .filter_map(|name| BusAddress::from_sysfs_name(name).ok())
            .collect();
        Self { w1_devices, bus }
    }
}

#[cfg(not(feature = "hardware"))]
impl HardwareProvider for Hal {
    fn read_dht22(&self, pin: u8) -> Result<(f64, f64)> {
        tracing::debug!("[MOCK DHT22] Reading pin {}", pin);
        Ok((22.5, 45.0))
    }

    fn read_light(&self, i2c_addr: u8) -> Result<f64> {
        tracing::debug!("[MOCK BH1750] Reading 0x{:02X}", i2c_addr);
        Ok(320.0)
    }

    fn read_motion(&self, pin: u8) -> Result<bool> {
        tracing::debug!("[MOCK PIR] Reading pin {}", pin);
        Ok(false)
    }

    fn scan_bus(&self) -> Result<Vec<BusAddress>> {
        match crate::onewire::scan(&self.w1_devices) {
            Ok(found) if !found.is_empty() => Ok(found),
            _ => Ok(self.bus.clone()),
        }
    }

    fn read_bus_sensor(&self, address: &BusAddress) -> Result<f64> {
        match self.bus.iter().position(|a| a == address) {
            Some(index) => Ok(20.0 + index as f64 * 1.5),
            None => crate::onewire::read(&self.w1_devices, address),
        }
    }

    fn write_output(&self, pin: u8, level: bool) -> Result<()> {
        tracing::debug!("[MOCK GPIO] Pin {} write {}", pin, level);
        Ok(())
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================
#[cfg(feature = "hardware")]
pub struct Hal {
    w1_devices: std::path::PathBuf,
}

#[cfg(feature = "hardware")]
impl Hal {
    pub fn new(w1_devices: std::path::PathBuf) -> Self {
        tracing::info!("Using REAL HARDWARE HAL (rppal)");
        Self { w1_devices }
    }
}

#[cfg(feature = "hardware")]
impl HardwareProvider for Hal {
    fn read_dht22(&self, pin: u8) -> Result<(f64, f64)> {
        // NOTE: DHT22 goes through the adafruit python driver; userspace
        // bit-banging is unreliable without a kernel driver.
        use std::process::Command;
        let script = format!(
            r#"
import adafruit_dht, board, json, sys
try:
    dht = adafruit_dht.DHT22(board.D{})
    print(json.dumps({{"t": dht.temperature, "h": dht.humidity}}))
except Exception:
    print("null")
"#,
            pin
        );
        let output = Command::new("python3").args(["-c", &script]).output()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim() == "null" {
            anyhow::bail!("DHT22 read failed");
        }
        let v: serde_json::Value = serde_json::from_str(&stdout)?;
        match (v["t"].as_f64(), v["h"].as_f64()) {
            (Some(t), Some(h)) => Ok((t, h)),
            _ => anyhow::bail!("DHT22 returned incomplete data"),
        }
    }

    fn read_light(&self, i2c_addr: u8) -> Result<f64> {
        use rppal::i2c::I2c;
        // one-time high resolution mode, 120ms conversion
        const ONE_TIME_H_RES: u8 = 0x20;

        let mut i2c = I2c::new()?;
        i2c.set_slave_address(i2c_addr as u16)?;
        i2c.write(&[ONE_TIME_H_RES])?;
        std::thread::sleep(std::time::Duration::from_millis(180));

        let mut buf = [0u8; 2];
        i2c.read(&mut buf)?;
        let raw = u16::from_be_bytes(buf);
        Ok(f64::from(raw) / 1.2)
    }

    fn read_motion(&self, pin: u8) -> Result<bool> {
        use rppal::gpio::Gpio;
        let gpio = Gpio::new()?;
        let input = gpio.get(pin)?.into_input();
        Ok(input.is_high())
    }

    fn scan_bus(&self) -> Result<Vec<BusAddress>> {
        crate::onewire::scan(&self.w1_devices)
    }

    fn read_bus_sensor(&self, address: &BusAddress) -> Result<f64> {
        crate::onewire::read(&self.w1_devices, address)
    }

    fn write_output(&self, pin: u8, level: bool) -> Result<()> {
        use rppal::gpio::Gpio;
        let gpio = Gpio::new()?;
        let mut p = gpio.get(pin)?.into_output();
        // CRITICAL: Prevent GPIO from resetting when dropped
        // Without this, the relay drops as soon as this function returns
        p.set_reset_on_drop(false);
        if level { p.set_high(); } else { p.set_low(); }
        Ok(())
    }
}
