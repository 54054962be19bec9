//! Live readings: the per-tick cache of built-in channels and the value
//! source alarms resolve their inputs through.
//!
//! A failed physical read never overwrites the cached value (sticky last
//! good value); a channel that has never been read is `None`.

use crate::config::SensorsConfig;
use crate::domain::{SensorDescriptor, SensorKind, DISCONNECTED};
use crate::hal::HardwareProvider;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Resolves an alarm's input. `None` means unavailable, which is distinct
/// from any numeric reading (including 0).
pub trait ValueSource {
    fn sample(&self, kind: SensorKind, sensor_ref: &str) -> Option<f64>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChannelValues {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub light: Option<f64>,
    pub motion: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusSensorValue {
    pub id: String,
    pub name: String,
    pub temperature: f64,
}

/// Enabled bus sensors as they appear in snapshots and scheduled payloads.
pub fn bus_values(sensors: &[SensorDescriptor]) -> Vec<BusSensorValue> {
    sensors
        .iter()
        .filter(|s| s.enabled)
        .map(|s| BusSensorValue {
            id: s.id.clone(),
            name: s.name.clone(),
            temperature: s.last_reading.unwrap_or(DISCONNECTED),
        })
        .collect()
}

/// Response body of the snapshot endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    #[serde(flatten)]
    pub channels: ChannelValues,
    pub ds18b20_sensors: Vec<BusSensorValue>,
    pub outputs: BTreeMap<String, bool>,
}

#[derive(Debug, Default)]
pub struct LiveReadings {
    channels: ChannelValues,
}

impl LiveReadings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channels(&self) -> &ChannelValues {
        &self.channels
    }

    /// Sample every input once. Disabled bus sensors are not polled.
    pub fn refresh(
        &mut self,
        hal: &dyn HardwareProvider,
        wiring: &SensorsConfig,
        sensors: &mut [SensorDescriptor],
        show_data: bool,
    ) {
        match hal.read_dht22(wiring.dht22_gpio_pin) {
            Ok((t, h)) => {
                self.channels.temperature = Some(t);
                self.channels.humidity = Some(h);
            }
            Err(e) => warn!("[DHT22] Read error, keeping last value: {}", e),
        }

        match hal.read_light(wiring.light_address()) {
            Ok(lux) => self.channels.light = Some(lux),
            Err(e) => warn!("[BH1750] Read error, keeping last value: {}", e),
        }

        match hal.read_motion(wiring.pir_gpio_pin) {
            Ok(motion) => self.channels.motion = Some(motion),
            Err(e) => warn!("[PIR] Read error, keeping last value: {}", e),
        }

        for sensor in sensors.iter_mut().filter(|s| s.enabled) {
            match hal.read_bus_sensor(&sensor.bus_address) {
                Ok(value) => sensor.last_reading = Some(value),
                Err(e) => warn!("[DS18B20] {} read error, keeping last value: {}", sensor.id, e),
            }
        }

        if show_data {
            let c = &self.channels;
            debug!(
                "Temp: {:?}°C | Humidity: {:?}% | Light: {:?} lx | Motion: {:?}",
                c.temperature, c.humidity, c.light, c.motion
            );
            for s in sensors.iter().filter(|s| s.enabled) {
                debug!("[DS18B20] {} ({}): {:?}", s.id, s.name, s.last_reading);
            }
        }
    }

    pub fn view<'a>(&'a self, sensors: &'a [SensorDescriptor]) -> ReadingView<'a> {
        ReadingView {
            channels: &self.channels,
            sensors,
        }
    }
}

/// Read-only view over one tick's readings.
pub struct ReadingView<'a> {
    channels: &'a ChannelValues,
    sensors: &'a [SensorDescriptor],
}

impl<'a> ReadingView<'a> {
    pub fn channels(&self) -> &ChannelValues {
        self.channels
    }

    pub fn sensors(&self) -> &[SensorDescriptor] {
        self.sensors
    }
}

impl ValueSource for ReadingView<'_> {
    fn sample(&self, kind: SensorKind, sensor_ref: &str) -> Option<f64> {
        match kind {
            SensorKind::Temperature => self.channels.temperature,
            SensorKind::Humidity => self.channels.humidity,
            SensorKind::Light => self.channels.light,
            SensorKind::Motion => self.channels.motion.map(|m| if m { 1.0 } else { 0.0 }),
            SensorKind::Ds18b20 => self
                .sensors
                .iter()
                .find(|s| s.id == sensor_ref)
                .filter(|s| s.enabled)
                .and_then(|s| s.last_reading),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::onewire::BusAddress;
    use anyhow::{anyhow, Result};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Hardware double whose readings tests can change between ticks.
    /// A `None` entry makes the corresponding read fail.
    #[derive(Default)]
    pub(crate) struct ScriptedHal {
        pub dht: Mutex<Option<(f64, f64)>>,
        pub light: Mutex<Option<f64>>,
        pub motion: Mutex<Option<bool>>,
        pub bus: Mutex<HashMap<BusAddress, Option<f64>>>,
        pub writes: Mutex<Vec<(u8, bool)>>,
    }

    impl ScriptedHal {
        pub fn set_bus(&self, address: BusAddress, value: Option<f64>) {
            self.bus.lock().unwrap().insert(address, value);
        }
    }

    impl HardwareProvider for ScriptedHal {
        fn read_dht22(&self, _pin: u8) -> Result<(f64, f64)> {
            self.dht.lock().unwrap().ok_or_else(|| anyhow!("dht timeout"))
        }

        fn read_light(&self, _addr: u8) -> Result<f64> {
            self.light.lock().unwrap().ok_or_else(|| anyhow!("i2c nack"))
        }

        fn read_motion(&self, _pin: u8) -> Result<bool> {
            self.motion.lock().unwrap().ok_or_else(|| anyhow!("gpio busy"))
        }

        fn scan_bus(&self) -> Result<Vec<BusAddress>> {
            let mut found: Vec<BusAddress> = self.bus.lock().unwrap().keys().copied().collect();
            found.sort_by_key(|a| a.0);
            Ok(found)
        }

        fn read_bus_sensor(&self, address: &BusAddress) -> Result<f64> {
            self.bus
                .lock()
                .unwrap()
                .get(address)
                .copied()
                .flatten()
                .ok_or_else(|| anyhow!("crc error"))
        }

        fn write_output(&self, pin: u8, level: bool) -> Result<()> {
            self.writes.lock().unwrap().push((pin, level));
            Ok(())
        }
    }

    fn probe(last: u8) -> BusAddress {
        BusAddress([0x28, 0, 0, 0, 0, 0, 0, last])
    }

    #[test]
    fn test_failed_read_keeps_last_good_value() {
        let hal = ScriptedHal::default();
        let wiring = SensorsConfig::default();
        let mut sensors = vec![SensorDescriptor::new(probe(1), "pool", "Pool").unwrap()];
        let mut live = LiveReadings::new();

        *hal.dht.lock().unwrap() = Some((21.0, 40.0));
        hal.set_bus(probe(1), Some(24.5));
        live.refresh(&hal, &wiring, &mut sensors, false);

        *hal.dht.lock().unwrap() = None;
        hal.set_bus(probe(1), None);
        live.refresh(&hal, &wiring, &mut sensors, false);

        let view = live.view(&sensors);
        assert_eq!(view.sample(SensorKind::Temperature, "temperature"), Some(21.0));
        assert_eq!(view.sample(SensorKind::Humidity, "humidity"), Some(40.0));
        assert_eq!(view.sample(SensorKind::Ds18b20, "pool"), Some(24.5));
    }

    #[test]
    fn test_never_read_is_unavailable_not_zero() {
        let hal = ScriptedHal::default();
        let mut sensors = vec![SensorDescriptor::new(probe(1), "pool", "Pool").unwrap()];
        let mut live = LiveReadings::new();
        live.refresh(&hal, &SensorsConfig::default(), &mut sensors, false);

        let view = live.view(&sensors);
        assert_eq!(view.sample(SensorKind::Light, "light"), None);
        assert_eq!(view.sample(SensorKind::Ds18b20, "pool"), None);
        assert_eq!(bus_values(&sensors)[0].temperature, DISCONNECTED);
    }

    #[test]
    fn test_motion_maps_to_numeric() {
        let hal = ScriptedHal::default();
        *hal.motion.lock().unwrap() = Some(false);
        let mut live = LiveReadings::new();
        live.refresh(&hal, &SensorsConfig::default(), &mut [], false);
        assert_eq!(live.view(&[]).sample(SensorKind::Motion, "motion"), Some(0.0));
    }

    #[test]
    fn test_disabled_or_unknown_bus_sensor_is_unavailable() {
        let hal = ScriptedHal::default();
        hal.set_bus(probe(1), Some(30.0));
        let mut sensors = vec![SensorDescriptor::new(probe(1), "pool", "Pool").unwrap()];
        let mut live = LiveReadings::new();
        live.refresh(&hal, &SensorsConfig::default(), &mut sensors, false);

        sensors[0].enabled = false;
        let view = live.view(&sensors);
        assert_eq!(view.sample(SensorKind::Ds18b20, "pool"), None);
        assert_eq!(view.sample(SensorKind::Ds18b20, "nope"), None);
        assert!(bus_values(&sensors).is_empty());
    }

    #[test]
    fn test_disabled_sensor_is_not_polled() {
        let hal = ScriptedHal::default();
        hal.set_bus(probe(1), Some(30.0));
        let mut sensors = vec![SensorDescriptor::new(probe(1), "pool", "Pool").unwrap()];
        sensors[0].enabled = false;
        let mut live = LiveReadings::new();
        live.refresh(&hal, &SensorsConfig::default(), &mut sensors, false);
        assert_eq!(sensors[0].last_reading, None);
    }
}
