//! ==============================================================================
//! onewire.rs - ds18b20 probes on the linux 1-wire bus
//! ==============================================================================
//!
//! purpose:
//!     identifies and reads multi-drop ds18b20 temperature probes through the
//!     kernel's w1 sysfs tree (/sys/bus/w1/devices). every probe appears as a
//!     directory named after its rom code, e.g. 28-0316a279b3ff.
//!
//! relationships:
//!     - used by: hal.rs (scan_bus, read_bus_sensor)
//!     - used by: domain.rs (BusAddress is the sensor's bus identity)
//!
//! why sysfs?:
//!     the w1-gpio overlay already does the timing-critical bit-banging in the
//!     kernel. userspace only has to read a text file.
//!
//! ==============================================================================

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// family codes of the 1-wire temperature sensors we understand
const TEMPERATURE_FAMILIES: [u8; 4] = [0x10, 0x22, 0x28, 0x3b];

/// ds18b20 scratchpad value right after power-on, never a real measurement
const POWER_ON_RESET_C: f64 = 85.0;

/// 8-byte rom code: family, 48-bit serial (lsb first), crc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusAddress(pub [u8; 8]);

impl BusAddress {
    /// Build an address from a w1 sysfs directory name like `28-0316a279b3ff`.
    pub fn from_sysfs_name(name: &str) -> Result<Self> {
        let (family, serial) = name
            .split_once('-')
            .ok_or_else(|| anyhow!("not a w1 device name: {}", name))?;
        let family = u8::from_str_radix(family, 16).with_context(|| format!("bad family in {}", name))?;
        let serial = hex::decode(serial).with_context(|| format!("bad serial in {}", name))?;
        if serial.len() != 6 {
            bail!("serial in {} must be 6 bytes", name);
        }

        let mut rom = [0u8; 8];
        rom[0] = family;
        for (i, byte) in serial.iter().rev().enumerate() {
            rom[1 + i] = *byte;
        }
        rom[7] = crc8(&rom[..7]);
        Ok(Self(rom))
    }

    pub fn sysfs_name(&self) -> String {
        let serial: Vec<u8> = self.0[1..7].iter().rev().copied().collect();
        format!("{:02x}-{}", self.0[0], hex::encode(serial))
    }

    pub fn family(&self) -> u8 {
        self.0[0]
    }

    pub fn crc_valid(&self) -> bool {
        crc8(&self.0[..7]) == self.0[7]
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|b| format!("{:02X}", b)).collect();
        f.write_str(&parts.join(":"))
    }
}

impl FromStr for BusAddress {
    type Err = anyhow::Error;

    /// Accepts `28:FF:64:...` (any case, `:` or `-` separated) or 16 bare hex digits.
    fn from_str(s: &str) -> Result<Self> {
        let compact: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        let bytes = hex::decode(&compact).map_err(|e| anyhow!("invalid bus address '{}': {}", s, e))?;
        let rom: [u8; 8] = bytes
            .try_into()
            .map_err(|_| anyhow!("bus address '{}' must be 8 bytes", s))?;
        Ok(Self(rom))
    }
}

impl Serialize for BusAddress {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BusAddress {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(d)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Dallas/Maxim CRC-8 (polynomial x^8 + x^5 + x^4 + 1, reflected).
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        let mut b = byte;
        for _ in 0..8 {
            let mix = (crc ^ b) & 0x01;
            crc >>= 1;
            if mix != 0 {
                crc ^= 0x8C;
            }
            b >>= 1;
        }
    }
    crc
}

/// List temperature probes present under a w1 devices directory, in rom order.
pub fn scan(devices_dir: &Path) -> Result<Vec<BusAddress>> {
    let entries = std::fs::read_dir(devices_dir)
        .with_context(|| format!("cannot read {}", devices_dir.display()))?;

    let mut found = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        // bus masters show up as w1_bus_master1 etc.
        if let Ok(addr) = BusAddress::from_sysfs_name(&name) {
            if TEMPERATURE_FAMILIES.contains(&addr.family()) {
                found.push(addr);
            }
        }
    }
    found.sort_by_key(|a| a.0);
    Ok(found)
}

/// Read one probe in degrees celsius.
pub fn read(devices_dir: &Path, address: &BusAddress) -> Result<f64> {
    let path = devices_dir.join(address.sysfs_name()).join("w1_slave");
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("probe {} not readable", address))?;
    parse_w1_slave(&text)
}

/// Parse the two-line `w1_slave` report:
///
/// ```text
/// 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
/// 72 01 4b 46 7f ff 0e 10 57 t=23125
/// ```
pub fn parse_w1_slave(text: &str) -> Result<f64> {
    let mut lines = text.lines();
    let status = lines.next().ok_or_else(|| anyhow!("empty w1_slave report"))?;
    if !status.trim_end().ends_with("YES") {
        bail!("scratchpad crc check failed");
    }

    let data = lines.next().ok_or_else(|| anyhow!("missing temperature line"))?;
    let raw = data
        .split("t=")
        .nth(1)
        .ok_or_else(|| anyhow!("no t= field in '{}'", data))?;
    let milli: i32 = raw.trim().parse().with_context(|| format!("bad temperature '{}'", raw))?;

    let celsius = f64::from(milli) / 1000.0;
    if celsius == POWER_ON_RESET_C {
        bail!("probe reported power-on value");
    }
    Ok(celsius)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc8_reference_vector() {
        // maxim application note 27 example rom
        let rom = [0x02, 0x1C, 0xB8, 0x01, 0x00, 0x00, 0x00];
        assert_eq!(crc8(&rom), 0xA2);
    }

    #[test]
    fn test_sysfs_name_round_trip() {
        let addr = BusAddress::from_sysfs_name("28-0316a279b3ff").unwrap();
        assert_eq!(addr.family(), 0x28);
        assert_eq!(&addr.0[1..7], &[0xff, 0xb3, 0x79, 0xa2, 0x16, 0x03]);
        assert!(addr.crc_valid());
        assert_eq!(addr.sysfs_name(), "28-0316a279b3ff");
    }

    #[test]
    fn test_text_form() {
        let addr: BusAddress = "28:aa:bb:cc:dd:ee:ff:01".parse().unwrap();
        assert_eq!(addr.to_string(), "28:AA:BB:CC:DD:EE:FF:01");
        assert_eq!("28AABBCCDDEEFF01".parse::<BusAddress>().unwrap(), addr);
        assert!("28:AA".parse::<BusAddress>().is_err());
        assert!("not hex".parse::<BusAddress>().is_err());
    }

    #[test]
    fn test_parse_w1_slave() {
        let ok = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n72 01 4b 46 7f ff 0e 10 57 t=23125\n";
        assert_eq!(parse_w1_slave(ok).unwrap(), 23.125);

        let negative = "5e ff 4b 46 7f ff 02 10 e1 : crc=e1 YES\n5e ff 4b 46 7f ff 02 10 e1 t=-10125\n";
        assert_eq!(parse_w1_slave(negative).unwrap(), -10.125);

        let bad_crc = "72 01 4b 46 7f ff 0e 10 57 : crc=00 NO\n72 01 4b 46 7f ff 0e 10 57 t=23125\n";
        assert!(parse_w1_slave(bad_crc).is_err());

        let reset = "50 05 4b 46 7f ff 0c 10 1c : crc=1c YES\n50 05 4b 46 7f ff 0c 10 1c t=85000\n";
        assert!(parse_w1_slave(reset).is_err());
    }

    #[test]
    fn test_scan_and_read_directory() {
        let dir = tempfile::tempdir().unwrap();
        let probe = dir.path().join("28-0316a279b3ff");
        std::fs::create_dir(&probe).unwrap();
        std::fs::write(
            probe.join("w1_slave"),
            "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n72 01 4b 46 7f ff 0e 10 57 t=21500\n",
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("w1_bus_master1")).unwrap();
        // eeprom family, not a temperature probe
        std::fs::create_dir(dir.path().join("2d-00000a1b2c3d")).unwrap();

        let found = scan(dir.path()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(read(dir.path(), &found[0]).unwrap(), 21.5);
    }
}
