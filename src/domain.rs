//! Registry entity types: bus sensors, alarm rules and scheduled webhooks.
//!
//! Runtime-only fields (`last_reading`, `last_triggered_at`, `last_sent_at`)
//! live on the entities but are skipped by serde and never persisted.

use crate::error::{HubError, Result};
use crate::onewire::BusAddress;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// reading reported for a bus sensor that has never been sampled successfully
pub const DISCONNECTED: f64 = -127.0;

/// a `min_value` at or below this never triggers
pub const MIN_DISABLED: f64 = -999.0;

/// a `max_value` at or above this never triggers
pub const MAX_DISABLED: f64 = 999.0;

pub const DEFAULT_COOLDOWN_MS: u64 = 60_000;

pub const MAX_ID_LEN: usize = 32;

/// Anything stored in a registry collection.
pub trait Entity: Clone {
    /// human label used in errors and logs ("sensor", "alarm", "webhook")
    const KIND: &'static str;

    fn id(&self) -> &str;
}

// ==============================================================================
// sensor kinds
// ==============================================================================

/// Where an alarm takes its value from.
///
/// The four built-in channels are wired to fixed inputs; `Ds18b20` refers to a
/// registered bus sensor by its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Temperature,
    Humidity,
    Light,
    Motion,
    Ds18b20,
}

impl SensorKind {
    pub const BUILTIN: [SensorKind; 4] = [
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::Light,
        SensorKind::Motion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::Light => "light",
            SensorKind::Motion => "motion",
            SensorKind::Ds18b20 => "ds18b20",
        }
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, SensorKind::Ds18b20)
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorKind {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "temperature" => Ok(SensorKind::Temperature),
            "humidity" => Ok(SensorKind::Humidity),
            "light" => Ok(SensorKind::Light),
            "motion" => Ok(SensorKind::Motion),
            "ds18b20" => Ok(SensorKind::Ds18b20),
            other => Err(HubError::malformed(format!("unknown sensor_type '{}'", other))),
        }
    }
}

fn validate_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(HubError::malformed("id must not be empty"));
    }
    if id.len() > MAX_ID_LEN {
        return Err(HubError::malformed(format!(
            "id '{}' is longer than {} characters",
            id, MAX_ID_LEN
        )));
    }
    Ok(())
}

// ==============================================================================
// bus sensors
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorDescriptor {
    pub id: String,
    pub name: String,
    pub bus_address: BusAddress,
    pub enabled: bool,
    /// last good sample; `None` until the first successful read
    #[serde(serialize_with = "reading_or_disconnected")]
    pub last_reading: Option<f64>,
}

fn reading_or_disconnected<S: Serializer>(value: &Option<f64>, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(value.unwrap_or(DISCONNECTED))
}

impl SensorDescriptor {
    pub fn new(bus_address: BusAddress, id: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_id(&id)?;
        let name = name.into();
        Ok(Self {
            name: if name.is_empty() { id.clone() } else { name },
            id,
            bus_address,
            enabled: true,
            last_reading: None,
        })
    }
}

impl Entity for SensorDescriptor {
    const KIND: &'static str = "sensor";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SensorPatch {
    pub name: Option<String>,
    pub enabled: Option<bool>,
}

impl SensorPatch {
    pub fn apply(self, sensor: &mut SensorDescriptor) -> Result<()> {
        if let Some(name) = self.name {
            if name.trim().is_empty() {
                return Err(HubError::malformed("sensor name must not be empty"));
            }
            sensor.name = name;
        }
        if let Some(enabled) = self.enabled {
            sensor.enabled = enabled;
        }
        Ok(())
    }
}

// ==============================================================================
// alarm rules
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmRule {
    pub id: String,
    pub name: String,
    #[serde(rename = "sensor_type")]
    pub sensor_kind: SensorKind,
    /// bus sensor id for `Ds18b20`, otherwise the kind name itself
    #[serde(rename = "sensor_id")]
    pub sensor_ref: String,
    pub min_value: f64,
    pub max_value: f64,
    pub enabled: bool,
    pub webhook_url: String,
    pub cooldown_ms: u64,
    #[serde(skip)]
    pub last_triggered_at: Option<u64>,
}

/// Which side of an alarm's window a reading fell on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Breach {
    Below { threshold: f64 },
    Above { threshold: f64 },
}

impl AlarmRule {
    pub fn min_active(&self) -> bool {
        self.min_value > MIN_DISABLED
    }

    pub fn max_active(&self) -> bool {
        self.max_value < MAX_DISABLED
    }

    /// Threshold test. Out-of-order bounds are not rejected, they just
    /// make the alarm fire whenever either active side is crossed.
    pub fn check(&self, value: f64) -> Option<Breach> {
        if self.min_active() && value < self.min_value {
            return Some(Breach::Below { threshold: self.min_value });
        }
        if self.max_active() && value > self.max_value {
            return Some(Breach::Above { threshold: self.max_value });
        }
        None
    }

    fn from_patch(id: String, patch: AlarmPatch) -> Result<Self> {
        validate_id(&id)?;
        let sensor_kind = patch
            .sensor_kind
            .ok_or_else(|| HubError::malformed("sensor_type is required"))?;
        let webhook_url = patch
            .webhook_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| HubError::malformed("webhook_url is required"))?;

        let mut alarm = Self {
            name: patch.name.unwrap_or_else(|| id.clone()),
            id,
            sensor_kind,
            sensor_ref: patch.sensor_ref.unwrap_or_default(),
            min_value: patch.min_value.unwrap_or(MIN_DISABLED),
            max_value: patch.max_value.unwrap_or(MAX_DISABLED),
            enabled: patch.enabled.unwrap_or(true),
            webhook_url,
            cooldown_ms: patch.cooldown_ms.unwrap_or(DEFAULT_COOLDOWN_MS),
            last_triggered_at: None,
        };
        alarm.normalize_ref()?;
        Ok(alarm)
    }

    /// Built-in kinds always reference themselves; bus kinds need a sensor id.
    fn normalize_ref(&mut self) -> Result<()> {
        if self.sensor_kind.is_builtin() {
            self.sensor_ref = self.sensor_kind.as_str().to_string();
        } else if self.sensor_ref.trim().is_empty() {
            return Err(HubError::malformed("sensor_id is required for ds18b20 alarms"));
        }
        Ok(())
    }
}

impl Entity for AlarmRule {
    const KIND: &'static str = "alarm";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Add/update body for alarms. On update, omitted `enabled` and
/// `cooldown_ms` revert to their defaults; other omitted fields keep their
/// current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlarmPatch {
    pub name: Option<String>,
    #[serde(rename = "sensor_type")]
    pub sensor_kind: Option<SensorKind>,
    #[serde(rename = "sensor_id")]
    pub sensor_ref: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub enabled: Option<bool>,
    pub webhook_url: Option<String>,
    pub cooldown_ms: Option<u64>,
}

impl AlarmPatch {
    pub fn into_alarm(self, id: impl Into<String>) -> Result<AlarmRule> {
        AlarmRule::from_patch(id.into(), self)
    }

    pub fn apply(self, alarm: &mut AlarmRule) -> Result<()> {
        if let Some(name) = self.name {
            alarm.name = name;
        }
        if let Some(kind) = self.sensor_kind {
            if kind != alarm.sensor_kind {
                alarm.sensor_ref.clear();
            }
            alarm.sensor_kind = kind;
        }
        if let Some(sensor_ref) = self.sensor_ref {
            alarm.sensor_ref = sensor_ref;
        }
        if let Some(min) = self.min_value {
            alarm.min_value = min;
        }
        if let Some(max) = self.max_value {
            alarm.max_value = max;
        }
        alarm.enabled = self.enabled.unwrap_or(true);
        if let Some(url) = self.webhook_url {
            if url.trim().is_empty() {
                return Err(HubError::malformed("webhook_url must not be empty"));
            }
            alarm.webhook_url = url;
        }
        alarm.cooldown_ms = self.cooldown_ms.unwrap_or(DEFAULT_COOLDOWN_MS);
        alarm.normalize_ref()
    }
}

// ==============================================================================
// scheduled webhooks
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledWebhook {
    pub id: String,
    pub name: String,
    pub url: String,
    pub enabled: bool,
    /// 0 disables periodic sending
    pub update_interval_ms: u64,
    #[serde(skip)]
    pub last_sent_at: Option<u64>,
}

impl Entity for ScheduledWebhook {
    const KIND: &'static str = "webhook";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPatch {
    pub name: Option<String>,
    pub url: Option<String>,
    pub enabled: Option<bool>,
    pub update_interval_ms: Option<u64>,
}

impl WebhookPatch {
    pub fn into_webhook(self, id: impl Into<String>) -> Result<ScheduledWebhook> {
        let id = id.into();
        validate_id(&id)?;
        let url = self
            .url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| HubError::malformed("url is required"))?;
        Ok(ScheduledWebhook {
            name: self.name.unwrap_or_else(|| id.clone()),
            id,
            url,
            enabled: self.enabled.unwrap_or(true),
            update_interval_ms: self.update_interval_ms.unwrap_or(0),
            last_sent_at: None,
        })
    }

    pub fn apply(self, webhook: &mut ScheduledWebhook) -> Result<()> {
        if let Some(name) = self.name {
            webhook.name = name;
        }
        if let Some(url) = self.url {
            if url.trim().is_empty() {
                return Err(HubError::malformed("url must not be empty"));
            }
            webhook.url = url;
        }
        webhook.enabled = self.enabled.unwrap_or(true);
        webhook.update_interval_ms = self.update_interval_ms.unwrap_or(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alarm(min: f64, max: f64) -> AlarmRule {
        AlarmPatch {
            sensor_kind: Some(SensorKind::Temperature),
            min_value: Some(min),
            max_value: Some(max),
            webhook_url: Some("http://example/hook".into()),
            ..Default::default()
        }
        .into_alarm("a1")
        .unwrap()
    }

    #[test]
    fn test_alarm_defaults() {
        let a = alarm(MIN_DISABLED, 30.0);
        assert!(a.enabled);
        assert_eq!(a.cooldown_ms, DEFAULT_COOLDOWN_MS);
        assert_eq!(a.name, "a1");
        assert_eq!(a.sensor_ref, "temperature");
        assert_eq!(a.last_triggered_at, None);
    }

    #[test]
    fn test_check_against_sentinels() {
        let a = alarm(MIN_DISABLED, 30.0);
        assert_eq!(a.check(31.0), Some(Breach::Above { threshold: 30.0 }));
        assert_eq!(a.check(30.0), None);
        // below the disabled minimum is not a breach
        assert_eq!(a.check(-1000.0), None);

        let a = alarm(10.0, MAX_DISABLED);
        assert_eq!(a.check(9.5), Some(Breach::Below { threshold: 10.0 }));
        assert_eq!(a.check(5000.0), None);
    }

    #[test]
    fn test_inverted_bounds_are_kept() {
        let a = alarm(40.0, 20.0);
        assert_eq!(a.min_value, 40.0);
        assert_eq!(a.max_value, 20.0);
        assert!(a.check(30.0).is_some());
    }

    #[test]
    fn test_builtin_ref_is_normalized() {
        let a = AlarmPatch {
            sensor_kind: Some(SensorKind::Humidity),
            sensor_ref: Some("whatever".into()),
            webhook_url: Some("http://x".into()),
            ..Default::default()
        }
        .into_alarm("h")
        .unwrap();
        assert_eq!(a.sensor_ref, "humidity");
    }

    #[test]
    fn test_bus_alarm_requires_sensor_id() {
        let err = AlarmPatch {
            sensor_kind: Some(SensorKind::Ds18b20),
            webhook_url: Some("http://x".into()),
            ..Default::default()
        }
        .into_alarm("b")
        .unwrap_err();
        assert!(matches!(err, HubError::MalformedInput(_)));
    }

    #[test]
    fn test_unknown_sensor_type_is_rejected() {
        assert!("pressure".parse::<SensorKind>().is_err());
        let parsed: std::result::Result<AlarmPatch, _> =
            serde_json::from_str(r#"{"sensor_type": "pressure"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_webhook_defaults() {
        let w = WebhookPatch { url: Some("http://x".into()), ..Default::default() }
            .into_webhook("w1")
            .unwrap();
        assert!(w.enabled);
        assert_eq!(w.update_interval_ms, 0);
        assert!(WebhookPatch::default().into_webhook("w2").is_err());
    }

    #[test]
    fn test_update_reverts_omitted_enabled_and_cooldown() {
        let mut a = AlarmPatch {
            sensor_kind: Some(SensorKind::Light),
            enabled: Some(false),
            webhook_url: Some("http://x".into()),
            cooldown_ms: Some(5),
            ..Default::default()
        }
        .into_alarm("l")
        .unwrap();
        a.last_triggered_at = Some(42);

        AlarmPatch { max_value: Some(800.0), ..Default::default() }
            .apply(&mut a)
            .unwrap();
        assert!(a.enabled);
        assert_eq!(a.cooldown_ms, DEFAULT_COOLDOWN_MS);
        assert_eq!(a.max_value, 800.0);
        assert_eq!(a.last_triggered_at, Some(42));

        let mut w = WebhookPatch {
            url: Some("http://x".into()),
            enabled: Some(false),
            update_interval_ms: Some(5_000),
            ..Default::default()
        }
        .into_webhook("w")
        .unwrap();
        w.last_sent_at = Some(7);
        WebhookPatch::default().apply(&mut w).unwrap();
        assert!(w.enabled);
        assert_eq!(w.update_interval_ms, 0);
        assert_eq!(w.last_sent_at, Some(7));
    }

    #[test]
    fn test_switching_to_bus_kind_requires_sensor_id() {
        let mut a = alarm(MIN_DISABLED, 30.0);
        let err = AlarmPatch { sensor_kind: Some(SensorKind::Ds18b20), ..Default::default() }
            .apply(&mut a)
            .unwrap_err();
        assert!(matches!(err, HubError::MalformedInput(_)));

        AlarmPatch {
            sensor_kind: Some(SensorKind::Ds18b20),
            sensor_ref: Some("pool_temp".into()),
            ..Default::default()
        }
        .apply(&mut a)
        .unwrap();
        assert_eq!(a.sensor_ref, "pool_temp");
    }

    #[test]
    fn test_sensor_rename_rejects_empty_name() {
        let addr: BusAddress = "28:FF:64:1E:0F:16:04:5C".parse().unwrap();
        let mut s = SensorDescriptor::new(addr, "pool_temp", "Pool").unwrap();
        let err = SensorPatch { name: Some("  ".into()), enabled: None }
            .apply(&mut s)
            .unwrap_err();
        assert!(matches!(err, HubError::MalformedInput(_)));
        assert_eq!(s.name, "Pool");
    }

    #[test]
    fn test_sensor_json_shape() {
        let addr: BusAddress = "28:FF:64:1E:0F:16:04:5C".parse().unwrap();
        let s = SensorDescriptor::new(addr, "pool_temp", "Pool").unwrap();
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["busAddress"], "28:FF:64:1E:0F:16:04:5C");
        assert_eq!(v["lastReading"], DISCONNECTED);
        assert_eq!(v["enabled"], true);
    }
}
