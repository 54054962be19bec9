//! ==============================================================================
//! storage.rs - durable registry (key/value store + persistence adapter)
//! ==============================================================================
//!
//! purpose:
//!     keeps the sensor/alarm/webhook registry across restarts.
//!     every mutation rewrites the whole registry as one transaction;
//!     startup reads it back record by record.
//!
//! persisted layout:
//!     sensor_count                       u64
//!     sensor_<i>_addr / _id / _name / _en
//!     alarm_count
//!     alarm_<i>_id / _name / _type / _ref / _min / _max / _en / _url / _cd
//!     webhook_count
//!     webhook_<i>_id / _name / _url / _en / _int
//!
//! runtime-only fields (last reading, last trigger, last send) are never
//! written and come back as "never" on every load.
//!
//! relationships:
//!     - used by: hub.rs (load_all at startup, save_all on every mutation)
//!     - uses: registry.rs, domain.rs
//!
//! ==============================================================================

use crate::domain::{AlarmRule, ScheduledWebhook, SensorDescriptor, SensorKind};
use crate::error::{HubError, Result};
use crate::onewire::BusAddress;
use crate::registry::{Limits, Registry};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

// ==============================================================================
// key/value store
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoredValue {
    Str(String),
    F64(f64),
    U64(u64),
    Bool(bool),
    #[serde(serialize_with = "to_hex", deserialize_with = "from_hex")]
    Bytes(Vec<u8>),
}

#[allow(clippy::ptr_arg)]
fn to_hex<S: Serializer>(bytes: &Vec<u8>, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(bytes))
}

fn from_hex<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<u8>, D::Error> {
    let text = String::deserialize(d)?;
    hex::decode(text).map_err(serde::de::Error::custom)
}

pub type Entries = BTreeMap<String, StoredValue>;

/// Minimal typed key/value store. `replace_all` must be atomic: after a crash
/// the store holds either the old or the new entry set, never a mix.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Option<StoredValue>;
    fn replace_all(&mut self, entries: Entries) -> Result<()>;
}

/// JSON file on disk, replaced via write-to-temp + rename.
pub struct FileStore {
    path: PathBuf,
    entries: Entries,
}

impl FileStore {
    /// Open the store. A missing file is a first boot. Entries that fail to
    /// decode are dropped one by one; a file that is not a json object at
    /// all is moved aside to `<name>.corrupt` and the store starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&text) {
                Ok(raw) => decode_entries(raw),
                Err(e) => {
                    warn!("Registry file {} is corrupt, starting empty: {}", path.display(), e);
                    quarantine(&path);
                    Entries::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No registry file at {}", path.display());
                Entries::new()
            }
            Err(e) => {
                warn!("Cannot read registry file {}: {}", path.display(), e);
                Entries::new()
            }
        };
        Self { path, entries }
    }
}

fn decode_entries(raw: BTreeMap<String, serde_json::Value>) -> Entries {
    raw.into_iter()
        .filter_map(|(key, value)| match serde_json::from_value::<StoredValue>(value) {
            Ok(value) => Some((key, value)),
            Err(e) => {
                warn!("Dropping undecodable registry entry {}: {}", key, e);
                None
            }
        })
        .collect()
}

fn quarantine(path: &Path) {
    let mut aside = path.as_os_str().to_owned();
    aside.push(".corrupt");
    if let Err(e) = std::fs::rename(path, &aside) {
        warn!("Could not move {} aside: {}", path.display(), e);
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<StoredValue> {
        self.entries.get(key).cloned()
    }

    fn replace_all(&mut self, entries: Entries) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let text = serde_json::to_string_pretty(&entries)
            .map_err(|e| HubError::Storage(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)?;

        self.entries = entries;
        Ok(())
    }
}

/// In-process store. Clones share the same entries, so a test can keep a
/// handle to inspect or break the store the hub owns.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    entries: Entries,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_writes = fail;
        }
    }

    pub fn insert(&self, key: &str, value: StoredValue) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.insert(key.to_string(), value);
        }
    }

    pub fn remove(&self, key: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<StoredValue> {
        self.inner.lock().ok()?.entries.get(key).cloned()
    }

    fn replace_all(&mut self, entries: Entries) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| HubError::Storage("memory store poisoned".into()))?;
        if inner.fail_writes {
            return Err(HubError::Storage("write rejected".into()));
        }
        inner.entries = entries;
        Ok(())
    }
}

// ==============================================================================
// persistence adapter
// ==============================================================================

/// Typed reads of one indexed record; `None` marks the record malformed.
struct Record<'a> {
    store: &'a dyn KeyValueStore,
    prefix: String,
}

impl<'a> Record<'a> {
    fn new(store: &'a dyn KeyValueStore, kind: &str, index: u64) -> Self {
        Self {
            store,
            prefix: format!("{}_{}", kind, index),
        }
    }

    fn get(&self, field: &str) -> Option<StoredValue> {
        self.store.get(&format!("{}_{}", self.prefix, field))
    }

    fn string(&self, field: &str) -> Option<String> {
        match self.get(field)? {
            StoredValue::Str(s) => Some(s),
            _ => None,
        }
    }

    fn float(&self, field: &str) -> Option<f64> {
        match self.get(field)? {
            StoredValue::F64(v) if v.is_finite() => Some(v),
            _ => None,
        }
    }

    fn unsigned(&self, field: &str) -> Option<u64> {
        match self.get(field)? {
            StoredValue::U64(v) => Some(v),
            _ => None,
        }
    }

    fn boolean(&self, field: &str) -> Option<bool> {
        match self.get(field)? {
            StoredValue::Bool(v) => Some(v),
            _ => None,
        }
    }

    fn bytes(&self, field: &str) -> Option<Vec<u8>> {
        match self.get(field)? {
            StoredValue::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

fn count(store: &dyn KeyValueStore, kind: &str) -> u64 {
    match store.get(&format!("{}_count", kind)) {
        Some(StoredValue::U64(n)) => n,
        Some(other) => {
            warn!("Ignoring malformed {}_count: {:?}", kind, other);
            0
        }
        None => 0,
    }
}

fn read_sensor(record: &Record<'_>) -> Option<SensorDescriptor> {
    let rom: [u8; 8] = record.bytes("addr")?.try_into().ok()?;
    let mut sensor = SensorDescriptor::new(BusAddress(rom), record.string("id")?, "").ok()?;
    sensor.name = record.string("name")?;
    sensor.enabled = record.boolean("en")?;
    Some(sensor)
}

fn read_alarm(record: &Record<'_>) -> Option<AlarmRule> {
    let sensor_kind: SensorKind = record.string("type")?.parse().ok()?;
    let id = record.string("id")?;
    if id.is_empty() {
        return None;
    }
    Some(AlarmRule {
        id,
        name: record.string("name")?,
        sensor_kind,
        sensor_ref: record.string("ref")?,
        min_value: record.float("min")?,
        max_value: record.float("max")?,
        enabled: record.boolean("en")?,
        webhook_url: record.string("url")?,
        cooldown_ms: record.unsigned("cd")?,
        last_triggered_at: None,
    })
}

fn read_webhook(record: &Record<'_>) -> Option<ScheduledWebhook> {
    let id = record.string("id")?;
    if id.is_empty() {
        return None;
    }
    Some(ScheduledWebhook {
        id,
        name: record.string("name")?,
        url: record.string("url")?,
        enabled: record.boolean("en")?,
        update_interval_ms: record.unsigned("int")?,
        last_sent_at: None,
    })
}

/// Rebuild the registry from `store`. Malformed, duplicate or over-capacity
/// records are skipped one by one; they never abort the load.
pub fn load_all(store: &dyn KeyValueStore, limits: Limits) -> Registry {
    let mut registry = Registry::new(limits);

    for i in 0..count(store, "sensor") {
        match read_sensor(&Record::new(store, "sensor", i)) {
            Some(sensor) => {
                if let Err(e) = registry.add_sensor(sensor) {
                    warn!("Skipping stored sensor #{}: {}", i, e);
                }
            }
            None => warn!("Skipping malformed stored sensor #{}", i),
        }
    }

    for i in 0..count(store, "alarm") {
        match read_alarm(&Record::new(store, "alarm", i)) {
            Some(alarm) => {
                if let Err(e) = registry.alarms.add(alarm) {
                    warn!("Skipping stored alarm #{}: {}", i, e);
                }
            }
            None => warn!("Skipping malformed stored alarm #{}", i),
        }
    }

    for i in 0..count(store, "webhook") {
        match read_webhook(&Record::new(store, "webhook", i)) {
            Some(webhook) => {
                if let Err(e) = registry.webhooks.add(webhook) {
                    warn!("Skipping stored webhook #{}: {}", i, e);
                }
            }
            None => warn!("Skipping malformed stored webhook #{}", i),
        }
    }

    debug!(
        "Loaded registry: {} sensors, {} alarms, {} webhooks",
        registry.sensors.len(),
        registry.alarms.len(),
        registry.webhooks.len()
    );
    registry
}

/// Flatten the persisted fields of `registry` into store entries.
pub fn encode(registry: &Registry) -> Entries {
    let mut out = Entries::new();
    let mut put = |key: String, value: StoredValue| {
        out.insert(key, value);
    };

    put("sensor_count".into(), StoredValue::U64(registry.sensors.len() as u64));
    for (i, s) in registry.sensors.list().iter().enumerate() {
        put(format!("sensor_{}_addr", i), StoredValue::Bytes(s.bus_address.0.to_vec()));
        put(format!("sensor_{}_id", i), StoredValue::Str(s.id.clone()));
        put(format!("sensor_{}_name", i), StoredValue::Str(s.name.clone()));
        put(format!("sensor_{}_en", i), StoredValue::Bool(s.enabled));
    }

    put("alarm_count".into(), StoredValue::U64(registry.alarms.len() as u64));
    for (i, a) in registry.alarms.list().iter().enumerate() {
        put(format!("alarm_{}_id", i), StoredValue::Str(a.id.clone()));
        put(format!("alarm_{}_name", i), StoredValue::Str(a.name.clone()));
        put(format!("alarm_{}_type", i), StoredValue::Str(a.sensor_kind.as_str().into()));
        put(format!("alarm_{}_ref", i), StoredValue::Str(a.sensor_ref.clone()));
        put(format!("alarm_{}_min", i), StoredValue::F64(a.min_value));
        put(format!("alarm_{}_max", i), StoredValue::F64(a.max_value));
        put(format!("alarm_{}_en", i), StoredValue::Bool(a.enabled));
        put(format!("alarm_{}_url", i), StoredValue::Str(a.webhook_url.clone()));
        put(format!("alarm_{}_cd", i), StoredValue::U64(a.cooldown_ms));
    }

    put("webhook_count".into(), StoredValue::U64(registry.webhooks.len() as u64));
    for (i, w) in registry.webhooks.list().iter().enumerate() {
        put(format!("webhook_{}_id", i), StoredValue::Str(w.id.clone()));
        put(format!("webhook_{}_name", i), StoredValue::Str(w.name.clone()));
        put(format!("webhook_{}_url", i), StoredValue::Str(w.url.clone()));
        put(format!("webhook_{}_en", i), StoredValue::Bool(w.enabled));
        put(format!("webhook_{}_int", i), StoredValue::U64(w.update_interval_ms));
    }

    out
}

pub fn save_all(store: &mut dyn KeyValueStore, registry: &Registry) -> Result<()> {
    store.replace_all(encode(registry))
}
