//! ==============================================================================
//! hub.rs - the process-lifetime owner of registry, readings and outputs
//! ==============================================================================
//!
//! purpose:
//!     ties the registry to its store and to the live readings.
//!     - every registry mutation is write-through: it is applied to a copy,
//!       the copy is persisted, and only then does it replace the live
//!       registry. a failed write leaves nothing changed.
//!     - tick() refreshes readings, evaluates alarms, then schedules, and
//!       hands back the notifications to deliver once the hub is unlocked.
//!
//! relationships:
//!     - used by: main.rs (tick loop), api.rs (rest handlers)
//!     - uses: registry.rs, storage.rs, readings.rs, alarms.rs, scheduler.rs, hal.rs
//!
//! ==============================================================================

use crate::alarms::{self, TickTime};
use crate::config::{OutputConfig, SensorsConfig};
use crate::domain::{
    AlarmPatch, AlarmRule, ScheduledWebhook, SensorDescriptor, SensorPatch, WebhookPatch,
};
use crate::error::{HubError, Result};
use crate::hal::HardwareProvider;
use crate::notify::Outbound;
use crate::onewire::BusAddress;
use crate::readings::{bus_values, LiveReadings, Snapshot};
use crate::registry::{Limits, Registry};
use crate::scheduler;
use crate::storage::{self, KeyValueStore};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Fixed wiring and identity the hub is built with.
#[derive(Debug, Clone)]
pub struct HubSettings {
    pub device_name: String,
    pub wiring: SensorsConfig,
    pub outputs: Vec<OutputConfig>,
    pub limits: Limits,
    pub show_sensor_data: bool,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            device_name: "sensor-hub".to_string(),
            wiring: SensorsConfig::default(),
            outputs: Vec::new(),
            limits: Limits::default(),
            show_sensor_data: false,
        }
    }
}

struct Output {
    config: OutputConfig,
    on: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryCounts {
    pub sensors: usize,
    pub max_sensors: usize,
    pub alarms: usize,
    pub max_alarms: usize,
    pub webhooks: usize,
    pub max_webhooks: usize,
}

pub struct Hub {
    registry: Registry,
    store: Box<dyn KeyValueStore>,
    readings: LiveReadings,
    hal: Arc<dyn HardwareProvider>,
    outputs: Vec<Output>,
    settings: HubSettings,
}

impl Hub {
    /// Load the registry from `store` and switch every output off.
    pub fn open(settings: HubSettings, store: Box<dyn KeyValueStore>, hal: Arc<dyn HardwareProvider>) -> Self {
        let registry = storage::load_all(store.as_ref(), settings.limits);
        info!(
            "Registry loaded: {} sensors, {} alarms, {} webhooks",
            registry.sensors.len(),
            registry.alarms.len(),
            registry.webhooks.len()
        );

        let outputs = settings
            .outputs
            .iter()
            .cloned()
            .map(|config| {
                if let Err(e) = hal.write_output(config.gpio_pin, config.active_low) {
                    warn!("Output '{}' could not be reset: {}", config.name, e);
                }
                Output { config, on: false }
            })
            .collect();

        Self {
            registry,
            store,
            readings: LiveReadings::new(),
            hal,
            outputs,
            settings,
        }
    }

    pub fn device_name(&self) -> &str {
        &self.settings.device_name
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn counts(&self) -> RegistryCounts {
        let limits = self.registry.limits();
        RegistryCounts {
            sensors: self.registry.sensors.len(),
            max_sensors: limits.sensors,
            alarms: self.registry.alarms.len(),
            max_alarms: limits.alarms,
            webhooks: self.registry.webhooks.len(),
            max_webhooks: limits.webhooks,
        }
    }

    /// Apply `change` to a copy of the registry, persist the copy, then swap
    /// it in. Any error leaves the live registry untouched.
    fn mutate<T>(&mut self, change: impl FnOnce(&mut Registry) -> Result<T>) -> Result<T> {
        let mut next = self.registry.clone();
        let out = change(&mut next)?;
        if let Err(e) = storage::save_all(self.store.as_mut(), &next) {
            warn!("Registry write failed, change discarded: {}", e);
            return Err(e);
        }
        self.registry = next;
        Ok(out)
    }

    // ==========================================================================
    // sensors
    // ==========================================================================

    /// Register every probe on the bus when no sensors exist yet.
    pub fn seed_from_bus(&mut self) -> Result<usize> {
        if !self.registry.sensors.is_empty() {
            return Ok(0);
        }
        let found = self
            .hal
            .scan_bus()
            .map_err(|e| HubError::Hardware(e.to_string()))?;
        if found.is_empty() {
            return Ok(0);
        }

        let capacity = self.registry.sensors.capacity();
        if found.len() > capacity {
            warn!("{} probes on the bus, registering the first {}", found.len(), capacity);
        }
        let added = self.mutate(|r| {
            for (i, address) in found.iter().take(capacity).enumerate() {
                let n = i + 1;
                let sensor = SensorDescriptor::new(*address, format!("ds18b20_{}", n), format!("Sensor {}", n))?;
                r.add_sensor(sensor)?;
            }
            Ok(r.sensors.len())
        })?;
        info!("Auto-registered {} bus sensors", added);
        Ok(added)
    }

    /// Probes on the bus that are not registered yet.
    pub fn unregistered_probes(&self) -> Result<Vec<BusAddress>> {
        let found = self
            .hal
            .scan_bus()
            .map_err(|e| HubError::Hardware(e.to_string()))?;
        Ok(found
            .into_iter()
            .filter(|a| self.registry.find_sensor_by_address(a).is_none())
            .collect())
    }

    pub fn sensors(&self) -> &[SensorDescriptor] {
        self.registry.sensors.list()
    }

    pub fn add_sensor(&mut self, address: BusAddress, id: &str, name: &str) -> Result<SensorDescriptor> {
        let sensor = SensorDescriptor::new(address, id, name)?;
        let added = sensor.clone();
        self.mutate(|r| r.add_sensor(sensor))?;
        info!("Sensor {} added at {}", added.id, added.bus_address);
        Ok(added)
    }

    pub fn update_sensor(&mut self, id: &str, patch: SensorPatch) -> Result<SensorDescriptor> {
        self.mutate(|r| {
            r.sensors.update(id, |s| patch.apply(s))?;
            r.sensors
                .find(id)
                .cloned()
                .ok_or_else(|| HubError::not_found("sensor", id))
        })
    }

    pub fn remove_sensor(&mut self, address: &BusAddress) -> Result<SensorDescriptor> {
        let removed = self.mutate(|r| r.remove_sensor_by_address(address))?;
        info!("Sensor {} removed", removed.id);
        Ok(removed)
    }

    // ==========================================================================
    // alarms
    // ==========================================================================

    pub fn alarms(&self) -> &[AlarmRule] {
        self.registry.alarms.list()
    }

    /// Update the alarm with `id` if it exists, otherwise create it.
    /// Returns the stored alarm and whether it was created.
    pub fn upsert_alarm(&mut self, id: &str, patch: AlarmPatch) -> Result<(AlarmRule, bool)> {
        let created = !self.registry.alarms.contains(id);
        let alarm = self.mutate(|r| {
            if created {
                r.alarms.add(patch.into_alarm(id)?)?;
            } else {
                r.alarms.update(id, |a| patch.apply(a))?;
            }
            r.alarms
                .find(id)
                .cloned()
                .ok_or_else(|| HubError::not_found("alarm", id))
        })?;
        info!("Alarm {} {}", id, if created { "added" } else { "updated" });
        Ok((alarm, created))
    }

    pub fn delete_alarm(&mut self, id: &str) -> Result<AlarmRule> {
        self.mutate(|r| r.alarms.remove(id))
    }

    // ==========================================================================
    // webhooks
    // ==========================================================================

    pub fn webhooks(&self) -> &[ScheduledWebhook] {
        self.registry.webhooks.list()
    }

    pub fn upsert_webhook(&mut self, id: &str, patch: WebhookPatch) -> Result<(ScheduledWebhook, bool)> {
        let created = !self.registry.webhooks.contains(id);
        let webhook = self.mutate(|r| {
            if created {
                r.webhooks.add(patch.into_webhook(id)?)?;
            } else {
                r.webhooks.update(id, |w| patch.apply(w))?;
            }
            r.webhooks
                .find(id)
                .cloned()
                .ok_or_else(|| HubError::not_found("webhook", id))
        })?;
        info!("Webhook {} {}", id, if created { "added" } else { "updated" });
        Ok((webhook, created))
    }

    pub fn delete_webhook(&mut self, id: &str) -> Result<ScheduledWebhook> {
        self.mutate(|r| r.webhooks.remove(id))
    }

    /// One-off snapshot for a webhook, outside its schedule. Leaves
    /// `last_sent_at` alone.
    pub fn webhook_probe(&self, id: &str, at: TickTime) -> Result<Outbound> {
        let webhook = self
            .registry
            .webhooks
            .find(id)
            .ok_or_else(|| HubError::not_found("webhook", id))?;
        let view = self.readings.view(self.registry.sensors.list());
        Ok(Outbound {
            url: webhook.url.clone(),
            payload: scheduler::snapshot_payload(webhook, &view, at),
        })
    }

    // ==========================================================================
    // outputs and readings
    // ==========================================================================

    pub fn set_output(&mut self, name: &str, on: bool) -> Result<()> {
        let output = self
            .outputs
            .iter_mut()
            .find(|o| o.config.name == name)
            .ok_or_else(|| HubError::not_found("output", name))?;

        // active-low relays energize on a LOW level
        let level = on != output.config.active_low;
        self.hal
            .write_output(output.config.gpio_pin, level)
            .map_err(|e| HubError::Hardware(e.to_string()))?;
        output.on = on;
        info!("Output '{}' {}", name, if on { "ON" } else { "OFF" });
        Ok(())
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            channels: self.readings.channels().clone(),
            ds18b20_sensors: bus_values(self.registry.sensors.list()),
            outputs: self
                .outputs
                .iter()
                .map(|o| (o.config.name.clone(), o.on))
                .collect(),
        }
    }

    /// One control-loop pass: sample, evaluate alarms, dispatch schedules.
    pub fn tick(&mut self, at: TickTime) -> Vec<Outbound> {
        self.readings.refresh(
            self.hal.as_ref(),
            &self.settings.wiring,
            self.registry.sensors.list_mut(),
            self.settings.show_sensor_data,
        );

        let view = self.readings.view(self.registry.sensors.list());
        let mut outbound = alarms::evaluate(
            self.registry.alarms.list_mut(),
            &view,
            &self.settings.device_name,
            at,
        );
        outbound.extend(scheduler::dispatch(self.registry.webhooks.list_mut(), &view, at));
        outbound
    }
}
