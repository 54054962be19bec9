//! Bounded, insertion-ordered collections of sensors, alarms and webhooks.
//!
//! Lookups are by id. Removal keeps the relative order of the remaining
//! entries so a scan in progress never skips one.

use crate::domain::{AlarmRule, Entity, ScheduledWebhook, SensorDescriptor};
use crate::error::{HubError, Result};
use crate::onewire::BusAddress;

#[derive(Debug, Clone)]
pub struct Collection<T: Entity> {
    items: Vec<T>,
    capacity: usize,
}

impl<T: Entity> Collection<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn list(&self) -> &[T] {
        &self.items
    }

    pub(crate) fn list_mut(&mut self) -> &mut [T] {
        &mut self.items
    }

    pub fn find(&self, id: &str) -> Option<&T> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    /// Append an entity. Fails closed on a duplicate id or a full collection.
    pub fn add(&mut self, entity: T) -> Result<String> {
        if self.contains(entity.id()) {
            return Err(HubError::duplicate(T::KIND, entity.id()));
        }
        if self.items.len() >= self.capacity {
            return Err(HubError::CapacityExceeded {
                kind: T::KIND,
                capacity: self.capacity,
            });
        }
        let id = entity.id().to_string();
        self.items.push(entity);
        Ok(id)
    }

    /// Apply `change` to the entity with `id`. The stored entity is only
    /// replaced if `change` succeeds and leaves the id untouched.
    pub fn update<F>(&mut self, id: &str, change: F) -> Result<()>
    where
        F: FnOnce(&mut T) -> Result<()>,
    {
        let slot = self
            .items
            .iter_mut()
            .find(|item| item.id() == id)
            .ok_or_else(|| HubError::not_found(T::KIND, id))?;

        let mut next = slot.clone();
        change(&mut next)?;
        if next.id() != id {
            return Err(HubError::malformed("id cannot be changed by an update"));
        }
        *slot = next;
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<T> {
        let index = self
            .items
            .iter()
            .position(|item| item.id() == id)
            .ok_or_else(|| HubError::not_found(T::KIND, id))?;
        Ok(self.items.remove(index))
    }
}

/// Capacity ceilings for the three collections.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub sensors: usize,
    pub alarms: usize,
    pub webhooks: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            sensors: 10,
            alarms: 10,
            webhooks: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Registry {
    pub sensors: Collection<SensorDescriptor>,
    pub alarms: Collection<AlarmRule>,
    pub webhooks: Collection<ScheduledWebhook>,
}

impl Registry {
    pub fn new(limits: Limits) -> Self {
        Self {
            sensors: Collection::new(limits.sensors),
            alarms: Collection::new(limits.alarms),
            webhooks: Collection::new(limits.webhooks),
        }
    }

    pub fn limits(&self) -> Limits {
        Limits {
            sensors: self.sensors.capacity(),
            alarms: self.alarms.capacity(),
            webhooks: self.webhooks.capacity(),
        }
    }

    pub fn find_sensor_by_address(&self, address: &BusAddress) -> Option<&SensorDescriptor> {
        self.sensors.list().iter().find(|s| s.bus_address == *address)
    }

    /// Sensors are unique by bus address as well as by id.
    pub fn add_sensor(&mut self, sensor: SensorDescriptor) -> Result<String> {
        if self.find_sensor_by_address(&sensor.bus_address).is_some() {
            return Err(HubError::duplicate("sensor bus address", sensor.bus_address.to_string()));
        }
        self.sensors.add(sensor)
    }

    pub fn remove_sensor_by_address(&mut self, address: &BusAddress) -> Result<SensorDescriptor> {
        let id = self
            .find_sensor_by_address(address)
            .map(|s| s.id.clone())
            .ok_or_else(|| HubError::not_found(SensorDescriptor::KIND, address.to_string()))?;
        self.sensors.remove(&id)
    }
}
