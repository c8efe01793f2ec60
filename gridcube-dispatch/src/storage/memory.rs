use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use gridcube_core::{
    Device, DeviceAddress, DeviceMapping, Event, EventId, GpsTime, PublicDeviceId, Reading, Uplink,
    WirelessDeviceId,
};
use jiff::Timestamp;

use crate::resolver::AddressStore;
use crate::storage::{DeviceRegistry, EventStore, ReadingQuery, ReadingStore, device_key};

/// In-memory storage implementation.
/// Used for tests and for running the gateway without a database.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    devices: Arc<RwLock<HashMap<PublicDeviceId, Device>>>,
    readings: Arc<RwLock<HashMap<String, Vec<Reading>>>>,
    events: Arc<RwLock<HashMap<EventId, Event>>>,
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryStorageError {
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl<T> From<PoisonError<T>> for MemoryStorageError {
    fn from(err: PoisonError<T>) -> Self {
        MemoryStorageError::LockPoisoned(err.to_string())
    }
}

#[async_trait]
impl AddressStore for MemoryStorage {
    type Error = MemoryStorageError;

    async fn lookup_wireless_id(
        &self,
        public_id: &PublicDeviceId,
    ) -> Result<Option<WirelessDeviceId>, Self::Error> {
        let devices = self.devices.read()?;
        Ok(devices.get(public_id).map(|d| d.mapping.wireless_id))
    }

    async fn lookup_public_id(
        &self,
        wireless_id: &WirelessDeviceId,
    ) -> Result<Option<PublicDeviceId>, Self::Error> {
        let devices = self.devices.read()?;
        Ok(devices
            .values()
            .find(|d| d.mapping.wireless_id == *wireless_id)
            .map(|d| d.mapping.public_id.clone()))
    }
}

#[async_trait]
impl DeviceRegistry for MemoryStorage {
    type Error = MemoryStorageError;

    async fn register_device(&self, mapping: DeviceMapping) -> Result<(), Self::Error> {
        let mut devices = self.devices.write()?;

        devices.retain(|public_id, d| {
            *public_id == mapping.public_id || d.mapping.wireless_id != mapping.wireless_id
        });

        let info = devices
            .remove(&mapping.public_id)
            .map(|d| d.info)
            .unwrap_or_default();
        devices.insert(mapping.public_id.clone(), Device { mapping, info });

        Ok(())
    }

    async fn get_device(&self, public_id: &PublicDeviceId) -> Result<Option<Device>, Self::Error> {
        let devices = self.devices.read()?;
        Ok(devices.get(public_id).cloned())
    }

    async fn list_devices(&self) -> Result<Vec<Device>, Self::Error> {
        let devices = self.devices.read()?;
        let mut list: Vec<Device> = devices.values().cloned().collect();
        list.sort_by(|a, b| a.mapping.public_id.cmp(&b.mapping.public_id));
        Ok(list)
    }

    async fn update_device_info(
        &self,
        wireless_id: &WirelessDeviceId,
        uplink: &Uplink,
        seen_at: Timestamp,
    ) -> Result<bool, Self::Error> {
        let mut devices = self.devices.write()?;

        let Some(device) = devices
            .values_mut()
            .find(|d| d.mapping.wireless_id == *wireless_id)
        else {
            return Ok(false);
        };

        device.info.apply(uplink, seen_at);
        Ok(true)
    }
}

#[async_trait]
impl ReadingStore for MemoryStorage {
    type Error = MemoryStorageError;

    async fn store_reading(
        &self,
        device: &DeviceAddress,
        reading: Reading,
    ) -> Result<(), Self::Error> {
        let mut readings = self.readings.write()?;
        readings.entry(device_key(device)).or_default().push(reading);
        Ok(())
    }

    async fn list_readings(
        &self,
        device: &DeviceAddress,
        query: ReadingQuery,
    ) -> Result<Vec<Reading>, Self::Error> {
        let readings = self.readings.read()?;

        let mut list: Vec<Reading> = readings
            .get(&device_key(device))
            .map(|r| {
                r.iter()
                    .filter(|r| query.packet_type.is_none_or(|t| r.packet_type() == t))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        list.sort_by(|a, b| (b.received_at, b.id.0).cmp(&(a.received_at, a.id.0)));
        list.truncate(query.limit);
        Ok(list)
    }
}

#[async_trait]
impl EventStore for MemoryStorage {
    type Error = MemoryStorageError;

    async fn insert_event(&self, event: Event) -> Result<bool, Self::Error> {
        let mut events = self.events.write()?;
        match events.entry(event.id) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(event);
                Ok(true)
            }
        }
    }

    async fn get_event(&self, id: EventId) -> Result<Option<Event>, Self::Error> {
        let events = self.events.read()?;
        Ok(events.get(&id).cloned())
    }

    async fn list_events(&self, device: &str) -> Result<Vec<Event>, Self::Error> {
        let events = self.events.read()?;
        let mut list: Vec<Event> = events
            .values()
            .filter(|e| &*e.device == device)
            .cloned()
            .collect();
        list.sort_by_key(|e| e.created_at);
        Ok(list)
    }

    async fn mark_sent(&self, id: EventId, at: Timestamp) -> Result<(), Self::Error> {
        let mut events = self.events.write()?;
        if let Some(event) = events.get_mut(&id) {
            event.sent = true;
            event.attempts += 1;
            event.last_attempt_at = at;
        }
        Ok(())
    }

    async fn record_attempt(&self, id: EventId, at: Timestamp) -> Result<(), Self::Error> {
        let mut events = self.events.write()?;
        if let Some(event) = events.get_mut(&id) {
            event.attempts += 1;
            event.last_attempt_at = at;
        }
        Ok(())
    }

    async fn list_unacknowledged(&self, cutoff: Timestamp) -> Result<Vec<Event>, Self::Error> {
        let events = self.events.read()?;
        let mut list: Vec<Event> = events
            .values()
            .filter(|e| e.sent && !e.acknowledged && e.last_attempt_at <= cutoff)
            .cloned()
            .collect();
        list.sort_by_key(|e| e.created_at);
        Ok(list)
    }

    async fn acknowledge(
        &self,
        wireless_id: &WirelessDeviceId,
        gps_time: GpsTime,
        at: Timestamp,
    ) -> Result<Option<EventId>, Self::Error> {
        let mut events = self.events.write()?;

        let Some(event) = events
            .values_mut()
            .filter(|e| {
                !e.acknowledged && e.gps_time == gps_time && e.wireless_id == Some(*wireless_id)
            })
            .min_by_key(|e| e.created_at)
        else {
            return Ok(None);
        };

        event.acknowledged = true;
        event.acknowledged_at = Some(at);
        Ok(Some(event.id))
    }
}
