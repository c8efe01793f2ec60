pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use gridcube_core::{
    Device, DeviceAddress, DeviceMapping, Event, EventId, GpsTime, PacketType, PublicDeviceId,
    Reading, Uplink, WirelessDeviceId,
};
use jiff::Timestamp;

use crate::resolver::AddressStore;

pub use memory::{MemoryStorage, MemoryStorageError};
pub use sqlite::{SqliteStorage, SqliteStorageError};

/// Registered devices and their latest folded state.
#[async_trait]
pub trait DeviceRegistry: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Store a mapping. Any earlier mapping for the same public id, or any
    /// other public id holding the same wireless id, is replaced.
    async fn register_device(&self, mapping: DeviceMapping) -> Result<(), Self::Error>;

    async fn get_device(&self, public_id: &PublicDeviceId) -> Result<Option<Device>, Self::Error>;

    async fn list_devices(&self) -> Result<Vec<Device>, Self::Error>;

    /// Fold one uplink into the state of the device owning `wireless_id`.
    ///
    /// Returns `false` when no device is registered under that address.
    async fn update_device_info(
        &self,
        wireless_id: &WirelessDeviceId,
        uplink: &Uplink,
        seen_at: Timestamp,
    ) -> Result<bool, Self::Error>;
}

/// Filter for listing readings.
#[derive(Debug, Clone, Copy)]
pub struct ReadingQuery {
    pub packet_type: Option<PacketType>,
    pub limit: usize,
}

impl Default for ReadingQuery {
    fn default() -> Self {
        Self {
            packet_type: None,
            limit: 100,
        }
    }
}

/// Decoded uplinks keyed by device, public form when one is known.
#[async_trait]
pub trait ReadingStore: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn store_reading(&self, device: &DeviceAddress, reading: Reading)
    -> Result<(), Self::Error>;

    /// Newest first. Readings are keyed by the form the device resolved to
    /// when they arrived, so callers wanting a device's full history query
    /// both its public and wireless forms.
    async fn list_readings(
        &self,
        device: &DeviceAddress,
        query: ReadingQuery,
    ) -> Result<Vec<Reading>, Self::Error>;
}

/// Audit trail of downlink commands.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Insert a new event. Returns `false`, leaving the stored record as it
    /// was, when the id is already taken.
    async fn insert_event(&self, event: Event) -> Result<bool, Self::Error>;

    async fn get_event(&self, id: EventId) -> Result<Option<Event>, Self::Error>;

    /// Events whose target label equals `device`, oldest first. The label is
    /// fixed at dispatch time.
    async fn list_events(&self, device: &str) -> Result<Vec<Event>, Self::Error>;

    /// Record a transmission the transport accepted at `at`. Leaves the
    /// acknowledgment fields untouched.
    async fn mark_sent(&self, id: EventId, at: Timestamp) -> Result<(), Self::Error>;

    /// Count one more transmission attempt made at `at` without changing
    /// `sent` or the acknowledgment fields.
    async fn record_attempt(&self, id: EventId, at: Timestamp) -> Result<(), Self::Error>;

    /// Sent but unacknowledged events last transmitted at or before `cutoff`.
    async fn list_unacknowledged(&self, cutoff: Timestamp) -> Result<Vec<Event>, Self::Error>;

    /// Mark the oldest unacknowledged event for this device carrying
    /// `gps_time` as acknowledged. At most one event changes.
    async fn acknowledge(
        &self,
        wireless_id: &WirelessDeviceId,
        gps_time: GpsTime,
        at: Timestamp,
    ) -> Result<Option<EventId>, Self::Error>;
}

/// Everything the gateway needs from a storage backend.
pub trait Storage:
    AddressStore + DeviceRegistry + ReadingStore + EventStore + Clone + Send + Sync + 'static
{
}

impl<T> Storage for T where
    T: AddressStore + DeviceRegistry + ReadingStore + EventStore + Clone + Send + Sync + 'static
{
}

/// Storage key for readings of one device.
pub(crate) fn device_key(device: &DeviceAddress) -> String {
    device.to_string()
}
