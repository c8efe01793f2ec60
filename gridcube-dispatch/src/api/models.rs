use base64::{Engine, engine::general_purpose::STANDARD};
use gridcube_core::{
    Command, CommandType, Device, DeviceAddress, DeviceInfo, Event, PacketType, Reading, Uplink,
    time::from_gps,
};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::dispatch::{BulkOutcome, FailedDispatch};

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}

// Uplink ingestion, same body the wireless gateway posts
#[derive(Debug, Serialize, Deserialize)]
pub struct UplinkRequest {
    pub wireless_device_id: String,
    /// Base64 of the raw frame
    pub payload_data: String,
}

// Device Request/Response Models
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceCreateRequest {
    pub public_id: String,
    pub wireless_id: String,
    pub wireless_arn: Option<String>,
    pub thing_arn: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceResponse {
    pub id: String,
    pub wireless_id: String,
    pub wireless_arn: Option<String>,
    pub thing_arn: Option<String>,
    pub registered_at: String,
    pub info: DeviceInfo,
}

impl From<Device> for DeviceResponse {
    fn from(device: Device) -> Self {
        let mapping = device.mapping;
        Self {
            id: mapping.public_id.to_string(),
            wireless_id: mapping.wireless_id.to_string(),
            wireless_arn: mapping.wireless_arn.map(String::from),
            thing_arn: mapping.thing_arn.map(String::from),
            registered_at: mapping.registered_at.to_string(),
            info: device.info,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ReadingQueryParams {
    /// Numeric packet type, 0..=9
    pub packet_type: Option<u8>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadingResponse {
    pub id: String,
    pub device_id: String,
    pub wireless_id: String,
    pub packet_type: PacketType,
    pub received_at: String,
    /// Device-side time for packets that carry one
    pub device_time: Option<String>,
    pub uplink: Uplink,
}

impl ReadingResponse {
    pub fn new(device: &DeviceAddress, reading: Reading) -> Self {
        let device_time = match &reading.uplink {
            Uplink::InstantPower { gps_time, .. }
            | Uplink::CumulativeEnergy { gps_time, .. }
            | Uplink::OperationalState { gps_time, .. }
            | Uplink::EventAcknowledgment { gps_time, .. } => {
                Some(from_gps(*gps_time).to_string())
            }
            _ => None,
        };

        Self {
            id: reading.id.0.to_string(),
            device_id: device.to_string(),
            wireless_id: reading.device.to_string(),
            packet_type: reading.packet_type(),
            received_at: reading.received_at.to_string(),
            device_time,
            uplink: reading.uplink,
        }
    }
}

// Event Request/Response Models
#[derive(Debug, Deserialize)]
pub struct EventCreateRequest {
    /// Only allowed when a single device is targeted
    pub event_id: Option<String>,
    pub devices: Vec<String>,
    pub command: Command,
    /// Defaults to now
    pub start_time: Option<Timestamp>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventResponse {
    pub id: String,
    pub command_type: CommandType,
    pub command: Command,
    pub device_id: String,
    pub wireless_id: Option<String>,
    pub gps_time: u32,
    /// Base64 of the encoded frame
    pub frame: String,
    pub sent: bool,
    pub acknowledged: bool,
    pub attempts: u32,
    pub created_at: String,
    pub last_attempt_at: String,
    pub acknowledged_at: Option<String>,
}

impl From<Event> for EventResponse {
    fn from(event: Event) -> Self {
        Self {
            id: event.id.to_string(),
            command_type: event.command_type,
            command: event.command,
            device_id: event.device.into(),
            wireless_id: event.wireless_id.map(|id| id.to_string()),
            gps_time: event.gps_time.0,
            frame: STANDARD.encode(&event.frame),
            sent: event.sent,
            acknowledged: event.acknowledged,
            attempts: event.attempts,
            created_at: event.created_at.to_string(),
            last_attempt_at: event.last_attempt_at.to_string(),
            acknowledged_at: event.acknowledged_at.map(|t| t.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FailedEventResponse {
    pub device_id: String,
    pub reason: String,
    pub event: Option<EventResponse>,
}

impl From<FailedDispatch> for FailedEventResponse {
    fn from(failed: FailedDispatch) -> Self {
        Self {
            device_id: failed.device,
            reason: failed.reason,
            event: failed.event.map(EventResponse::from),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkEventResponse {
    pub successful_events: Vec<EventResponse>,
    pub failed_events: Vec<FailedEventResponse>,
}

impl From<BulkOutcome> for BulkEventResponse {
    fn from(outcome: BulkOutcome) -> Self {
        Self {
            successful_events: outcome
                .successful_events
                .into_iter()
                .map(EventResponse::from)
                .collect(),
            failed_events: outcome
                .failed_events
                .into_iter()
                .map(FailedEventResponse::from)
                .collect(),
        }
    }
}
