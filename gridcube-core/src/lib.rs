pub mod protocol;
pub mod time;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;
use uuid::Uuid;

pub use protocol::{
    AckFields, AckFrame, AckKind, ByteOrder, Command, CommandRequest, CommandType, DecodeError,
    PacketType, Uplink, ValidationError, decode, decode_ack_fields, encode,
};
pub use time::{GpsTime, TimeError};

// We use `Box<str>` and `Box<[T]>` for structures that don't need to be
// dynamically sized. This helps us keep allocations compact and avoid
// accidental cloning of large values.
type BoxStr = Box<str>;
type BoxBytes = Box<[u8]>;

/// Number of digits in a public device identifier.
pub const PUBLIC_ID_DIGITS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("invalid public device id {0:?}: expected {PUBLIC_ID_DIGITS} decimal digits")]
    InvalidPublicId(String),
    #[error("invalid wireless device id {0:?}: expected a UUID")]
    InvalidWirelessId(String),
    #[error("invalid event id {0:?}: expected a UUID")]
    InvalidEventId(String),
}

/// Stable, user-facing 6-digit device identifier.
///
/// Used as the key in API responses and for time-series reading storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicDeviceId(BoxStr);

impl PublicDeviceId {
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        if is_public_form(raw) {
            Ok(Self(raw.into()))
        } else {
            Err(IdError::InvalidPublicId(raw.to_owned()))
        }
    }

    /// Public id for a numeric serial, zero-padded. Only the low six
    /// decimal digits are kept.
    pub fn from_serial(serial: u32) -> Self {
        Self(format!("{:06}", serial % 1_000_000).into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Pattern check for the 6-digit public form. No lookups involved.
pub fn is_public_form(raw: &str) -> bool {
    raw.len() == PUBLIC_ID_DIGITS && raw.bytes().all(|b| b.is_ascii_digit())
}

impl fmt::Display for PublicDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PublicDeviceId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PublicDeviceId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PublicDeviceId> for String {
    fn from(id: PublicDeviceId) -> Self {
        id.0.into_string()
    }
}

/// Transport-layer device address assigned by the wireless network provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WirelessDeviceId(pub Uuid);

impl WirelessDeviceId {
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        Uuid::try_parse(raw)
            .map(Self)
            .map_err(|_| IdError::InvalidWirelessId(raw.to_owned()))
    }
}

impl fmt::Display for WirelessDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for WirelessDeviceId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A device identifier as received from a caller, classified by shape.
///
/// Resolution never fails: a lookup miss hands back the classified input, so
/// holders must not assume the variant they asked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceAddress {
    Public(PublicDeviceId),
    Wireless(WirelessDeviceId),
    Unrecognized(BoxStr),
}

impl DeviceAddress {
    pub fn classify(raw: &str) -> Self {
        let raw = raw.trim();
        if is_public_form(raw) {
            return DeviceAddress::Public(PublicDeviceId(raw.into()));
        }

        match WirelessDeviceId::parse(raw) {
            Ok(id) => DeviceAddress::Wireless(id),
            Err(_) => DeviceAddress::Unrecognized(raw.into()),
        }
    }

    pub fn wireless(&self) -> Option<WirelessDeviceId> {
        match self {
            DeviceAddress::Wireless(id) => Some(*id),
            _ => None,
        }
    }

    pub fn public(&self) -> Option<&PublicDeviceId> {
        match self {
            DeviceAddress::Public(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceAddress::Public(id) => id.fmt(f),
            DeviceAddress::Wireless(id) => id.fmt(f),
            DeviceAddress::Unrecognized(raw) => f.write_str(raw),
        }
    }
}

impl From<PublicDeviceId> for DeviceAddress {
    fn from(id: PublicDeviceId) -> Self {
        DeviceAddress::Public(id)
    }
}

impl From<WirelessDeviceId> for DeviceAddress {
    fn from(id: WirelessDeviceId) -> Self {
        DeviceAddress::Wireless(id)
    }
}

/// Unique identifier for a decoded uplink reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadingId(pub Ulid);

/// Unique identifier for a downlink command event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for EventId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::try_parse(s)
            .map(Self)
            .map_err(|_| IdError::InvalidEventId(s.to_owned()))
    }
}

/// A decoded uplink packet together with where and when it arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Unique id for this reading.
    pub id: ReadingId,
    /// Wireless address the packet arrived from.
    pub device: WirelessDeviceId,
    /// Backend receive time.
    pub received_at: jiff::Timestamp,
    /// Decoded payload.
    pub uplink: Uplink,
}

impl Reading {
    pub fn new(device: WirelessDeviceId, uplink: Uplink) -> Self {
        Self {
            id: ReadingId(Ulid::new()),
            device,
            received_at: jiff::Timestamp::now(),
            uplink,
        }
    }

    pub fn packet_type(&self) -> PacketType {
        self.uplink.packet_type()
    }
}

/// Audit record of a downlink command sent (or attempted) to one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub command_type: CommandType,
    pub command: Command,
    /// Target as the caller named it, in public form when resolvable.
    pub device: BoxStr,
    /// Transport address used for transmission, if resolution succeeded.
    pub wireless_id: Option<WirelessDeviceId>,
    /// GPS timestamp written into the frame. Acks echo it back.
    pub gps_time: GpsTime,
    /// Encoded frame, kept so retransmissions correlate with the same ack.
    pub frame: BoxBytes,
    /// The transport accepted the frame. Not a delivery confirmation.
    pub sent: bool,
    /// A matching EventAcknowledgment uplink was received.
    pub acknowledged: bool,
    /// Number of transmissions attempted so far.
    pub attempts: u32,
    pub created_at: jiff::Timestamp,
    pub last_attempt_at: jiff::Timestamp,
    pub acknowledged_at: Option<jiff::Timestamp>,
}

/// Registration record tying a public id to its wireless address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMapping {
    pub public_id: PublicDeviceId,
    pub wireless_id: WirelessDeviceId,
    /// Provider resource name of the wireless device.
    pub wireless_arn: Option<BoxStr>,
    /// Provider resource name of the associated IoT thing.
    pub thing_arn: Option<BoxStr>,
    pub registered_at: jiff::Timestamp,
}

/// CTA-2045 identity block reported in an InfoResponse packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtaInfo {
    pub cta_version: char,
    pub vendor_id: u16,
    pub device_type: u16,
    pub device_rev: u16,
    pub capability_bitmap: u32,
}

/// Latest known device state, folded from uplinks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub model_number: Option<BoxStr>,
    pub serial_number: Option<BoxStr>,
    pub fw_version: Option<BoxStr>,
    pub gridcube_fw_version: Option<BoxStr>,
    pub cta_info: Option<CtaInfo>,
    pub operational_state: Option<u8>,
    pub rssi: Option<i8>,
    pub snr: Option<i8>,
    pub link_type: Option<u32>,
    pub last_seen: Option<jiff::Timestamp>,
}

impl DeviceInfo {
    /// Folds one decoded uplink into the device state.
    pub fn apply(&mut self, uplink: &Uplink, seen_at: jiff::Timestamp) {
        match uplink {
            Uplink::ModelNumber(s) => self.model_number = Some(s.clone()),
            Uplink::SerialNumber(s) => self.serial_number = Some(s.clone()),
            Uplink::FwVersion(s) => self.fw_version = Some(s.clone()),
            Uplink::GridcubeFwVersion(s) => self.gridcube_fw_version = Some(s.clone()),
            Uplink::InfoResponse(info) => self.cta_info = Some(*info),
            Uplink::OperationalState { state, .. } => self.operational_state = Some(*state),
            Uplink::ConnectionInfo {
                rssi,
                snr,
                link_type,
            } => {
                self.rssi = Some(*rssi);
                self.snr = Some(*snr);
                self.link_type = Some(*link_type);
            }
            Uplink::InstantPower { .. }
            | Uplink::CumulativeEnergy { .. }
            | Uplink::EventAcknowledgment { .. } => {}
        }

        if self.last_seen.is_none_or(|t| t < seen_at) {
            self.last_seen = Some(seen_at);
        }
    }
}

/// A registered device with its latest state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub mapping: DeviceMapping,
    pub info: DeviceInfo,
}
