use serde::{Deserialize, Serialize};

use super::ack::AckKind;
use super::byte_order::{ByteOrder, FieldReader};
use super::error::{DecodeError, DecodeResult};
use crate::{BoxStr, CtaInfo, GpsTime};

// uplink frame: type(1) + fixed fields, or type(1) + string for identity packets

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketType {
    InstantPower = 0,
    CumulativeEnergy = 1,
    InfoResponse = 2,
    ModelNumber = 3,
    SerialNumber = 4,
    FwVersion = 5,
    OperationalState = 6,
    ConnectionInfo = 7,
    GridcubeFwVersion = 8,
    EventAcknowledgment = 9,
}

impl TryFrom<u8> for PacketType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketType::InstantPower),
            1 => Ok(PacketType::CumulativeEnergy),
            2 => Ok(PacketType::InfoResponse),
            3 => Ok(PacketType::ModelNumber),
            4 => Ok(PacketType::SerialNumber),
            5 => Ok(PacketType::FwVersion),
            6 => Ok(PacketType::OperationalState),
            7 => Ok(PacketType::ConnectionInfo),
            8 => Ok(PacketType::GridcubeFwVersion),
            9 => Ok(PacketType::EventAcknowledgment),
            _ => Err(DecodeError::UnsupportedType(value)),
        }
    }
}

impl PacketType {
    /// Shortest frame, tag included, that carries every field of this type.
    pub const fn min_len(self) -> usize {
        match self {
            PacketType::InstantPower | PacketType::CumulativeEnergy => 14,
            PacketType::InfoResponse => 13,
            PacketType::ModelNumber
            | PacketType::SerialNumber
            | PacketType::FwVersion
            | PacketType::GridcubeFwVersion => 1,
            PacketType::OperationalState | PacketType::ConnectionInfo => 7,
            PacketType::EventAcknowledgment => 6,
        }
    }

    /// Byte order of the multi-byte numeric fields of this type.
    ///
    /// InfoResponse and OperationalState predate the switch to little-endian
    /// and still arrive big-endian. String packets have no numeric fields.
    pub const fn byte_order(self) -> ByteOrder {
        match self {
            PacketType::InfoResponse | PacketType::OperationalState => ByteOrder::Big,
            PacketType::InstantPower
            | PacketType::CumulativeEnergy
            | PacketType::ModelNumber
            | PacketType::SerialNumber
            | PacketType::FwVersion
            | PacketType::ConnectionInfo
            | PacketType::GridcubeFwVersion
            | PacketType::EventAcknowledgment => ByteOrder::Little,
        }
    }

    /// Transport-level ack owed to the device for this packet type, if any.
    pub const fn ack_kind(self) -> Option<AckKind> {
        match self {
            PacketType::InstantPower => Some(AckKind::Power),
            PacketType::CumulativeEnergy => Some(AckKind::Energy),
            PacketType::OperationalState => Some(AckKind::State),
            _ => None,
        }
    }
}

/// A decoded uplink payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Uplink {
    /// Instantaneous power in watts.
    InstantPower {
        msg_num: u8,
        value: i64,
        gps_time: GpsTime,
    },
    /// Cumulative energy in watt-hours.
    CumulativeEnergy {
        msg_num: u8,
        value: i64,
        gps_time: GpsTime,
    },
    InfoResponse(CtaInfo),
    ModelNumber(BoxStr),
    SerialNumber(BoxStr),
    FwVersion(BoxStr),
    OperationalState {
        msg_num: u8,
        state: u8,
        gps_time: GpsTime,
    },
    ConnectionInfo {
        rssi: i8,
        snr: i8,
        link_type: u32,
    },
    GridcubeFwVersion(BoxStr),
    /// Device confirmation of a downlink command, echoing its type tag and
    /// GPS timestamp.
    EventAcknowledgment {
        event_type: u8,
        gps_time: GpsTime,
    },
}

impl Uplink {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Uplink::InstantPower { .. } => PacketType::InstantPower,
            Uplink::CumulativeEnergy { .. } => PacketType::CumulativeEnergy,
            Uplink::InfoResponse(_) => PacketType::InfoResponse,
            Uplink::ModelNumber(_) => PacketType::ModelNumber,
            Uplink::SerialNumber(_) => PacketType::SerialNumber,
            Uplink::FwVersion(_) => PacketType::FwVersion,
            Uplink::OperationalState { .. } => PacketType::OperationalState,
            Uplink::ConnectionInfo { .. } => PacketType::ConnectionInfo,
            Uplink::GridcubeFwVersion(_) => PacketType::GridcubeFwVersion,
            Uplink::EventAcknowledgment { .. } => PacketType::EventAcknowledgment,
        }
    }

    pub fn msg_num(&self) -> Option<u8> {
        match self {
            Uplink::InstantPower { msg_num, .. }
            | Uplink::CumulativeEnergy { msg_num, .. }
            | Uplink::OperationalState { msg_num, .. } => Some(*msg_num),
            _ => None,
        }
    }

    pub fn gps_time(&self) -> Option<GpsTime> {
        match self {
            Uplink::InstantPower { gps_time, .. }
            | Uplink::CumulativeEnergy { gps_time, .. }
            | Uplink::OperationalState { gps_time, .. }
            | Uplink::EventAcknowledgment { gps_time, .. } => Some(*gps_time),
            _ => None,
        }
    }
}

/// Decodes one uplink frame. Every input yields either a reading or a typed
/// error; nothing here panics.
pub fn decode(payload: &[u8]) -> DecodeResult<Uplink> {
    let Some(&tag) = payload.first() else {
        return Err(DecodeError::Truncated {
            tag: None,
            needed: 1,
            available: 0,
        });
    };

    let packet_type = PacketType::try_from(tag)?;
    let r = FieldReader::new(payload, packet_type.min_len())?;
    let order = packet_type.byte_order();

    let uplink = match packet_type {
        PacketType::InstantPower => Uplink::InstantPower {
            msg_num: r.u8(1)?,
            value: order.i64_from(r.array(2)?),
            gps_time: GpsTime(order.u32_from(r.array(10)?)),
        },
        PacketType::CumulativeEnergy => Uplink::CumulativeEnergy {
            msg_num: r.u8(1)?,
            value: order.i64_from(r.array(2)?),
            gps_time: GpsTime(order.u32_from(r.array(10)?)),
        },
        PacketType::InfoResponse => Uplink::InfoResponse(CtaInfo {
            cta_version: char::from(r.u8(1)?),
            vendor_id: order.u16_from(r.array(3)?),
            device_type: order.u16_from(r.array(5)?),
            device_rev: order.u16_from(r.array(7)?),
            capability_bitmap: order.u32_from(r.array(9)?),
        }),
        PacketType::ModelNumber => Uplink::ModelNumber(decode_text(r.tail(1))),
        PacketType::SerialNumber => Uplink::SerialNumber(decode_text(r.tail(1))),
        PacketType::FwVersion => Uplink::FwVersion(decode_text(r.tail(1))),
        PacketType::GridcubeFwVersion => Uplink::GridcubeFwVersion(decode_text(r.tail(1))),
        PacketType::OperationalState => Uplink::OperationalState {
            msg_num: r.u8(1)?,
            state: r.u8(2)?,
            gps_time: GpsTime(order.u32_from(r.array(3)?)),
        },
        PacketType::ConnectionInfo => Uplink::ConnectionInfo {
            rssi: r.i8(1)?,
            snr: r.i8(2)?,
            link_type: order.u32_from(r.array(3)?),
        },
        PacketType::EventAcknowledgment => Uplink::EventAcknowledgment {
            event_type: r.u8(1)?,
            gps_time: GpsTime(order.u32_from(r.array(2)?)),
        },
    };

    Ok(uplink)
}

fn decode_text(bytes: &[u8]) -> BoxStr {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
        .into()
}
