//! GridCube wire protocol.
//!
//! Uplink packets and downlink commands share one convention: byte 0 is the
//! type tag and every other field sits at a fixed offset with a fixed width.
//! Byte order is decided per type, see [`PacketType::byte_order`] and
//! [`CommandType::timestamp_order`].

mod ack;
mod byte_order;
mod downlink;
mod duration;
mod error;
mod uplink;

pub use ack::{ACK_FRAME_LEN, ACK_FRAME_MARKER, AckFrame, AckKind};
pub use byte_order::ByteOrder;
pub use downlink::{
    AckFields, Command, CommandRequest, CommandType, NO_EFFECT_UNITS, decode_ack_fields, encode,
};
pub use duration::{MAX_DURATION_CODE, MAX_DURATION_SECS, compress_duration, expand_duration};
pub use error::{DecodeError, DecodeResult, ValidationError};
pub use uplink::{PacketType, Uplink, decode};

/// Longest downlink command frame.
pub const MAX_FRAME_SIZE: usize = 9;
