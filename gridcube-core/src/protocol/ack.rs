use serde::{Deserialize, Serialize};

use super::byte_order::FieldReader;
use super::error::{DecodeError, DecodeResult};

/// First byte of a transport-level ack frame. Sits outside the command tag
/// range so firmware can tell acks from commands.
pub const ACK_FRAME_MARKER: u8 = 0xA0;

pub const ACK_FRAME_LEN: usize = 3;

/// Which sequenced uplink an ack frame confirms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AckKind {
    Power = 0,
    Energy = 1,
    State = 2,
}

impl TryFrom<u8> for AckKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AckKind::Power),
            1 => Ok(AckKind::Energy),
            2 => Ok(AckKind::State),
            _ => Err(DecodeError::UnsupportedType(value)),
        }
    }
}

/// Handshake sent back for every power, energy and state uplink.
///
/// Layout: marker(1) + kind(1) + msg_num(1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckFrame {
    pub kind: AckKind,
    pub msg_num: u8,
}

impl AckFrame {
    pub fn new(kind: AckKind, msg_num: u8) -> Self {
        Self { kind, msg_num }
    }

    pub fn to_bytes(&self) -> [u8; ACK_FRAME_LEN] {
        [ACK_FRAME_MARKER, self.kind as u8, self.msg_num]
    }

    pub fn from_bytes(bytes: &[u8]) -> DecodeResult<Self> {
        let r = FieldReader::new(bytes, ACK_FRAME_LEN)?;

        let marker = r.u8(0)?;
        if marker != ACK_FRAME_MARKER {
            return Err(DecodeError::UnsupportedType(marker));
        }

        Ok(Self {
            kind: AckKind::try_from(r.u8(1)?)?,
            msg_num: r.u8(2)?,
        })
    }
}
