use super::error::{DecodeError, DecodeResult};

/// Byte order of a multi-byte field.
///
/// Older telemetry fields were written big-endian, newer ones little-endian.
/// Each packet and command type carries its own order so that one type's
/// wire format can never drift because another one changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub fn u16_from(self, bytes: [u8; 2]) -> u16 {
        match self {
            ByteOrder::Little => u16::from_le_bytes(bytes),
            ByteOrder::Big => u16::from_be_bytes(bytes),
        }
    }

    pub fn u32_from(self, bytes: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        }
    }

    pub fn i64_from(self, bytes: [u8; 8]) -> i64 {
        match self {
            ByteOrder::Little => i64::from_le_bytes(bytes),
            ByteOrder::Big => i64::from_be_bytes(bytes),
        }
    }

    pub fn u16_to(self, value: u16) -> [u8; 2] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }

    pub fn u32_to(self, value: u32) -> [u8; 4] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }
}

/// Bounds-checked view over one frame.
pub(crate) struct FieldReader<'a> {
    frame: &'a [u8],
}

impl<'a> FieldReader<'a> {
    /// Fails with `Truncated` unless the frame holds at least `min_len` bytes.
    pub(crate) fn new(frame: &'a [u8], min_len: usize) -> DecodeResult<Self> {
        if frame.len() < min_len {
            return Err(DecodeError::Truncated {
                tag: frame.first().copied(),
                needed: min_len,
                available: frame.len(),
            });
        }

        Ok(Self { frame })
    }

    pub(crate) fn array<const N: usize>(&self, offset: usize) -> DecodeResult<[u8; N]> {
        self.frame
            .get(offset..offset + N)
            .and_then(|s| <[u8; N]>::try_from(s).ok())
            .ok_or(DecodeError::Truncated {
                tag: self.frame.first().copied(),
                needed: offset + N,
                available: self.frame.len(),
            })
    }

    pub(crate) fn u8(&self, offset: usize) -> DecodeResult<u8> {
        self.array::<1>(offset).map(|[b]| b)
    }

    pub(crate) fn i8(&self, offset: usize) -> DecodeResult<i8> {
        self.u8(offset).map(|b| b as i8)
    }

    pub(crate) fn tail(&self, offset: usize) -> &'a [u8] {
        self.frame.get(offset..).unwrap_or_default()
    }
}
