pub type DecodeResult<T> = core::result::Result<T, DecodeError>;

/// Failure to decode a single frame. Never fatal to sibling frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unsupported type tag {0:#04x}")]
    UnsupportedType(u8),
    #[error("truncated frame (tag {tag:?}): needed {needed} bytes, got {available}")]
    Truncated {
        tag: Option<u8>,
        needed: usize,
        available: usize,
    },
}

/// A downlink command parameter is out of range. Raised before encoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("duration {secs}s exceeds the maximum of {max}s")]
    DurationTooLong { secs: u32, max: u32 },
    #[error("advanced load-up units {0:#04x} not in 0x00..=0x03 or 0xFF")]
    InvalidUnits(u8),
    #[error("advanced load-up value {0:#x} exceeds 0xFFFF")]
    ValueOutOfRange(u32),
    #[error("advanced load-up value 0 requires units 0xFF, got {0:#04x}")]
    ZeroValueNeedsNoEffectUnits(u8),
    #[error("publish interval {0}s exceeds {max}s", max = u16::MAX)]
    IntervalTooLong(u32),
}
