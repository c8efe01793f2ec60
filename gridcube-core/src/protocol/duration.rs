//! One-byte duration code used by the shed and load-up commands.
//!
//! Device firmware expands a code `c` into `2 * c * c` seconds, so the
//! encoder picks `round(sqrt(secs / 2))`. The transform is lossy and
//! non-linear: resolution is fine for short events and coarse for multi-hour
//! ones. It is monotonic, which is all callers rely on.

/// Largest duration code.
pub const MAX_DURATION_CODE: u8 = u8::MAX;

/// Longest duration a single code can express (about 36 hours).
pub const MAX_DURATION_SECS: u32 = 2 * (MAX_DURATION_CODE as u32) * (MAX_DURATION_CODE as u32);

/// Compresses a duration in seconds into the wire code, saturating at 255.
///
/// For integer inputs `sqrt(secs / 2)` never lands exactly on `.5`, so the
/// tie-breaking rule of `round` never matters.
pub fn compress_duration(secs: u32) -> u8 {
    let code = (f64::from(secs) / 2.0).sqrt().round();
    if code >= f64::from(MAX_DURATION_CODE) {
        MAX_DURATION_CODE
    } else {
        code as u8
    }
}

/// The duration the device will apply for a code.
pub fn expand_duration(code: u8) -> u32 {
    2 * u32::from(code) * u32::from(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_points() {
        assert_eq!(compress_duration(0), 0);
        assert_eq!(compress_duration(1), 1);
        assert_eq!(compress_duration(2), 1);
        assert_eq!(compress_duration(3600), 42);
        assert_eq!(compress_duration(7200), 60);
        assert_eq!(compress_duration(MAX_DURATION_SECS), 255);
        assert_eq!(compress_duration(u32::MAX), 255);
    }

    #[test]
    fn monotonic_over_full_range() {
        let mut previous = compress_duration(0);
        for secs in (1..=MAX_DURATION_SECS + 1_000).step_by(7) {
            let code = compress_duration(secs);
            assert!(code >= previous, "code dropped at {secs}s");
            previous = code;
        }
    }

    #[test]
    fn exact_codes_expand_back() {
        for code in 0..=MAX_DURATION_CODE {
            assert_eq!(compress_duration(expand_duration(code)), code);
        }
    }

    #[test]
    fn expansion_error_is_bounded() {
        // Error stays within half a code step: |2c^2 - d| <= 2c + 1/2.
        for secs in [90_u32, 900, 5_400, 43_200, 100_000] {
            let code = compress_duration(secs);
            let back = expand_duration(code);
            let step = 2 * u32::from(code) + 1;
            assert!(back.abs_diff(secs) <= step, "{secs}s -> {code} -> {back}s");
        }
    }
}
