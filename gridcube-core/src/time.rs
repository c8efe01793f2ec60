//! Conversion between UTC and the GPS epoch used by every wire timestamp.
//!
//! `to_gps` adds the leap-second correction. `from_gps` does not remove it:
//! that is how timestamps have always been rendered back to wall-clock time,
//! so stored readings stay comparable. Use `from_gps_with_leap` when the
//! exact inverse of `to_gps` is needed.

use std::fmt;

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};

/// 1980-01-06T00:00:00Z as Unix seconds.
pub const GPS_EPOCH_UNIX_SECONDS: i64 = 315_964_800;

/// GPS-UTC offset in effect since 2017-01-01.
pub const DEFAULT_LEAP_SECONDS: i64 = 18;

/// Seconds since the GPS epoch, as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GpsTime(pub u32);

impl fmt::Display for GpsTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    #[error("instant {0} is outside the GPS u32 range")]
    OutOfRange(Timestamp),
}

pub fn gps_epoch() -> Timestamp {
    Timestamp::from_second(GPS_EPOCH_UNIX_SECONDS).unwrap_or(Timestamp::UNIX_EPOCH)
}

pub fn to_gps(utc: Timestamp, leap_seconds: i64) -> Result<GpsTime, TimeError> {
    let seconds = utc.as_second() - GPS_EPOCH_UNIX_SECONDS + leap_seconds;
    u32::try_from(seconds)
        .map(GpsTime)
        .map_err(|_| TimeError::OutOfRange(utc))
}

pub fn from_gps(gps: GpsTime) -> Timestamp {
    from_gps_with_leap(gps, 0)
}

pub fn from_gps_with_leap(gps: GpsTime, leap_seconds: i64) -> Timestamp {
    let offset = SignedDuration::from_secs(i64::from(gps.0) - leap_seconds);
    // u32 seconds past 1980 always fits in jiff's range.
    gps_epoch().checked_add(offset).unwrap_or(Timestamp::MAX)
}
