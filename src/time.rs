//! Conversions to the `i64` nanosecond epoch timestamps used by windowing.

use crate::error::{BlockError, Result};
use chrono::{DateTime, TimeZone, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds since the Unix epoch; negative before 1970.
///
/// Fails for instants outside roughly 1677..2262, which `i64` nanoseconds
/// cannot represent.
pub fn epoch_nanos<Tz: TimeZone>(time: &DateTime<Tz>) -> Result<i64> {
    time.timestamp_nanos_opt()
        .ok_or_else(|| BlockError::processing("time", "timestamp out of range for i64 nanoseconds"))
}

pub fn system_time_nanos(time: SystemTime) -> Result<i64> {
    let out_of_range = || BlockError::processing("time", "timestamp out of range for i64 nanoseconds");
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).map_err(|_| out_of_range()),
        Err(before) => i64::try_from(before.duration().as_nanos())
            .map(|nanos| -nanos)
            .map_err(|_| out_of_range()),
    }
}

pub fn from_epoch_nanos(nanos: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(nanos)
}
