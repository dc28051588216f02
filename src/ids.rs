//! Generated ids and the day/timestamp codec.
//!
//! A [`GeneratedId`] packs a millisecond epoch timestamp into its upper bits,
//! so id order is creation order and a wall-clock cutoff translates directly
//! into an id range bound.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Bits below the embedded timestamp, used for per-millisecond uniqueness.
const TIME_SHIFT: u32 = 22;

#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct GeneratedId(pub u64);

impl GeneratedId {
    pub const MIN: GeneratedId = GeneratedId(0);
    pub const MAX: GeneratedId = GeneratedId(u64::MAX);

    /// The wall-clock milliseconds embedded in this id.
    pub fn timestamp(self) -> i64 {
        (self.0 >> TIME_SHIFT) as i64
    }
}

impl fmt::Display for GeneratedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for GeneratedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GeneratedId({:016x})", self.0)
    }
}

/// Smallest id whose embedded time is >= `ts`.
pub fn timestamp_to_id(ts: i64) -> GeneratedId {
    GeneratedId((ts.max(0) as u64) << TIME_SHIFT)
}

/// Inverse of [`timestamp_to_id`]; exact for ids produced by it.
pub fn id_to_timestamp(id: GeneratedId) -> i64 {
    id.timestamp()
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// UTC midnight of the day `shift_days` away from `now_ms` (negative shifts
/// into the past).
pub fn start_of_day_shifted(now_ms: i64, shift_days: i64) -> i64 {
    let now: DateTime<Utc> = Utc
        .timestamp_millis_opt(now_ms)
        .single()
        .unwrap_or_else(Utc::now);
    let day = now.date_naive() + Duration::days(shift_days);
    Utc.with_ymd_and_hms(day.year(), day.month(), day.day(), 0, 0, 0)
        .single()
        .map(|d| d.timestamp_millis())
        .unwrap_or(now_ms)
}
