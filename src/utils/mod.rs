mod display;
pub use display::*;

use chrono::{DateTime, TimeZone, Utc};

/// Seconds and microseconds since the Unix epoch, as written in dump records
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub seconds: u64,
    pub microseconds: u64,
}

impl Timestamp {
    pub fn new(seconds: u64, microseconds: u64) -> Self {
        Self {
            seconds,
            microseconds,
        }
    }

    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    /// Start of the rotation bucket this timestamp falls into
    pub fn bucket(&self, interval: u64) -> u64 {
        bucket_start(self.seconds, interval)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(time: DateTime<Utc>) -> Self {
        Self {
            seconds: time.timestamp().max(0) as u64,
            microseconds: u64::from(time.timestamp_subsec_micros()),
        }
    }
}

/// Round `seconds` down to a multiple of `interval`
pub fn bucket_start(seconds: u64, interval: u64) -> u64 {
    if interval == 0 {
        return seconds;
    }
    seconds - seconds % interval
}

pub fn to_datetime(seconds: u64) -> Option<DateTime<Utc>> {
    let seconds = i64::try_from(seconds).ok()?;
    Utc.timestamp_opt(seconds, 0).single()
}

/// Final name of a dump file covering the bucket starting at `bucket`
/// E.g. 1700000040 -> "20231114221400"
pub fn bucket_file_name(bucket: u64) -> String {
    match to_datetime(bucket) {
        Some(time) => time.format("%Y%m%d%H%M%S").to_string(),
        None => bucket.to_string(),
    }
}
