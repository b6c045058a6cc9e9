//! Conversions between TStorage and Unix timestamps.
//!
//! The service epoch is 2001-01-01T00:00:00Z; `cap` and `acq` key fields
//! count nanoseconds since that epoch.

use chrono::{DateTime, TimeZone, Utc};

/// Offset from the Unix epoch to the service epoch, in seconds.
pub const TDIFF_S: i64 = 978_307_200;

/// Offset from the Unix epoch to the service epoch, in nanoseconds.
pub const TDIFF_NS: i64 = 978_307_200_000_000_000;

/// Converts a TStorage second timestamp to a Unix second timestamp.
pub fn to_unix(timestamp: i64) -> i64 {
    timestamp + TDIFF_S
}

/// Converts a TStorage nanosecond timestamp to a Unix nanosecond timestamp.
pub fn to_unix_ns(timestamp: i64) -> i64 {
    timestamp + TDIFF_NS
}

/// Converts a Unix second timestamp to a TStorage second timestamp.
pub fn from_unix(timestamp: i64) -> i64 {
    timestamp - TDIFF_S
}

/// Converts a Unix nanosecond timestamp to a TStorage nanosecond timestamp.
pub fn from_unix_ns(timestamp: i64) -> i64 {
    timestamp - TDIFF_NS
}

/// Current TStorage timestamp in seconds.
pub fn now() -> i64 {
    from_unix(Utc::now().timestamp())
}

/// Current TStorage timestamp in nanoseconds.
pub fn now_ns() -> i64 {
    // Representable as i64 nanoseconds until the year 2262.
    from_unix_ns(Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX))
}

/// Nanosecond-precise instant on the service clock.
///
/// Wraps a raw `cap`/`acq` value and converts to and from [`DateTime<Utc>`]
/// without losing the nanoseconds.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct TstorageTime(pub i64);

impl TstorageTime {
    /// Current service-clock time.
    pub fn now() -> Self {
        Self(now_ns())
    }

    pub fn from_unix_ns(timestamp: i64) -> Self {
        Self(from_unix_ns(timestamp))
    }

    pub fn to_unix_ns(self) -> i64 {
        to_unix_ns(self.0)
    }

    pub fn from_datetime(datetime: DateTime<Utc>) -> Option<Self> {
        Some(Self::from_unix_ns(datetime.timestamp_nanos_opt()?))
    }

    pub fn to_datetime(self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.to_unix_ns())
    }
}

impl From<TstorageTime> for i64 {
    fn from(time: TstorageTime) -> Self {
        time.0
    }
}
