use chrono::{DateTime, NaiveDateTime, Utc};

/// Wall-clock now in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Lesson wall-clock times are interpreted as UTC.
pub fn to_ms(at: NaiveDateTime) -> i64 {
    at.and_utc().timestamp_millis()
}

pub fn from_ms(ms: i64) -> Option<NaiveDateTime> {
    DateTime::<Utc>::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
}
