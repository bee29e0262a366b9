use chrono::{DateTime, Utc};

/// Wall-clock epoch milliseconds; the unit every persisted timestamp uses.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn from_ms(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}
