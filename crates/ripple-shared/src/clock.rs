use chrono::Utc;

/// Wall-clock time as epoch millis.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
