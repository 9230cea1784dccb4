pub mod config;
pub mod discovery;
pub mod processor;

/// Current wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
