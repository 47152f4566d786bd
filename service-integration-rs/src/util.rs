//! Utility module for common functionality

use std::time::{Duration, Instant};

/// Async timing helper: returns the future's output and how long it took
pub async fn measure_time_async<F, T, Fut>(f: F) -> (T, Duration)
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let start = Instant::now();
    let result = f().await;
    (result, start.elapsed())
}

/// Truncate a string to a maximum number of characters, adding ellipsis if truncated
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

/// Generate a unique identifier for services and workflows
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Parse a duration from a string (e.g., "250ms", "30s", "5m", "1h")
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim().to_lowercase();

    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.trim().parse::<u64>().ok()?.checked_mul(3600).map(Duration::from_secs)
    } else {
        // Bare numbers are seconds
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
