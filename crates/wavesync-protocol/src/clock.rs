use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock Unix milliseconds, for wire timestamps only.
///
/// Scheduling uses monotonic instants; this is what peers see in
/// `timestamp`, `server_time` and `client_time` fields.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
