use chrono::{DateTime, SecondsFormat, Utc};
use rand::RngCore;

/// Generate a new task id: 16 random bytes, hex-encoded (32 chars).
pub fn new_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(32);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Current UTC time as an RFC 3339 string with millisecond precision.
///
/// The fixed precision keeps the strings lexicographically ordered, which
/// the entity query layer relies on when sorting by timestamp properties.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current UTC time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse an RFC 3339 string to milliseconds since the Unix epoch.
pub fn rfc3339_to_millis(ts: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}

/// Render milliseconds since the Unix epoch as an RFC 3339 string.
pub fn millis_to_rfc3339(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Add a millisecond offset to an RFC 3339 timestamp.
///
/// Returns `None` if the input does not parse.
pub fn rfc3339_add_millis(ts: &str, ms: i64) -> Option<String> {
    rfc3339_to_millis(ts).map(|base| millis_to_rfc3339(base + ms))
}
