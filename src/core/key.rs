// Key sequencing for wildcard key patterns.
use time::{OffsetDateTime, UtcOffset};

/// Marker replaced by a millisecond UTC timestamp (`YYYYMMDDhhmmss.mmm`).
pub const KEY_WILDCARD: char = '?';

/// Resolves the first wildcard in `pattern` against the current UTC time.
///
/// Patterns without a wildcard come back unchanged. Two resolutions within the
/// same millisecond produce the same key.
pub fn resolve_key(pattern: &str) -> String {
    resolve_key_at(pattern, OffsetDateTime::now_utc())
}

pub fn resolve_key_at(pattern: &str, now: OffsetDateTime) -> String {
    if !pattern.contains(KEY_WILDCARD) {
        return pattern.to_string();
    }
    let key = pattern.replacen(KEY_WILDCARD, &sequence_stamp(now), 1);
    tracing::debug!(pattern, key = %key, "resolved wildcard key");
    key
}

fn sequence_stamp(now: OffsetDateTime) -> String {
    let utc = now.to_offset(UtcOffset::UTC);
    format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}.{:03}",
        utc.year(),
        u8::from(utc.month()),
        utc.day(),
        utc.hour(),
        utc.minute(),
        utc.second(),
        utc.millisecond()
    )
}
