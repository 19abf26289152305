// Normalize module - converts vendor-native units, severities and timestamps
//
// Pure functions only. Each adapter picks the divisor that matches the unit
// of the specific field it reads; there is no global conversion constant.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::model::{Capacity, Severity};

/// Converts bytes to kilobytes
pub fn bytes_to_kb(bytes: f64) -> f64 {
    bytes / 1024.0
}

/// Converts 512-byte blocks to kilobytes (1 block == 0.5 KB)
pub fn blocks_to_kb(blocks: f64) -> f64 {
    blocks / 2.0
}

/// Converts megabytes to kilobytes
pub fn mb_to_kb(megabytes: f64) -> f64 {
    megabytes * 1024.0
}

/// Builds a capacity block from used/available space and the space that is
/// not part of any pool. `free` is reported as-is.
///
/// # Derived values
/// - configured = used + available
/// - total = configured + unconfigured
pub fn capacity_from_usage(used: f64, available: f64, free: f64, unconfigured: f64) -> Capacity {
    let configured = used + available;
    Capacity {
        total: configured + unconfigured,
        used,
        free,
        available,
        configured,
        unconfigured: unconfigured.max(0.0),
    }
}

/// Builds a capacity block for systems that report a raw total next to
/// used/available. Whatever the total holds beyond used + available
/// (reserves, virtual hot spare) counts as unconfigured.
pub fn capacity_from_total(total: f64, used: f64, available: f64) -> Capacity {
    let unconfigured = (total - used - available).max(0.0);
    capacity_from_usage(used, available, available, unconfigured)
}

/// Builds a capacity block from raw media size, unbound media size and pool
/// free space, as reported by block arrays without a capacity summary.
pub fn capacity_from_raw(total: f64, unconfigured: f64, free: f64) -> Capacity {
    let configured = (total - unconfigured).max(0.0);
    let available = free.clamp(0.0, configured);
    let used = configured - available;
    capacity_from_usage(used, available, free, unconfigured)
}

/// Maps a syslog-style ordinal (0 = emergency .. 7 = debug, 8 = ok)
pub fn severity_from_ordinal(level: u64) -> Severity {
    match level {
        0 => Severity::Emergency,
        1 => Severity::Alert,
        2 => Severity::Critical,
        3 => Severity::Error,
        4 => Severity::Warning,
        5 => Severity::Notice,
        6 => Severity::Info,
        7 => Severity::Debug,
        _ => Severity::Ok,
    }
}

/// Maps a textual severity. Unknown text maps to `Info`.
pub fn severity_from_name(name: &str) -> Severity {
    match name.trim().to_ascii_lowercase().as_str() {
        "emergency" | "emerg" => Severity::Emergency,
        "alert" => Severity::Alert,
        "critical" | "crit" | "fatal" => Severity::Critical,
        "error" | "err" | "major" => Severity::Error,
        "warning" | "warn" | "minor" => Severity::Warning,
        "notice" => Severity::Notice,
        "debug" => Severity::Debug,
        "ok" | "clear" | "cleared" => Severity::Ok,
        _ => Severity::Info,
    }
}

/// Unity health codes
pub fn unity_health_name(code: u64) -> &'static str {
    match code {
        5 => "OK",
        7 => "OK_BUT",
        10 => "DEGRADED",
        15 => "MINOR",
        20 => "MAJOR",
        25 => "CRITICAL",
        30 => "NON_RECOVERABLE",
        _ => "UNKNOWN",
    }
}

/// Formats epoch seconds as an RFC 3339 UTC timestamp
pub fn epoch_to_iso(seconds: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Parses an RFC 3339 timestamp into epoch seconds
pub fn iso_to_epoch(timestamp: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|dt| dt.timestamp())
}

/// Reads a number that may be encoded as a JSON number or a numeric string
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Numeric field of an object, 0 when absent or not numeric
pub fn field_f64(object: &Value, key: &str) -> f64 {
    object.get(key).and_then(as_f64).unwrap_or(0.0)
}

/// String field of an object; numbers are rendered, null/absent give ""
pub fn field_string(object: &Value, key: &str) -> String {
    match object.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Joins non-empty parts with a single space
pub fn join_nonempty(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const EPSILON: f64 = 1e-6;

    fn assert_invariants(c: &Capacity) {
        assert!((c.configured - (c.used + c.available)).abs() < EPSILON);
        assert!((c.total - (c.configured + c.unconfigured)).abs() < EPSILON);
    }

    #[test]
    fn test_unit_conversions() {
        assert_eq!(blocks_to_kb(2048.0), 1024.0);
        assert_eq!(bytes_to_kb(1_048_576.0), 1024.0);
        assert_eq!(mb_to_kb(2.0), 2048.0);
    }

    #[test]
    fn test_capacity_from_usage() {
        let c = capacity_from_usage(300.0, 700.0, 500.0, 1000.0);
        assert_eq!(c.configured, 1000.0);
        assert_eq!(c.total, 2000.0);
        assert_eq!(c.free, 500.0);
        assert_invariants(&c);
    }

    #[test]
    fn test_capacity_from_total_keeps_reserve_as_unconfigured() {
        let c = capacity_from_total(1000.0, 400.0, 550.0);
        assert_eq!(c.unconfigured, 50.0);
        assert_eq!(c.free, 550.0);
        assert_invariants(&c);

        // Total smaller than used + available must not produce negative values
        let c = capacity_from_total(900.0, 400.0, 550.0);
        assert_eq!(c.unconfigured, 0.0);
        assert_invariants(&c);
    }

    #[test]
    fn test_capacity_from_raw() {
        let c = capacity_from_raw(10_000.0, 2_000.0, 3_000.0);
        assert_eq!(c.configured, 8_000.0);
        assert_eq!(c.available, 3_000.0);
        assert_eq!(c.used, 5_000.0);
        assert_invariants(&c);

        let c = capacity_from_raw(1_000.0, 0.0, 5_000.0);
        assert_eq!(c.used, 0.0);
        assert_invariants(&c);
    }

    #[test]
    fn test_severity_mappings() {
        assert_eq!(severity_from_ordinal(0), Severity::Emergency);
        assert_eq!(severity_from_ordinal(4), Severity::Warning);
        assert_eq!(severity_from_ordinal(8), Severity::Ok);
        assert_eq!(severity_from_name("CRITICAL"), Severity::Critical);
        assert_eq!(severity_from_name("information"), Severity::Info);
        assert_eq!(severity_from_name("major"), Severity::Error);
        assert_eq!(severity_from_name("clear"), Severity::Ok);
        assert_eq!(severity_from_name("something-new"), Severity::Info);
    }

    #[test]
    fn test_timestamps() {
        assert_eq!(epoch_to_iso(0).as_deref(), Some("1970-01-01T00:00:00Z"));
        assert_eq!(iso_to_epoch("2024-01-15T10:30:00.000Z"), Some(1_705_314_600));
        assert_eq!(iso_to_epoch("not a date"), None);
    }

    #[test]
    fn test_json_helpers() {
        let v = json!({"a": 12, "b": "34.5", "c": null, "d": "x"});
        assert_eq!(field_f64(&v, "a"), 12.0);
        assert_eq!(field_f64(&v, "b"), 34.5);
        assert_eq!(field_f64(&v, "c"), 0.0);
        assert_eq!(field_string(&v, "a"), "12");
        assert_eq!(field_string(&v, "c"), "");
        assert_eq!(join_nonempty(&["DD9300", "", "7.2"]), "DD9300 7.2");
    }
}
