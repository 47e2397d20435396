//! Human-readable duration parsing for workflow documents.
//!
//! Workflow JSON carries durations as Go-style strings (`"500ms"`, `"2s"`,
//! `"1m30s"`, `"1h"`) or as a bare number of seconds. The [`serde_opt`]
//! module plugs the parser into `#[serde(with = ...)]` for
//! `Option<Duration>` fields.

use std::fmt;
use std::time::Duration;

use serde_json::Value;

/// Error produced when a duration string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid duration '{input}': {reason}")]
pub struct DurationParseError {
    pub input: String,
    pub reason: String,
}

impl DurationParseError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Parse a duration string such as `"2s"`, `"1m30s"`, `"250ms"` or `"10"`.
///
/// A bare number is interpreted as seconds. Fractional components are
/// allowed (`"1.5s"`). Supported units: `ns`, `us`, `µs`, `ms`, `s`, `m`, `h`.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DurationParseError::new(input, "empty string"));
    }

    if let Ok(secs) = trimmed.parse::<f64>() {
        return seconds_to_duration(input, secs);
    }

    let mut total_nanos: f64 = 0.0;
    let mut rest = trimmed;

    while !rest.is_empty() {
        let num_len = rest
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        if num_len == 0 {
            return Err(DurationParseError::new(input, "expected a number"));
        }
        let number: f64 = rest[..num_len]
            .parse()
            .map_err(|_| DurationParseError::new(input, "malformed number"))?;
        rest = &rest[num_len..];

        let unit_len = rest
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit() || *c == '.')
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60.0 * 1_000_000_000.0,
            "h" => 3_600.0 * 1_000_000_000.0,
            "" => return Err(DurationParseError::new(input, "missing unit")),
            other => {
                return Err(DurationParseError::new(
                    input,
                    format!("unknown unit '{other}'"),
                ));
            }
        };
        total_nanos += number * scale;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(DurationParseError::new(input, "duration overflows"));
    }
    Ok(Duration::from_nanos(total_nanos as u64))
}

/// Parse a duration from a JSON value: either a string or a number of seconds.
pub fn duration_from_value(value: &Value) -> Result<Duration, DurationParseError> {
    match value {
        Value::String(s) => parse_duration(s),
        Value::Number(n) => {
            let secs = n
                .as_f64()
                .ok_or_else(|| DurationParseError::new(&n.to_string(), "not a number"))?;
            seconds_to_duration(&n.to_string(), secs)
        }
        other => Err(DurationParseError::new(
            &other.to_string(),
            "expected a string or a number",
        )),
    }
}

fn seconds_to_duration(input: &str, secs: f64) -> Result<Duration, DurationParseError> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(DurationParseError::new(input, "must be a non-negative number"));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| DurationParseError::new(input, e.to_string()))
}

/// Format a duration in the same syntax [`parse_duration`] accepts.
///
/// The output is exact down to the nanosecond: `1h2m3s`, `250ms`,
/// `1s500us`, `1500ns`.
pub fn format_duration(duration: Duration) -> String {
    FormattedDuration(duration).to_string()
}

struct FormattedDuration(Duration);

impl fmt::Display for FormattedDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.0;
        if d.is_zero() {
            return write!(f, "0s");
        }
        let secs = d.as_secs();
        let nanos = d.subsec_nanos();
        let parts = [
            (secs / 3600, "h"),
            ((secs % 3600) / 60, "m"),
            (secs % 60, "s"),
            (u64::from(nanos / 1_000_000), "ms"),
            (u64::from(nanos / 1_000 % 1_000), "us"),
            (u64::from(nanos % 1_000), "ns"),
        ];
        for (value, unit) in parts {
            if value > 0 {
                write!(f, "{value}{unit}")?;
            }
        }
        Ok(())
    }
}

/// Serde adapter for `Option<Duration>` fields written as duration strings.
pub mod serde_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.serialize_str(&super::format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<Value> = Option::deserialize(deserializer)?;
        match raw {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(value) => super::duration_from_value(&value)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
