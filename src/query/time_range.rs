use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use super::error::QueryError;

pub const DEFAULT_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

/// A window bound as the caller supplied it: an epoch-ms value, or free
/// text for the timestamp parser.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeBound {
    Millis(i64),
    Text(String),
}

impl TimeBound {
    /// Query-string parameters arrive as strings; all-digit values are
    /// epoch ms, anything else goes through the text parser.
    pub fn from_param(raw: &str) -> Self {
        if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(ms) = raw.parse() {
                return TimeBound::Millis(ms);
            }
        }
        TimeBound::Text(raw.to_string())
    }
}

/// Resolve optional from/to bounds into a concrete `[from_ms, to_ms]`
/// window. Defaults: `from = now - 24h`, `to = now`. The resolver does not
/// enforce `from <= to`; an inverted window yields an empty range result
/// downstream.
pub fn resolve_range(
    from: Option<&TimeBound>,
    to: Option<&TimeBound>,
    now_ms: i64,
) -> Result<(i64, i64), QueryError> {
    let from_ms = match from {
        None => now_ms - DEFAULT_WINDOW_MS,
        Some(bound) => resolve_bound(bound, now_ms)?,
    };
    let to_ms = match to {
        None => now_ms,
        Some(bound) => resolve_bound(bound, now_ms)?,
    };
    Ok((from_ms, to_ms))
}

fn resolve_bound(bound: &TimeBound, now_ms: i64) -> Result<i64, QueryError> {
    match bound {
        TimeBound::Millis(ms) => Ok(*ms),
        TimeBound::Text(text) => {
            parse_timestamp(text, now_ms).ok_or_else(|| QueryError::InvalidRange(text.clone()))
        }
    }
}

/// Free-text timestamp resolution. Accepted forms:
/// - epoch milliseconds (`1611437004000`)
/// - relative offsets into the past: `90s`, `15m`, `6h`, `2d`, `1w`
/// - RFC 3339 (`2021-01-23T20:00:00Z`)
/// - `YYYY-MM-DD`, `YYYY-MM-DD HH:MM`, `YYYY-MM-DD HH:MM:SS` (UTC)
pub fn parse_timestamp(text: &str, now_ms: i64) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if text.chars().all(|c| c.is_ascii_digit()) {
        return text.parse().ok();
    }
    if let Some(offset_ms) = parse_relative(text) {
        return Some(now_ms - offset_ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc).timestamp_millis());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis());
    }
    None
}

fn parse_relative(text: &str) -> Option<i64> {
    let unit = text.chars().last()?;
    let value: i64 = text[..text.len() - unit.len_utf8()].parse().ok()?;
    let unit_ms = match unit {
        's' => 1_000,
        'm' => 60_000,
        'h' => 3_600_000,
        'd' => 86_400_000,
        'w' => 604_800_000,
        _ => return None,
    };
    Some(value * unit_ms)
}
