//! Timestamp literal handling
//!
//! Every timestamp crossing a boundary (configuration, checkpoints, SQL
//! literals) uses the `YYYY-MM-DD HH:MM:SS` wall-clock format in the source
//! database's timezone. Values are carried as [`NaiveDateTime`] so the resolver
//! and the rewriter can never disagree about the zone.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Timelike, Utc};

/// Literal format used at every boundary
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a `YYYY-MM-DD HH:MM:SS` literal
///
/// A trailing `T` separator (`2024-01-01T00:00:00`) is accepted as well since
/// hand-written TOML tends to contain it.
///
/// # Errors
///
/// Returns a description of the problem when the text is not a timestamp.
pub fn parse_timestamp(text: &str) -> Result<NaiveDateTime, String> {
    let trimmed = text.trim();
    NaiveDateTime::parse_from_str(trimmed, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| format!("'{trimmed}' is not a 'YYYY-MM-DD HH:MM:SS' timestamp: {e}"))
}

/// Format a timestamp as a literal
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Format a timestamp and check that the result round-trips
///
/// Years outside `1..=9999` format with a sign or more than four digits and
/// would produce a literal the source cannot parse.
pub fn format_checked(ts: &NaiveDateTime) -> Result<String, String> {
    let literal = format_timestamp(ts);
    match parse_timestamp(&literal) {
        Ok(parsed) if parsed == *ts && literal.len() == 19 => Ok(literal),
        _ => Err(format!("timestamp '{literal}' cannot be expressed as a SQL literal")),
    }
}

/// Current wall-clock time in the source timezone, truncated to whole seconds
pub fn source_now(offset: FixedOffset) -> NaiveDateTime {
    to_source_time(Utc::now(), offset)
}

/// Convert an instant to the source's wall-clock, truncated to whole seconds
pub fn to_source_time(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDateTime {
    let local = instant.with_timezone(&offset).naive_local();
    local.with_nanosecond(0).unwrap_or(local)
}

/// Parse a fixed UTC offset such as `+09:00`, `-05:30` or `Z`
pub fn parse_utc_offset(text: &str) -> Result<FixedOffset, String> {
    let trimmed = text.trim();
    let (sign, rest) = if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc")
    {
        (1, "00:00")
    } else if let Some(rest) = trimmed.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = trimmed.strip_prefix('-') {
        (-1, rest)
    } else {
        return Err(format!("offset '{trimmed}' must start with '+' or '-'"));
    };

    let (hours, minutes) = rest
        .split_once(':')
        .ok_or_else(|| format!("offset '{trimmed}' must look like +HH:MM"))?;
    let hours: i32 = hours
        .parse()
        .map_err(|_| format!("offset '{trimmed}' has invalid hours"))?;
    let minutes: i32 = minutes
        .parse()
        .map_err(|_| format!("offset '{trimmed}' has invalid minutes"))?;
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return Err(format!("offset '{trimmed}' is out of range"));
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| format!("offset '{trimmed}' is out of range"))
}
