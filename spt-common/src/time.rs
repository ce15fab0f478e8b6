//! Timestamp utilities

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

/// Compact stamp used in archive and work-file names (`20240315_093000`)
pub const FILE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp as RFC 3339 / ISO-8601 with a `Z` suffix
pub fn to_iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Format a timestamp for use inside a file name
pub fn file_stamp(ts: DateTime<Utc>) -> String {
    ts.format(FILE_STAMP_FORMAT).to_string()
}

/// Parse a file-name stamp produced by [`file_stamp`]
pub fn parse_file_stamp(stamp: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(stamp, FILE_STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parse an ISO-8601 timestamp.
///
/// Accepts RFC 3339 (`Z` or numeric offset) and naive date-times, which are
/// taken to be UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Parse a calendar date as found in CRM exports.
///
/// Plain dates (`2024-03-15`) and any timestamp accepted by
/// [`parse_timestamp`] are supported.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(value).map(|ts| ts.date_naive()))
}
