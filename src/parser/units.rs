//! Human-readable size and date helpers for portal item properties.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;
use crate::error::{FsError, Result};

const SIZE_UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

const MONTHS_DE: [&str; 12] = [
    "jan", "feb", "mär", "apr", "mai", "jun", "jul", "aug", "sep", "okt", "nov", "dez",
];

static SIZE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([0-9,.]*)\s*([a-zA-Z]*)\s*").unwrap());

static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})\.\s*([^\s\d.,]+)\.?\s+(\d{4}),\s*(\d{1,2}):(\d{2})$").unwrap()
});

/// Parses a size such as `2,5 MB` or `512 Bytes` into bytes, rounding down.
///
/// Units step by 1024. A decimal comma is accepted.
pub fn parse_size(text: &str) -> Result<u64> {
    let captures = SIZE_RE
        .captures(text)
        .ok_or_else(|| FsError::Parse(format!("unrecognised size: {:?}", text)))?;
    let number = captures[1].replace(',', ".");
    let value: f64 = number
        .parse()
        .map_err(|_| FsError::Parse(format!("unrecognised size: {:?}", text)))?;

    let exponent = SIZE_UNITS
        .iter()
        .position(|unit| *unit == &captures[2])
        .ok_or_else(|| FsError::Parse(format!("unknown size unit in {:?}", text)))?;

    Ok((value * (1u64 << (10 * exponent)) as f64) as u64)
}

/// Parses a portal timestamp like `12. Okt 2016, 14:03`.
///
/// `heute`/`today` and `gestern`/`yesterday` are replaced relative to `today`
/// before matching.
pub fn parse_date(text: &str, today: NaiveDate) -> Option<NaiveDateTime> {
    let mut text = text.trim().to_lowercase();
    for (token, days_back) in [("heute", 0), ("today", 0), ("gestern", 1), ("yesterday", 1)] {
        if text.contains(token) {
            let day = today - chrono::Duration::days(days_back);
            let absolute = format!(
                "{}. {} {}",
                day.day(),
                MONTHS_DE[day.month0() as usize],
                day.year()
            );
            text = text.replace(token, &absolute);
        }
    }

    let captures = DATE_RE.captures(&text)?;
    let day: u32 = captures[1].parse().ok()?;
    let month = month_number(&captures[2])?;
    let year: i32 = captures[3].parse().ok()?;
    let hour: u32 = captures[4].parse().ok()?;
    let minute: u32 = captures[5].parse().ok()?;

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)
}

/// Primary date first, fallback second, epoch when neither parses.
pub fn modified_time(primary: &str, fallback: Option<&str>) -> SystemTime {
    let today = Local::now().date_naive();
    parse_date(primary, today)
        .or_else(|| fallback.and_then(|text| parse_date(text, today)))
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .and_then(|local| u64::try_from(local.timestamp()).ok())
        .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap_or(UNIX_EPOCH)
}

fn month_number(token: &str) -> Option<u32> {
    let prefix: String = token.chars().take(3).collect();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mär" | "mrz" | "mar" => 3,
        "apr" => 4,
        "mai" | "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "okt" | "oct" => 10,
        "nov" => 11,
        "dez" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}
