//! Date parsing and formatting helpers.
//!
//! Connectors receive timestamps in a variety of shapes (configuration values,
//! ElasticSearch aggregations, API payloads). These helpers normalize them to
//! `DateTime<Utc>`.

use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};

/// Formats tried by [`parse_any`], most specific first.
const DATE_TIME_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Returns the Unix epoch, which is the default watermark and lower date bound.
pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Parses a date given as `YYYY-MM-DD HH:MI:SS`, dropping components from the
/// right down to a bare `YYYY`. ISO forms with `T`, fractions or `Z` are accepted as well.
///
/// # Example
/// ```
/// use connector_kit::tools::time::parse_any;
///
/// assert_eq!(parse_any("2021-03").unwrap().to_rfc3339(), "2021-03-01T00:00:00+00:00");
/// assert!(parse_any("yesterday").is_err());
/// ```
pub fn parse_any(input: &str) -> anyhow::Result<DateTime<Utc>> {
    let input = input.trim();

    for format in DATE_TIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(Utc.from_utc_datetime(&parsed));
        }
    }

    if let Ok(date) = DateTime::parse_from_rfc3339(input) {
        return Ok(date.with_timezone(&Utc));
    }

    // chrono refuses date times without minutes, so the shortened forms are assembled by hand.
    let parsed = if let Some((day, hour)) = input.split_once(' ') {
        NaiveDate::parse_from_str(day, "%Y-%m-%d")
            .ok()
            .zip(parse_number(hour))
            .and_then(|(day, hour)| day.and_hms_opt(hour as u32, 0, 0))
    } else if let Ok(day) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        day.and_hms_opt(0, 0, 0)
    } else if let Some((year, month)) = input.split_once('-') {
        parse_number(year)
            .zip(parse_number(month))
            .and_then(|(year, month)| NaiveDate::from_ymd_opt(year, month as u32, 1))
            .and_then(|day| day.and_hms_opt(0, 0, 0))
    } else {
        parse_number(input)
            .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1))
            .and_then(|day| day.and_hms_opt(0, 0, 0))
    };

    parsed
        .map(|parsed| Utc.from_utc_datetime(&parsed))
        .with_context(|| format!("Cannot parse date: '{}'", input))
}

fn parse_number(input: &str) -> Option<i32> {
    if input.is_empty() || !input.chars().all(|c| c.is_ascii_digit()) {
        None
    } else {
        input.parse().ok()
    }
}

/// Formats a timestamp as `YYYY-MM-DD HH:MI:SS`.
pub fn to_ymd_hms(date: &DateTime<Utc>) -> String {
    date.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Formats a timestamp as `YYYY-MM-DDTHH:MI:SS.uuuuuu+00:00`, the shape ElasticSearch documents use.
pub fn to_es_date(date: &DateTime<Utc>) -> String {
    format!(
        "{}.{:06}+00:00",
        date.format("%Y-%m-%dT%H:%M:%S"),
        date.nanosecond() / 1_000 % 1_000_000
    )
}

/// Parses a timestamp as emitted by ElasticSearch (`2021-01-02T03:04:05.678Z`,
/// optionally with a `+00:00` suffix). Fractions beyond milliseconds are dropped.
pub fn parse_es(input: &str) -> anyhow::Result<DateTime<Utc>> {
    let cleaned = input.trim().replace('Z', "");
    let without_offset = cleaned.split('+').next().unwrap_or_default();

    let normalized = match without_offset.split_once('.') {
        Some((seconds, fraction)) => {
            let millis: String = fraction.chars().take(3).collect();
            format!("{}.{:0<3}", seconds, millis)
        }
        None => format!("{}.000", without_offset),
    };

    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.3f")
        .map(|parsed| Utc.from_utc_datetime(&parsed))
        .with_context(|| format!("Cannot parse ElasticSearch date: '{}'", input))
}

/// Returns the older of two optional dates, or the epoch if neither is given.
pub fn oldest_date(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match (a, b) {
        (Some(a), Some(b)) => a.min(b),
        (Some(date), None) | (None, Some(date)) => date,
        (None, None) => epoch(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, mi, s).unwrap()
    }

    #[test]
    fn parse_any_accepts_shortened_forms() {
        assert_eq!(parse_any("2020-05-06 07:08:09").unwrap(), utc(2020, 5, 6, 7, 8, 9));
        assert_eq!(parse_any("2020-05-06 07:08").unwrap(), utc(2020, 5, 6, 7, 8, 0));
        assert_eq!(parse_any("2020-05-06 07").unwrap(), utc(2020, 5, 6, 7, 0, 0));
        assert_eq!(parse_any("2020-05-06").unwrap(), utc(2020, 5, 6, 0, 0, 0));
        assert_eq!(parse_any("2020-05").unwrap(), utc(2020, 5, 1, 0, 0, 0));
        assert_eq!(parse_any("2020").unwrap(), utc(2020, 1, 1, 0, 0, 0));
    }

    #[test]
    fn parse_any_accepts_iso_forms() {
        assert_eq!(parse_any("2020-05-06T07:08:09Z").unwrap(), utc(2020, 5, 6, 7, 8, 9));
        assert_eq!(
            parse_any("2020-05-06T07:08:09.250").unwrap(),
            utc(2020, 5, 6, 7, 8, 9) + chrono::Duration::milliseconds(250)
        );
        assert_eq!(
            parse_any("2020-05-06T09:08:09+02:00").unwrap(),
            utc(2020, 5, 6, 7, 8, 9)
        );
    }

    #[test]
    fn parse_any_rejects_garbage() {
        assert!(parse_any("").is_err());
        assert!(parse_any("2020-13").is_err());
        assert!(parse_any("not a date").is_err());
    }

    #[test]
    fn es_dates_round_trip() {
        let date = utc(2021, 1, 2, 3, 4, 5) + chrono::Duration::microseconds(678_000);
        assert_eq!(to_es_date(&date), "2021-01-02T03:04:05.678000+00:00");
        assert_eq!(parse_es(&to_es_date(&date)).unwrap(), date);
        assert_eq!(parse_es("2021-01-02T03:04:05Z").unwrap(), utc(2021, 1, 2, 3, 4, 5));
    }

    #[test]
    fn oldest_date_prefers_older_and_defaults_to_epoch() {
        let a = utc(2020, 1, 1, 0, 0, 0);
        let b = utc(2019, 1, 1, 0, 0, 0);

        assert_eq!(oldest_date(Some(a), Some(b)), b);
        assert_eq!(oldest_date(Some(a), None), a);
        assert_eq!(oldest_date(None, Some(b)), b);
        assert_eq!(oldest_date(None, None), epoch());
        assert_eq!(to_ymd_hms(&epoch()), "1970-01-01 00:00:00");
    }
}
