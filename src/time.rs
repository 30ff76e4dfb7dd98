//! Datetime parsing for requests and conversion to coordinate units.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::Error;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Accepts `YYYY`, `YYYY-MM`, `YYYY-MM-DD`, `YYYY-MM-DD[T ]HH:MM[:SS[.f]]`
/// with an optional `Z` or offset, and `now`. Naive values are UTC.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, Error> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("now") {
        return Ok(Utc::now());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    let naive = s.trim_end_matches('Z');
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Ok(dt.and_utc());
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(naive, "%Y-%m-%d") {
        return Ok(midnight(d));
    }
    if let Some(d) = parse_year_month(naive) {
        return Ok(midnight(d));
    }
    if naive.len() == 4 {
        if let Some(d) = naive
            .parse::<i32>()
            .ok()
            .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1))
        {
            return Ok(midnight(d));
        }
    }
    Err(Error::WrongDatetimeFormat(format!(
        "'{s}' (expected YYYY, YYYY-MM, YYYY-MM-DD, YYYY-MM-DDTHH:MM:SS with an optional timezone, or 'now')"
    )))
}

fn parse_year_month(s: &str) -> Option<NaiveDate> {
    let (y, m) = s.split_once('-')?;
    if y.len() != 4 || m.len() != 2 {
        return None;
    }
    NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, 1)
}

fn midnight(d: NaiveDate) -> DateTime<Utc> {
    d.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc()
}

/// `<unit> since <reference>` as found in CF `units` attributes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TimeUnits {
    seconds_per_unit: f64,
    reference: DateTime<Utc>,
}

impl TimeUnits {
    pub(crate) fn parse(units: &str) -> Option<Self> {
        let (unit, reference) = units.split_once(" since ")?;
        let seconds_per_unit = match unit.trim().to_lowercase().as_str() {
            "milliseconds" | "millisecond" | "ms" => 0.001,
            "seconds" | "second" | "s" | "sec" => 1.0,
            "minutes" | "minute" | "min" => 60.0,
            "hours" | "hour" | "h" => 3600.0,
            "days" | "day" | "d" => 86400.0,
            _ => return None,
        };
        let reference = parse_datetime(reference.trim()).ok()?;
        Some(Self {
            seconds_per_unit,
            reference,
        })
    }

    pub(crate) fn to_value(&self, dt: DateTime<Utc>) -> f64 {
        let delta = dt - self.reference;
        let millis = delta.num_milliseconds() as f64;
        millis / 1000.0 / self.seconds_per_unit
    }

    pub(crate) fn to_datetime(&self, value: f64) -> DateTime<Utc> {
        let millis = (value * self.seconds_per_unit * 1000.0).round() as i64;
        self.reference + Duration::milliseconds(millis)
    }
}

/// Calendar period containing `dt`, as `[start, next start)`.
pub(crate) fn period_bounds(
    dt: DateTime<Utc>,
    granularity: Granularity,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = match granularity {
        Granularity::Year => Utc.with_ymd_and_hms(dt.year(), 1, 1, 0, 0, 0),
        Granularity::Month => Utc.with_ymd_and_hms(dt.year(), dt.month(), 1, 0, 0, 0),
        Granularity::Day => Utc.with_ymd_and_hms(dt.year(), dt.month(), dt.day(), 0, 0, 0),
    }
    .single()
    .unwrap_or(dt);
    let next = match granularity {
        Granularity::Year => Utc.with_ymd_and_hms(start.year() + 1, 1, 1, 0, 0, 0).single(),
        Granularity::Month => {
            let (y, m) = if start.month() == 12 {
                (start.year() + 1, 1)
            } else {
                (start.year(), start.month() + 1)
            };
            Utc.with_ymd_and_hms(y, m, 1, 0, 0, 0).single()
        }
        Granularity::Day => Some(start + Duration::days(1)),
    }
    .unwrap_or(start + Duration::days(1));
    (start, next)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Granularity {
    Year,
    Month,
    Day,
}

impl Granularity {
    pub(crate) fn format(&self, dt: DateTime<Utc>) -> String {
        match self {
            Granularity::Year => dt.format("%Y").to_string(),
            Granularity::Month => dt.format("%Y-%m").to_string(),
            Granularity::Day => dt.format("%Y-%m-%d").to_string(),
        }
    }
}
