use std::fmt;
use std::iter;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};

/// Leap year used to compare month/day pairs independently of their year.
pub const SENTINEL_YEAR: i32 = 2000;

/// A calendar date plus an hour of the day, written `YYYYMMDDHH` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateTimeHour {
    date: NaiveDate,
    hour: u32,
}

impl DateTimeHour {
    pub fn new(date: NaiveDate, hour: u32) -> Result<Self> {
        if hour > 23 {
            return Err(Error::InvalidParameter(format!(
                "hour must be within 0..=23, got {hour}"
            )));
        }
        Ok(Self { date, hour })
    }

    pub fn from_ymdh(year: i32, month: u32, day: u32, hour: u32) -> Result<Self> {
        let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
            Error::InvalidParameter(format!(
                "invalid date components: {year:04}-{month:02}-{day:02}"
            ))
        })?;
        Self::new(date, hour)
    }

    pub(crate) fn start_of_day(date: NaiveDate) -> Self {
        Self { date, hour: 0 }
    }

    pub(crate) fn end_of_day(date: NaiveDate) -> Self {
        Self { date, hour: 23 }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn with_hour(self, hour: u32) -> Result<Self> {
        Self::new(self.date, hour)
    }

    pub fn to_naive(&self) -> NaiveDateTime {
        // `new` rejects hours above 23, so this always has a time of day.
        self.date.and_time(NaiveTime::MIN) + chrono::Duration::hours(i64::from(self.hour))
    }
}

impl fmt::Display for DateTimeHour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}{:02}{:02}{:02}",
            self.date.year(),
            self.date.month(),
            self.date.day(),
            self.hour
        )
    }
}

impl FromStr for DateTimeHour {
    type Err = Error;

    /// Parses `YYYYMMDDHH`.
    fn from_str(s: &str) -> Result<Self> {
        let t = s.trim();
        if t.len() != 10 || !t.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidParameter(format!(
                "date must be formatted as YYYYMMDDHH, got {s}"
            )));
        }
        let year: i32 = t[0..4]
            .parse()
            .map_err(|_| Error::InvalidParameter(format!("invalid year: {s}")))?;
        let month: u32 = t[4..6]
            .parse()
            .map_err(|_| Error::InvalidParameter(format!("invalid month: {s}")))?;
        let day: u32 = t[6..8]
            .parse()
            .map_err(|_| Error::InvalidParameter(format!("invalid day: {s}")))?;
        let hour: u32 = t[8..10]
            .parse()
            .map_err(|_| Error::InvalidParameter(format!("invalid hour: {s}")))?;
        Self::from_ymdh(year, month, day, hour)
    }
}

impl<'de> Deserialize<'de> for DateTimeHour {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        let text = match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s,
            Raw::Number(n) => n.to_string(),
        };
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// The full span requested by the caller. `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: DateTimeHour,
    end: DateTimeHour,
}

impl DateRange {
    pub fn new(start: DateTimeHour, end: DateTimeHour) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidParameter(format!(
                "start date {start} is after end date {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTimeHour {
        self.start
    }

    pub fn end(&self) -> DateTimeHour {
        self.end
    }
}

/// Month/day bounds of a recurring season, pinned to [`SENTINEL_YEAR`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnualDayWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl AnnualDayWindow {
    pub fn new(start_month: u32, start_day: u32, end_month: u32, end_day: u32) -> Result<Self> {
        let pinned = |month: u32, day: u32| {
            NaiveDate::from_ymd_opt(SENTINEL_YEAR, month, day).ok_or_else(|| {
                Error::InvalidParameter(format!("invalid month/day: {month:02}{day:02}"))
            })
        };
        Ok(Self {
            start: pinned(start_month, start_day)?,
            end: pinned(end_month, end_day)?,
        })
    }

    /// Season running from the month/day of the range start to the month/day of the range end.
    pub fn from_range(range: &DateRange) -> Self {
        Self {
            start: pin(range.start.date),
            end: pin(range.end.date),
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// True when the pinned start falls after the pinned end (e.g. Nov-Feb).
    /// Such seasons are compared literally and therefore match nothing.
    pub fn is_wrapping(&self) -> bool {
        self.start > self.end
    }

    /// Clip a single-month window to this season, or `None` when they do not overlap.
    fn clip(&self, start: DateTimeHour, end: DateTimeHour) -> Option<(DateTimeHour, DateTimeHour)> {
        if self.is_wrapping() {
            return None;
        }

        let window_start = pin(start.date);
        let window_end = pin(end.date);
        if window_start > self.end || window_end < self.start {
            return None;
        }

        let year = start.date.year();
        let start = if window_start < self.start {
            DateTimeHour::start_of_day(unpin(self.start, year)?)
        } else {
            start
        };
        let end = if window_end > self.end {
            DateTimeHour::end_of_day(unpin(self.end, year)?)
        } else {
            end
        };
        Some((start, end))
    }
}

impl fmt::Display for AnnualDayWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}{:02}-{:02}{:02}",
            self.start.month(),
            self.start.day(),
            self.end.month(),
            self.end.day()
        )
    }
}

impl FromStr for AnnualDayWindow {
    type Err = Error;

    /// Parses `MMDD-MMDD`, e.g. `0601-0831`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidParameter(format!("season must be MMDD-MMDD, got {s}"));
        let (a, b) = s.trim().split_once('-').ok_or_else(invalid)?;
        let parse_mmdd = |t: &str| -> Result<(u32, u32)> {
            if t.len() != 4 || !t.bytes().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            let month = t[0..2].parse().map_err(|_| invalid())?;
            let day = t[2..4].parse().map_err(|_| invalid())?;
            Ok((month, day))
        };
        let (start_month, start_day) = parse_mmdd(a)?;
        let (end_month, end_day) = parse_mmdd(b)?;
        Self::new(start_month, start_day, end_month, end_day)
    }
}

impl<'de> Deserialize<'de> for AnnualDayWindow {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// A sub-range of the request that lies within one calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthWindow {
    pub start: DateTimeHour,
    pub end: DateTimeHour,
}

/// Split `range` into month-aligned windows.
///
/// With `filter_to_annual_window` set, only windows overlapping the season
/// spanned by the month/day of `range.start()` and `range.end()` are kept,
/// clipped to that season. The first window starts at `range.start()` and the
/// last ends at `range.end()`, hours included.
pub fn split(range: &DateRange, filter_to_annual_window: bool) -> Vec<MonthWindow> {
    let season = filter_to_annual_window.then(|| AnnualDayWindow::from_range(range));
    split_months(range, season.as_ref())
}

/// Like [`split`] with the annual filter enabled, but with an explicit season.
pub fn split_with_season(range: &DateRange, season: &AnnualDayWindow) -> Vec<MonthWindow> {
    split_months(range, Some(season))
}

fn split_months(range: &DateRange, season: Option<&AnnualDayWindow>) -> Vec<MonthWindow> {
    let last_day = range.end.date;
    let first_month = first_of_month(range.start.date);

    let mut out = Vec::new();
    for month_start in iter::successors(Some(first_month), |d| next_month(*d))
        .take_while(|d| *d <= last_day)
    {
        let month_end = last_of_month(month_start);

        // Clamping to the range keeps the caller's exact boundary hours.
        let start = DateTimeHour::start_of_day(month_start).max(range.start);
        let end = DateTimeHour::end_of_day(month_end).min(range.end);

        let (start, end) = match season {
            Some(season) => match season.clip(start, end) {
                Some(clipped) => clipped,
                None => continue,
            },
            None => (start, end),
        };

        out.push(MonthWindow { start, end });
    }

    // The outermost windows carry the caller's hours even when a season clipped them.
    if let Some(first) = out.first_mut() {
        let start = DateTimeHour { hour: range.start.hour, ..first.start };
        if start <= first.end {
            first.start = start;
        }
    }
    if let Some(last) = out.last_mut() {
        let end = DateTimeHour { hour: range.end.hour, ..last.end };
        if last.start <= end {
            last.end = end;
        }
    }
    out
}

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn last_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(days_in_month(date.year(), date.month()))
        .unwrap_or(date)
}

fn next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

fn pin(date: NaiveDate) -> NaiveDate {
    // SENTINEL_YEAR is a leap year, so every real month/day exists in it.
    NaiveDate::from_ymd_opt(SENTINEL_YEAR, date.month(), date.day()).unwrap_or(date)
}

fn unpin(pinned: NaiveDate, year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, pinned.month(), pinned.day())
}

/// Parse an upstream timestamp into a wall-clock date-time.
///
/// Accepts `YYYYMMDDHH`, epoch milliseconds (UTC), RFC 3339, and
/// `YYYY-MM-DD HH:MM:SS` (with a space or `T` separator).
pub fn parse_timestamp_like(s: &str) -> Option<NaiveDateTime> {
    let t = s.trim();
    if !t.is_empty() && t.bytes().all(|b| b.is_ascii_digit()) {
        if t.len() == 10 {
            return t.parse::<DateTimeHour>().ok().map(|d| d.to_naive());
        }
        let millis: i64 = t.parse().ok()?;
        return DateTime::<Utc>::from_timestamp_millis(millis).map(|d| d.naive_utc());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.naive_local());
    }

    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(t, fmt).ok())
}

/// Hour of day for an upstream timestamp, see [`parse_timestamp_like`].
pub fn timestamp_hour(s: &str) -> Option<u32> {
    parse_timestamp_like(s).map(|dt| dt.hour())
}
