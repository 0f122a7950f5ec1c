//! Month-granularity calendar arithmetic
//!
//! Every series in this workspace is monthly. A [`Month`] is a year plus a
//! calendar month with no day-of-month semantics; its canonical key is
//! `YYYY-MM`. The upstream statistics tables label months as `YYYYMmm`
//! (e.g. `2025M07`), which [`Month::parse_px`] accepts.

use crate::{MathError, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const MIN_YEAR: i32 = 1;
const MAX_YEAR: i32 = 9999;

/// A calendar month
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    year: i32,
    month: u32,
}

impl Month {
    /// Create a month, validating the month number and year range
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(MathError::InvalidInput(format!(
                "Month must be between 1 and 12, got {}",
                month
            )));
        }
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(MathError::InvalidInput(format!(
                "Year must be between {} and {}, got {}",
                MIN_YEAR, MAX_YEAR, year
            )));
        }

        Ok(Self { year, month })
    }

    /// The month containing a date
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Parse the statistics-table month key, e.g. `2025M07`
    pub fn parse_px(key: &str) -> Result<Self> {
        let (year, month) = key
            .split_once('M')
            .ok_or_else(|| MathError::InvalidInput(format!("Not a YYYYMmm month key: {}", key)))?;
        Self::from_parts(key, year, month)
    }

    /// Parse the canonical key, e.g. `2025-07`
    pub fn parse_iso(key: &str) -> Result<Self> {
        let (year, month) = key
            .split_once('-')
            .ok_or_else(|| MathError::InvalidInput(format!("Not a YYYY-MM month key: {}", key)))?;
        Self::from_parts(key, year, month)
    }

    fn from_parts(key: &str, year: &str, month: &str) -> Result<Self> {
        let digits = |s: &str, len: usize| s.len() == len && s.bytes().all(|b| b.is_ascii_digit());
        if !digits(year, 4) || !digits(month, 2) {
            return Err(MathError::InvalidInput(format!("Malformed month key: {}", key)));
        }
        let year: i32 = year
            .parse()
            .map_err(|_| MathError::InvalidInput(format!("Malformed year in {}", key)))?;
        let month: u32 = month
            .parse()
            .map_err(|_| MathError::InvalidInput(format!("Malformed month in {}", key)))?;
        Self::new(year, month)
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Months elapsed since January of year 0
    pub fn ordinal(&self) -> i64 {
        i64::from(self.year) * 12 + i64::from(self.month) - 1
    }

    fn from_ordinal(ordinal: i64) -> Self {
        Self {
            year: ordinal.div_euclid(12) as i32,
            month: ordinal.rem_euclid(12) as u32 + 1,
        }
    }

    /// The month `n` months later (or earlier for negative `n`)
    pub fn offset(&self, n: i64) -> Self {
        Self::from_ordinal(self.ordinal() + n)
    }

    pub fn succ(&self) -> Self {
        self.offset(1)
    }

    pub fn pred(&self) -> Self {
        self.offset(-1)
    }

    /// Signed number of months from `self` to `other`
    pub fn months_until(&self, other: Month) -> i64 {
        other.ordinal() - self.ordinal()
    }

    /// First day of the month as a date
    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// The statistics-table label for this month, e.g. `2025M07`
    pub fn px_key(&self) -> String {
        format!("{:04}M{:02}", self.year, self.month)
    }

    /// Inclusive iterator from `self` to `end`
    pub fn through(self, end: Month) -> MonthRange {
        MonthRange::new(self, end)
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Month {
    type Err = MathError;

    /// Accepts `YYYY-MM`, `YYYY-MM-DD` (day ignored) and `YYYYMmm`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.contains('M') {
            return Self::parse_px(s);
        }
        if s.len() == 10 {
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|e| MathError::InvalidInput(format!("Malformed date {}: {}", s, e)))?;
            return Ok(Self::from_date(date));
        }
        Self::parse_iso(s)
    }
}

impl Serialize for Month {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Month {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Inclusive ascending range of months
#[derive(Debug, Clone)]
pub struct MonthRange {
    next: Option<Month>,
    end: Month,
}

impl MonthRange {
    pub fn new(start: Month, end: Month) -> Self {
        Self {
            next: (start <= end).then_some(start),
            end,
        }
    }
}

impl Iterator for MonthRange {
    type Item = Month;

    fn next(&mut self) -> Option<Month> {
        let current = self.next?;
        self.next = (current < self.end).then(|| current.succ());
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .next
            .map(|m| (m.months_until(self.end) + 1).max(0) as usize)
            .unwrap_or(0);
        (remaining, Some(remaining))
    }
}
