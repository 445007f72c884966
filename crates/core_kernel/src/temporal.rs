//! Calendar types for billing
//!
//! This module provides the date vocabulary the invoicing engine works in:
//! - Service periods: the half-open `[start, end)` span an invoice item pays for
//! - Day-count conventions used when prorating partial billing periods
//! - Bill cycle dates clamped to the length of each month
//! - Account timezones and an injectable clock

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;
use std::sync::Mutex;
use thiserror::Error;

/// Timezone wrapper for account-local calendars
///
/// Wraps chrono_tz::Tz with custom serialization support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timezone(pub Tz);

impl Serialize for Timezone {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.0.name())
    }
}

impl<'de> Deserialize<'de> for Timezone {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Tz::from_str(&s)
            .map(Timezone)
            .map_err(|_| serde::de::Error::custom(format!("Invalid timezone: {}", s)))
    }
}

impl Timezone {
    pub fn new(tz: Tz) -> Self {
        Self(tz)
    }

    /// Converts a UTC datetime to the local timezone
    pub fn to_local(&self, utc: DateTime<Utc>) -> DateTime<Tz> {
        utc.with_timezone(&self.0)
    }

    /// Returns the local calendar date of a UTC instant
    pub fn local_date(&self, utc: DateTime<Utc>) -> NaiveDate {
        self.to_local(utc).date_naive()
    }
}

impl Default for Timezone {
    fn default() -> Self {
        Self(chrono_tz::UTC)
    }
}

/// Errors related to temporal operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemporalError {
    #[error("Invalid period: start {start} must not be after end {end}")]
    InvalidPeriod {
        start: String,
        end: String,
    },

    #[error("Invalid bill cycle day {0}: must be between 1 and 31")]
    InvalidBillCycleDay(u32),

    #[error("Date out of range: {0}")]
    OutOfRange(String),
}

/// The span of service an invoice item pays for
///
/// `start` is inclusive and `end` exclusive. Point-in-time items (fixed
/// charges, taxes, external charges) have no end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServicePeriod {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
}

impl ServicePeriod {
    /// Creates a new service period
    pub fn new(start: NaiveDate, end: Option<NaiveDate>) -> Result<Self, TemporalError> {
        if let Some(end) = end {
            if end < start {
                return Err(TemporalError::InvalidPeriod {
                    start: start.to_string(),
                    end: end.to_string(),
                });
            }
        }
        Ok(Self { start, end })
    }

    /// Creates a bounded period
    pub fn bounded(start: NaiveDate, end: NaiveDate) -> Result<Self, TemporalError> {
        Self::new(start, Some(end))
    }

    /// Creates a point-in-time period with no end date
    pub fn starting(start: NaiveDate) -> Self {
        Self { start, end: None }
    }

    /// Creates the `[date, date]` period credit lines are booked on
    pub fn single_day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: Some(date),
        }
    }

    /// Returns true if the period is bounded and covers no day at all
    pub fn is_empty(&self) -> bool {
        self.end.map_or(false, |end| end <= self.start)
    }

    /// Returns the number of calendar days covered, if bounded
    pub fn days(&self) -> Option<i64> {
        self.end.map(|end| (end - self.start).num_days())
    }

    /// Returns true if `date` falls inside the period
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && self.end.map_or(true, |end| date < end)
    }

    /// Returns true if both periods share at least one day
    pub fn overlaps(&self, other: &ServicePeriod) -> bool {
        let self_end = self.end.unwrap_or(NaiveDate::MAX);
        let other_end = other.end.unwrap_or(NaiveDate::MAX);
        self.start < other_end && other.start < self_end
    }
}

impl std::fmt::Display for ServicePeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.end {
            Some(end) => write!(f, "[{}, {})", self.start, end),
            None => write!(f, "[{}, -)", self.start),
        }
    }
}

/// Day-count convention used for proration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DayCountConvention {
    /// Actual calendar days
    #[default]
    Actual,
    /// 30/360: every month counts as 30 days
    Thirty360,
}

impl DayCountConvention {
    /// Counts the days between `start` (inclusive) and `end` (exclusive)
    pub fn days_between(&self, start: NaiveDate, end: NaiveDate) -> i64 {
        match self {
            DayCountConvention::Actual => (end - start).num_days(),
            DayCountConvention::Thirty360 => {
                let d1 = start.day().min(30) as i64;
                let d2 = if d1 == 30 { end.day().min(30) } else { end.day() } as i64;
                360 * (end.year() - start.year()) as i64
                    + 30 * (end.month() as i64 - start.month() as i64)
                    + (d2 - d1)
            }
        }
    }
}

/// Returns the bill cycle date for a given month, clamping the bill cycle
/// day to the month's last day (BCD 31 in February lands on the 28th/29th)
pub fn bill_cycle_date(year: i32, month: u32, bill_cycle_day: u32) -> Result<NaiveDate, TemporalError> {
    if !(1..=31).contains(&bill_cycle_day) {
        return Err(TemporalError::InvalidBillCycleDay(bill_cycle_day));
    }
    let day = bill_cycle_day.min(days_in_month(year, month)?);
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| TemporalError::OutOfRange(format!("{}-{}-{}", year, month, day)))
}

/// Shifts a (year, month) pair by a signed number of months
pub fn shift_month(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let index = year * 12 + (month as i32 - 1) + delta;
    (index.div_euclid(12), (index.rem_euclid(12) + 1) as u32)
}

fn days_in_month(year: i32, month: u32) -> Result<u32, TemporalError> {
    let (next_year, next_month) = shift_month(year, month, 1);
    let first = NaiveDate::from_ymd_opt(year, month, 1);
    let next = NaiveDate::from_ymd_opt(next_year, next_month, 1);
    match (first, next) {
        (Some(first), Some(next)) => Ok((next - first).num_days() as u32),
        _ => Err(TemporalError::OutOfRange(format!("{}-{}", year, month))),
    }
}

/// Source of the current instant
///
/// The engine never calls `Utc::now()` directly so that invoice dates are
/// reproducible in tests and replays.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current instant
    fn now(&self) -> DateTime<Utc>;

    /// Returns today's date in the given timezone
    fn today(&self, tz: &Timezone) -> NaiveDate {
        tz.local_date(self.now())
    }
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and replays
#[derive(Debug)]
pub struct FixedClock {
    instant: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            instant: Mutex::new(instant),
        }
    }

    /// Creates a clock pinned to midnight UTC of the given day
    pub fn at_day(date: NaiveDate) -> Self {
        Self::new(date.and_time(chrono::NaiveTime::MIN).and_utc())
    }

    /// Moves the clock to midnight UTC of the given day
    pub fn set_day(&self, date: NaiveDate) {
        *self.lock() = date.and_time(chrono::NaiveTime::MIN).and_utc();
    }

    /// Advances the clock by whole days
    pub fn add_days(&self, days: i64) {
        let mut guard = self.lock();
        *guard += Duration::days(days);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        self.instant.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }
}
