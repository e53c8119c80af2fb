//! Inclusive calendar-date window for the export request.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{ReconError, Result};

/// Date format used by the export endpoint.
pub const EXPORT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Default look-back when no start date is supplied.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;

/// A validated `start <= end <= today` window, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateWindow {
    /// Validate and build a window.
    ///
    /// `today` is passed in rather than read from the clock so callers decide
    /// which calendar "today" means.
    pub fn new(start: NaiveDate, end: NaiveDate, today: NaiveDate) -> Result<Self> {
        if start > today || end > today {
            return Err(ReconError::InvalidWindow(format!(
                "dates cannot be in the future (today is {})",
                today.format(EXPORT_DATE_FORMAT)
            )));
        }
        if start > end {
            return Err(ReconError::InvalidWindow(format!(
                "start date {} is after end date {}",
                start.format(EXPORT_DATE_FORMAT),
                end.format(EXPORT_DATE_FORMAT)
            )));
        }
        Ok(Self { start, end })
    }

    /// The last [`DEFAULT_LOOKBACK_DAYS`] days ending today.
    pub fn last_week(today: NaiveDate) -> Self {
        Self {
            start: today - Duration::days(DEFAULT_LOOKBACK_DAYS),
            end: today,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn from_date(&self) -> String {
        self.start.format(EXPORT_DATE_FORMAT).to_string()
    }

    pub fn to_date(&self) -> String {
        self.end.format(EXPORT_DATE_FORMAT).to_string()
    }

    /// Number of calendar days covered, counting both ends.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.from_date(), self.to_date())
    }
}

/// Parse a `YYYY-MM-DD` string as used on the command line.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), EXPORT_DATE_FORMAT)
        .map_err(|e| ReconError::InvalidWindow(format!("'{}' is not a YYYY-MM-DD date: {}", s, e)))
}
