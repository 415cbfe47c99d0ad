//! Billing period (`YYYY-MM`) arithmetic.

use chrono::{Datelike, NaiveDate};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeriodError {
    #[error("month must be between 1 and 12, got {0}")]
    InvalidMonth(u32),
    #[error("year must be between 1 and 9999, got {0}")]
    InvalidYear(i32),
    #[error("billing period must look like YYYY-MM, got '{0}'")]
    Malformed(String),
    #[error("due day must be between 1 and 28, got {0}")]
    InvalidDueDay(u32),
}

/// A calendar month, the unit of bill generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BillingPeriod {
    year: i32,
    month: u32,
}

impl BillingPeriod {
    pub fn new(year: i32, month: u32) -> Result<Self, PeriodError> {
        if !(1..=12).contains(&month) {
            return Err(PeriodError::InvalidMonth(month));
        }
        if !(1..=9999).contains(&year) {
            return Err(PeriodError::InvalidYear(year));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        // Year and month are range-checked in `new`.
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next().first_day().pred_opt().unwrap_or(NaiveDate::MAX)
    }

    pub fn days_in_month(&self) -> u32 {
        self.last_day().day()
    }

    /// The following calendar month.
    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Payment due date: `due_day` of the following month.
    pub fn due_date(&self, due_day: u32) -> Result<NaiveDate, PeriodError> {
        if !(1..=28).contains(&due_day) {
            return Err(PeriodError::InvalidDueDay(due_day));
        }
        let next = self.next();
        NaiveDate::from_ymd_opt(next.year, next.month, due_day)
            .ok_or(PeriodError::InvalidDueDay(due_day))
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for BillingPeriod {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || PeriodError::Malformed(s.to_string());
        let (year, month) = s.split_once('-').ok_or_else(malformed)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(malformed());
        }
        let year: i32 = year.parse().map_err(|_| malformed())?;
        let month: u32 = month.parse().map_err(|_| malformed())?;
        Self::new(year, month)
    }
}
