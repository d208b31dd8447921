//! Shared primitive types used across the entire engine.

use crate::error::{EngineError, EngineResult};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identifier of a facility.
pub type FacilityId = String;

/// Stable identifier of a facility type (never its display label).
pub type FacilityTypeId = String;

/// Stable indicator code, e.g. "OPD_FOOTFALL".
pub type IndicatorCode = String;

/// Identifier of a raw submitted field.
pub type FieldId = String;

/// Identifier of a worker on a facility roster.
pub type WorkerId = String;

/// Identifier of a worker type, e.g. "ANM" or "MO".
pub type WorkerTypeId = String;

/// Monetary precision: every amount is rounded to 2 decimal places.
pub fn round_money(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// A reporting month. Serialized and stored as "YYYY-MM".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReportingMonth {
    year:  i32,
    month: u32,
}

impl ReportingMonth {
    /// `year` must fit the four digits of "YYYY-MM" (1..=9999).
    pub fn new(year: i32, month: u32) -> EngineResult<Self> {
        if !(1..=9999).contains(&year) {
            return Err(EngineError::InvalidMonth { value: format!("{year}-{month}") });
        }
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(|d| Self { year: d.year(), month: d.month() })
            .ok_or_else(|| EngineError::InvalidMonth { value: format!("{year}-{month}") })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// The month immediately before this one.
    pub fn previous(&self) -> EngineResult<Self> {
        if self.month == 1 {
            Self::new(self.year - 1, 12)
        } else {
            Self::new(self.year, self.month - 1)
        }
    }
}

impl fmt::Display for ReportingMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for ReportingMonth {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::InvalidMonth { value: s.to_string() };
        let (y, m) = s.trim().split_once('-').ok_or_else(invalid)?;
        if y.len() != 4 || m.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = y.parse().map_err(|_| invalid())?;
        let month: u32 = m.parse().map_err(|_| invalid())?;
        Self::new(year, month).map_err(|_| invalid())
    }
}

impl Serialize for ReportingMonth {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReportingMonth {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
