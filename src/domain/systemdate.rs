//! Validated SystemDate window configuration
//!
//! The raw `[systemdate]` section is converted into [`SystemDateConfig`] once
//! per run (see [`crate::config::schema::SystemDateSection::to_domain`]) and
//! passed by reference to the range resolver. Nothing downstream re-reads the
//! raw configuration.

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unit of relative SystemDate offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelativeUnit {
    #[default]
    Days,
    Hours,
    Minutes,
}

impl RelativeUnit {
    /// `amount` units as a duration, `None` on overflow
    pub fn duration(&self, amount: i64) -> Option<TimeDelta> {
        let seconds_per_unit: i64 = match self {
            Self::Days => 86_400,
            Self::Hours => 3_600,
            Self::Minutes => 60,
        };
        amount
            .checked_mul(seconds_per_unit)
            .and_then(TimeDelta::try_seconds)
    }
}

impl fmt::Display for RelativeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Days => f.write_str("days"),
            Self::Hours => f.write_str("hours"),
            Self::Minutes => f.write_str("minutes"),
        }
    }
}

/// One end of a configured window: absolute, or relative to "now"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBound {
    /// Used verbatim
    Absolute(NaiveDateTime),
    /// Signed offset from "now" in [`SystemDateConfig::relative_unit`] units
    Relative(i64),
}

/// SystemDate window configuration, immutable for the duration of a run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SystemDateConfig {
    pub enabled: bool,
    pub start_date: Option<DateBound>,
    pub end_date: Option<DateBound>,
    pub relative_unit: RelativeUnit,
    pub start_offset: i64,
    pub end_offset: i64,
}

impl SystemDateConfig {
    /// A disabled configuration; incremental tables use the lookback window
    pub fn disabled() -> Self {
        Self::default()
    }

    /// An enabled configuration with an explicit absolute window
    pub fn window(start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        Self {
            enabled: true,
            start_date: start.map(DateBound::Absolute),
            end_date: end.map(DateBound::Absolute),
            ..Self::default()
        }
    }
}
