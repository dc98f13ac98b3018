//! Extraction window resolution
//!
//! Decides, for one table and one run, which slice of source data to extract.
//! The resolver is a pure function of its inputs: "now" is passed in, never
//! read from the clock, so every decision is reproducible in tests.

use crate::core::state::checkpoint::Checkpoint;
use crate::domain::systemdate::{DateBound, SystemDateConfig};
use crate::domain::table::TableSpec;
use crate::domain::timestamp::format_timestamp;
use crate::domain::{Result, SluiceError};
use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;
use std::fmt;

/// Default lookback when no other lower bound is available
pub const DEFAULT_LOOKBACK_MINUTES: u32 = 60;

/// Where the lower bound of a window came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOrigin {
    /// `start_date` of the SystemDate configuration
    Configured,
    /// The table's stored checkpoint
    Checkpoint,
    /// `now - lookback_minutes`
    Lookback,
}

impl fmt::Display for StartOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configured => f.write_str("configured"),
            Self::Checkpoint => f.write_str("checkpoint"),
            Self::Lookback => f.write_str("lookback"),
        }
    }
}

/// Inclusive extraction window, derived each run and never persisted
///
/// `start <= end` always holds; [`ResolvedRange::new`] is the only constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub start_origin: StartOrigin,
}

impl ResolvedRange {
    /// # Errors
    ///
    /// Returns [`SluiceError::RangeResolution`] when `start > end`.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime, start_origin: StartOrigin) -> Result<Self> {
        if start > end {
            return Err(SluiceError::RangeResolution(format!(
                "start {} is after end {} ({start_origin} start)",
                format_timestamp(&start),
                format_timestamp(&end)
            )));
        }
        Ok(Self {
            start,
            end,
            start_origin,
        })
    }
}

impl fmt::Display for ResolvedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}]",
            format_timestamp(&self.start),
            format_timestamp(&self.end)
        )
    }
}

/// Run-level inputs shared by every table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunParameters {
    pub force_full_load: bool,
    pub lookback_minutes: u32,
}

impl Default for RunParameters {
    fn default() -> Self {
        Self {
            force_full_load: false,
            lookback_minutes: DEFAULT_LOOKBACK_MINUTES,
        }
    }
}

/// Resolve the extraction window of one table
///
/// Returns `None` for full loads (non-incremental table or forced full load).
/// Otherwise the window is:
/// - SystemDate disabled: `[now - lookback, now]`
/// - SystemDate enabled: start from `start_date`, else the checkpoint, else
///   the lookback; end from `end_date`, else `now`
///
/// # Errors
///
/// Returns [`SluiceError::RangeResolution`] when the window is inverted or a
/// relative offset does not fit the calendar. Inverted windows are never
/// swapped or clamped.
pub fn resolve(
    spec: &TableSpec,
    cfg: &SystemDateConfig,
    checkpoint: Option<&Checkpoint>,
    now: NaiveDateTime,
    params: RunParameters,
) -> Result<Option<ResolvedRange>> {
    if !spec.is_incremental || params.force_full_load {
        return Ok(None);
    }

    let lookback = lookback_start(now, params.lookback_minutes)?;

    if !cfg.enabled {
        return ResolvedRange::new(lookback, now, StartOrigin::Lookback).map(Some);
    }

    let (start, origin) = match (cfg.start_date, checkpoint) {
        (Some(bound), _) => (bound_value(bound, cfg, now, "start_date")?, StartOrigin::Configured),
        (None, Some(cp)) => (cp.last_run_time, StartOrigin::Checkpoint),
        (None, None) => (lookback, StartOrigin::Lookback),
    };

    let end = match cfg.end_date {
        Some(bound) => bound_value(bound, cfg, now, "end_date")?,
        None => now,
    };

    ResolvedRange::new(start, end, origin).map(Some)
}

fn lookback_start(now: NaiveDateTime, minutes: u32) -> Result<NaiveDateTime> {
    TimeDelta::try_minutes(i64::from(minutes))
        .and_then(|delta| now.checked_sub_signed(delta))
        .ok_or_else(|| {
            SluiceError::RangeResolution(format!(
                "lookback of {minutes} minutes from {} is out of range",
                format_timestamp(&now)
            ))
        })
}

fn bound_value(
    bound: DateBound,
    cfg: &SystemDateConfig,
    now: NaiveDateTime,
    field: &str,
) -> Result<NaiveDateTime> {
    match bound {
        DateBound::Absolute(ts) => Ok(ts),
        DateBound::Relative(offset) => cfg
            .relative_unit
            .duration(offset)
            .and_then(|delta| now.checked_add_signed(delta))
            .ok_or_else(|| {
                SluiceError::RangeResolution(format!(
                    "{field} offset {offset} {} from {} is out of range",
                    cfg.relative_unit,
                    format_timestamp(&now)
                ))
            }),
    }
}
