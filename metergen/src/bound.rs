//! Start and end of the generated time window.
//!
//! Each bound is given either as a whole number of days relative to now or
//! as an absolute `YYYY-MM-DDTHH:MM:SS` timestamp. Days step backward from now
//! for the start bound and forward for the end bound.

use std::{fmt, str::FromStr};

use chrono::{NaiveDateTime, SubsecRound, TimeDelta, Utc};

/// Format accepted for absolute bounds
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Errors produced by [`Bound`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Input was neither a day count nor a timestamp
    #[error("'{input}' is neither a number of days nor a YYYY-MM-DDTHH:MM:SS timestamp: {source}")]
    Timestamp {
        /// The rejected input
        input: String,
        /// Underlying parse failure
        #[source]
        source: chrono::ParseError,
    },
    /// Day offset moved the clock out of the representable range
    #[error("{days} days from {from} is out of range")]
    OutOfRange {
        /// The requested offset
        days: i64,
        /// The instant the offset was applied to
        from: NaiveDateTime,
    },
}

/// One end of the time window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// Whole days relative to now
    Days(i64),
    /// A fixed UTC instant
    Absolute(NaiveDateTime),
}

impl Bound {
    /// Resolve as the start of the window: days step back from `now`.
    ///
    /// # Errors
    ///
    /// Function will error if the offset leaves the representable range.
    pub fn resolve_start(&self, now: NaiveDateTime) -> Result<NaiveDateTime, Error> {
        match *self {
            Self::Days(days) => TimeDelta::try_days(days)
                .and_then(|delta| now.checked_sub_signed(delta))
                .ok_or(Error::OutOfRange { days, from: now }),
            Self::Absolute(ts) => Ok(ts),
        }
    }

    /// Resolve as the end of the window: days step forward from `now`.
    ///
    /// # Errors
    ///
    /// Function will error if the offset leaves the representable range.
    pub fn resolve_end(&self, now: NaiveDateTime) -> Result<NaiveDateTime, Error> {
        match *self {
            Self::Days(days) => TimeDelta::try_days(days)
                .and_then(|delta| now.checked_add_signed(delta))
                .ok_or(Error::OutOfRange { days, from: now }),
            Self::Absolute(ts) => Ok(ts),
        }
    }
}

impl FromStr for Bound {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if let Ok(days) = input.trim().parse::<i64>() {
            return Ok(Self::Days(days));
        }
        NaiveDateTime::parse_from_str(input, TIMESTAMP_FORMAT)
            .map(Self::Absolute)
            .map_err(|source| Error::Timestamp {
                input: input.to_string(),
                source,
            })
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Days(days) => write!(f, "{days}"),
            Self::Absolute(ts) => write!(f, "{}", ts.format(TIMESTAMP_FORMAT)),
        }
    }
}

/// Current UTC time at microsecond precision
#[must_use]
pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc().trunc_subsecs(6)
}
