//! Metering samples

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// The kind of meter a sample belongs to
#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum MeterType {
    /// Instantaneous value
    #[default]
    Gauge,
    /// Change since the previous sample
    Delta,
    /// Running total
    Cumulative,
}

impl MeterType {
    /// Wire name of this meter type
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Delta => "delta",
            Self::Cumulative => "cumulative",
        }
    }

    /// Whether the running volume returns to the base volume after every
    /// emission. Only cumulative meters accumulate.
    #[must_use]
    pub fn resets(self) -> bool {
        matches!(self, Self::Gauge | Self::Delta)
    }
}

impl fmt::Display for MeterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeterType {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "gauge" => Ok(Self::Gauge),
            "delta" => Ok(Self::Delta),
            "cumulative" => Ok(Self::Cumulative),
            other => Err(format!(
                "unknown meter type '{other}', expected one of gauge, delta, cumulative"
            )),
        }
    }
}

/// A single synthetic measurement of one resource at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Unique identifier of this sample
    pub id: String,
    /// Meter name, e.g. `cpu_util`
    pub name: String,
    /// Meter type
    pub meter_type: MeterType,
    /// Measurement unit, if any
    pub unit: Option<String>,
    /// The measured value
    pub volume: f64,
    /// Owning user
    pub user_id: Option<String>,
    /// Owning project
    pub project_id: Option<String>,
    /// The resource this sample measures
    pub resource_id: String,
    /// When the measurement was taken, UTC
    pub timestamp: NaiveDateTime,
    /// Free-form resource attributes
    pub resource_metadata: BTreeMap<String, String>,
    /// Origin tag of the sample
    pub source: String,
}

/// Render `ts` as an ISO-8601 string. Microseconds are appended only when
/// non-zero, matching the common `YYYY-MM-DDTHH:MM:SS[.ffffff]` convention.
#[must_use]
pub fn isoformat(ts: &NaiveDateTime) -> String {
    if ts.nanosecond() / 1_000 == 0 {
        ts.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        ts.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}
