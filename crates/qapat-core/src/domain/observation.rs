//! Raw observations recorded during a test drive.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Monotonic instant of a reading, in milliseconds since the session started.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000))
    }

    /// Saturates at `u64::MAX` milliseconds.
    pub fn from_elapsed(elapsed: Duration) -> Self {
        Self(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Value carried by an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObservationValue {
    Numeric(f64),
    Categorical(String),
}

impl ObservationValue {
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            Self::Numeric(v) => Some(*v),
            Self::Categorical(_) => None,
        }
    }

    pub fn as_category(&self) -> Option<&str> {
        match self {
            Self::Numeric(_) => None,
            Self::Categorical(c) => Some(c),
        }
    }
}

impl From<f64> for ObservationValue {
    fn from(v: f64) -> Self {
        Self::Numeric(v)
    }
}

impl From<&str> for ObservationValue {
    fn from(v: &str) -> Self {
        Self::Categorical(v.to_string())
    }
}

impl fmt::Display for ObservationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "{}", v),
            Self::Categorical(c) => f.write_str(c),
        }
    }
}

/// A recorded, immutable reading on one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    /// Recording index within the session, strictly increasing.
    pub seq: u64,
    pub timestamp: Timestamp,
    pub channel: String,
    pub value: ObservationValue,
    /// `seq` of an earlier observation on the same channel that this one corrects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<u64>,
    /// Timestamp is earlier than the latest one already recorded.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub late: bool,
}

/// Caller-supplied reading, before the store assigns `seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationDraft {
    pub channel: String,
    pub value: ObservationValue,
    /// Defaults to the time elapsed since the session started.
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub supersedes: Option<u64>,
}

impl ObservationDraft {
    pub fn new(channel: impl Into<String>, value: impl Into<ObservationValue>) -> Self {
        Self {
            channel: channel.into(),
            value: value.into(),
            timestamp: None,
            supersedes: None,
        }
    }

    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Mark this reading as a correction of observation `seq`.
    pub fn correcting(mut self, seq: u64) -> Self {
        self.supersedes = Some(seq);
        self
    }
}
