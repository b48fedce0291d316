//! Derived metrics, scores and the frozen session result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::SessionId;

/// A statistic computed from one or more channels' observations.
///
/// # Invariants
///
/// `sample_count >= 1`. Metrics without samples are reported as
/// [`InsufficientData`] instead and never reach the scoring engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedMetricValue {
    pub metric_id: String,
    pub value: f64,
    pub unit: String,
    pub sample_count: usize,
}

/// A metric that could not be computed from the session's data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsufficientData {
    pub metric_id: String,
    pub reason: String,
}

/// Bounds of the rubric band a value fell into. `None` means unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BandRange {
    pub from: Option<f64>,
    pub to: Option<f64>,
}

/// Quality score of one derived metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    pub metric_id: String,
    pub label: String,
    pub points: f64,
    /// Rank of `points` within the rubric, scaled to 0.0–1.0.
    pub normalized: f64,
    pub weight: f64,
    pub range: BandRange,
}

/// Aggregate session score. `NoData` is distinct from a zero score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AggregateScore {
    Scored { value: f64, scored_metrics: usize },
    NoData,
}

impl AggregateScore {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Scored { value, .. } => Some(*value),
            Self::NoData => None,
        }
    }
}

/// Frozen, read-only outcome of a finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub session_id: SessionId,
    pub vehicle_id: String,
    pub driver_id: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub observation_count: usize,
    pub derived_metrics: Vec<DerivedMetricValue>,
    pub insufficient_data: Vec<InsufficientData>,
    pub scores: Vec<Score>,
    pub aggregate_score: AggregateScore,
    /// SHA-256 of the result fields, see `ResultFingerprint`.
    pub result_digest: String,
}

impl SessionResult {
    pub fn derived(&self, metric_id: &str) -> Option<&DerivedMetricValue> {
        self.derived_metrics.iter().find(|d| d.metric_id == metric_id)
    }

    pub fn score(&self, metric_id: &str) -> Option<&Score> {
        self.scores.iter().find(|s| s.metric_id == metric_id)
    }

    pub fn is_insufficient(&self, metric_id: &str) -> bool {
        self.insufficient_data.iter().any(|i| i.metric_id == metric_id)
    }
}
