//! Session identity, lifecycle states and the persisted session record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::observation::Observation;
use super::result::{AggregateScore, DerivedMetricValue, InsufficientData, Score, SessionResult};

/// Unique identifier of a test-drive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a session.
///
/// ```text
/// Created ──start──▶ Recording ──finish──▶ Finishing ──▶ Finished
///    │                  │   ▲                  │
///    └──abort──▶ Aborted ◀──┘   └── pipeline error ┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Recording,
    /// Transient: the pipeline is running on a snapshot.
    Finishing,
    Finished,
    Aborted,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Recording => "recording",
            Self::Finishing => "finishing",
            Self::Finished => "finished",
            Self::Aborted => "aborted",
        }
    }

    /// No transition leaves a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Aborted)
    }

    /// States from which `abort` is legal.
    pub fn is_abortable(self) -> bool {
        matches!(self, Self::Created | Self::Recording)
    }

    /// States in which `record` and `finish` are rejected as closed.
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Finishing | Self::Finished | Self::Aborted)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistable view of one session, with stable camelCase field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub vehicle_id: String,
    pub driver_id: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub state: SessionState,
    pub observations: Vec<Observation>,
    pub derived_metrics: Vec<DerivedMetricValue>,
    pub insufficient_data: Vec<InsufficientData>,
    pub scores: Vec<Score>,
    pub aggregate_score: Option<AggregateScore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_digest: Option<String>,
}

impl SessionRecord {
    /// Rebuild the frozen result of a finished session.
    pub fn result(&self) -> Option<SessionResult> {
        if self.state != SessionState::Finished {
            return None;
        }
        let aggregate_score = self.aggregate_score.clone()?;
        Some(SessionResult {
            session_id: self.session_id,
            vehicle_id: self.vehicle_id.clone(),
            driver_id: self.driver_id.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            observation_count: self.observations.len(),
            derived_metrics: self.derived_metrics.clone(),
            insufficient_data: self.insufficient_data.clone(),
            scores: self.scores.clone(),
            aggregate_score,
            result_digest: self.result_digest.clone().unwrap_or_default(),
        })
    }
}
