//! Domain-level error taxonomy for QAPAT.
//!
//! Four families, each surfaced to the caller with enough context to act on:
//! - [`ValidationError`]: malformed metric configuration, fatal to startup only
//! - [`StateError`]: illegal lifecycle transition, session left untouched
//! - [`DataError`]: bad observation or unknown metric
//! - [`PipelineError`]: derivation/scoring failure, session stays `Recording`

use super::session::{SessionId, SessionState};

/// Errors raised while validating metric definitions and rubrics.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("duplicate metric id: {metric_id}")]
    DuplicateMetricId { metric_id: String },

    #[error("metric {metric_id} has an unscorable rubric: {reason}")]
    UnscorableMetric { metric_id: String, reason: String },

    #[error("invalid definition for metric {metric_id}: {reason}")]
    InvalidDefinition { metric_id: String, reason: String },

    #[error("invalid pipeline configuration: {0}")]
    InvalidPipeline(String),
}

/// Illegal lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("session {session_id} already started (state {state})")]
    AlreadyStarted {
        session_id: SessionId,
        state: SessionState,
    },

    #[error("session {session_id} is not recording (state {state})")]
    NotRecording {
        session_id: SessionId,
        state: SessionState,
    },

    #[error("session {session_id} is closed (state {state})")]
    SessionClosed {
        session_id: SessionId,
        state: SessionState,
    },

    #[error("session {session_id} cannot be aborted (state {state})")]
    NotAbortable {
        session_id: SessionId,
        state: SessionState,
    },
}

/// Recoverable data problems.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataError {
    #[error("invalid observation on channel {channel:?} in session {session_id}: {reason}")]
    InvalidObservation {
        session_id: SessionId,
        channel: String,
        reason: String,
    },

    #[error("unknown metric: {metric_id}")]
    UnknownMetric { metric_id: String },
}

/// Unexpected failures inside the derivation/scoring pipeline.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("derivation of {metric_id} failed in session {session_id}: {reason}")]
    DerivationFailed {
        session_id: SessionId,
        metric_id: String,
        reason: String,
    },

    #[error("pipeline for session {session_id} timed out after {timeout_ms}ms")]
    Timeout { session_id: SessionId, timeout_ms: u64 },

    #[error("pipeline worker for session {session_id} failed: {reason}")]
    WorkerFailed { session_id: SessionId, reason: String },
}

/// QAPAT domain errors.
#[derive(Debug, thiserror::Error)]
pub enum QapatError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl QapatError {
    /// True for errors a caller can fix and retry without restarting.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Validation(_) | Self::Config(_))
    }
}

/// Result type for QAPAT domain operations.
pub type Result<T> = std::result::Result<T, QapatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_error_display_names_session_and_state() {
        let id = SessionId::new();
        let err = StateError::SessionClosed {
            session_id: id,
            state: SessionState::Finished,
        };
        let msg = err.to_string();
        assert!(msg.contains(&id.to_string()));
        assert!(msg.contains("finished"));
    }

    #[test]
    fn test_duplicate_metric_display() {
        let err = ValidationError::DuplicateMetricId {
            metric_id: "avgSpeed".to_string(),
        };
        assert!(err.to_string().contains("avgSpeed"));
    }

    #[test]
    fn test_recoverability() {
        let err: QapatError = ValidationError::InvalidPipeline("bad".to_string()).into();
        assert!(!err.is_recoverable());

        let err: QapatError = DataError::UnknownMetric {
            metric_id: "x".to_string(),
        }
        .into();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_digest_mismatch_error() {
        let err = QapatError::DigestMismatch {
            expected: "abc123".to_string(),
            actual: "def456".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc123"));
        assert!(msg.contains("def456"));
    }
}
