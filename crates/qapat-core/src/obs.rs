//! Structured observability hooks for the session lifecycle.
//!
//! This module provides:
//! - Session-scoped tracing spans via the `SessionSpan` RAII guard
//! - Emission functions for key lifecycle events: create, start, record,
//!   finish, abort, pipeline errors and data-coverage warnings
//!
//! Events are emitted at `info!` level unless noted. Filter with `RUST_LOG`;
//! pass `--json` to the CLI for JSON lines.

use tracing::{info, warn};

/// RAII guard that enters a session-scoped tracing span.
///
/// # Example
///
/// ```ignore
/// let _span = SessionSpan::enter("5b0c...");
/// // tracing calls below carry session_id = "5b0c..."
/// ```
pub struct SessionSpan {
    _span: tracing::span::EnteredSpan,
}

impl SessionSpan {
    /// Create and enter a span tagged with the session id.
    pub fn enter(session_id: &str) -> Self {
        let span = tracing::info_span!("qapat.session", session_id = %session_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: session created for a vehicle/driver pair.
pub fn emit_session_created(session_id: &str, vehicle_id: &str, driver_id: &str) {
    info!(
        event = "session.created",
        session_id = %session_id,
        vehicle_id = %vehicle_id,
        driver_id = %driver_id,
    );
}

/// Emit event: session started recording.
pub fn emit_session_started(session_id: &str) {
    info!(event = "session.started", session_id = %session_id);
}

/// Emit event: one observation recorded (debug level, high volume).
pub fn emit_observation_recorded(session_id: &str, channel: &str, seq: u64, late: bool) {
    tracing::debug!(
        event = "observation.recorded",
        session_id = %session_id,
        channel = %channel,
        seq = seq,
        late = late,
    );
}

/// Emit event: session finished with its aggregate score (if any).
pub fn emit_session_finished(
    session_id: &str,
    duration_ms: u64,
    observations: usize,
    derived: usize,
    aggregate: Option<f64>,
) {
    info!(
        event = "session.finished",
        session_id = %session_id,
        duration_ms = duration_ms,
        observations = observations,
        derived_metrics = derived,
        aggregate_score = ?aggregate,
    );
}

/// Emit event: session aborted.
pub fn emit_session_aborted(session_id: &str, reason: &str, observations: usize) {
    info!(
        event = "session.aborted",
        session_id = %session_id,
        reason = %reason,
        observations = observations,
    );
}

/// Emit event: the finish pipeline failed; the session stays recording.
pub fn emit_session_finish_error(session_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "session.finish_error", session_id = %session_id, error = %error);
}

/// Emit event: a metric was excluded for lack of data.
pub fn emit_metric_insufficient(session_id: &str, metric_id: &str, reason: &str) {
    info!(
        event = "metric.insufficient_data",
        session_id = %session_id,
        metric_id = %metric_id,
        reason = %reason,
    );
}

/// Emit warning: metrics that the recorded channels cannot feed.
pub fn emit_inputs_incomplete(session_id: &str, metric_id: &str, missing: &[String]) {
    warn!(
        event = "inputs.incomplete",
        session_id = %session_id,
        metric_id = %metric_id,
        missing = ?missing,
    );
}
