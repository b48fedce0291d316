//! Session manager: lifecycle state machine and finish pipeline.
//!
//! A [`TestSession`] is a cheap, clonable handle onto one session. All state
//! lives behind a per-session `tokio::sync::Mutex`; state checks and
//! transitions happen while it is held, so `finish` never interleaves with an
//! in-flight `record`. Derivation and scoring run on a blocking worker over
//! an immutable snapshot without holding the lock.
//!
//! Sessions share nothing mutable with each other.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::derivation::{self, DerivationReport};
use crate::domain::digest::ResultFingerprint;
use crate::domain::{
    AggregateScore, DerivedMetricValue, InsufficientData, Observation, ObservationDraft,
    PipelineError, QapatError, Result, Score, SessionId, SessionRecord, SessionResult,
    SessionState, StateError, Timestamp,
};
use crate::metrics::METRICS;
use crate::obs::{
    emit_inputs_incomplete, emit_observation_recorded, emit_session_aborted,
    emit_session_created, emit_session_finish_error, emit_session_finished,
    emit_session_started, SessionSpan,
};
use crate::registry::MetricRegistry;
use crate::scoring;
use crate::store::{ObservationSnapshot, ObservationStore};

/// Tunables for the finish pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Upper bound on derivation + scoring. `None` waits indefinitely.
    pub finish_timeout: Option<Duration>,
}

/// Outcome of derivation + scoring over one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub derived: Vec<DerivedMetricValue>,
    pub insufficient: Vec<InsufficientData>,
    pub scores: Vec<Score>,
    pub aggregate: AggregateScore,
    /// SHA-256 of the four fields above, see [`ResultFingerprint`].
    pub digest: String,
}

/// Run derivation then scoring. Pure: same observations, same evaluation.
pub fn evaluate(
    session_id: SessionId,
    observations: &[Observation],
    registry: &MetricRegistry,
) -> Result<Evaluation> {
    let _span = SessionSpan::enter(&session_id.to_string());
    let DerivationReport {
        derived,
        insufficient,
    } = derivation::derive(session_id, observations, registry)?;
    let report = scoring::score(&derived, registry)?;

    let digest = ResultFingerprint {
        derived_metrics: &derived,
        insufficient_data: &insufficient,
        scores: &report.scores,
        aggregate_score: &report.aggregate,
    }
    .digest()?;

    Ok(Evaluation {
        derived,
        insufficient,
        scores: report.scores,
        aggregate: report.aggregate,
        digest,
    })
}

/// Creates sessions bound to one immutable metric registry.
#[derive(Debug, Clone)]
pub struct SessionManager {
    registry: Arc<MetricRegistry>,
    config: PipelineConfig,
}

impl SessionManager {
    pub fn new(registry: Arc<MetricRegistry>) -> Self {
        Self {
            registry,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Open a new session in `Created`.
    pub fn create(&self, vehicle_id: impl Into<String>, driver_id: impl Into<String>) -> TestSession {
        let id = SessionId::new();
        let vehicle_id = vehicle_id.into();
        let driver_id = driver_id.into();
        emit_session_created(&id.to_string(), &vehicle_id, &driver_id);

        TestSession {
            id,
            registry: Arc::clone(&self.registry),
            config: self.config.clone(),
            inner: Arc::new(Mutex::new(SessionInner {
                vehicle_id,
                driver_id,
                state: SessionState::Created,
                start_time: None,
                end_time: None,
                origin: None,
                store: ObservationStore::new(id, &self.registry),
                result: None,
                abort_reason: None,
            })),
        }
    }
}

#[derive(Debug)]
struct SessionInner {
    vehicle_id: String,
    driver_id: String,
    state: SessionState,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    /// Monotonic origin for default observation timestamps.
    origin: Option<Instant>,
    store: ObservationStore,
    result: Option<SessionResult>,
    abort_reason: Option<String>,
}

impl SessionInner {
    fn elapsed(&self) -> Timestamp {
        self.origin
            .map(|o| Timestamp::from_elapsed(o.elapsed()))
            .unwrap_or_default()
    }
}

/// Put a `Finishing` session back to `Recording`.
fn reopen(session_id: SessionId, inner: &mut SessionInner, cause: &dyn std::fmt::Display) {
    if inner.state != SessionState::Finishing {
        return;
    }
    inner.state = SessionState::Recording;
    inner.store.open();
    emit_session_finish_error(&session_id.to_string(), cause);
    METRICS.inc_pipeline_failures();
}

/// Armed while a `finish` call is between `Finishing` and its commit. If the
/// call is dropped in that window the session is reopened.
struct FinishRollback {
    session_id: SessionId,
    inner: Arc<Mutex<SessionInner>>,
    armed: bool,
}

impl FinishRollback {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for FinishRollback {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        const CAUSE: &str = "finish cancelled before the result was frozen";
        let session_id = self.session_id;
        if let Ok(mut inner) = self.inner.try_lock() {
            reopen(session_id, &mut inner, &CAUSE);
            return;
        }
        // Someone else holds the lock; reopen once they release it.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                handle.spawn(async move {
                    reopen(session_id, &mut *inner.lock().await, &CAUSE);
                });
            }
            Err(_) => tracing::error!(
                session_id = %session_id,
                "finish dropped outside a runtime; session left in finishing"
            ),
        }
    }
}

/// Handle onto one test-drive session.
#[derive(Debug, Clone)]
pub struct TestSession {
    id: SessionId,
    registry: Arc<MetricRegistry>,
    config: PipelineConfig,
    inner: Arc<Mutex<SessionInner>>,
}

impl TestSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// `Created → Recording`.
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Created {
            return Err(StateError::AlreadyStarted {
                session_id: self.id,
                state: inner.state,
            }
            .into());
        }
        inner.state = SessionState::Recording;
        inner.start_time = Some(Utc::now());
        inner.origin = Some(Instant::now());
        inner.store.open();
        emit_session_started(&self.id.to_string());
        Ok(())
    }

    /// Record one observation. Only valid while `Recording`.
    pub async fn record(&self, draft: ObservationDraft) -> Result<Observation> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            SessionState::Recording => {}
            SessionState::Created => {
                return Err(StateError::NotRecording {
                    session_id: self.id,
                    state: inner.state,
                }
                .into())
            }
            SessionState::Finishing | SessionState::Finished | SessionState::Aborted => {
                return Err(StateError::SessionClosed {
                    session_id: self.id,
                    state: inner.state,
                }
                .into())
            }
        }

        let default_ts = inner.elapsed();
        let recorded = inner.store.append(draft, default_ts)?.clone();
        emit_observation_recorded(
            &self.id.to_string(),
            &recorded.channel,
            recorded.seq,
            recorded.late,
        );
        METRICS.inc_observations();
        Ok(recorded)
    }

    /// Consistent copy of all observations recorded so far.
    pub async fn snapshot(&self) -> ObservationSnapshot {
        self.inner.lock().await.store.snapshot()
    }

    /// `Recording → Finished`: derive, score, and freeze the result.
    ///
    /// On pipeline failure or timeout the session returns to `Recording` and
    /// the caller may retry. The same happens when the returned future is
    /// dropped before the result is frozen.
    pub async fn finish(&self) -> Result<SessionResult> {
        let (snapshot, mut rollback) = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                SessionState::Recording => {}
                SessionState::Created => {
                    return Err(StateError::NotRecording {
                        session_id: self.id,
                        state: inner.state,
                    }
                    .into())
                }
                SessionState::Finishing | SessionState::Finished | SessionState::Aborted => {
                    return Err(StateError::SessionClosed {
                        session_id: self.id,
                        state: inner.state,
                    }
                    .into())
                }
            }
            inner.state = SessionState::Finishing;
            inner.store.seal();

            let coverage = self
                .registry
                .inputs_satisfied(inner.store.channels_present());
            for (metric_id, missing) in &coverage.incomplete {
                emit_inputs_incomplete(&self.id.to_string(), metric_id, missing);
            }
            let rollback = FinishRollback {
                session_id: self.id,
                inner: Arc::clone(&self.inner),
                armed: true,
            };
            (inner.store.snapshot(), rollback)
        };

        let outcome = self.run_pipeline(snapshot.clone()).await;

        let mut inner = self.inner.lock().await;
        rollback.disarm();
        match outcome {
            Ok(evaluation) => {
                let end_time = Utc::now();
                let result = SessionResult {
                    session_id: self.id,
                    vehicle_id: inner.vehicle_id.clone(),
                    driver_id: inner.driver_id.clone(),
                    start_time: inner.start_time,
                    end_time: Some(end_time),
                    observation_count: snapshot.len(),
                    derived_metrics: evaluation.derived,
                    insufficient_data: evaluation.insufficient,
                    scores: evaluation.scores,
                    aggregate_score: evaluation.aggregate,
                    result_digest: evaluation.digest,
                };
                inner.state = SessionState::Finished;
                inner.end_time = Some(end_time);
                inner.result = Some(result.clone());

                emit_session_finished(
                    &self.id.to_string(),
                    inner.elapsed().as_millis(),
                    result.observation_count,
                    result.derived_metrics.len(),
                    result.aggregate_score.value(),
                );
                METRICS.inc_finished();
                Ok(result)
            }
            Err(err) => {
                reopen(self.id, &mut inner, &err);
                Err(err)
            }
        }
    }

    async fn run_pipeline(&self, snapshot: ObservationSnapshot) -> Result<Evaluation> {
        let registry = Arc::clone(&self.registry);
        let session_id = self.id;
        let task =
            tokio::task::spawn_blocking(move || evaluate(session_id, &snapshot, &registry));

        let joined = match self.config.finish_timeout {
            Some(limit) => tokio::time::timeout(limit, task).await.map_err(|_| {
                QapatError::from(PipelineError::Timeout {
                    session_id,
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                })
            })?,
            None => task.await,
        };

        joined.map_err(|e| PipelineError::WorkerFailed {
            session_id,
            reason: e.to_string(),
        })?
    }

    /// Move to `Aborted` from `Created` or `Recording`. Observations are kept.
    pub async fn abort(&self, reason: impl Into<String>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.state.is_abortable() {
            return Err(StateError::NotAbortable {
                session_id: self.id,
                state: inner.state,
            }
            .into());
        }
        let reason = reason.into();
        inner.state = SessionState::Aborted;
        inner.store.seal();
        inner.end_time = Some(Utc::now());
        emit_session_aborted(&self.id.to_string(), &reason, inner.store.len());
        inner.abort_reason = Some(reason);
        METRICS.inc_aborted();
        Ok(())
    }

    /// Frozen result, available once `Finished`.
    pub async fn result(&self) -> Option<SessionResult> {
        self.inner.lock().await.result.clone()
    }

    /// Persistable view of the session in its current state.
    pub async fn to_record(&self) -> SessionRecord {
        let inner = self.inner.lock().await;
        let result = inner.result.as_ref();
        SessionRecord {
            session_id: self.id,
            vehicle_id: inner.vehicle_id.clone(),
            driver_id: inner.driver_id.clone(),
            start_time: inner.start_time,
            end_time: inner.end_time,
            state: inner.state,
            observations: inner.store.snapshot().to_vec(),
            derived_metrics: result.map(|r| r.derived_metrics.clone()).unwrap_or_default(),
            insufficient_data: result
                .map(|r| r.insufficient_data.clone())
                .unwrap_or_default(),
            scores: result.map(|r| r.scores.clone()).unwrap_or_default(),
            aggregate_score: result.map(|r| r.aggregate_score.clone()),
            abort_reason: inner.abort_reason.clone(),
            result_digest: result.map(|r| r.result_digest.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derivation::BuiltinRule;
    use crate::domain::{MetricDefinition, RubricBand};

    fn manager() -> SessionManager {
        let registry = MetricRegistry::from_definitions(vec![MetricDefinition::new(
            "avgSpeed",
            vec!["speed".to_string()],
            Arc::new(BuiltinRule::Mean),
            vec![
                RubricBand::new("Poor", None, Some(50.0)),
                RubricBand::new("Good", Some(50.0), None),
            ],
        )
        .expect("definition")])
        .expect("registry");
        SessionManager::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let session = manager().create("VIN-1", "driver-1");
        session.start().await.expect("start");
        let err = session.start().await.unwrap_err();
        assert!(matches!(
            err,
            QapatError::State(StateError::AlreadyStarted { .. })
        ));
        assert_eq!(session.state().await, SessionState::Recording);
    }

    #[tokio::test]
    async fn test_record_before_start_is_state_error() {
        let session = manager().create("VIN-1", "driver-1");
        let err = session
            .record(ObservationDraft::new("speed", 10.0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QapatError::State(StateError::NotRecording { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_timestamp_is_elapsed_since_start() {
        let session = manager().create("VIN-1", "driver-1");
        session.start().await.expect("start");
        tokio::time::advance(Duration::from_millis(1500)).await;
        let obs = session
            .record(ObservationDraft::new("speed", 10.0))
            .await
            .expect("record");
        assert_eq!(obs.timestamp, Timestamp::from_millis(1500));
    }

    #[tokio::test]
    async fn test_finish_empty_session_has_no_data() {
        let session = manager().create("VIN-1", "driver-1");
        session.start().await.expect("start");
        let result = session.finish().await.expect("finish");
        assert_eq!(result.aggregate_score, AggregateScore::NoData);
        assert!(result.derived_metrics.is_empty());
        assert!(result.is_insufficient("avgSpeed"));
        assert_eq!(session.state().await, SessionState::Finished);
    }

    #[tokio::test]
    async fn test_abort_keeps_observations() {
        let session = manager().create("VIN-1", "driver-1");
        session.start().await.expect("start");
        session
            .record(ObservationDraft::new("speed", 10.0))
            .await
            .expect("record");
        session.abort("tyre puncture").await.expect("abort");

        assert_eq!(session.state().await, SessionState::Aborted);
        assert_eq!(session.snapshot().await.len(), 1);
        assert!(session.result().await.is_none());

        let record = session.to_record().await;
        assert_eq!(record.abort_reason.as_deref(), Some("tyre puncture"));
        assert!(record.aggregate_score.is_none());

        let err = session.abort("again").await.unwrap_err();
        assert!(matches!(
            err,
            QapatError::State(StateError::NotAbortable { .. })
        ));
    }

    #[tokio::test]
    async fn test_evaluate_is_pure() {
        let m = manager();
        let observations: Vec<Observation> = [50.0, 60.0, 55.0]
            .into_iter()
            .enumerate()
            .map(|(i, v)| Observation {
                seq: i as u64,
                timestamp: Timestamp::from_secs(i as u64 * 5),
                channel: "speed".to_string(),
                value: v.into(),
                supersedes: None,
                late: false,
            })
            .collect();
        let id = SessionId::new();
        let a = evaluate(id, &observations, m.registry()).expect("a");
        let b = evaluate(id, &observations, m.registry()).expect("b");
        assert_eq!(a, b);
        assert_eq!(a.derived[0].value.to_bits(), 55.0f64.to_bits());
    }
}
