//! Domain models for QAPAT.
//!
//! Canonical definitions for the core entities:
//! - `Observation`: a timestamped raw reading on one channel
//! - `MetricDefinition`: required channels, derivation strategy and rubric
//! - `DerivedMetricValue` / `Score`: per-metric results of a finished session
//! - `SessionRecord`: the persisted view of a session

pub mod digest;
pub mod error;
pub mod metric;
pub mod observation;
pub mod result;
pub mod session;

// Re-export main types and errors
pub use error::{DataError, PipelineError, QapatError, Result, StateError, ValidationError};
pub use metric::{
    BandMatch, ChannelSeries, Derivation, DerivationOutcome, MetricDefinition, Rubric, RubricBand,
};
pub use observation::{Observation, ObservationDraft, ObservationValue, Timestamp};
pub use result::{
    AggregateScore, BandRange, DerivedMetricValue, InsufficientData, Score, SessionResult,
};
pub use session::{SessionId, SessionRecord, SessionState};
