//! QAPAT Core Library
//!
//! Test-drive sessions from raw observations to scored results: observation
//! store, metric registry, derivation and scoring engines, session lifecycle,
//! and report artifacts.

pub mod config;
pub mod derivation;
pub mod domain;
pub mod metrics;
pub mod obs;
pub mod persist;
pub mod registry;
pub mod reporting;
pub mod scoring;
pub mod session;
pub mod store;
pub mod telemetry;

pub use domain::{
    AggregateScore, BandMatch, BandRange, ChannelSeries, DataError, Derivation,
    DerivationOutcome, DerivedMetricValue, InsufficientData, MetricDefinition, Observation,
    ObservationDraft, ObservationValue, PipelineError, QapatError, Result, Rubric, RubricBand,
    Score, SessionId, SessionRecord, SessionResult, SessionState, StateError, Timestamp,
    ValidationError,
};

pub use config::{load_catalog, CatalogConfig, LoadedCatalog, MetricConfig};
pub use derivation::{derive, BuiltinRule, DerivationReport};
pub use registry::{InputCoverage, MetricRegistry};
pub use scoring::{aggregate, score, score_metric, ScoreReport};
pub use session::{evaluate, Evaluation, PipelineConfig, SessionManager, TestSession};
pub use store::{ObservationSnapshot, ObservationStore};

pub use persist::{load_session_record, read_session_record, write_session_record};
pub use reporting::{
    merge_session_records, render_metrics_csv, render_observations_csv,
    render_session_report_md, FsReportBuilder, MergeOptions, MergedSummary, ReportArtifacts,
    ReportBuilder,
};

pub use metrics::METRICS;
pub use obs::{
    emit_inputs_incomplete, emit_metric_insufficient, emit_observation_recorded,
    emit_session_aborted, emit_session_created, emit_session_finish_error,
    emit_session_finished, emit_session_started, SessionSpan,
};
pub use telemetry::{init_tracing, LogFormat};

/// Crate version, as published.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
