//! Global atomic counters for QAPAT observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a CLI run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, lock-free.
pub struct Metrics {
    observations_recorded: AtomicU64,
    sessions_finished: AtomicU64,
    sessions_aborted: AtomicU64,
    pipeline_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            observations_recorded: AtomicU64::new(0),
            sessions_finished: AtomicU64::new(0),
            sessions_aborted: AtomicU64::new(0),
            pipeline_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_observations(&self) {
        self.observations_recorded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "observations_recorded", "counter incremented");
    }

    pub fn inc_finished(&self) {
        self.sessions_finished.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sessions_finished", "counter incremented");
    }

    pub fn inc_aborted(&self) {
        self.sessions_aborted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sessions_aborted", "counter incremented");
    }

    pub fn inc_pipeline_failures(&self) {
        self.pipeline_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "pipeline_failures", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            observations_recorded = self.observations_recorded(),
            sessions_finished = self.sessions_finished(),
            sessions_aborted = self.sessions_aborted(),
            pipeline_failures = self.pipeline_failures(),
        );
    }

    pub fn observations_recorded(&self) -> u64 {
        self.observations_recorded.load(Ordering::Relaxed)
    }

    pub fn sessions_finished(&self) -> u64 {
        self.sessions_finished.load(Ordering::Relaxed)
    }

    pub fn sessions_aborted(&self) -> u64 {
        self.sessions_aborted.load(Ordering::Relaxed)
    }

    pub fn pipeline_failures(&self) -> u64 {
        self.pipeline_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.observations_recorded.store(0, Ordering::Relaxed);
        self.sessions_finished.store(0, Ordering::Relaxed);
        self.sessions_aborted.store(0, Ordering::Relaxed);
        self.pipeline_failures.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        assert_eq!(m.observations_recorded(), 0);
        m.inc_observations();
        m.inc_observations();
        assert_eq!(m.observations_recorded(), 2);

        m.inc_finished();
        m.inc_aborted();
        m.inc_pipeline_failures();
        assert_eq!(m.sessions_finished(), 1);
        assert_eq!(m.sessions_aborted(), 1);
        assert_eq!(m.pipeline_failures(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_observations();
        m.inc_finished();
        m.reset();
        assert_eq!(m.observations_recorded(), 0);
        assert_eq!(m.sessions_finished(), 0);
    }
}
