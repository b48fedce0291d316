//! Derivation engine.
//!
//! Turns an immutable observation snapshot into derived metric values:
//! - superseded observations are dropped (the correction wins)
//! - each channel's observations are ordered by `(timestamp, seq)`
//! - every registered metric whose channels are all present is derived
//! - metrics with a missing channel are reported as insufficient data
//!
//! The engine is a pure function of its inputs and never touches the clock.

pub mod align;
pub mod rules;

use std::collections::{BTreeMap, HashSet};

use crate::domain::{
    ChannelSeries, DerivationOutcome, DerivedMetricValue, InsufficientData, Observation,
    PipelineError, SessionId,
};
use crate::obs::emit_metric_insufficient;
use crate::registry::MetricRegistry;

pub use align::{align_numeric, AlignedPoint};
pub use rules::BuiltinRule;

/// Output of one derivation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivationReport {
    /// In registry order.
    pub derived: Vec<DerivedMetricValue>,
    pub insufficient: Vec<InsufficientData>,
}

/// Observations still in effect, grouped by channel and time-ordered.
fn effective_series(observations: &[Observation]) -> BTreeMap<&str, Vec<&Observation>> {
    let superseded: HashSet<u64> = observations.iter().filter_map(|o| o.supersedes).collect();

    let mut by_channel: BTreeMap<&str, Vec<&Observation>> = BTreeMap::new();
    for obs in observations.iter().filter(|o| !superseded.contains(&o.seq)) {
        by_channel.entry(obs.channel.as_str()).or_default().push(obs);
    }
    for series in by_channel.values_mut() {
        series.sort_by_key(|o| (o.timestamp, o.seq));
    }
    by_channel
}

/// Derive every registered metric from `observations`.
///
/// # Errors
///
/// `PipelineError::DerivationFailed` when a derivation reports an internal
/// failure or yields a non-finite value. Missing data is never an error.
pub fn derive(
    session_id: SessionId,
    observations: &[Observation],
    registry: &MetricRegistry,
) -> Result<DerivationReport, PipelineError> {
    let by_channel = effective_series(observations);
    let mut report = DerivationReport::default();

    for def in registry.definitions() {
        let missing: Vec<&str> = def
            .required_channels
            .iter()
            .map(String::as_str)
            .filter(|c| !by_channel.contains_key(c))
            .collect();
        if !missing.is_empty() {
            let reason = format!("no observations on {}", missing.join(", "));
            emit_metric_insufficient(&session_id.to_string(), &def.metric_id, &reason);
            report.insufficient.push(InsufficientData {
                metric_id: def.metric_id.clone(),
                reason,
            });
            continue;
        }

        let inputs: Vec<ChannelSeries<'_>> = def
            .required_channels
            .iter()
            .map(|c| ChannelSeries {
                channel: c.as_str(),
                observations: by_channel.get(c.as_str()).cloned().unwrap_or_default(),
            })
            .collect();

        let failed = |reason: String| PipelineError::DerivationFailed {
            session_id,
            metric_id: def.metric_id.clone(),
            reason,
        };

        match def.derivation.derive(&inputs).map_err(failed)? {
            DerivationOutcome::Value { value, .. } if !value.is_finite() => {
                return Err(failed(format!(
                    "{} produced a non-finite value",
                    def.derivation.kind()
                )));
            }
            DerivationOutcome::Value { sample_count: 0, .. } => {
                let reason = "derivation used no samples".to_string();
                emit_metric_insufficient(&session_id.to_string(), &def.metric_id, &reason);
                report.insufficient.push(InsufficientData {
                    metric_id: def.metric_id.clone(),
                    reason,
                });
            }
            DerivationOutcome::Value {
                value,
                sample_count,
            } => report.derived.push(DerivedMetricValue {
                metric_id: def.metric_id.clone(),
                value,
                unit: def.unit.clone(),
                sample_count,
            }),
            DerivationOutcome::InsufficientData(reason) => {
                emit_metric_insufficient(&session_id.to_string(), &def.metric_id, &reason);
                report.insufficient.push(InsufficientData {
                    metric_id: def.metric_id.clone(),
                    reason,
                });
            }
        }
    }

    Ok(report)
}
