//! Scoring engine.
//!
//! Maps each derived value onto its metric's rubric and folds the per-metric
//! scores into one aggregate:
//!
//! ```text
//! aggregate = Σ(weight_i · normalized_i) / Σ(weight_i)
//! ```
//!
//! Metrics reported as insufficient data never reach this module, so they
//! count in neither the numerator nor the denominator. With nothing to score
//! the aggregate is [`AggregateScore::NoData`], not zero.

use crate::domain::{AggregateScore, DataError, DerivedMetricValue, Score};
use crate::registry::MetricRegistry;

/// Per-metric scores plus the aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreReport {
    pub scores: Vec<Score>,
    pub aggregate: AggregateScore,
}

/// Score one derived value against its definition's rubric.
///
/// # Errors
///
/// `DataError::UnknownMetric` if the value's metric is not registered.
pub fn score_metric(
    derived: &DerivedMetricValue,
    registry: &MetricRegistry,
) -> Result<Score, DataError> {
    let def = registry.lookup(&derived.metric_id)?;
    let band = def.rubric.classify(derived.value);
    Ok(Score {
        metric_id: derived.metric_id.clone(),
        label: band.label.to_string(),
        points: band.points,
        normalized: band.normalized,
        weight: def.weight,
        range: band.range,
    })
}

/// Score every derived value and compute the aggregate.
pub fn score(
    derived: &[DerivedMetricValue],
    registry: &MetricRegistry,
) -> Result<ScoreReport, DataError> {
    let scores = derived
        .iter()
        .map(|d| score_metric(d, registry))
        .collect::<Result<Vec<_>, _>>()?;
    let aggregate = aggregate(&scores);
    Ok(ScoreReport { scores, aggregate })
}

/// Weighted mean of normalized scores.
pub fn aggregate(scores: &[Score]) -> AggregateScore {
    let mut scale = 1.0;
    if !scores.iter().map(|s| s.weight).sum::<f64>().is_finite() {
        // Weights large enough to overflow the sums; only their ratios matter.
        scale = scores.iter().fold(0.0_f64, |acc, s| acc.max(s.weight));
    }
    let total_weight: f64 = scores.iter().map(|s| s.weight / scale).sum();
    if scores.is_empty() || total_weight <= 0.0 {
        return AggregateScore::NoData;
    }
    let weighted: f64 = scores.iter().map(|s| s.weight / scale * s.normalized).sum();
    AggregateScore::Scored {
        value: weighted / total_weight,
        scored_metrics: scores.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derivation::BuiltinRule;
    use crate::domain::{MetricDefinition, RubricBand};
    use std::sync::Arc;

    fn registry() -> MetricRegistry {
        let bands = || {
            vec![
                RubricBand::new("Poor", Some(0.0), Some(50.0)),
                RubricBand::new("Fair", Some(50.0), Some(80.0)),
                RubricBand::new("Good", Some(80.0), None),
            ]
        };
        MetricRegistry::from_definitions(vec![
            MetricDefinition::new(
                "avgSpeed",
                vec!["speed".to_string()],
                Arc::new(BuiltinRule::Mean),
                bands(),
            )
            .expect("avgSpeed"),
            MetricDefinition::new(
                "comfort",
                vec!["vibration".to_string()],
                Arc::new(BuiltinRule::Mean),
                bands(),
            )
            .expect("comfort")
            .with_weight(3.0)
            .expect("weight"),
        ])
        .expect("registry")
    }

    fn derived(metric_id: &str, value: f64) -> DerivedMetricValue {
        DerivedMetricValue {
            metric_id: metric_id.to_string(),
            value,
            unit: String::new(),
            sample_count: 1,
        }
    }

    #[test]
    fn test_scenario_boundaries() {
        let registry = registry();
        let fair = score_metric(&derived("avgSpeed", 50.0), &registry).expect("score");
        assert_eq!(fair.label, "Fair");
        assert_eq!(fair.range.from, Some(50.0));
        assert_eq!(fair.range.to, Some(80.0));

        let good = score_metric(&derived("avgSpeed", 80.0), &registry).expect("score");
        assert_eq!(good.label, "Good");
        assert_eq!(good.range.to, None);
    }

    #[test]
    fn test_weighted_aggregate() {
        let registry = registry();
        // avgSpeed Good (1.0, w=1), comfort Poor (0.0, w=3) -> 0.25
        let report = score(
            &[derived("avgSpeed", 90.0), derived("comfort", 10.0)],
            &registry,
        )
        .expect("score");
        assert_eq!(
            report.aggregate,
            AggregateScore::Scored {
                value: 0.25,
                scored_metrics: 2
            }
        );
    }

    #[test]
    fn test_huge_weights_keep_aggregate_finite() {
        let mut report = score(
            &[derived("avgSpeed", 90.0), derived("comfort", 10.0)],
            &registry(),
        )
        .expect("score");
        for s in &mut report.scores {
            s.weight = f64::MAX;
        }
        assert_eq!(
            aggregate(&report.scores),
            AggregateScore::Scored {
                value: 0.5,
                scored_metrics: 2
            }
        );
    }

    #[test]
    fn test_no_scores_is_no_data() {
        let report = score(&[], &registry()).expect("score");
        assert_eq!(report.aggregate, AggregateScore::NoData);
        assert!(report.scores.is_empty());
    }

    #[test]
    fn test_unknown_metric_is_rejected() {
        let err = score(&[derived("ghost", 1.0)], &registry()).unwrap_err();
        assert!(matches!(err, DataError::UnknownMetric { .. }));
    }
}
