//! Built-in derivation rules.
//!
//! Each rule is a pure function of the time-ordered channel series it is
//! given. Summation order follows the series order, so results are
//! bit-identical for identical input.

use serde::{Deserialize, Serialize};

use super::align::align_numeric;
use crate::domain::{ChannelSeries, Derivation, DerivationOutcome};

/// Derivation rules selectable from configuration (`rule.kind`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuiltinRule {
    /// Arithmetic mean of the samples.
    Mean,
    Min,
    Max,
    /// `max - min`.
    Range,
    /// Population standard deviation.
    StdDev,
    /// Nearest-rank percentile, `percentile` in 0–100.
    Percentile { percentile: f64 },
    /// Mean of the step function through the samples, weighted by how long
    /// each value was held. Suited to non-uniform sampling.
    TimeWeightedMean,
    /// Fraction of categorical samples equal to `category`.
    CategoryShare { category: String },
    /// Mean of `first / second` over aligned points, skipping zero denominators.
    AlignedRatio,
    /// Mean of `first - second` over aligned points.
    AlignedDifference,
}

impl BuiltinRule {
    /// Number of input channels the rule consumes.
    pub fn arity(&self) -> usize {
        match self {
            Self::AlignedRatio | Self::AlignedDifference => 2,
            _ => 1,
        }
    }

    /// Check rule parameters.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Percentile { percentile } if !(0.0..=100.0).contains(percentile) => Err(
                format!("percentile must be within 0..=100, got {}", percentile),
            ),
            Self::CategoryShare { category } if category.is_empty() => {
                Err("category must not be empty".to_string())
            }
            _ => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Min => "min",
            Self::Max => "max",
            Self::Range => "range",
            Self::StdDev => "std_dev",
            Self::Percentile { .. } => "percentile",
            Self::TimeWeightedMean => "time_weighted_mean",
            Self::CategoryShare { .. } => "category_share",
            Self::AlignedRatio => "aligned_ratio",
            Self::AlignedDifference => "aligned_difference",
        }
    }
}

fn insufficient(reason: impl Into<String>) -> DerivationOutcome {
    DerivationOutcome::InsufficientData(reason.into())
}

fn value(value: f64, sample_count: usize) -> DerivationOutcome {
    DerivationOutcome::Value {
        value,
        sample_count,
    }
}

fn mean(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let plain = values.iter().sum::<f64>() / n;
    if plain.is_finite() {
        return plain;
    }
    // The running sum overflowed; divide first.
    values.iter().map(|v| v / n).sum()
}

fn numeric(series: &ChannelSeries<'_>, f: impl Fn(&[f64]) -> f64) -> DerivationOutcome {
    let values = series.numeric_values();
    if values.is_empty() {
        return insufficient(format!("no numeric samples on {}", series.channel));
    }
    value(f(&values), values.len())
}

fn min_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

fn max_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn std_dev(values: &[f64]) -> f64 {
    let plain = population_std_dev(values);
    if plain.is_finite() {
        return plain;
    }
    let scale = values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let scaled: Vec<f64> = values.iter().map(|v| v / scale).collect();
    scale * population_std_dev(&scaled)
}

fn population_std_dev(values: &[f64]) -> f64 {
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

fn nearest_rank(values: &[f64], percentile: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let rank = ((percentile / 100.0) * n as f64).ceil() as usize;
    sorted[rank.clamp(1, n) - 1]
}

fn time_weighted_mean(series: &ChannelSeries<'_>) -> DerivationOutcome {
    let samples: Vec<(u64, f64)> = series
        .observations
        .iter()
        .filter_map(|o| o.value.as_numeric().map(|v| (o.timestamp.as_millis(), v)))
        .collect();
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return insufficient(format!("no numeric samples on {}", series.channel));
    };
    let span = last.0.saturating_sub(first.0);
    if span == 0 {
        let values: Vec<f64> = samples.iter().map(|(_, v)| *v).collect();
        return value(mean(&values), samples.len());
    }
    let span = span as f64;
    let area: f64 = samples
        .windows(2)
        .map(|w| w[0].1 * w[1].0.saturating_sub(w[0].0) as f64)
        .sum();
    if area.is_finite() {
        return value(area / span, samples.len());
    }
    let weighted: f64 = samples
        .windows(2)
        .map(|w| w[0].1 * (w[1].0.saturating_sub(w[0].0) as f64 / span))
        .sum();
    value(weighted, samples.len())
}

fn category_share(series: &ChannelSeries<'_>, category: &str) -> DerivationOutcome {
    let categories: Vec<&str> = series
        .observations
        .iter()
        .filter_map(|o| o.value.as_category())
        .collect();
    if categories.is_empty() {
        return insufficient(format!("no categorical samples on {}", series.channel));
    }
    let hits = categories.iter().filter(|c| **c == category).count();
    value(hits as f64 / categories.len() as f64, categories.len())
}

fn aligned(inputs: &[ChannelSeries<'_>], ratio: bool) -> DerivationOutcome {
    let combined: Vec<f64> = align_numeric(inputs)
        .iter()
        .filter_map(|p| match (ratio, p.values[1]) {
            (true, d) if d == 0.0 => None,
            (true, d) => Some(p.values[0] / d),
            (false, b) => Some(p.values[0] - b),
        })
        .collect();
    if combined.is_empty() {
        return insufficient(format!(
            "no aligned samples between {} and {}",
            inputs[0].channel, inputs[1].channel
        ));
    }
    value(mean(&combined), combined.len())
}

impl Derivation for BuiltinRule {
    fn kind(&self) -> &str {
        self.name()
    }

    fn derive(&self, inputs: &[ChannelSeries<'_>]) -> Result<DerivationOutcome, String> {
        if inputs.len() != self.arity() {
            return Err(format!(
                "{} expects {} channel(s), got {}",
                self.name(),
                self.arity(),
                inputs.len()
            ));
        }
        self.validate()?;
        let series = &inputs[0];
        Ok(match self {
            Self::Mean => numeric(series, mean),
            Self::Min => numeric(series, min_of),
            Self::Max => numeric(series, max_of),
            Self::Range => numeric(series, |v| max_of(v) - min_of(v)),
            Self::StdDev => numeric(series, std_dev),
            Self::Percentile { percentile } => numeric(series, |v| nearest_rank(v, *percentile)),
            Self::TimeWeightedMean => time_weighted_mean(series),
            Self::CategoryShare { category } => category_share(series, category),
            Self::AlignedRatio => aligned(inputs, true),
            Self::AlignedDifference => aligned(inputs, false),
        })
    }
}
