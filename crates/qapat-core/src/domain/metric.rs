//! Metric definitions: required channels, derivation strategy and rubric.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::ValidationError;
use super::observation::Observation;
use super::result::BandRange;

// ---------------------------------------------------------------------------
// Derivation strategy
// ---------------------------------------------------------------------------

/// Time-ordered observations of one required channel.
#[derive(Debug, Clone)]
pub struct ChannelSeries<'a> {
    pub channel: &'a str,
    pub observations: Vec<&'a Observation>,
}

impl ChannelSeries<'_> {
    /// Numeric values in order, skipping categorical samples.
    pub fn numeric_values(&self) -> Vec<f64> {
        self.observations
            .iter()
            .filter_map(|o| o.value.as_numeric())
            .collect()
    }
}

/// What a derivation produced for one metric.
#[derive(Debug, Clone, PartialEq)]
pub enum DerivationOutcome {
    Value { value: f64, sample_count: usize },
    InsufficientData(String),
}

/// Pure derivation function: ordered channel series in, one value out.
///
/// `inputs` holds one series per required channel, in the order the
/// definition declares them. Implementations must not read the clock or any
/// other hidden state; an `Err` is treated as a pipeline failure.
pub trait Derivation: Send + Sync + fmt::Debug {
    /// Short name used in logs and reports.
    fn kind(&self) -> &str;

    fn derive(&self, inputs: &[ChannelSeries<'_>]) -> Result<DerivationOutcome, String>;
}

// ---------------------------------------------------------------------------
// Rubric
// ---------------------------------------------------------------------------

/// One rubric band as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricBand {
    pub label: String,
    /// Numeric score of the band. Defaults to the band's position.
    #[serde(default)]
    pub points: Option<f64>,
    /// Inclusive lower bound. Ignored (unbounded) on the first band.
    #[serde(default)]
    pub from: Option<f64>,
    /// Exclusive upper bound. Ignored (unbounded) on the last band.
    #[serde(default)]
    pub to: Option<f64>,
}

impl RubricBand {
    pub fn new(label: impl Into<String>, from: Option<f64>, to: Option<f64>) -> Self {
        Self {
            label: label.into(),
            points: None,
            from,
            to,
        }
    }

    pub fn with_points(mut self, points: f64) -> Self {
        self.points = Some(points);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ResolvedBand {
    label: String,
    points: f64,
}

/// Validated rubric: contiguous bands, each closed below and open above.
/// The first and last bands extend to infinity.
#[derive(Debug, Clone, PartialEq)]
pub struct Rubric {
    bands: Vec<ResolvedBand>,
    /// `boundaries[i]` separates band `i` from band `i + 1`.
    boundaries: Vec<f64>,
    /// Distinct band points, ascending.
    ranked_points: Vec<f64>,
}

/// Band a value was classified into.
#[derive(Debug, Clone, PartialEq)]
pub struct BandMatch<'a> {
    pub index: usize,
    pub label: &'a str,
    pub points: f64,
    pub normalized: f64,
    pub range: BandRange,
}

impl Rubric {
    /// Validate configured bands.
    ///
    /// # Errors
    ///
    /// `ValidationError::UnscorableMetric` when the bands are empty, leave a
    /// gap, overlap, or are not strictly increasing.
    pub fn new(metric_id: &str, bands: Vec<RubricBand>) -> Result<Self, ValidationError> {
        let unscorable = |reason: String| ValidationError::UnscorableMetric {
            metric_id: metric_id.to_string(),
            reason,
        };

        if bands.is_empty() {
            return Err(unscorable("rubric has no bands".to_string()));
        }

        let mut boundaries = Vec::with_capacity(bands.len() - 1);
        for (i, pair) in bands.windows(2).enumerate() {
            let (lower, upper) = (&pair[0], &pair[1]);
            let boundary = match (lower.to, upper.from) {
                (Some(to), Some(from)) if to == from => to,
                (Some(to), Some(from)) if to < from => {
                    return Err(unscorable(format!(
                        "gap between {:?} and {:?} ({} < {})",
                        lower.label, upper.label, to, from
                    )))
                }
                (Some(to), Some(from)) => {
                    return Err(unscorable(format!(
                        "{:?} overlaps {:?} ({} > {})",
                        lower.label, upper.label, to, from
                    )))
                }
                (Some(b), None) | (None, Some(b)) => b,
                (None, None) => {
                    return Err(unscorable(format!(
                        "no boundary between band {} ({:?}) and band {} ({:?})",
                        i,
                        lower.label,
                        i + 1,
                        upper.label
                    )))
                }
            };
            if !boundary.is_finite() {
                return Err(unscorable(format!("boundary {} is not finite", boundary)));
            }
            if let Some(prev) = boundaries.last() {
                if boundary <= *prev {
                    return Err(unscorable(format!(
                        "boundaries not increasing: {} then {}",
                        prev, boundary
                    )));
                }
            }
            boundaries.push(boundary);
        }

        // Explicit outer bounds are tolerated but must agree with the ordering.
        if let (Some(first_from), Some(first_boundary)) = (bands[0].from, boundaries.first()) {
            if first_from >= *first_boundary {
                return Err(unscorable(format!(
                    "first band starts at {} which is not below {}",
                    first_from, first_boundary
                )));
            }
        }
        if let (Some(last_to), Some(last_boundary)) =
            (bands[bands.len() - 1].to, boundaries.last())
        {
            if last_to <= *last_boundary {
                return Err(unscorable(format!(
                    "last band ends at {} which is not above {}",
                    last_to, last_boundary
                )));
            }
        }

        let mut resolved = Vec::with_capacity(bands.len());
        for (i, band) in bands.into_iter().enumerate() {
            let points = band.points.unwrap_or(i as f64);
            if !points.is_finite() {
                return Err(unscorable(format!(
                    "band {:?} has non-finite points",
                    band.label
                )));
            }
            resolved.push(ResolvedBand {
                label: band.label,
                points,
            });
        }

        let mut ranked_points: Vec<f64> = resolved.iter().map(|b| b.points).collect();
        ranked_points.sort_by(f64::total_cmp);
        ranked_points.dedup();

        Ok(Self {
            bands: resolved,
            boundaries,
            ranked_points,
        })
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// Classify a finite value into exactly one band.
    pub fn classify(&self, value: f64) -> BandMatch<'_> {
        let index = self.boundaries.partition_point(|b| *b <= value);
        let band = &self.bands[index];
        BandMatch {
            index,
            label: &band.label,
            points: band.points,
            normalized: self.normalize(band.points),
            range: BandRange {
                from: index.checked_sub(1).map(|i| self.boundaries[i]),
                to: self.boundaries.get(index).copied(),
            },
        }
    }

    /// Rank of `points` among the rubric's distinct points, scaled to 0.0–1.0.
    pub fn normalize(&self, points: f64) -> f64 {
        let distinct = self.ranked_points.len();
        if distinct <= 1 {
            return 1.0;
        }
        let rank = self.ranked_points.partition_point(|p| *p < points);
        rank as f64 / (distinct - 1) as f64
    }
}

// ---------------------------------------------------------------------------
// Definition
// ---------------------------------------------------------------------------

/// One entry of the metric catalog.
#[derive(Debug, Clone)]
pub struct MetricDefinition {
    pub metric_id: String,
    pub required_channels: Vec<String>,
    pub unit: String,
    pub weight: f64,
    pub derivation: Arc<dyn Derivation>,
    pub rubric: Rubric,
}

impl MetricDefinition {
    /// Build and validate a definition with weight 1 and no unit.
    pub fn new(
        metric_id: impl Into<String>,
        required_channels: Vec<String>,
        derivation: Arc<dyn Derivation>,
        rubric: Vec<RubricBand>,
    ) -> Result<Self, ValidationError> {
        let metric_id = metric_id.into();
        let invalid = |reason: &str| ValidationError::InvalidDefinition {
            metric_id: metric_id.clone(),
            reason: reason.to_string(),
        };

        if metric_id.trim().is_empty() {
            return Err(invalid("metric id must not be empty"));
        }
        if required_channels.is_empty() {
            return Err(invalid("at least one required channel is needed"));
        }
        if required_channels.iter().any(|c| c.trim().is_empty()) {
            return Err(invalid("channel names must not be empty"));
        }
        let mut seen = std::collections::HashSet::new();
        if !required_channels.iter().all(|c| seen.insert(c.as_str())) {
            return Err(invalid("required channels must be unique"));
        }

        let rubric = Rubric::new(&metric_id, rubric)?;
        Ok(Self {
            metric_id,
            required_channels,
            unit: String::new(),
            weight: 1.0,
            derivation,
            rubric,
        })
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Set the aggregate weight; must be positive and finite.
    pub fn with_weight(mut self, weight: f64) -> Result<Self, ValidationError> {
        if !(weight.is_finite() && weight > 0.0) {
            return Err(ValidationError::InvalidDefinition {
                metric_id: self.metric_id,
                reason: format!("weight must be a positive number, got {}", weight),
            });
        }
        self.weight = weight;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poor_fair_good() -> Rubric {
        Rubric::new(
            "m",
            vec![
                RubricBand::new("Poor", Some(0.0), Some(50.0)),
                RubricBand::new("Fair", Some(50.0), Some(80.0)),
                RubricBand::new("Good", Some(80.0), None),
            ],
        )
        .expect("valid rubric")
    }

    #[test]
    fn test_boundary_belongs_to_upper_band() {
        let rubric = poor_fair_good();
        assert_eq!(rubric.classify(50.0).label, "Fair");
        assert_eq!(rubric.classify(80.0).label, "Good");
        assert_eq!(rubric.classify(49.999).label, "Poor");
    }

    #[test]
    fn test_extremes_are_unbounded() {
        let rubric = poor_fair_good();
        assert_eq!(rubric.classify(-1e12).label, "Poor");
        assert_eq!(rubric.classify(1e12).label, "Good");
        assert_eq!(rubric.classify(-1e12).range.from, None);
        assert_eq!(rubric.classify(1e12).range.to, None);
    }

    #[test]
    fn test_default_points_normalize_by_rank() {
        let rubric = poor_fair_good();
        assert_eq!(rubric.classify(10.0).normalized, 0.0);
        assert_eq!(rubric.classify(60.0).normalized, 0.5);
        assert_eq!(rubric.classify(90.0).normalized, 1.0);
    }

    #[test]
    fn test_descending_points_invert_rank() {
        let rubric = Rubric::new(
            "brakingDistance",
            vec![
                RubricBand::new("Good", None, Some(30.0)).with_points(3.0),
                RubricBand::new("Poor", Some(30.0), None).with_points(1.0),
            ],
        )
        .expect("valid rubric");
        assert_eq!(rubric.classify(20.0).normalized, 1.0);
        assert_eq!(rubric.classify(40.0).normalized, 0.0);
    }

    #[test]
    fn test_single_band_normalizes_to_one() {
        let rubric = Rubric::new("m", vec![RubricBand::new("Only", None, None)]).expect("valid");
        let m = rubric.classify(123.0);
        assert_eq!(m.label, "Only");
        assert_eq!(m.normalized, 1.0);
    }

    #[test]
    fn test_gap_is_rejected() {
        let err = Rubric::new(
            "m",
            vec![
                RubricBand::new("A", None, Some(10.0)),
                RubricBand::new("B", Some(20.0), None),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::UnscorableMetric { .. }));
        assert!(err.to_string().contains("gap"));
    }

    #[test]
    fn test_overlap_is_rejected() {
        let err = Rubric::new(
            "m",
            vec![
                RubricBand::new("A", None, Some(30.0)),
                RubricBand::new("B", Some(20.0), None),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn test_non_monotonic_is_rejected() {
        let err = Rubric::new(
            "m",
            vec![
                RubricBand::new("A", None, Some(50.0)),
                RubricBand::new("B", None, Some(40.0)),
                RubricBand::new("C", None, None),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("not increasing"));
    }

    #[test]
    fn test_empty_rubric_is_rejected() {
        assert!(Rubric::new("m", vec![]).is_err());
    }
}
