//! SHA-256 fingerprints for session results and record files.
//!
//! A result fingerprint hashes the compact JSON of [`ResultFingerprint`].
//! Field order is fixed by the struct, and the derived values, scores and
//! insufficient-data entries are already in registry order, so two
//! evaluations of the same observation sequence hash to the same bytes.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::domain::error::Result;
use crate::domain::result::{AggregateScore, DerivedMetricValue, InsufficientData, Score};

/// The parts of a session result that depend only on the observations.
/// Ids and wall-clock times are left out.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultFingerprint<'a> {
    pub derived_metrics: &'a [DerivedMetricValue],
    pub insufficient_data: &'a [InsufficientData],
    pub scores: &'a [Score],
    pub aggregate_score: &'a AggregateScore,
}

impl ResultFingerprint<'_> {
    pub fn digest(&self) -> Result<String> {
        Ok(digest_bytes(&serde_json::to_vec(self)?))
    }
}

/// SHA256 hex digest of raw bytes.
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::result::BandRange;

    fn score(metric_id: &str, normalized: f64) -> Score {
        Score {
            metric_id: metric_id.to_string(),
            label: "Fair".to_string(),
            points: 1.0,
            normalized,
            weight: 1.0,
            range: BandRange {
                from: Some(50.0),
                to: Some(80.0),
            },
        }
    }

    fn derived(metric_id: &str, value: f64) -> DerivedMetricValue {
        DerivedMetricValue {
            metric_id: metric_id.to_string(),
            value,
            unit: "km/h".to_string(),
            sample_count: 3,
        }
    }

    #[test]
    fn test_digest_is_hex_sha256_and_stable() {
        let values = [derived("avgSpeed", 55.0)];
        let scores = [score("avgSpeed", 0.5)];
        let aggregate = AggregateScore::Scored {
            value: 0.5,
            scored_metrics: 1,
        };
        let fp = ResultFingerprint {
            derived_metrics: &values,
            insufficient_data: &[],
            scores: &scores,
            aggregate_score: &aggregate,
        };
        let digest = fp.digest().expect("digest");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, fp.digest().expect("again"));
    }

    #[test]
    fn test_digest_changes_with_single_value() {
        let aggregate = AggregateScore::NoData;
        let a = [derived("avgSpeed", 55.0)];
        let b = [derived("avgSpeed", 55.5)];
        let digest = |d: &[DerivedMetricValue]| {
            ResultFingerprint {
                derived_metrics: d,
                insufficient_data: &[],
                scores: &[],
                aggregate_score: &aggregate,
            }
            .digest()
            .expect("digest")
        };
        assert_ne!(digest(&a), digest(&b));
    }

    #[test]
    fn test_digest_depends_on_metric_order() {
        let aggregate = AggregateScore::NoData;
        let ab = [derived("a", 1.0), derived("b", 2.0)];
        let ba = [derived("b", 2.0), derived("a", 1.0)];
        let digest = |d: &[DerivedMetricValue]| {
            ResultFingerprint {
                derived_metrics: d,
                insufficient_data: &[],
                scores: &[],
                aggregate_score: &aggregate,
            }
            .digest()
            .expect("digest")
        };
        assert_ne!(digest(&ab), digest(&ba));
    }

    #[test]
    fn test_digest_bytes_known_vector() {
        assert_eq!(
            digest_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
