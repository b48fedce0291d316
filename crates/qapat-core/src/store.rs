//! Append-only observation store for one session.
//!
//! History is never edited: a correction is a new observation whose
//! `supersedes` names the `seq` it replaces. Late (back-dated) readings are
//! accepted and flagged rather than rejected.

use std::collections::{BTreeSet, HashMap};
use std::ops::Deref;
use std::sync::Arc;

use crate::domain::{
    DataError, Observation, ObservationDraft, ObservationValue, SessionId, Timestamp,
};
use crate::registry::MetricRegistry;

/// Immutable point-in-time copy of a session's observations.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationSnapshot {
    observations: Arc<[Observation]>,
}

impl ObservationSnapshot {
    pub fn to_vec(&self) -> Vec<Observation> {
        self.observations.to_vec()
    }
}

impl From<Vec<Observation>> for ObservationSnapshot {
    fn from(observations: Vec<Observation>) -> Self {
        Self {
            observations: Arc::from(observations),
        }
    }
}

impl Deref for ObservationSnapshot {
    type Target = [Observation];

    fn deref(&self) -> &[Observation] {
        &self.observations
    }
}

/// Ordered raw observations of one session.
#[derive(Debug, Clone)]
pub struct ObservationStore {
    session_id: SessionId,
    accepted_channels: BTreeSet<String>,
    observations: Vec<Observation>,
    /// Superseded `seq` to the `seq` of its correction.
    corrected_by: HashMap<u64, u64>,
    latest: Option<Timestamp>,
    accepting: bool,
}

impl ObservationStore {
    /// Create a closed store accepting the registry's declared channels.
    pub fn new(session_id: SessionId, registry: &MetricRegistry) -> Self {
        Self {
            session_id,
            accepted_channels: registry
                .declared_channels()
                .into_iter()
                .map(str::to_string)
                .collect(),
            observations: Vec::new(),
            corrected_by: HashMap::new(),
            latest: None,
            accepting: false,
        }
    }

    /// Start accepting observations.
    pub fn open(&mut self) {
        self.accepting = true;
    }

    /// Stop accepting observations.
    pub fn seal(&mut self) {
        self.accepting = false;
    }

    /// Record one observation, assigning its `seq`.
    ///
    /// `default_timestamp` is used when the draft carries none.
    ///
    /// # Errors
    ///
    /// `DataError::InvalidObservation` when the store is sealed, the channel
    /// is not declared by any metric, a numeric value is not finite, or the
    /// correction target does not exist on the same channel or was already
    /// corrected. A reading is amended again by correcting its correction.
    pub fn append(
        &mut self,
        draft: ObservationDraft,
        default_timestamp: Timestamp,
    ) -> Result<&Observation, DataError> {
        if !self.accepting {
            return Err(self.invalid(&draft.channel, "session is not recording"));
        }
        if !self.accepted_channels.contains(&draft.channel) {
            return Err(self.invalid(&draft.channel, "channel is not declared by any metric"));
        }
        if let ObservationValue::Numeric(v) = draft.value {
            if !v.is_finite() {
                return Err(self.invalid(&draft.channel, "numeric value must be finite"));
            }
        }
        if let Some(target) = draft.supersedes {
            if let Some(by) = self.corrected_by.get(&target) {
                return Err(self.invalid(
                    &draft.channel,
                    &format!(
                        "correction target {} was already corrected by {}; correct {} instead",
                        target, by, by
                    ),
                ));
            }
            match self.observations.get(target as usize) {
                Some(prev) if prev.channel == draft.channel => {}
                Some(prev) => {
                    return Err(self.invalid(
                        &draft.channel,
                        &format!(
                            "correction target {} belongs to channel {:?}",
                            target, prev.channel
                        ),
                    ))
                }
                None => {
                    return Err(self.invalid(
                        &draft.channel,
                        &format!("correction target {} does not exist", target),
                    ))
                }
            }
        }

        let timestamp = draft.timestamp.unwrap_or(default_timestamp);
        let late = self.latest.is_some_and(|latest| timestamp < latest);
        if late {
            tracing::debug!(
                session_id = %self.session_id,
                channel = %draft.channel,
                %timestamp,
                "late observation accepted"
            );
        }
        self.latest = Some(self.latest.map_or(timestamp, |l| l.max(timestamp)));

        let seq = self.observations.len() as u64;
        self.observations.push(Observation {
            seq,
            timestamp,
            channel: draft.channel,
            value: draft.value,
            supersedes: draft.supersedes,
            late,
        });
        if let Some(target) = draft.supersedes {
            self.corrected_by.insert(target, seq);
        }
        Ok(&self.observations[seq as usize])
    }

    /// Consistent copy of everything recorded so far.
    pub fn snapshot(&self) -> ObservationSnapshot {
        ObservationSnapshot::from(self.observations.clone())
    }

    /// Channels with at least one observation.
    pub fn channels_present(&self) -> BTreeSet<&str> {
        self.observations.iter().map(|o| o.channel.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn latest_timestamp(&self) -> Option<Timestamp> {
        self.latest
    }

    fn invalid(&self, channel: &str, reason: &str) -> DataError {
        DataError::InvalidObservation {
            session_id: self.session_id,
            channel: channel.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derivation::BuiltinRule;
    use crate::domain::{MetricDefinition, RubricBand};

    fn registry() -> MetricRegistry {
        MetricRegistry::from_definitions(vec![MetricDefinition::new(
            "avgSpeed",
            vec!["speed".to_string()],
            Arc::new(BuiltinRule::Mean),
            vec![RubricBand::new("Any", None, None)],
        )
        .expect("definition")])
        .expect("registry")
    }

    fn open_store() -> ObservationStore {
        let mut store = ObservationStore::new(SessionId::new(), &registry());
        store.open();
        store
    }

    #[test]
    fn test_append_assigns_sequential_seq() {
        let mut store = open_store();
        for (i, v) in [50.0, 60.0, 55.0].into_iter().enumerate() {
            let obs = store
                .append(
                    ObservationDraft::new("speed", v).at(Timestamp::from_secs(i as u64 * 5)),
                    Timestamp::ZERO,
                )
                .expect("append");
            assert_eq!(obs.seq, i as u64);
            assert!(!obs.late);
        }
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_sealed_store_rejects() {
        let mut store = ObservationStore::new(SessionId::new(), &registry());
        let err = store
            .append(ObservationDraft::new("speed", 1.0), Timestamp::ZERO)
            .unwrap_err();
        assert!(matches!(err, DataError::InvalidObservation { .. }));
        assert!(err.to_string().contains("not recording"));
    }

    #[test]
    fn test_unknown_channel_rejected() {
        let mut store = open_store();
        let err = store
            .append(ObservationDraft::new("rpm", 3000.0), Timestamp::ZERO)
            .unwrap_err();
        assert!(err.to_string().contains("rpm"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut store = open_store();
        assert!(store
            .append(ObservationDraft::new("speed", f64::NAN), Timestamp::ZERO)
            .is_err());
        assert!(store
            .append(ObservationDraft::new("speed", f64::INFINITY), Timestamp::ZERO)
            .is_err());
    }

    #[test]
    fn test_late_observation_flagged_not_rejected() {
        let mut store = open_store();
        store
            .append(
                ObservationDraft::new("speed", 50.0).at(Timestamp::from_secs(10)),
                Timestamp::ZERO,
            )
            .expect("first");
        let late = store
            .append(
                ObservationDraft::new("speed", 40.0).at(Timestamp::from_secs(5)),
                Timestamp::ZERO,
            )
            .expect("late accepted");
        assert!(late.late);
        assert_eq!(store.latest_timestamp(), Some(Timestamp::from_secs(10)));
    }

    #[test]
    fn test_correction_must_target_same_channel() {
        let mut store = open_store();
        store
            .append(ObservationDraft::new("speed", 50.0), Timestamp::ZERO)
            .expect("first");
        let fixed = store
            .append(
                ObservationDraft::new("speed", 52.0).correcting(0),
                Timestamp::from_millis(10),
            )
            .expect("correction");
        assert_eq!(fixed.supersedes, Some(0));

        let err = store
            .append(
                ObservationDraft::new("speed", 1.0).correcting(99),
                Timestamp::ZERO,
            )
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_reading_can_only_be_corrected_once() {
        let mut store = open_store();
        store
            .append(ObservationDraft::new("speed", 600.0), Timestamp::ZERO)
            .expect("typo");
        store
            .append(ObservationDraft::new("speed", 70.0).correcting(0), Timestamp::ZERO)
            .expect("first correction");

        let err = store
            .append(ObservationDraft::new("speed", 60.0).correcting(0), Timestamp::ZERO)
            .unwrap_err();
        assert!(err.to_string().contains("already corrected by 1"));
        assert_eq!(store.len(), 2);

        let chained = store
            .append(ObservationDraft::new("speed", 60.0).correcting(1), Timestamp::ZERO)
            .expect("correct the correction");
        assert_eq!(chained.seq, 2);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut store = open_store();
        store
            .append(ObservationDraft::new("speed", 50.0), Timestamp::ZERO)
            .expect("append");
        let snap = store.snapshot();
        store
            .append(ObservationDraft::new("speed", 60.0), Timestamp::ZERO)
            .expect("append");
        assert_eq!(snap.len(), 1);
        assert_eq!(store.snapshot().len(), 2);
    }
}
