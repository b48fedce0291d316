//! Metric definitions registry.
//!
//! Populated once at startup (usually from [`crate::config`]) and then shared
//! read-only, by `Arc`, with every session. Registration order is preserved
//! and is the order in which metrics are derived and reported.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::domain::{DataError, MetricDefinition, ValidationError};

/// Catalog of metric definitions keyed by metric id.
#[derive(Debug, Clone, Default)]
pub struct MetricRegistry {
    definitions: Vec<MetricDefinition>,
    index: HashMap<String, usize>,
}

/// Which metrics the currently recorded channels can feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InputCoverage {
    /// Metrics whose required channels are all present.
    pub computable: Vec<String>,
    /// Metrics missing at least one channel, with the missing channels.
    pub incomplete: BTreeMap<String, Vec<String>>,
}

impl InputCoverage {
    pub fn is_complete(&self) -> bool {
        self.incomplete.is_empty()
    }
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition.
    ///
    /// # Errors
    ///
    /// `ValidationError::DuplicateMetricId` if the id is already registered.
    pub fn register(&mut self, definition: MetricDefinition) -> Result<(), ValidationError> {
        if self.index.contains_key(&definition.metric_id) {
            return Err(ValidationError::DuplicateMetricId {
                metric_id: definition.metric_id,
            });
        }
        tracing::debug!(
            metric_id = %definition.metric_id,
            rule = definition.derivation.kind(),
            channels = ?definition.required_channels,
            "metric registered"
        );
        self.index
            .insert(definition.metric_id.clone(), self.definitions.len());
        self.definitions.push(definition);
        Ok(())
    }

    /// Build a registry from a list, failing on the first duplicate.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = MetricDefinition>,
    ) -> Result<Self, ValidationError> {
        let mut registry = Self::new();
        for definition in definitions {
            registry.register(definition)?;
        }
        Ok(registry)
    }

    /// Look up a definition by id.
    ///
    /// # Errors
    ///
    /// `DataError::UnknownMetric` if no such id is registered.
    pub fn lookup(&self, metric_id: &str) -> Result<&MetricDefinition, DataError> {
        self.index
            .get(metric_id)
            .map(|&i| &self.definitions[i])
            .ok_or_else(|| DataError::UnknownMetric {
                metric_id: metric_id.to_string(),
            })
    }

    pub fn contains(&self, metric_id: &str) -> bool {
        self.index.contains_key(metric_id)
    }

    /// Definitions in registration order.
    pub fn definitions(&self) -> &[MetricDefinition] {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Union of every definition's required channels.
    pub fn declared_channels(&self) -> BTreeSet<&str> {
        self.definitions
            .iter()
            .flat_map(|d| d.required_channels.iter().map(String::as_str))
            .collect()
    }

    pub fn declares_channel(&self, channel: &str) -> bool {
        self.definitions
            .iter()
            .any(|d| d.required_channels.iter().any(|c| c == channel))
    }

    /// Report which metrics the given channels are enough to compute.
    ///
    /// This is a warning surface, not an error: finishing a session with
    /// incomplete coverage marks the affected metrics as insufficient data.
    pub fn inputs_satisfied<'a, I>(&self, channels_present: I) -> InputCoverage
    where
        I: IntoIterator<Item = &'a str>,
    {
        let present: BTreeSet<&str> = channels_present.into_iter().collect();
        let mut coverage = InputCoverage::default();
        for def in &self.definitions {
            let missing: Vec<String> = def
                .required_channels
                .iter()
                .filter(|c| !present.contains(c.as_str()))
                .cloned()
                .collect();
            if missing.is_empty() {
                coverage.computable.push(def.metric_id.clone());
            } else {
                coverage.incomplete.insert(def.metric_id.clone(), missing);
            }
        }
        coverage
    }
}
