//! Metric catalog loading.
//!
//! A catalog declares the pipeline tunables and every metric definition. It
//! is read from TOML (`.toml`) or JSON (anything else) and validated into a
//! [`MetricRegistry`] before any session is created:
//!
//! ```toml
//! [pipeline]
//! finishTimeoutMs = 5000
//!
//! [[metrics]]
//! metricId = "avgSpeed"
//! requiredChannels = ["speed"]
//! unit = "km/h"
//! rule = { kind = "mean" }
//! rubric = [
//!     { label = "Poor", to = 50.0 },
//!     { label = "Fair", from = 50.0, to = 80.0 },
//!     { label = "Good", from = 80.0 },
//! ]
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::derivation::BuiltinRule;
use crate::domain::{MetricDefinition, Result, RubricBand, ValidationError};
use crate::registry::MetricRegistry;
use crate::session::PipelineConfig;

/// Accepted range for `finishTimeoutMs`.
pub const MIN_FINISH_TIMEOUT: Duration = Duration::from_secs(1);
pub const MAX_FINISH_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogConfig {
    #[serde(default)]
    pub pipeline: Option<PipelineSection>,
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSection {
    #[serde(default)]
    pub finish_timeout_ms: Option<u64>,
}

/// One metric as written in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricConfig {
    pub metric_id: String,
    pub required_channels: Vec<String>,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub weight: Option<f64>,
    pub rule: BuiltinRule,
    pub rubric: Vec<RubricBand>,
}

impl MetricConfig {
    /// Validate and build the runtime definition.
    pub fn into_definition(self) -> std::result::Result<MetricDefinition, ValidationError> {
        if self.rule.arity() != self.required_channels.len() {
            return Err(ValidationError::InvalidDefinition {
                metric_id: self.metric_id,
                reason: format!(
                    "rule expects {} channel(s), {} declared",
                    self.rule.arity(),
                    self.required_channels.len()
                ),
            });
        }
        if let Err(reason) = self.rule.validate() {
            return Err(ValidationError::InvalidDefinition {
                metric_id: self.metric_id,
                reason,
            });
        }

        let mut def = MetricDefinition::new(
            self.metric_id,
            self.required_channels,
            Arc::new(self.rule),
            self.rubric,
        )?
        .with_unit(self.unit);
        if let Some(weight) = self.weight {
            def = def.with_weight(weight)?;
        }
        Ok(def)
    }
}

impl CatalogConfig {
    /// Build the registry, rejecting the whole catalog on the first invalid
    /// definition.
    pub fn to_registry(&self) -> std::result::Result<MetricRegistry, ValidationError> {
        let definitions = self
            .metrics
            .iter()
            .cloned()
            .map(MetricConfig::into_definition)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        MetricRegistry::from_definitions(definitions)
    }

    pub fn pipeline_config(&self) -> std::result::Result<PipelineConfig, ValidationError> {
        let finish_timeout = match self.pipeline.as_ref().and_then(|p| p.finish_timeout_ms) {
            None => None,
            Some(ms) => {
                let limit = Duration::from_millis(ms);
                if !(MIN_FINISH_TIMEOUT..=MAX_FINISH_TIMEOUT).contains(&limit) {
                    return Err(ValidationError::InvalidPipeline(format!(
                        "finishTimeoutMs must be within {}..={}, got {}",
                        MIN_FINISH_TIMEOUT.as_millis(),
                        MAX_FINISH_TIMEOUT.as_millis(),
                        ms
                    )));
                }
                Some(limit)
            }
        };
        Ok(PipelineConfig { finish_timeout })
    }
}

/// A validated catalog, ready to build a session manager.
#[derive(Debug, Clone)]
pub struct LoadedCatalog {
    pub registry: MetricRegistry,
    pub pipeline: PipelineConfig,
}

pub fn parse_toml(content: &str) -> Result<CatalogConfig> {
    Ok(toml::from_str(content)?)
}

pub fn parse_json(content: &str) -> Result<CatalogConfig> {
    Ok(serde_json::from_str(content)?)
}

/// Read, parse, and validate a catalog file.
pub fn load_catalog(path: impl AsRef<Path>) -> Result<LoadedCatalog> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let config = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => parse_toml(&content)?,
        _ => parse_json(&content)?,
    };
    let loaded = LoadedCatalog {
        registry: config.to_registry()?,
        pipeline: config.pipeline_config()?,
    };
    tracing::debug!(
        path = %path.display(),
        metrics = loaded.registry.len(),
        "catalog loaded"
    );
    Ok(loaded)
}
