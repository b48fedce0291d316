//! Report artifacts: Markdown summary, CSV exports, and cross-session merge.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Observation, SessionId, SessionRecord, SessionResult, SessionState};

/// Render the per-session Markdown report. Output depends only on `result`.
pub fn render_session_report_md(result: &SessionResult) -> String {
    let mut out = String::new();
    out.push_str("# Test Drive Report\n\n");
    out.push_str(&format!(
        "- session: `{}`\n- vehicle: {}\n- driver: {}\n",
        result.session_id, result.vehicle_id, result.driver_id
    ));
    if let Some(start) = result.start_time {
        out.push_str(&format!("- started: {}\n", start.to_rfc3339()));
    }
    if let Some(end) = result.end_time {
        out.push_str(&format!("- finished: {}\n", end.to_rfc3339()));
    }
    out.push_str(&format!("- observations: {}\n", result.observation_count));
    match result.aggregate_score.value() {
        Some(value) => out.push_str(&format!(
            "- aggregate score: {:.3} ({} metrics)\n",
            value,
            result.scores.len()
        )),
        None => out.push_str("- aggregate score: no data\n"),
    }
    out.push_str(&format!("- result digest: `{}`\n\n", result.result_digest));

    out.push_str("## Scores\n\n");
    if result.scores.is_empty() {
        out.push_str("_No metric could be scored._\n\n");
    } else {
        out.push_str("| Metric | Value | Unit | Band | Normalized | Weight |\n");
        out.push_str("|---|---:|---|---|---:|---:|\n");
        for score in &result.scores {
            let (value, unit) = result
                .derived(&score.metric_id)
                .map(|d| (format!("{:.3}", d.value), d.unit.as_str()))
                .unwrap_or_else(|| ("-".to_string(), ""));
            out.push_str(&format!(
                "| `{}` | {} | {} | {} | {:.3} | {} |\n",
                score.metric_id, value, unit, score.label, score.normalized, score.weight
            ));
        }
        out.push('\n');
    }

    if !result.insufficient_data.is_empty() {
        out.push_str("## Insufficient Data\n\n");
        for missing in &result.insufficient_data {
            out.push_str(&format!("- `{}`: {}\n", missing.metric_id, missing.reason));
        }
        out.push('\n');
    }
    out
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn csv_row(fields: &[String]) -> String {
    let mut line = fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

/// CSV export of per-metric outcomes, scored metrics first.
pub fn render_metrics_csv(result: &SessionResult) -> String {
    let mut out = csv_row(
        &[
            "metric_id",
            "status",
            "value",
            "unit",
            "sample_count",
            "band",
            "points",
            "normalized",
            "weight",
            "reason",
        ]
        .map(String::from),
    );
    for derived in &result.derived_metrics {
        let score = result.score(&derived.metric_id);
        out.push_str(&csv_row(&[
            derived.metric_id.clone(),
            "scored".to_string(),
            derived.value.to_string(),
            derived.unit.clone(),
            derived.sample_count.to_string(),
            score.map(|s| s.label.clone()).unwrap_or_default(),
            score.map(|s| s.points.to_string()).unwrap_or_default(),
            score.map(|s| s.normalized.to_string()).unwrap_or_default(),
            score.map(|s| s.weight.to_string()).unwrap_or_default(),
            String::new(),
        ]));
    }
    for missing in &result.insufficient_data {
        out.push_str(&csv_row(&[
            missing.metric_id.clone(),
            "insufficient_data".to_string(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            missing.reason.clone(),
        ]));
    }
    out
}

/// Time-series CSV export of raw observations in recording order.
pub fn render_observations_csv(observations: &[Observation]) -> String {
    let mut out = csv_row(
        &["seq", "timestamp_ms", "channel", "value", "supersedes", "late"].map(String::from),
    );
    for obs in observations {
        out.push_str(&csv_row(&[
            obs.seq.to_string(),
            obs.timestamp.as_millis().to_string(),
            obs.channel.clone(),
            obs.value.to_string(),
            obs.supersedes.map(|s| s.to_string()).unwrap_or_default(),
            obs.late.to_string(),
        ]));
    }
    out
}

/// Paths of the artifacts produced for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifacts {
    pub dir: PathBuf,
    pub report_md: PathBuf,
    pub result_json: PathBuf,
    pub metrics_csv: PathBuf,
    pub observations_csv: PathBuf,
}

/// Produces the report artifacts for a finished session.
#[async_trait]
pub trait ReportBuilder: Send + Sync {
    async fn build(
        &self,
        result: &SessionResult,
        observations: &[Observation],
    ) -> Result<ReportArtifacts>;
}

/// Writes artifacts under `<root>/<session_id>/`.
#[derive(Debug, Clone)]
pub struct FsReportBuilder {
    root: PathBuf,
}

impl FsReportBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ReportBuilder for FsReportBuilder {
    async fn build(
        &self,
        result: &SessionResult,
        observations: &[Observation],
    ) -> Result<ReportArtifacts> {
        let dir = self.root.join(result.session_id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create {:?}", dir))?;

        let artifacts = ReportArtifacts {
            report_md: dir.join("report.md"),
            result_json: dir.join("result.json"),
            metrics_csv: dir.join("metrics.csv"),
            observations_csv: dir.join("observations.csv"),
            dir,
        };

        let json = serde_json::to_string_pretty(result).context("serialize session result")?;
        let files = [
            (&artifacts.report_md, render_session_report_md(result)),
            (&artifacts.result_json, json),
            (&artifacts.metrics_csv, render_metrics_csv(result)),
            (&artifacts.observations_csv, render_observations_csv(observations)),
        ];
        for (path, content) in files {
            tokio::fs::write(path, content)
                .await
                .with_context(|| format!("write {:?}", path))?;
        }

        tracing::info!(
            event = "report.written",
            session_id = %result.session_id,
            dir = %artifacts.dir.display(),
        );
        Ok(artifacts)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// List aborted sessions in the summary. They never contribute scores.
    pub include_aborted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedSession {
    pub session_id: SessionId,
    pub vehicle_id: String,
    pub driver_id: String,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub aggregate_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub abort_reason: Option<String>,
}

/// Per-metric statistics over finished sessions. `mean`/`min`/`max` are
/// `None` when every session reported the metric as insufficient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSummary {
    pub metric_id: String,
    pub unit: String,
    pub sessions: usize,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub insufficient_sessions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedSummary {
    pub sessions: Vec<MergedSession>,
    pub metrics: Vec<MetricSummary>,
    /// Mean of the scored sessions' aggregates; `None` when none scored.
    pub mean_aggregate: Option<f64>,
    pub excluded_sessions: usize,
}

#[derive(Default)]
struct MetricAccumulator {
    unit: String,
    values: Vec<f64>,
    insufficient: usize,
}

/// Merge several session records into one summary.
///
/// Only `Finished` records contribute values. Aborted records are listed when
/// `include_aborted` is set and otherwise counted as excluded, as are records
/// still in `Created`/`Recording`.
pub fn merge_session_records(records: &[SessionRecord], options: MergeOptions) -> MergedSummary {
    let mut sessions = Vec::new();
    let mut per_metric: BTreeMap<String, MetricAccumulator> = BTreeMap::new();
    let mut aggregates = Vec::new();
    let mut excluded_sessions = 0;

    for record in records {
        match record.state {
            SessionState::Finished => {
                let aggregate = record.aggregate_score.as_ref().and_then(|a| a.value());
                if let Some(value) = aggregate {
                    aggregates.push(value);
                }
                for derived in &record.derived_metrics {
                    let acc = per_metric.entry(derived.metric_id.clone()).or_default();
                    acc.unit = derived.unit.clone();
                    acc.values.push(derived.value);
                }
                for missing in &record.insufficient_data {
                    per_metric
                        .entry(missing.metric_id.clone())
                        .or_default()
                        .insufficient += 1;
                }
                sessions.push(MergedSession {
                    session_id: record.session_id,
                    vehicle_id: record.vehicle_id.clone(),
                    driver_id: record.driver_id.clone(),
                    state: record.state,
                    aggregate_score: aggregate,
                    abort_reason: None,
                });
            }
            SessionState::Aborted if options.include_aborted => {
                sessions.push(MergedSession {
                    session_id: record.session_id,
                    vehicle_id: record.vehicle_id.clone(),
                    driver_id: record.driver_id.clone(),
                    state: record.state,
                    aggregate_score: None,
                    abort_reason: record.abort_reason.clone(),
                });
            }
            _ => excluded_sessions += 1,
        }
    }

    let metrics = per_metric
        .into_iter()
        .map(|(metric_id, acc)| {
            let n = acc.values.len();
            MetricSummary {
                metric_id,
                unit: acc.unit,
                sessions: n,
                mean: (n > 0).then(|| acc.values.iter().sum::<f64>() / n as f64),
                min: acc.values.iter().copied().reduce(f64::min),
                max: acc.values.iter().copied().reduce(f64::max),
                insufficient_sessions: acc.insufficient,
            }
        })
        .collect();

    let mean_aggregate = if aggregates.is_empty() {
        None
    } else {
        Some(aggregates.iter().sum::<f64>() / aggregates.len() as f64)
    };

    MergedSummary {
        sessions,
        metrics,
        mean_aggregate,
        excluded_sessions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AggregateScore, BandRange, DerivedMetricValue, InsufficientData, Score};

    fn result() -> SessionResult {
        SessionResult {
            session_id: SessionId(
                uuid::Uuid::parse_str("11111111-1111-1111-1111-111111111111").expect("uuid"),
            ),
            vehicle_id: "VIN-1".to_string(),
            driver_id: "driver-7".to_string(),
            start_time: None,
            end_time: None,
            observation_count: 3,
            derived_metrics: vec![DerivedMetricValue {
                metric_id: "avgSpeed".to_string(),
                value: 55.0,
                unit: "km/h".to_string(),
                sample_count: 3,
            }],
            insufficient_data: vec![InsufficientData {
                metric_id: "brakeP95".to_string(),
                reason: "no observations on channel \"brake\"".to_string(),
            }],
            scores: vec![Score {
                metric_id: "avgSpeed".to_string(),
                label: "Fair".to_string(),
                points: 1.0,
                normalized: 0.5,
                weight: 1.0,
                range: BandRange {
                    from: Some(50.0),
                    to: Some(80.0),
                },
            }],
            aggregate_score: AggregateScore::Scored {
                value: 0.5,
                scored_metrics: 1,
            },
            result_digest: "abc123".to_string(),
        }
    }

    #[test]
    fn session_report_markdown_render_is_stable() {
        let md = render_session_report_md(&result());
        assert!(md.starts_with("# Test Drive Report\n"));
        assert!(md.contains("- aggregate score: 0.500 (1 metrics)\n"));
        assert!(md.contains("| `avgSpeed` | 55.000 | km/h | Fair | 0.500 | 1 |\n"));
        assert!(md.contains("## Insufficient Data\n"));
        assert_eq!(md, render_session_report_md(&result()));
    }

    #[test]
    fn no_data_report_says_so() {
        let mut r = result();
        r.scores.clear();
        r.derived_metrics.clear();
        r.aggregate_score = AggregateScore::NoData;
        let md = render_session_report_md(&r);
        assert!(md.contains("- aggregate score: no data\n"));
        assert!(md.contains("_No metric could be scored._"));
    }

    #[test]
    fn metrics_csv_quotes_reasons() {
        let csv = render_metrics_csv(&result());
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("metric_id,status,value"));
        assert_eq!(lines[1], "avgSpeed,scored,55,km/h,3,Fair,1,0.5,1,");
        assert_eq!(
            lines[2],
            "brakeP95,insufficient_data,,,,,,,,\"no observations on channel \"\"brake\"\"\""
        );
    }

    #[tokio::test]
    async fn fs_builder_writes_all_artifacts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let builder = FsReportBuilder::new(dir.path());
        let artifacts = builder.build(&result(), &[]).await.expect("build");

        assert!(artifacts.dir.ends_with("11111111-1111-1111-1111-111111111111"));
        for path in [
            &artifacts.report_md,
            &artifacts.result_json,
            &artifacts.metrics_csv,
            &artifacts.observations_csv,
        ] {
            assert!(path.exists(), "{:?} missing", path);
        }
        let raw = std::fs::read_to_string(&artifacts.result_json).expect("read");
        let parsed: SessionResult = serde_json::from_str(&raw).expect("parse");
        assert_eq!(parsed, result());
    }
}
