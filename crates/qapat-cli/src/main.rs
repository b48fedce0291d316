//! QAPAT - Quality and Performance Assessment Tool CLI
//!
//! The `qapat` command replays recorded test drives through the session
//! pipeline and produces scored reports.
//!
//! ## Commands
//!
//! - `validate`: Load and validate a metric catalog
//! - `run`: Replay observation files as sessions, then write records and reports
//! - `merge`: Summarize several persisted session records

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

use qapat_core::{
    load_catalog, merge_session_records, read_session_record, write_session_record, Derivation,
    FsReportBuilder, LogFormat, MergeOptions, ObservationDraft, QapatError, ReportBuilder,
    SessionId, SessionManager, METRICS,
};

#[derive(Parser)]
#[command(name = "qapat")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Quality and Performance Assessment Tool (QAPAT)", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a metric catalog and report what it declares
    Validate {
        /// Catalog file (.toml or .json)
        #[arg(short, long, env = "QAPAT_CATALOG")]
        catalog: PathBuf,
    },

    /// Replay observation files (JSON lines) as test-drive sessions
    ///
    /// Each file becomes one independent session; files are processed
    /// concurrently.
    Run {
        /// Catalog file (.toml or .json)
        #[arg(short, long, env = "QAPAT_CATALOG")]
        catalog: PathBuf,

        /// Observation file, one JSON observation per line
        #[arg(short, long = "observations", required = true, num_args = 1..)]
        observations: Vec<PathBuf>,

        /// Vehicle under test
        #[arg(long)]
        vehicle: String,

        /// Driver of the test drive
        #[arg(long)]
        driver: String,

        /// Output directory for records and reports (default: .qapat)
        #[arg(long, default_value = ".qapat")]
        out: PathBuf,
    },

    /// Merge persisted session records into one summary (JSON)
    Merge {
        /// Paths to record.json files
        #[arg(required = true)]
        records: Vec<PathBuf>,

        /// List aborted sessions in the summary
        #[arg(long)]
        include_aborted: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    qapat_core::init_tracing(format, level);

    let outcome = match cli.command {
        Commands::Validate { catalog } => cmd_validate(&catalog),
        Commands::Run {
            catalog,
            observations,
            vehicle,
            driver,
            out,
        } => match cmd_run(&catalog, &observations, &vehicle, &driver, &out).await {
            Ok(summaries) => print_summaries(&summaries),
            Err(err) => Err(err),
        },
        Commands::Merge {
            records,
            include_aborted,
        } => cmd_merge(&records, include_aborted),
    };

    METRICS.flush();
    outcome
}

fn cmd_validate(catalog: &Path) -> Result<()> {
    let loaded = load_catalog(catalog)
        .with_context(|| format!("invalid catalog {}", catalog.display()))?;

    println!("Catalog OK: {} metric(s)", loaded.registry.len());
    for def in loaded.registry.definitions() {
        println!(
            "  {} [{}] <- {} ({} bands, weight {})",
            def.metric_id,
            def.derivation.kind(),
            def.required_channels.join(", "),
            def.rubric.len(),
            def.weight
        );
    }
    if let Some(timeout) = loaded.pipeline.finish_timeout {
        println!("  finish timeout: {} ms", timeout.as_millis());
    }
    Ok(())
}

/// Per-session outcome printed by `run`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunSummary {
    session_id: SessionId,
    source: PathBuf,
    observations: usize,
    rejected: usize,
    aggregate_score: Option<f64>,
    record: PathBuf,
    report_dir: PathBuf,
}

async fn cmd_run(
    catalog: &Path,
    observations: &[PathBuf],
    vehicle: &str,
    driver: &str,
    out: &Path,
) -> Result<Vec<RunSummary>> {
    let loaded = load_catalog(catalog)
        .with_context(|| format!("invalid catalog {}", catalog.display()))?;
    let manager =
        SessionManager::new(Arc::new(loaded.registry)).with_config(loaded.pipeline);
    let builder = FsReportBuilder::new(out.join("reports"));

    let runs = observations
        .iter()
        .map(|path| run_session(&manager, &builder, path, vehicle, driver, out));
    futures::future::try_join_all(runs).await
}

async fn run_session(
    manager: &SessionManager,
    builder: &dyn ReportBuilder,
    source: &Path,
    vehicle: &str,
    driver: &str,
    out: &Path,
) -> Result<RunSummary> {
    let drafts = read_drafts(source)?;
    let session = manager.create(vehicle, driver);
    session.start().await?;

    let mut rejected = 0;
    for (line, draft) in drafts {
        match session.record(draft).await {
            Ok(_) => {}
            Err(QapatError::Data(err)) => {
                warn!(source = %source.display(), line, error = %err, "observation rejected");
                rejected += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }

    let result = session
        .finish()
        .await
        .with_context(|| format!("finish session for {}", source.display()))?;
    let record = session.to_record().await;
    let record_path = write_session_record(&record, &out.join("records"))?;
    let artifacts = builder.build(&result, &record.observations).await?;

    info!(
        session_id = %result.session_id,
        source = %source.display(),
        aggregate = ?result.aggregate_score.value(),
        "session replayed"
    );

    Ok(RunSummary {
        session_id: result.session_id,
        source: source.to_path_buf(),
        observations: result.observation_count,
        rejected,
        aggregate_score: result.aggregate_score.value(),
        record: record_path,
        report_dir: artifacts.dir,
    })
}

fn print_summaries(summaries: &[RunSummary]) -> Result<()> {
    for summary in summaries {
        println!("{}", serde_json::to_string(summary)?);
    }
    Ok(())
}

/// Parse a JSON-lines observation file. Blank lines are skipped; line
/// numbers are 1-based.
fn read_drafts(path: &Path) -> Result<Vec<(usize, ObservationDraft)>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read observations {}", path.display()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            let draft = serde_json::from_str(line)
                .with_context(|| format!("{}:{}: malformed observation", path.display(), idx + 1))?;
            Ok((idx + 1, draft))
        })
        .collect()
}

fn cmd_merge(records: &[PathBuf], include_aborted: bool) -> Result<()> {
    let loaded = records
        .iter()
        .map(|path| {
            read_session_record(path).with_context(|| format!("read record {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let summary = merge_session_records(&loaded, MergeOptions { include_aborted });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qapat_core::SessionState;

    const CATALOG: &str = r#"
[[metrics]]
metricId = "avgSpeed"
requiredChannels = ["speed"]
unit = "km/h"
rule = { kind = "mean" }
rubric = [
    { label = "Poor", to = 50.0 },
    { label = "Fair", from = 50.0, to = 80.0 },
    { label = "Good", from = 80.0 },
]
"#;

    fn write_fixture(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).expect("write fixture");
        path
    }

    #[test]
    fn test_validate_accepts_catalog() {
        let dir = tempfile::tempdir().expect("tempdir");
        let catalog = write_fixture(dir.path(), "catalog.toml", CATALOG);
        cmd_validate(&catalog).expect("validate");
    }

    #[test]
    fn test_read_drafts_reports_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_fixture(
            dir.path(),
            "drive.jsonl",
            "{\"channel\":\"speed\",\"value\":50}\n\nnot json\n",
        );
        let err = read_drafts(&path).unwrap_err();
        assert!(format!("{:#}", err).contains(":3: malformed observation"));
    }

    #[tokio::test]
    async fn test_run_then_merge() {
        let dir = tempfile::tempdir().expect("tempdir");
        let catalog = write_fixture(dir.path(), "catalog.toml", CATALOG);
        let a = write_fixture(
            dir.path(),
            "a.jsonl",
            concat!(
                "{\"channel\":\"speed\",\"value\":50,\"timestamp\":0}\n",
                "{\"channel\":\"speed\",\"value\":60,\"timestamp\":5000}\n",
                "{\"channel\":\"speed\",\"value\":55,\"timestamp\":10000}\n",
                "{\"channel\":\"rpm\",\"value\":3000,\"timestamp\":10000}\n",
            ),
        );
        let b = write_fixture(
            dir.path(),
            "b.jsonl",
            "{\"channel\":\"speed\",\"value\":90,\"timestamp\":0}\n",
        );
        let out = dir.path().join("out");

        let summaries = cmd_run(&catalog, &[a, b], "VIN-1", "driver-1", &out)
            .await
            .expect("run");
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].observations, 3);
        assert_eq!(summaries[0].rejected, 1);
        assert_eq!(summaries[0].aggregate_score, Some(0.5));
        assert_eq!(summaries[1].aggregate_score, Some(1.0));
        assert!(summaries[0].report_dir.join("report.md").exists());

        let record = read_session_record(&summaries[0].record).expect("record");
        assert_eq!(record.state, SessionState::Finished);

        let records: Vec<PathBuf> = summaries.iter().map(|s| s.record.clone()).collect();
        cmd_merge(&records, false).expect("merge");
    }
}
