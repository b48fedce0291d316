//! Log output for the `qapat` binary.
//!
//! Session events go to stderr so that stdout stays free for the result
//! summaries `qapat run` and `qapat merge` print. Filtering comes from
//! `QAPAT_LOG`, then `RUST_LOG`, then [`default_directives`].

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "QAPAT_LOG";

/// Crates whose events follow the requested level. Everything else is
/// held at `warn`.
const QAPAT_TARGETS: &[&str] = &["qapat_core", "qapat"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line, for collecting session events off a rig.
    Json,
}

/// Directives used when neither environment variable is set.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(QAPAT_TARGETS.iter().map(|t| format!("{t}={level}")));
    directives.join(",")
}

fn filter_from_env(level: Level) -> EnvFilter {
    [LOG_ENV, EnvFilter::DEFAULT_ENV]
        .into_iter()
        .filter_map(|var| std::env::var(var).ok())
        .find_map(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directives(level)))
}

/// Install the global subscriber. Only the first call in a process has any
/// effect.
pub fn init_tracing(format: LogFormat, level: Level) {
    let filter = filter_from_env(level);
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
