//! Tracing subscriber setup for the `tails` binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- filter used when `RUST_LOG` is not set
///   (e.g. `"tails_server=info,tails_core=info"`).
/// * `log_json` -- emit one JSON object per log line instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(env_filter);
    if log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Default filter for a log level name: the workspace crates at `level`,
/// everything else at `warn`.
pub fn default_filter(level: &str) -> String {
    format!("warn,tails_core={level},tails_server={level},tails={level}")
}
