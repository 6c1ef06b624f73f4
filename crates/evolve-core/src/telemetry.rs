//! Tracing initialisation for the `evolve` binary and test harnesses.
//!
//! [`init_tracing`] installs the global subscriber with an `EnvFilter`
//! and optional JSON formatting. Later calls are ignored.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "EVOLVE_LOG";

/// Targets logged at the requested level; everything else (HTTP client,
/// runtime) stays at `warn`.
const ENGINE_TARGETS: [&str; 2] = ["evolve_core", "evolve"];

/// Default directives when neither `EVOLVE_LOG` nor `RUST_LOG` is set.
pub fn default_directives(level: Level) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(
        ENGINE_TARGETS
            .iter()
            .map(|target| format!("{target}={}", level.as_str().to_ascii_lowercase())),
    );
    directives.join(",")
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Initialise the global tracing subscriber.
///
/// * `json` emits newline-delimited JSON records, one per event, with the
///   run span's `run_id` and `environment` attached.
/// * `level` applies to the engine's own targets when no filter variable
///   is set.
pub fn init_tracing(json: bool, level: Level) {
    let registry = tracing_subscriber::registry().with(env_filter(level));
    if json {
        registry
            .with(fmt::layer().with_target(false).json().with_current_span(true))
            .try_init()
            .ok();
    } else {
        registry
            .with(fmt::layer().with_target(false).compact())
            .try_init()
            .ok();
    }
}
