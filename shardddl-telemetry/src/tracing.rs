use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

static INIT_TEST: Once = Once::new();

/// Output format of the log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, for log shipping.
    Json,
    /// Human readable multi-line output.
    #[default]
    Pretty,
}

/// Installs the global tracing subscriber.
///
/// Levels come from `RUST_LOG` (e.g. `shardddl=debug`) and default to `info`. Safe to call
/// multiple times; only the first call installs a subscriber.
pub fn init_tracing(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let registry = tracing_subscriber::registry().with(env_filter);
        let result = match format {
            LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
            LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        };

        if let Err(err) = result {
            eprintln!("failed to install tracing subscriber: {err}");
        }
    });
}

/// Installs a subscriber writing through the test harness so output is captured per test.
///
/// Logging stays silent unless `RUST_LOG` is set, which keeps test output readable while still
/// allowing `RUST_LOG=shardddl=debug cargo test` when investigating a failure.
pub fn init_test_tracing() {
    INIT_TEST.call_once(|| {
        let Ok(env_filter) = EnvFilter::try_from_default_env() else {
            return;
        };

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}
