//! Tracing/logging initialization.
//!
//! `RUST_LOG` wins over the configured filter so operators can raise the
//! level of a single module without touching the config file.

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingOptions {
    /// Default filter directive, e.g. `"info"` or `"mtp_infra=debug,info"`.
    pub filter: String,
    /// JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

fn filter(options: &TracingOptions) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&options.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(options: &TracingOptions) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(options))
        .with_target(false);

    let _ = if options.json {
        builder
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .try_init()
    } else {
        builder.try_init()
    };
}
