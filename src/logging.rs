//! # Structured Logging Module
//!
//! Environment-aware tracing setup for debugging concurrent step execution.
//! Embedding applications that install their own subscriber can skip this
//! entirely; initialization here never clobbers an existing one.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process.
///
/// The filter comes from `STEPLINE_LOG` (standard `EnvFilter` syntax) and
/// falls back to an environment-based default: `info` in production, `debug`
/// everywhere else. `STEPLINE_LOG_FORMAT=json` switches to JSON lines for
/// container log pipelines.
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_env("STEPLINE_LOG")
            .unwrap_or_else(|_| EnvFilter::new(default_log_level()));

        let json_output = std::env::var("STEPLINE_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        // Use try_init to avoid panic if a global subscriber already exists.
        let installed = if json_output {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true)
                        .with_ansi(false)
                        .with_filter(filter),
                )
                .try_init()
                .is_ok()
        } else {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_level(true)
                        .with_filter(filter),
                )
                .try_init()
                .is_ok()
        };

        if installed {
            tracing::debug!(json = json_output, "🔧 structured logging initialized");
        }
    });
}

/// Get current environment from environment variables
fn environment() -> String {
    std::env::var("STEPLINE_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn default_log_level() -> String {
    match environment().as_str() {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}
