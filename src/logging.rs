//! Logging initialization.
//!
//! Diagnostics go to stderr through `tracing-subscriber`. The filter comes
//! from `RUST_LOG` if set, else from `RUUVI_GATEWAY_LOG`, else a default that
//! depends on the display: the terminal board owns the screen, so only
//! warnings are printed next to it.

use crate::sink::DisplayMode;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Fallback variable for the log filter.
pub const LOG_ENV: &str = "RUUVI_GATEWAY_LOG";

fn fallback_directive(display: DisplayMode, configured: Option<String>) -> String {
    configured
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| match display {
            DisplayMode::Log => "info".to_string(),
            DisplayMode::Terminal => "warn".to_string(),
        })
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the filter from `RUUVI_GATEWAY_LOG` cannot be parsed.
pub fn init(display: DisplayMode) -> Result<(), ParseError> {
    let directive = fallback_directive(display, std::env::var(LOG_ENV).ok());
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&directive))?;

    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .init();

    Ok(())
}
