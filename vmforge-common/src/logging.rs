//! Logging initialization using tracing.

use anyhow::Result;
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable output with source locations.
    #[default]
    Text,
    /// JSON output, for environments with log aggregation.
    Json,
}

/// Initialize the global tracing subscriber.
///
/// `level` is the fallback directive; a `RUST_LOG` environment variable
/// takes precedence when set. Call once per process.
///
/// # Example
/// ```
/// use vmforge_common::{init_logging, LogFormat};
///
/// init_logging("info", LogFormat::Text).unwrap();
/// ```
pub fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init(),
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).init(),
    }

    debug!(level = %level, format = ?format, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_format_is_the_default() {
        assert_eq!(LogFormat::default(), LogFormat::Text);
    }

    #[test]
    fn init_succeeds_once_per_process() {
        init_logging("debug", LogFormat::Json).unwrap();
    }
}
