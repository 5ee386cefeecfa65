//! Tracing subscriber setup.
//!
//! `RUST_LOG` overrides the default filter (`cart_cdc=info`).

use std::sync::Once;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines for terminals.
    #[default]
    Pretty,
    /// One JSON object per line for log shippers.
    Json,
}

static INIT_ONCE: Once = Once::new();

const DEFAULT_FILTER: &str = "cart_cdc=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(format: LogFormat) {
    INIT_ONCE.call_once(|| {
        // try_init: a test harness may already own the global subscriber
        let _ = match format {
            LogFormat::Pretty => tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .finish()
                .try_init(),
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(env_filter())
                .with_current_span(true)
                .finish()
                .try_init(),
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::ValueEnum;

    #[test]
    fn test_init_idempotent() {
        init(LogFormat::Json);
        init(LogFormat::Pretty);
        init(LogFormat::Json);
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!(LogFormat::from_str("json", true).unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("pretty", true).unwrap(), LogFormat::Pretty);
        assert!(LogFormat::from_str("xml", true).is_err());
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }
}
