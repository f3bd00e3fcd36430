//! # noteweb-logging
//!
//! Installs the process-wide `tracing` subscriber.
//!
//! `RUST_LOG` wins over the configured level so a single run can be made
//! verbose without editing the settings file.

#![deny(unsafe_code)]

use noteweb_settings::LoggingSettings;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Output format of the stdout layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, one line per event.
    Text,
    /// JSON lines with span context.
    Json,
}

impl LogFormat {
    /// Pick the format from settings.
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        if settings.json { Self::Json } else { Self::Text }
    }
}

/// Build the env filter: `RUST_LOG` if set and valid, else `default_level`.
///
/// An unparsable `default_level` falls back to `info`.
pub fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Returns `false` if a subscriber was already installed (e.g. by a test
/// harness); the existing one is kept.
pub fn init_subscriber(settings: &LoggingSettings) -> bool {
    let filter = build_filter(&settings.level);
    let installed = match LogFormat::from_settings(settings) {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_span_list(true),
            )
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
    };
    installed.is_ok()
}
