//! Tracing setup for the dashboard client.
//!
//! The embedding application calls [`init_logging`] once at startup. The
//! configured level is a default only; `RUST_LOG` overrides it at runtime.

use std::str::FromStr;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Output encoding for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    /// Machine-readable, for shipping to a log collector.
    Json,
    /// Human-readable, for a developer console.
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(anyhow::anyhow!("Unknown log format: {other}")),
        }
    }
}

/// Install the global tracing subscriber from [`LoggingConfig`].
///
/// With `file_path` set, output is appended to that file instead of
/// stderr.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let format: LogFormat = config.format.parse()?;
    let level = Level::from_str(&config.level)
        .map_err(|_| anyhow::anyhow!("Invalid log level: {}", config.level))?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let writer = match &config.file_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_writer(writer))
            .init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty().with_writer(writer)).init(),
    }
    Ok(())
}
