use std::fs::{File, OpenOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Output format of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            _ => Err(anyhow::anyhow!("Invalid log format: {s}")),
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the configured level. Session output owns stdout, so
/// logs go to stderr or to the configured file.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let format: LogFormat = config.format.parse()?;
    let filter = log_filter(&config.level)?;
    let (writer, ansi) = log_writer(config.file_path.as_deref().map(Path::new))?;

    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_line_number(true);
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(layer.json().with_current_span(true).with_file(true))
            .try_init()?,
        LogFormat::Pretty => registry.with(layer.with_file(false)).try_init()?,
    }
    Ok(())
}

fn log_filter(level: &str) -> anyhow::Result<EnvFilter> {
    let level = parse_log_level(level)?;
    Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase())))
}

/// Writer for log lines, and whether it should get ANSI colors.
fn log_writer(file_path: Option<&Path>) -> std::io::Result<(BoxMakeWriter, bool)> {
    match file_path {
        Some(path) => Ok((BoxMakeWriter::new(open_log_file(path)?), false)),
        None => Ok((BoxMakeWriter::new(std::io::stderr), true)),
    }
}

fn open_log_file(path: &Path) -> std::io::Result<Arc<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Arc::new(file))
}

/// Parse log level string to tracing Level
pub fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}
