use std::env;
use std::io;
use std::sync::OnceLock;

use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LogFormat;

static LOGGING_STATE: OnceLock<LogFormat> = OnceLock::new();

/// Errors that can arise while standing up structured logging.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid logging filter: {0}")]
    Filter(#[from] ParseError),
    #[error("failed to install logging subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the global stderr subscriber.
///
/// The first call wins; later calls return the format that was installed.
pub fn init_logging(format: LogFormat) -> Result<LogFormat, LoggingError> {
    if let Some(installed) = LOGGING_STATE.get() {
        return Ok(*installed);
    }

    install_logging(format)?;
    Ok(*LOGGING_STATE.get_or_init(|| format))
}

fn install_logging(format: LogFormat) -> Result<(), LoggingError> {
    let filter = build_filter()?;
    let registry = tracing_subscriber::registry().with(filter);

    let layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .event_format(
                tracing_subscriber::fmt::format()
                    .json()
                    .with_timer(UtcTime::rfc_3339())
                    .with_level(true)
                    .with_target(true),
            )
            .with_writer(io::stderr)
            .with_ansi(false)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .event_format(
                tracing_subscriber::fmt::format()
                    .with_timer(UtcTime::rfc_3339())
                    .with_level(true)
                    .with_target(false)
                    .with_ansi(false),
            )
            .with_writer(io::stderr)
            .with_ansi(false)
            .boxed(),
    };

    registry.with(layer).try_init()?;
    Ok(())
}

fn build_filter() -> Result<EnvFilter, ParseError> {
    if let Ok(spec) = env::var("GCE_SNAPSHOT_LOG") {
        if !spec.trim().is_empty() {
            return EnvFilter::try_new(spec);
        }
    }

    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new("info"),
    }
}
