//! Structured logging setup on top of `tracing-subscriber`.

use std::fs::OpenOptions;
use std::io;
use std::sync::Arc;

use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` takes precedence over `config.log_level`. Console and file output
/// can be combined; enabling neither is a `ConfigError`, as is installing twice.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let writer = make_writer(config)?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(config.log_to_console && !config.log_to_file)
        .with_writer(writer);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))?;
    tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}

fn make_writer(config: &LoggingConfig) -> Result<BoxMakeWriter> {
    let file = if config.log_to_file {
        let path = config.log_file_path.as_deref().ok_or_else(|| {
            ProtocolError::ConfigError(
                "log_file_path must be specified when log_to_file is true".into(),
            )
        })?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                ProtocolError::ConfigError(format!("Failed to open log file '{path}': {e}"))
            })?;
        Some(Arc::new(file))
    } else {
        None
    };

    match (config.log_to_console, file) {
        (true, Some(file)) => Ok(BoxMakeWriter::new(io::stdout.and(file))),
        (true, None) => Ok(BoxMakeWriter::new(io::stdout)),
        (false, Some(file)) => Ok(BoxMakeWriter::new(file)),
        (false, None) => Err(ProtocolError::ConfigError(
            "At least one logging output (console or file) must be enabled".into(),
        )),
    }
}
