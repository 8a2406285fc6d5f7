//! Structured logging for airtrack
//!
//! Library code only emits `tracing` events. Binaries call
//! [`init_logging`] once at startup to install a subscriber:
//!
//! ```ignore
//! use airtrack_core::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::default())?;
//! ```
//!
//! # Fields
//!
//! Events use these names consistently:
//! - `root`, `element`, `vector`, `parent`, `child`: element handles
//! - `field`: dotted field name
//! - `value`, `timestamp`, `outcome`: RRD ingest

pub use crate::config::LogFormat;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Global flag to track if logging has been initialized
static LOGGING_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error).
    /// `RUST_LOG` overrides it.
    pub level: String,

    /// Output format (pretty or json)
    pub format: LogFormat,

    /// Optional log file, appended to alongside stderr
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// Error type for logging initialization
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("failed to create log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

fn open_log_file(path: &std::path::Path) -> io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// One output in the chosen format. JSON events are flattened so RRD
/// fields such as `outcome` sit at the top level of each line.
fn format_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_target(true);
    match format {
        LogFormat::Pretty => layer.with_ansi(ansi).boxed(),
        LogFormat::Json => layer
            .json()
            .with_timer(SystemTime)
            .with_current_span(true)
            .with_span_list(false)
            .flatten_event(true)
            .boxed(),
    }
}

/// Initialize the global logging subscriber
///
/// Call once at startup. Later calls return
/// `Err(LogError::AlreadyInitialized)`.
///
/// `RUST_LOG` overrides the configured level, e.g.
/// `RUST_LOG=airtrack_core::rrd=debug`.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if is_logging_initialized() {
        return Err(LogError::AlreadyInitialized);
    }

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|_| LogError::InvalidLevel(config.level.clone()))?,
    };

    let mut layers = vec![format_layer(config.format, io::stderr, true)];
    if let Some(path) = config.file.as_deref() {
        let file = open_log_file(path)?;
        layers.push(format_layer(config.format, Mutex::new(file), false));
    }
    let subscriber = tracing_subscriber::registry().with(layers).with(env_filter);
    tracing::subscriber::set_global_default(subscriber)?;

    let _ = LOGGING_INITIALIZED.set(true);

    tracing::info!(
        log_level = %config.level,
        log_format = %config.format,
        log_file = ?config.file,
        "Logging initialized"
    );

    Ok(())
}

/// Check if logging has been initialized
#[must_use]
pub fn is_logging_initialized() -> bool {
    LOGGING_INITIALIZED.get().is_some()
}
