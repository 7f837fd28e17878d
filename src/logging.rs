//! Logging setup with optional file rotation
//!
//! Events go to stderr, and optionally to a daily-rotated file. Either sink
//! can emit compact text or one JSON object per line.

use crate::config::LoggingConfig;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,

    /// Log to file
    pub file_path: Option<PathBuf>,

    /// Log to stderr
    pub stderr: bool,

    /// Emit JSON lines instead of text
    pub json: bool,

    /// Include thread IDs
    pub thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_path: None,
            stderr: true,
            json: false,
            thread_ids: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(rust_log) = std::env::var("RUST_LOG") {
            if let Some(level) = level_from_str(&rust_log) {
                config.level = level;
            }
        }

        if let Ok(log_file) = std::env::var("GRUENBECK_LOG_FILE") {
            config.file_path = Some(PathBuf::from(log_file));
        }

        if let Ok(log_stderr) = std::env::var("GRUENBECK_LOG_STDERR") {
            config.stderr = log_stderr.to_lowercase() != "false";
        }

        if let Ok(log_json) = std::env::var("GRUENBECK_LOG_JSON") {
            config.json = matches!(log_json.to_lowercase().as_str(), "1" | "true");
        }

        config
    }

    /// Build from the `[logging]` table of a poller configuration
    pub fn from_settings(settings: &LoggingConfig) -> Self {
        Self {
            level: level_from_str(&settings.level).unwrap_or(Level::INFO),
            file_path: settings.file.as_ref().map(PathBuf::from),
            json: settings.json_format,
            ..Self::default()
        }
    }
}

/// Most verbose level named in a filter string such as `gruenbeck=debug`
fn level_from_str(filter: &str) -> Option<Level> {
    let filter = filter.to_lowercase();
    [
        ("trace", Level::TRACE),
        ("debug", Level::DEBUG),
        ("info", Level::INFO),
        ("warn", Level::WARN),
        ("error", Level::ERROR),
    ]
    .into_iter()
    .find(|(name, _)| filter.contains(name))
    .map(|(_, level)| level)
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn output_layer<W>(writer: W, json: bool, ansi: bool, thread_ids: bool) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    if json {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_thread_ids(thread_ids)
            .boxed()
    } else {
        fmt::layer()
            .compact()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(true)
            .with_thread_ids(thread_ids)
            .boxed()
    }
}

/// Initialize logging with the given configuration
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.level.into())
        .from_env_lossy();

    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.stderr {
        layers.push(output_layer(
            std::io::stderr,
            config.json,
            true,
            config.thread_ids,
        ));
    }

    if let Some(file_path) = config.file_path {
        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let directory = file_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let file_name = file_path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("gruenbeck-poller.log"));
        let file_appender = tracing_appender::rolling::daily(directory, file_name);

        layers.push(output_layer(
            file_appender,
            config.json,
            false,
            config.thread_ids,
        ));
    }

    let subscriber = tracing_subscriber::registry()
        .with(layers)
        .with(env_filter);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}
