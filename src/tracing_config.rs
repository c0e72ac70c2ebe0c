//! Tracing initialisation.
//!
//! Sets up `tracing-subscriber` from the `[logging]` section:
//! - Environment-based filtering (`RUST_LOG` wins over the configured level)
//! - Pretty, compact or JSON output on stdout
//! - Optional second output to a log file (always compact, no colors)
//!
//! Driver crates emit low-level protocol chatter through the `log` crate;
//! the subscriber's `log` bridge forwards those records as tracing events.
//!
//! # Example
//! ```no_run
//! use tosca::{config::AppConfig, tracing_config};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = AppConfig::load()?;
//! tracing_config::init_from_config(&config)?;
//! tracing::info!("workstation starting");
//! # Ok(())
//! # }
//! ```

use crate::config::{AppConfig, LogFormat, LoggingConfig};
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub level: Level,
    pub format: LogFormat,
    /// Extra output file
    pub file: Option<PathBuf>,
    /// Whether to log span close events with timings
    pub with_span_events: bool,
    pub with_file_and_line: bool,
    pub with_thread_names: bool,
    /// ANSI colors (pretty format on stdout only)
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            file: None,
            with_span_events: false,
            with_file_and_line: true,
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn from_logging(logging: &LoggingConfig) -> Result<Self> {
        Ok(Self {
            level: parse_log_level(&logging.level)?,
            format: logging.format,
            file: logging.file.clone(),
            ..Default::default()
        })
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, file: Option<PathBuf>) -> Self {
        self.file = file;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str().to_ascii_lowercase()))
    }

    fn span_events(&self) -> FmtSpan {
        if self.with_span_events {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    fn stdout_layer(&self) -> BoxedLayer {
        let base = fmt::layer()
            .with_span_events(self.span_events())
            .with_file(self.with_file_and_line)
            .with_line_number(self.with_file_and_line)
            .with_thread_names(self.with_thread_names);

        match self.format {
            LogFormat::Pretty => base
                .pretty()
                .with_ansi(self.with_ansi)
                .with_filter(self.filter())
                .boxed(),
            LogFormat::Compact => base
                .compact()
                .with_ansi(false)
                .with_filter(self.filter())
                .boxed(),
            LogFormat::Json => base.json().with_filter(self.filter()).boxed(),
        }
    }

    fn file_layer(&self) -> Result<Option<BoxedLayer>> {
        let Some(path) = &self.file else {
            return Ok(None);
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create log directory {}", parent.display()))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot open log file {}", path.display()))?;

        let layer = fmt::layer()
            .compact()
            .with_ansi(false)
            .with_span_events(self.span_events())
            .with_writer(Arc::new(file))
            .with_filter(self.filter())
            .boxed();
        Ok(Some(layer))
    }
}

/// Initialize tracing from the `[logging]` section.
pub fn init_from_config(config: &AppConfig) -> Result<()> {
    init(TracingConfig::from_logging(&config.logging)?)
}

/// Install the global subscriber.
///
/// Idempotent: if a subscriber is already installed (tests, embedding
/// applications) this returns `Ok(())` and leaves it in place.
pub fn init(config: TracingConfig) -> Result<()> {
    let mut layers = vec![config.stdout_layer()];
    if let Some(file) = config.file_layer()? {
        layers.push(file);
    }

    if let Err(e) = tracing_subscriber::registry().with(layers).try_init() {
        tracing::debug!("tracing already initialised: {}", e);
    }
    Ok(())
}

/// Parse a log level name, case-insensitively.
pub fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow!(
            "invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_log_level("Debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARNING").unwrap(), Level::WARN);
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_from_logging_section() {
        let logging = LoggingConfig {
            level: "debug".into(),
            format: LogFormat::Json,
            file: Some(PathBuf::from("logs/tosca.log")),
        };
        let config = TracingConfig::from_logging(&logging).unwrap();
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file, Some(PathBuf::from("logs/tosca.log")));
    }

    #[test]
    fn test_builder() {
        let config = TracingConfig::new(Level::WARN)
            .with_format(LogFormat::Compact)
            .with_span_events(true)
            .with_ansi(false)
            .with_file(None);
        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, LogFormat::Compact);
        assert!(config.with_span_events);
        assert!(!config.with_ansi);
    }
}
