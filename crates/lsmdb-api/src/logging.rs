//! Logging for lsmdb
//!
//! Everything in the workspace logs through `tracing`. [`LogConfig`] installs
//! a global subscriber (stdout, daily rolling file, or both), and
//! [`tracing_logger`] turns engine log callbacks into `tracing` events.

use lsmdb_core::{Error, LogCallback, Result, Status};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output destination
#[derive(Debug, Clone)]
pub enum LogOutput {
    /// Output to stdout
    Stdout,
    /// Output to a daily rolling file
    File(PathBuf),
    /// Output to both stdout and file
    Both(PathBuf),
}

/// Log format style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line human readable output
    Pretty,
    /// Compact single-line format
    Compact,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `lsmdb_storage=debug`
    pub level: String,
    /// Output destination
    pub output: LogOutput,
    /// Format style
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Stdout,
            format: LogFormat::Pretty,
        }
    }
}

impl LogConfig {
    /// Info level on stdout
    pub fn info() -> Self {
        Self::default()
    }

    /// Debug level on stdout; shows flushes, merges and recovery counts
    pub fn debug() -> Self {
        Self::default().with_level("debug")
    }

    /// Warn level on stdout; only failures swallowed by destructors and recovery problems
    pub fn warn() -> Self {
        Self::default().with_level("warn")
    }

    /// Log to a daily rolling file at `path`
    pub fn with_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = LogOutput::File(path.into());
        self
    }

    /// Log to stdout and a daily rolling file at `path`
    pub fn with_both<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = LogOutput::Both(path.into());
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level<S: Into<String>>(mut self, level: S) -> Self {
        self.level = level.into();
        self
    }

    fn filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .map_err(|e| Error::config(format!("invalid log level {:?}: {}", self.level, e)))
    }

    /// Install the global subscriber.
    ///
    /// File output returns a guard that must stay alive for buffered lines
    /// to reach the file. Fails if the level does not parse or a global
    /// subscriber is already installed.
    ///
    /// ```rust,no_run
    /// use lsmdb::logging::LogConfig;
    ///
    /// let _guard = LogConfig::debug().init()?;
    /// # Ok::<(), lsmdb::Error>(())
    /// ```
    pub fn init(self) -> Result<Option<WorkerGuard>> {
        let env_filter = self.filter()?;
        let registry = tracing_subscriber::registry().with(env_filter);

        let installed = match &self.output {
            LogOutput::Stdout => {
                let result = match self.format {
                    LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
                    LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
                };
                result.map(|_| None)
            }
            LogOutput::File(path) => {
                let (writer, guard) = tracing_appender::non_blocking(rolling_file(path));
                let result = match self.format {
                    LogFormat::Pretty => registry
                        .with(fmt::layer().with_writer(writer).pretty())
                        .try_init(),
                    LogFormat::Compact => registry
                        .with(fmt::layer().with_writer(writer).compact())
                        .try_init(),
                };
                result.map(|_| Some(guard))
            }
            LogOutput::Both(path) => {
                let (writer, guard) = tracing_appender::non_blocking(rolling_file(path));
                registry
                    .with(fmt::layer().compact())
                    .with(fmt::layer().with_writer(writer).compact())
                    .try_init()
                    .map(|_| Some(guard))
            }
        };
        installed.map_err(|e| Error::config(format!("logging already initialised: {}", e)))
    }
}

fn rolling_file(path: &Path) -> tracing_appender::rolling::RollingFileAppender {
    tracing_appender::rolling::daily(
        path.parent().unwrap_or_else(|| Path::new(".")),
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("lsmdb.log"),
    )
}

/// Engine log callback that forwards to `tracing`: failures at `warn`,
/// progress at `debug`.
pub fn tracing_logger() -> LogCallback {
    Arc::new(|message: &str, status: Option<Status>| match status {
        Some(status) => tracing::warn!(target: "lsmdb::engine", ?status, "{}", message),
        None => tracing::debug!(target: "lsmdb::engine", "{}", message),
    })
}
