//! Terminal and file logging for a controller run.

use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
    sync::{Mutex, OnceLock},
};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::controller::ControllerConfig;
use crate::error::{Error, Result};

type FileLayer = fmt::Layer<
    Registry,
    fmt::format::DefaultFields,
    fmt::format::Format<fmt::format::Full, fmt::time::ChronoUtc>,
    NonBlocking,
>;

/// Global root logger.
static LOGGING_GUARDS: OnceLock<LoggingGuards> = OnceLock::new();

/// Logger thread handles, which must be kept alive for as long as the logging targets will be used.
/// Flushed automatically when dropped.
pub struct LoggingGuards {
    _stdout: Mutex<WorkerGuard>,
    _file: Option<Mutex<WorkerGuard>>,

    /// Where the file logger writes, if enabled
    log_path: Option<PathBuf>,
}

impl LoggingGuards {
    /// Path of the log file, if file logging is enabled
    pub fn log_path(&self) -> Option<&PathBuf> {
        self.log_path.as_ref()
    }
}

/// Build a formatted file logger on top of a thread-safe nonblocking writer.
fn build_file_layer(file_writer: NonBlocking) -> FileLayer {
    fmt::layer::<Registry>()
        .with_timer(fmt::time::ChronoUtc::rfc_3339())
        .with_writer(file_writer)
        .with_ansi(false)
}

/// Set up terminal logging, plus file logging at `{log_dir}/{op_name}.log`
/// if the config names a log directory.
///
/// Only the first call installs the global logger; later calls return the
/// guards from the first.
pub fn init_logging(config: &ControllerConfig) -> Result<&'static LoggingGuards> {
    if let Some(guards) = LOGGING_GUARDS.get() {
        return Ok(guards);
    }

    // Build file writer
    let (file_layer, file_guard, log_path) = match &config.log_dir {
        Some(log_dir) => {
            fs::create_dir_all(log_dir)
                .map_err(|e| Error::Config(format!("Failed to create log directory: {e}")))?;
            let log_path = log_dir.join(format!("{}.log", config.op_name));
            let logfile = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .map_err(|e| Error::Config(format!("Failed to create log file: {e}")))?;
            let (file_writer, file_guard) = tracing_appender::non_blocking(logfile);
            (
                Some(build_file_layer(file_writer)),
                Some(Mutex::new(file_guard)),
                Some(log_path),
            )
        }
        None => (None, None, None),
    };

    // Build terminal writer
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    // Filter for log level
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| Error::Config(format!("Failed to set up logging env filter: {e}")))?;

    // Formatting for terminal logger
    let stdout_layer = fmt::layer()
        .with_timer(fmt::time::ChronoUtc::rfc_3339())
        .with_writer(stdout_writer)
        .with_target(false);

    // Set up global root logger
    tracing_subscriber::registry()
        .with(file_layer)
        .with(env_filter)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {e}")))?;

    Ok(LOGGING_GUARDS.get_or_init(|| LoggingGuards {
        _stdout: Mutex::new(stdout_guard),
        _file: file_guard,
        log_path,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_returns_existing_guards() {
        let log_dir = std::env::temp_dir().join(format!("trellis-logs-{}", std::process::id()));
        let config = ControllerConfig::default().with_log_dir(Some(log_dir.clone()));
        let first = init_logging(&config).unwrap();
        let expected = log_dir.join(format!("{}.log", config.op_name));
        assert_eq!(first.log_path(), Some(&expected));
        assert!(expected.exists());

        let second = init_logging(&ControllerConfig::default()).unwrap();
        assert!(std::ptr::eq(first, second));
    }
}
