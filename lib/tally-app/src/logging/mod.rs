//! Logging.

use tally_error::GenericError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::Layer as FmtLayer, layer::SubscriberExt as _, util::SubscriberInitExt as _, Layer};

mod config;
pub use self::config::LoggingConfiguration;

/// Keeps the non-blocking log writer alive.
///
/// Must be held until the process is about to exit so that buffered log lines are flushed.
pub struct LoggingGuard {
    _worker_guard: WorkerGuard,
}

/// Logs a message to standard error and exits the process with a non-zero exit code.
pub fn fatal_and_exit(message: String) -> ! {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

/// Initializes the logging subsystem for `tracing`.
///
/// Log lines are written to standard output through a non-blocking writer, filtered by the configured log level, and
/// formatted either as JSON (one object per event, fields flattened) or as human-readable text.
///
/// # Errors
///
/// If the logging subsystem was already initialized, an error will be returned.
pub fn initialize_logging(config: &LoggingConfiguration) -> Result<LoggingGuard, GenericError> {
    let (writer, worker_guard) = tracing_appender::non_blocking(std::io::stdout());

    let formatting_layer = if config.log_format_json {
        FmtLayer::new()
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(writer)
            .boxed()
    } else {
        FmtLayer::new().with_target(false).with_writer(writer).boxed()
    };

    tracing_subscriber::registry()
        .with(formatting_layer.with_filter(config.log_level.as_env_filter()))
        .try_init()?;

    Ok(LoggingGuard {
        _worker_guard: worker_guard,
    })
}
