//! Diagnostic logging.
//!
//! Library entry points take an optional [slog::Logger] and fall back to a
//! discarding one. The command line front end builds a terminal logger with
//! [terminal].

use crate::config::LogLevel;
use slog::{o, Discard, Level, Logger};

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Level {
        match level {
            LogLevel::Critical => Level::Critical,
            LogLevel::Error => Level::Error,
            LogLevel::Warning => Level::Warning,
            LogLevel::Info => Level::Info,
            LogLevel::Debug => Level::Debug,
            LogLevel::Trace => Level::Trace,
        }
    }
}

/// A logger that drops every record.
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}

/// Use `logger` if given, otherwise a discarding logger.
pub fn resolve<L: Into<Option<Logger>>>(logger: L) -> Logger {
    logger.into().unwrap_or_else(discard)
}

/// A logger writing to stderr, filtered at `level`.
#[cfg(feature = "cli")]
pub fn terminal(level: LogLevel) -> Logger {
    use slog::Drain;
    use slog_term::{FullFormat, TermDecorator};

    let decorator = TermDecorator::new().stderr().build();
    let drain = FullFormat::new(decorator).build().fuse();
    let drain = slog::LevelFilter::new(drain, level.into()).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!())
}
