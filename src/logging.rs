//! Logging capability injected into the solvers.
//!
//! The library never touches a global logger directly: every solver owns a
//! `FitLogger`. The binary plugs in `LogFacade` (the `log` crate, backed by
//! `flexi_logger`); library users can pass `SilentLogger` or their own sink.

use flexi_logger::{Logger, LoggerHandle};

use crate::error::AppError;

/// Log target used for all solver messages.
pub const LOG_TARGET: &str = "ime_inversion";

/// Minimal logging capability used by the solvers.
pub trait FitLogger {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

impl<T: FitLogger + ?Sized> FitLogger for &T {
    fn info(&self, message: &str) {
        (**self).info(message)
    }

    fn warn(&self, message: &str) {
        (**self).warn(message)
    }

    fn error(&self, message: &str) {
        (**self).error(message)
    }
}

/// Forwards to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFacade;

impl FitLogger for LogFacade {
    fn info(&self, message: &str) {
        log::info!(target: LOG_TARGET, "{message}");
    }

    fn warn(&self, message: &str) {
        log::warn!(target: LOG_TARGET, "{message}");
    }

    fn error(&self, message: &str) {
        log::error!(target: LOG_TARGET, "{message}");
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentLogger;

impl FitLogger for SilentLogger {
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

/// Start `flexi_logger` on stderr with the given level spec (e.g. `info`, `ime_inversion=debug`).
///
/// The returned handle must be kept alive for the duration of the program.
pub fn setup_logging(level: &str) -> Result<LoggerHandle, AppError> {
    Logger::try_with_str(level)
        .map_err(|e| AppError::new(2, format!("Invalid log level '{level}': {e}")))?
        .log_to_stderr()
        .format(flexi_logger::colored_default_format)
        .start()
        .map_err(|e| AppError::new(4, format!("Logger initialization failed: {e}")))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;

    use super::FitLogger;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Level {
        Info,
        Warn,
        Error,
    }

    /// Captures messages so tests can assert on warnings.
    #[derive(Debug, Default)]
    pub struct RecordingLogger {
        lines: RefCell<Vec<(Level, String)>>,
    }

    impl RecordingLogger {
        pub fn count(&self, level: Level) -> usize {
            self.lines.borrow().iter().filter(|(l, _)| *l == level).count()
        }

        pub fn contains(&self, level: Level, needle: &str) -> bool {
            self.lines
                .borrow()
                .iter()
                .any(|(l, m)| *l == level && m.contains(needle))
        }
    }

    impl FitLogger for RecordingLogger {
        fn info(&self, message: &str) {
            self.lines.borrow_mut().push((Level::Info, message.to_string()));
        }

        fn warn(&self, message: &str) {
            self.lines.borrow_mut().push((Level::Warn, message.to_string()));
        }

        fn error(&self, message: &str) {
            self.lines.borrow_mut().push((Level::Error, message.to_string()));
        }
    }
}
