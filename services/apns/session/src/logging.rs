//! Log and invalid-token capabilities injected into a client.
//!
//! Every client message is emitted through `tracing`. When a [`LogSink`] is installed
//! (or [`Behavior::LOG_STDERR`] is set) the message is mirrored there too, provided its
//! level passes the client's [`LogLevel`] filter.

use bitflags::bitflags;
use std::fmt;
use std::sync::Arc;

bitflags! {
    /// Log level filter bitmask
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LogLevel: u16 {
        /// Progress messages
        const INFO = 1 << 0;
        /// Failures
        const ERROR = 1 << 1;
        /// Socket-level detail
        const DEBUG = 1 << 2;
    }
}

bitflags! {
    /// Client behavior options
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Behavior: u32 {
        /// Reconnect and resume a batch after a recoverable error
        const RECONNECT = 1 << 0;
        /// Mirror client log messages to standard error
        const LOG_STDERR = 1 << 1;
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::ERROR
    }
}

impl Default for Behavior {
    fn default() -> Self {
        Behavior::empty()
    }
}

impl LogLevel {
    /// Short tag used by [`StderrSink`]
    pub fn short_name(&self) -> &'static str {
        if self.contains(LogLevel::ERROR) {
            "err"
        } else if self.contains(LogLevel::DEBUG) {
            "dbg"
        } else {
            "inf"
        }
    }
}

/// Destination for client log messages
pub trait LogSink: Send + Sync {
    /// Receive one formatted message at a single level
    fn log(&self, level: LogLevel, message: &str);
}

/// Receives tokens the gateway rejected during a send
pub trait InvalidTokenNotifier: Send + Sync {
    /// Called once per rejected token with its index in the batch
    fn invalid_token(&self, token: &str, index: usize);
}

impl<F> LogSink for F
where
    F: Fn(LogLevel, &str) + Send + Sync,
{
    fn log(&self, level: LogLevel, message: &str) {
        self(level, message)
    }
}

impl<F> InvalidTokenNotifier for F
where
    F: Fn(&str, usize) + Send + Sync,
{
    fn invalid_token(&self, token: &str, index: usize) {
        self(token, index)
    }
}

/// Writes `[inf] message` lines to standard error
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl LogSink for StderrSink {
    fn log(&self, level: LogLevel, message: &str) {
        eprintln!("[{}] {}", level.short_name(), message);
    }
}

/// Per-client logger combining the filter, the sink and `tracing`
#[derive(Clone, Default)]
pub(crate) struct ClientLog {
    pub(crate) level: LogLevel,
    pub(crate) behavior: Behavior,
    pub(crate) sink: Option<Arc<dyn LogSink>>,
}

impl ClientLog {
    pub(crate) fn info(&self, args: fmt::Arguments<'_>) {
        tracing::info!("{}", args);
        self.mirror(LogLevel::INFO, args);
    }

    pub(crate) fn error(&self, args: fmt::Arguments<'_>) {
        tracing::error!("{}", args);
        self.mirror(LogLevel::ERROR, args);
    }

    pub(crate) fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!("{}", args);
        self.mirror(LogLevel::DEBUG, args);
    }

    fn mirror(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        if !self.level.contains(level) {
            return;
        }
        let to_stderr = self.behavior.contains(Behavior::LOG_STDERR);
        if self.sink.is_none() && !to_stderr {
            return;
        }

        let message = args.to_string();
        if let Some(sink) = &self.sink {
            sink.log(level, &message);
        }
        if to_stderr {
            StderrSink.log(level, &message);
        }
    }
}

impl fmt::Debug for ClientLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientLog")
            .field("level", &self.level)
            .field("behavior", &self.behavior)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_filter_applies_to_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let log = ClientLog {
            level: LogLevel::ERROR | LogLevel::INFO,
            behavior: Behavior::empty(),
            sink: Some(Arc::new(move |level: LogLevel, message: &str| {
                captured.lock().unwrap().push((level, message.to_string()));
            })),
        };

        log.info(format_args!("connecting to {}", "gateway"));
        log.debug(format_args!("select() returned {}", 1));
        log.error(format_args!("failed"));

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (LogLevel::INFO, "connecting to gateway".to_string()),
                (LogLevel::ERROR, "failed".to_string()),
            ]
        );
    }

    #[test]
    fn test_level_names() {
        assert_eq!(LogLevel::INFO.short_name(), "inf");
        assert_eq!(LogLevel::ERROR.short_name(), "err");
        assert_eq!(LogLevel::DEBUG.short_name(), "dbg");
        assert_eq!(LogLevel::default(), LogLevel::ERROR);
    }
}
