//! Strategy-facing logger.
//!
//! Every line is written as `[LEVEL] message` and flushed immediately so the
//! host process can stream strategy output. Each line is mirrored as a
//! `tracing` event under the `strategy` target.

use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Where strategy log lines go.
#[derive(Debug, Clone, Default)]
pub enum LogSink {
    #[default]
    Stdout,
    /// Collect lines in memory (tests, backtests that capture output).
    Buffer(Arc<Mutex<Vec<String>>>),
    /// Only emit the `tracing` mirror.
    Discard,
}

impl LogSink {
    pub fn buffer() -> (Self, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        (LogSink::Buffer(Arc::clone(&lines)), lines)
    }
}

#[derive(Debug, Clone)]
pub struct StrategyLog {
    strategy: String,
    sink: LogSink,
}

impl StrategyLog {
    pub fn new(strategy: impl Into<String>, sink: LogSink) -> Self {
        Self { strategy: strategy.into(), sink }
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        self.write(LogLevel::Debug, msg.as_ref());
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.write(LogLevel::Info, msg.as_ref());
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.write(LogLevel::Warn, msg.as_ref());
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        self.write(LogLevel::Error, msg.as_ref());
    }

    /// Accepted for compatibility with strategies that tune verbosity; all
    /// levels are always emitted.
    pub fn set_level(&self, module: &str, level: &str) {
        tracing::debug!(target: "strategy", strategy = %self.strategy, module, level, "set_level ignored");
    }

    pub fn write(&self, level: LogLevel, msg: &str) {
        let line = format!("[{level}] {msg}");
        match &self.sink {
            LogSink::Stdout => {
                let mut out = std::io::stdout().lock();
                // A closed stdout must not fail the strategy.
                let _ = writeln!(out, "{line}");
                let _ = out.flush();
            }
            LogSink::Buffer(lines) => {
                lines.lock().unwrap_or_else(PoisonError::into_inner).push(line);
            }
            LogSink::Discard => {}
        }
        match level {
            LogLevel::Debug => tracing::debug!(target: "strategy", strategy = %self.strategy, "{msg}"),
            LogLevel::Info => tracing::info!(target: "strategy", strategy = %self.strategy, "{msg}"),
            LogLevel::Warn => tracing::warn!(target: "strategy", strategy = %self.strategy, "{msg}"),
            LogLevel::Error => tracing::error!(target: "strategy", strategy = %self.strategy, "{msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_level_prefixed() {
        let (sink, lines) = LogSink::buffer();
        let log = StrategyLog::new("demo", sink);
        log.info("hello");
        log.warn("careful");
        log.error("bad");
        log.debug("detail");
        let lines = lines.lock().unwrap();
        assert_eq!(
            *lines,
            vec!["[INFO] hello", "[WARN] careful", "[ERROR] bad", "[DEBUG] detail"]
        );
    }

    #[test]
    fn set_level_does_not_filter() {
        let (sink, lines) = LogSink::buffer();
        let log = StrategyLog::new("demo", sink);
        log.set_level("order", "error");
        log.debug("still here");
        assert_eq!(lines.lock().unwrap().len(), 1);
    }
}
