//! Engine configuration, loadable from TOML.
//!
//! ```toml
//! schedule_tolerance_minutes = 30
//! default_timeout_secs = 5.0
//! calendar_path = "calendar.json"
//! idempotency_cache_size = 512
//! log_to_stdout = true
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exec::timeout_duration;
use crate::log::LogSink;
use crate::scheduler::{schedule_tolerance, TradeCalendar};

/// Upper bound for a fixed schedule tolerance: one week.
pub const MAX_SCHEDULE_TOLERANCE_MINUTES: i64 = 7 * 24 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed due window for scheduled tasks. Unset: one bar of the request's
    /// timeframe, capped at 24h.
    pub schedule_tolerance_minutes: Option<i64>,
    /// Timeout for requests that carry no `max_timeout`.
    pub default_timeout_secs: Option<f64>,
    /// Holiday calendar JSON merged over the builtin tables. A file that
    /// fails to load is logged and ignored.
    pub calendar_path: Option<PathBuf>,
    /// Responses remembered per (account, strategy) for exec id idempotency.
    pub idempotency_cache_size: usize,
    /// Write strategy log lines to stdout.
    pub log_to_stdout: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schedule_tolerance_minutes: None,
            default_timeout_secs: None,
            calendar_path: None,
            idempotency_cache_size: 256,
            log_to_stdout: true,
        }
    }
}

impl EngineConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(m) = self.schedule_tolerance_minutes {
            if !(1..=MAX_SCHEDULE_TOLERANCE_MINUTES).contains(&m) {
                return Err(ConfigError::Invalid(format!(
                    "schedule_tolerance_minutes must be in 1..={MAX_SCHEDULE_TOLERANCE_MINUTES}, got {m}"
                )));
            }
        }
        if let Some(t) = self.default_timeout_secs {
            if timeout_duration(t).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "default_timeout_secs must be a positive, representable number of seconds, got {t}"
                )));
            }
        }
        Ok(())
    }

    /// Due window for a request whose primary timeframe is `timeframe`.
    /// A fixed tolerance is clamped to `1..=MAX_SCHEDULE_TOLERANCE_MINUTES`
    /// for configs built without [`validate`](Self::validate).
    pub fn tolerance_for(&self, timeframe: Option<&str>) -> Duration {
        match self.schedule_tolerance_minutes {
            Some(m) => Duration::try_minutes(m.clamp(1, MAX_SCHEDULE_TOLERANCE_MINUTES))
                .unwrap_or_else(|| schedule_tolerance(timeframe)),
            None => schedule_tolerance(timeframe),
        }
    }

    pub fn load_calendar(&self) -> Arc<TradeCalendar> {
        Arc::new(TradeCalendar::load_or_builtin(self.calendar_path.as_deref()))
    }

    pub fn log_sink(&self) -> LogSink {
        if self.log_to_stdout {
            LogSink::Stdout
        } else {
            LogSink::Discard
        }
    }
}
