//! Construction-time configuration for the pipeline.

use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Delay between two consecutive periodic exports (milliseconds).
pub const OTEL_BSP_SCHEDULE_DELAY: &str = "OTEL_BSP_SCHEDULE_DELAY";
/// Maximum queue size.
pub const OTEL_BSP_MAX_QUEUE_SIZE: &str = "OTEL_BSP_MAX_QUEUE_SIZE";
/// Maximum batch size, clamped to the queue size.
pub const OTEL_BSP_MAX_EXPORT_BATCH_SIZE: &str = "OTEL_BSP_MAX_EXPORT_BATCH_SIZE";
/// Per-call export budget (milliseconds).
pub const OTEL_BSP_EXPORT_TIMEOUT: &str = "OTEL_BSP_EXPORT_TIMEOUT";

const DEFAULT_SCHEDULE_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_MAX_QUEUE_SIZE: usize = 2048;
const DEFAULT_MAX_EXPORT_BATCH_SIZE: usize = 512;
const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Configuration for the batching pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum time a span may wait in a partially filled batch.
    ///
    /// Default: 5s
    pub schedule_delay: Duration,

    /// Queue capacity; spans arriving when it is full are dropped.
    ///
    /// Default: 2048
    pub max_queue_size: usize,

    /// Spans per export call.
    ///
    /// Default: 512
    pub max_export_batch_size: usize,

    /// Budget for a single exporter call; exceeding it counts as a failure.
    ///
    /// Default: 30s
    pub export_timeout: Duration,

    /// Upper bound on how long `shutdown` waits for the running iteration.
    ///
    /// Default: 60s
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            schedule_delay: DEFAULT_SCHEDULE_DELAY,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_export_batch_size: DEFAULT_MAX_EXPORT_BATCH_SIZE,
            export_timeout: DEFAULT_EXPORT_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by the `OTEL_BSP_*` environment variables.
    ///
    /// Unparsable values are ignored with a warning.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            schedule_delay: env_parse::<u64>(OTEL_BSP_SCHEDULE_DELAY)
                .map_or(defaults.schedule_delay, Duration::from_millis),
            max_queue_size: env_parse(OTEL_BSP_MAX_QUEUE_SIZE).unwrap_or(defaults.max_queue_size),
            max_export_batch_size: env_parse(OTEL_BSP_MAX_EXPORT_BATCH_SIZE)
                .unwrap_or(defaults.max_export_batch_size),
            export_timeout: env_parse::<u64>(OTEL_BSP_EXPORT_TIMEOUT)
                .map_or(defaults.export_timeout, Duration::from_millis),
            shutdown_timeout: defaults.shutdown_timeout,
        }
    }

    /// Sets the schedule delay.
    pub fn with_schedule_delay(mut self, delay: Duration) -> Self {
        self.schedule_delay = delay;
        self
    }

    /// Sets the queue capacity.
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Sets the maximum batch size.
    pub fn with_max_export_batch_size(mut self, size: usize) -> Self {
        self.max_export_batch_size = size;
        self
    }

    /// Sets the per-export timeout.
    pub fn with_export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }

    /// Sets the overall shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Checks the configuration, clamping the batch size to the queue size.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        let checks = [
            ("schedule_delay", self.schedule_delay.is_zero()),
            ("max_queue_size", self.max_queue_size == 0),
            ("max_export_batch_size", self.max_export_batch_size == 0),
            ("export_timeout", self.export_timeout.is_zero()),
            ("shutdown_timeout", self.shutdown_timeout.is_zero()),
        ];
        if let Some((field, _)) = checks.into_iter().find(|(_, zero)| *zero) {
            return Err(ConfigError::Zero { field });
        }

        if self.max_export_batch_size > self.max_queue_size {
            warn!(
                max_export_batch_size = self.max_export_batch_size,
                max_queue_size = self.max_queue_size,
                "batch size exceeds queue size, clamping"
            );
            self.max_export_batch_size = self.max_queue_size;
        }
        Ok(self)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = key, value = %raw, "ignoring unparsable environment value");
            None
        }
    }
}
