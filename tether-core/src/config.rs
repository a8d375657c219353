use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Global knobs that tune engine behaviour.
///
/// All fields carry defaults so callers can progressively adopt individual
/// settings without supplying a full configuration payload.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Debounce windows for coalescing raw filesystem notifications.
    pub coalesce: CoalesceConfig,
    /// Retry/backoff policy shared by all workers.
    pub retry: RetryConfig,
    /// Log-stream health checking and reconnect tuning.
    pub log_stream: LogStreamConfig,
}

/// Debounce windows for the event coalescer.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CoalesceConfig {
    /// Quiet period that must elapse after the last event before a batch is
    /// flushed.
    pub min_rest_ms: u64,
    /// Hard ceiling on how long a batch accumulates, even if events never
    /// pause.
    pub max_wait_ms: u64,
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            min_rest_ms: 200,
            max_wait_ms: 10_000,
        }
    }
}

impl CoalesceConfig {
    pub fn min_rest(&self) -> Duration {
        Duration::from_millis(self.min_rest_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

/// Retry/backoff tuning for worker operations.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Step budget before the backoff stops growing its internal counter.
    pub max_steps: u32,
    pub initial_delay_ms: u64,
    /// Multiplicative growth factor per step.
    pub factor: f64,
    /// Percentage-based jitter applied to each delay, as a fraction.
    pub jitter_ratio: f64,
    pub max_delay_ms: u64,
    /// Attempts that survive longer than this reset the backoff before the
    /// next retry; shorter-lived failures advance it.
    pub reset_after_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_steps: 1_000,
            initial_delay_ms: 50,
            factor: 2.0,
            jitter_ratio: 0.1,
            max_delay_ms: 15_000,
            reset_after_ms: 1_000,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn reset_after(&self) -> Duration {
        Duration::from_millis(self.reset_after_ms)
    }
}

/// Health checking for container log streams.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LogStreamConfig {
    /// How often to inspect "time since last byte read"; a tail that has
    /// been silent for a full interval is treated as stalled and reconnected.
    pub health_check_interval_ms: u64,
    /// Gap added to the last successful read time when reconnecting, so the
    /// resumed stream tolerates log rotation without re-reading everything.
    pub reconnect_gap_ms: u64,
}

impl Default for LogStreamConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 15_000,
            reconnect_gap_ms: 2_000,
        }
    }
}

impl LogStreamConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn reconnect_gap(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.reconnect_gap_ms as i64)
    }
}
