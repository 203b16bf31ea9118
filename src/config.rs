//! Configuration for streaming sessions and the recovery layer.
//!
//! Both config structs deserialize from host-provided settings with
//! per-field defaults, so a partial map (or none at all) yields a
//! working configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Delivery Mode
// ============================================================================

/// Policy governing when buffered chunks are flushed into session state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Process each chunk as it arrives.
    Immediate,
    /// Process the buffer once it reaches `buffer_size` chunks.
    #[default]
    Buffered,
    /// Process the buffer `debounce_ms` after the most recent chunk.
    Debounced,
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("buffer_size must be at least 1")]
    ZeroBufferSize,

    #[error("debounce_ms must be at least 1")]
    ZeroDebounce,

    #[error("streaming_timeout_ms must be at least 1")]
    ZeroStreamingTimeout,

    #[error("jitter_factor must be within [0.0, 1.0], got {0}")]
    JitterOutOfRange(f64),

    #[error("retry_base_delay_ms must be at least 1")]
    ZeroRetryDelay,

    #[error("failure_threshold must be at least 1")]
    ZeroFailureThreshold,

    #[error("success_threshold must be at least 1")]
    ZeroSuccessThreshold,

    #[error("reset_timeout_ms must be at least 1")]
    ZeroResetTimeout,

    #[error("sweep_interval_ms must be at least 1")]
    ZeroSweepInterval,
}

// ============================================================================
// Streaming Config
// ============================================================================

/// Settings for the session manager and its per-session actors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// How chunks are flushed into accumulated state.
    #[serde(default)]
    pub delivery: DeliveryMode,

    /// Buffered mode: chunk count that triggers a flush.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Debounced mode: quiet period before a flush, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Inactivity window after which a session fails with a timeout error.
    #[serde(default = "default_streaming_timeout_ms")]
    pub streaming_timeout_ms: u64,
}

impl StreamingConfig {
    /// Validate field ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }
        if self.debounce_ms == 0 {
            return Err(ConfigError::ZeroDebounce);
        }
        if self.streaming_timeout_ms == 0 {
            return Err(ConfigError::ZeroStreamingTimeout);
        }
        Ok(())
    }

    /// Debounce quiet period as a `Duration`.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Inactivity window as a `Duration`.
    #[must_use]
    pub fn streaming_timeout(&self) -> Duration {
        Duration::from_millis(self.streaming_timeout_ms)
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            delivery: DeliveryMode::default(),
            buffer_size: default_buffer_size(),
            debounce_ms: default_debounce_ms(),
            streaming_timeout_ms: default_streaming_timeout_ms(),
        }
    }
}

// ============================================================================
// Recovery Config
// ============================================================================

/// Settings for the recovery coordinator and circuit breaker registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Recovery rounds allowed per error record.
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,

    /// Base delay for the first retry, in milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Double the delay on each successive attempt.
    #[serde(default = "default_true")]
    pub exponential_backoff: bool,

    /// Uniform jitter applied to the computed delay, as a fraction of it.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,

    /// Consecutive failures that open a breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Quiet period after the last failure before an open breaker
    /// becomes half-open, in milliseconds.
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    /// Successes needed to close a half-open breaker.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// How often the registry sweeps open breakers, in milliseconds.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl RecoveryConfig {
    /// Validate field ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::JitterOutOfRange(self.jitter_factor));
        }
        if self.retry_base_delay_ms == 0 {
            return Err(ConfigError::ZeroRetryDelay);
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::ZeroSuccessThreshold);
        }
        if self.reset_timeout_ms == 0 {
            return Err(ConfigError::ZeroResetTimeout);
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::ZeroSweepInterval);
        }
        Ok(())
    }

    /// Breaker reset window as a `Duration`.
    #[must_use]
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    /// Sweep cadence as a `Duration`.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_recovery_attempts: default_max_recovery_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            exponential_backoff: true,
            jitter_factor: default_jitter_factor(),
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            success_threshold: default_success_threshold(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_buffer_size() -> usize {
    5
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_streaming_timeout_ms() -> u64 {
    30_000
}

fn default_max_recovery_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_jitter_factor() -> f64 {
    0.2
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    60_000
}

fn default_success_threshold() -> u32 {
    2
}

fn default_sweep_interval_ms() -> u64 {
    5_000
}

/// Serde default for bool fields that should be `true` (serde's default is `false`).
fn default_true() -> bool {
    true
}
