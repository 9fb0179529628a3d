//! Backpressure for task submission
//!
//! Bounds the pending task table. Without a bound every submission is
//! accepted.

use serde::{Deserialize, Serialize};

/// Backpressure configuration
///
/// Submissions are rejected with `TaskError::QueueFull` once the number of
/// pending tasks reaches `high_watermark * max_pending`, and accepted again
/// after it drops to `low_watermark * max_pending`.
///
/// # Example
///
/// ```
/// use workpool::pool::BackpressureConfig;
///
/// let config = BackpressureConfig::default()
///     .with_max_pending(1_000)
///     .with_low_watermark(0.5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackpressureConfig {
    /// Upper bound on pending tasks; `None` disables backpressure
    pub max_pending: Option<usize>,

    /// Stop accepting when pending / max_pending reaches this ratio
    pub high_watermark: f64,

    /// Resume accepting when pending / max_pending drops to this ratio
    pub low_watermark: f64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            max_pending: None,
            high_watermark: 1.0,
            low_watermark: 0.8,
        }
    }
}

impl BackpressureConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the pending table
    pub fn with_max_pending(mut self, max: usize) -> Self {
        self.max_pending = Some(max);
        self
    }

    pub fn with_high_watermark(mut self, watermark: f64) -> Self {
        self.high_watermark = watermark.clamp(0.0, 1.0);
        self
    }

    pub fn with_low_watermark(mut self, watermark: f64) -> Self {
        self.low_watermark = watermark.clamp(0.0, 1.0);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), BackpressureError> {
        if self.max_pending == Some(0) {
            return Err(BackpressureError::InvalidConfig(
                "max_pending must be greater than 0".into(),
            ));
        }
        if self.low_watermark >= self.high_watermark {
            return Err(BackpressureError::InvalidConfig(
                "low_watermark must be less than high_watermark".into(),
            ));
        }
        Ok(())
    }
}

/// Backpressure-related errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackpressureError {
    #[error("invalid backpressure configuration: {0}")]
    InvalidConfig(String),
}

/// Admission state owned by the manager
///
/// Uses hysteresis between the watermarks so a pool hovering at its limit
/// does not flip between accepting and rejecting on every task.
#[derive(Debug)]
pub(crate) struct BackpressureState {
    config: BackpressureConfig,
    accepting: bool,
}

impl BackpressureState {
    pub(crate) fn new(config: BackpressureConfig) -> Self {
        Self {
            config,
            accepting: true,
        }
    }

    /// Decide whether a new task may join `pending` already queued ones
    pub(crate) fn should_accept(&mut self, pending: usize) -> bool {
        let Some(max) = self.config.max_pending else {
            return true;
        };
        let load_ratio = pending as f64 / max.max(1) as f64;

        if self.accepting {
            if load_ratio >= self.config.high_watermark {
                self.accepting = false;
            }
        } else if load_ratio <= self.config.low_watermark {
            self.accepting = true;
        }
        self.accepting
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.accepting
    }

    pub(crate) fn limit(&self) -> Option<usize> {
        self.config.max_pending
    }
}
