//! Restart policy for the line source.

use std::time::Duration;

/// Exponential backoff restart policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RestartPolicy {
    /// Restart the source when it terminates or fails. When `false` a single
    /// run is authoritative.
    pub enabled: bool,
    /// Delay before the first restart.
    pub initial_delay: Duration,
    /// Maximum delay between restarts.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Maximum consecutive restart attempts (None = unlimited).
    pub max_restarts: Option<u32>,
    /// A run lasting longer than this resets the attempt counter.
    pub stable_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_restarts: None,
            stable_after: Duration::from_secs(60),
        }
    }
}

impl RestartPolicy {
    /// A policy that never restarts.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_max_restarts(mut self, max: Option<u32>) -> Self {
        self.max_restarts = max;
        self
    }

    /// Delay before restart number `attempt` (0-indexed), capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs).map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Whether another restart should be made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && self.max_restarts.is_none_or(|max| attempt < max)
    }
}
