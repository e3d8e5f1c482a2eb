#![forbid(unsafe_code)]

//! Scheduler configuration.

use crate::error::{FlowError, Result};

/// Environment variable read by [`SchedulerConfig::from_env`].
pub const MAX_TICKS_ENV: &str = "FLOW2D_MAX_TICKS";

/// Default bound on ticks per settle before it is declared runaway.
pub const DEFAULT_MAX_TICKS: u32 = 1000;

/// Configuration for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Ticks one `update_all` may run before failing with
    /// [`FlowError::RunawayChain`].
    pub max_ticks: u32,
}

impl SchedulerConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_ticks: DEFAULT_MAX_TICKS,
        }
    }

    #[must_use]
    pub const fn with_max_ticks(mut self, max_ticks: u32) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    /// Defaults overridden by `FLOW2D_MAX_TICKS` when it is set and parses.
    ///
    /// An unparsable value is ignored with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Ok(raw) = std::env::var(MAX_TICKS_ENV) {
            match raw.trim().parse::<u32>() {
                Ok(max_ticks) => config.max_ticks = max_ticks,
                Err(_) => tracing::warn!(value = %raw, "ignoring unparsable {MAX_TICKS_ENV}"),
            }
        }
        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_ticks == 0 {
            return Err(FlowError::invalid_config("max_ticks must be > 0"));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_ticks, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_ticks_rejected() {
        let err = SchedulerConfig::new().with_max_ticks(0).validate().unwrap_err();
        assert!(matches!(err, FlowError::InvalidConfig { .. }));
    }
}
