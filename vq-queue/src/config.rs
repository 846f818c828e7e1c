use crate::error::{QueueError, Result};
use serde::Deserialize;
use std::time::Duration;

/// Debounce parameters of the per-user collection window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CollectionWindowConfig {
    /// Sleep between checks for further arrivals.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Hard upper bound measured from the moment the window opens.
    #[serde(default = "default_max_total_delay_ms")]
    pub max_total_delay_ms: u64,
    /// Keep waiting while the newest capture is younger than this.
    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_total_delay_ms() -> u64 {
    200
}

fn default_quiet_period_ms() -> u64 {
    50
}

impl Default for CollectionWindowConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_total_delay_ms: default_max_total_delay_ms(),
            quiet_period_ms: default_quiet_period_ms(),
        }
    }
}

impl CollectionWindowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.initial_delay_ms == 0 {
            return Err(QueueError::InvalidConfig(
                "queue.initial_delay_ms must be > 0".to_string(),
            ));
        }
        if self.max_total_delay_ms < self.initial_delay_ms {
            return Err(QueueError::InvalidConfig(format!(
                "queue.max_total_delay_ms ({}) must be >= queue.initial_delay_ms ({})",
                self.max_total_delay_ms, self.initial_delay_ms
            )));
        }
        if self.quiet_period_ms == 0 {
            return Err(QueueError::InvalidConfig(
                "queue.quiet_period_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_total_delay(&self) -> Duration {
        Duration::from_millis(self.max_total_delay_ms)
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::CollectionWindowConfig;

    #[test]
    fn defaults_match_window_bounds() {
        let cfg = CollectionWindowConfig::default();
        assert_eq!(cfg.initial_delay_ms, 100);
        assert_eq!(cfg.max_total_delay_ms, 200);
        assert_eq!(cfg.quiet_period_ms, 50);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_max_below_initial_delay() {
        let cfg = CollectionWindowConfig {
            initial_delay_ms: 100,
            max_total_delay_ms: 50,
            quiet_period_ms: 50,
        };
        let err = cfg.validate().expect_err("max below initial must fail");
        assert!(err.to_string().contains("max_total_delay_ms"));
    }

    #[test]
    fn rejects_zero_quiet_period() {
        let cfg = CollectionWindowConfig {
            quiet_period_ms: 0,
            ..CollectionWindowConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
