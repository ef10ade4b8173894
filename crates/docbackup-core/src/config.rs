//! Change feed configuration

use crate::error::{BackupError, Result};
use crate::store::StartPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Configuration shared by every feed worker of a run
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
pub struct FeedConfig {
    /// Pause between drain cycles in milliseconds
    #[serde(default = "default_wait_ms")]
    #[validate(range(min = 1, max = 3_600_000))]
    pub wait_ms: u64,

    /// Rediscover partition ranges every N wait cycles (0 = discover once)
    #[serde(default)]
    pub range_rescan_cycles: u32,

    /// Read ranges without a continuation from the start of the feed
    #[serde(default)]
    pub start_from_beginning: bool,
}

fn default_wait_ms() -> u64 {
    1000
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            wait_ms: default_wait_ms(),
            range_rescan_cycles: 0,
            start_from_beginning: false,
        }
    }
}

impl FeedConfig {
    pub fn with_wait_ms(mut self, wait_ms: u64) -> Self {
        self.wait_ms = wait_ms;
        self
    }

    pub fn with_range_rescan_cycles(mut self, cycles: u32) -> Self {
        self.range_rescan_cycles = cycles;
        self
    }

    pub fn with_start_from_beginning(mut self, beginning: bool) -> Self {
        self.start_from_beginning = beginning;
        self
    }

    /// Sleep between drain cycles
    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    /// Start policy for ranges without a stored continuation
    pub fn start_policy(&self) -> StartPolicy {
        StartPolicy::from_beginning(self.start_from_beginning)
    }

    /// Validate and convert validation failures into [`BackupError::Config`]
    pub fn validate_config(&self) -> Result<()> {
        self.validate()
            .map_err(|e| BackupError::config(format!("invalid feed configuration: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FeedConfig::default();
        assert_eq!(config.wait_ms, 1000);
        assert_eq!(config.range_rescan_cycles, 0);
        assert!(!config.start_from_beginning);
        assert_eq!(config.wait(), Duration::from_secs(1));
        assert_eq!(config.start_policy(), StartPolicy::FromNow);
        assert!(config.validate_config().is_ok());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: FeedConfig =
            serde_json::from_str(r#"{"range_rescan_cycles": 5, "start_from_beginning": true}"#)
                .unwrap();
        assert_eq!(config.wait_ms, 1000);
        assert_eq!(config.range_rescan_cycles, 5);
        assert_eq!(config.start_policy(), StartPolicy::FromBeginning);
    }

    #[test]
    fn test_wait_bounds() {
        assert!(FeedConfig::default().with_wait_ms(0).validate_config().is_err());
        assert!(FeedConfig::default()
            .with_wait_ms(3_600_001)
            .validate_config()
            .is_err());
        assert!(FeedConfig::default().with_wait_ms(1).validate_config().is_ok());

        let err = FeedConfig::default()
            .with_wait_ms(0)
            .validate_config()
            .unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
    }
}
