//! Webhook sweep configuration

use serde::Deserialize;

use super::error::ValidationError;

/// Settings for the webhook reprocessing and retention sweep.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Give up on an event after this many failed handling attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Maximum events reprocessed per sweep run
    #[serde(default = "default_batch_limit")]
    pub batch_limit: u32,

    /// Delete processed events older than this many days
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl SweepConfig {
    /// Validate sweep configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_retries == 0 {
            return Err(ValidationError::InvalidRetryBudget);
        }
        Ok(())
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            batch_limit: default_batch_limit(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_max_retries() -> u32 {
    5
}

fn default_batch_limit() -> u32 {
    100
}

fn default_retention_days() -> u32 {
    90
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_config_defaults() {
        let config = SweepConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.batch_limit, 100);
        assert_eq!(config.retention_days, 90);
    }

    #[test]
    fn test_validation_zero_retries() {
        let config = SweepConfig {
            max_retries: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
