use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, WitnessError};

/// Upload retry policy for the chunk queue (see `upload_queue`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// `attempt` is 1-indexed (the first retry is attempt 1), matching
    /// `delay = min(base*2^(attempt-1), max_delay)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let scaled = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(scaled.min(self.max_delay_ms))
    }
}

/// Process-wide configuration for the witness protocol core.
///
/// Mirrors the crate's other layered config structs: plain data, a
/// `Default` impl, and an explicit `validate` pass rather than failing
/// lazily deep inside a component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WitnessConfig {
    pub chain_id: u64,
    pub registry_address: String,
    pub group_registry_address: String,
    pub object_store_endpoint: String,
    pub object_store_token: Option<String>,
    pub anchor_confirmation_timeout_secs: u64,
    pub retry_policy: RetryPolicy,
    pub discovery_cache_ttl_secs: u64,
}

impl Default for WitnessConfig {
    fn default() -> Self {
        Self {
            chain_id: 84532,
            registry_address: String::new(),
            group_registry_address: String::new(),
            object_store_endpoint: String::new(),
            object_store_token: None,
            anchor_confirmation_timeout_secs: 60,
            retry_policy: RetryPolicy::default(),
            discovery_cache_ttl_secs: 60,
        }
    }
}

impl WitnessConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| WitnessError::State(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chain_id == 0 {
            return Err(WitnessError::State("chain_id must be nonzero".into()));
        }
        if self.registry_address.is_empty() {
            return Err(WitnessError::State("registry_address is required".into()));
        }
        if self.group_registry_address.is_empty() {
            return Err(WitnessError::State(
                "group_registry_address is required".into(),
            ));
        }
        if self.retry_policy.max_retries == 0 {
            return Err(WitnessError::State(
                "retry_policy.max_retries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_fails_validation_without_addresses() {
        let config = WitnessConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn valid_config_passes() {
        let mut config = WitnessConfig::default();
        config.registry_address = "0x1111111111111111111111111111111111111111".into();
        config.group_registry_address = "0x2222222222222222222222222222222222222222".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn retry_delay_is_capped_at_max() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        };
        assert_eq!(policy.delay_for_attempt(0).as_millis(), 1_000);
        assert_eq!(policy.delay_for_attempt(10).as_millis(), 30_000);
    }

    #[test]
    fn zero_max_retries_is_rejected() {
        let mut config = WitnessConfig::default();
        config.registry_address = "0x1111111111111111111111111111111111111111".into();
        config.group_registry_address = "0x2222222222222222222222222222222222222222".into();
        config.retry_policy.max_retries = 0;
        assert!(config.validate().is_err());
    }

    proptest::proptest! {
        #[test]
        fn delay_for_attempt_never_exceeds_max(
            base_delay_ms in 1u64..10_000,
            max_delay_ms in 1u64..60_000,
            attempt in 0u32..50,
        ) {
            let policy = RetryPolicy { max_retries: 5, base_delay_ms, max_delay_ms };
            proptest::prop_assert!(policy.delay_for_attempt(attempt).as_millis() as u64 <= max_delay_ms);
        }

        #[test]
        fn delay_for_attempt_is_monotonically_non_decreasing(
            base_delay_ms in 1u64..10_000,
            max_delay_ms in 1u64..60_000,
            attempt in 0u32..49,
        ) {
            let policy = RetryPolicy { max_retries: 5, base_delay_ms, max_delay_ms };
            let this_delay = policy.delay_for_attempt(attempt);
            let next_delay = policy.delay_for_attempt(attempt + 1);
            proptest::prop_assert!(next_delay >= this_delay);
        }
    }
}
