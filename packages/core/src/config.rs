//! Configuration for the sequence engine

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on concurrent existence checks during validation
const MAX_VALIDATION_CONCURRENCY: usize = 1024;

/// Upper bound on the first retry delay of a background write
const MAX_WRITE_RETRY_BASE_MS: u64 = 60_000;

/// Tunables for `SequenceEngine`
///
/// Every field has a default, so partial JSON documents are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Rebuild a missing cache entry from the graph store on read
    ///
    /// Off by default: a cold cache reads as an empty sequence.
    pub read_through_on_miss: bool,

    /// Maximum number of node existence checks in flight at once
    pub validation_concurrency: usize,

    /// Extra attempts for a failed background store write
    pub write_retries: usize,

    /// First retry delay; doubles on every further attempt
    pub write_retry_base_ms: u64,

    /// Per-attempt timeout for background store writes (none by default)
    pub write_timeout_ms: Option<u64>,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            read_through_on_miss: false,
            validation_concurrency: 16,
            write_retries: 0,
            write_retry_base_ms: 10,
            write_timeout_ms: None,
        }
    }
}

impl SequenceConfig {
    /// Parse a JSON document and validate it
    pub fn from_json_str(json: &str) -> Result<Self, String> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| format!("invalid sequence config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.validation_concurrency == 0 {
            return Err("validation_concurrency must be greater than 0".to_string());
        }

        if self.validation_concurrency > MAX_VALIDATION_CONCURRENCY {
            return Err(format!(
                "validation_concurrency cannot exceed {}",
                MAX_VALIDATION_CONCURRENCY
            ));
        }

        if self.write_retries > 0 && self.write_retry_base_ms == 0 {
            return Err("write_retry_base_ms must be greater than 0 when retries are enabled".to_string());
        }

        if self.write_retry_base_ms > MAX_WRITE_RETRY_BASE_MS {
            return Err(format!(
                "write_retry_base_ms cannot exceed {}",
                MAX_WRITE_RETRY_BASE_MS
            ));
        }

        if self.write_timeout_ms == Some(0) {
            return Err("write_timeout_ms must be greater than 0".to_string());
        }

        Ok(())
    }

    pub fn write_retry_base(&self) -> Duration {
        Duration::from_millis(self.write_retry_base_ms)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SequenceConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.read_through_on_miss);
        assert_eq!(config.write_timeout(), None);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SequenceConfig::from_json_str(r#"{ "read_through_on_miss": true }"#).unwrap();
        assert!(config.read_through_on_miss);
        assert_eq!(config.validation_concurrency, 16);
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let result = SequenceConfig::from_json_str(r#"{ "validation_concurrency": 0 }"#);
        assert!(result.unwrap_err().contains("validation_concurrency"));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let config = SequenceConfig {
            write_timeout_ms: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_retry_base() {
        let result = SequenceConfig::from_json_str(
            r#"{ "write_retries": 3, "write_retry_base_ms": 18446744073709551615 }"#,
        );
        assert!(result.unwrap_err().contains("write_retry_base_ms"));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(SequenceConfig::from_json_str("{ not json").is_err());
    }

    #[test]
    fn test_retry_base_duration() {
        let config = SequenceConfig {
            write_retries: 3,
            write_retry_base_ms: 25,
            ..Default::default()
        };
        assert_eq!(config.write_retry_base(), Duration::from_millis(25));
    }
}
