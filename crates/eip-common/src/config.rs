//! Engine Configuration
//!
//! Every tunable that depends on assumed hardware latency lives here
//! rather than in constants.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EipError, EipResult};

/// Maximum ring instances addressable through the register map
pub const MAX_RINGS: usize = 8;

/// Flow lookup table configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowTableConfig {
    /// Program the inline flow lookup table
    pub enabled: bool,
    /// Bucket count is `1 << (size_order + 5)`
    pub size_order: u32,
    /// Entries in the auxiliary collision pool
    pub max_collisions: usize,
}

impl Default for FlowTableConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size_order: 4,
            max_collisions: 64,
        }
    }
}

impl FlowTableConfig {
    /// Number of hash buckets
    pub fn buckets(&self) -> usize {
        1usize << (self.size_order + 5)
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Descriptors per ring (power of two)
    pub ring_size: u32,
    /// Per-CPU ring instances
    pub num_rings: usize,
    /// Completions reaped per poll pass
    pub rx_budget: u32,
    /// In-flight operations one transform record may hold
    pub max_inflight_per_record: u32,
    /// Teardown drain wait before logging a diagnostic (ms)
    pub drain_timeout_ms: u64,
    /// Initial invalidation resubmission delay (ms)
    pub invalidation_retry_ms: u64,
    /// Cap for the invalidation backoff (ms)
    pub invalidation_retry_max_ms: u64,
    /// Bound on the HMAC precompute wait (ms)
    pub digest_timeout_ms: u64,
    /// Tokens preallocated per context
    pub token_pool_size: usize,
    /// Flow table
    pub flow_table: FlowTableConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            ring_size: 256,
            num_rings: cpus.min(MAX_RINGS),
            rx_budget: 64,
            max_inflight_per_record: 512,
            drain_timeout_ms: 1000,
            invalidation_retry_ms: 10,
            invalidation_retry_max_ms: 160,
            digest_timeout_ms: 1000,
            token_pool_size: 1024,
            flow_table: FlowTableConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> EipResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the ring arithmetic or register map cannot support
    pub fn validate(&self) -> EipResult<()> {
        if !self.ring_size.is_power_of_two() || self.ring_size < 4 {
            return Err(EipError::Config(format!(
                "ring_size {} must be a power of two >= 4",
                self.ring_size
            )));
        }
        // Prepared/processed counters are 24-bit byte counts
        if self.ring_size > 1 << 14 {
            return Err(EipError::Config(format!("ring_size {} too large", self.ring_size)));
        }
        if self.num_rings == 0 || self.num_rings > MAX_RINGS {
            return Err(EipError::Config(format!(
                "num_rings {} outside 1..={}",
                self.num_rings, MAX_RINGS
            )));
        }
        if self.rx_budget == 0 {
            return Err(EipError::Config("rx_budget must be non-zero".into()));
        }
        if self.max_inflight_per_record == 0 {
            return Err(EipError::Config("max_inflight_per_record must be non-zero".into()));
        }
        if self.invalidation_retry_ms == 0
            || self.invalidation_retry_max_ms < self.invalidation_retry_ms
        {
            return Err(EipError::Config("invalidation backoff range is empty".into()));
        }
        if self.token_pool_size == 0 {
            return Err(EipError::Config("token_pool_size must be non-zero".into()));
        }
        if self.flow_table.size_order > 15 {
            return Err(EipError::Config(format!(
                "flow_table.size_order {} too large",
                self.flow_table.size_order
            )));
        }
        if self.flow_table.max_collisions == 0 {
            return Err(EipError::Config("flow_table.max_collisions must be non-zero".into()));
        }
        Ok(())
    }

    /// Teardown drain diagnostic interval
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// First invalidation retry delay
    pub fn invalidation_retry(&self) -> Duration {
        Duration::from_millis(self.invalidation_retry_ms)
    }

    /// Longest invalidation retry delay
    pub fn invalidation_retry_max(&self) -> Duration {
        Duration::from_millis(self.invalidation_retry_max_ms)
    }

    /// HMAC precompute bound
    pub fn digest_timeout(&self) -> Duration {
        Duration::from_millis(self.digest_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.flow_table.buckets(), 512);
    }

    #[test]
    fn test_from_json_partial() {
        let config = EngineConfig::from_json(r#"{"ring_size": 64, "num_rings": 2}"#).unwrap();
        assert_eq!(config.ring_size, 64);
        assert_eq!(config.num_rings, 2);
        assert_eq!(config.rx_budget, 64);
        assert!(config.flow_table.enabled);
    }

    #[test]
    fn test_rejects_bad_ring_size() {
        assert!(EngineConfig::from_json(r#"{"ring_size": 100}"#).is_err());
        assert!(matches!(
            EngineConfig::from_json(r#"{"num_rings": 0}"#),
            Err(EipError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(EngineConfig::from_json("{"), Err(EipError::Json(_))));
    }
}
