//! Admission configuration.
//!
//! Limits are fixed at construction time. Changing them means building a new
//! [`AdmissionController`](crate::AdmissionController).

use crate::integration::Integration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Amplitude's documented maximum query cost per rolling hour.
pub const DEFAULT_HOURLY_COST_BUDGET: u64 = 12_000;

/// Amplitude's documented maximum number of concurrent queries.
pub const DEFAULT_MAX_CONCURRENT: u32 = 5;

/// Length of the rolling cost window in seconds.
pub const COST_WINDOW_SECS: f64 = 3600.0;

/// Configuration errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A limit is zero or otherwise unusable.
    #[error("Invalid limit for {key}: {message}")]
    InvalidLimit {
        /// Which limit.
        key: String,
        /// What is wrong with it.
        message: String,
    },
}

/// Token-bucket shaping for one API family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Sustained rate; the bucket refills at `requests_per_minute / 60` tokens per second.
    pub requests_per_minute: u32,

    /// Bucket capacity.
    pub burst: u32,
}

impl LimitConfig {
    /// Create a limit from a per-minute rate and a burst capacity.
    pub const fn new(requests_per_minute: u32, burst: u32) -> Self {
        Self {
            requests_per_minute,
            burst,
        }
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        f64::from(self.requests_per_minute) / 60.0
    }

    /// Maximum tokens a bucket can hold.
    pub fn capacity(&self) -> f64 {
        f64::from(self.burst)
    }

    fn validate(&self, key: &str) -> Result<(), ConfigError> {
        if self.requests_per_minute == 0 {
            return Err(ConfigError::InvalidLimit {
                key: key.to_string(),
                message: "requests per minute must be positive".to_string(),
            });
        }
        if self.burst == 0 {
            return Err(ConfigError::InvalidLimit {
                key: key.to_string(),
                message: "burst must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Amplitude's cost and concurrency limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostBudgetConfig {
    /// Maximum summed query cost inside the rolling window.
    pub hourly_budget: u64,

    /// Maximum in-flight queries per user.
    pub max_concurrent: u32,

    /// Rolling window length in seconds.
    pub window_secs: f64,
}

impl Default for CostBudgetConfig {
    fn default() -> Self {
        Self {
            hourly_budget: DEFAULT_HOURLY_COST_BUDGET,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            window_secs: COST_WINDOW_SECS,
        }
    }
}

/// Full admission configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Per-API token-bucket limits, keyed by API name. APIs absent here are unthrottled.
    pub limits: BTreeMap<String, LimitConfig>,

    /// Amplitude cost budget.
    pub amplitude: CostBudgetConfig,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        let limits = Integration::ALL
            .iter()
            .map(|i| (i.as_str().to_string(), i.default_limits()))
            .collect();

        Self {
            limits,
            amplitude: CostBudgetConfig::default(),
        }
    }
}

impl AdmissionConfig {
    /// Configuration with no token-bucket limits at all.
    pub fn unlimited() -> Self {
        Self {
            limits: BTreeMap::new(),
            amplitude: CostBudgetConfig::default(),
        }
    }

    /// Set (or replace) the limit for an API.
    pub fn with_limit(mut self, api: impl Into<String>, limit: LimitConfig) -> Self {
        self.limits.insert(api.into(), limit);
        self
    }

    /// Set the Amplitude cost budget.
    pub fn with_amplitude(mut self, amplitude: CostBudgetConfig) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Check that every limit is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (api, limit) in &self.limits {
            limit.validate(api)?;
        }
        if self.amplitude.hourly_budget == 0 {
            return Err(ConfigError::InvalidLimit {
                key: "amplitude.hourly_budget".to_string(),
                message: "hourly budget must be positive".to_string(),
            });
        }
        if self.amplitude.max_concurrent == 0 {
            return Err(ConfigError::InvalidLimit {
                key: "amplitude.max_concurrent".to_string(),
                message: "max concurrent must be positive".to_string(),
            });
        }
        if self.amplitude.window_secs.is_nan() || self.amplitude.window_secs <= 0.0 {
            return Err(ConfigError::InvalidLimit {
                key: "amplitude.window_secs".to_string(),
                message: "window must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AdmissionConfig::default();
        assert_eq!(config.limits.len(), 4);
        assert_eq!(config.limits["notion"], LimitConfig::new(180, 20));
        assert_eq!(config.limits["amplitude"], LimitConfig::new(360, 5));
        assert_eq!(config.amplitude.hourly_budget, 12_000);
        assert_eq!(config.amplitude.max_concurrent, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_refill_rate() {
        let limit = LimitConfig::new(180, 20);
        assert_eq!(limit.refill_rate(), 3.0);
        assert_eq!(limit.capacity(), 20.0);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = AdmissionConfig::default().with_limit("slack", LimitConfig::new(0, 10));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLimit { ref key, .. }) if key == "slack"
        ));

        let config = AdmissionConfig::default().with_amplitude(CostBudgetConfig {
            max_concurrent: 0,
            ..CostBudgetConfig::default()
        });
        assert!(config.validate().is_err());
    }
}
