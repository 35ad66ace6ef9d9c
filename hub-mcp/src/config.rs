//! Hub configuration.
//!
//! Everything is loaded from environment variables with defaults that point at
//! the public APIs. Credentials are optional: a tool whose integration has no
//! credentials returns a structured error instead of calling out.

use crate::retry::RetryConfig;
use crate::server::DEFAULT_USER_ID;
use hub_admission::{AdmissionConfig, CostBudgetConfig, Integration, LimitConfig};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },

    /// Admission limits are unusable.
    #[error(transparent)]
    Admission(#[from] hub_admission::ConfigError),

    /// The HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Full hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Notion API.
    pub notion: ApiEndpoint,

    /// Slack Web API.
    pub slack: ApiEndpoint,

    /// GitHub REST API.
    pub github: ApiEndpoint,

    /// Amplitude Dashboard REST API.
    pub amplitude: ApiEndpoint,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Maximum attempts for idempotent reads.
    pub max_retries: u32,

    /// Rate-limit identity for calls that carry none.
    pub default_user: String,

    /// Token-bucket and cost-budget limits.
    pub admission: AdmissionConfig,

    /// Interval of the idle-state sweep; `None` disables it.
    pub idle_sweep_secs: Option<u64>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            notion: ApiEndpoint::new("https://api.notion.com/v1"),
            slack: ApiEndpoint::new("https://slack.com/api"),
            github: ApiEndpoint::new("https://api.github.com"),
            amplitude: ApiEndpoint::new("https://amplitude.com/api/2"),
            timeout_secs: 30,
            max_retries: 3,
            default_user: DEFAULT_USER_ID.to_string(),
            admission: AdmissionConfig::default(),
            idle_sweep_secs: None,
        }
    }
}

impl HubConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `NOTION_API_KEY`, `NOTION_API_URL`
    /// - `SLACK_BOT_TOKEN`, `SLACK_API_URL`
    /// - `GITHUB_TOKEN`, `GITHUB_API_URL`
    /// - `AMPLITUDE_API_KEY`, `AMPLITUDE_SECRET_KEY`, `AMPLITUDE_API_URL`
    /// - `HUB_TIMEOUT_SECS`: Request timeout in seconds (default: 30)
    /// - `HUB_MAX_RETRIES`: Attempts for idempotent reads (default: 3)
    /// - `HUB_DEFAULT_USER`: Rate-limit identity when none is supplied (default: mcp_user)
    /// - `HUB_<API>_RPM`, `HUB_<API>_BURST`: Token-bucket limits per API
    /// - `HUB_AMPLITUDE_HOURLY_BUDGET`: Amplitude cost per rolling hour (default: 12000)
    /// - `HUB_AMPLITUDE_MAX_CONCURRENT`: Amplitude in-flight queries (default: 5)
    /// - `HUB_IDLE_SWEEP_SECS`: Idle-state sweep interval, 0 or unset disables it
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut admission = AdmissionConfig::default();
        for integration in Integration::ALL {
            let limit = integration.default_limits();
            let prefix = format!("HUB_{}", integration.as_str().to_uppercase());
            let rpm = parse_var(&var, &format!("{}_RPM", prefix), limit.requests_per_minute);
            let burst = parse_var(&var, &format!("{}_BURST", prefix), limit.burst);
            admission = admission.with_limit(integration.as_str(), LimitConfig::new(rpm, burst));
        }
        let budget = CostBudgetConfig::default();
        admission = admission.with_amplitude(CostBudgetConfig {
            hourly_budget: parse_var(&var, "HUB_AMPLITUDE_HOURLY_BUDGET", budget.hourly_budget),
            max_concurrent: parse_var(&var, "HUB_AMPLITUDE_MAX_CONCURRENT", budget.max_concurrent),
            ..budget
        });

        let idle_sweep_secs: u64 = parse_var(&var, "HUB_IDLE_SWEEP_SECS", 0);

        Self {
            notion: ApiEndpoint {
                base_url: var("NOTION_API_URL").unwrap_or(default.notion.base_url),
                api_key: var("NOTION_API_KEY"),
                secret_key: None,
            },
            slack: ApiEndpoint {
                base_url: var("SLACK_API_URL").unwrap_or(default.slack.base_url),
                api_key: var("SLACK_BOT_TOKEN"),
                secret_key: None,
            },
            github: ApiEndpoint {
                base_url: var("GITHUB_API_URL").unwrap_or(default.github.base_url),
                api_key: var("GITHUB_TOKEN"),
                secret_key: None,
            },
            amplitude: ApiEndpoint {
                base_url: var("AMPLITUDE_API_URL").unwrap_or(default.amplitude.base_url),
                api_key: var("AMPLITUDE_API_KEY"),
                secret_key: var("AMPLITUDE_SECRET_KEY"),
            },
            timeout_secs: parse_var(&var, "HUB_TIMEOUT_SECS", default.timeout_secs),
            max_retries: parse_var(&var, "HUB_MAX_RETRIES", default.max_retries),
            default_user: var("HUB_DEFAULT_USER").unwrap_or(default.default_user),
            admission,
            idle_sweep_secs: (idle_sweep_secs > 0).then_some(idle_sweep_secs),
        }
    }

    /// Request timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry policy for idempotent reads.
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::with_max_attempts(self.max_retries)
    }

    /// Idle sweep interval, if enabled.
    pub fn idle_sweep_interval(&self) -> Option<Duration> {
        self.idle_sweep_secs.map(Duration::from_secs)
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HUB_TIMEOUT_SECS".to_string(),
                message: "timeout must be positive".to_string(),
            });
        }
        if self.default_user.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "HUB_DEFAULT_USER".to_string(),
                message: "default user must not be empty".to_string(),
            });
        }
        self.admission.validate()?;
        Ok(())
    }

    /// Build the HTTP client shared by every integration.
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout())
            .user_agent(concat!("integration-hub/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(client)
    }
}

fn parse_var<T, F>(var: &F, key: &str, default: T) -> T
where
    T: FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Unparseable configuration value, using default");
            default
        }),
        None => default,
    }
}

/// Configuration for a single external API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEndpoint {
    /// Base URL for the API (e.g., "https://api.notion.com/v1").
    pub base_url: String,

    /// API key or token.
    pub api_key: Option<String>,

    /// Secondary secret (Amplitude's secret key).
    pub secret_key: Option<String>,
}

impl ApiEndpoint {
    /// An endpoint without credentials.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            secret_key: None,
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the secret key.
    pub fn with_secret_key(mut self, secret_key: impl Into<String>) -> Self {
        self.secret_key = Some(secret_key.into());
        self
    }

    /// Build a full URL by appending a path to the base URL.
    pub fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }

    /// Check if API key authentication is available.
    pub fn has_auth(&self) -> bool {
        self.api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = HubConfig::from_lookup(lookup(&[]));
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.default_user, "mcp_user");
        assert_eq!(config.idle_sweep_secs, None);
        assert!(!config.notion.has_auth());
        assert_eq!(config.admission, AdmissionConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_reads_credentials_and_limits() {
        let config = HubConfig::from_lookup(lookup(&[
            ("NOTION_API_KEY", "secret_abc"),
            ("AMPLITUDE_API_KEY", "amp-key"),
            ("AMPLITUDE_SECRET_KEY", "amp-secret"),
            ("SLACK_API_URL", "http://localhost:9000/api"),
            ("HUB_SLACK_RPM", "120"),
            ("HUB_SLACK_BURST", "4"),
            ("HUB_AMPLITUDE_HOURLY_BUDGET", "500"),
            ("HUB_IDLE_SWEEP_SECS", "300"),
            ("HUB_DEFAULT_USER", "agent"),
        ]));

        assert_eq!(config.notion.api_key.as_deref(), Some("secret_abc"));
        assert_eq!(config.amplitude.secret_key.as_deref(), Some("amp-secret"));
        assert_eq!(config.slack.url("conversations.list"), "http://localhost:9000/api/conversations.list");
        assert_eq!(config.admission.limits["slack"], LimitConfig::new(120, 4));
        assert_eq!(config.admission.limits["notion"], LimitConfig::new(180, 20));
        assert_eq!(config.admission.amplitude.hourly_budget, 500);
        assert_eq!(config.idle_sweep_interval(), Some(Duration::from_secs(300)));
        assert_eq!(config.default_user, "agent");
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = HubConfig::from_lookup(lookup(&[
            ("HUB_TIMEOUT_SECS", "soon"),
            ("HUB_GITHUB_RPM", "-5"),
            ("GITHUB_TOKEN", "  "),
        ]));

        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.admission.limits["github"], LimitConfig::new(5000, 100));
        assert!(!config.github.has_auth());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = HubConfig::from_lookup(lookup(&[("HUB_NOTION_BURST", "0")]));
        assert!(matches!(config.validate(), Err(ConfigError::Admission(_))));

        let config = HubConfig::from_lookup(lookup(&[("HUB_TIMEOUT_SECS", "0")]));
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_api_endpoint_url() {
        let endpoint = ApiEndpoint::new("https://api.github.com/");
        assert_eq!(endpoint.url("/repos/a/b"), "https://api.github.com/repos/a/b");
        assert_eq!(endpoint.url("repos/a/b"), "https://api.github.com/repos/a/b");
    }
}
