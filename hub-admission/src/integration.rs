//! External API families served by the hub.

use crate::config::LimitConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An external API family whose calls pass through admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Integration {
    /// Notion: pages, databases and blocks.
    Notion,
    /// Slack: channels and messages.
    Slack,
    /// GitHub: repositories, issues and pull requests.
    GitHub,
    /// Amplitude: product analytics queries (cost-accounted).
    Amplitude,
}

impl Integration {
    /// Every integration, in registration order.
    pub const ALL: [Integration; 4] = [
        Integration::Notion,
        Integration::Slack,
        Integration::GitHub,
        Integration::Amplitude,
    ];

    /// Get the string representation used in rate-limit keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Integration::Notion => "notion",
            Integration::Slack => "slack",
            Integration::GitHub => "github",
            Integration::Amplitude => "amplitude",
        }
    }

    /// Per-minute request shaping applied when nothing else is configured.
    pub fn default_limits(&self) -> LimitConfig {
        match self {
            Integration::Notion => LimitConfig::new(180, 20),
            Integration::Slack => LimitConfig::new(60, 10),
            Integration::GitHub => LimitConfig::new(5000, 100),
            Integration::Amplitude => LimitConfig::new(360, 5),
        }
    }

    /// Build the `"<api>:<user>"` key under which a user's bucket is kept.
    pub fn rate_limit_key(&self, user_id: &str) -> String {
        rate_limit_key(self.as_str(), user_id)
    }
}

impl fmt::Display for Integration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn rate_limit_key(api: &str, user_id: &str) -> String {
    format!("{}:{}", api, user_id)
}
