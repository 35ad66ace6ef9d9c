//! HTTP clients for the external APIs behind the hub.
//!
//! - Notion: pages, blocks and search
//! - Slack: channels and messages
//! - GitHub: repositories, issues and pull requests
//! - Amplitude: analytics queries, executed only under an admission permit
//!
//! All clients share one `reqwest::Client` (and so its timeout) and return
//! loosely typed JSON; shaping the output is left to the tools.

pub mod amplitude;
pub mod error;
pub mod github;
pub mod notion;
pub mod slack;

pub use amplitude::{AmplitudeClient, AmplitudeQuery};
pub use error::ClientError;
pub use github::GitHubClient;
pub use notion::NotionClient;
pub use slack::SlackClient;

use crate::config::{ConfigError, HubConfig};

/// One client per integration, built from the hub configuration.
#[derive(Clone)]
pub struct Clients {
    /// Notion client.
    pub notion: NotionClient,
    /// Slack client.
    pub slack: SlackClient,
    /// GitHub client.
    pub github: GitHubClient,
    /// Amplitude client.
    pub amplitude: AmplitudeClient,
}

impl Clients {
    /// Build every client on one shared HTTP client.
    pub fn from_config(config: &HubConfig) -> Result<Self, ConfigError> {
        let http = config.http_client()?;
        let retry = config.retry();

        Ok(Self {
            notion: NotionClient::new(http.clone(), config.notion.clone(), retry.clone()),
            slack: SlackClient::new(http.clone(), config.slack.clone(), retry.clone()),
            github: GitHubClient::new(http.clone(), config.github.clone(), retry),
            amplitude: AmplitudeClient::new(http, config.amplitude.clone()),
        })
    }
}
