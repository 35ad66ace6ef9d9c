//! GitHub REST API client.
//!
//! A token is optional: without one, requests go out unauthenticated and are
//! subject to GitHub's anonymous rate limit.

use super::error::{read_json, ClientError};
use crate::config::ApiEndpoint;
use crate::retry::{with_retry_if, RetryConfig};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

/// GitHub's page size cap.
pub const MAX_PER_PAGE: u32 = 100;

const ACCEPT: &str = "application/vnd.github.v3+json";
const USER_AGENT: &str = "MCP-Integration-Hub";
const NOT_FOUND: &str = "Repository or resource not found";
const FORBIDDEN: &str = "Access forbidden. You may have hit the rate limit";
const NO_QUERY: [(&str, &str); 0] = [];

/// Query parameters for listing issues.
#[derive(Debug, Clone, Serialize)]
pub struct IssueFilters {
    /// `open`, `closed` or `all`.
    pub state: String,
    /// `created`, `updated` or `comments`.
    pub sort: String,
    /// `asc` or `desc`.
    pub direction: String,
    /// Comma-separated label names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<String>,
    /// Assignee login.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// Page size.
    pub per_page: u32,
}

/// Query parameters for listing pull requests.
#[derive(Debug, Clone, Serialize)]
pub struct PullFilters {
    /// `open`, `closed` or `all`.
    pub state: String,
    /// `created`, `updated` or `popularity`.
    pub sort: String,
    /// `asc` or `desc`.
    pub direction: String,
    /// Head branch as `user:branch`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
    /// Base branch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    /// Page size.
    pub per_page: u32,
}

/// GitHub REST API client.
#[derive(Clone)]
pub struct GitHubClient {
    client: Client,
    endpoint: ApiEndpoint,
    retry: RetryConfig,
}

impl GitHubClient {
    /// Create a new GitHub client on a shared HTTP client.
    pub fn new(client: Client, endpoint: ApiEndpoint, retry: RetryConfig) -> Self {
        Self {
            client,
            endpoint,
            retry,
        }
    }

    /// Repository metadata.
    #[instrument(skip(self))]
    pub async fn repository(&self, repo: &str) -> Result<Value, ClientError> {
        self.get(&format!("/repos/{}", repo), &NO_QUERY).await
    }

    /// One page of issues, with pull requests removed.
    ///
    /// The issues endpoint also returns pull requests, so fewer than
    /// `per_page` items may come back.
    #[instrument(skip(self))]
    pub async fn issues(&self, repo: &str, filters: &IssueFilters) -> Result<Vec<Value>, ClientError> {
        let items = self.get(&format!("/repos/{}/issues", repo), filters).await?;
        let issues: Vec<Value> = into_array(items)?
            .into_iter()
            .filter(|item| item.get("pull_request").is_none())
            .collect();

        debug!(count = issues.len(), "Fetched GitHub issues");
        Ok(issues)
    }

    /// One page of pull requests.
    #[instrument(skip(self))]
    pub async fn pulls(&self, repo: &str, filters: &PullFilters) -> Result<Vec<Value>, ClientError> {
        let items = self.get(&format!("/repos/{}/pulls", repo), filters).await?;
        into_array(items)
    }

    async fn get<Q>(&self, path: &str, query: &Q) -> Result<Value, ClientError>
    where
        Q: Serialize + ?Sized + Sync,
    {
        let url = self.endpoint.url(path);
        let url = &url;
        let token = self.endpoint.api_key.as_deref();

        with_retry_if(
            &self.retry,
            || async move {
                let mut request = self
                    .client
                    .get(url)
                    .header("Accept", ACCEPT)
                    .header("User-Agent", USER_AGENT)
                    .query(query);
                if let Some(token) = token {
                    request = request.header("Authorization", format!("token {}", token));
                }

                let response = request.send().await?;
                read_json(response, NOT_FOUND).await.map_err(|e| match e {
                    ClientError::Forbidden(_) => ClientError::Forbidden(FORBIDDEN.to_string()),
                    other => other,
                })
            },
            ClientError::is_retryable,
        )
        .await
    }
}

fn into_array(value: Value) -> Result<Vec<Value>, ClientError> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(ClientError::InvalidResponse(format!(
            "expected a JSON array, got {}",
            match other {
                Value::Object(_) => "an object",
                _ => "a scalar",
            }
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_issue_filters_skip_unset_fields() {
        let filters = IssueFilters {
            state: "open".into(),
            sort: "created".into(),
            direction: "desc".into(),
            labels: Some("bug,ui".into()),
            assignee: None,
            per_page: 30,
        };

        let value = serde_json::to_value(&filters).unwrap();
        assert_eq!(value["labels"], "bug,ui");
        assert!(value.get("assignee").is_none());
    }

    #[test]
    fn test_into_array() {
        assert_eq!(into_array(json!([1, 2])).unwrap().len(), 2);
        assert!(matches!(
            into_array(json!({ "message": "Not Found" })),
            Err(ClientError::InvalidResponse(_))
        ));
    }
}
