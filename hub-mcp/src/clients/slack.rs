//! Slack Web API client.
//!
//! Slack answers most failures with HTTP 200 and `{"ok": false, "error": ".."}`;
//! those bodies surface as [`ClientError::ApiError`].

use super::error::{read_json, ClientError};
use crate::config::ApiEndpoint;
use crate::retry::{with_retry_if, RetryConfig};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

/// Slack's per-request page size cap.
pub const MAX_PAGE_SIZE: u32 = 100;

const NOT_FOUND: &str = "Slack API method not found";

/// Slack Web API client.
#[derive(Clone)]
pub struct SlackClient {
    client: Client,
    endpoint: ApiEndpoint,
    retry: RetryConfig,
}

/// One page of channel history.
#[derive(Debug, Clone, Default)]
pub struct History {
    /// Messages, newest first.
    pub messages: Vec<Value>,
    /// Whether older messages remain.
    pub has_more: bool,
}

impl SlackClient {
    /// Create a new Slack client on a shared HTTP client.
    pub fn new(client: Client, endpoint: ApiEndpoint, retry: RetryConfig) -> Self {
        Self {
            client,
            endpoint,
            retry,
        }
    }

    /// Whether a bot token is configured.
    pub fn has_credentials(&self) -> bool {
        self.endpoint.has_auth()
    }

    /// List public and private channels visible to the bot, up to `max`.
    #[instrument(skip(self))]
    pub async fn list_channels(
        &self,
        max: usize,
        exclude_archived: bool,
    ) -> Result<Vec<Value>, ClientError> {
        let mut channels = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query = vec![
                ("types", "public_channel,private_channel".to_string()),
                ("limit", MAX_PAGE_SIZE.to_string()),
                ("exclude_archived", exclude_archived.to_string()),
            ];
            if let Some(ref c) = cursor {
                query.push(("cursor", c.clone()));
            }

            let page = self.get("conversations.list", &query).await?;
            if let Some(batch) = page.get("channels").and_then(Value::as_array) {
                channels.extend(batch.iter().cloned());
            }

            cursor = next_cursor(&page);
            if channels.len() >= max || cursor.is_none() {
                break;
            }
        }

        channels.truncate(max);
        Ok(channels)
    }

    /// Resolve a channel name (with or without `#`) to its ID.
    ///
    /// Strings that already look like channel IDs are returned unchanged.
    #[instrument(skip(self))]
    pub async fn resolve_channel(&self, channel: &str) -> Result<String, ClientError> {
        if looks_like_channel_id(channel) {
            return Ok(channel.to_string());
        }

        let name = channel.trim_start_matches('#');
        let mut cursor: Option<String> = None;

        loop {
            let mut query = vec![
                ("types", "public_channel,private_channel".to_string()),
                ("limit", MAX_PAGE_SIZE.to_string()),
            ];
            if let Some(ref c) = cursor {
                query.push(("cursor", c.clone()));
            }

            let page = self.get("conversations.list", &query).await?;
            let found = page
                .get("channels")
                .and_then(Value::as_array)
                .and_then(|batch| {
                    batch
                        .iter()
                        .find(|c| c.get("name").and_then(Value::as_str) == Some(name))
                })
                .and_then(|c| c.get("id").and_then(Value::as_str));

            if let Some(id) = found {
                debug!("Resolved #{} to {}", name, id);
                return Ok(id.to_string());
            }

            cursor = next_cursor(&page);
            if cursor.is_none() {
                return Err(ClientError::NotFound(format!("Channel '{}' not found", name)));
            }
        }
    }

    /// Channel metadata.
    #[instrument(skip(self))]
    pub async fn channel_info(&self, channel_id: &str) -> Result<Value, ClientError> {
        let response = self
            .get("conversations.info", &[("channel", channel_id.to_string())])
            .await?;
        Ok(response.get("channel").cloned().unwrap_or(Value::Null))
    }

    /// Up to `limit` messages of a channel, following pagination.
    #[instrument(skip(self))]
    pub async fn history(
        &self,
        channel_id: &str,
        limit: usize,
        oldest: Option<&str>,
        latest: Option<&str>,
    ) -> Result<History, ClientError> {
        let mut history = History::default();
        let mut cursor: Option<String> = None;

        while history.messages.len() < limit {
            let remaining = limit - history.messages.len();
            let batch = u32::try_from(remaining).unwrap_or(MAX_PAGE_SIZE).min(MAX_PAGE_SIZE);

            let mut query = vec![
                ("channel", channel_id.to_string()),
                ("limit", batch.to_string()),
            ];
            if let Some(oldest) = oldest {
                query.push(("oldest", oldest.to_string()));
            }
            if let Some(latest) = latest {
                query.push(("latest", latest.to_string()));
            }
            if let Some(ref c) = cursor {
                query.push(("cursor", c.clone()));
            }

            let page = self.get("conversations.history", &query).await?;
            let messages = page.get("messages").and_then(Value::as_array);
            history.messages.extend(messages.into_iter().flatten().cloned());
            history.has_more = page.get("has_more").and_then(Value::as_bool).unwrap_or(false);

            cursor = next_cursor(&page);
            if !history.has_more || cursor.is_none() || messages.map_or(true, Vec::is_empty) {
                break;
            }
        }

        if history.messages.len() > limit {
            history.messages.truncate(limit);
            history.has_more = true;
        }
        Ok(history)
    }

    /// Replies in a thread, excluding the parent message.
    #[instrument(skip(self))]
    pub async fn replies(&self, channel_id: &str, thread_ts: &str) -> Result<Vec<Value>, ClientError> {
        let response = self
            .get(
                "conversations.replies",
                &[("channel", channel_id.to_string()), ("ts", thread_ts.to_string())],
            )
            .await?;

        Ok(response
            .get("messages")
            .and_then(Value::as_array)
            .map(|messages| messages.iter().skip(1).cloned().collect())
            .unwrap_or_default())
    }

    /// Post a message. Never retried.
    #[instrument(skip(self, text, blocks))]
    pub async fn post_message(
        &self,
        channel_id: &str,
        text: &str,
        blocks: Option<&Value>,
        thread_ts: Option<&str>,
    ) -> Result<Value, ClientError> {
        let token = self.token()?;

        let mut body = json!({ "channel": channel_id, "text": text });
        if let Some(blocks) = blocks {
            body["blocks"] = blocks.clone();
        }
        if let Some(ts) = thread_ts {
            body["thread_ts"] = json!(ts);
        }

        debug!("Posting Slack message");
        let response = self
            .client
            .post(self.endpoint.url("chat.postMessage"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        check_ok(read_json(response, NOT_FOUND).await?)
    }

    async fn get(&self, method: &str, query: &[(&str, String)]) -> Result<Value, ClientError> {
        let token = self.token()?;
        let url = self.endpoint.url(method);
        let url = &url;

        with_retry_if(
            &self.retry,
            || async move {
                let response = self
                    .client
                    .get(url)
                    .bearer_auth(token)
                    .query(query)
                    .send()
                    .await?;
                check_ok(read_json(response, NOT_FOUND).await?)
            },
            ClientError::is_retryable,
        )
        .await
    }

    fn token(&self) -> Result<&str, ClientError> {
        self.endpoint
            .api_key
            .as_deref()
            .ok_or(ClientError::MissingCredentials("SLACK_BOT_TOKEN"))
    }
}

fn check_ok(body: Value) -> Result<Value, ClientError> {
    if body.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(body);
    }

    let code = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error");
    warn!(slack_error = code, "Slack API returned ok=false");

    match code {
        "channel_not_found" => Err(ClientError::NotFound(
            "Channel not found or the bot does not have access".to_string(),
        )),
        "invalid_auth" | "not_authed" | "token_revoked" => Err(ClientError::AuthenticationFailed),
        "ratelimited" => Err(ClientError::RateLimited { retry_after_secs: None }),
        _ => Err(ClientError::ApiError {
            status: 200,
            message: explain(code),
        }),
    }
}

fn explain(code: &str) -> String {
    match code {
        "not_in_channel" => "not_in_channel: the bot must be added to the channel first".to_string(),
        "missing_scope" => "missing_scope: the bot token lacks a required scope".to_string(),
        other => other.to_string(),
    }
}

fn next_cursor(page: &Value) -> Option<String> {
    page.pointer("/response_metadata/next_cursor")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

/// Whether `channel` is already a conversation ID (`C…`, `D…` or `G…`).
pub fn looks_like_channel_id(channel: &str) -> bool {
    matches!(channel.chars().next(), Some('C' | 'D' | 'G'))
        && channel.len() > 1
        && channel.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Compact form of a raw Slack message.
pub fn format_message(message: &Value) -> Value {
    let text = message.get("text").and_then(Value::as_str).unwrap_or_default();
    let mut formatted = json!({
        "text": text,
        "parsed_text": parse_message_text(text),
        "ts": message.get("ts").cloned().unwrap_or(Value::Null),
        "user": message.get("user").cloned().unwrap_or(Value::Null),
        "thread_ts": message.get("thread_ts").cloned().unwrap_or(Value::Null),
    });

    if let Some(count) = message.get("reply_count") {
        formatted["thread_info"] = json!({
            "reply_count": count,
            "latest_reply": message.get("latest_reply"),
        });
    }
    if let Some(reactions) = message.get("reactions").and_then(Value::as_array) {
        formatted["reactions"] = reactions
            .iter()
            .map(|r| json!({ "name": r.get("name"), "count": r.get("count") }))
            .collect();
    }

    formatted
}

/// Render Slack mrkdwn references as readable text.
///
/// `<@U123>` becomes `@U123`, `<#C123|general>` becomes `#general`,
/// `<https://x|label>` becomes `label (https://x)`, and `<https://x>` becomes
/// `https://x`. Anything else is left as is.
pub fn parse_message_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let Some(len) = rest[start..].find('>') else {
            rest = &rest[start..];
            break;
        };

        let inner = &rest[start + 1..start + len];
        let (target, label) = match inner.split_once('|') {
            Some((target, label)) => (target, Some(label)),
            None => (inner, None),
        };

        if let Some(user) = target.strip_prefix('@') {
            out.push('@');
            out.push_str(user);
        } else if target.starts_with("#C") {
            out.push('#');
            out.push_str(label.unwrap_or(&target[1..]));
        } else if target.starts_with("http://") || target.starts_with("https://") {
            match label {
                Some(label) => out.push_str(&format!("{} ({})", label, target)),
                None => out.push_str(target),
            }
        } else {
            out.push_str(&rest[start..=start + len]);
        }

        rest = &rest[start + len + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_like_channel_id() {
        assert!(looks_like_channel_id("C024BE91L"));
        assert!(looks_like_channel_id("G0123"));
        assert!(!looks_like_channel_id("general"));
        assert!(!looks_like_channel_id("#general"));
        assert!(!looks_like_channel_id("Company"));
        assert!(!looks_like_channel_id("C"));
    }

    #[test]
    fn test_parse_message_text() {
        assert_eq!(parse_message_text("hi <@U123>"), "hi @U123");
        assert_eq!(parse_message_text("see <#C99|dev> now"), "see #dev now");
        assert_eq!(
            parse_message_text("<https://example.com|docs> and <https://x.io>"),
            "docs (https://example.com) and https://x.io"
        );
        assert_eq!(parse_message_text("<!here> a < b"), "<!here> a < b");
    }

    #[test]
    fn test_check_ok_maps_errors() {
        assert!(check_ok(json!({ "ok": true, "ts": "1.2" })).is_ok());
        assert!(matches!(
            check_ok(json!({ "ok": false, "error": "channel_not_found" })),
            Err(ClientError::NotFound(_))
        ));
        assert!(matches!(
            check_ok(json!({ "ok": false, "error": "invalid_auth" })),
            Err(ClientError::AuthenticationFailed)
        ));
        match check_ok(json!({ "ok": false, "error": "not_in_channel" })) {
            Err(ClientError::ApiError { status, message }) => {
                assert_eq!(status, 200);
                assert!(message.starts_with("not_in_channel"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_format_message() {
        let message = json!({
            "text": "ping <@U1>",
            "ts": "1700000000.000100",
            "user": "U2",
            "reply_count": 2,
            "reactions": [{ "name": "eyes", "count": 1, "users": ["U3"] }]
        });

        let formatted = format_message(&message);
        assert_eq!(formatted["parsed_text"], "ping @U1");
        assert_eq!(formatted["thread_info"]["reply_count"], 2);
        assert_eq!(formatted["reactions"][0]["name"], "eyes");
        assert!(formatted["thread_ts"].is_null());
    }
}
