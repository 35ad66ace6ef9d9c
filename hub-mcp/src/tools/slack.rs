//! Slack MCP tools
//!
//! List channels, read channel history and post messages.

use super::{denied, failed, invalid, missing_credentials, parse_args};
use crate::clients::slack::{format_message, SlackClient};
use crate::server::{McpServerResult, Tool, ToolContext};
use crate::types::{ToolDefinition, ToolResult};
use async_trait::async_trait;
use hub_admission::{AdmissionController, Integration};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument};

const CREDENTIALS: &str = "SLACK_BOT_TOKEN";
const MAX_MESSAGES: usize = 1000;

/// Get all Slack tools.
pub fn slack_tools(admission: Arc<AdmissionController>, client: &SlackClient) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ListSlackChannelsTool::new(admission.clone(), client.clone())),
        Arc::new(ReadSlackChannelTool::new(admission.clone(), client.clone())),
        Arc::new(SendSlackMessageTool::new(admission, client.clone())),
    ]
}

fn text_at(value: &Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Tool to list channels visible to the bot.
pub struct ListSlackChannelsTool {
    admission: Arc<AdmissionController>,
    client: SlackClient,
}

impl ListSlackChannelsTool {
    /// Create the tool.
    pub fn new(admission: Arc<AdmissionController>, client: SlackClient) -> Self {
        Self { admission, client }
    }
}

#[derive(Debug, Deserialize)]
struct ListChannelsParams {
    #[serde(default = "default_channel_limit")]
    limit: usize,
    #[serde(default = "default_true")]
    exclude_archived: bool,
}

fn default_channel_limit() -> usize {
    100
}

fn default_true() -> bool {
    true
}

#[async_trait]
impl Tool for ListSlackChannelsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("list_slack_channels", "List public and private Slack channels the bot can see")
            .with_integration(Integration::Slack)
            .with_category("read")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of channels (1-1000)",
                        "default": 100
                    },
                    "exclude_archived": {
                        "type": "boolean",
                        "description": "Skip archived channels",
                        "default": true
                    }
                }
            }))
    }

    #[instrument(skip(self, args, context), fields(tool = "list_slack_channels", user = %context.user_id))]
    async fn execute(&self, args: Value, context: &ToolContext) -> McpServerResult<ToolResult> {
        let params: ListChannelsParams = parse_args(args)?;

        if !(1..=MAX_MESSAGES).contains(&params.limit) {
            return Ok(invalid("Invalid limit", "limit must be between 1 and 1000"));
        }
        if !self.client.has_credentials() {
            return Ok(missing_credentials(Integration::Slack, CREDENTIALS));
        }
        if let Err(denial) = self.admission.admit(Integration::Slack, &context.user_id) {
            return Ok(denied(denial));
        }

        match self
            .client
            .list_channels(params.limit, params.exclude_archived)
            .await
        {
            Ok(channels) => {
                let channels: Vec<Value> = channels
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.get("id"),
                            "name": c.get("name"),
                            "is_private": c.get("is_private").and_then(Value::as_bool).unwrap_or(false),
                            "is_archived": c.get("is_archived").and_then(Value::as_bool).unwrap_or(false),
                            "num_members": c.get("num_members").and_then(Value::as_u64).unwrap_or(0),
                            "topic": text_at(c, "/topic/value"),
                            "purpose": text_at(c, "/purpose/value"),
                        })
                    })
                    .collect();

                Ok(ToolResult::json(json!({
                    "success": true,
                    "count": channels.len(),
                    "channels": channels,
                })))
            }
            Err(e) => Ok(failed(Integration::Slack, "list channels", e)),
        }
    }
}

/// Tool to read recent messages from a channel.
pub struct ReadSlackChannelTool {
    admission: Arc<AdmissionController>,
    client: SlackClient,
}

impl ReadSlackChannelTool {
    /// Create the tool.
    pub fn new(admission: Arc<AdmissionController>, client: SlackClient) -> Self {
        Self { admission, client }
    }
}

#[derive(Debug, Deserialize)]
struct ReadChannelParams {
    channel: String,
    #[serde(default = "default_message_limit")]
    limit: usize,
    #[serde(default)]
    include_threads: bool,
    oldest: Option<String>,
    latest: Option<String>,
}

fn default_message_limit() -> usize {
    100
}

#[async_trait]
impl Tool for ReadSlackChannelTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("read_slack_channel", "Read recent messages from a Slack channel")
            .with_integration(Integration::Slack)
            .with_category("read")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "channel": {
                        "type": "string",
                        "description": "Channel name (with or without #) or channel ID"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Number of messages to return (1-1000)",
                        "default": 100
                    },
                    "include_threads": {
                        "type": "boolean",
                        "description": "Fetch replies for threaded messages",
                        "default": false
                    },
                    "oldest": {
                        "type": "string",
                        "description": "Only messages after this Slack timestamp"
                    },
                    "latest": {
                        "type": "string",
                        "description": "Only messages before this Slack timestamp"
                    }
                },
                "required": ["channel"]
            }))
    }

    #[instrument(skip(self, args, context), fields(tool = "read_slack_channel", user = %context.user_id))]
    async fn execute(&self, args: Value, context: &ToolContext) -> McpServerResult<ToolResult> {
        let params: ReadChannelParams = parse_args(args)?;

        if params.channel.trim().trim_start_matches('#').is_empty() {
            return Ok(invalid("Missing channel", "channel must not be empty"));
        }
        if !(1..=MAX_MESSAGES).contains(&params.limit) {
            return Ok(invalid("Invalid limit", "limit must be between 1 and 1000"));
        }
        if !self.client.has_credentials() {
            return Ok(missing_credentials(Integration::Slack, CREDENTIALS));
        }
        if let Err(denial) = self.admission.admit(Integration::Slack, &context.user_id) {
            return Ok(denied(denial));
        }

        let channel_id = match self.client.resolve_channel(&params.channel).await {
            Ok(id) => id,
            Err(e) => return Ok(failed(Integration::Slack, "resolve channel", e)),
        };
        let info = match self.client.channel_info(&channel_id).await {
            Ok(info) => info,
            Err(e) => return Ok(failed(Integration::Slack, "read channel info", e)),
        };
        let history = match self
            .client
            .history(
                &channel_id,
                params.limit,
                params.oldest.as_deref(),
                params.latest.as_deref(),
            )
            .await
        {
            Ok(history) => history,
            Err(e) => return Ok(failed(Integration::Slack, "read channel history", e)),
        };

        debug!(count = history.messages.len(), "Read Slack history");

        let mut messages = Vec::with_capacity(history.messages.len());
        for message in &history.messages {
            let mut formatted = format_message(message);

            let has_replies = message.get("reply_count").and_then(Value::as_u64).unwrap_or(0) > 0;
            if let (true, true, Some(ts)) = (
                params.include_threads,
                has_replies,
                message.get("thread_ts").and_then(Value::as_str),
            ) {
                match self.client.replies(&channel_id, ts).await {
                    Ok(replies) => {
                        formatted["thread_replies"] = replies.iter().map(format_message).collect();
                    }
                    Err(e) => return Ok(failed(Integration::Slack, "read thread replies", e)),
                }
            }

            messages.push(formatted);
        }

        Ok(ToolResult::json(json!({
            "success": true,
            "channel": {
                "id": info.get("id").cloned().unwrap_or_else(|| json!(channel_id)),
                "name": info.get("name"),
                "is_private": info.get("is_private").and_then(Value::as_bool).unwrap_or(false),
                "topic": text_at(&info, "/topic/value"),
                "purpose": text_at(&info, "/purpose/value"),
            },
            "message_count": messages.len(),
            "messages": messages,
            "has_more": history.has_more,
            "oldest": params.oldest,
            "latest": params.latest,
        })))
    }
}

/// Tool to post a message to a channel or thread.
pub struct SendSlackMessageTool {
    admission: Arc<AdmissionController>,
    client: SlackClient,
}

impl SendSlackMessageTool {
    /// Create the tool.
    pub fn new(admission: Arc<AdmissionController>, client: SlackClient) -> Self {
        Self { admission, client }
    }
}

#[derive(Debug, Deserialize)]
struct SendMessageParams {
    channel: String,
    text: String,
    blocks: Option<Value>,
    thread_ts: Option<String>,
}

#[async_trait]
impl Tool for SendSlackMessageTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("send_slack_message", "Send a message to a Slack channel or thread")
            .with_integration(Integration::Slack)
            .with_category("write")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "channel": {
                        "type": "string",
                        "description": "Channel name (with or without #) or channel ID"
                    },
                    "text": {
                        "type": "string",
                        "description": "Message text (also the fallback when blocks are given)"
                    },
                    "blocks": {
                        "type": "array",
                        "items": {"type": "object"},
                        "description": "Block Kit blocks"
                    },
                    "thread_ts": {
                        "type": "string",
                        "description": "Timestamp of the parent message to reply in its thread"
                    }
                },
                "required": ["channel", "text"]
            }))
    }

    #[instrument(skip(self, args, context), fields(tool = "send_slack_message", user = %context.user_id))]
    async fn execute(&self, args: Value, context: &ToolContext) -> McpServerResult<ToolResult> {
        let params: SendMessageParams = parse_args(args)?;

        if params.text.trim().is_empty() {
            return Ok(invalid("Missing text", "text must not be empty"));
        }
        if matches!(params.blocks, Some(ref b) if !b.is_array()) {
            return Ok(invalid("Invalid blocks", "blocks must be an array of Block Kit objects"));
        }
        if !self.client.has_credentials() {
            return Ok(missing_credentials(Integration::Slack, CREDENTIALS));
        }
        if let Err(denial) = self.admission.admit(Integration::Slack, &context.user_id) {
            return Ok(denied(denial));
        }

        let channel_id = match self.client.resolve_channel(&params.channel).await {
            Ok(id) => id,
            Err(e) => return Ok(failed(Integration::Slack, "resolve channel", e)),
        };

        match self
            .client
            .post_message(
                &channel_id,
                &params.text,
                params.blocks.as_ref(),
                params.thread_ts.as_deref(),
            )
            .await
        {
            Ok(response) => Ok(ToolResult::json(json!({
                "success": true,
                "message_ts": response.get("ts"),
                "channel": response.get("channel").cloned().unwrap_or_else(|| json!(channel_id)),
                "thread_ts": params.thread_ts,
                "message": "Message sent successfully",
            }))),
            Err(e) => Ok(failed(Integration::Slack, "send message", e)),
        }
    }
}
