//! # Integration Hub MCP
//!
//! An MCP (Model Context Protocol) server that exposes Notion, Slack, GitHub
//! and Amplitude as tools, with every call passing through the admission layer
//! in `hub_admission`.
//!
//! ## Overview
//!
//! - **Server**: JSON-RPC dispatch for `initialize`, `ping`, `tools/list` and `tools/call`
//! - **Transport**: newline-delimited JSON over stdio
//! - **Clients**: reqwest clients for the four external APIs
//! - **Tools**: 16 tools, each admitted per calling user before it reaches an API
//!
//! ## Admission
//!
//! A tool call is admitted once, after its arguments validate and before any
//! HTTP request. Every integration spends one token from the caller's
//! per-minute bucket. Amplitude queries are also priced and
//! held against the hourly cost budget and the concurrency cap for as long as
//! the request runs. The caller identity comes from `_meta.userId` on the
//! `tools/call` request and falls back to the configured default user.
//!
//! ## Available Tools
//!
//! ### Notion
//! - `search_notion`, `read_notion_page`, `create_notion_page`, `add_notion_content`
//!
//! ### Slack
//! - `list_slack_channels`, `read_slack_channel`, `send_slack_message`
//!
//! ### GitHub
//! - `read_github_repo`, `read_github_issues`, `read_github_prs`
//!
//! ### Amplitude
//! - `get_amplitude_event_segmentation`, `get_amplitude_funnel`,
//!   `get_amplitude_retention`, `get_amplitude_users`,
//!   `get_amplitude_events_list`, `get_amplitude_realtime_users`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hub_admission::{AdmissionController, SystemClock};
//! use hub_mcp::clients::Clients;
//! use hub_mcp::config::HubConfig;
//! use hub_mcp::tools::all_tools;
//! use hub_mcp::transport::serve_stdio;
//! use hub_mcp::McpServer;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HubConfig::from_env();
//! let admission = Arc::new(AdmissionController::new(config.admission.clone(), Arc::new(SystemClock))?);
//! let clients = Clients::from_config(&config)?;
//!
//! let server = McpServer::hub();
//! server.register_tools(all_tools(admission, &clients)).await;
//! serve_stdio(Arc::new(server)).await?;
//! # Ok(())
//! # }
//! ```

pub mod clients;
pub mod config;
pub mod retry;
pub mod server;
pub mod tools;
pub mod transport;
pub mod types;

pub use config::{ApiEndpoint, ConfigError, HubConfig};
pub use retry::{with_retry, with_retry_if, RetryConfig};
pub use server::{McpServer, McpServerError, McpServerResult, Tool, ToolContext};
pub use types::{
    ContentBlock, McpError, McpRequest, McpResponse, RequestId, ToolCall, ToolDefinition, ToolResult,
};
