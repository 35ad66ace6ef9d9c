//! Integration MCP tools
//!
//! Every tool follows the same sequence: parse and validate its arguments,
//! check that its integration has credentials, pass admission for the calling
//! user, then call the external API. Validation failures, admission denials
//! and API failures all come back as error tool results carrying a JSON
//! document, never as protocol errors.

pub mod amplitude;
pub mod github;
pub mod notion;
pub mod slack;

pub use amplitude::*;
pub use github::*;
pub use notion::*;
pub use slack::*;

use crate::clients::{ClientError, Clients};
use crate::server::{McpServerError, McpServerResult, Tool};
use crate::types::ToolResult;
use hub_admission::{AdmissionController, AdmissionDenied, Integration};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

/// Get all available MCP tools.
///
/// # Example
///
/// ```rust,no_run
/// use hub_admission::AdmissionController;
/// use hub_mcp::clients::Clients;
/// use hub_mcp::config::HubConfig;
/// use hub_mcp::tools::all_tools;
/// use std::sync::Arc;
///
/// let config = HubConfig::from_env();
/// let clients = Clients::from_config(&config).unwrap();
/// let tools = all_tools(Arc::new(AdmissionController::with_defaults()), &clients);
/// println!("Available tools: {}", tools.len());
/// ```
pub fn all_tools(admission: Arc<AdmissionController>, clients: &Clients) -> Vec<Arc<dyn Tool>> {
    let mut tools = Vec::new();

    // Notion tools (4)
    tools.extend(notion_tools(admission.clone(), &clients.notion));

    // Slack tools (3)
    tools.extend(slack_tools(admission.clone(), &clients.slack));

    // GitHub tools (3)
    tools.extend(github_tools(admission.clone(), &clients.github));

    // Amplitude tools (6)
    tools.extend(amplitude_tools(admission, &clients.amplitude));

    tools
}

pub(crate) fn parse_args<T: DeserializeOwned>(args: serde_json::Value) -> McpServerResult<T> {
    serde_json::from_value(args).map_err(|e| McpServerError::InvalidParams(e.to_string()))
}

/// Error result for arguments that parse but make no sense.
pub(crate) fn invalid(error: &str, message: impl Into<String>) -> ToolResult {
    ToolResult::json_error(json!({ "error": error, "message": message.into() }))
}

pub(crate) fn denied(denial: AdmissionDenied) -> ToolResult {
    ToolResult::json_error(denial.payload())
}

pub(crate) fn failed(integration: Integration, action: &str, err: ClientError) -> ToolResult {
    match err {
        ClientError::MissingCredentials(_) | ClientError::RateLimited { .. } => {
            warn!(%integration, "Failed to {}: {}", action, err);
        }
        _ => error!(%integration, "Failed to {}: {}", action, err),
    }
    ToolResult::json_error(err.payload(integration))
}

/// Error result for an integration with no credentials configured.
pub(crate) fn missing_credentials(integration: Integration, vars: &'static str) -> ToolResult {
    ToolResult::json_error(ClientError::MissingCredentials(vars).payload(integration))
}
