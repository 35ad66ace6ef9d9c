//! MCP server implementation
//!
//! This module provides the MCP server that dispatches JSON-RPC requests to
//! the registered integration tools.

use crate::types::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Identity used for rate limiting when a caller does not supply one.
pub const DEFAULT_USER_ID: &str = "mcp_user";

/// MCP server error types.
#[derive(Debug, Error)]
pub enum McpServerError {
    /// Tool not found
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool execution failed
    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    /// Invalid parameters
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for MCP server operations.
pub type McpServerResult<T> = Result<T, McpServerError>;

/// Trait for tool implementations.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool definition.
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with given arguments.
    async fn execute(
        &self,
        args: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult>;
}

/// Context for tool execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Identity the call is rate limited under
    pub user_id: String,

    /// Request correlation ID
    pub correlation_id: String,
}

impl ToolContext {
    /// Create a context for `user_id` with a fresh correlation ID.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            correlation_id: uuid::Uuid::now_v7().to_string(),
        }
    }

    /// Context for the default user.
    pub fn anonymous() -> Self {
        Self::new(DEFAULT_USER_ID)
    }
}

/// MCP server.
///
/// Holds the registered tools and answers `initialize`, `ping`, `tools/list`
/// and `tools/call`.
pub struct McpServer {
    /// Server info
    info: ServerInfo,

    /// Server capabilities
    capabilities: ServerCapabilities,

    /// Registered tools
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,

    /// Rate-limit identity for calls without `_meta.userId`
    default_user: String,
}

impl McpServer {
    /// Create a new MCP server.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: ServerInfo {
                name: name.into(),
                version: version.into(),
            },
            capabilities: ServerCapabilities {
                tools: Some(ToolCapabilities { list_changed: false }),
            },
            tools: Arc::new(RwLock::new(HashMap::new())),
            default_user: DEFAULT_USER_ID.to_string(),
        }
    }

    /// Create with the hub's name and version.
    pub fn hub() -> Self {
        Self::new("integration-hub", env!("CARGO_PKG_VERSION"))
    }

    /// Set the identity used when a call carries no user ID.
    pub fn with_default_user(mut self, user_id: impl Into<String>) -> Self {
        self.default_user = user_id.into();
        self
    }

    /// Register a tool.
    pub async fn register_tool(&self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;

        let mut tools = self.tools.write().await;
        if tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "Tool registered twice, replacing");
        }
    }

    /// Register multiple tools.
    pub async fn register_tools(&self, tools: Vec<Arc<dyn Tool>>) {
        for tool in tools {
            self.register_tool(tool).await;
        }
    }

    /// Get all tool definitions, sorted by name.
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().await;
        let mut definitions: Vec<_> = tools.values().map(|t| t.definition()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Execute a tool.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        context: &ToolContext,
    ) -> McpServerResult<ToolResult> {
        let tool = {
            let tools = self.tools.read().await;
            tools
                .get(name)
                .cloned()
                .ok_or_else(|| McpServerError::ToolNotFound(name.to_string()))?
        };

        tool.execute(arguments, context).await
    }

    /// Handle an MCP message.
    ///
    /// Returns `None` for notifications, which never get a response.
    pub async fn handle_request(&self, request: McpRequest) -> Option<McpResponse> {
        let id = match request.id {
            Some(id) => id,
            None => {
                debug!(method = %request.method, "Notification received");
                return None;
            }
        };

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "ping" => McpResponse::success(id, serde_json::json!({})),
            "tools/list" => self.handle_tools_list(id).await,
            "tools/call" => self.handle_tools_call(id, request.params).await,
            _ => McpResponse::error(id, McpError::method_not_found(&request.method)),
        };
        Some(response)
    }

    fn handle_initialize(&self, id: RequestId) -> McpResponse {
        McpResponse::success(
            id,
            serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": self.capabilities,
                "serverInfo": self.info
            }),
        )
    }

    async fn handle_tools_list(&self, id: RequestId) -> McpResponse {
        let tools = self.list_tools().await;
        McpResponse::success(id, serde_json::json!({ "tools": tools }))
    }

    async fn handle_tools_call(
        &self,
        id: RequestId,
        params: Option<serde_json::Value>,
    ) -> McpResponse {
        let params = match params {
            Some(p) => p,
            None => return McpResponse::error(id, McpError::invalid_params("Missing params")),
        };

        let call: ToolCall = match serde_json::from_value(params) {
            Ok(c) => c,
            Err(e) => return McpResponse::error(id, McpError::invalid_params(e.to_string())),
        };

        let user_id = call
            .meta
            .and_then(|meta| meta.user_id)
            .filter(|user| !user.is_empty())
            .unwrap_or_else(|| self.default_user.clone());
        let context = ToolContext::new(user_id);

        info!(
            tool = %call.name,
            user_id = %context.user_id,
            correlation_id = %context.correlation_id,
            "Tool call"
        );

        let result = match self.call_tool(&call.name, call.arguments, &context).await {
            Ok(result) => result,
            Err(e @ McpServerError::ToolNotFound(_)) | Err(e @ McpServerError::InvalidParams(_)) => {
                return McpResponse::error(id, McpError::invalid_params(e.to_string()));
            }
            Err(McpServerError::ExecutionError(message)) => ToolResult::error(message),
            Err(e @ McpServerError::Internal(_)) => {
                return McpResponse::error(id, McpError::internal_error(e.to_string()));
            }
        };

        match serde_json::to_value(result) {
            Ok(value) => McpResponse::success(id, value),
            Err(e) => McpResponse::error(id, McpError::internal_error(e.to_string())),
        }
    }

    /// Get server info.
    pub fn info(&self) -> &ServerInfo {
        &self.info
    }
}
