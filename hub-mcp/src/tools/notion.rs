//! Notion MCP tools
//!
//! Search, read, create and append to Notion pages.

use super::{denied, failed, invalid, missing_credentials, parse_args};
use crate::clients::notion::{
    blocks_to_text, extract_title, plain_text_blocks, simplify_properties, NotionClient,
};
use crate::server::{McpServerResult, Tool, ToolContext};
use crate::types::{ToolDefinition, ToolResult};
use async_trait::async_trait;
use hub_admission::{AdmissionController, Integration};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument};

const CREDENTIALS: &str = "NOTION_API_KEY";

/// Get all Notion tools.
pub fn notion_tools(admission: Arc<AdmissionController>, client: &NotionClient) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(SearchNotionTool::new(admission.clone(), client.clone())),
        Arc::new(ReadNotionPageTool::new(admission.clone(), client.clone())),
        Arc::new(CreateNotionPageTool::new(admission.clone(), client.clone())),
        Arc::new(AddNotionContentTool::new(admission, client.clone())),
    ]
}

/// Tool to search pages and databases.
pub struct SearchNotionTool {
    admission: Arc<AdmissionController>,
    client: NotionClient,
}

impl SearchNotionTool {
    /// Create the tool.
    pub fn new(admission: Arc<AdmissionController>, client: NotionClient) -> Self {
        Self { admission, client }
    }
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: String,
    filter_type: Option<String>,
    #[serde(default = "default_search_limit")]
    limit: u32,
}

fn default_search_limit() -> u32 {
    20
}

#[async_trait]
impl Tool for SearchNotionTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("search_notion", "Search Notion pages and databases shared with the integration")
            .with_integration(Integration::Notion)
            .with_category("search")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query"
                    },
                    "filter_type": {
                        "type": "string",
                        "enum": ["page", "database"],
                        "description": "Only return pages or only databases"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of results (1-100)",
                        "default": 20
                    }
                },
                "required": ["query"]
            }))
    }

    #[instrument(skip(self, args, context), fields(tool = "search_notion", user = %context.user_id))]
    async fn execute(&self, args: Value, context: &ToolContext) -> McpServerResult<ToolResult> {
        let params: SearchParams = parse_args(args)?;

        if let Some(ref filter) = params.filter_type {
            if filter != "page" && filter != "database" {
                return Ok(invalid("Invalid filter type", "filter_type must be 'page' or 'database'"));
            }
        }
        if !(1..=100).contains(&params.limit) {
            return Ok(invalid("Invalid limit", "limit must be between 1 and 100"));
        }
        if !self.client.has_credentials() {
            return Ok(missing_credentials(Integration::Notion, CREDENTIALS));
        }
        if let Err(denial) = self.admission.admit(Integration::Notion, &context.user_id) {
            return Ok(denied(denial));
        }

        debug!("Searching Notion for: {}", params.query);

        match self
            .client
            .search(&params.query, params.filter_type.as_deref(), params.limit)
            .await
        {
            Ok(response) => {
                let results: Vec<Value> = response
                    .get("results")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .map(|item| {
                        json!({
                            "id": item.get("id"),
                            "type": item.get("object"),
                            "title": extract_title(item),
                            "url": item.get("url").and_then(Value::as_str).unwrap_or_default(),
                            "last_edited": item.get("last_edited_time").and_then(Value::as_str).unwrap_or_default(),
                        })
                    })
                    .collect();

                Ok(ToolResult::json(json!({
                    "count": results.len(),
                    "results": results,
                    "has_more": response.get("has_more").and_then(Value::as_bool).unwrap_or(false),
                })))
            }
            Err(e) => Ok(failed(Integration::Notion, "search Notion", e)),
        }
    }
}

/// Tool to read a page and, optionally, its content.
pub struct ReadNotionPageTool {
    admission: Arc<AdmissionController>,
    client: NotionClient,
}

impl ReadNotionPageTool {
    /// Create the tool.
    pub fn new(admission: Arc<AdmissionController>, client: NotionClient) -> Self {
        Self { admission, client }
    }
}

#[derive(Debug, Deserialize)]
struct ReadPageParams {
    page_id: String,
    #[serde(default = "default_true")]
    include_content: bool,
}

fn default_true() -> bool {
    true
}

#[async_trait]
impl Tool for ReadNotionPageTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("read_notion_page", "Read a Notion page's properties and text content")
            .with_integration(Integration::Notion)
            .with_category("read")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "page_id": {
                        "type": "string",
                        "description": "The Notion page ID"
                    },
                    "include_content": {
                        "type": "boolean",
                        "description": "Whether to include the page's blocks as text",
                        "default": true
                    }
                },
                "required": ["page_id"]
            }))
    }

    #[instrument(skip(self, args, context), fields(tool = "read_notion_page", user = %context.user_id))]
    async fn execute(&self, args: Value, context: &ToolContext) -> McpServerResult<ToolResult> {
        let params: ReadPageParams = parse_args(args)?;

        if params.page_id.trim().is_empty() {
            return Ok(invalid("Missing page ID", "page_id must not be empty"));
        }
        if !self.client.has_credentials() {
            return Ok(missing_credentials(Integration::Notion, CREDENTIALS));
        }
        if let Err(denial) = self.admission.admit(Integration::Notion, &context.user_id) {
            return Ok(denied(denial));
        }

        let page = match self.client.get_page(&params.page_id).await {
            Ok(page) => page,
            Err(e) => return Ok(failed(Integration::Notion, "read page", e)),
        };

        let mut result = json!({
            "id": page.get("id"),
            "title": extract_title(&page),
            "url": page.get("url").and_then(Value::as_str).unwrap_or_default(),
            "properties": simplify_properties(page.get("properties").unwrap_or(&Value::Null)),
            "created_time": page.get("created_time"),
            "last_edited_time": page.get("last_edited_time"),
        });

        if params.include_content {
            match self.client.get_block_children(&params.page_id).await {
                Ok(blocks) => result["content"] = json!(blocks_to_text(&blocks)),
                Err(e) => return Ok(failed(Integration::Notion, "read page content", e)),
            }
        }

        Ok(ToolResult::json(result))
    }
}

/// Tool to create a page under an existing page.
pub struct CreateNotionPageTool {
    admission: Arc<AdmissionController>,
    client: NotionClient,
}

impl CreateNotionPageTool {
    /// Create the tool.
    pub fn new(admission: Arc<AdmissionController>, client: NotionClient) -> Self {
        Self { admission, client }
    }
}

#[derive(Debug, Deserialize)]
struct CreatePageParams {
    parent_page_id: String,
    title: String,
    content: Option<String>,
}

#[async_trait]
impl Tool for CreateNotionPageTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("create_notion_page", "Create a Notion page with a title and optional plain-text content")
            .with_integration(Integration::Notion)
            .with_category("write")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "parent_page_id": {
                        "type": "string",
                        "description": "ID of the page to create the new page under"
                    },
                    "title": {
                        "type": "string",
                        "description": "Title of the new page"
                    },
                    "content": {
                        "type": "string",
                        "description": "Plain text; each non-empty line becomes a paragraph"
                    }
                },
                "required": ["parent_page_id", "title"]
            }))
    }

    #[instrument(skip(self, args, context), fields(tool = "create_notion_page", user = %context.user_id))]
    async fn execute(&self, args: Value, context: &ToolContext) -> McpServerResult<ToolResult> {
        let params: CreatePageParams = parse_args(args)?;

        if params.title.trim().is_empty() {
            return Ok(invalid("Missing title", "title must not be empty"));
        }
        if !self.client.has_credentials() {
            return Ok(missing_credentials(Integration::Notion, CREDENTIALS));
        }
        if let Err(denial) = self.admission.admit(Integration::Notion, &context.user_id) {
            return Ok(denied(denial));
        }

        let children = params
            .content
            .as_deref()
            .map(plain_text_blocks)
            .unwrap_or_default();

        match self
            .client
            .create_page(&params.parent_page_id, &params.title, children)
            .await
        {
            Ok(page) => Ok(ToolResult::json(json!({
                "success": true,
                "id": page.get("id"),
                "url": page.get("url").and_then(Value::as_str).unwrap_or_default(),
                "title": params.title,
                "created_time": page.get("created_time"),
            }))),
            Err(e) => Ok(failed(Integration::Notion, "create page", e)),
        }
    }
}

/// Tool to append plain text to an existing page.
pub struct AddNotionContentTool {
    admission: Arc<AdmissionController>,
    client: NotionClient,
}

impl AddNotionContentTool {
    /// Create the tool.
    pub fn new(admission: Arc<AdmissionController>, client: NotionClient) -> Self {
        Self { admission, client }
    }
}

#[derive(Debug, Deserialize)]
struct AddContentParams {
    page_id: String,
    content: String,
}

#[async_trait]
impl Tool for AddNotionContentTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("add_notion_content", "Append plain-text paragraphs to an existing Notion page")
            .with_integration(Integration::Notion)
            .with_category("write")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "page_id": {
                        "type": "string",
                        "description": "ID of the page to append to"
                    },
                    "content": {
                        "type": "string",
                        "description": "Plain text; each non-empty line becomes a paragraph"
                    }
                },
                "required": ["page_id", "content"]
            }))
    }

    #[instrument(skip(self, args, context), fields(tool = "add_notion_content", user = %context.user_id))]
    async fn execute(&self, args: Value, context: &ToolContext) -> McpServerResult<ToolResult> {
        let params: AddContentParams = parse_args(args)?;

        let blocks = plain_text_blocks(&params.content);
        if blocks.is_empty() {
            return Ok(invalid("No content to add", "content has no non-empty lines"));
        }
        if !self.client.has_credentials() {
            return Ok(missing_credentials(Integration::Notion, CREDENTIALS));
        }
        if let Err(denial) = self.admission.admit(Integration::Notion, &context.user_id) {
            return Ok(denied(denial));
        }

        match self.client.append_blocks(&params.page_id, blocks).await {
            Ok(added) => Ok(ToolResult::json(json!({
                "success": true,
                "blocks_added": added,
                "page_id": params.page_id,
            }))),
            Err(e) => Ok(failed(Integration::Notion, "add content", e)),
        }
    }
}
