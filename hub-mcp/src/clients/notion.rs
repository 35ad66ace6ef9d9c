//! Notion API client.
//!
//! Bearer-token client for the Notion REST API (`Notion-Version: 2022-06-28`),
//! plus the helpers that flatten Notion's nested page and block documents into
//! plain values for tool output.

use super::error::{read_json, ClientError};
use crate::config::ApiEndpoint;
use crate::retry::{with_retry_if, RetryConfig};
use reqwest::{Client, Method};
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};

/// API version sent with every request.
pub const NOTION_VERSION: &str = "2022-06-28";

/// Notion caps block arrays at this many children per request.
pub const MAX_BLOCKS_PER_REQUEST: usize = 100;

const NOT_FOUND: &str = "Notion page or block not found";

/// Notion API client.
#[derive(Clone)]
pub struct NotionClient {
    client: Client,
    endpoint: ApiEndpoint,
    retry: RetryConfig,
}

impl NotionClient {
    /// Create a new Notion client on a shared HTTP client.
    pub fn new(client: Client, endpoint: ApiEndpoint, retry: RetryConfig) -> Self {
        Self {
            client,
            endpoint,
            retry,
        }
    }

    /// Whether an integration token is configured.
    pub fn has_credentials(&self) -> bool {
        self.endpoint.has_auth()
    }

    /// Search pages and databases shared with the integration.
    ///
    /// `filter` restricts results to `"page"` or `"database"` objects.
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        query: &str,
        filter: Option<&str>,
        page_size: u32,
    ) -> Result<Value, ClientError> {
        let mut body = json!({ "query": query, "page_size": page_size });
        if let Some(object) = filter {
            body["filter"] = json!({ "value": object, "property": "object" });
        }

        debug!("Searching Notion");
        self.send(Method::POST, "/search", Some(&body), true).await
    }

    /// Fetch a page object.
    #[instrument(skip(self))]
    pub async fn get_page(&self, page_id: &str) -> Result<Value, ClientError> {
        debug!("Fetching Notion page {}", page_id);
        self.send(Method::GET, &format!("/pages/{}", page_id), None, true)
            .await
    }

    /// Fetch every child block of a page or block, following pagination.
    #[instrument(skip(self))]
    pub async fn get_block_children(&self, block_id: &str) -> Result<Vec<Value>, ClientError> {
        let mut blocks = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut path = format!("/blocks/{}/children?page_size={}", block_id, MAX_BLOCKS_PER_REQUEST);
            if let Some(ref start) = cursor {
                path.push_str("&start_cursor=");
                path.push_str(start);
            }

            let page = self.send(Method::GET, &path, None, true).await?;
            if let Some(results) = page.get("results").and_then(Value::as_array) {
                blocks.extend(results.iter().cloned());
            }

            let has_more = page.get("has_more").and_then(Value::as_bool).unwrap_or(false);
            cursor = page
                .get("next_cursor")
                .and_then(Value::as_str)
                .map(str::to_string);

            if !has_more || cursor.is_none() {
                break;
            }
        }

        debug!(count = blocks.len(), "Fetched Notion blocks");
        Ok(blocks)
    }

    /// Create a page under `parent_page_id`.
    ///
    /// Children beyond the per-request cap are appended after creation.
    #[instrument(skip(self, children), fields(children = children.len()))]
    pub async fn create_page(
        &self,
        parent_page_id: &str,
        title: &str,
        children: Vec<Value>,
    ) -> Result<Value, ClientError> {
        let split = children.len().min(MAX_BLOCKS_PER_REQUEST);
        let (first, rest) = children.split_at(split);

        let mut body = json!({
            "parent": { "page_id": parent_page_id },
            "properties": {
                "title": { "title": [{ "text": { "content": title } }] }
            },
        });
        if !first.is_empty() {
            body["children"] = Value::Array(first.to_vec());
        }

        let page = self.send(Method::POST, "/pages", Some(&body), false).await?;

        if !rest.is_empty() {
            let page_id = page
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| ClientError::InvalidResponse("created page has no id".to_string()))?;
            self.append_blocks(page_id, rest.to_vec()).await?;
        }

        Ok(page)
    }

    /// Append blocks to a page or block. Returns the number of blocks created.
    #[instrument(skip(self, blocks), fields(blocks = blocks.len()))]
    pub async fn append_blocks(&self, block_id: &str, blocks: Vec<Value>) -> Result<usize, ClientError> {
        let path = format!("/blocks/{}/children", block_id);
        let mut appended = 0;

        for chunk in blocks.chunks(MAX_BLOCKS_PER_REQUEST) {
            let body = json!({ "children": chunk });
            let response = self.send(Method::PATCH, &path, Some(&body), false).await?;
            appended += response
                .get("results")
                .and_then(Value::as_array)
                .map_or(chunk.len(), Vec::len);
        }

        Ok(appended)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        idempotent: bool,
    ) -> Result<Value, ClientError> {
        let token = self
            .endpoint
            .api_key
            .as_deref()
            .ok_or(ClientError::MissingCredentials("NOTION_API_KEY"))?;
        let url = self.endpoint.url(path);
        let (url, method) = (&url, &method);

        let attempt = || async move {
            let mut request = self
                .client
                .request(method.clone(), url)
                .bearer_auth(token)
                .header("Notion-Version", NOTION_VERSION);
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await?;
            read_json(response, NOT_FOUND).await
        };

        if idempotent {
            with_retry_if(&self.retry, attempt, ClientError::is_retryable).await
        } else {
            attempt().await
        }
    }
}

fn plain_text(rich_text: Option<&Value>) -> String {
    rich_text
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("plain_text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

/// Title of a page or database, or `"Untitled"`.
pub fn extract_title(object: &Value) -> String {
    if let Some(properties) = object.get("properties").and_then(Value::as_object) {
        for property in properties.values() {
            if property.get("type").and_then(Value::as_str) == Some("title") {
                let title = plain_text(property.get("title"));
                if !title.is_empty() {
                    return title;
                }
            }
        }
    }

    // Databases carry their title at the top level.
    let title = plain_text(object.get("title"));
    if title.is_empty() {
        "Untitled".to_string()
    } else {
        title
    }
}

/// Flatten typed Notion properties into plain key/value pairs.
///
/// Property types without a simple scalar form are skipped.
pub fn simplify_properties(properties: &Value) -> Value {
    let mut simple = Map::new();
    let Some(properties) = properties.as_object() else {
        return Value::Object(simple);
    };

    for (key, property) in properties {
        let kind = property.get("type").and_then(Value::as_str).unwrap_or_default();
        let value = property.get(kind);

        let simplified = match kind {
            "title" | "rich_text" => {
                let text = plain_text(value);
                (!text.is_empty()).then(|| Value::String(text))
            }
            "select" => value
                .and_then(|v| v.get("name"))
                .cloned(),
            "multi_select" => value.and_then(Value::as_array).map(|options| {
                options
                    .iter()
                    .filter_map(|o| o.get("name").cloned())
                    .collect::<Vec<_>>()
                    .into()
            }),
            "date" => value.and_then(|v| v.get("start")).cloned(),
            "number" | "url" | "email" | "phone_number" => Some(value.cloned().unwrap_or(Value::Null)),
            "checkbox" => Some(value.cloned().unwrap_or(Value::Bool(false))),
            _ => None,
        };

        if let Some(simplified) = simplified {
            simple.insert(key.clone(), simplified);
        }
    }

    Value::Object(simple)
}

/// Render blocks as readable text, one paragraph per block.
pub fn blocks_to_text(blocks: &[Value]) -> String {
    let mut parts = Vec::new();

    for block in blocks {
        let kind = block.get("type").and_then(Value::as_str).unwrap_or_default();
        let body = block.get(kind);
        let text = plain_text(body.and_then(|b| b.get("rich_text")));

        let rendered = match kind {
            "divider" => Some("---".to_string()),
            _ if text.is_empty() => None,
            "paragraph" => Some(text),
            "heading_1" => Some(format!("# {}", text)),
            "heading_2" => Some(format!("## {}", text)),
            "heading_3" => Some(format!("### {}", text)),
            "bulleted_list_item" => Some(format!("• {}", text)),
            "numbered_list_item" => Some(format!("1. {}", text)),
            "code" => {
                let language = body
                    .and_then(|b| b.get("language"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Some(format!("```{}\n{}\n```", language, text))
            }
            _ => None,
        };

        parts.extend(rendered);
    }

    parts.join("\n\n")
}

/// A paragraph block holding `text`.
pub fn paragraph_block(text: &str) -> Value {
    json!({
        "object": "block",
        "type": "paragraph",
        "paragraph": {
            "rich_text": [{ "type": "text", "text": { "content": text } }]
        }
    })
}

/// One paragraph block per non-blank line of `content`.
pub fn plain_text_blocks(content: &str) -> Vec<Value> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(paragraph_block)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rich(text: &str) -> Value {
        json!([{ "plain_text": text }])
    }

    #[test]
    fn test_extract_title_from_properties_and_database() {
        let page = json!({
            "properties": {
                "Status": { "type": "select", "select": { "name": "Done" } },
                "Name": { "type": "title", "title": [{ "plain_text": "Road" }, { "plain_text": "map" }] }
            }
        });
        assert_eq!(extract_title(&page), "Roadmap");

        let database = json!({ "object": "database", "title": rich("Tasks") });
        assert_eq!(extract_title(&database), "Tasks");

        assert_eq!(extract_title(&json!({ "properties": {} })), "Untitled");
    }

    #[test]
    fn test_simplify_properties() {
        let properties = json!({
            "Name": { "type": "title", "title": rich("Launch") },
            "Tags": { "type": "multi_select", "multi_select": [{ "name": "a" }, { "name": "b" }] },
            "Points": { "type": "number", "number": 3 },
            "Done": { "type": "checkbox", "checkbox": true },
            "Due": { "type": "date", "date": { "start": "2024-01-01" } },
            "Owner": { "type": "people", "people": [] },
            "Empty": { "type": "select", "select": null }
        });

        let simple = simplify_properties(&properties);
        assert_eq!(simple["Name"], "Launch");
        assert_eq!(simple["Tags"], json!(["a", "b"]));
        assert_eq!(simple["Points"], 3);
        assert_eq!(simple["Done"], true);
        assert_eq!(simple["Due"], "2024-01-01");
        assert!(simple.get("Owner").is_none());
        assert!(simple.get("Empty").is_none());
    }

    #[test]
    fn test_blocks_to_text() {
        let blocks = vec![
            json!({ "type": "heading_1", "heading_1": { "rich_text": rich("Plan") } }),
            json!({ "type": "paragraph", "paragraph": { "rich_text": [] } }),
            json!({ "type": "bulleted_list_item", "bulleted_list_item": { "rich_text": rich("ship") } }),
            json!({ "type": "divider", "divider": {} }),
            json!({ "type": "code", "code": { "rich_text": rich("fn main() {}"), "language": "rust" } }),
            json!({ "type": "image", "image": {} }),
        ];

        assert_eq!(
            blocks_to_text(&blocks),
            "# Plan\n\n• ship\n\n---\n\n```rust\nfn main() {}\n```"
        );
    }

    #[test]
    fn test_plain_text_blocks_skip_blank_lines() {
        let blocks = plain_text_blocks("first\n\n   \nsecond");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1]["paragraph"]["rich_text"][0]["text"]["content"], "second");
    }
}
