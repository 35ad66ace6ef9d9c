//! GitHub MCP tools
//!
//! Read repository metadata, issues and pull requests.

use super::{denied, failed, invalid, parse_args};
use crate::clients::github::{GitHubClient, IssueFilters, PullFilters, MAX_PER_PAGE};
use crate::server::{McpServerResult, Tool, ToolContext};
use crate::types::{ToolDefinition, ToolResult};
use async_trait::async_trait;
use hub_admission::{AdmissionController, Integration};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::instrument;

const STATES: [&str; 3] = ["open", "closed", "all"];
const DIRECTIONS: [&str; 2] = ["asc", "desc"];
const ISSUE_SORTS: [&str; 3] = ["created", "updated", "comments"];
const PULL_SORTS: [&str; 3] = ["created", "updated", "popularity"];

/// Get all GitHub tools.
pub fn github_tools(admission: Arc<AdmissionController>, client: &GitHubClient) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ReadGitHubRepoTool::new(admission.clone(), client.clone())),
        Arc::new(ReadGitHubIssuesTool::new(admission.clone(), client.clone())),
        Arc::new(ReadGitHubPrsTool::new(admission, client.clone())),
    ]
}

/// `owner/repo` with both halves non-empty.
fn valid_repo(repo: &str) -> bool {
    matches!(repo.split_once('/'), Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/'))
}

fn check_choice(field: &str, value: &str, allowed: &[&str]) -> Option<ToolResult> {
    if allowed.contains(&value) {
        return None;
    }
    let options = allowed
        .iter()
        .map(|a| format!("'{}'", a))
        .collect::<Vec<_>>()
        .join(", ");
    Some(invalid(
        &format!("Invalid {}", field),
        format!("{} must be one of {}", field, options),
    ))
}

fn validate_listing(repo: &str, state: &str, direction: &str, limit: u32) -> Option<ToolResult> {
    if !valid_repo(repo) {
        return Some(invalid("Invalid repository", "Invalid repository format. Use 'owner/repo'"));
    }
    if !(1..=MAX_PER_PAGE).contains(&limit) {
        return Some(invalid("Invalid limit", "limit must be between 1 and 100"));
    }
    check_choice("state", state, &STATES).or_else(|| check_choice("direction", direction, &DIRECTIONS))
}

fn logins(items: Option<&Value>) -> Vec<Value> {
    items
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(|i| i.get("login").cloned()).collect())
        .unwrap_or_default()
}

fn label_names(item: &Value) -> Vec<Value> {
    item.get("labels")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(|l| l.get("name").cloned()).collect())
        .unwrap_or_default()
}

fn format_issue(issue: &Value) -> Value {
    json!({
        "number": issue.get("number"),
        "title": issue.get("title"),
        "state": issue.get("state"),
        "body": issue.get("body"),
        "user": issue.pointer("/user/login"),
        "labels": label_names(issue),
        "assignees": logins(issue.get("assignees")),
        "milestone": issue.pointer("/milestone/title"),
        "comments": issue.get("comments").and_then(Value::as_u64).unwrap_or(0),
        "created_at": issue.get("created_at"),
        "updated_at": issue.get("updated_at"),
        "closed_at": issue.get("closed_at"),
        "urls": {
            "html": issue.get("html_url"),
            "api": issue.get("url"),
        },
    })
}

fn format_pull(pr: &Value) -> Value {
    json!({
        "number": pr.get("number"),
        "title": pr.get("title"),
        "state": pr.get("state"),
        "body": pr.get("body"),
        "draft": pr.get("draft").and_then(Value::as_bool).unwrap_or(false),
        "user": pr.pointer("/user/login"),
        "head": {
            "ref": pr.pointer("/head/ref"),
            "sha": pr.pointer("/head/sha"),
            "repo": pr.pointer("/head/repo/full_name"),
        },
        "base": {
            "ref": pr.pointer("/base/ref"),
            "sha": pr.pointer("/base/sha"),
            "repo": pr.pointer("/base/repo/full_name"),
        },
        "labels": label_names(pr),
        "assignees": logins(pr.get("assignees")),
        "reviewers": logins(pr.get("requested_reviewers")),
        "milestone": pr.pointer("/milestone/title"),
        "created_at": pr.get("created_at"),
        "updated_at": pr.get("updated_at"),
        "closed_at": pr.get("closed_at"),
        "merged_at": pr.get("merged_at"),
        "urls": {
            "html": pr.get("html_url"),
            "api": pr.get("url"),
            "diff": pr.get("diff_url"),
        },
    })
}

fn format_repo(repo: &Value, include_stats: bool) -> Value {
    let mut formatted = json!({
        "name": repo.get("name"),
        "full_name": repo.get("full_name"),
        "description": repo.get("description"),
        "private": repo.get("private").and_then(Value::as_bool).unwrap_or(false),
        "owner": {
            "login": repo.pointer("/owner/login"),
            "type": repo.pointer("/owner/type"),
        },
        "default_branch": repo.get("default_branch"),
        "language": repo.get("language"),
        "topics": repo.get("topics").cloned().unwrap_or_else(|| json!([])),
        "homepage": repo.get("homepage"),
        "created_at": repo.get("created_at"),
        "updated_at": repo.get("updated_at"),
        "pushed_at": repo.get("pushed_at"),
        "urls": {
            "html": repo.get("html_url"),
            "api": repo.get("url"),
            "clone": repo.get("clone_url"),
            "ssh": repo.get("ssh_url"),
        },
    });

    if include_stats {
        let count = |key: &str| repo.get(key).and_then(Value::as_u64).unwrap_or(0);
        formatted["stats"] = json!({
            "stars": count("stargazers_count"),
            "forks": count("forks_count"),
            "watchers": count("watchers_count"),
            "open_issues": count("open_issues_count"),
            "size": count("size"),
            "subscribers": count("subscribers_count"),
        });
    }

    formatted
}

/// Tool to read repository metadata.
pub struct ReadGitHubRepoTool {
    admission: Arc<AdmissionController>,
    client: GitHubClient,
}

impl ReadGitHubRepoTool {
    /// Create the tool.
    pub fn new(admission: Arc<AdmissionController>, client: GitHubClient) -> Self {
        Self { admission, client }
    }
}

#[derive(Debug, Deserialize)]
struct RepoParams {
    repo: String,
    #[serde(default = "default_true")]
    include_stats: bool,
}

fn default_true() -> bool {
    true
}

#[async_trait]
impl Tool for ReadGitHubRepoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("read_github_repo", "Get GitHub repository metadata and statistics")
            .with_integration(Integration::GitHub)
            .with_category("read")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "repo": {
                        "type": "string",
                        "description": "Repository in 'owner/repo' format"
                    },
                    "include_stats": {
                        "type": "boolean",
                        "description": "Include stars, forks, watchers and similar counts",
                        "default": true
                    }
                },
                "required": ["repo"]
            }))
    }

    #[instrument(skip(self, args, context), fields(tool = "read_github_repo", user = %context.user_id))]
    async fn execute(&self, args: Value, context: &ToolContext) -> McpServerResult<ToolResult> {
        let params: RepoParams = parse_args(args)?;

        if !valid_repo(&params.repo) {
            return Ok(invalid("Invalid repository", "Invalid repository format. Use 'owner/repo'"));
        }
        if let Err(denial) = self.admission.admit(Integration::GitHub, &context.user_id) {
            return Ok(denied(denial));
        }

        match self.client.repository(&params.repo).await {
            Ok(repo) => Ok(ToolResult::json(json!({
                "success": true,
                "repository": format_repo(&repo, params.include_stats),
            }))),
            Err(e) => Ok(failed(Integration::GitHub, "read repository", e)),
        }
    }
}

/// Tool to list issues, excluding pull requests.
pub struct ReadGitHubIssuesTool {
    admission: Arc<AdmissionController>,
    client: GitHubClient,
}

impl ReadGitHubIssuesTool {
    /// Create the tool.
    pub fn new(admission: Arc<AdmissionController>, client: GitHubClient) -> Self {
        Self { admission, client }
    }
}

#[derive(Debug, Deserialize)]
struct IssuesParams {
    repo: String,
    #[serde(default = "default_state")]
    state: String,
    #[serde(default)]
    labels: Vec<String>,
    assignee: Option<String>,
    #[serde(default = "default_sort")]
    sort: String,
    #[serde(default = "default_direction")]
    direction: String,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_state() -> String {
    "open".to_string()
}

fn default_sort() -> String {
    "created".to_string()
}

fn default_direction() -> String {
    "desc".to_string()
}

fn default_limit() -> u32 {
    30
}

#[async_trait]
impl Tool for ReadGitHubIssuesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("read_github_issues", "List GitHub issues (pull requests excluded) with filters")
            .with_integration(Integration::GitHub)
            .with_category("read")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "repo": {
                        "type": "string",
                        "description": "Repository in 'owner/repo' format"
                    },
                    "state": {
                        "type": "string",
                        "enum": STATES,
                        "default": "open"
                    },
                    "labels": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Only issues carrying all of these labels"
                    },
                    "assignee": {
                        "type": "string",
                        "description": "Assignee login, 'none' or '*'"
                    },
                    "sort": {
                        "type": "string",
                        "enum": ISSUE_SORTS,
                        "default": "created"
                    },
                    "direction": {
                        "type": "string",
                        "enum": DIRECTIONS,
                        "default": "desc"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of issues (1-100)",
                        "default": 30
                    }
                },
                "required": ["repo"]
            }))
    }

    #[instrument(skip(self, args, context), fields(tool = "read_github_issues", user = %context.user_id))]
    async fn execute(&self, args: Value, context: &ToolContext) -> McpServerResult<ToolResult> {
        let params: IssuesParams = parse_args(args)?;

        if let Some(error) = validate_listing(&params.repo, &params.state, &params.direction, params.limit)
            .or_else(|| check_choice("sort", &params.sort, &ISSUE_SORTS))
        {
            return Ok(error);
        }
        if let Err(denial) = self.admission.admit(Integration::GitHub, &context.user_id) {
            return Ok(denied(denial));
        }

        let filters = IssueFilters {
            state: params.state.clone(),
            sort: params.sort.clone(),
            direction: params.direction.clone(),
            labels: (!params.labels.is_empty()).then(|| params.labels.join(",")),
            assignee: params.assignee.clone(),
            per_page: params.limit,
        };

        match self.client.issues(&params.repo, &filters).await {
            Ok(mut issues) => {
                issues.truncate(params.limit as usize);
                let issues: Vec<Value> = issues.iter().map(format_issue).collect();

                Ok(ToolResult::json(json!({
                    "success": true,
                    "total_count": issues.len(),
                    "repository": params.repo,
                    "filters": {
                        "state": params.state,
                        "labels": params.labels,
                        "assignee": params.assignee,
                        "sort": params.sort,
                        "direction": params.direction,
                    },
                    "issues": issues,
                })))
            }
            Err(e) => Ok(failed(Integration::GitHub, "read issues", e)),
        }
    }
}

/// Tool to list pull requests.
pub struct ReadGitHubPrsTool {
    admission: Arc<AdmissionController>,
    client: GitHubClient,
}

impl ReadGitHubPrsTool {
    /// Create the tool.
    pub fn new(admission: Arc<AdmissionController>, client: GitHubClient) -> Self {
        Self { admission, client }
    }
}

#[derive(Debug, Deserialize)]
struct PullsParams {
    repo: String,
    #[serde(default = "default_state")]
    state: String,
    head: Option<String>,
    base: Option<String>,
    #[serde(default = "default_sort")]
    sort: String,
    #[serde(default = "default_direction")]
    direction: String,
    #[serde(default = "default_limit")]
    limit: u32,
}

#[async_trait]
impl Tool for ReadGitHubPrsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("read_github_prs", "List GitHub pull requests with filters")
            .with_integration(Integration::GitHub)
            .with_category("read")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "repo": {
                        "type": "string",
                        "description": "Repository in 'owner/repo' format"
                    },
                    "state": {
                        "type": "string",
                        "enum": STATES,
                        "default": "open"
                    },
                    "head": {
                        "type": "string",
                        "description": "Head branch as 'user:branch'"
                    },
                    "base": {
                        "type": "string",
                        "description": "Base branch"
                    },
                    "sort": {
                        "type": "string",
                        "enum": PULL_SORTS,
                        "default": "created"
                    },
                    "direction": {
                        "type": "string",
                        "enum": DIRECTIONS,
                        "default": "desc"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of pull requests (1-100)",
                        "default": 30
                    }
                },
                "required": ["repo"]
            }))
    }

    #[instrument(skip(self, args, context), fields(tool = "read_github_prs", user = %context.user_id))]
    async fn execute(&self, args: Value, context: &ToolContext) -> McpServerResult<ToolResult> {
        let params: PullsParams = parse_args(args)?;

        if let Some(error) = validate_listing(&params.repo, &params.state, &params.direction, params.limit)
            .or_else(|| check_choice("sort", &params.sort, &PULL_SORTS))
        {
            return Ok(error);
        }
        if let Err(denial) = self.admission.admit(Integration::GitHub, &context.user_id) {
            return Ok(denied(denial));
        }

        let filters = PullFilters {
            state: params.state.clone(),
            sort: params.sort.clone(),
            direction: params.direction.clone(),
            head: params.head.clone(),
            base: params.base.clone(),
            per_page: params.limit,
        };

        match self.client.pulls(&params.repo, &filters).await {
            Ok(mut pulls) => {
                pulls.truncate(params.limit as usize);
                let pulls: Vec<Value> = pulls.iter().map(format_pull).collect();

                Ok(ToolResult::json(json!({
                    "success": true,
                    "total_count": pulls.len(),
                    "repository": params.repo,
                    "filters": {
                        "state": params.state,
                        "head": params.head,
                        "base": params.base,
                        "sort": params.sort,
                        "direction": params.direction,
                    },
                    "pull_requests": pulls,
                })))
            }
            Err(e) => Ok(failed(Integration::GitHub, "read pull requests", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_repo() {
        assert!(valid_repo("rust-lang/rust"));
        assert!(!valid_repo("rust-lang"));
        assert!(!valid_repo("/rust"));
        assert!(!valid_repo("rust-lang/"));
        assert!(!valid_repo("a/b/c"));
    }

    #[test]
    fn test_validate_listing() {
        assert!(validate_listing("a/b", "open", "desc", 30).is_none());
        assert!(validate_listing("a/b", "merged", "desc", 30).is_some_and(|r| r.is_error));
        assert!(validate_listing("a/b", "open", "up", 30).is_some());
        assert!(validate_listing("a/b", "open", "asc", 0).is_some());
        assert!(validate_listing("a/b", "open", "asc", 101).is_some());
        assert!(check_choice("sort", "popularity", &ISSUE_SORTS).is_some());
        assert!(check_choice("sort", "popularity", &PULL_SORTS).is_none());
    }

    #[test]
    fn test_format_repo_stats_are_optional() {
        let repo = json!({
            "name": "hub",
            "full_name": "acme/hub",
            "owner": { "login": "acme", "type": "Organization" },
            "stargazers_count": 42
        });

        let with_stats = format_repo(&repo, true);
        assert_eq!(with_stats["owner"]["login"], "acme");
        assert_eq!(with_stats["stats"]["stars"], 42);
        assert_eq!(with_stats["stats"]["forks"], 0);
        assert_eq!(with_stats["topics"], json!([]));

        assert!(format_repo(&repo, false).get("stats").is_none());
    }

    #[test]
    fn test_format_pull_flattens_refs() {
        let pr = json!({
            "number": 7,
            "head": { "ref": "feature", "sha": "abc", "repo": { "full_name": "fork/hub" } },
            "base": { "ref": "main", "sha": "def", "repo": null },
            "requested_reviewers": [{ "login": "octocat" }],
            "labels": [{ "name": "ready" }]
        });

        let formatted = format_pull(&pr);
        assert_eq!(formatted["head"]["repo"], "fork/hub");
        assert!(formatted["base"]["repo"].is_null());
        assert_eq!(formatted["reviewers"], json!(["octocat"]));
        assert_eq!(formatted["labels"], json!(["ready"]));
        assert_eq!(formatted["draft"], false);
    }
}
