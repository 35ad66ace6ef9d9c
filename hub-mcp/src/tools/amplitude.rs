//! Amplitude MCP tools
//!
//! Analytics queries against the Amplitude Dashboard REST API. Each query is
//! priced before it is sent and runs under an admission permit, so the hourly
//! cost budget and the concurrency cap hold across every caller.

use super::{denied, failed, invalid, missing_credentials, parse_args};
use crate::clients::amplitude::{AmplitudeClient, AmplitudeQuery, INTERVALS};
use crate::server::{McpServerResult, Tool, ToolContext};
use crate::types::{ToolDefinition, ToolResult};
use async_trait::async_trait;
use hub_admission::cost::parse_date;
use hub_admission::{AdmissionController, Integration};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument};

const CREDENTIALS: &str = "AMPLITUDE_API_KEY and AMPLITUDE_SECRET_KEY";
const MAX_FUNNEL_STEPS: usize = 10;

/// Get all Amplitude tools.
pub fn amplitude_tools(admission: Arc<AdmissionController>, client: &AmplitudeClient) -> Vec<Arc<dyn Tool>> {
    let runner = QueryRunner {
        admission,
        client: client.clone(),
    };

    vec![
        Arc::new(EventSegmentationTool::new(runner.clone())),
        Arc::new(FunnelTool::new(runner.clone())),
        Arc::new(RetentionTool::new(runner.clone())),
        Arc::new(UserCountsTool::new(runner.clone())),
        Arc::new(EventsListTool::new(runner.clone())),
        Arc::new(RealtimeUsersTool::new(runner)),
    ]
}

/// Admits and executes priced queries.
#[derive(Clone)]
pub struct QueryRunner {
    admission: Arc<AdmissionController>,
    client: AmplitudeClient,
}

impl QueryRunner {
    /// Create a runner.
    pub fn new(admission: Arc<AdmissionController>, client: AmplitudeClient) -> Self {
        Self { admission, client }
    }

    /// Run `query` for `user_id`, attaching `query_info` to a successful response.
    async fn run(&self, user_id: &str, query: &AmplitudeQuery, mut query_info: Value) -> ToolResult {
        if !self.client.has_credentials() {
            return missing_credentials(Integration::Amplitude, CREDENTIALS);
        }

        let cost = query.cost();
        let permit = match self.admission.amplitude_permit(user_id, cost) {
            Ok(permit) => permit,
            Err(denial) => return denied(denial),
        };

        debug!(endpoint = query.endpoint(), cost, "Running Amplitude query");
        let response = self.client.execute(query, &permit).await;
        drop(permit);

        match response {
            Ok(data) => {
                query_info["query_type"] = json!(query.pricing().kind.as_str());
                query_info["cost"] = json!(cost);

                let mut result = match data {
                    Value::Object(_) => data,
                    other => json!({ "data": other }),
                };
                result["query_info"] = query_info;
                ToolResult::json(result)
            }
            Err(e) => failed(Integration::Amplitude, "query Amplitude", e),
        }
    }
}

fn valid_date(date: &str) -> bool {
    date.len() == 8 && date.bytes().all(|b| b.is_ascii_digit()) && parse_date(date).is_some()
}

fn check_dates(start_date: &str, end_date: &str) -> Option<ToolResult> {
    if !valid_date(start_date) || !valid_date(end_date) {
        return Some(invalid(
            "Invalid date format",
            "Dates must be in YYYYMMDD format (e.g., '20240101')",
        ));
    }
    if parse_date(end_date) < parse_date(start_date) {
        return Some(invalid("Invalid date range", "end_date must not be before start_date"));
    }
    None
}

fn interval_code(interval: &str) -> Option<u32> {
    match interval {
        "daily" => Some(1),
        "weekly" => Some(7),
        "monthly" => Some(30),
        _ => None,
    }
}

fn date_properties() -> Value {
    json!({
        "start_date": {
            "type": "string",
            "description": "Start date in YYYYMMDD format (e.g., '20240101')"
        },
        "end_date": {
            "type": "string",
            "description": "End date in YYYYMMDD format, inclusive"
        }
    })
}

fn schema(mut properties: Value, extra: Value, required: &[&str]) -> Value {
    if let (Some(base), Value::Object(extra)) = (properties.as_object_mut(), extra) {
        base.extend(extra);
    }
    json!({ "type": "object", "properties": properties, "required": required })
}

/// Event counts and uniques over time for one or two events.
pub struct EventSegmentationTool {
    runner: QueryRunner,
}

impl EventSegmentationTool {
    /// Create the tool.
    pub fn new(runner: QueryRunner) -> Self {
        Self { runner }
    }
}

#[derive(Debug, Deserialize)]
struct SegmentationParams {
    start_date: String,
    end_date: String,
    events: Vec<String>,
    #[serde(default)]
    segments: Vec<String>,
    group_by: Option<String>,
    #[serde(default = "default_interval")]
    interval: String,
}

fn default_interval() -> String {
    "daily".to_string()
}

#[async_trait]
impl Tool for EventSegmentationTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "get_amplitude_event_segmentation",
            "Get Amplitude event segmentation: counts and unique users over time for up to 2 events",
        )
        .with_integration(Integration::Amplitude)
        .with_category("analytics")
        .with_schema(schema(
            date_properties(),
            json!({
                "events": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Event names to analyze (1 or 2)"
                },
                "segments": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "User properties to segment by"
                },
                "group_by": {
                    "type": "string",
                    "description": "Property to group results by"
                },
                "interval": {
                    "type": "string",
                    "enum": ["daily", "weekly", "monthly"],
                    "default": "daily"
                }
            }),
            &["start_date", "end_date", "events"],
        ))
    }

    #[instrument(skip(self, args, context), fields(tool = "get_amplitude_event_segmentation", user = %context.user_id))]
    async fn execute(&self, args: Value, context: &ToolContext) -> McpServerResult<ToolResult> {
        let params: SegmentationParams = parse_args(args)?;

        if let Some(error) = check_dates(&params.start_date, &params.end_date) {
            return Ok(error);
        }
        if params.events.is_empty() {
            return Ok(invalid("No events provided", "At least one event must be specified"));
        }
        if params.events.len() > 2 {
            return Ok(invalid(
                "Too many events",
                "Amplitude Event Segmentation API supports maximum 2 events",
            ));
        }
        let Some(interval) = interval_code(&params.interval) else {
            return Ok(invalid("Invalid interval", "Interval must be 'daily', 'weekly', or 'monthly'"));
        };

        let query = AmplitudeQuery::event_segmentation(
            &params.start_date,
            &params.end_date,
            &params.events,
            &params.segments,
            params.group_by.as_deref(),
            interval,
        );
        let info = json!({
            "start_date": params.start_date,
            "end_date": params.end_date,
            "events": params.events,
            "segments": params.segments,
            "group_by": params.group_by,
            "interval": params.interval,
        });

        Ok(self.runner.run(&context.user_id, &query, info).await)
    }
}

/// Step-by-step conversion through an ordered funnel.
pub struct FunnelTool {
    runner: QueryRunner,
}

impl FunnelTool {
    /// Create the tool.
    pub fn new(runner: QueryRunner) -> Self {
        Self { runner }
    }
}

#[derive(Debug, Deserialize)]
struct FunnelParams {
    start_date: String,
    end_date: String,
    events: Vec<String>,
    #[serde(default)]
    segments: Vec<String>,
    group_by: Option<String>,
    #[serde(default = "default_conversion_window")]
    conversion_window_days: u32,
}

fn default_conversion_window() -> u32 {
    7
}

#[async_trait]
impl Tool for FunnelTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("get_amplitude_funnel", "Get Amplitude funnel conversion between 2 to 10 ordered events")
            .with_integration(Integration::Amplitude)
            .with_category("analytics")
            .with_schema(schema(
                date_properties(),
                json!({
                    "events": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Funnel steps in order (2-10)"
                    },
                    "segments": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "User properties to segment by"
                    },
                    "group_by": {
                        "type": "string",
                        "description": "Property to group results by"
                    },
                    "conversion_window_days": {
                        "type": "integer",
                        "description": "Days a user has to complete the funnel (1-365)",
                        "default": 7
                    }
                }),
                &["start_date", "end_date", "events"],
            ))
    }

    #[instrument(skip(self, args, context), fields(tool = "get_amplitude_funnel", user = %context.user_id))]
    async fn execute(&self, args: Value, context: &ToolContext) -> McpServerResult<ToolResult> {
        let params: FunnelParams = parse_args(args)?;

        if let Some(error) = check_dates(&params.start_date, &params.end_date) {
            return Ok(error);
        }
        if params.events.len() < 2 {
            return Ok(invalid("Insufficient events", "A funnel needs at least 2 events"));
        }
        if params.events.len() > MAX_FUNNEL_STEPS {
            return Ok(invalid("Too many events", "A funnel supports at most 10 events"));
        }
        if !(1..=365).contains(&params.conversion_window_days) {
            return Ok(invalid(
                "Invalid conversion window",
                "conversion_window_days must be between 1 and 365",
            ));
        }

        let query = AmplitudeQuery::funnel(
            &params.start_date,
            &params.end_date,
            &params.events,
            &params.segments,
            params.group_by.as_deref(),
            params.conversion_window_days,
        );
        let info = json!({
            "start_date": params.start_date,
            "end_date": params.end_date,
            "events": params.events,
            "segments": params.segments,
            "group_by": params.group_by,
            "conversion_window_days": params.conversion_window_days,
        });

        Ok(self.runner.run(&context.user_id, &query, info).await)
    }
}

/// How many users who did one event come back to do another.
pub struct RetentionTool {
    runner: QueryRunner,
}

impl RetentionTool {
    /// Create the tool.
    pub fn new(runner: QueryRunner) -> Self {
        Self { runner }
    }
}

#[derive(Debug, Deserialize)]
struct RetentionParams {
    start_date: String,
    end_date: String,
    start_event: String,
    return_event: String,
    #[serde(default = "default_retention_type")]
    retention_type: String,
    interval: Option<u32>,
}

fn default_retention_type() -> String {
    "n_day".to_string()
}

#[async_trait]
impl Tool for RetentionTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("get_amplitude_retention", "Get Amplitude retention between a starting and a returning event")
            .with_integration(Integration::Amplitude)
            .with_category("analytics")
            .with_schema(schema(
                date_properties(),
                json!({
                    "start_event": {
                        "type": "string",
                        "description": "Event that puts a user in a cohort"
                    },
                    "return_event": {
                        "type": "string",
                        "description": "Event that counts as returning"
                    },
                    "retention_type": {
                        "type": "string",
                        "enum": ["n_day", "rolling", "bracket"],
                        "default": "n_day"
                    },
                    "interval": {
                        "type": "integer",
                        "enum": INTERVALS,
                        "description": "1, 7 or 30 for daily, weekly or monthly cohorts"
                    }
                }),
                &["start_date", "end_date", "start_event", "return_event"],
            ))
    }

    #[instrument(skip(self, args, context), fields(tool = "get_amplitude_retention", user = %context.user_id))]
    async fn execute(&self, args: Value, context: &ToolContext) -> McpServerResult<ToolResult> {
        let params: RetentionParams = parse_args(args)?;

        if let Some(error) = check_dates(&params.start_date, &params.end_date) {
            return Ok(error);
        }
        if params.start_event.trim().is_empty() || params.return_event.trim().is_empty() {
            return Ok(invalid(
                "Missing events",
                "Both start_event and return_event must be specified",
            ));
        }
        let mode = match params.retention_type.as_str() {
            "n_day" => None,
            "rolling" => Some("rolling"),
            "bracket" => Some("bracket"),
            _ => {
                return Ok(invalid(
                    "Invalid retention type",
                    "retention_type must be 'n_day', 'rolling', or 'bracket'",
                ))
            }
        };
        if matches!(params.interval, Some(i) if !INTERVALS.contains(&i)) {
            return Ok(invalid("Invalid interval", "interval must be 1, 7, or 30"));
        }

        let query = AmplitudeQuery::retention(
            &params.start_date,
            &params.end_date,
            &params.start_event,
            &params.return_event,
            mode,
            params.interval,
        );
        let info = json!({
            "start_date": params.start_date,
            "end_date": params.end_date,
            "start_event": params.start_event,
            "return_event": params.return_event,
            "retention_type": params.retention_type,
        });

        Ok(self.runner.run(&context.user_id, &query, info).await)
    }
}

/// Active or new user counts.
pub struct UserCountsTool {
    runner: QueryRunner,
}

impl UserCountsTool {
    /// Create the tool.
    pub fn new(runner: QueryRunner) -> Self {
        Self { runner }
    }
}

#[derive(Debug, Deserialize)]
struct UsersParams {
    start_date: String,
    end_date: String,
    #[serde(default = "default_metric")]
    metric: String,
    #[serde(default = "default_user_interval")]
    interval: u32,
    #[serde(default)]
    segments: Vec<Value>,
    group_by: Option<String>,
}

fn default_metric() -> String {
    "active".to_string()
}

fn default_user_interval() -> u32 {
    1
}

#[async_trait]
impl Tool for UserCountsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("get_amplitude_users", "Get Amplitude active or new user counts")
            .with_integration(Integration::Amplitude)
            .with_category("analytics")
            .with_schema(schema(
                date_properties(),
                json!({
                    "metric": {
                        "type": "string",
                        "enum": ["active", "new"],
                        "default": "active"
                    },
                    "interval": {
                        "type": "integer",
                        "enum": INTERVALS,
                        "description": "1, 7 or 30 for daily, weekly or monthly counts",
                        "default": 1
                    },
                    "segments": {
                        "type": "array",
                        "items": {"type": "object"},
                        "description": "Amplitude segment definitions ({prop, op, values})"
                    },
                    "group_by": {
                        "type": "string",
                        "description": "Property to group results by"
                    }
                }),
                &["start_date", "end_date"],
            ))
    }

    #[instrument(skip(self, args, context), fields(tool = "get_amplitude_users", user = %context.user_id))]
    async fn execute(&self, args: Value, context: &ToolContext) -> McpServerResult<ToolResult> {
        let params: UsersParams = parse_args(args)?;

        if let Some(error) = check_dates(&params.start_date, &params.end_date) {
            return Ok(error);
        }
        if params.metric != "active" && params.metric != "new" {
            return Ok(invalid("Invalid metric", "metric must be 'active' or 'new'"));
        }
        if !INTERVALS.contains(&params.interval) {
            return Ok(invalid("Invalid interval", "interval must be 1, 7, or 30"));
        }
        if params.segments.iter().any(|s| !s.is_object()) {
            return Ok(invalid("Invalid segments", "segments must be objects"));
        }

        let query = AmplitudeQuery::users(
            &params.start_date,
            &params.end_date,
            &params.metric,
            params.interval,
            &params.segments,
            params.group_by.as_deref(),
        );
        let info = json!({
            "start_date": params.start_date,
            "end_date": params.end_date,
            "metric": params.metric,
            "interval": params.interval,
            "group_by": params.group_by,
        });

        Ok(self.runner.run(&context.user_id, &query, info).await)
    }
}

/// Every event type tracked in the project.
pub struct EventsListTool {
    runner: QueryRunner,
}

impl EventsListTool {
    /// Create the tool.
    pub fn new(runner: QueryRunner) -> Self {
        Self { runner }
    }
}

#[derive(Debug, Deserialize)]
struct EventsListParams {
    #[serde(default)]
    include_deleted: bool,
}

#[async_trait]
impl Tool for EventsListTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("get_amplitude_events_list", "List every event type tracked in the Amplitude project")
            .with_integration(Integration::Amplitude)
            .with_category("analytics")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "include_deleted": {
                        "type": "boolean",
                        "description": "Include deleted event types",
                        "default": false
                    }
                }
            }))
    }

    #[instrument(skip(self, args, context), fields(tool = "get_amplitude_events_list", user = %context.user_id))]
    async fn execute(&self, args: Value, context: &ToolContext) -> McpServerResult<ToolResult> {
        let params: EventsListParams = parse_args(args)?;

        let query = AmplitudeQuery::events_list(params.include_deleted);
        let info = json!({ "include_deleted": params.include_deleted });

        Ok(self.runner.run(&context.user_id, &query, info).await)
    }
}

/// Users active in the last few minutes.
pub struct RealtimeUsersTool {
    runner: QueryRunner,
}

impl RealtimeUsersTool {
    /// Create the tool.
    pub fn new(runner: QueryRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Tool for RealtimeUsersTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("get_amplitude_realtime_users", "Get Amplitude real-time active users")
            .with_integration(Integration::Amplitude)
            .with_category("analytics")
            .with_schema(json!({ "type": "object", "properties": {} }))
    }

    #[instrument(skip(self, _args, context), fields(tool = "get_amplitude_realtime_users", user = %context.user_id))]
    async fn execute(&self, _args: Value, context: &ToolContext) -> McpServerResult<ToolResult> {
        let query = AmplitudeQuery::realtime();
        Ok(self.runner.run(&context.user_id, &query, json!({})).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiEndpoint;
    use hub_admission::UsageSnapshot;

    fn runner(with_credentials: bool) -> (Arc<AdmissionController>, QueryRunner) {
        let admission = Arc::new(AdmissionController::with_defaults());
        let mut endpoint = ApiEndpoint::new("http://127.0.0.1:9");
        if with_credentials {
            endpoint = endpoint.with_api_key("key").with_secret_key("secret");
        }
        let client = AmplitudeClient::new(reqwest::Client::new(), endpoint);
        (admission.clone(), QueryRunner::new(admission, client))
    }

    fn error_of(result: &ToolResult) -> Value {
        assert!(result.is_error);
        serde_json::from_str(result.first_text().unwrap_or_default()).unwrap()
    }

    #[test]
    fn test_check_dates() {
        assert!(check_dates("20240101", "20240131").is_none());
        assert!(check_dates("20240101", "20240101").is_none());
        assert_eq!(error_of(&check_dates("2024-01-01", "20240131").unwrap())["error"], "Invalid date format");
        assert_eq!(error_of(&check_dates("20240230", "20240301").unwrap())["error"], "Invalid date format");
        assert_eq!(error_of(&check_dates("20240201", "20240101").unwrap())["error"], "Invalid date range");
    }

    #[test]
    fn test_interval_codes() {
        assert_eq!(interval_code("daily"), Some(1));
        assert_eq!(interval_code("weekly"), Some(7));
        assert_eq!(interval_code("monthly"), Some(30));
        assert_eq!(interval_code("hourly"), None);
    }

    #[tokio::test]
    async fn test_validation_happens_before_admission() {
        let (admission, runner) = runner(true);
        let tool = EventSegmentationTool::new(runner);
        let context = ToolContext::new("alice");

        let result = tool
            .execute(
                json!({
                    "start_date": "20240101",
                    "end_date": "20240107",
                    "events": ["a", "b", "c"]
                }),
                &context,
            )
            .await
            .unwrap();

        assert_eq!(error_of(&result)["error"], "Too many events");
        assert_eq!(admission.amplitude_usage("alice"), UsageSnapshot::default());
    }

    #[tokio::test]
    async fn test_missing_credentials_do_not_consume_admission() {
        let (admission, runner) = runner(false);
        let tool = RealtimeUsersTool::new(runner);

        let result = tool.execute(json!({}), &ToolContext::new("bob")).await.unwrap();

        assert_eq!(error_of(&result)["error"], "Missing Amplitude API credentials");
        assert_eq!(admission.amplitude_usage("bob"), UsageSnapshot::default());
    }

    #[tokio::test]
    async fn test_funnel_window_bounds() {
        let (_, runner) = runner(true);
        let tool = FunnelTool::new(runner);

        let result = tool
            .execute(
                json!({
                    "start_date": "20240101",
                    "end_date": "20240107",
                    "events": ["view", "buy"],
                    "conversion_window_days": 0
                }),
                &ToolContext::new("carol"),
            )
            .await
            .unwrap();

        assert_eq!(error_of(&result)["error"], "Invalid conversion window");
    }
}
