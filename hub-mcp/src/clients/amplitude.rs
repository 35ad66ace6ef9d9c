//! Amplitude Dashboard REST API client.
//!
//! Queries are described by [`AmplitudeQuery`], which knows its endpoint, its
//! query string and its cost. Executing one requires an [`AmplitudePermit`]
//! for that cost, so nothing reaches Amplitude without passing admission.
//! Queries are never retried: every attempt is billed.

use super::error::{read_json, ClientError};
use crate::config::ApiEndpoint;
use hub_admission::{AmplitudePermit, QueryCost, QueryKind};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

const NOT_FOUND: &str = "Amplitude endpoint not found";

/// Amplitude interval codes for daily, weekly and monthly buckets.
pub const INTERVALS: [u32; 3] = [1, 7, 30];

/// A priced Amplitude query, ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct AmplitudeQuery {
    endpoint: &'static str,
    params: Vec<(&'static str, String)>,
    cost: QueryCost,
}

fn event_param(event_type: &str) -> String {
    json!({ "event_type": event_type }).to_string()
}

fn segment_filters(properties: &[String]) -> String {
    let filters: Vec<Value> = properties
        .iter()
        .map(|prop| json!({ "prop": prop, "op": "is", "values": ["*"] }))
        .collect();
    Value::Array(filters).to_string()
}

impl AmplitudeQuery {
    /// `events/segmentation` for one or two events.
    pub fn event_segmentation(
        start_date: &str,
        end_date: &str,
        events: &[String],
        segments: &[String],
        group_by: Option<&str>,
        interval: u32,
    ) -> Self {
        let mut params = vec![
            ("start", start_date.to_string()),
            ("end", end_date.to_string()),
            ("i", interval.to_string()),
        ];
        if let Some(first) = events.first() {
            params.push(("e", event_param(first)));
        }
        if let Some(second) = events.get(1) {
            params.push(("e2", event_param(second)));
        }
        if !segments.is_empty() {
            params.push(("s", segment_filters(segments)));
        }
        if let Some(group) = group_by {
            params.push(("g", group.to_string()));
        }

        let kind = QueryKind::EventSegmentation {
            events: events.len() as u64,
            group_by: group_by.is_some(),
        };
        Self {
            endpoint: "events/segmentation",
            params,
            cost: QueryCost::new(kind)
                .over_range(start_date, end_date)
                .with_segments(segments.len()),
        }
    }

    /// `funnels` over ordered steps, with the conversion window in days.
    pub fn funnel(
        start_date: &str,
        end_date: &str,
        events: &[String],
        segments: &[String],
        group_by: Option<&str>,
        conversion_window_days: u32,
    ) -> Self {
        let mut params = vec![
            ("start", start_date.to_string()),
            ("end", end_date.to_string()),
            ("cs", (u64::from(conversion_window_days) * 24).to_string()),
        ];
        params.extend(events.iter().map(|e| ("e", event_param(e))));
        if !segments.is_empty() {
            params.push(("s", segment_filters(segments)));
        }
        if let Some(group) = group_by {
            params.push(("g", group.to_string()));
        }

        let kind = QueryKind::Funnel {
            events: events.len() as u64,
            group_by: group_by.is_some(),
        };
        Self {
            endpoint: "funnels",
            params,
            cost: QueryCost::new(kind)
                .over_range(start_date, end_date)
                .with_segments(segments.len()),
        }
    }

    /// `retention` between a starting and a returning event.
    ///
    /// `retention_mode` is Amplitude's `rm` (`rolling` or `bracket`); `None`
    /// asks for the default N-day retention.
    pub fn retention(
        start_date: &str,
        end_date: &str,
        start_event: &str,
        return_event: &str,
        retention_mode: Option<&str>,
        interval: Option<u32>,
    ) -> Self {
        let mut params = vec![
            ("se", event_param(start_event)),
            ("re", event_param(return_event)),
            ("start", start_date.to_string()),
            ("end", end_date.to_string()),
        ];
        if let Some(mode) = retention_mode {
            params.push(("rm", mode.to_string()));
        }
        if let Some(i) = interval {
            params.push(("i", i.to_string()));
        }

        Self {
            endpoint: "retention",
            params,
            cost: QueryCost::new(QueryKind::Retention).over_range(start_date, end_date),
        }
    }

    /// `users`: active or new user counts.
    pub fn users(
        start_date: &str,
        end_date: &str,
        metric: &str,
        interval: u32,
        segments: &[Value],
        group_by: Option<&str>,
    ) -> Self {
        let mut params = vec![
            ("start", start_date.to_string()),
            ("end", end_date.to_string()),
            ("m", metric.to_string()),
            ("i", interval.to_string()),
        ];
        if !segments.is_empty() {
            params.push(("s", Value::Array(segments.to_vec()).to_string()));
        }
        if let Some(group) = group_by {
            params.push(("g", group.to_string()));
        }

        Self {
            endpoint: "users",
            params,
            cost: QueryCost::new(QueryKind::UserCounts {
                group_by: group_by.is_some(),
            })
            .over_range(start_date, end_date)
            .with_segments(segments.len()),
        }
    }

    /// `taxonomy/event`: every event type in the project.
    pub fn events_list(include_deleted: bool) -> Self {
        let mut params = Vec::new();
        if include_deleted {
            params.push(("showDeleted", "true".to_string()));
        }

        Self {
            endpoint: "taxonomy/event",
            params,
            cost: QueryCost::new(QueryKind::EventsList),
        }
    }

    /// `realtime`: active users over the last few minutes.
    pub fn realtime() -> Self {
        Self {
            endpoint: "realtime",
            params: Vec::new(),
            cost: QueryCost::new(QueryKind::Realtime),
        }
    }

    /// Endpoint path relative to the API base.
    pub fn endpoint(&self) -> &'static str {
        self.endpoint
    }

    /// Query string pairs, in order. Keys may repeat.
    pub fn params(&self) -> &[(&'static str, String)] {
        &self.params
    }

    /// Pricing inputs.
    pub fn pricing(&self) -> QueryCost {
        self.cost
    }

    /// Cost charged against the hourly budget.
    pub fn cost(&self) -> u64 {
        self.cost.cost()
    }
}

/// Amplitude Dashboard REST API client.
#[derive(Clone)]
pub struct AmplitudeClient {
    client: Client,
    endpoint: ApiEndpoint,
}

impl AmplitudeClient {
    /// Create a new Amplitude client on a shared HTTP client.
    pub fn new(client: Client, endpoint: ApiEndpoint) -> Self {
        Self { client, endpoint }
    }

    /// Whether both the API key and the secret key are configured.
    pub fn has_credentials(&self) -> bool {
        self.endpoint.api_key.is_some() && self.endpoint.secret_key.is_some()
    }

    /// Execute an admitted query.
    #[instrument(skip(self, query, permit), fields(endpoint = query.endpoint(), cost = permit.cost()))]
    pub async fn execute(
        &self,
        query: &AmplitudeQuery,
        permit: &AmplitudePermit<'_>,
    ) -> Result<Value, ClientError> {
        let (Some(api_key), Some(secret_key)) = (
            self.endpoint.api_key.as_deref(),
            self.endpoint.secret_key.as_deref(),
        ) else {
            return Err(ClientError::MissingCredentials(
                "AMPLITUDE_API_KEY and AMPLITUDE_SECRET_KEY",
            ));
        };

        if permit.cost() < query.cost() {
            warn!(
                admitted = permit.cost(),
                required = query.cost(),
                "Permit was admitted for less than the query costs"
            );
        }

        debug!("Querying Amplitude");
        let response = self
            .client
            .get(self.endpoint.url(query.endpoint()))
            .basic_auth(api_key, Some(secret_key))
            .query(query.params())
            .send()
            .await?;

        read_json(response, NOT_FOUND).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn param<'a>(query: &'a AmplitudeQuery, key: &str) -> Vec<&'a str> {
        query
            .params()
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    #[test]
    fn test_segmentation_params_and_cost() {
        let query = AmplitudeQuery::event_segmentation(
            "20240101",
            "20240107",
            &strings(&["signup", "purchase"]),
            &strings(&["country"]),
            Some("platform"),
            7,
        );

        assert_eq!(query.endpoint(), "events/segmentation");
        assert_eq!(param(&query, "e"), vec![r#"{"event_type":"signup"}"#]);
        assert_eq!(param(&query, "e2"), vec![r#"{"event_type":"purchase"}"#]);
        assert_eq!(param(&query, "i"), vec!["7"]);
        assert_eq!(param(&query, "g"), vec!["platform"]);
        let segments: Value = serde_json::from_str(param(&query, "s")[0]).unwrap();
        assert_eq!(segments[0]["prop"], "country");
        assert_eq!(segments[0]["values"], json!(["*"]));
        // 7 days x 1 segment x (2 events + group-by 4)
        assert_eq!(query.cost(), 42);
    }

    #[test]
    fn test_funnel_repeats_event_param() {
        let query = AmplitudeQuery::funnel(
            "20240101",
            "20240131",
            &strings(&["view", "cart", "buy"]),
            &strings(&["country", "plan"]),
            Some("platform"),
            14,
        );

        assert_eq!(param(&query, "e").len(), 3);
        assert_eq!(param(&query, "cs"), vec!["336"]);
        // 31 days x 2 segments x (3 steps x 2 + 4)
        assert_eq!(query.cost(), 620);
    }

    #[test]
    fn test_retention_defaults() {
        let query = AmplitudeQuery::retention("20240101", "20240107", "signup", "login", None, None);
        assert!(param(&query, "rm").is_empty());
        assert_eq!(param(&query, "se"), vec![r#"{"event_type":"signup"}"#]);
        assert_eq!(query.cost(), 56);
    }

    #[test]
    fn test_fixed_cost_queries() {
        assert_eq!(AmplitudeQuery::realtime().cost(), 1);
        let list = AmplitudeQuery::events_list(true);
        assert_eq!(list.endpoint(), "taxonomy/event");
        assert_eq!(param(&list, "showDeleted"), vec!["true"]);
        assert!(AmplitudeQuery::events_list(false).params().is_empty());
    }

    #[test]
    fn test_users_cost_counts_segments() {
        let segments = vec![json!({ "prop": "country", "op": "is", "values": ["US"] })];
        let query = AmplitudeQuery::users("20240101", "20240102", "new", 1, &segments, None);
        assert_eq!(param(&query, "m"), vec!["new"]);
        assert_eq!(query.cost(), 2);
    }
}
