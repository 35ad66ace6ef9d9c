//! Amplitude query cost model.
//!
//! Amplitude bills every Dashboard REST query as
//! `days * conditions * query_type_cost`. The numbers here must match
//! Amplitude's own accounting, otherwise local admission lets through queries
//! that Amplitude then throttles server-side.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Extra base cost when a query groups by a property.
pub const GROUP_BY_COST: u64 = 4;

/// Fixed base cost of a retention query.
pub const RETENTION_COST: u64 = 8;

/// Date format used by the Amplitude Dashboard API.
pub const AMPLITUDE_DATE_FORMAT: &str = "%Y%m%d";

/// Amplitude's cost formula: `days * conditions * query_type_cost`.
///
/// # Example
///
/// ```
/// use hub_admission::cost::calculate_cost;
///
/// // Three-step funnel, grouped, two segments, 31 days.
/// assert_eq!(calculate_cost(31, 2, 3 * 2 + 4), 620);
/// ```
pub fn calculate_cost(days: u64, conditions: u64, query_type_cost: u64) -> u64 {
    days.saturating_mul(conditions)
        .saturating_mul(query_type_cost)
}

/// Parse a `YYYYMMDD` date.
pub fn parse_date(date: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(date, AMPLITUDE_DATE_FORMAT).ok()
}

/// Number of days in an inclusive `YYYYMMDD` range.
///
/// Unparseable dates count as a single day, and so does an inverted range.
pub fn days_between(start_date: &str, end_date: &str) -> u64 {
    match (parse_date(start_date), parse_date(end_date)) {
        (Some(start), Some(end)) => {
            let days = (end - start).num_days() + 1;
            u64::try_from(days).unwrap_or(0).max(1)
        }
        _ => 1,
    }
}

/// The endpoint family of an Amplitude query, which determines its base cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryKind {
    /// `events/segmentation`: one per event, plus the group-by surcharge.
    EventSegmentation {
        /// Number of events queried.
        events: u64,
        /// Whether results are grouped by a property.
        group_by: bool,
    },
    /// `funnels`: two per step, plus the group-by surcharge.
    Funnel {
        /// Number of funnel steps.
        events: u64,
        /// Whether results are grouped by a property.
        group_by: bool,
    },
    /// `retention`: fixed.
    Retention,
    /// `users`: one, plus the group-by surcharge.
    UserCounts {
        /// Whether results are grouped by a property.
        group_by: bool,
    },
    /// `events/list` and the taxonomy API: fixed.
    EventsList,
    /// `realtime`: fixed.
    Realtime,
}

impl QueryKind {
    /// The query-type component of the cost formula.
    pub fn base_cost(&self) -> u64 {
        let group = |grouped: bool| if grouped { GROUP_BY_COST } else { 0 };

        match *self {
            QueryKind::EventSegmentation { events, group_by } => events + group(group_by),
            QueryKind::Funnel { events, group_by } => events * 2 + group(group_by),
            QueryKind::Retention => RETENTION_COST,
            QueryKind::UserCounts { group_by } => 1 + group(group_by),
            QueryKind::EventsList | QueryKind::Realtime => 1,
        }
    }

    /// Short name used in logs and query metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::EventSegmentation { .. } => "event_segmentation",
            QueryKind::Funnel { .. } => "funnel_analysis",
            QueryKind::Retention => "retention_analysis",
            QueryKind::UserCounts { .. } => "user_counts",
            QueryKind::EventsList => "events_list",
            QueryKind::Realtime => "realtime",
        }
    }
}

/// Everything needed to price one Amplitude query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCost {
    /// Endpoint family.
    pub kind: QueryKind,
    /// Days in the queried range.
    pub days: u64,
    /// Number of segments or conditions (at least one).
    pub conditions: u64,
}

impl QueryCost {
    /// A single-day, single-condition query.
    pub fn new(kind: QueryKind) -> Self {
        Self {
            kind,
            days: 1,
            conditions: 1,
        }
    }

    /// Price the query over an inclusive `YYYYMMDD` range.
    pub fn over_range(mut self, start_date: &str, end_date: &str) -> Self {
        self.days = days_between(start_date, end_date);
        self
    }

    /// Price the query with `count` segment filters (zero counts as one).
    pub fn with_segments(mut self, count: usize) -> Self {
        self.conditions = u64::try_from(count).unwrap_or(u64::MAX).max(1);
        self
    }

    /// Total cost.
    pub fn cost(&self) -> u64 {
        calculate_cost(self.days, self.conditions, self.kind.base_cost())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_cost_scenarios() {
        // One-week retention.
        assert_eq!(calculate_cost(7, 1, 8), 56);
        // Single event, one day, no group-by.
        assert_eq!(calculate_cost(1, 1, 1), 1);
        // Three-step funnel with group-by, 31 days, two segments.
        assert_eq!(calculate_cost(31, 2, 2 * 3 + 4), 620);
    }

    #[test]
    fn test_calculate_cost_saturates() {
        assert_eq!(calculate_cost(u64::MAX, 2, 2), u64::MAX);
    }

    #[test]
    fn test_days_between_is_inclusive() {
        assert_eq!(days_between("20240101", "20240101"), 1);
        assert_eq!(days_between("20240101", "20240131"), 31);
        assert_eq!(days_between("20240201", "20240301"), 30); // leap year
    }

    #[test]
    fn test_days_between_lenient() {
        assert_eq!(days_between("2024-01-01", "20240131"), 1);
        assert_eq!(days_between("20240101", "not a date"), 1);
        assert_eq!(days_between("20240131", "20240101"), 1);
    }

    #[test]
    fn test_base_costs() {
        assert_eq!(
            QueryKind::EventSegmentation { events: 2, group_by: false }.base_cost(),
            2
        );
        assert_eq!(
            QueryKind::EventSegmentation { events: 1, group_by: true }.base_cost(),
            5
        );
        assert_eq!(QueryKind::Funnel { events: 3, group_by: true }.base_cost(), 10);
        assert_eq!(QueryKind::Retention.base_cost(), 8);
        assert_eq!(QueryKind::UserCounts { group_by: true }.base_cost(), 5);
        assert_eq!(QueryKind::EventsList.base_cost(), 1);
        assert_eq!(QueryKind::Realtime.base_cost(), 1);
    }

    #[test]
    fn test_query_cost() {
        let retention = QueryCost::new(QueryKind::Retention).over_range("20240101", "20240107");
        assert_eq!(retention.cost(), 56);

        let funnel = QueryCost::new(QueryKind::Funnel { events: 3, group_by: true })
            .over_range("20240101", "20240131")
            .with_segments(2);
        assert_eq!(funnel.cost(), 620);

        let no_segments = QueryCost::new(QueryKind::UserCounts { group_by: false }).with_segments(0);
        assert_eq!(no_segments.conditions, 1);
        assert_eq!(no_segments.cost(), 1);
    }
}
