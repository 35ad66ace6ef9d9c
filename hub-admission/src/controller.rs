//! The admission controller every outgoing API call passes through.

use crate::budget::{CostBudgetTracker, CostDenial, UsageSnapshot};
use crate::clock::{Clock, SystemClock};
use crate::config::{AdmissionConfig, ConfigError};
use crate::cost::calculate_cost;
use crate::integration::{rate_limit_key, Integration};
use crate::limiter::KeyedRateLimiter;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a request was not admitted.
///
/// Denials are ordinary values: callers turn them into a tool error with
/// [`payload`](Self::payload) and never issue the downstream call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdmissionDenied {
    /// The per-minute token bucket for this API and user is empty.
    #[error("Rate limit exceeded for {api} (user {user_id})")]
    RateLimited {
        /// API family.
        api: String,
        /// Rate-limit identity.
        user_id: String,
        /// Estimated seconds until a token is available.
        retry_after_secs: Option<f64>,
    },

    /// Amplitude's cost budget or concurrency cap refused the query.
    #[error(transparent)]
    Amplitude(#[from] CostDenial),
}

impl AdmissionDenied {
    /// Suggested wait before retrying, if one can be estimated.
    pub fn retry_after_secs(&self) -> Option<f64> {
        match self {
            AdmissionDenied::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            AdmissionDenied::Amplitude(CostDenial::CostBudgetExceeded {
                retry_after_secs, ..
            }) => *retry_after_secs,
            AdmissionDenied::Amplitude(CostDenial::ConcurrencyLimit { .. }) => None,
        }
    }

    /// The user-visible error document for this denial.
    pub fn payload(&self) -> Value {
        match self {
            AdmissionDenied::RateLimited {
                api,
                retry_after_secs,
                ..
            } => json!({
                "error": "Rate limit exceeded",
                "api": api,
                "retryAfterSeconds": retry_after_secs,
            }),
            AdmissionDenied::Amplitude(CostDenial::CostBudgetExceeded {
                hourly_total,
                requested,
                budget,
                retry_after_secs,
            }) => json!({
                "error": "Cost budget exceeded",
                "details": format!("Amplitude allows a query cost of {} per hour", budget),
                "hourlyCost": hourly_total,
                "requestedCost": requested,
                "budget": budget,
                "retryAfterSeconds": retry_after_secs,
            }),
            AdmissionDenied::Amplitude(CostDenial::ConcurrencyLimit { in_flight, max }) => json!({
                "error": "Too many concurrent requests",
                "details": format!("Amplitude allows at most {} concurrent requests", max),
                "inFlight": in_flight,
                "maxConcurrent": max,
            }),
        }
    }
}

/// What an idle sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Token buckets dropped across all API families.
    pub buckets: usize,
    /// Amplitude usage entries dropped.
    pub amplitude_users: usize,
}

/// Owns every limiter and the Amplitude cost tracker.
///
/// Build one at startup, wrap it in an `Arc`, and hand it to every tool.
/// Tests build a fresh instance with a [`ManualClock`](crate::ManualClock).
#[derive(Debug)]
pub struct AdmissionController {
    limiters: HashMap<String, KeyedRateLimiter>,
    amplitude: CostBudgetTracker,
}

impl AdmissionController {
    /// Create a controller after validating `config`.
    pub fn new(config: AdmissionConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config, clock))
    }

    /// Default limits on the system clock.
    pub fn with_defaults() -> Self {
        Self::build(AdmissionConfig::default(), Arc::new(SystemClock))
    }

    fn build(config: AdmissionConfig, clock: Arc<dyn Clock>) -> Self {
        let limiters = config
            .limits
            .iter()
            .map(|(api, limit)| (api.clone(), KeyedRateLimiter::new(*limit, clock.clone())))
            .collect();

        Self {
            limiters,
            amplitude: CostBudgetTracker::new(config.amplitude, clock),
        }
    }

    /// Whether `api` has a configured limiter.
    pub fn is_limited(&self, api: &str) -> bool {
        self.limiters.contains_key(api)
    }

    /// Take one token from `api`'s bucket for `user_id`.
    ///
    /// APIs without a configured limiter always pass.
    pub fn check_api_limit(&self, api: &str, user_id: &str) -> bool {
        match self.limiters.get(api) {
            Some(limiter) => limiter.check_and_consume(&rate_limit_key(api, user_id), 1),
            None => true,
        }
    }

    /// Estimated seconds until `user_id` may call `api` again, or `None` if not limited.
    pub fn wait_if_limited(&self, api: &str, user_id: &str) -> Option<f64> {
        self.limiters
            .get(api)?
            .time_until_next_token(&rate_limit_key(api, user_id))
    }

    /// Forget `user_id`'s bucket for `api`. Returns whether one existed.
    pub fn reset(&self, api: &str, user_id: &str) -> bool {
        self.limiters
            .get(api)
            .map(|limiter| limiter.reset(&rate_limit_key(api, user_id)))
            .unwrap_or(false)
    }

    /// Structured form of [`check_api_limit`](Self::check_api_limit).
    pub fn admit(&self, integration: Integration, user_id: &str) -> Result<(), AdmissionDenied> {
        let api = integration.as_str();
        if self.check_api_limit(api, user_id) {
            return Ok(());
        }
        Err(self.rate_limited(api, user_id))
    }

    fn rate_limited(&self, api: &str, user_id: &str) -> AdmissionDenied {
        let retry_after_secs = self.wait_if_limited(api, user_id);
        warn!(api, user_id, retry_after_secs, "Request rate limited");

        AdmissionDenied::RateLimited {
            api: api.to_string(),
            user_id: user_id.to_string(),
            retry_after_secs,
        }
    }

    /// Admit an Amplitude query of `cost` for `user_id`.
    ///
    /// A `true` result obliges the caller to call
    /// [`end_amplitude_request`](Self::end_amplitude_request) exactly once.
    /// Prefer [`amplitude_permit`](Self::amplitude_permit), which does that on drop.
    pub fn start_amplitude_request(&self, user_id: &str, cost: u64) -> bool {
        self.try_start_amplitude(user_id, cost).is_ok()
    }

    /// Mark an admitted Amplitude query as finished.
    pub fn end_amplitude_request(&self, user_id: &str) {
        self.amplitude.release(user_id);
    }

    /// Amplitude's cost formula: `days * conditions * query_type_cost`.
    pub fn calculate_amplitude_cost(days: u64, conditions: u64, query_type_cost: u64) -> u64 {
        calculate_cost(days, conditions, query_type_cost)
    }

    /// Admit an Amplitude query through both its token bucket and its cost budget.
    ///
    /// A denial from either side leaves both untouched: no token is spent on a
    /// query the cost budget refuses. The returned permit releases the in-flight
    /// slot when dropped, whatever happens to the request in between.
    pub fn amplitude_permit(
        &self,
        user_id: &str,
        cost: u64,
    ) -> Result<AmplitudePermit<'_>, AdmissionDenied> {
        let api = Integration::Amplitude.as_str();
        let limiter = self.limiters.get(api);
        let key = rate_limit_key(api, user_id);

        if limiter.is_some_and(|limiter| !limiter.has_token(&key)) {
            return Err(self.rate_limited(api, user_id));
        }
        self.try_start_amplitude(user_id, cost)?;

        // Another caller may have taken the last token since the check above.
        if limiter.is_some_and(|limiter| !limiter.check_and_consume(&key, 1)) {
            self.amplitude.revoke(user_id, cost);
            return Err(self.rate_limited(api, user_id));
        }

        Ok(AmplitudePermit {
            controller: self,
            user_id: user_id.to_string(),
            cost,
        })
    }

    /// Current Amplitude usage for `user_id`.
    pub fn amplitude_usage(&self, user_id: &str) -> UsageSnapshot {
        self.amplitude.snapshot(user_id)
    }

    /// Drop state that no longer affects any admission decision.
    ///
    /// Removes token buckets idle for `max_idle` that have refilled to capacity,
    /// and Amplitude users with no in-window cost and nothing in flight.
    pub fn sweep_idle(&self, max_idle: Duration) -> SweepStats {
        let stats = SweepStats {
            buckets: self
                .limiters
                .values()
                .map(|limiter| limiter.sweep_idle(max_idle))
                .sum(),
            amplitude_users: self.amplitude.sweep_idle(),
        };

        if stats != SweepStats::default() {
            info!(
                buckets = stats.buckets,
                amplitude_users = stats.amplitude_users,
                "Swept idle admission state"
            );
        }
        stats
    }

    fn try_start_amplitude(&self, user_id: &str, cost: u64) -> Result<(), CostDenial> {
        match self.amplitude.try_admit(user_id, cost) {
            Ok(()) => {
                debug!(user_id, cost, "Amplitude request admitted");
                Ok(())
            }
            Err(denial) => {
                warn!(user_id, cost, %denial, "Amplitude request denied");
                Err(denial)
            }
        }
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// An admitted Amplitude query. Dropping it ends the request.
#[derive(Debug)]
#[must_use = "dropping the permit immediately ends the Amplitude request"]
pub struct AmplitudePermit<'a> {
    controller: &'a AdmissionController,
    user_id: String,
    cost: u64,
}

impl AmplitudePermit<'_> {
    /// Cost recorded for this query.
    pub fn cost(&self) -> u64 {
        self.cost
    }

    /// Rate-limit identity the query was admitted for.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl Drop for AmplitudePermit<'_> {
    fn drop(&mut self) {
        self.controller.end_amplitude_request(&self.user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{CostBudgetConfig, LimitConfig};

    fn controller() -> (AdmissionController, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let controller = AdmissionController::new(AdmissionConfig::default(), clock.clone()).unwrap();
        (controller, clock)
    }

    #[test]
    fn test_unknown_api_fails_open() {
        let (controller, _clock) = controller();

        for _ in 0..10_000 {
            assert!(controller.check_api_limit("unknown-api", "user1"));
        }
        assert_eq!(controller.wait_if_limited("unknown-api", "user1"), None);
        assert!(!controller.is_limited("unknown-api"));
    }

    #[test]
    fn test_check_api_limit_uses_family_limits() {
        let (controller, clock) = controller();

        for _ in 0..10 {
            assert!(controller.check_api_limit("slack", "alice"));
        }
        assert!(!controller.check_api_limit("slack", "alice"));
        assert!(controller.check_api_limit("slack", "bob"));
        assert!(controller.check_api_limit("notion", "alice"));

        let wait = controller.wait_if_limited("slack", "alice").unwrap();
        assert!((wait - 1.0).abs() < 1e-9);

        clock.advance(1.0);
        assert!(controller.check_api_limit("slack", "alice"));
    }

    #[test]
    fn test_reset_restores_bucket() {
        let (controller, _clock) = controller();

        while controller.check_api_limit("amplitude", "u") {}
        assert!(controller.reset("amplitude", "u"));
        assert!(controller.check_api_limit("amplitude", "u"));
        assert!(!controller.reset("unknown-api", "u"));
    }

    #[test]
    fn test_admit_reports_wait() {
        let (controller, _clock) = controller();

        for _ in 0..10 {
            controller.admit(Integration::Slack, "alice").unwrap();
        }
        let denial = controller.admit(Integration::Slack, "alice").unwrap_err();
        assert!(matches!(denial, AdmissionDenied::RateLimited { ref api, .. } if api == "slack"));

        let payload = denial.payload();
        assert_eq!(payload["error"], "Rate limit exceeded");
        assert!((payload["retryAfterSeconds"].as_f64().unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_start_and_end_amplitude_request() {
        let (controller, _clock) = controller();

        for _ in 0..5 {
            assert!(controller.start_amplitude_request("u", 1));
        }
        assert!(!controller.start_amplitude_request("u", 1));

        controller.end_amplitude_request("u");
        assert!(controller.start_amplitude_request("u", 1));
    }

    #[test]
    fn test_calculate_amplitude_cost() {
        assert_eq!(AdmissionController::calculate_amplitude_cost(7, 1, 8), 56);
        assert_eq!(AdmissionController::calculate_amplitude_cost(31, 2, 10), 620);
    }

    #[test]
    fn test_permit_releases_on_drop() {
        let (controller, _clock) = controller();

        {
            let permit = controller.amplitude_permit("u", 56).unwrap();
            assert_eq!(permit.cost(), 56);
            assert_eq!(controller.amplitude_usage("u").in_flight, 1);
        }

        let usage = controller.amplitude_usage("u");
        assert_eq!(usage.in_flight, 0);
        assert_eq!(usage.hourly_cost, 56);
    }

    #[test]
    fn test_permit_concurrency_denial() {
        let clock = Arc::new(ManualClock::default());
        // Generous bucket so only the concurrency cap bites.
        let config = AdmissionConfig::default().with_limit("amplitude", LimitConfig::new(6000, 100));
        let controller = AdmissionController::new(config, clock).unwrap();

        let permits: Vec<_> = (0..5)
            .map(|_| controller.amplitude_permit("u", 1).unwrap())
            .collect();

        let denial = controller.amplitude_permit("u", 1).unwrap_err();
        assert_eq!(
            denial,
            AdmissionDenied::Amplitude(CostDenial::ConcurrencyLimit { in_flight: 5, max: 5 })
        );
        assert_eq!(denial.payload()["error"], "Too many concurrent requests");

        drop(permits);
        assert!(controller.amplitude_permit("u", 1).is_ok());
    }

    #[test]
    fn test_permit_budget_denial_payload() {
        let clock = Arc::new(ManualClock::default());
        let config = AdmissionConfig::default().with_amplitude(CostBudgetConfig {
            hourly_budget: 100,
            ..CostBudgetConfig::default()
        });
        let controller = AdmissionController::new(config, clock).unwrap();

        drop(controller.amplitude_permit("u", 100).unwrap());
        let denial = controller.amplitude_permit("u", 1).unwrap_err();

        let payload = denial.payload();
        assert_eq!(payload["error"], "Cost budget exceeded");
        assert_eq!(payload["hourlyCost"], 100);
        assert_eq!(payload["budget"], 100);
        assert!((denial.retry_after_secs().unwrap() - 3600.0).abs() < 1e-6);
    }

    #[test]
    fn test_cost_denials_spend_no_tokens() {
        let clock = Arc::new(ManualClock::default());
        let config = AdmissionConfig::default().with_amplitude(CostBudgetConfig {
            max_concurrent: 1,
            ..CostBudgetConfig::default()
        });
        let controller = AdmissionController::new(config, clock).unwrap();

        // The Amplitude bucket holds 5: one for the held permit, four denials.
        let held = controller.amplitude_permit("u", 1).unwrap();
        for _ in 0..4 {
            let denial = controller.amplitude_permit("u", 1).unwrap_err();
            assert!(matches!(
                denial,
                AdmissionDenied::Amplitude(CostDenial::ConcurrencyLimit { .. })
            ));
        }
        drop(held);

        assert_eq!(controller.wait_if_limited("amplitude", "u"), None);
        assert!(controller.amplitude_permit("u", 1).is_ok());
        assert_eq!(controller.amplitude_usage("u").hourly_cost, 2);
    }

    #[test]
    fn test_budget_denials_spend_no_tokens() {
        let clock = Arc::new(ManualClock::default());
        let config = AdmissionConfig::default().with_amplitude(CostBudgetConfig {
            hourly_budget: 10,
            ..CostBudgetConfig::default()
        });
        let controller = AdmissionController::new(config, clock).unwrap();

        for _ in 0..10 {
            assert!(controller.amplitude_permit("u", 11).is_err());
        }
        for _ in 0..5 {
            drop(controller.amplitude_permit("u", 2).unwrap());
        }
        assert!(matches!(
            controller.amplitude_permit("u", 0).unwrap_err(),
            AdmissionDenied::RateLimited { .. }
        ));
    }

    #[test]
    fn test_rate_limited_permit_records_no_cost() {
        let (controller, _clock) = controller();

        // Amplitude bucket holds 5; five released permits drain it.
        for _ in 0..5 {
            drop(controller.amplitude_permit("u", 1).unwrap());
        }
        let denial = controller.amplitude_permit("u", 1).unwrap_err();
        assert!(matches!(denial, AdmissionDenied::RateLimited { .. }));
        assert_eq!(controller.amplitude_usage("u").hourly_cost, 5);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = AdmissionConfig::default().with_limit("github", LimitConfig::new(100, 0));
        assert!(AdmissionController::new(config, Arc::new(ManualClock::default())).is_err());
    }

    #[test]
    fn test_sweep_idle_preserves_outcomes() {
        let (controller, clock) = controller();

        assert!(controller.check_api_limit("notion", "idle"));
        assert!(controller.check_api_limit("github", "idle"));
        drop(controller.amplitude_permit("idle", 10).unwrap());

        clock.advance(3601.0);
        let stats = controller.sweep_idle(Duration::from_secs(600));
        assert_eq!(
            stats,
            SweepStats {
                buckets: 3,
                amplitude_users: 1
            }
        );
        assert_eq!(controller.amplitude_usage("idle"), UsageSnapshot::default());
        assert_eq!(controller.sweep_idle(Duration::from_secs(600)), SweepStats::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admission_respects_cap() {
        let clock = Arc::new(ManualClock::default());
        let config = AdmissionConfig::default().with_limit("amplitude", LimitConfig::new(60_000, 1_000));
        let controller = Arc::new(AdmissionController::new(config, clock).unwrap());

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let controller = controller.clone();
                tokio::spawn(async move { controller.start_amplitude_request("shared", 1) })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 5);
        assert_eq!(controller.amplitude_usage("shared").in_flight, 5);
    }
}
