//! Rolling-hour cost budget and concurrency cap for Amplitude.
//!
//! Each user has a list of `(timestamp, cost)` samples and a count of
//! in-flight queries. Samples older than the window are pruned lazily when the
//! user is next admitted; there is no background sweep unless
//! [`CostBudgetTracker::sweep_idle`] is called.

use crate::clock::Clock;
use crate::config::CostBudgetConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Why the tracker refused a query.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CostDenial {
    /// Admitting the query would push the rolling-hour total over budget.
    #[error("hourly cost budget exceeded ({hourly_total} used + {requested} requested > {budget})")]
    CostBudgetExceeded {
        /// Cost already spent inside the window.
        hourly_total: u64,
        /// Cost of the refused query.
        requested: u64,
        /// Configured budget.
        budget: u64,
        /// Seconds until enough samples age out for the query to fit, if they ever can.
        retry_after_secs: Option<f64>,
    },

    /// The user already has the maximum number of queries in flight.
    #[error("too many concurrent requests ({in_flight} in flight, max {max})")]
    ConcurrencyLimit {
        /// Queries currently in flight.
        in_flight: u32,
        /// Configured maximum.
        max: u32,
    },
}

/// Point-in-time view of one user's usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Summed cost inside the rolling window.
    pub hourly_cost: u64,
    /// Queries currently in flight.
    pub in_flight: u32,
}

#[derive(Debug, Clone, Copy)]
struct CostSample {
    at: f64,
    cost: u64,
}

#[derive(Debug, Default)]
struct Usage {
    samples: Vec<CostSample>,
    in_flight: u32,
}

impl Usage {
    fn prune(&mut self, cutoff: f64) {
        self.samples.retain(|s| s.at >= cutoff);
    }

    fn total_since(&self, cutoff: f64) -> u64 {
        self.samples
            .iter()
            .filter(|s| s.at >= cutoff)
            .fold(0u64, |acc, s| acc.saturating_add(s.cost))
    }

    /// Seconds until `excess` cost has left the window.
    fn time_to_free(&self, excess: u64, now: f64, window: f64) -> Option<f64> {
        let mut samples = self.samples.clone();
        samples.sort_by(|a, b| a.at.total_cmp(&b.at));

        let mut freed = 0u64;
        for sample in samples {
            freed = freed.saturating_add(sample.cost);
            if freed >= excess {
                return Some((sample.at + window - now).max(0.0));
            }
        }
        None
    }
}

/// Per-user rolling cost budget plus in-flight cap.
#[derive(Debug)]
pub struct CostBudgetTracker {
    config: CostBudgetConfig,
    clock: Arc<dyn Clock>,
    usage: Mutex<HashMap<String, Usage>>,
}

impl CostBudgetTracker {
    /// Create a tracker with the given limits.
    pub fn new(config: CostBudgetConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// The configured limits.
    pub fn config(&self) -> CostBudgetConfig {
        self.config
    }

    /// Admit a query of `cost` for `key`, recording it and counting it in flight.
    ///
    /// The budget is checked before the concurrency cap. On refusal nothing is
    /// recorded and no release is owed.
    pub fn try_admit(&self, key: &str, cost: u64) -> Result<(), CostDenial> {
        let now = self.clock.now();
        let cutoff = now - self.config.window_secs;
        let mut all = self.usage.lock();
        let mut created = None;
        let usage = match all.get_mut(key) {
            Some(usage) => usage,
            None => created.insert(Usage::default()),
        };

        usage.prune(cutoff);
        let hourly_total = usage.total_since(cutoff);

        if hourly_total.saturating_add(cost) > self.config.hourly_budget {
            let retry_after_secs = if cost > self.config.hourly_budget {
                None
            } else {
                let excess = hourly_total + cost - self.config.hourly_budget;
                usage.time_to_free(excess, now, self.config.window_secs)
            };
            return Err(CostDenial::CostBudgetExceeded {
                hourly_total,
                requested: cost,
                budget: self.config.hourly_budget,
                retry_after_secs,
            });
        }

        if usage.in_flight >= self.config.max_concurrent {
            return Err(CostDenial::ConcurrencyLimit {
                in_flight: usage.in_flight,
                max: self.config.max_concurrent,
            });
        }

        usage.samples.push(CostSample { at: now, cost });
        usage.in_flight += 1;
        if let Some(usage) = created {
            all.insert(key.to_string(), usage);
        }
        Ok(())
    }

    /// Undo an admission whose request was never issued.
    ///
    /// Removes the most recent sample of `cost` and its in-flight slot, so the
    /// admission leaves no trace. Callers must not also [`release`](Self::release) it.
    pub fn revoke(&self, key: &str, cost: u64) {
        let mut all = self.usage.lock();
        let Some(usage) = all.get_mut(key) else {
            debug!(key, "Revoke without a matching admission, ignoring");
            return;
        };

        if let Some(index) = usage.samples.iter().rposition(|s| s.cost == cost) {
            usage.samples.remove(index);
        }
        usage.in_flight = usage.in_flight.saturating_sub(1);

        if usage.samples.is_empty() && usage.in_flight == 0 {
            all.remove(key);
        }
    }

    /// Boolean form of [`try_admit`](Self::try_admit).
    pub fn admit(&self, key: &str, cost: u64) -> bool {
        self.try_admit(key, cost).is_ok()
    }

    /// Mark one of `key`'s queries as finished.
    ///
    /// Never drops below zero; a release with nothing in flight is ignored.
    pub fn release(&self, key: &str) {
        let mut all = self.usage.lock();
        match all.get_mut(key) {
            Some(usage) if usage.in_flight > 0 => usage.in_flight -= 1,
            _ => debug!(key, "Release without a matching admission, ignoring"),
        }
    }

    /// Current usage for `key` without pruning anything.
    pub fn snapshot(&self, key: &str) -> UsageSnapshot {
        let cutoff = self.clock.now() - self.config.window_secs;
        let all = self.usage.lock();
        all.get(key)
            .map(|usage| UsageSnapshot {
                hourly_cost: usage.total_since(cutoff),
                in_flight: usage.in_flight,
            })
            .unwrap_or_default()
    }

    /// Number of users currently tracked.
    pub fn len(&self) -> usize {
        self.usage.lock().len()
    }

    /// Whether no users are tracked.
    pub fn is_empty(&self) -> bool {
        self.usage.lock().is_empty()
    }

    /// Prune every user's samples and forget users with nothing left.
    ///
    /// Returns how many users were forgotten.
    pub fn sweep_idle(&self) -> usize {
        let cutoff = self.clock.now() - self.config.window_secs;
        let mut all = self.usage.lock();
        let before = all.len();

        all.retain(|_, usage| {
            usage.prune(cutoff);
            !usage.samples.is_empty() || usage.in_flight > 0
        });

        before - all.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn tracker() -> (CostBudgetTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let tracker = CostBudgetTracker::new(CostBudgetConfig::default(), clock.clone());
        (tracker, clock)
    }

    #[test]
    fn test_budget_boundary() {
        let (tracker, clock) = tracker();

        assert!(tracker.admit("u", 12_000));
        tracker.release("u");

        assert!(!tracker.admit("u", 1));

        clock.advance(3600.5);
        assert!(tracker.admit("u", 1));
    }

    #[test]
    fn test_sample_exactly_one_window_old_still_counts() {
        let (tracker, clock) = tracker();

        assert!(tracker.admit("u", 12_000));
        tracker.release("u");

        clock.advance(3600.0);
        assert!(!tracker.admit("u", 1));
    }

    #[test]
    fn test_budget_denial_reports_retry_after() {
        let (tracker, clock) = tracker();

        assert!(tracker.admit("u", 5_000));
        tracker.release("u");
        clock.advance(600.0);
        assert!(tracker.admit("u", 6_000));
        tracker.release("u");
        clock.advance(600.0);

        // 11_000 used; 2_000 more needs the first sample to age out.
        match tracker.try_admit("u", 2_000) {
            Err(CostDenial::CostBudgetExceeded {
                hourly_total,
                requested,
                budget,
                retry_after_secs,
            }) => {
                assert_eq!(hourly_total, 11_000);
                assert_eq!(requested, 2_000);
                assert_eq!(budget, 12_000);
                let wait = retry_after_secs.unwrap();
                assert!((wait - 2400.0).abs() < 1e-6);
            }
            other => panic!("expected budget denial, got {:?}", other),
        }
    }

    #[test]
    fn test_cost_larger_than_budget_never_fits() {
        let (tracker, _clock) = tracker();

        match tracker.try_admit("u", 12_001) {
            Err(CostDenial::CostBudgetExceeded { retry_after_secs, .. }) => {
                assert_eq!(retry_after_secs, None)
            }
            other => panic!("expected budget denial, got {:?}", other),
        }
        assert_eq!(tracker.snapshot("u"), UsageSnapshot::default());
    }

    #[test]
    fn test_denied_first_request_leaves_no_entry() {
        let (tracker, _clock) = tracker();

        assert!(!tracker.admit("newcomer", 12_001));
        assert!(tracker.is_empty());

        let capped = CostBudgetTracker::new(
            CostBudgetConfig {
                max_concurrent: 1,
                ..CostBudgetConfig::default()
            },
            Arc::new(ManualClock::default()),
        );
        assert!(capped.admit("busy", 1));
        assert!(!capped.admit("busy", 1));
        assert!(!capped.admit("other", 12_001));
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn test_revoke_erases_the_admission() {
        let (tracker, _clock) = tracker();

        assert!(tracker.admit("u", 100));
        assert!(tracker.admit("u", 40));
        tracker.revoke("u", 40);
        assert_eq!(
            tracker.snapshot("u"),
            UsageSnapshot {
                hourly_cost: 100,
                in_flight: 1
            }
        );

        tracker.release("u");
        assert!(tracker.admit("solo", 7));
        tracker.revoke("solo", 7);
        assert_eq!(tracker.snapshot("solo"), UsageSnapshot::default());
        assert_eq!(tracker.len(), 1);

        tracker.revoke("never-seen", 1);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_concurrency_cap() {
        let (tracker, _clock) = tracker();

        for _ in 0..5 {
            assert!(tracker.admit("u", 1));
        }
        assert_eq!(
            tracker.try_admit("u", 1),
            Err(CostDenial::ConcurrencyLimit { in_flight: 5, max: 5 })
        );

        tracker.release("u");
        assert!(tracker.admit("u", 1));
    }

    #[test]
    fn test_denied_request_records_nothing() {
        let (tracker, _clock) = tracker();

        for _ in 0..5 {
            assert!(tracker.admit("u", 10));
        }
        assert!(!tracker.admit("u", 10));

        assert_eq!(
            tracker.snapshot("u"),
            UsageSnapshot {
                hourly_cost: 50,
                in_flight: 5
            }
        );
    }

    #[test]
    fn test_extra_releases_grant_no_headroom() {
        let (tracker, _clock) = tracker();

        tracker.release("never-seen");
        assert!(tracker.admit("u", 1));
        for _ in 0..10 {
            tracker.release("u");
        }
        assert_eq!(tracker.snapshot("u").in_flight, 0);

        for _ in 0..5 {
            assert!(tracker.admit("u", 1));
        }
        assert!(!tracker.admit("u", 1));
    }

    #[test]
    fn test_same_instant_samples_are_all_counted() {
        let (tracker, _clock) = tracker();

        for _ in 0..3 {
            assert!(tracker.admit("u", 4_000));
            tracker.release("u");
        }
        assert_eq!(tracker.snapshot("u").hourly_cost, 12_000);
        assert!(!tracker.admit("u", 1));
    }

    #[test]
    fn test_users_are_isolated() {
        let (tracker, _clock) = tracker();

        assert!(tracker.admit("alice", 12_000));
        assert!(tracker.admit("bob", 12_000));
        assert!(!tracker.admit("alice", 1));
    }

    #[test]
    fn test_sweep_idle() {
        let (tracker, clock) = tracker();

        assert!(tracker.admit("done", 10));
        tracker.release("done");
        assert!(tracker.admit("running", 10));

        clock.advance(3601.0);
        assert_eq!(tracker.sweep_idle(), 1);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.snapshot("running").in_flight, 1);
    }
}
