//! # Hub Admission
//!
//! Request admission and cost accounting for the integration hub.
//!
//! Every call the hub makes to Notion, Slack, GitHub or Amplitude first asks an
//! [`AdmissionController`] for permission:
//!
//! - **Token buckets** shape the per-minute request rate of each API family,
//!   one bucket per `"<api>:<user>"` key.
//! - **Cost budget** enforces Amplitude's billing model on top of that: a
//!   rolling-hour cost budget and a cap on concurrent in-flight queries.
//!
//! All state is in memory and guarded by mutexes, so one controller can be
//! shared across a multi-threaded runtime.
//!
//! ## Example
//!
//! ```rust,no_run
//! use hub_admission::{AdmissionController, Integration, QueryCost, QueryKind};
//!
//! let admission = AdmissionController::with_defaults();
//!
//! // Generic API families: one token per call.
//! if let Err(denied) = admission.admit(Integration::Slack, "alice") {
//!     println!("{}", denied.payload());
//! }
//!
//! // Amplitude: price the query, then hold a permit while it runs.
//! let cost = QueryCost::new(QueryKind::Retention)
//!     .over_range("20240101", "20240107")
//!     .cost();
//! match admission.amplitude_permit("alice", cost) {
//!     Ok(_permit) => { /* issue the HTTP call; the slot is freed on drop */ }
//!     Err(denied) => println!("{}", denied.payload()),
//! };
//! ```

pub mod bucket;
pub mod budget;
pub mod clock;
pub mod config;
pub mod controller;
pub mod cost;
pub mod integration;
pub mod limiter;

pub use bucket::TokenBucket;
pub use budget::{CostBudgetTracker, CostDenial, UsageSnapshot};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AdmissionConfig, ConfigError, CostBudgetConfig, LimitConfig, COST_WINDOW_SECS,
    DEFAULT_HOURLY_COST_BUDGET, DEFAULT_MAX_CONCURRENT,
};
pub use controller::{AdmissionController, AdmissionDenied, AmplitudePermit, SweepStats};
pub use cost::{calculate_cost, days_between, QueryCost, QueryKind};
pub use integration::Integration;
pub use limiter::KeyedRateLimiter;
