pub mod cache;
pub mod classify;
pub mod config;
pub mod cost;
pub mod metrics_server;
pub mod observability;
pub mod scheduler;
pub mod stores;
pub mod usage;

pub use cache::{CacheOutcome, EstimateCache, EstimateInputs};
pub use classify::{classify, PLAN_CALC_VERSION};
pub use cost::{compute_cost, compute_monthly_from_buckets, CostError};
pub use scheduler::{should_start, EnrichmentRunner, SchedulePolicy, StartDecision, StartReason};
