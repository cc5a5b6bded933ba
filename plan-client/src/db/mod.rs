pub mod delivery_rate_queries;
pub mod estimate_queries;
pub mod job_snapshot_queries;
pub mod rate_plan_queries;
pub mod usage_bucket_queries;
