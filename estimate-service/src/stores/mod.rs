//! Storage seams for the engine: the usage store, the rate plan catalog,
//! delivery rate snapshots, the materialized estimate table and the job
//! snapshot log.

pub mod memory;
pub mod postgres;

use plan_client::domain::{
    DeliveryRates, MaterializedEstimate, PipelineJobSnapshot, PlanComputabilityResult, RatePlan, UsageBucketsByMonth,
};
use time::Date;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store read failed: {0}")]
    Read(String),
    #[error("store write failed: {0}")]
    Write(String),
    #[error("stored row could not be decoded: {0}")]
    Decode(String),
}

#[async_trait::async_trait]
pub trait EstimateStore: Send + Sync {
    async fn find_estimate(
        &self,
        household_id: &str,
        rate_plan_id: &str,
        inputs_sha256: &str,
    ) -> Result<Option<MaterializedEstimate>, StoreError>;

    /// Insert unless a row with the same key exists. Returns `true` if this
    /// call created the row.
    async fn insert_estimate(&self, estimate: &MaterializedEstimate) -> Result<bool, StoreError>;
}

#[async_trait::async_trait]
pub trait JobSnapshotStore: Send + Sync {
    async fn latest_snapshot(&self, household_id: &str) -> Result<Option<PipelineJobSnapshot>, StoreError>;

    async fn insert_snapshot(&self, snapshot: &PipelineJobSnapshot) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
pub trait UsageStore: Send + Sync {
    /// Buckets for months in `[from_month, to_month]`, restricted to
    /// `bucket_keys`.
    async fn usage_buckets_by_month(
        &self,
        household_id: &str,
        bucket_keys: &[String],
        from_month: &str,
        to_month: &str,
    ) -> Result<UsageBucketsByMonth, StoreError>;
}

#[async_trait::async_trait]
pub trait DeliveryRateStore: Send + Sync {
    async fn active_delivery_rates(&self, household_id: &str, as_of: Date) -> Result<Option<DeliveryRates>, StoreError>;
}

#[async_trait::async_trait]
pub trait RatePlanCatalog: Send + Sync {
    async fn candidate_plans(&self, household_id: &str) -> Result<Vec<RatePlan>, StoreError>;

    async fn record_computability(&self, rate_plan_id: &str, result: &PlanComputabilityResult) -> Result<(), StoreError>;
}

/// Everything an enrichment run reads or writes.
pub trait PlanEngineStore: EstimateStore + JobSnapshotStore + UsageStore + DeliveryRateStore + RatePlanCatalog {}

impl<T> PlanEngineStore for T where T: EstimateStore + JobSnapshotStore + UsageStore + DeliveryRateStore + RatePlanCatalog {}
