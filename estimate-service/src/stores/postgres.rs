use std::{future::Future, time::Duration};

use plan_client::{
    db::{delivery_rate_queries, estimate_queries, job_snapshot_queries, rate_plan_queries, usage_bucket_queries},
    domain::{
        DeliveryRates, MaterializedEstimate, PipelineJobSnapshot, PlanComputabilityResult, RatePlan,
        UsageBucketsByMonth,
    },
};
use sqlx::postgres::PgPool;
use time::Date;

use super::{DeliveryRateStore, EstimateStore, JobSnapshotStore, RatePlanCatalog, StoreError, UsageStore};

/// Postgres-backed store over the `plan_client::db` queries.
///
/// Writes are retried up to `max_retries` times with linear backoff; reads
/// are not retried.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    max_retries: u32,
    retry_backoff: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            pool,
            max_retries,
            retry_backoff,
        }
    }

    async fn write_with_retry<T, F, Fut>(&self, what: &'static str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(error = %e, attempt, what, "store write failed, retrying with backoff");
                    metrics::counter!("store_write_retries_total").increment(1);
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, what, "store write failed, giving up");
                    return Err(StoreError::Write(format!("{what}: {e}")));
                }
            }
        }
    }
}

/// Decode failures (bad JSON, unknown enum values) are reported separately
/// from connectivity failures.
fn read_error(what: &str, e: anyhow::Error) -> StoreError {
    match e.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Decode(_)) | Some(sqlx::Error::ColumnDecode { .. }) | None => {
            StoreError::Decode(format!("{what}: {e}"))
        }
        Some(_) => StoreError::Read(format!("{what}: {e}")),
    }
}

#[async_trait::async_trait]
impl EstimateStore for PgStore {
    async fn find_estimate(
        &self,
        household_id: &str,
        rate_plan_id: &str,
        inputs_sha256: &str,
    ) -> Result<Option<MaterializedEstimate>, StoreError> {
        estimate_queries::find_estimate(&self.pool, household_id, rate_plan_id, inputs_sha256)
            .await
            .map_err(|e| read_error("find_estimate", e))
    }

    async fn insert_estimate(&self, estimate: &MaterializedEstimate) -> Result<bool, StoreError> {
        self.write_with_retry("insert_estimate", || estimate_queries::insert_estimate(&self.pool, estimate))
            .await
    }
}

#[async_trait::async_trait]
impl JobSnapshotStore for PgStore {
    async fn latest_snapshot(&self, household_id: &str) -> Result<Option<PipelineJobSnapshot>, StoreError> {
        job_snapshot_queries::latest_snapshot(&self.pool, household_id)
            .await
            .map_err(|e| read_error("latest_snapshot", e))
    }

    async fn insert_snapshot(&self, snapshot: &PipelineJobSnapshot) -> Result<(), StoreError> {
        self.write_with_retry("insert_snapshot", || job_snapshot_queries::insert_snapshot(&self.pool, snapshot))
            .await
    }
}

#[async_trait::async_trait]
impl UsageStore for PgStore {
    async fn usage_buckets_by_month(
        &self,
        household_id: &str,
        bucket_keys: &[String],
        from_month: &str,
        to_month: &str,
    ) -> Result<UsageBucketsByMonth, StoreError> {
        usage_bucket_queries::usage_buckets_by_month(&self.pool, household_id, bucket_keys, from_month, to_month)
            .await
            .map_err(|e| read_error("usage_buckets_by_month", e))
    }
}

#[async_trait::async_trait]
impl DeliveryRateStore for PgStore {
    async fn active_delivery_rates(&self, household_id: &str, as_of: Date) -> Result<Option<DeliveryRates>, StoreError> {
        delivery_rate_queries::active_delivery_rates(&self.pool, household_id, as_of)
            .await
            .map_err(|e| read_error("active_delivery_rates", e))
    }
}

#[async_trait::async_trait]
impl RatePlanCatalog for PgStore {
    async fn candidate_plans(&self, household_id: &str) -> Result<Vec<RatePlan>, StoreError> {
        rate_plan_queries::candidate_plans(&self.pool, household_id)
            .await
            .map_err(|e| read_error("candidate_plans", e))
    }

    async fn record_computability(&self, rate_plan_id: &str, result: &PlanComputabilityResult) -> Result<(), StoreError> {
        self.write_with_retry("record_computability", || {
            rate_plan_queries::record_computability(&self.pool, rate_plan_id, result)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn boxed(msg: &str) -> Box<dyn std::error::Error + Send + Sync> {
        msg.to_string().into()
    }

    #[test]
    fn decode_failures_are_told_apart_from_read_failures() {
        let decode = read_error("plans", sqlx::Error::Decode(boxed("bad json")).into());
        assert!(matches!(decode, StoreError::Decode(ref m) if m.starts_with("plans: ")));

        let column = sqlx::Error::ColumnDecode {
            index: "\"rate_structure\"".to_string(),
            source: boxed("invalid type"),
        };
        assert!(matches!(read_error("plans", column.into()), StoreError::Decode(_)));

        assert!(matches!(
            read_error("plans", anyhow::anyhow!("unexpected bucket key")),
            StoreError::Decode(_)
        ));

        assert!(matches!(read_error("plans", sqlx::Error::PoolTimedOut.into()), StoreError::Read(_)));
        assert!(matches!(read_error("plans", sqlx::Error::RowNotFound.into()), StoreError::Read(_)));
        assert!(matches!(
            read_error("plans", sqlx::Error::Protocol("connection reset".to_string()).into()),
            StoreError::Read(_)
        ));
    }

    #[tokio::test]
    async fn writes_give_up_after_max_retries() {
        let pool = PgPool::connect_lazy("postgres://localhost/unused").unwrap();
        let store = PgStore::new(pool, 2, Duration::from_millis(1));
        let attempts = AtomicU32::new(0);

        let res: Result<(), StoreError> = store
            .write_with_retry("snapshot", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::anyhow!("connection refused")) }
            })
            .await;

        assert!(matches!(res, Err(StoreError::Write(ref m)) if m.contains("connection refused")));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn writes_recover_when_a_retry_succeeds() {
        let pool = PgPool::connect_lazy("postgres://localhost/unused").unwrap();
        let store = PgStore::new(pool, 3, Duration::from_millis(1));
        let attempts = AtomicU32::new(0);

        let res = store
            .write_with_retry("estimate", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(anyhow::anyhow!("deadlock detected"))
                    } else {
                        Ok(true)
                    }
                }
            })
            .await;

        assert!(res.unwrap());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
