use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicBool, Ordering},
};

use plan_client::domain::{
    DeliveryRates, MaterializedEstimate, PipelineJobSnapshot, PlanComputabilityResult, RatePlan, UsageBucketsByMonth,
};
use time::Date;
use tokio::sync::Mutex;

use super::{DeliveryRateStore, EstimateStore, JobSnapshotStore, RatePlanCatalog, StoreError, UsageStore};

type EstimateKey = (String, String, String);

/// In-process store for local runs and tests. Same contract as the Postgres
/// store: estimates are insert-only and snapshots append-only.
#[derive(Default)]
pub struct MemoryStore {
    estimates: Mutex<HashMap<EstimateKey, MaterializedEstimate>>,
    snapshots: Mutex<HashMap<String, Vec<PipelineJobSnapshot>>>,
    usage: Mutex<HashMap<String, UsageBucketsByMonth>>,
    delivery: Mutex<HashMap<String, Vec<DeliveryRates>>>,
    plans: Mutex<HashMap<String, Vec<RatePlan>>>,
    fail_estimate_reads: AtomicBool,
    fail_estimate_writes: AtomicBool,
    fail_snapshot_writes: AtomicBool,
    fail_catalog_reads: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_usage(&self, household_id: &str, buckets: UsageBucketsByMonth) {
        self.usage.lock().await.insert(household_id.to_string(), buckets);
    }

    pub async fn add_delivery_rates(&self, household_id: &str, rates: DeliveryRates) {
        self.delivery
            .lock()
            .await
            .entry(household_id.to_string())
            .or_default()
            .push(rates);
    }

    pub async fn add_plan(&self, household_id: &str, plan: RatePlan) {
        self.plans
            .lock()
            .await
            .entry(household_id.to_string())
            .or_default()
            .push(plan);
    }

    /// Every snapshot recorded for a household, oldest first.
    pub async fn snapshots(&self, household_id: &str) -> Vec<PipelineJobSnapshot> {
        self.snapshots
            .lock()
            .await
            .get(household_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn estimate_count(&self) -> usize {
        self.estimates.lock().await.len()
    }

    /// Make subsequent estimate reads fail.
    pub fn set_fail_estimate_reads(&self, fail: bool) {
        self.fail_estimate_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent estimate writes fail.
    pub fn set_fail_estimate_writes(&self, fail: bool) {
        self.fail_estimate_writes.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent snapshot writes fail.
    pub fn set_fail_snapshot_writes(&self, fail: bool) {
        self.fail_snapshot_writes.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent rate plan catalog reads fail.
    pub fn set_fail_catalog_reads(&self, fail: bool) {
        self.fail_catalog_reads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl EstimateStore for MemoryStore {
    async fn find_estimate(
        &self,
        household_id: &str,
        rate_plan_id: &str,
        inputs_sha256: &str,
    ) -> Result<Option<MaterializedEstimate>, StoreError> {
        if self.fail_estimate_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Read("estimate reads disabled".to_string()));
        }
        let key = (
            household_id.to_string(),
            rate_plan_id.to_string(),
            inputs_sha256.to_string(),
        );
        Ok(self.estimates.lock().await.get(&key).cloned())
    }

    async fn insert_estimate(&self, estimate: &MaterializedEstimate) -> Result<bool, StoreError> {
        if self.fail_estimate_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Write("estimate writes disabled".to_string()));
        }
        let key = (
            estimate.household_id.clone(),
            estimate.rate_plan_id.clone(),
            estimate.inputs_sha256.clone(),
        );
        let mut estimates = self.estimates.lock().await;
        if estimates.contains_key(&key) {
            return Ok(false);
        }
        estimates.insert(key, estimate.clone());
        Ok(true)
    }
}

#[async_trait::async_trait]
impl JobSnapshotStore for MemoryStore {
    async fn latest_snapshot(&self, household_id: &str) -> Result<Option<PipelineJobSnapshot>, StoreError> {
        Ok(self
            .snapshots
            .lock()
            .await
            .get(household_id)
            .and_then(|s| s.last().cloned()))
    }

    async fn insert_snapshot(&self, snapshot: &PipelineJobSnapshot) -> Result<(), StoreError> {
        if self.fail_snapshot_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Write("snapshot writes disabled".to_string()));
        }
        self.snapshots
            .lock()
            .await
            .entry(snapshot.household_id.clone())
            .or_default()
            .push(snapshot.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl UsageStore for MemoryStore {
    async fn usage_buckets_by_month(
        &self,
        household_id: &str,
        bucket_keys: &[String],
        from_month: &str,
        to_month: &str,
    ) -> Result<UsageBucketsByMonth, StoreError> {
        let usage = self.usage.lock().await;
        let Some(all) = usage.get(household_id) else {
            return Ok(UsageBucketsByMonth::new());
        };
        let mut out = UsageBucketsByMonth::new();
        for (month, values) in all.range(from_month.to_string()..=to_month.to_string()) {
            let kept: BTreeMap<String, f64> = values
                .iter()
                .filter(|(k, _)| bucket_keys.contains(*k))
                .map(|(k, v)| (k.clone(), *v))
                .collect();
            if !kept.is_empty() {
                out.insert(month.clone(), kept);
            }
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl DeliveryRateStore for MemoryStore {
    async fn active_delivery_rates(&self, household_id: &str, as_of: Date) -> Result<Option<DeliveryRates>, StoreError> {
        Ok(self.delivery.lock().await.get(household_id).and_then(|rates| {
            rates
                .iter()
                .filter(|r| r.effective_date <= as_of)
                .max_by_key(|r| r.effective_date)
                .cloned()
        }))
    }
}

#[async_trait::async_trait]
impl RatePlanCatalog for MemoryStore {
    async fn candidate_plans(&self, household_id: &str) -> Result<Vec<RatePlan>, StoreError> {
        if self.fail_catalog_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Read("catalog reads disabled".to_string()));
        }
        let mut plans = self
            .plans
            .lock()
            .await
            .get(household_id)
            .cloned()
            .unwrap_or_default();
        plans.sort_by(|a, b| a.rate_plan_id.cmp(&b.rate_plan_id));
        Ok(plans)
    }

    async fn record_computability(&self, rate_plan_id: &str, result: &PlanComputabilityResult) -> Result<(), StoreError> {
        for plans in self.plans.lock().await.values_mut() {
            for plan in plans.iter_mut().filter(|p| p.rate_plan_id == rate_plan_id) {
                plan.computability = Some(result.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plan_client::domain::BUCKET_KWH_MONTH_ALL_TOTAL;
    use time::macros::date;

    #[tokio::test]
    async fn usage_reads_filter_by_range_and_key() {
        let store = MemoryStore::new();
        let mut b = UsageBucketsByMonth::new();
        for (m, kwh) in [("2023-12", 1.0), ("2024-01", 2.0), ("2024-02", 3.0)] {
            b.insert(
                m.to_string(),
                BTreeMap::from([
                    (BUCKET_KWH_MONTH_ALL_TOTAL.to_string(), kwh),
                    ("kwh.month.peak".to_string(), 0.5),
                ]),
            );
        }
        store.set_usage("h1", b).await;

        let got = store
            .usage_buckets_by_month("h1", &[BUCKET_KWH_MONTH_ALL_TOTAL.to_string()], "2024-01", "2024-12")
            .await
            .unwrap();

        assert_eq!(got.len(), 2);
        assert_eq!(got["2024-01"].len(), 1);
        assert!(store
            .usage_buckets_by_month("nobody", &[], "2024-01", "2024-12")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn delivery_rates_pick_latest_effective() {
        let store = MemoryStore::new();
        for (d, cents) in [(date!(2023-01-01), 3.0), (date!(2024-03-01), 4.0), (date!(2025-01-01), 5.0)] {
            store
                .add_delivery_rates(
                    "h1",
                    DeliveryRates {
                        per_kwh_delivery_charge_cents: cents,
                        monthly_customer_charge_dollars: 4.23,
                        effective_date: d,
                    },
                )
                .await;
        }
        let r = store.active_delivery_rates("h1", date!(2024-06-01)).await.unwrap().unwrap();
        assert_eq!(r.per_kwh_delivery_charge_cents, 4.0);
        assert!(store.active_delivery_rates("h1", date!(2022-06-01)).await.unwrap().is_none());
    }
}
