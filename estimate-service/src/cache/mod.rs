//! Content-addressed cache of materialized plan estimates.
//!
//! A row is keyed by `(household_id, rate_plan_id, inputs_sha256)`. A hit is
//! returned as stored with no time-based staleness check; any input drift
//! produces a different key. Writes are insert-only.

pub mod hash;

use std::{sync::Arc, time::Instant};

use plan_client::domain::{
    ComputabilityStatus, Confidence, EstimatePayload, EstimateSource, EstimateStatus, MaterializedEstimate,
    ReasonCode,
};
use time::{Duration, OffsetDateTime};

use crate::{
    cost::{compute_monthly_from_buckets, round_cents},
    stores::{EstimateStore, StoreError},
    usage::{covered_months, has_required_buckets},
};

pub use hash::{inputs_sha256, EstimateInputs};

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("failed to hash estimate inputs: {0}")]
    Hash(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheOutcome {
    pub inputs_sha256: String,
    pub payload: EstimatePayload,
    pub source: EstimateSource,
    /// The lookup failed and the estimate was recomputed; distinct from a
    /// plain miss.
    pub cache_read_error: bool,
    /// This call created the row.
    pub persisted: bool,
}

pub struct EstimateCache<E: ?Sized> {
    store: Arc<E>,
    ttl: Duration,
}

impl<E> EstimateCache<E>
where
    E: EstimateStore + ?Sized,
{
    pub fn new(store: Arc<E>, ttl_days: i64) -> Self {
        Self {
            store,
            ttl: Duration::days(ttl_days),
        }
    }

    pub async fn get_or_compute(
        &self,
        household_id: &str,
        rate_plan_id: &str,
        inputs: &EstimateInputs,
        now: OffsetDateTime,
    ) -> Result<CacheOutcome, CacheError> {
        let sha = inputs_sha256(inputs)?;

        let mut cache_read_error = false;
        match self.store.find_estimate(household_id, rate_plan_id, &sha).await {
            Ok(Some(hit)) => {
                metrics::counter!("estimate_cache_hits_total").increment(1);
                tracing::debug!(household_id, rate_plan_id, inputs_sha256 = %sha, "materialized estimate hit");
                return Ok(CacheOutcome {
                    inputs_sha256: sha,
                    payload: hit.payload,
                    source: EstimateSource::Materialized,
                    cache_read_error: false,
                    persisted: false,
                });
            }
            Ok(None) => {
                metrics::counter!("estimate_cache_misses_total").increment(1);
            }
            Err(e) => {
                cache_read_error = true;
                metrics::counter!("estimate_cache_read_errors_total").increment(1);
                tracing::warn!(
                    error = %e,
                    household_id,
                    rate_plan_id,
                    inputs_sha256 = %sha,
                    "estimate cache read failed, recomputing"
                );
            }
        }

        let payload = build_payload(inputs, now, self.ttl);
        let estimate = MaterializedEstimate {
            household_id: household_id.to_string(),
            rate_plan_id: rate_plan_id.to_string(),
            inputs_sha256: sha,
            payload,
        };

        let persisted = match self.persist(&estimate).await {
            Ok(created) => created,
            Err(e) => {
                metrics::counter!("estimate_cache_write_errors_total").increment(1);
                tracing::warn!(
                    error = %e,
                    household_id,
                    rate_plan_id,
                    inputs_sha256 = %estimate.inputs_sha256,
                    "estimate cache write failed, returning computed value"
                );
                false
            }
        };

        Ok(CacheOutcome {
            inputs_sha256: estimate.inputs_sha256,
            payload: estimate.payload,
            source: EstimateSource::Computed,
            cache_read_error,
            persisted,
        })
    }

    /// Insert-only write. `Ok(false)` means another writer got there first
    /// with the same content address.
    pub async fn persist(&self, estimate: &MaterializedEstimate) -> Result<bool, StoreError> {
        let created = self.store.insert_estimate(estimate).await?;
        if !created {
            tracing::debug!(
                household_id = %estimate.household_id,
                rate_plan_id = %estimate.rate_plan_id,
                "materialized estimate already present"
            );
        }
        Ok(created)
    }
}

fn confidence_for(months: usize) -> Confidence {
    match months {
        m if m >= 12 => Confidence::High,
        m if m >= 3 => Confidence::Medium,
        _ => Confidence::Low,
    }
}

/// Turn canonical inputs into the stored payload shape.
///
/// Plans that cannot be priced still produce a payload (and are cached) so
/// the answer is not re-derived on every request.
pub fn build_payload(inputs: &EstimateInputs, computed_at: OffsetDateTime, ttl: Duration) -> EstimatePayload {
    let expires_at = computed_at + ttl;
    let unpriced = |status, reason| EstimatePayload {
        status,
        reason,
        annual_cost_dollars: None,
        monthly_cost_dollars: None,
        effective_cents_per_kwh: None,
        confidence: None,
        component_breakdown: None,
        delivery_rates_applied: None,
        computed_at,
        expires_at,
    };

    let computability = &inputs.computability;
    let Some(rs) = inputs.rate_structure.as_ref() else {
        return unpriced(EstimateStatus::NotComputable, ReasonCode::MissingTemplate);
    };
    match computability.status {
        ComputabilityStatus::Computable => {}
        ComputabilityStatus::Unknown => return unpriced(EstimateStatus::NotComputable, ReasonCode::MissingTemplate),
        ComputabilityStatus::NotComputable => {
            return unpriced(EstimateStatus::NotImplemented, computability.reason_code);
        }
    }

    let required = &computability.required_bucket_keys;
    if !has_required_buckets(&inputs.usage_buckets_by_month, required) {
        return unpriced(EstimateStatus::NotComputable, ReasonCode::MissingUsage);
    }

    let started = Instant::now();
    let result = compute_monthly_from_buckets(rs, &inputs.usage_buckets_by_month, inputs.delivery_rates.as_ref());
    metrics::histogram!("plan_cost_compute_seconds").record(started.elapsed().as_secs_f64());

    let result = match result {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "computable plan could not be priced from monthly buckets");
            return unpriced(EstimateStatus::NotComputable, ReasonCode::NotComputable);
        }
    };

    let months = result.monthly.len();
    if months == 0 {
        return unpriced(EstimateStatus::NotComputable, ReasonCode::MissingUsage);
    }

    let per_month = result.total_cost_dollars / months as f64;
    let kwh = result.totals.kwh_import;
    let effective_cents_per_kwh =
        (kwh > 0.0).then(|| (result.total_cost_dollars * 100.0 / kwh * 10_000.0).round() / 10_000.0);

    EstimatePayload {
        status: EstimateStatus::Ok,
        reason: computability.reason_code,
        annual_cost_dollars: Some(round_cents(per_month * 12.0)),
        monthly_cost_dollars: Some(round_cents(per_month)),
        effective_cents_per_kwh,
        confidence: Some(confidence_for(covered_months(&inputs.usage_buckets_by_month, required))),
        component_breakdown: Some(result.totals),
        delivery_rates_applied: inputs.delivery_rates.clone(),
        computed_at,
        expires_at,
    }
}
