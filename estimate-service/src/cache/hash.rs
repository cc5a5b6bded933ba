use std::collections::BTreeSet;

use plan_client::domain::{CalculationMode, DeliveryRates, PlanComputabilityResult, RateStructure, UsageBucketsByMonth};
use sha2::{Digest, Sha256};

use crate::usage::select_months;

/// Every input that can change an estimate. Two values that compare equal
/// after canonicalization hash identically.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimateInputs {
    /// Already trimmed to the months in scope and the plan's required keys.
    pub usage_buckets_by_month: UsageBucketsByMonth,
    pub rate_structure: Option<RateStructure>,
    pub computability: PlanComputabilityResult,
    /// `None` in energy-only mode, whatever the store returned.
    pub delivery_rates: Option<DeliveryRates>,
    pub mode: CalculationMode,
    pub months_in_scope: u32,
}

impl EstimateInputs {
    /// Canonical inputs for one plan: usage is cut down to the most recent
    /// `months_in_scope` months and to the buckets the plan requires, and
    /// delivery is dropped in energy-only mode.
    pub fn new(
        usage: &UsageBucketsByMonth,
        rate_structure: Option<RateStructure>,
        computability: PlanComputabilityResult,
        delivery_rates: Option<DeliveryRates>,
        mode: CalculationMode,
        months_in_scope: u32,
    ) -> Self {
        let required: BTreeSet<&str> = computability.required_bucket_keys.iter().map(String::as_str).collect();
        let mut usage_buckets_by_month = select_months(usage, months_in_scope as usize);
        for values in usage_buckets_by_month.values_mut() {
            values.retain(|k, _| required.contains(k.as_str()));
        }
        usage_buckets_by_month.retain(|_, values| !values.is_empty());

        let rate_structure = rate_structure.map(|mut rs| {
            // Credits sum per month, so rule order carries no meaning.
            rs.bill_credits.rules.sort_by(|a, b| {
                a.min_usage_kwh
                    .total_cmp(&b.min_usage_kwh)
                    .then_with(|| {
                        let a_max = a.max_usage_kwh.unwrap_or(f64::INFINITY);
                        a_max.total_cmp(&b.max_usage_kwh.unwrap_or(f64::INFINITY))
                    })
                    .then_with(|| a.credit_amount_cents.total_cmp(&b.credit_amount_cents))
                    .then_with(|| a.months_of_year.cmp(&b.months_of_year))
                    .then_with(|| a.label.cmp(&b.label))
            });
            rs
        });

        let delivery_rates = match mode {
            CalculationMode::AllIn => delivery_rates,
            CalculationMode::EnergyOnly => None,
        };

        Self {
            usage_buckets_by_month,
            rate_structure,
            computability,
            delivery_rates,
            mode,
            months_in_scope,
        }
    }
}

const HASH_DOMAIN: &str = "plan-estimate-inputs/v1";

fn hash_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_bytes(hasher: &mut Sha256, b: &[u8]) {
    hasher.update((b.len() as u64).to_le_bytes());
    hasher.update(b);
}

fn hash_f64(hasher: &mut Sha256, v: f64) {
    // 0.0 and -0.0 are the same fact.
    let v = if v == 0.0 { 0.0 } else { v };
    hasher.update(v.to_bits().to_le_bytes());
}

fn hash_tag(hasher: &mut Sha256, present: bool) {
    hasher.update([u8::from(present)]);
}

/// Hex SHA-256 content address of `inputs`.
///
/// Usage buckets and required keys are hashed as sets (sorted by key,
/// duplicates dropped). Every field is length- or tag-prefixed so adjacent
/// fields cannot run into each other.
pub fn inputs_sha256(inputs: &EstimateInputs) -> Result<String, serde_json::Error> {
    let mut h = Sha256::new();
    hash_str(&mut h, HASH_DOMAIN);
    h.update(inputs.computability.plan_calc_version.to_le_bytes());
    hash_str(&mut h, inputs.mode.as_str());
    h.update(inputs.months_in_scope.to_le_bytes());

    let required: BTreeSet<&str> = inputs
        .computability
        .required_bucket_keys
        .iter()
        .map(String::as_str)
        .collect();
    h.update((required.len() as u64).to_le_bytes());
    for key in required {
        hash_str(&mut h, key);
    }

    h.update((inputs.usage_buckets_by_month.len() as u64).to_le_bytes());
    for (month, values) in &inputs.usage_buckets_by_month {
        hash_str(&mut h, month);
        h.update((values.len() as u64).to_le_bytes());
        for (key, kwh) in values {
            hash_str(&mut h, key);
            hash_f64(&mut h, *kwh);
        }
    }

    hash_tag(&mut h, inputs.rate_structure.is_some());
    if let Some(rs) = &inputs.rate_structure {
        hash_bytes(&mut h, &serde_json::to_vec(rs)?);
    }

    hash_tag(&mut h, inputs.delivery_rates.is_some());
    if let Some(d) = &inputs.delivery_rates {
        hash_f64(&mut h, d.per_kwh_delivery_charge_cents);
        hash_f64(&mut h, d.monthly_customer_charge_dollars);
        h.update(d.effective_date.to_julian_day().to_le_bytes());
    }

    Ok(format!("{:x}", h.finalize()))
}
