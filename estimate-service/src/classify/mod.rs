use plan_client::domain::{
    ComputabilityStatus, EnergyCharge, PlanComputabilityResult, RateStructure, ReasonCode, SupportedFeatures,
    BUCKET_KWH_MONTH_ALL_TOTAL,
};

/// Bump whenever classification rules change so stored results are
/// re-evaluated regardless of age.
pub const PLAN_CALC_VERSION: i32 = 1;

/// Decide whether a plan can be priced mechanically from monthly usage.
///
/// Only a FIXED plan with exactly one resolved flat price is computable.
/// Tiered, time-of-use and ambiguous structures are reported as not
/// computable with their detected features; nothing defaults to computable.
pub fn classify(rate_structure: Option<&RateStructure>) -> PlanComputabilityResult {
    let Some(rs) = rate_structure else {
        return PlanComputabilityResult {
            plan_calc_version: PLAN_CALC_VERSION,
            status: ComputabilityStatus::Unknown,
            reason_code: ReasonCode::MissingTemplate,
            required_bucket_keys: Vec::new(),
            supported_features: SupportedFeatures::default(),
        };
    };

    let supported_features = detect_features(rs);
    // Keys are recorded even for unsupported plans so widening support later
    // needs no bucket re-derivation.
    let required_bucket_keys = vec![BUCKET_KWH_MONTH_ALL_TOTAL.to_string()];

    let (status, reason_code) = match rs.fixed_rate_cents_per_kwh() {
        Some(_) => (ComputabilityStatus::Computable, ReasonCode::FixedRateOk),
        None => (ComputabilityStatus::NotComputable, ReasonCode::UnsupportedRateStructure),
    };

    PlanComputabilityResult {
        plan_calc_version: PLAN_CALC_VERSION,
        status,
        reason_code,
        required_bucket_keys,
        supported_features,
    }
}

fn detect_features(rs: &RateStructure) -> SupportedFeatures {
    SupportedFeatures {
        supports_fixed_energy_rate: matches!(rs.energy, EnergyCharge::Flat { .. }),
        supports_tou_energy: rs.declared.tou_windows,
        supports_tiered_energy: rs.declared.tiers,
        supports_credits: !rs.bill_credits.is_empty(),
        supports_base_fees: rs.base_monthly_fee_cents > 0.0,
        supports_min_usage_fees: rs.minimum_usage_fee.is_some(),
        supports_tdsp_delivery: !rs.delivery_included,
        supports_solar_buyback: rs.export_credit_cents_per_kwh.is_some_and(|c| c > 0.0),
    }
}

/// A stored result is stale when it differs from a fresh classification,
/// which covers both a changed structure and a bumped calc version.
pub fn needs_reclassification(stored: Option<&PlanComputabilityResult>, fresh: &PlanComputabilityResult) -> bool {
    stored != Some(fresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use plan_client::domain::{
        BillCreditRule, BillCredits, EnergyTier, LegacyRateStructure, PlanType, TierSchedule, TouSchedule, TouWindow,
    };

    #[test]
    fn missing_structure_is_unknown_with_no_buckets() {
        let r = classify(None);
        assert_eq!(r.status, ComputabilityStatus::Unknown);
        assert_eq!(r.reason_code, ReasonCode::MissingTemplate);
        assert!(r.required_bucket_keys.is_empty());
        assert_eq!(r.plan_calc_version, PLAN_CALC_VERSION);
    }

    #[test]
    fn fixed_rate_is_computable_from_monthly_totals() {
        let rs = RateStructure::fixed(10.0).with_base_fee_cents(995.0);
        let r = classify(Some(&rs));
        assert!(r.is_computable());
        assert_eq!(r.reason_code, ReasonCode::FixedRateOk);
        assert_eq!(r.required_bucket_keys, vec!["kwh.month.all.total".to_string()]);
        assert!(r.supported_features.supports_fixed_energy_rate);
        assert!(r.supported_features.supports_base_fees);
        assert!(r.supported_features.supports_tdsp_delivery);
    }

    #[test]
    fn conflicting_flat_fields_fail_closed() {
        let legacy = LegacyRateStructure {
            plan_type: Some("FIXED".to_string()),
            energy_rate_cents_per_kwh: Some(9.5),
            energy_charge_cents_per_kwh: Some(10.2),
            ..Default::default()
        };
        let r = classify(Some(&RateStructure::from_legacy(&legacy)));
        assert_eq!(r.status, ComputabilityStatus::NotComputable);
        assert_eq!(r.reason_code, ReasonCode::UnsupportedRateStructure);
        assert_eq!(r.required_bucket_keys, vec!["kwh.month.all.total".to_string()]);
        assert!(!r.supported_features.supports_fixed_energy_rate);
    }

    #[test]
    fn tiered_plan_records_detected_features_but_is_not_computable() {
        let tiers = TierSchedule::new(vec![
            EnergyTier {
                min_kwh: 0.0,
                max_kwh: Some(1000.0),
                cents_per_kwh: 9.0,
            },
            EnergyTier {
                min_kwh: 1000.0,
                max_kwh: None,
                cents_per_kwh: 12.0,
            },
        ])
        .unwrap();
        let rs = RateStructure::tiered(PlanType::Fixed, tiers).with_bill_credits(BillCredits {
            has_bill_credit: true,
            rules: vec![BillCreditRule {
                label: "usage credit".to_string(),
                credit_amount_cents: 10000.0,
                min_usage_kwh: 1000.0,
                max_usage_kwh: None,
                months_of_year: None,
            }],
        });
        let r = classify(Some(&rs));
        assert_eq!(r.status, ComputabilityStatus::NotComputable);
        assert!(r.supported_features.supports_tiered_energy);
        assert!(r.supported_features.supports_credits);
        assert!(!r.supported_features.supports_tou_energy);
    }

    #[test]
    fn tou_plan_is_not_computable() {
        let windows = TouSchedule::new(vec![TouWindow {
            start_local: "00:00".to_string(),
            end_local: "24:00".to_string(),
            cents_per_kwh: 11.0,
        }])
        .unwrap();
        let r = classify(Some(&RateStructure::time_of_use(windows)));
        assert_eq!(r.status, ComputabilityStatus::NotComputable);
        assert!(r.supported_features.supports_tou_energy);
    }

    #[test]
    fn variable_plan_with_flat_price_is_not_computable() {
        let legacy = LegacyRateStructure {
            plan_type: Some("VARIABLE".to_string()),
            energy_rate_cents_per_kwh: Some(12.0),
            ..Default::default()
        };
        let r = classify(Some(&RateStructure::from_legacy(&legacy)));
        assert_eq!(r.status, ComputabilityStatus::NotComputable);
        assert!(r.supported_features.supports_fixed_energy_rate);
    }

    #[test]
    fn reclassification_needed_on_version_or_structure_drift() {
        let fresh = classify(Some(&RateStructure::fixed(10.0)));
        assert!(needs_reclassification(None, &fresh));
        assert!(!needs_reclassification(Some(&fresh), &fresh));

        let mut old = fresh.clone();
        old.plan_calc_version = PLAN_CALC_VERSION - 1;
        assert!(needs_reclassification(Some(&old), &fresh));
    }
}
