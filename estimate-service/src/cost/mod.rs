//! Plan cost engine.
//!
//! Pure functions: no I/O, no wall clock. Identical inputs produce identical
//! output, including ordering (all rollups go through ordered maps).

mod rollup;

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Timelike};
use chrono_tz::Tz;
use plan_client::domain::{
    CostComponents, DeliveryRates, EnergyCharge, IntervalUsagePoint, PlanCostResult, PlanDailyCostSummary,
    PlanIntervalCost, PricingIssue, RateStructure, UsageBucketsByMonth, BUCKET_KWH_MONTH_ALL_TOTAL,
};

use crate::usage::local_time;
use rollup::{days_in_month, monthly_summary, parse_month_key, MonthEnergy};
pub(crate) use rollup::round_cents;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CostError {
    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),
    #[error("rate structure cannot be priced from monthly totals")]
    NotPriceableFromBuckets,
    #[error("invalid month key '{0}'")]
    InvalidMonthKey(String),
    #[error("rate structure has no usable energy price: {0:?}")]
    Unresolved(PricingIssue),
}

pub fn parse_timezone(name: &str) -> Result<Tz, CostError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| CostError::UnknownTimezone(name.to_string()))
}

struct LocalizedPoint<'a> {
    local: DateTime<Tz>,
    point: &'a IntervalUsagePoint,
}

#[derive(Default)]
struct DayAcc {
    year: i32,
    month: u32,
    kwh_import: f64,
    kwh_export: f64,
    energy_dollars: f64,
    export_credit_dollars: f64,
}

/// Interval-level cost of a usage series under a plan.
///
/// Points whose timestamp does not parse are skipped and counted. Tiered
/// energy is priced on cumulative import within the local calendar month.
/// Fees, credits and delivery are applied on the monthly rollup only, so a
/// daily total is always the sum of its intervals plus the pro-rated base fee.
///
/// An `Unresolved` structure is refused outright; its fees alone would read
/// as a real total.
pub fn compute_cost(
    rs: &RateStructure,
    usage: &[IntervalUsagePoint],
    tz: Tz,
    delivery: Option<&DeliveryRates>,
) -> Result<PlanCostResult, CostError> {
    if let Some(issue) = rs.pricing_issue() {
        return Err(CostError::Unresolved(issue.clone()));
    }
    if usage.is_empty() {
        return Ok(PlanCostResult::default());
    }

    let mut points: Vec<LocalizedPoint<'_>> = Vec::with_capacity(usage.len());
    let mut skipped_points = 0usize;
    for p in usage {
        match local_time(p, &tz) {
            Some(local) => points.push(LocalizedPoint { local, point: p }),
            None => skipped_points += 1,
        }
    }
    points.sort_by_key(|lp| lp.local);

    let export_rate = rs.export_credit_cents_per_kwh.unwrap_or(0.0);
    let mut intervals = Vec::with_capacity(points.len());
    let mut days: BTreeMap<String, DayAcc> = BTreeMap::new();
    let mut months: BTreeMap<String, MonthEnergy> = BTreeMap::new();
    let mut unpriced_points = 0usize;
    let mut uncovered_kwh = 0.0;

    for lp in &points {
        let local = &lp.local;
        let month_key = local.format("%Y-%m").to_string();
        let day_key = local.format("%Y-%m-%d").to_string();
        let kwh_import = lp.point.import_kwh();
        let kwh_export = lp.point.export_kwh();

        let month = months.entry(month_key).or_default();

        let (cents, rate) = match &rs.energy {
            EnergyCharge::Flat { cents_per_kwh } => (kwh_import * cents_per_kwh, Some(*cents_per_kwh)),
            EnergyCharge::Tiered { tiers } => {
                let (cents, uncovered) = tiers.charge_cents(month.kwh_import, kwh_import);
                uncovered_kwh += uncovered;
                let priced_kwh = kwh_import - uncovered;
                (cents, (priced_kwh > 0.0).then(|| cents / priced_kwh))
            }
            EnergyCharge::TimeOfUse { windows } => {
                let minute = (local.hour() * 60 + local.minute()) as u16;
                match windows.price_at(minute) {
                    Some(c) => (kwh_import * c, Some(c)),
                    None => {
                        unpriced_points += 1;
                        (0.0, None)
                    }
                }
            }
            EnergyCharge::Unresolved { issue } => return Err(CostError::Unresolved(issue.clone())),
        };

        let import_charge = cents / 100.0;
        let export_credit = kwh_export * export_rate / 100.0;

        month.kwh_import += kwh_import;
        month.kwh_export += kwh_export;
        month.energy_dollars += import_charge;
        month.export_credit_dollars += export_credit;

        let day = days.entry(day_key).or_insert_with(|| DayAcc {
            year: local.year(),
            month: local.month(),
            ..DayAcc::default()
        });
        day.kwh_import += kwh_import;
        day.kwh_export += kwh_export;
        day.energy_dollars += import_charge;
        day.export_credit_dollars += export_credit;

        intervals.push(PlanIntervalCost {
            local_timestamp: local.to_rfc3339(),
            kwh_import,
            kwh_export,
            cents_per_kwh: rate,
            import_charge_dollars: import_charge,
            export_credit_dollars: export_credit,
        });
    }

    let base_dollars = rs.base_monthly_fee_cents / 100.0;
    let daily = days
        .into_iter()
        .map(|(date, d)| {
            let energy = round_cents(d.energy_dollars);
            let export = round_cents(d.export_credit_dollars);
            let base = round_cents(base_dollars / f64::from(days_in_month(d.year, d.month)));
            PlanDailyCostSummary {
                date,
                kwh_import: d.kwh_import,
                kwh_export: d.kwh_export,
                energy_charge_dollars: energy,
                export_credit_dollars: export,
                base_charge_dollars: base,
                total_cost_dollars: round_cents(energy - export + base),
            }
        })
        .collect();

    let mut result = finish_monthly(rs, months, delivery);
    result.intervals = intervals;
    result.daily = daily;
    result.skipped_points = skipped_points;
    result.unpriced_points = unpriced_points;
    result.uncovered_kwh = uncovered_kwh;
    Ok(result)
}

/// Monthly cost from `kwh.month.all.total` buckets, for the materialized
/// estimate path. Months without the bucket are left out.
///
/// Only flat and tiered energy can be priced from a monthly total; tiers are
/// applied to the whole month.
pub fn compute_monthly_from_buckets(
    rs: &RateStructure,
    buckets: &UsageBucketsByMonth,
    delivery: Option<&DeliveryRates>,
) -> Result<PlanCostResult, CostError> {
    let mut months: BTreeMap<String, MonthEnergy> = BTreeMap::new();
    let mut uncovered_kwh = 0.0;

    for (month_key, values) in buckets {
        let Some(&kwh) = values.get(BUCKET_KWH_MONTH_ALL_TOTAL) else {
            continue;
        };
        if parse_month_key(month_key).is_none() {
            return Err(CostError::InvalidMonthKey(month_key.clone()));
        }
        let kwh = if kwh.is_finite() { kwh.max(0.0) } else { 0.0 };

        let cents = match &rs.energy {
            EnergyCharge::Flat { cents_per_kwh } => kwh * cents_per_kwh,
            EnergyCharge::Tiered { tiers } => {
                let (cents, uncovered) = tiers.charge_cents(0.0, kwh);
                uncovered_kwh += uncovered;
                cents
            }
            EnergyCharge::TimeOfUse { .. } | EnergyCharge::Unresolved { .. } => {
                return Err(CostError::NotPriceableFromBuckets);
            }
        };

        months.insert(
            month_key.clone(),
            MonthEnergy {
                kwh_import: kwh,
                energy_dollars: cents / 100.0,
                ..MonthEnergy::default()
            },
        );
    }

    let mut result = finish_monthly(rs, months, delivery);
    result.uncovered_kwh = uncovered_kwh;
    Ok(result)
}

fn finish_monthly(
    rs: &RateStructure,
    months: BTreeMap<String, MonthEnergy>,
    delivery: Option<&DeliveryRates>,
) -> PlanCostResult {
    let mut totals = CostComponents::default();
    let mut total = 0.0;
    let mut monthly = Vec::with_capacity(months.len());

    for (month_key, energy) in months {
        let month_of_year = parse_month_key(&month_key).map_or(0, |(_, m)| m as u8);
        let summary = monthly_summary(&month_key, month_of_year, energy, rs, delivery);
        totals.add_month(&summary);
        total += summary.total_cost_dollars;
        monthly.push(summary);
    }

    PlanCostResult {
        monthly,
        totals,
        total_cost_dollars: round_cents(total),
        ..PlanCostResult::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plan_client::domain::{EnergyTier, LegacyRateStructure, PlanType, TierSchedule, TouSchedule, TouWindow};
    use std::collections::BTreeMap;
    use time::macros::{date, datetime};
    use time::{Duration, OffsetDateTime};

    fn chicago() -> Tz {
        parse_timezone("America/Chicago").unwrap()
    }

    fn hourly(start: OffsetDateTime, hours: i64, kwh: f64) -> Vec<IntervalUsagePoint> {
        (0..hours)
            .map(|h| IntervalUsagePoint::new(start + Duration::hours(h), kwh, 0.0))
            .collect()
    }

    #[test]
    fn empty_usage_is_a_zero_cost_result() {
        let r = compute_cost(&RateStructure::fixed(10.0), &[], chicago(), None).unwrap();
        assert_eq!(r.total_cost_dollars, 0.0);
        assert!(r.daily.is_empty());
        assert!(r.monthly.is_empty());
        assert!(r.intervals.is_empty());
    }

    #[test]
    fn fixed_rate_happy_path() {
        let rs = RateStructure::fixed(10.0).with_base_fee_cents(995.0);
        // 1000 kWh spread evenly across a 31-day month in local time.
        let usage = hourly(datetime!(2024-01-01 06:00:00 UTC), 31 * 24, 1000.0 / (31.0 * 24.0));

        let r = compute_cost(&rs, &usage, chicago(), None).unwrap();

        assert_eq!(r.monthly.len(), 1);
        assert_eq!(r.monthly[0].month, "2024-01");
        assert_eq!(r.totals.energy_charges_dollars, 100.0);
        assert_eq!(r.totals.base_charge_dollars, 9.95);
        assert_eq!(r.total_cost_dollars, 109.95);
        assert_eq!(r.daily.len(), 31);
        assert_eq!(r.skipped_points, 0);
    }

    #[test]
    fn daily_total_is_intervals_plus_prorated_base() {
        let rs = RateStructure::fixed(12.0).with_base_fee_cents(3000.0);
        let usage = hourly(datetime!(2024-04-10 05:00:00 UTC), 24, 1.0);

        let r = compute_cost(&rs, &usage, chicago(), None).unwrap();

        assert_eq!(r.daily.len(), 1);
        let d = &r.daily[0];
        assert_eq!(d.date, "2024-04-10");
        assert_eq!(d.energy_charge_dollars, 2.88);
        // April has 30 days: $30 / 30.
        assert_eq!(d.base_charge_dollars, 1.0);
        assert_eq!(d.total_cost_dollars, 3.88);
    }

    #[test]
    fn unparsable_timestamps_are_skipped_not_fatal() {
        let mut usage = hourly(datetime!(2024-01-15 12:00:00 UTC), 2, 5.0);
        usage.push(IntervalUsagePoint {
            timestamp: "not-a-time".to_string(),
            kwh_import: 1000.0,
            kwh_export: 0.0,
        });

        let r = compute_cost(&RateStructure::fixed(10.0), &usage, chicago(), None).unwrap();

        assert_eq!(r.skipped_points, 1);
        assert_eq!(r.intervals.len(), 2);
        assert_eq!(r.totals.energy_charges_dollars, 1.0);
    }

    #[test]
    fn local_month_boundaries_follow_the_timezone() {
        // 2024-02-01 03:00 UTC is still January 31st in Chicago.
        let usage = vec![IntervalUsagePoint::new(datetime!(2024-02-01 03:00:00 UTC), 10.0, 0.0)];
        let r = compute_cost(&RateStructure::fixed(10.0), &usage, chicago(), None).unwrap();
        assert_eq!(r.monthly[0].month, "2024-01");
        assert_eq!(r.daily[0].date, "2024-01-31");
    }

    #[test]
    fn time_of_use_prices_by_local_window() {
        let windows = TouSchedule::new(vec![
            TouWindow {
                start_local: "14:00".to_string(),
                end_local: "19:00".to_string(),
                cents_per_kwh: 30.0,
            },
            TouWindow {
                start_local: "19:00".to_string(),
                end_local: "14:00".to_string(),
                cents_per_kwh: 10.0,
            },
        ])
        .unwrap();
        let rs = RateStructure::time_of_use(windows);
        // 15:00 and 20:00 local (CDT, UTC-5).
        let usage = vec![
            IntervalUsagePoint::new(datetime!(2024-07-01 20:00:00 UTC), 1.0, 0.0),
            IntervalUsagePoint::new(datetime!(2024-07-02 01:00:00 UTC), 1.0, 0.0),
        ];

        let r = compute_cost(&rs, &usage, chicago(), None).unwrap();

        assert_eq!(r.intervals[0].cents_per_kwh, Some(30.0));
        assert_eq!(r.intervals[1].cents_per_kwh, Some(10.0));
        assert_eq!(r.totals.energy_charges_dollars, 0.4);
        assert_eq!(r.unpriced_points, 0);
    }

    #[test]
    fn uncovered_tou_minutes_are_counted_as_unpriced() {
        let windows = TouSchedule::new(vec![TouWindow {
            start_local: "14:00".to_string(),
            end_local: "19:00".to_string(),
            cents_per_kwh: 30.0,
        }])
        .unwrap();
        let usage = vec![IntervalUsagePoint::new(datetime!(2024-07-01 12:00:00 UTC), 1.0, 0.0)];
        let r = compute_cost(&RateStructure::time_of_use(windows), &usage, chicago(), None).unwrap();
        assert_eq!(r.unpriced_points, 1);
        assert_eq!(r.intervals[0].cents_per_kwh, None);
        assert_eq!(r.monthly[0].kwh_import, 1.0);
    }

    #[test]
    fn tiers_accumulate_within_the_local_month_and_reset_after() {
        let tiers = TierSchedule::new(vec![
            EnergyTier {
                min_kwh: 0.0,
                max_kwh: Some(10.0),
                cents_per_kwh: 10.0,
            },
            EnergyTier {
                min_kwh: 10.0,
                max_kwh: None,
                cents_per_kwh: 20.0,
            },
        ])
        .unwrap();
        let rs = RateStructure::tiered(PlanType::Fixed, tiers);
        let usage = vec![
            IntervalUsagePoint::new(datetime!(2024-03-10 12:00:00 UTC), 8.0, 0.0),
            IntervalUsagePoint::new(datetime!(2024-03-11 12:00:00 UTC), 4.0, 0.0),
            IntervalUsagePoint::new(datetime!(2024-04-10 12:00:00 UTC), 4.0, 0.0),
        ];

        let r = compute_cost(&rs, &usage, chicago(), None).unwrap();

        // March: 8 @ 10c + 2 @ 10c + 2 @ 20c; April starts over.
        assert_eq!(r.monthly[0].energy_charge_dollars, 1.4);
        assert_eq!(r.monthly[1].energy_charge_dollars, 0.4);
        assert_eq!(r.intervals[1].cents_per_kwh, Some(15.0));
    }

    #[test]
    fn export_credit_reduces_interval_and_monthly_cost() {
        let rs = RateStructure::fixed(10.0).with_export_credit(5.0);
        let usage = vec![IntervalUsagePoint::new(datetime!(2024-06-01 18:00:00 UTC), 10.0, 4.0)];
        let r = compute_cost(&rs, &usage, chicago(), None).unwrap();
        assert_eq!(r.intervals[0].export_credit_dollars, 0.2);
        assert_eq!(r.monthly[0].total_cost_dollars, 0.8);
        assert_eq!(r.daily[0].total_cost_dollars, 0.8);
    }

    #[test]
    fn credits_and_delivery_stay_off_the_daily_rollup() {
        let legacy = LegacyRateStructure {
            plan_type: Some("FIXED".to_string()),
            energy_rate_cents_per_kwh: Some(10.0),
            ..Default::default()
        };
        let rs = RateStructure::from_legacy(&legacy);
        let delivery = DeliveryRates {
            per_kwh_delivery_charge_cents: 5.0,
            monthly_customer_charge_dollars: 3.0,
            effective_date: date!(2024-01-01),
        };
        let usage = hourly(datetime!(2024-05-05 05:00:00 UTC), 10, 1.0);

        let r = compute_cost(&rs, &usage, chicago(), Some(&delivery)).unwrap();

        assert_eq!(r.daily[0].total_cost_dollars, 1.0);
        assert_eq!(r.monthly[0].delivery_charge_dollars, 3.5);
        assert_eq!(r.total_cost_dollars, 4.5);
    }

    #[test]
    fn output_is_independent_of_input_order() {
        let rs = RateStructure::fixed(11.3).with_base_fee_cents(500.0);
        let usage = hourly(datetime!(2024-02-27 00:00:00 UTC), 96, 0.731);
        let mut reversed = usage.clone();
        reversed.reverse();

        let a = compute_cost(&rs, &usage, chicago(), None).unwrap();
        let b = compute_cost(&rs, &reversed, chicago(), None).unwrap();
        let again = compute_cost(&rs, &usage, chicago(), None).unwrap();

        assert_eq!(serde_json::to_vec(&a).unwrap(), serde_json::to_vec(&again).unwrap());
        assert_eq!(a.monthly, b.monthly);
        assert_eq!(a.daily, b.daily);
    }

    #[test]
    fn monthly_buckets_price_fixed_plans() {
        let rs = RateStructure::fixed(10.0).with_base_fee_cents(995.0);
        let mut buckets = BTreeMap::new();
        buckets.insert(
            "2024-01".to_string(),
            BTreeMap::from([(BUCKET_KWH_MONTH_ALL_TOTAL.to_string(), 1000.0)]),
        );
        buckets.insert("2024-02".to_string(), BTreeMap::new());

        let r = compute_monthly_from_buckets(&rs, &buckets, None).unwrap();

        assert_eq!(r.monthly.len(), 1);
        assert_eq!(r.totals.energy_charges_dollars, 100.0);
        assert_eq!(r.total_cost_dollars, 109.95);
    }

    #[test]
    fn aggregated_buckets_agree_with_interval_pricing() {
        let rs = RateStructure::tiered(
            PlanType::Fixed,
            TierSchedule::new(vec![
                EnergyTier {
                    min_kwh: 0.0,
                    max_kwh: Some(1000.0),
                    cents_per_kwh: 9.0,
                },
                EnergyTier {
                    min_kwh: 1000.0,
                    max_kwh: None,
                    cents_per_kwh: 13.0,
                },
            ])
            .unwrap(),
        )
        .with_base_fee_cents(495.0);
        // 30 local hours in January (1500 kWh, crosses the band), 18 in February.
        let usage = hourly(datetime!(2024-01-31 00:00:00 UTC), 48, 50.0);

        let by_interval = compute_cost(&rs, &usage, chicago(), None).unwrap();
        let buckets = crate::usage::aggregate_monthly_buckets(&usage, chicago());
        let by_bucket = compute_monthly_from_buckets(&rs, &buckets, None).unwrap();

        assert_eq!(buckets.len(), 2);
        assert_eq!(by_interval.monthly.len(), 2);
        assert!((by_interval.total_cost_dollars - by_bucket.total_cost_dollars).abs() < 0.005);
        assert!((by_bucket.total_cost_dollars - 245.9).abs() < 0.005);
    }

    #[test]
    fn monthly_buckets_refuse_time_of_use() {
        let windows = TouSchedule::new(vec![TouWindow {
            start_local: "00:00".to_string(),
            end_local: "24:00".to_string(),
            cents_per_kwh: 9.0,
        }])
        .unwrap();
        let mut buckets = BTreeMap::new();
        buckets.insert(
            "2024-01".to_string(),
            BTreeMap::from([(BUCKET_KWH_MONTH_ALL_TOTAL.to_string(), 10.0)]),
        );
        assert_eq!(
            compute_monthly_from_buckets(&RateStructure::time_of_use(windows), &buckets, None),
            Err(CostError::NotPriceableFromBuckets)
        );
    }

    #[test]
    fn unresolved_structure_is_refused_not_priced_as_fees() {
        let legacy = LegacyRateStructure {
            plan_type: Some("FIXED".to_string()),
            energy_rate_cents_per_kwh: Some(9.5),
            energy_charge_cents_per_kwh: Some(10.2),
            base_monthly_fee_cents: Some(995.0),
            ..Default::default()
        };
        let rs = RateStructure::from_legacy(&legacy);
        let usage = hourly(datetime!(2024-03-10 12:00:00 UTC), 1, 1000.0);

        let err = compute_cost(&rs, &usage, chicago(), None).unwrap_err();
        assert!(matches!(err, CostError::Unresolved(PricingIssue::ConflictingFlatRates { .. })));
        assert!(compute_cost(&rs, &[], chicago(), None).is_err());
    }

    #[test]
    fn unknown_timezone_is_an_error() {
        assert!(matches!(parse_timezone("Mars/Olympus"), Err(CostError::UnknownTimezone(_))));
    }
}
