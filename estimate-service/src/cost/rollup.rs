use chrono::NaiveDate;
use plan_client::domain::{DeliveryRates, PlanMonthlyCostSummary, RateStructure};

pub(crate) fn round_cents(dollars: f64) -> f64 {
    let r = (dollars * 100.0).round() / 100.0;
    // Normalise -0.0 so identical inputs serialise identically.
    if r == 0.0 {
        0.0
    } else {
        r
    }
}

pub(crate) fn days_in_month(year: i32, month: u32) -> u32 {
    let first = NaiveDate::from_ymd_opt(year, month, 1);
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    match (first, next) {
        (Some(a), Some(b)) => (b - a).num_days() as u32,
        _ => 30,
    }
}

/// Parse a `yyyy-mm` key into `(year, month)`.
pub(crate) fn parse_month_key(key: &str) -> Option<(i32, u32)> {
    let (y, m) = key.split_once('-')?;
    let year: i32 = y.parse().ok()?;
    let month: u32 = m.parse().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

/// Energy totals for one month, before fixed line items.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MonthEnergy {
    pub kwh_import: f64,
    pub kwh_export: f64,
    pub energy_dollars: f64,
    pub export_credit_dollars: f64,
}

/// Apply the monthly line items (base fee, minimum-usage fee, delivery,
/// bill credits) on top of a month's energy totals.
pub(crate) fn monthly_summary(
    month_key: &str,
    month_of_year: u8,
    energy: MonthEnergy,
    rs: &RateStructure,
    delivery: Option<&DeliveryRates>,
) -> PlanMonthlyCostSummary {
    let base = rs.base_monthly_fee_cents / 100.0;
    let minimum_usage_fee = rs
        .minimum_usage_fee
        .as_ref()
        .map_or(0.0, |f| f.fee_cents_for(energy.kwh_import) / 100.0);
    let delivery_charge = match delivery {
        Some(d) if !rs.delivery_included => d.charge_dollars(energy.kwh_import),
        _ => 0.0,
    };
    let bill_credit = rs.bill_credits.credit_cents(month_of_year, energy.kwh_import) / 100.0;

    let energy_charge = round_cents(energy.energy_dollars);
    let export_credit = round_cents(energy.export_credit_dollars);
    let base = round_cents(base);
    let minimum_usage_fee = round_cents(minimum_usage_fee);
    let delivery_charge = round_cents(delivery_charge);
    let bill_credit = round_cents(bill_credit);

    PlanMonthlyCostSummary {
        month: month_key.to_string(),
        kwh_import: energy.kwh_import,
        kwh_export: energy.kwh_export,
        energy_charge_dollars: energy_charge,
        export_credit_dollars: export_credit,
        base_charge_dollars: base,
        minimum_usage_fee_dollars: minimum_usage_fee,
        delivery_charge_dollars: delivery_charge,
        bill_credit_dollars: bill_credit,
        total_cost_dollars: round_cents(
            energy_charge - export_credit + base + minimum_usage_fee + delivery_charge - bill_credit,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plan_client::domain::{BillCreditRule, BillCredits, MinimumUsageFee};
    use time::macros::date;

    #[test]
    fn days_in_month_handles_leap_february_and_december() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2023, 2), 28);
        assert_eq!(days_in_month(2024, 12), 31);
        assert_eq!(days_in_month(2024, 4), 30);
    }

    #[test]
    fn month_key_parse_rejects_garbage() {
        assert_eq!(parse_month_key("2024-07"), Some((2024, 7)));
        assert_eq!(parse_month_key("2024-13"), None);
        assert_eq!(parse_month_key("July"), None);
    }

    #[test]
    fn line_items_apply_on_top_of_energy() {
        let rs = RateStructure::fixed(10.0)
            .with_base_fee_cents(995.0)
            .with_minimum_usage_fee(MinimumUsageFee {
                fee_cents: 1000.0,
                below_kwh: 500.0,
            })
            .with_bill_credits(BillCredits {
                has_bill_credit: true,
                rules: vec![BillCreditRule {
                    label: "1000 kWh credit".to_string(),
                    credit_amount_cents: 3000.0,
                    min_usage_kwh: 1000.0,
                    max_usage_kwh: None,
                    months_of_year: None,
                }],
            });
        let delivery = DeliveryRates {
            per_kwh_delivery_charge_cents: 4.0,
            monthly_customer_charge_dollars: 4.23,
            effective_date: date!(2024-01-01),
        };
        let energy = MonthEnergy {
            kwh_import: 1000.0,
            kwh_export: 0.0,
            energy_dollars: 100.0,
            export_credit_dollars: 0.0,
        };

        let m = monthly_summary("2024-01", 1, energy, &rs, Some(&delivery));
        assert_eq!(m.base_charge_dollars, 9.95);
        assert_eq!(m.minimum_usage_fee_dollars, 0.0);
        assert_eq!(m.delivery_charge_dollars, 44.23);
        assert_eq!(m.bill_credit_dollars, 30.0);
        assert!((m.total_cost_dollars - 124.18).abs() < 1e-9);
    }

    #[test]
    fn bundled_delivery_is_not_charged_again() {
        let rs = RateStructure::fixed(10.0).with_delivery_included(true);
        let delivery = DeliveryRates {
            per_kwh_delivery_charge_cents: 4.0,
            monthly_customer_charge_dollars: 4.23,
            effective_date: date!(2024-01-01),
        };
        let energy = MonthEnergy {
            kwh_import: 100.0,
            energy_dollars: 10.0,
            ..MonthEnergy::default()
        };
        let m = monthly_summary("2024-01", 1, energy, &rs, Some(&delivery));
        assert_eq!(m.delivery_charge_dollars, 0.0);
        assert_eq!(m.total_cost_dollars, 10.0);
    }
}
