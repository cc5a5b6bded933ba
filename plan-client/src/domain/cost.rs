use serde::{Deserialize, Serialize};

/// Energy charge for one usage interval. Depends on the energy tariff only;
/// fees, credits and delivery live on the monthly rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanIntervalCost {
    /// Local wall-clock start of the interval, RFC3339 with offset.
    pub local_timestamp: String,
    pub kwh_import: f64,
    pub kwh_export: f64,
    /// `None` when no price applied (no matching TOU window, unresolved
    /// structure).
    pub cents_per_kwh: Option<f64>,
    pub import_charge_dollars: f64,
    pub export_credit_dollars: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDailyCostSummary {
    /// `yyyy-mm-dd` in the plan timezone.
    pub date: String,
    pub kwh_import: f64,
    pub kwh_export: f64,
    pub energy_charge_dollars: f64,
    pub export_credit_dollars: f64,
    /// Monthly base fee divided by the days in this date's month.
    pub base_charge_dollars: f64,
    pub total_cost_dollars: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanMonthlyCostSummary {
    /// `yyyy-mm` in the plan timezone.
    pub month: String,
    pub kwh_import: f64,
    pub kwh_export: f64,
    pub energy_charge_dollars: f64,
    pub export_credit_dollars: f64,
    pub base_charge_dollars: f64,
    pub minimum_usage_fee_dollars: f64,
    pub delivery_charge_dollars: f64,
    pub bill_credit_dollars: f64,
    pub total_cost_dollars: f64,
}

/// Component sums across all months of a result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostComponents {
    pub kwh_import: f64,
    pub kwh_export: f64,
    pub energy_charges_dollars: f64,
    pub export_credit_dollars: f64,
    pub base_charge_dollars: f64,
    pub minimum_usage_fee_dollars: f64,
    pub delivery_charge_dollars: f64,
    pub bill_credit_dollars: f64,
}

impl CostComponents {
    pub fn add_month(&mut self, m: &PlanMonthlyCostSummary) {
        self.kwh_import += m.kwh_import;
        self.kwh_export += m.kwh_export;
        self.energy_charges_dollars += m.energy_charge_dollars;
        self.export_credit_dollars += m.export_credit_dollars;
        self.base_charge_dollars += m.base_charge_dollars;
        self.minimum_usage_fee_dollars += m.minimum_usage_fee_dollars;
        self.delivery_charge_dollars += m.delivery_charge_dollars;
        self.bill_credit_dollars += m.bill_credit_dollars;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanCostResult {
    pub intervals: Vec<PlanIntervalCost>,
    /// Ascending by date.
    pub daily: Vec<PlanDailyCostSummary>,
    /// Ascending by month.
    pub monthly: Vec<PlanMonthlyCostSummary>,
    pub totals: CostComponents,
    /// Sum of monthly totals.
    pub total_cost_dollars: f64,
    /// Points dropped because their timestamp did not parse.
    pub skipped_points: usize,
    /// Points counted for usage but not priced.
    pub unpriced_points: usize,
    /// kWh above a bounded top tier.
    pub uncovered_kwh: f64,
}
