use serde::{Deserialize, Serialize};
use time::Date;

/// Delivery utility (TDSP) charges active for a territory as of
/// `effective_date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRates {
    pub per_kwh_delivery_charge_cents: f64,
    pub monthly_customer_charge_dollars: f64,
    pub effective_date: Date,
}

impl DeliveryRates {
    pub fn charge_dollars(&self, kwh: f64) -> f64 {
        kwh * self.per_kwh_delivery_charge_cents / 100.0 + self.monthly_customer_charge_dollars
    }
}
