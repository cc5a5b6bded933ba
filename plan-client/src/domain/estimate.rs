use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::{computability::ReasonCode, cost::CostComponents, delivery::DeliveryRates};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EstimateStatus {
    Ok,
    NotComputable,
    NotImplemented,
}

impl EstimateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NotComputable => "NOT_COMPUTABLE",
            Self::NotImplemented => "NOT_IMPLEMENTED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Whether a returned payload was read back or freshly computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EstimateSource {
    Materialized,
    Computed,
}

/// Which charges an estimate prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CalculationMode {
    /// Supplier charges only; delivery rates are ignored.
    EnergyOnly,
    /// Supplier charges plus delivery utility pass-through.
    AllIn,
}

impl CalculationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EnergyOnly => "ENERGY_ONLY",
            Self::AllIn => "ALL_IN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimatePayload {
    pub status: EstimateStatus,
    pub reason: ReasonCode,
    pub annual_cost_dollars: Option<f64>,
    pub monthly_cost_dollars: Option<f64>,
    pub effective_cents_per_kwh: Option<f64>,
    pub confidence: Option<Confidence>,
    pub component_breakdown: Option<CostComponents>,
    pub delivery_rates_applied: Option<DeliveryRates>,
    pub computed_at: OffsetDateTime,
    /// Advisory; rows past this may be recomputed but are never deleted here.
    pub expires_at: OffsetDateTime,
}

/// The unit of caching, keyed by `(household_id, rate_plan_id, inputs_sha256)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializedEstimate {
    pub household_id: String,
    pub rate_plan_id: String,
    pub inputs_sha256: String,
    pub payload: EstimatePayload,
}
