use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComputabilityStatus {
    Computable,
    NotComputable,
    Unknown,
}

impl ComputabilityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Computable => "COMPUTABLE",
            Self::NotComputable => "NOT_COMPUTABLE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Reason taxonomy shared by classification, estimates and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    MissingTemplate,
    FixedRateOk,
    UnsupportedRateStructure,
    MissingUsage,
    NotComputable,
    NotImplemented,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingTemplate => "MISSING_TEMPLATE",
            Self::FixedRateOk => "FIXED_RATE_OK",
            Self::UnsupportedRateStructure => "UNSUPPORTED_RATE_STRUCTURE",
            Self::MissingUsage => "MISSING_USAGE",
            Self::NotComputable => "NOT_COMPUTABLE",
            Self::NotImplemented => "NOT_IMPLEMENTED",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities detected on a structure, recorded even when the plan as a
/// whole is not computable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedFeatures {
    pub supports_fixed_energy_rate: bool,
    pub supports_tou_energy: bool,
    pub supports_tiered_energy: bool,
    pub supports_credits: bool,
    pub supports_base_fees: bool,
    pub supports_min_usage_fees: bool,
    pub supports_tdsp_delivery: bool,
    pub supports_solar_buyback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanComputabilityResult {
    pub plan_calc_version: i32,
    pub status: ComputabilityStatus,
    pub reason_code: ReasonCode,
    /// Ordered, duplicate-free.
    pub required_bucket_keys: Vec<String>,
    pub supported_features: SupportedFeatures,
}

impl PlanComputabilityResult {
    pub fn is_computable(&self) -> bool {
        self.status == ComputabilityStatus::Computable
    }
}
