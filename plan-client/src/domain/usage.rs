use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Total imported kWh for one calendar month.
pub const BUCKET_KWH_MONTH_ALL_TOTAL: &str = "kwh.month.all.total";

/// `yyyy-mm` -> bucket key -> kWh.
///
/// Both levels are ordered maps so iteration (and therefore hashing) never
/// depends on the order a caller inserted months or keys.
pub type UsageBucketsByMonth = BTreeMap<String, BTreeMap<String, f64>>;

/// One interval reading as handed over by usage ingestion.
///
/// The timestamp stays in its wire form (RFC3339) until the cost engine
/// localizes it; a reading whose timestamp does not parse is skipped there,
/// not rejected here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalUsagePoint {
    pub timestamp: String,
    pub kwh_import: f64,
    #[serde(default)]
    pub kwh_export: f64,
}

impl IntervalUsagePoint {
    pub fn new(ts: OffsetDateTime, kwh_import: f64, kwh_export: f64) -> Self {
        Self {
            timestamp: ts.format(&Rfc3339).unwrap_or_default(),
            kwh_import,
            kwh_export,
        }
    }

    pub fn instant(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::parse(self.timestamp.trim(), &Rfc3339).ok()
    }

    /// Negative readings are meter noise; clamp them rather than let them
    /// reduce a bill.
    pub fn import_kwh(&self) -> f64 {
        if self.kwh_import.is_finite() {
            self.kwh_import.max(0.0)
        } else {
            0.0
        }
    }

    pub fn export_kwh(&self) -> f64 {
        if self.kwh_export.is_finite() {
            self.kwh_export.max(0.0)
        } else {
            0.0
        }
    }
}
