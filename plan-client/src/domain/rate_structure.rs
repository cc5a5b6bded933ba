use serde::{Deserialize, Serialize};

use crate::domain::computability::PlanComputabilityResult;

/// Two candidate prices closer than this are the same price.
const PRICE_EPSILON: f64 = 1e-9;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RateStructureError {
    #[error("tier schedule is empty")]
    EmptyTiers,
    #[error("first tier must start at 0 kWh")]
    FirstTierNotZero,
    #[error("tier {index} has an invalid kWh range")]
    InvalidTierRange { index: usize },
    #[error("tier {index} does not start where the previous tier ends")]
    NonContiguousTiers { index: usize },
    #[error("tier {index} is open-ended but is not the top tier")]
    OpenTierNotLast { index: usize },
    #[error("tier {index} has an invalid price")]
    InvalidTierPrice { index: usize },
    #[error("time-of-use schedule is empty")]
    EmptyTouWindows,
    #[error("time-of-use window {index} has invalid local time '{value}'")]
    InvalidLocalTime { index: usize, value: String },
    #[error("time-of-use window {index} has an invalid price")]
    InvalidWindowPrice { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanType {
    Fixed,
    Variable,
    TimeOfUse,
    Other,
}

impl PlanType {
    /// Lenient parse of the free-form `type` field found on stored plans.
    pub fn parse_loose(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().replace(['-', ' '], "_").as_str() {
            "FIXED" => Self::Fixed,
            "VARIABLE" => Self::Variable,
            "TIME_OF_USE" | "TOU" => Self::TimeOfUse,
            _ => Self::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fixed => "FIXED",
            Self::Variable => "VARIABLE",
            Self::TimeOfUse => "TIME_OF_USE",
            Self::Other => "OTHER",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyTier {
    pub min_kwh: f64,
    pub max_kwh: Option<f64>,
    pub cents_per_kwh: f64,
}

/// Ascending, contiguous usage bands starting at 0 kWh. Only the top band
/// may be open-ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<EnergyTier>", into = "Vec<EnergyTier>")]
pub struct TierSchedule {
    tiers: Vec<EnergyTier>,
}

impl TierSchedule {
    pub fn new(tiers: Vec<EnergyTier>) -> Result<Self, RateStructureError> {
        if tiers.is_empty() {
            return Err(RateStructureError::EmptyTiers);
        }

        let last = tiers.len() - 1;
        for (index, tier) in tiers.iter().enumerate() {
            if !tier.cents_per_kwh.is_finite() || tier.cents_per_kwh < 0.0 {
                return Err(RateStructureError::InvalidTierPrice { index });
            }
            if !tier.min_kwh.is_finite() || tier.min_kwh < 0.0 {
                return Err(RateStructureError::InvalidTierRange { index });
            }
            match tier.max_kwh {
                Some(max) if !max.is_finite() || max <= tier.min_kwh => {
                    return Err(RateStructureError::InvalidTierRange { index });
                }
                None if index != last => return Err(RateStructureError::OpenTierNotLast { index }),
                _ => {}
            }

            if index == 0 {
                if tier.min_kwh.abs() > PRICE_EPSILON {
                    return Err(RateStructureError::FirstTierNotZero);
                }
            } else {
                let prev_max = tiers[index - 1].max_kwh.unwrap_or(f64::INFINITY);
                if (tier.min_kwh - prev_max).abs() > PRICE_EPSILON {
                    return Err(RateStructureError::NonContiguousTiers { index });
                }
            }
        }

        Ok(Self { tiers })
    }

    pub fn tiers(&self) -> &[EnergyTier] {
        &self.tiers
    }

    /// Price `kwh` consumed after `already_used` kWh in the same billing
    /// period, splitting across band boundaries.
    ///
    /// Returns `(cents, uncovered_kwh)`; kWh above a bounded top tier are
    /// reported back rather than priced.
    pub fn charge_cents(&self, already_used: f64, kwh: f64) -> (f64, f64) {
        let mut remaining = kwh.max(0.0);
        let mut cursor = already_used.max(0.0);
        let mut cents = 0.0;

        for tier in &self.tiers {
            if remaining <= 0.0 {
                break;
            }
            let upper = tier.max_kwh.unwrap_or(f64::INFINITY);
            if cursor >= upper {
                continue;
            }
            let take = (upper - cursor).min(remaining);
            cents += take * tier.cents_per_kwh;
            remaining -= take;
            cursor += take;
        }

        (cents, remaining.max(0.0))
    }
}

impl TryFrom<Vec<EnergyTier>> for TierSchedule {
    type Error = RateStructureError;

    fn try_from(tiers: Vec<EnergyTier>) -> Result<Self, Self::Error> {
        Self::new(tiers)
    }
}

impl From<TierSchedule> for Vec<EnergyTier> {
    fn from(s: TierSchedule) -> Self {
        s.tiers
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TouWindow {
    /// `HH:MM` local wall-clock time, inclusive.
    pub start_local: String,
    /// `HH:MM` local wall-clock time, exclusive. `24:00` is end of day; an
    /// end before the start wraps past midnight.
    pub end_local: String,
    pub cents_per_kwh: f64,
}

/// Time-of-use windows in declaration order. Windows are assumed not to
/// overlap; when they do, the first match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TouWindow>", into = "Vec<TouWindow>")]
pub struct TouSchedule {
    windows: Vec<TouWindow>,
    bounds: Vec<(u16, u16)>,
}

impl TouSchedule {
    pub fn new(windows: Vec<TouWindow>) -> Result<Self, RateStructureError> {
        if windows.is_empty() {
            return Err(RateStructureError::EmptyTouWindows);
        }

        let mut bounds = Vec::with_capacity(windows.len());
        for (index, w) in windows.iter().enumerate() {
            if !w.cents_per_kwh.is_finite() || w.cents_per_kwh < 0.0 {
                return Err(RateStructureError::InvalidWindowPrice { index });
            }
            let start = parse_local_minutes(&w.start_local).ok_or_else(|| RateStructureError::InvalidLocalTime {
                index,
                value: w.start_local.clone(),
            })?;
            let end = parse_local_minutes(&w.end_local).ok_or_else(|| RateStructureError::InvalidLocalTime {
                index,
                value: w.end_local.clone(),
            })?;
            bounds.push((start, end));
        }

        Ok(Self { windows, bounds })
    }

    pub fn windows(&self) -> &[TouWindow] {
        &self.windows
    }

    pub fn price_at(&self, minute_of_day: u16) -> Option<f64> {
        self.bounds
            .iter()
            .position(|&(start, end)| window_contains(start, end, minute_of_day))
            .map(|idx| self.windows[idx].cents_per_kwh)
    }
}

impl TryFrom<Vec<TouWindow>> for TouSchedule {
    type Error = RateStructureError;

    fn try_from(windows: Vec<TouWindow>) -> Result<Self, Self::Error> {
        Self::new(windows)
    }
}

impl From<TouSchedule> for Vec<TouWindow> {
    fn from(s: TouSchedule) -> Self {
        s.windows
    }
}

fn parse_local_minutes(raw: &str) -> Option<u16> {
    let mut parts = raw.trim().split(':');
    let hours: u16 = parts.next()?.parse().ok()?;
    let minutes: u16 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes >= 60 {
        return None;
    }
    match (hours, minutes) {
        (24, 0) => Some(24 * 60),
        (h, m) if h < 24 => Some(h * 60 + m),
        _ => None,
    }
}

fn window_contains(start: u16, end: u16, minute: u16) -> bool {
    if start == end {
        true
    } else if start < end {
        minute >= start && minute < end
    } else {
        minute >= start || minute < end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillCreditRule {
    pub label: String,
    pub credit_amount_cents: f64,
    #[serde(default)]
    pub min_usage_kwh: f64,
    pub max_usage_kwh: Option<f64>,
    /// 1-based calendar months; absent means every month.
    pub months_of_year: Option<Vec<u8>>,
}

impl BillCreditRule {
    pub fn applies(&self, month: u8, monthly_kwh: f64) -> bool {
        if monthly_kwh < self.min_usage_kwh {
            return false;
        }
        if matches!(self.max_usage_kwh, Some(max) if monthly_kwh > max) {
            return false;
        }
        match &self.months_of_year {
            Some(months) => months.contains(&month),
            None => true,
        }
    }

    fn is_valid(&self) -> bool {
        self.credit_amount_cents.is_finite()
            && self.credit_amount_cents > 0.0
            && self.min_usage_kwh.is_finite()
            && self.min_usage_kwh >= 0.0
            && self.max_usage_kwh.map_or(true, |max| max.is_finite() && max >= self.min_usage_kwh)
            && self
                .months_of_year
                .as_ref()
                .map_or(true, |months| months.iter().all(|m| (1..=12).contains(m)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillCredits {
    #[serde(default)]
    pub has_bill_credit: bool,
    #[serde(default)]
    pub rules: Vec<BillCreditRule>,
}

impl BillCredits {
    pub fn is_empty(&self) -> bool {
        !self.has_bill_credit || self.rules.is_empty()
    }

    pub fn credit_cents(&self, month: u8, monthly_kwh: f64) -> f64 {
        if !self.has_bill_credit {
            return 0.0;
        }
        self.rules
            .iter()
            .filter(|r| r.applies(month, monthly_kwh))
            .map(|r| r.credit_amount_cents)
            .sum()
    }
}

/// Flat monthly fee billed when imported kWh for the month is below
/// `below_kwh`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinimumUsageFee {
    pub fee_cents: f64,
    pub below_kwh: f64,
}

impl MinimumUsageFee {
    pub fn fee_cents_for(&self, monthly_kwh: f64) -> f64 {
        if monthly_kwh < self.below_kwh {
            self.fee_cents
        } else {
            0.0
        }
    }
}

/// Why a structure cannot be priced as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PricingIssue {
    NoEnergyCharge,
    ConflictingFlatRates { candidates: Vec<f64> },
    InvalidFlatRate { value: f64 },
    MultiplePricingModes,
    InvalidTiers { detail: String },
    InvalidTouWindows { detail: String },
    InvalidCharge { field: String },
    MalformedDocument { detail: String },
}

/// The one authoritative energy pricing mode of a structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum EnergyCharge {
    Flat { cents_per_kwh: f64 },
    Tiered { tiers: TierSchedule },
    TimeOfUse { windows: TouSchedule },
    Unresolved { issue: PricingIssue },
}

/// Which pricing inputs the source document declared, whether or not they
/// resolved into a usable `EnergyCharge`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredModes {
    pub flat_rate: bool,
    pub tiers: bool,
    pub tou_windows: bool,
}

/// Canonical plan pricing definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateStructure {
    pub plan_type: PlanType,
    pub energy: EnergyCharge,
    #[serde(default)]
    pub base_monthly_fee_cents: f64,
    pub minimum_usage_fee: Option<MinimumUsageFee>,
    #[serde(default)]
    pub bill_credits: BillCredits,
    pub export_credit_cents_per_kwh: Option<f64>,
    /// Delivery charges are bundled into the energy price; no separate
    /// delivery line is billed.
    #[serde(default)]
    pub delivery_included: bool,
    #[serde(default)]
    pub declared: DeclaredModes,
}

impl RateStructure {
    fn with_energy(plan_type: PlanType, energy: EnergyCharge, declared: DeclaredModes) -> Self {
        Self {
            plan_type,
            energy,
            base_monthly_fee_cents: 0.0,
            minimum_usage_fee: None,
            bill_credits: BillCredits::default(),
            export_credit_cents_per_kwh: None,
            delivery_included: false,
            declared,
        }
    }

    pub fn fixed(cents_per_kwh: f64) -> Self {
        Self::with_energy(
            PlanType::Fixed,
            EnergyCharge::Flat { cents_per_kwh },
            DeclaredModes {
                flat_rate: true,
                ..DeclaredModes::default()
            },
        )
    }

    pub fn tiered(plan_type: PlanType, tiers: TierSchedule) -> Self {
        Self::with_energy(
            plan_type,
            EnergyCharge::Tiered { tiers },
            DeclaredModes {
                tiers: true,
                ..DeclaredModes::default()
            },
        )
    }

    pub fn time_of_use(windows: TouSchedule) -> Self {
        Self::with_energy(
            PlanType::TimeOfUse,
            EnergyCharge::TimeOfUse { windows },
            DeclaredModes {
                tou_windows: true,
                ..DeclaredModes::default()
            },
        )
    }

    pub fn with_base_fee_cents(mut self, cents: f64) -> Self {
        self.base_monthly_fee_cents = cents;
        self
    }

    pub fn with_bill_credits(mut self, credits: BillCredits) -> Self {
        self.bill_credits = credits;
        self
    }

    pub fn with_minimum_usage_fee(mut self, fee: MinimumUsageFee) -> Self {
        self.minimum_usage_fee = Some(fee);
        self
    }

    pub fn with_export_credit(mut self, cents_per_kwh: f64) -> Self {
        self.export_credit_cents_per_kwh = Some(cents_per_kwh);
        self
    }

    pub fn with_delivery_included(mut self, included: bool) -> Self {
        self.delivery_included = included;
        self
    }

    /// The single flat price of a FIXED plan, if it has one.
    pub fn fixed_rate_cents_per_kwh(&self) -> Option<f64> {
        match (&self.plan_type, &self.energy) {
            (PlanType::Fixed, EnergyCharge::Flat { cents_per_kwh }) => Some(*cents_per_kwh),
            _ => None,
        }
    }

    pub fn pricing_issue(&self) -> Option<&PricingIssue> {
        match &self.energy {
            EnergyCharge::Unresolved { issue } => Some(issue),
            _ => None,
        }
    }

    /// Resolve a raw stored document. A document that does not decode as a
    /// `LegacyRateStructure` is kept as `Unresolved` so one bad plan cannot
    /// fail a whole catalog read.
    pub fn from_document(document: serde_json::Value) -> Self {
        let plan_type = document
            .get("type")
            .and_then(serde_json::Value::as_str)
            .map(PlanType::parse_loose)
            .unwrap_or(PlanType::Other);
        match serde_json::from_value::<LegacyRateStructure>(document) {
            Ok(legacy) => Self::from_legacy(&legacy),
            Err(e) => Self::with_energy(
                plan_type,
                EnergyCharge::Unresolved {
                    issue: PricingIssue::MalformedDocument { detail: e.to_string() },
                },
                DeclaredModes::default(),
            ),
        }
    }

    /// Resolve a stored plan document into the typed form.
    ///
    /// Never fails: anything ambiguous or malformed becomes
    /// `EnergyCharge::Unresolved` so classification reports it instead of a
    /// guessed price.
    pub fn from_legacy(legacy: &LegacyRateStructure) -> Self {
        let plan_type = legacy
            .plan_type
            .as_deref()
            .map(PlanType::parse_loose)
            .unwrap_or(PlanType::Other);

        let flat = legacy.resolve_flat_rate();
        let declared = DeclaredModes {
            flat_rate: !matches!(flat, FlatRateResolution::Missing),
            tiers: legacy.tiers.as_ref().is_some_and(|t| !t.is_empty()),
            tou_windows: legacy.tou_windows.as_ref().is_some_and(|w| !w.is_empty()),
        };

        let mut energy = resolve_energy(plan_type, legacy, flat, declared);

        let base_fee = legacy.base_monthly_fee_cents.unwrap_or(0.0);
        if !base_fee.is_finite() || base_fee < 0.0 {
            energy = invalid_charge("baseMonthlyFeeCents");
        }

        let minimum_usage_fee = match (legacy.minimum_usage_fee_cents, legacy.minimum_usage_threshold_kwh) {
            (Some(fee_cents), Some(below_kwh)) => {
                if !(fee_cents.is_finite() && fee_cents >= 0.0 && below_kwh.is_finite() && below_kwh >= 0.0) {
                    energy = invalid_charge("minimumUsageFeeCents");
                }
                Some(MinimumUsageFee { fee_cents, below_kwh })
            }
            (None, None) => None,
            _ => {
                energy = invalid_charge("minimumUsageFeeCents");
                None
            }
        };

        let bill_credits = legacy.bill_credits.clone().unwrap_or_default();
        if bill_credits.rules.iter().any(|r| !r.is_valid()) {
            energy = invalid_charge("billCredits");
        }

        if let Some(buyback) = legacy.solar_buyback_cents_per_kwh {
            if !buyback.is_finite() || buyback < 0.0 {
                energy = invalid_charge("solarBuybackCentsPerKwh");
            }
        }

        Self {
            plan_type,
            energy,
            base_monthly_fee_cents: base_fee,
            minimum_usage_fee,
            bill_credits,
            export_credit_cents_per_kwh: legacy.solar_buyback_cents_per_kwh,
            delivery_included: legacy.tdsp_included.unwrap_or(false),
            declared,
        }
    }
}

fn invalid_charge(field: &str) -> EnergyCharge {
    EnergyCharge::Unresolved {
        issue: PricingIssue::InvalidCharge {
            field: field.to_string(),
        },
    }
}

fn resolve_energy(
    plan_type: PlanType,
    legacy: &LegacyRateStructure,
    flat: FlatRateResolution,
    declared: DeclaredModes,
) -> EnergyCharge {
    let declared_count = [declared.flat_rate, declared.tiers, declared.tou_windows]
        .iter()
        .filter(|d| **d)
        .count();

    if declared_count == 0 {
        return EnergyCharge::Unresolved {
            issue: PricingIssue::NoEnergyCharge,
        };
    }
    if declared_count > 1 {
        return EnergyCharge::Unresolved {
            issue: PricingIssue::MultiplePricingModes,
        };
    }

    if declared.tou_windows {
        let windows = legacy.tou_windows.clone().unwrap_or_default();
        return match TouSchedule::new(windows) {
            Ok(windows) => EnergyCharge::TimeOfUse { windows },
            Err(e) => EnergyCharge::Unresolved {
                issue: PricingIssue::InvalidTouWindows { detail: e.to_string() },
            },
        };
    }

    if plan_type == PlanType::TimeOfUse {
        // A TOU plan priced by anything but windows is mislabelled.
        return EnergyCharge::Unresolved {
            issue: PricingIssue::MultiplePricingModes,
        };
    }

    if declared.tiers {
        let tiers = legacy.tiers.clone().unwrap_or_default();
        return match TierSchedule::new(tiers) {
            Ok(tiers) => EnergyCharge::Tiered { tiers },
            Err(e) => EnergyCharge::Unresolved {
                issue: PricingIssue::InvalidTiers { detail: e.to_string() },
            },
        };
    }

    match flat {
        FlatRateResolution::One(cents_per_kwh) => EnergyCharge::Flat { cents_per_kwh },
        FlatRateResolution::Invalid(value) => EnergyCharge::Unresolved {
            issue: PricingIssue::InvalidFlatRate { value },
        },
        FlatRateResolution::Conflicting(candidates) => EnergyCharge::Unresolved {
            issue: PricingIssue::ConflictingFlatRates { candidates },
        },
        FlatRateResolution::Missing => EnergyCharge::Unresolved {
            issue: PricingIssue::NoEnergyCharge,
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
enum FlatRateResolution {
    Missing,
    One(f64),
    Invalid(f64),
    Conflicting(Vec<f64>),
}

/// Permissive plan document as produced by label parsing and older
/// migrations. Several aliased fields may each carry the flat energy price.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyRateStructure {
    #[serde(rename = "type")]
    pub plan_type: Option<String>,
    pub energy_rate_cents_per_kwh: Option<f64>,
    pub default_rate_cents_per_kwh: Option<f64>,
    pub energy_charge_cents_per_kwh: Option<f64>,
    pub rep_energy_cents_per_kwh: Option<f64>,
    pub tiers: Option<Vec<EnergyTier>>,
    pub tou_windows: Option<Vec<TouWindow>>,
    pub base_monthly_fee_cents: Option<f64>,
    pub minimum_usage_fee_cents: Option<f64>,
    pub minimum_usage_threshold_kwh: Option<f64>,
    pub bill_credits: Option<BillCredits>,
    pub solar_buyback_cents_per_kwh: Option<f64>,
    pub tdsp_included: Option<bool>,
}

impl LegacyRateStructure {
    fn flat_rate_candidates(&self) -> impl Iterator<Item = f64> {
        [
            self.energy_rate_cents_per_kwh,
            self.default_rate_cents_per_kwh,
            self.energy_charge_cents_per_kwh,
            self.rep_energy_cents_per_kwh,
        ]
        .into_iter()
        .flatten()
    }

    fn resolve_flat_rate(&self) -> FlatRateResolution {
        let mut distinct: Vec<f64> = Vec::new();
        for candidate in self.flat_rate_candidates() {
            if !candidate.is_finite() || candidate < 0.0 {
                return FlatRateResolution::Invalid(candidate);
            }
            if !distinct.iter().any(|d| (d - candidate).abs() <= PRICE_EPSILON) {
                distinct.push(candidate);
            }
        }

        match distinct.len() {
            0 => FlatRateResolution::Missing,
            1 => FlatRateResolution::One(distinct[0]),
            _ => {
                distinct.sort_by(f64::total_cmp);
                FlatRateResolution::Conflicting(distinct)
            }
        }
    }
}

/// One offer in the plan catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatePlan {
    pub rate_plan_id: String,
    pub supplier_name: Option<String>,
    pub plan_name: Option<String>,
    pub rate_structure: Option<RateStructure>,
    /// Last stored classification, if any.
    pub computability: Option<PlanComputabilityResult>,
}
