pub mod computability;
pub mod cost;
pub mod delivery;
pub mod estimate;
pub mod job;
pub mod rate_structure;
pub mod usage;

pub use computability::{ComputabilityStatus, PlanComputabilityResult, ReasonCode, SupportedFeatures};
pub use cost::{CostComponents, PlanCostResult, PlanDailyCostSummary, PlanIntervalCost, PlanMonthlyCostSummary};
pub use delivery::DeliveryRates;
pub use estimate::{
    CalculationMode, Confidence, EstimatePayload, EstimateSource, EstimateStatus, MaterializedEstimate,
};
pub use job::{JobCounts, JobStatus, PipelineJobSnapshot};
pub use rate_structure::{
    BillCreditRule, BillCredits, EnergyCharge, EnergyTier, LegacyRateStructure, MinimumUsageFee, PlanType,
    PricingIssue, RatePlan, RateStructure, RateStructureError, TierSchedule, TouSchedule, TouWindow,
};
pub use usage::{IntervalUsagePoint, UsageBucketsByMonth, BUCKET_KWH_MONTH_ALL_TOTAL};
