use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "RUNNING" => Some(Self::Running),
            "DONE" => Some(Self::Done),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCounts {
    pub rate_plan_ids_count: i64,
    pub estimates_computed: i64,
    pub estimates_already_cached: i64,
}

impl JobCounts {
    /// Plans not yet materialized when the run stopped.
    pub fn remaining(&self) -> i64 {
        (self.rate_plan_ids_count - self.estimates_computed - self.estimates_already_cached).max(0)
    }
}

/// One append-only record per scheduling decision for a household.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineJobSnapshot {
    pub household_id: String,
    pub run_id: String,
    pub status: JobStatus,
    pub reason: String,
    pub calc_version: Option<String>,
    pub started_at: OffsetDateTime,
    pub finished_at: Option<OffsetDateTime>,
    pub cooldown_until: Option<OffsetDateTime>,
    pub last_calc_window_end: Option<OffsetDateTime>,
    pub last_error: Option<String>,
    pub counts: JobCounts,
}
