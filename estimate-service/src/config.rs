use serde::Deserialize;
use std::fs;

use plan_client::domain::CalculationMode;

use crate::scheduler::{EstimateSettings, RunBudget, SchedulePolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub uri: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub cadence_days: i64,
    pub max_running_minutes: i64,
    pub cooldown_minutes: i64,
    pub error_cooldown_minutes: i64,
    pub enforce_cadence: bool,
    pub required_calc_version: String,
    pub max_plans_per_run: usize,
    pub time_budget_ms: u64,
    pub household_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let policy = SchedulePolicy::default();
        Self {
            cadence_days: policy.cadence_days,
            max_running_minutes: policy.max_running_minutes,
            cooldown_minutes: policy.cooldown_minutes,
            error_cooldown_minutes: policy.error_cooldown_minutes,
            enforce_cadence: policy.enforce_cadence,
            required_calc_version: policy.required_calc_version,
            max_plans_per_run: 50,
            time_budget_ms: 20_000,
            household_concurrency: 4,
        }
    }
}

impl SchedulerConfig {
    pub fn policy(&self) -> SchedulePolicy {
        SchedulePolicy {
            cadence_days: self.cadence_days,
            max_running_minutes: self.max_running_minutes,
            cooldown_minutes: self.cooldown_minutes,
            error_cooldown_minutes: self.error_cooldown_minutes,
            required_calc_version: self.required_calc_version.clone(),
            enforce_cadence: self.enforce_cadence,
        }
    }

    pub fn budget(&self) -> RunBudget {
        RunBudget {
            max_plans_per_run: self.max_plans_per_run,
            time_budget: std::time::Duration::from_millis(self.time_budget_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EstimatesConfig {
    pub ttl_days: i64,
    pub months_in_scope: u32,
    pub timezone: String,
    pub mode: CalculationMode,
}

impl Default for EstimatesConfig {
    fn default() -> Self {
        Self {
            ttl_days: 30,
            months_in_scope: 12,
            timezone: "America/Chicago".to_string(),
            mode: CalculationMode::AllIn,
        }
    }
}

impl EstimatesConfig {
    pub fn settings(&self) -> anyhow::Result<EstimateSettings> {
        Ok(EstimateSettings {
            ttl_days: self.ttl_days,
            months_in_scope: self.months_in_scope,
            mode: self.mode,
            timezone: crate::cost::parse_timezone(&self.timezone)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub estimates: EstimatesConfig,
    pub metrics: Option<MetricsConfig>,
}

fn default_max_connections() -> u32 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("PLAN_ENGINE_CONFIG").unwrap_or_else(|_| "plan-engine.toml".to_string());
        let contents = fs::read_to_string(&path).map_err(|e| anyhow::anyhow!("reading {path}: {e}"))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        if cfg.store.kind == StoreKind::Postgres && cfg.database.is_none() {
            anyhow::bail!("[database] is required when store.kind = \"postgres\"");
        }
        Ok(cfg)
    }
}
