use std::{collections::BTreeSet, sync::Arc, time::Instant};

use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use plan_client::domain::{
    CalculationMode, EstimateSource, JobCounts, JobStatus, PipelineJobSnapshot, UsageBucketsByMonth,
};
use time::{Duration, OffsetDateTime};

use super::{should_start, SchedulePolicy, StartReason};
use crate::{
    cache::{CacheError, EstimateCache, EstimateInputs},
    classify::{classify, needs_reclassification},
    stores::{PlanEngineStore, StoreError},
};

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("failed to read job snapshot: {0}")]
    SnapshotRead(#[source] StoreError),
    #[error("failed to write job snapshot: {0}")]
    SnapshotWrite(#[source] StoreError),
    #[error("store read failed during run: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("clock value {0} cannot be localized")]
    ClockOutOfRange(OffsetDateTime),
}

/// Work allowed per run. Checked between plans, never mid-plan.
#[derive(Debug, Clone, Copy)]
pub struct RunBudget {
    /// Freshly computed estimates per run. Cache hits do not count.
    pub max_plans_per_run: usize,
    pub time_budget: std::time::Duration,
}

#[derive(Debug, Clone)]
pub struct EstimateSettings {
    pub ttl_days: i64,
    pub months_in_scope: u32,
    pub mode: CalculationMode,
    pub timezone: Tz,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Skipped {
        reason: StartReason,
    },
    Finished {
        run_id: String,
        reason: StartReason,
        counts: JobCounts,
    },
}

pub struct EnrichmentRunner<S: ?Sized> {
    store: Arc<S>,
    cache: EstimateCache<S>,
    policy: SchedulePolicy,
    budget: RunBudget,
    settings: EstimateSettings,
}

fn run_id(household_id: &str, started_at: OffsetDateTime) -> String {
    let mut h = blake3::Hasher::new();
    h.update(&(household_id.len() as u32).to_le_bytes());
    h.update(household_id.as_bytes());
    h.update(&started_at.unix_timestamp_nanos().to_le_bytes());
    h.finalize().to_hex()[..32].to_string()
}

/// `yyyy-mm` bounds of the `months` complete local months before `now`.
fn month_window(now: OffsetDateTime, tz: &Tz, months: u32) -> Option<(String, String)> {
    let local = DateTime::<Utc>::from_timestamp(now.unix_timestamp(), 0)?.with_timezone(tz);
    let last = local.year() * 12 + local.month0() as i32 - 1;
    let first = last - (months.max(1) as i32 - 1);
    let key = |i: i32| format!("{:04}-{:02}", i.div_euclid(12), i.rem_euclid(12) + 1);
    Some((key(first), key(last)))
}

impl<S> EnrichmentRunner<S>
where
    S: PlanEngineStore + ?Sized,
{
    pub fn new(store: Arc<S>, policy: SchedulePolicy, budget: RunBudget, settings: EstimateSettings) -> Self {
        Self {
            cache: EstimateCache::new(store.clone(), settings.ttl_days),
            store,
            policy,
            budget,
            settings,
        }
    }

    /// Run enrichment for one household if its latest snapshot allows it.
    ///
    /// Writes a RUNNING snapshot before touching any plan and a DONE or
    /// ERROR snapshot afterwards. A failed run is returned as an error after
    /// its ERROR snapshot is recorded.
    pub async fn run(&self, household_id: &str, now: OffsetDateTime) -> Result<RunOutcome, RunError> {
        let latest = self
            .store
            .latest_snapshot(household_id)
            .await
            .map_err(RunError::SnapshotRead)?;
        let decision = should_start(latest.as_ref(), now, &self.policy);
        if !decision.ok_to_start {
            metrics::counter!("pipeline_runs_skipped_total").increment(1);
            tracing::info!(household_id, reason = %decision.reason, "enrichment run skipped");
            return Ok(RunOutcome::Skipped {
                reason: decision.reason,
            });
        }

        let mut snapshot = PipelineJobSnapshot {
            household_id: household_id.to_string(),
            run_id: run_id(household_id, now),
            status: JobStatus::Running,
            reason: decision.reason.as_str().to_string(),
            calc_version: Some(self.policy.required_calc_version.clone()),
            started_at: now,
            finished_at: None,
            cooldown_until: None,
            last_calc_window_end: latest.and_then(|s| s.last_calc_window_end),
            last_error: None,
            counts: JobCounts::default(),
        };
        self.write_snapshot(&snapshot).await?;
        metrics::counter!("pipeline_runs_started_total").increment(1);
        tracing::info!(household_id, run_id = %snapshot.run_id, reason = %decision.reason, "enrichment run started");

        let clock = Instant::now();
        let mut counts = JobCounts::default();
        let result = self.process(household_id, now, clock, &mut counts).await;

        let finished_at = now + clock.elapsed();
        snapshot.finished_at = Some(finished_at);
        snapshot.counts = counts;

        match result {
            Ok(()) => {
                snapshot.status = JobStatus::Done;
                snapshot.cooldown_until = Some(finished_at + Duration::minutes(self.policy.cooldown_minutes));
                if counts.remaining() == 0 {
                    snapshot.last_calc_window_end = Some(finished_at);
                }
                self.write_snapshot(&snapshot).await?;
                tracing::info!(
                    household_id,
                    run_id = %snapshot.run_id,
                    plans = counts.rate_plan_ids_count,
                    computed = counts.estimates_computed,
                    cached = counts.estimates_already_cached,
                    remaining = counts.remaining(),
                    "enrichment run finished"
                );
                Ok(RunOutcome::Finished {
                    run_id: snapshot.run_id,
                    reason: decision.reason,
                    counts,
                })
            }
            Err(e) => {
                metrics::counter!("pipeline_runs_failed_total").increment(1);
                tracing::error!(error = %e, household_id, run_id = %snapshot.run_id, "enrichment run failed");
                snapshot.status = JobStatus::Error;
                snapshot.last_error = Some(e.to_string());
                snapshot.cooldown_until = Some(finished_at + Duration::minutes(self.policy.error_cooldown_minutes));
                if let Err(write_err) = self.write_snapshot(&snapshot).await {
                    tracing::error!(error = %write_err, household_id, "failed to record failed run");
                }
                Err(e)
            }
        }
    }

    pub async fn write_snapshot(&self, snapshot: &PipelineJobSnapshot) -> Result<(), RunError> {
        self.store
            .insert_snapshot(snapshot)
            .await
            .map_err(RunError::SnapshotWrite)
    }

    async fn process(
        &self,
        household_id: &str,
        now: OffsetDateTime,
        clock: Instant,
        counts: &mut JobCounts,
    ) -> Result<(), RunError> {
        let plans = self.store.candidate_plans(household_id).await?;
        counts.rate_plan_ids_count = plans.len() as i64;
        if plans.is_empty() {
            return Ok(());
        }

        let classified: Vec<_> = plans
            .into_iter()
            .map(|plan| {
                let fresh = classify(plan.rate_structure.as_ref());
                (plan, fresh)
            })
            .collect();

        let bucket_keys: Vec<String> = classified
            .iter()
            .flat_map(|(_, c)| c.required_bucket_keys.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let months = self.settings.months_in_scope;
        let usage = if bucket_keys.is_empty() {
            UsageBucketsByMonth::new()
        } else {
            let (from, to) =
                month_window(now, &self.settings.timezone, months).ok_or(RunError::ClockOutOfRange(now))?;
            self.store
                .usage_buckets_by_month(household_id, &bucket_keys, &from, &to)
                .await?
        };

        let delivery = match self.settings.mode {
            CalculationMode::AllIn => self.store.active_delivery_rates(household_id, now.date()).await?,
            CalculationMode::EnergyOnly => None,
        };

        for (plan, fresh) in classified {
            if counts.estimates_computed as usize >= self.budget.max_plans_per_run {
                tracing::info!(household_id, "plan budget reached, stopping run");
                break;
            }
            if clock.elapsed() >= self.budget.time_budget {
                tracing::info!(household_id, "time budget reached, stopping run");
                break;
            }

            if needs_reclassification(plan.computability.as_ref(), &fresh) {
                if let Err(e) = self.store.record_computability(&plan.rate_plan_id, &fresh).await {
                    tracing::warn!(error = %e, rate_plan_id = %plan.rate_plan_id, "failed to record computability");
                }
            }

            let inputs = EstimateInputs::new(
                &usage,
                plan.rate_structure,
                fresh,
                delivery.clone(),
                self.settings.mode,
                months,
            );
            let outcome = self
                .cache
                .get_or_compute(household_id, &plan.rate_plan_id, &inputs, now)
                .await?;
            match outcome.source {
                EstimateSource::Materialized => counts.estimates_already_cached += 1,
                EstimateSource::Computed => counts.estimates_computed += 1,
            }
        }

        Ok(())
    }
}
