use anyhow::{anyhow, Result};
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::{JobCounts, JobStatus, PipelineJobSnapshot};

#[derive(Debug, Clone, sqlx::FromRow)]
struct SnapshotRow {
    household_id: String,
    run_id: String,
    status: String,
    reason: String,
    calc_version: Option<String>,
    started_at: OffsetDateTime,
    finished_at: Option<OffsetDateTime>,
    cooldown_until: Option<OffsetDateTime>,
    last_calc_window_end: Option<OffsetDateTime>,
    last_error: Option<String>,
    rate_plan_ids_count: i64,
    estimates_computed: i64,
    estimates_already_cached: i64,
}

impl TryFrom<SnapshotRow> for PipelineJobSnapshot {
    type Error = anyhow::Error;

    fn try_from(r: SnapshotRow) -> Result<Self> {
        let status = JobStatus::parse(&r.status).ok_or_else(|| anyhow!("unknown job status '{}'", r.status))?;
        Ok(PipelineJobSnapshot {
            household_id: r.household_id,
            run_id: r.run_id,
            status,
            reason: r.reason,
            calc_version: r.calc_version,
            started_at: r.started_at,
            finished_at: r.finished_at,
            cooldown_until: r.cooldown_until,
            last_calc_window_end: r.last_calc_window_end,
            last_error: r.last_error,
            counts: JobCounts {
                rate_plan_ids_count: r.rate_plan_ids_count,
                estimates_computed: r.estimates_computed,
                estimates_already_cached: r.estimates_already_cached,
            },
        })
    }
}

/// Most recently recorded snapshot for a household. Older rows are history.
pub async fn latest_snapshot(pool: &PgPool, household_id: &str) -> Result<Option<PipelineJobSnapshot>> {
    let row = sqlx::query_as::<_, SnapshotRow>(
        r#"
        SELECT
            household_id,
            run_id,
            status,
            reason,
            calc_version,
            started_at,
            finished_at,
            cooldown_until,
            last_calc_window_end,
            last_error,
            rate_plan_ids_count,
            estimates_computed,
            estimates_already_cached
        FROM pipeline_job_snapshot
        WHERE household_id = $1
        ORDER BY snapshot_id DESC
        LIMIT 1
        "#,
    )
    .bind(household_id)
    .fetch_optional(pool)
    .await?;

    row.map(PipelineJobSnapshot::try_from).transpose()
}

/// Append a snapshot. Snapshots are never updated in place.
pub async fn insert_snapshot(pool: &PgPool, s: &PipelineJobSnapshot) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO pipeline_job_snapshot (
            household_id, run_id, status, reason, calc_version,
            started_at, finished_at, cooldown_until, last_calc_window_end, last_error,
            rate_plan_ids_count, estimates_computed, estimates_already_cached
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(&s.household_id)
    .bind(&s.run_id)
    .bind(s.status.as_str())
    .bind(&s.reason)
    .bind(&s.calc_version)
    .bind(s.started_at)
    .bind(s.finished_at)
    .bind(s.cooldown_until)
    .bind(s.last_calc_window_end)
    .bind(&s.last_error)
    .bind(s.counts.rate_plan_ids_count)
    .bind(s.counts.estimates_computed)
    .bind(s.counts.estimates_already_cached)
    .execute(pool)
    .await?;

    Ok(())
}
