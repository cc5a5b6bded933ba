use anyhow::Result;
use sqlx::{types::Json, PgPool};

use crate::domain::{EstimatePayload, MaterializedEstimate};

#[derive(Debug, Clone, sqlx::FromRow)]
struct EstimateRow {
    household_id: String,
    rate_plan_id: String,
    inputs_sha256: String,
    payload: Json<EstimatePayload>,
}

/// Look up a materialized estimate by its full content address.
pub async fn find_estimate(
    pool: &PgPool,
    household_id: &str,
    rate_plan_id: &str,
    inputs_sha256: &str,
) -> Result<Option<MaterializedEstimate>> {
    let row = sqlx::query_as::<_, EstimateRow>(
        r#"
        SELECT
            household_id,
            rate_plan_id,
            inputs_sha256,
            payload
        FROM plan_estimate_materialized
        WHERE household_id = $1
          AND rate_plan_id = $2
          AND inputs_sha256 = $3
        "#,
    )
    .bind(household_id)
    .bind(rate_plan_id)
    .bind(inputs_sha256)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| MaterializedEstimate {
        household_id: r.household_id,
        rate_plan_id: r.rate_plan_id,
        inputs_sha256: r.inputs_sha256,
        payload: r.payload.0,
    }))
}

/// Insert-only write. Returns `false` when a row already holds this key; the
/// existing row is left untouched.
pub async fn insert_estimate(pool: &PgPool, estimate: &MaterializedEstimate) -> Result<bool> {
    let p = &estimate.payload;
    let result = sqlx::query(
        r#"
        INSERT INTO plan_estimate_materialized (
            household_id, rate_plan_id, inputs_sha256,
            status, reason, annual_cost_dollars, payload, computed_at, expires_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (household_id, rate_plan_id, inputs_sha256) DO NOTHING
        "#,
    )
    .bind(&estimate.household_id)
    .bind(&estimate.rate_plan_id)
    .bind(&estimate.inputs_sha256)
    .bind(p.status.as_str())
    .bind(p.reason.as_str())
    .bind(p.annual_cost_dollars)
    .bind(Json(p))
    .bind(p.computed_at)
    .bind(p.expires_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}
