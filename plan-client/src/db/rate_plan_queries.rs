use anyhow::Result;
use sqlx::{types::Json, PgPool};

use crate::domain::{PlanComputabilityResult, RatePlan, RateStructure};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RatePlanRow {
    pub rate_plan_id: String,
    pub supplier_name: Option<String>,
    pub plan_name: Option<String>,
    /// Decoded per row in `From<RatePlanRow>`, never by sqlx.
    pub rate_structure: Option<Json<serde_json::Value>>,
    pub computability: Option<Json<serde_json::Value>>,
}

impl From<RatePlanRow> for RatePlan {
    fn from(row: RatePlanRow) -> Self {
        RatePlan {
            rate_plan_id: row.rate_plan_id,
            supplier_name: row.supplier_name,
            plan_name: row.plan_name,
            rate_structure: row.rate_structure.map(|Json(doc)| RateStructure::from_document(doc)),
            // An unreadable stored result is treated as absent and reclassified.
            computability: row
                .computability
                .and_then(|Json(c)| serde_json::from_value::<PlanComputabilityResult>(c).ok()),
        }
    }
}

/// Active plans offered in the household's territory, ordered by id so
/// bounded runs resume deterministically.
pub async fn candidate_plans(pool: &PgPool, household_id: &str) -> Result<Vec<RatePlan>> {
    let rows = sqlx::query_as::<_, RatePlanRow>(
        r#"
        SELECT
            p.rate_plan_id,
            p.supplier_name,
            p.plan_name,
            p.rate_structure,
            p.computability
        FROM rate_plan p
        JOIN household h ON h.territory = p.territory
        WHERE h.household_id = $1
          AND p.is_active
        ORDER BY p.rate_plan_id
        "#,
    )
    .bind(household_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(RatePlan::from).collect())
}

pub async fn record_computability(pool: &PgPool, rate_plan_id: &str, result: &PlanComputabilityResult) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE rate_plan
        SET computability = $2,
            plan_calc_version = $3,
            computability_status = $4
        WHERE rate_plan_id = $1
        "#,
    )
    .bind(rate_plan_id)
    .bind(Json(result))
    .bind(result.plan_calc_version)
    .bind(result.status.as_str())
    .execute(pool)
    .await?;

    Ok(())
}
