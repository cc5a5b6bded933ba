use anyhow::Result;
use sqlx::PgPool;
use time::Date;

use crate::domain::DeliveryRates;

#[derive(Debug, Clone, sqlx::FromRow)]
struct DeliveryRateRow {
    per_kwh_delivery_charge_cents: f64,
    monthly_customer_charge_dollars: f64,
    effective_date: Date,
}

/// Latest delivery snapshot for the household's territory effective on or
/// before `as_of`.
pub async fn active_delivery_rates(pool: &PgPool, household_id: &str, as_of: Date) -> Result<Option<DeliveryRates>> {
    let row = sqlx::query_as::<_, DeliveryRateRow>(
        r#"
        SELECT
            d.per_kwh_delivery_charge_cents,
            d.monthly_customer_charge_dollars,
            d.effective_date
        FROM delivery_rate_snapshot d
        JOIN household h ON h.territory = d.territory
        WHERE h.household_id = $1
          AND d.effective_date <= $2
        ORDER BY d.effective_date DESC
        LIMIT 1
        "#,
    )
    .bind(household_id)
    .bind(as_of)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| DeliveryRates {
        per_kwh_delivery_charge_cents: r.per_kwh_delivery_charge_cents,
        monthly_customer_charge_dollars: r.monthly_customer_charge_dollars,
        effective_date: r.effective_date,
    }))
}
