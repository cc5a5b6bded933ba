use anyhow::Result;
use sqlx::PgPool;

use crate::domain::UsageBucketsByMonth;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UsageBucketRow {
    pub year_month: String,
    pub bucket_key: String,
    pub kwh: f64,
}

/// Monthly usage buckets for a household, restricted to `bucket_keys`.
///
/// Months are `yyyy-mm` strings, so the range filter is lexicographic.
pub async fn usage_buckets_by_month(
    pool: &PgPool,
    household_id: &str,
    bucket_keys: &[String],
    from_month: &str,
    to_month: &str,
) -> Result<UsageBucketsByMonth> {
    let rows = sqlx::query_as::<_, UsageBucketRow>(
        r#"
        SELECT
            year_month,
            bucket_key,
            kwh
        FROM usage_bucket_monthly
        WHERE household_id = $1
          AND bucket_key = ANY($2)
          AND year_month >= $3
          AND year_month <= $4
        ORDER BY year_month, bucket_key
        "#,
    )
    .bind(household_id)
    .bind(bucket_keys)
    .bind(from_month)
    .bind(to_month)
    .fetch_all(pool)
    .await?;

    let mut out = UsageBucketsByMonth::new();
    for row in rows {
        out.entry(row.year_month).or_default().insert(row.bucket_key, row.kwh);
    }
    Ok(out)
}
