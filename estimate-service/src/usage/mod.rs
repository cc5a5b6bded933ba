pub mod manual;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use plan_client::domain::{IntervalUsagePoint, UsageBucketsByMonth, BUCKET_KWH_MONTH_ALL_TOTAL};

/// Wall-clock time of a reading in `tz`, or `None` when its timestamp does
/// not parse.
pub fn local_time(point: &IntervalUsagePoint, tz: &Tz) -> Option<DateTime<Tz>> {
    let ts = point.instant()?;
    let utc = DateTime::<Utc>::from_timestamp(ts.unix_timestamp(), ts.nanosecond())?;
    Some(utc.with_timezone(tz))
}

/// Sum an interval series into `kwh.month.all.total` per local month.
///
/// Unparsable readings are dropped and counted on
/// `usage_points_skipped_total`.
pub fn aggregate_monthly_buckets(points: &[IntervalUsagePoint], tz: Tz) -> UsageBucketsByMonth {
    let mut out = UsageBucketsByMonth::new();
    let mut skipped = 0u64;

    for p in points {
        let Some(local) = local_time(p, &tz) else {
            skipped += 1;
            continue;
        };
        *out.entry(local.format("%Y-%m").to_string())
            .or_default()
            .entry(BUCKET_KWH_MONTH_ALL_TOTAL.to_string())
            .or_insert(0.0) += p.import_kwh();
    }

    if skipped > 0 {
        metrics::counter!("usage_points_skipped_total").increment(skipped);
        tracing::debug!(skipped, "dropped usage points with unparsable timestamps");
    }
    out
}

/// Keep the most recent `months` months.
pub fn select_months(buckets: &UsageBucketsByMonth, months: usize) -> UsageBucketsByMonth {
    let skip = buckets.len().saturating_sub(months);
    buckets
        .iter()
        .skip(skip)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// True when at least one month carries every key in `required`.
pub fn has_required_buckets(buckets: &UsageBucketsByMonth, required: &[String]) -> bool {
    buckets
        .values()
        .any(|month| required.iter().all(|key| month.contains_key(key)))
}

/// Months in `buckets` that carry every key in `required`.
pub fn covered_months(buckets: &UsageBucketsByMonth, required: &[String]) -> usize {
    buckets
        .values()
        .filter(|month| required.iter().all(|key| month.contains_key(key)))
        .count()
}
