use std::{env, fs};

use anyhow::{bail, Context, Result};
use estimate_service::{cost, observability, usage};
use plan_client::domain::{DeliveryRates, IntervalUsagePoint, LegacyRateStructure, RateStructure};

/// Price one usage file against one rate structure and print the cost
/// breakdown as JSON.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        bail!("usage: compute_plan_cost <usage_ndjson_path> <rate_structure_json_path> [timezone] [delivery_json_path]");
    }
    let tz = cost::parse_timezone(args.get(3).map(String::as_str).unwrap_or("America/Chicago"))?;

    let points = read_usage(&args[1])?;

    let raw = fs::read_to_string(&args[2]).with_context(|| format!("reading {}", args[2]))?;
    let legacy: LegacyRateStructure = serde_json::from_str(&raw).with_context(|| format!("parsing {}", args[2]))?;
    let rate_structure = RateStructure::from_legacy(&legacy);

    let delivery: Option<DeliveryRates> = match args.get(4) {
        Some(path) => {
            let raw = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            Some(serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?)
        }
        None => None,
    };

    let result = cost::compute_cost(&rate_structure, &points, tz, delivery.as_ref())?;
    tracing::info!(
        intervals = result.intervals.len(),
        months = result.monthly.len(),
        total_cost_dollars = result.total_cost_dollars,
        "priced usage"
    );

    // Cross-check against the monthly-total path used for materialized estimates.
    let buckets = usage::aggregate_monthly_buckets(&points, tz);
    match cost::compute_monthly_from_buckets(&rate_structure, &buckets, delivery.as_ref()) {
        Ok(from_buckets) if (from_buckets.total_cost_dollars - result.total_cost_dollars).abs() > 0.01 => {
            tracing::warn!(
                interval_total = result.total_cost_dollars,
                bucket_total = from_buckets.total_cost_dollars,
                "interval and monthly-bucket totals disagree"
            );
        }
        Ok(_) => tracing::debug!(months = buckets.len(), "monthly-bucket total matches"),
        Err(e) => tracing::debug!(error = %e, "no monthly-bucket cross-check for this structure"),
    }
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn read_usage(path: &str) -> Result<Vec<IntervalUsagePoint>> {
    let contents = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let mut points = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<IntervalUsagePoint>(line) {
            Ok(p) => points.push(p),
            Err(e) => tracing::warn!(line = line_no + 1, error = %e, "skipping malformed usage line"),
        }
    }
    Ok(points)
}
