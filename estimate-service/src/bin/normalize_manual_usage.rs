use std::{env, io::Write};

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use estimate_service::{
    cost, observability,
    usage::manual::{annual_to_intervals, monthly_to_intervals, MonthlyEntry, TravelRange},
};
use plan_client::domain::IntervalUsagePoint;

const USAGE: &str = "usage:
  normalize_manual_usage monthly <entries_csv_path> [--bill-end-day N] [--travel START..END]... [--tz TZ]
  normalize_manual_usage annual <kwh> <start_date> <end_date> [--travel START..END]... [--tz TZ]";

struct Options {
    bill_end_day: Option<u32>,
    travel: Vec<TravelRange>,
    tz: String,
}

fn parse_travel(raw: &str) -> Result<TravelRange> {
    let (start, end) = raw
        .split_once("..")
        .ok_or_else(|| anyhow!("travel range '{raw}' must look like 2024-07-01..2024-07-10"))?;
    Ok(TravelRange {
        start: start.trim().parse::<NaiveDate>().with_context(|| format!("travel start '{start}'"))?,
        end: end.trim().parse::<NaiveDate>().with_context(|| format!("travel end '{end}'"))?,
    })
}

fn parse_options(flags: &[String]) -> Result<Options> {
    let mut opts = Options {
        bill_end_day: None,
        travel: Vec::new(),
        tz: "America/Chicago".to_string(),
    };
    let mut it = flags.iter();
    while let Some(flag) = it.next() {
        let value = it.next().ok_or_else(|| anyhow!("{flag} needs a value\n{USAGE}"))?;
        match flag.as_str() {
            "--bill-end-day" => opts.bill_end_day = Some(value.parse().with_context(|| format!("bill end day '{value}'"))?),
            "--travel" => opts.travel.push(parse_travel(value)?),
            "--tz" => opts.tz = value.clone(),
            other => bail!("unknown option {other}\n{USAGE}"),
        }
    }
    Ok(opts)
}

/// Spread manually entered totals over 15-minute intervals and write them as
/// NDJSON to stdout.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    let points: Vec<IntervalUsagePoint> = match args.get(1).map(String::as_str) {
        Some("monthly") if args.len() >= 3 => {
            let opts = parse_options(&args[3..])?;
            let tz = cost::parse_timezone(&opts.tz)?;
            let mut reader = csv::Reader::from_path(&args[2]).with_context(|| format!("opening {}", args[2]))?;
            let mut entries = Vec::new();
            for (row, record) in reader.deserialize::<MonthlyEntry>().enumerate() {
                match record {
                    Ok(entry) => entries.push(entry),
                    Err(e) => tracing::warn!(row = row + 1, error = %e, "skipping malformed monthly entry"),
                }
            }
            monthly_to_intervals(&entries, opts.bill_end_day, &opts.travel, tz)
        }
        Some("annual") if args.len() >= 5 => {
            let opts = parse_options(&args[5..])?;
            let tz = cost::parse_timezone(&opts.tz)?;
            let kwh: f64 = args[2].parse().with_context(|| format!("annual kWh '{}'", args[2]))?;
            let start: NaiveDate = args[3].parse().with_context(|| format!("start date '{}'", args[3]))?;
            let end: NaiveDate = args[4].parse().with_context(|| format!("end date '{}'", args[4]))?;
            annual_to_intervals(kwh, start, end, &opts.travel, tz)?
        }
        _ => bail!("{USAGE}"),
    };

    let total: f64 = points.iter().map(|p| p.kwh_import).sum();
    tracing::info!(intervals = points.len(), total_kwh = total, "normalized manual usage");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for p in &points {
        serde_json::to_writer(&mut out, p)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}
