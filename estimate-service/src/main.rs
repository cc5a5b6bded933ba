use std::{env, sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Result};
use estimate_service::{
    config::{AppConfig, StoreKind},
    metrics_server, observability,
    scheduler::{EnrichmentRunner, RunOutcome},
    stores::{MemoryStore, PgStore, PlanEngineStore},
};
use futures::StreamExt;
use sqlx::postgres::PgPoolOptions;
use time::OffsetDateTime;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let household_ids: Vec<String> = env::args().skip(1).collect();
    if household_ids.is_empty() {
        bail!("usage: estimate-service <household_id>...");
    }

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    match cfg.store.kind {
        StoreKind::Postgres => {
            let db = cfg
                .database
                .as_ref()
                .ok_or_else(|| anyhow!("[database] is required for the postgres store"))?;
            let pool = PgPoolOptions::new()
                .max_connections(db.max_connections)
                .connect(&db.uri)
                .await?;
            let store = PgStore::new(
                pool,
                cfg.store.max_retries,
                Duration::from_millis(cfg.store.retry_backoff_ms),
            );
            run_households(Arc::new(store), &cfg, household_ids).await
        }
        StoreKind::Memory => {
            warn!("running against the in-memory store; nothing is persisted");
            run_households(Arc::new(MemoryStore::new()), &cfg, household_ids).await
        }
    }
}

async fn run_households<S>(store: Arc<S>, cfg: &AppConfig, household_ids: Vec<String>) -> Result<()>
where
    S: PlanEngineStore + 'static,
{
    let runner = EnrichmentRunner::new(
        store,
        cfg.scheduler.policy(),
        cfg.scheduler.budget(),
        cfg.estimates.settings()?,
    );
    let runner = &runner;

    let results: Vec<_> = futures::stream::iter(household_ids)
        .map(|household_id| async move {
            let outcome = runner.run(&household_id, OffsetDateTime::now_utc()).await;
            (household_id, outcome)
        })
        .buffer_unordered(cfg.scheduler.household_concurrency.max(1))
        .collect()
        .await;

    let mut failed = 0usize;
    for (household_id, outcome) in results {
        match outcome {
            Ok(RunOutcome::Skipped { reason }) => {
                info!(household_id = %household_id, reason = %reason, "enrichment skipped");
            }
            Ok(RunOutcome::Finished { run_id, reason, counts }) => {
                info!(
                    household_id = %household_id,
                    run_id = %run_id,
                    reason = %reason,
                    plans = counts.rate_plan_ids_count,
                    computed = counts.estimates_computed,
                    cached = counts.estimates_already_cached,
                    remaining = counts.remaining(),
                    "enrichment finished"
                );
            }
            Err(e) => {
                failed += 1;
                error!(household_id = %household_id, error = %e, "enrichment failed");
            }
        }
    }

    if failed > 0 {
        bail!("{failed} household run(s) failed");
    }
    Ok(())
}
