use std::{sync::Arc, time::Duration as StdDuration};

use anyhow::{Context, Result};
use chrono::Duration;
use daara_ledger::{ExpirySummary, SettlementEngine};
use daara_platform::{
    PgEventStore, PgLedgerStore, RedisBus, ServiceConfig, SettlementResolvedEvent,
    bootstrap_schema, connect_database,
};
use tracing::{error, info};

const EXPIRY_RESOLVER: &str = "system:expiry";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "daara_ops=info,daara_ledger=info".to_string()),
        )
        .init();

    let config = ServiceConfig::worker_from_env()?;
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is required")?;
    let pool = connect_database(database_url).await?;
    bootstrap_schema(&pool).await?;
    let redis = config
        .redis_url
        .as_deref()
        .map(RedisBus::connect)
        .transpose()?;

    let engine = SettlementEngine::new(
        Arc::new(PgLedgerStore::new(pool.clone())),
        Arc::new(PgEventStore::new(pool)),
    );
    let max_age = Duration::days(config.pending_expiry_days);

    info!(
        "expiry sweep every {}s for settlements pending longer than {} days",
        config.sweep_interval_secs, config.pending_expiry_days
    );

    let mut ticker = tokio::time::interval(StdDuration::from_secs(config.sweep_interval_secs));
    loop {
        ticker.tick().await;
        match engine.expire_pending(max_age, EXPIRY_RESOLVER).await {
            Ok(summary) => publish_expired(&engine, redis.as_ref(), &summary).await,
            Err(err) => error!("expiry sweep failed: {err:#}"),
        }
    }
}

async fn publish_expired(
    engine: &SettlementEngine,
    redis: Option<&RedisBus>,
    summary: &ExpirySummary,
) {
    if summary.skipped > 0 {
        info!(
            "{} settlement(s) were resolved before the sweep reached them",
            summary.skipped
        );
    }
    let Some(redis) = redis else {
        return;
    };
    for settlement_id in &summary.rejected {
        let settlement = match engine.get_settlement(*settlement_id).await {
            Ok(settlement) => settlement,
            Err(err) => {
                error!("failed to reload expired settlement {settlement_id}: {err:#}");
                continue;
            }
        };
        if let Err(err) = redis
            .publish_resolution(&SettlementResolvedEvent::from(&settlement))
            .await
        {
            error!("{err:#}");
        }
    }
}
