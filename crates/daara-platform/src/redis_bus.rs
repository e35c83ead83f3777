use anyhow::{Context, Result};
use redis::{AsyncCommands, Client};
use serde::Serialize;

use crate::contracts::SettlementResolvedEvent;

#[derive(Clone)]
pub struct RedisBus {
    client: Client,
}

impl RedisBus {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("invalid REDIS_URL")?;
        Ok(Self { client })
    }

    pub async fn publish_json<T: Serialize>(&self, channel: &str, payload: &T) -> Result<()> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(payload)?;
        let _: i64 = connection.publish(channel, serialized).await?;
        Ok(())
    }

    pub async fn publish_resolution(&self, event: &SettlementResolvedEvent) -> Result<()> {
        self.publish_json(event.channel(), event)
            .await
            .with_context(|| format!("failed to publish settlement {}", event.settlement_id))
    }
}
