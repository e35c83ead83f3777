use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use daara_core::{DomainEvent, EventEnvelope, EventStore};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct AuditLog {
    last_sequence: i64,
    streams: HashMap<Uuid, Vec<EventEnvelope>>,
}

#[derive(Default)]
pub struct InMemoryEventStore {
    log: RwLock<AuditLog>,
}

impl InMemoryEventStore {
    pub async fn last_sequence(&self) -> i64 {
        self.log.read().await.last_sequence
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, stream_id: Uuid, event: DomainEvent) -> anyhow::Result<EventEnvelope> {
        // Sequence allocation and push share one guard so streams stay gap-free in order.
        let mut log = self.log.write().await;
        log.last_sequence += 1;

        let envelope = EventEnvelope {
            sequence: log.last_sequence,
            stream_id,
            event,
            stored_at: Utc::now(),
        };
        log.streams
            .entry(stream_id)
            .or_default()
            .push(envelope.clone());

        Ok(envelope)
    }

    async fn stream(&self, stream_id: Uuid) -> anyhow::Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        Ok(log.streams.get(&stream_id).cloned().unwrap_or_default())
    }
}
