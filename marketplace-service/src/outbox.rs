//! Outbox drain for notification hooks. State changes enqueue events in the
//! same transaction that commits them; this processor delivers them to a
//! `Notifier` and marks them processed. Delivery mechanics (email, push) live
//! outside this service, so the default notifier just logs.

use async_trait::async_trait;
use shared::OutboxEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info};

use crate::error::ApiError;
use crate::store::MarketplaceStore;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, event: &OutboxEvent) -> anyhow::Result<()>;
}

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, event: &OutboxEvent) -> anyhow::Result<()> {
        info!(
            "notification hook {} for order {}: {}",
            event.event_type, event.aggregate_id, event.event_data
        );
        Ok(())
    }
}

pub struct OutboxProcessor {
    store: Arc<dyn MarketplaceStore>,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
}

impl OutboxProcessor {
    pub fn new(
        store: Arc<dyn MarketplaceStore>,
        notifier: Arc<dyn Notifier>,
        interval: Duration,
    ) -> Self {
        Self { store, notifier, interval }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.drain().await {
                error!("Error processing outbox events: {}", e);
            }
        }
    }

    pub async fn drain(&self) -> Result<usize, ApiError> {
        let events = self.store.unprocessed_events(100).await?;

        let mut delivered = 0;
        for event in events {
            if let Err(e) = self.notifier.deliver(&event).await {
                error!("Failed to deliver event {}: {}", event.id, e);
                continue;
            }
            self.store.mark_event_processed(event.id).await?;
            delivered += 1;
        }

        Ok(delivered)
    }
}
