//! Periodic promotion of IN_PROGRESS orders to COMPLETED once their event
//! date has passed.

use chrono::{DateTime, Utc};
use shared::OutboxEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info};

use crate::error::ApiError;
use crate::store::MarketplaceStore;

pub struct CompletionSweeper {
    store: Arc<dyn MarketplaceStore>,
    interval: Duration,
}

impl CompletionSweeper {
    pub fn new(store: Arc<dyn MarketplaceStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            match self.sweep_at(Utc::now()).await {
                Ok(0) => {}
                Ok(completed) => info!("Completed {} past-event orders", completed),
                Err(e) => error!("Error sweeping completed orders: {}", e),
            }
        }
    }

    /// One pass over the snapshot of due orders. The promotion is a
    /// compare-and-set, so concurrent sweeps or manual updates cannot
    /// complete an order twice. A bad record is logged and skipped.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<usize, ApiError> {
        let due = self.store.due_completion_candidates(now).await?;

        let mut completed = 0;
        for order_id in due {
            match self
                .store
                .complete_if_in_progress(order_id, OutboxEvent::order_completed(order_id))
                .await
            {
                Ok(true) => completed += 1,
                Ok(false) => {}
                Err(e) => error!("Failed to complete order {}: {}", order_id, e),
            }
        }

        Ok(completed)
    }
}
