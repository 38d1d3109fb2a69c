use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::logger::warn_if_slow;
use crate::pending::model::{PendingOrder, PendingOrderSummary};
use crate::pending::repository::PendingOrderRepository;

/// Terminal-facing store for parked carts, keyed by session id.
pub struct PendingOrderStore {
    repo: Arc<dyn PendingOrderRepository>,
}

impl PendingOrderStore {
    pub fn new(repo: Arc<dyn PendingOrderRepository>) -> Self {
        Self { repo }
    }

    #[instrument(skip(self, order), target = "store", fields(session_id = %order.session_id, items = order.item_count()))]
    pub async fn park(&self, order: &PendingOrder) -> Result<()> {
        warn_if_slow("db_park", Duration::from_millis(50), async {
            self.repo.save(order).await
        })
        .await
        .context("failed to persist pending order")?;

        info!("cart parked");
        Ok(())
    }

    /// Loads and removes the snapshot, so a parked cart is restored at most once.
    #[instrument(skip(self), target = "store", fields(session_id = %session_id))]
    pub async fn take(&self, session_id: &Uuid) -> Result<Option<PendingOrder>> {
        let order = warn_if_slow("db_fetch_pending", Duration::from_millis(100), async {
            self.repo.fetch_by_id(session_id).await
        })
        .await
        .context("repository fetch failed")?;

        let Some(order) = order else {
            debug!("no parked cart for session");
            return Ok(None);
        };

        self.repo
            .delete(session_id)
            .await
            .context("failed to delete pending order after load")?;

        info!(items = order.item_count(), "parked cart taken");
        Ok(Some(order))
    }

    #[instrument(skip(self), target = "store")]
    pub async fn list(&self, limit: usize) -> Result<Vec<PendingOrderSummary>> {
        warn_if_slow("db_list_pending", Duration::from_millis(100), async {
            self.repo.list(limit).await
        })
        .await
        .context("failed to list pending orders")
    }
}
