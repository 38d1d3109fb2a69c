use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::pending::model::{PendingOrder, PendingOrderSummary};

#[async_trait]
pub trait PendingOrderRepository: Send + Sync {
    /// Insert or replace the snapshot for `order.session_id`.
    async fn save(&self, order: &PendingOrder) -> Result<()>;

    async fn fetch_by_id(&self, session_id: &Uuid) -> Result<Option<PendingOrder>>;

    async fn delete(&self, session_id: &Uuid) -> Result<()>;

    /// Most recently paused first.
    async fn list(&self, limit: usize) -> Result<Vec<PendingOrderSummary>>;
}
