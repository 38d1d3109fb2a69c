use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::cart::session::CartSession;
use crate::pending::store::PendingOrderStore;
use crate::reservation::client::ReservationService;
use crate::reservation::types::{ReleaseReason, ReservationId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// No live reservations; no request sent.
    Nothing,
    Delivered { count: usize },
    Failed { count: usize, error: String },
    /// Still in flight when the deadline passed. The request keeps running
    /// for as long as the runtime does.
    TimedOut { count: usize },
}

#[derive(Debug)]
pub struct ShutdownReport {
    pub flush: FlushOutcome,
    /// Id the cart was parked under; `None` when there was nothing to keep.
    pub parked: Option<Uuid>,
}

/// Last-chance batch release when a terminal shuts down.
///
/// Never fails: the Reservation Service expires whatever is not released
/// here once its TTL runs out.
pub struct LifecycleGuardian {
    service: Arc<dyn ReservationService>,
    flush_timeout: Duration,
}

impl LifecycleGuardian {
    pub fn new(service: Arc<dyn ReservationService>, flush_timeout: Duration) -> Self {
        Self {
            service,
            flush_timeout,
        }
    }

    #[instrument(skip(self, reservation_ids), target = "lifecycle", fields(count = reservation_ids.len()))]
    pub async fn flush(&self, reservation_ids: Vec<ReservationId>) -> FlushOutcome {
        let count = reservation_ids.len();
        if count == 0 {
            return FlushOutcome::Nothing;
        }

        let service = self.service.clone();
        let delivery = tokio::spawn(async move {
            service
                .release_batch(&reservation_ids, ReleaseReason::SessionTerminated)
                .await
        });

        match tokio::time::timeout(self.flush_timeout, delivery).await {
            Ok(Ok(Ok(()))) => {
                info!(count, "reservations released on shutdown");
                FlushOutcome::Delivered { count }
            }
            Ok(Ok(Err(e))) => {
                warn!(error = %e, count, "shutdown release failed; reservations left to expire");
                FlushOutcome::Failed {
                    count,
                    error: e.to_string(),
                }
            }
            Ok(Err(join)) => {
                warn!(error = %join, count, "shutdown release task aborted");
                FlushOutcome::Failed {
                    count,
                    error: join.to_string(),
                }
            }
            Err(_) => {
                warn!(
                    count,
                    timeout_ms = self.flush_timeout.as_millis() as u64,
                    "shutdown release not acknowledged in time"
                );
                FlushOutcome::TimedOut { count }
            }
        }
    }

    /// Releases everything `session` still holds.
    pub async fn on_terminate(&self, session: &CartSession) -> FlushOutcome {
        self.flush(session.active_reservation_ids()).await
    }

    /// Releases what `session` holds, then parks its cart so the next start
    /// can restore it. Only parking can fail.
    #[instrument(skip_all, target = "lifecycle", fields(session_id = %session.session_id()))]
    pub async fn park_on_shutdown(
        &self,
        session: &CartSession,
        store: &PendingOrderStore,
    ) -> anyhow::Result<ShutdownReport> {
        let flush = self.on_terminate(session).await;
        if session.is_empty() {
            return Ok(ShutdownReport {
                flush,
                parked: None,
            });
        }

        let pending = session.pause().await;
        store
            .park(&pending)
            .await
            .with_context(|| format!("failed to park cart {} on shutdown", pending.session_id))?;

        Ok(ShutdownReport {
            flush,
            parked: Some(pending.session_id),
        })
    }
}
