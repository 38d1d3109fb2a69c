//! Reservation protocol used by the cart session and the promotion evaluator.
//!
//! The coordinator owns no state of its own: handles live on the line items
//! that created them and are passed in and out of every call. What it owns is
//! the *order of operations* against the Reservation Service:
//!
//! - reserve before any local state changes
//! - release is idempotent and best-effort (TTL is the fallback)
//! - quantity changes never release capacity before the replacement is held,
//!   except as an explicit fallback when the lot is fully claimed

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::error::CheckoutError;
use crate::logger::warn_if_slow;
use crate::metrics::counters::Counters;
use crate::reservation::client::ReservationService;
use crate::reservation::types::{
    ReleaseReason, ReleaseReport, ReservationHandle, ReservationId, ReservationStatus,
    live_quantity,
};

/// A failed `adjust_quantity`, together with the handles still held afterwards.
///
/// On the normal failure paths `held` is exactly the live input set. Only a
/// lost fallback race leaves it short of the caller's previous quantity.
#[derive(Debug)]
pub struct AdjustFailure {
    pub error: CheckoutError,
    pub held: Vec<ReservationHandle>,
}

enum Released {
    Called,
    Skipped,
}

pub struct ReservationCoordinator {
    service: Arc<dyn ReservationService>,
    counters: Counters,
}

impl ReservationCoordinator {
    pub fn new(service: Arc<dyn ReservationService>, counters: Counters) -> Self {
        Self { service, counters }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    #[instrument(skip(self, actor_id), target = "reservation", fields(lot_id = %lot_id))]
    pub async fn reserve(
        &self,
        lot_id: &str,
        quantity: u32,
        actor_id: &str,
    ) -> Result<ReservationHandle, CheckoutError> {
        if quantity == 0 {
            return Err(CheckoutError::InvalidQuantity(0));
        }

        let res = warn_if_slow(
            "reservation_reserve",
            Duration::from_millis(300),
            self.service.reserve(lot_id, quantity, actor_id),
        )
        .await;

        match res {
            Ok(handle) => {
                Counters::incr(&self.counters.reservations_acquired);
                debug!(reservation_id = %handle.reservation_id, "reserved");
                Ok(handle)
            }
            Err(e) => {
                let e = CheckoutError::from(e);
                if e.is_insufficient_stock() {
                    Counters::incr(&self.counters.stock_conflicts);
                }
                warn!(error = %e, "reserve rejected");
                Err(e)
            }
        }
    }

    /// Releases one handle and marks it `Released`.
    ///
    /// Terminal or expired handles succeed without a network call.
    #[instrument(skip(self, handle), target = "reservation", fields(reservation_id = %handle.reservation_id, reason = %reason))]
    pub async fn release(
        &self,
        handle: &mut ReservationHandle,
        reason: ReleaseReason,
    ) -> Result<(), CheckoutError> {
        self.release_one(handle, reason).await.map(|_| ())
    }

    async fn release_one(
        &self,
        handle: &mut ReservationHandle,
        reason: ReleaseReason,
    ) -> Result<Released, CheckoutError> {
        if handle.status != ReservationStatus::Active {
            return Ok(Released::Skipped);
        }
        if !handle.is_live(Utc::now()) {
            // The server has already returned the capacity.
            handle.status = ReservationStatus::Expired;
            return Ok(Released::Skipped);
        }

        match self.service.release(&handle.reservation_id, reason).await {
            Ok(()) => {
                handle.status = ReservationStatus::Released;
                Counters::incr(&self.counters.reservations_released);
                Ok(Released::Called)
            }
            Err(e) => {
                Counters::incr(&self.counters.release_failures);
                Err(CheckoutError::ReleaseFailure {
                    reservation_id: handle.reservation_id.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Best-effort release of every handle. Failures are logged and never
    /// abort the remaining releases.
    #[instrument(skip(self, handles), target = "reservation", fields(count = handles.len(), reason = %reason))]
    pub async fn release_all(
        &self,
        handles: &mut [ReservationHandle],
        reason: ReleaseReason,
    ) -> ReleaseReport {
        let results = join_all(
            handles
                .iter_mut()
                .map(|h| async move { self.release_one(h, reason).await }),
        )
        .await;

        let mut report = ReleaseReport::default();
        for (h, res) in handles.iter().zip(results) {
            match res {
                Ok(Released::Called) => report.released.push(h.reservation_id.clone()),
                Ok(Released::Skipped) => report.skipped.push(h.reservation_id.clone()),
                Err(e) => {
                    warn!(error = %e, "release failed; relying on TTL expiry");
                    report.failed.push(h.reservation_id.clone());
                }
            }
        }

        report
    }

    /// Moves a line's reservation to `new_quantity` units of `lot_id`.
    ///
    /// - increase: reserve only the delta; nothing is released
    /// - decrease: reserve the new total first, then release the old handles
    /// - decrease on an exhausted lot: release first, then reserve (may lose
    ///   the freed capacity to another terminal)
    #[instrument(skip(self, held, actor_id), target = "reservation", fields(lot_id = %lot_id))]
    pub async fn adjust_quantity(
        &self,
        lot_id: &str,
        held: Vec<ReservationHandle>,
        new_quantity: u32,
        actor_id: &str,
    ) -> Result<Vec<ReservationHandle>, AdjustFailure> {
        let now = Utc::now();
        let mut live: Vec<ReservationHandle> =
            held.into_iter().filter(|h| h.is_live(now)).collect();
        let current = live_quantity(&live, now);

        if new_quantity == current {
            return Ok(live);
        }

        if new_quantity > current {
            return match self.reserve(lot_id, new_quantity - current, actor_id).await {
                Ok(h) => {
                    live.push(h);
                    Ok(live)
                }
                Err(error) => Err(AdjustFailure { error, held: live }),
            };
        }

        if new_quantity == 0 {
            self.release_all(&mut live, ReleaseReason::QuantityChanged)
                .await;
            return Ok(Vec::new());
        }

        match self.reserve(lot_id, new_quantity, actor_id).await {
            Ok(h) => {
                self.release_all(&mut live, ReleaseReason::QuantityChanged)
                    .await;
                Ok(vec![h])
            }
            Err(e) if e.is_insufficient_stock() => {
                Counters::incr(&self.counters.adjust_fallbacks);
                info!(
                    current,
                    "lot exhausted; falling back to release-then-reserve"
                );

                self.release_all(&mut live, ReleaseReason::QuantityChanged)
                    .await;

                match self.reserve(lot_id, new_quantity, actor_id).await {
                    Ok(h) => Ok(vec![h]),
                    Err(error) => {
                        warn!(error = %error, "capacity lost between release and re-reserve");
                        let held = live
                            .into_iter()
                            .filter(|h| h.status == ReservationStatus::Active)
                            .collect();
                        Err(AdjustFailure { error, held })
                    }
                }
            }
            Err(error) => Err(AdjustFailure { error, held: live }),
        }
    }

    /// Commits reservations the Order Service left uncommitted.
    #[instrument(skip(self, reservation_ids), target = "reservation", fields(count = reservation_ids.len(), order_id = %order_id))]
    pub async fn commit(
        &self,
        reservation_ids: &[ReservationId],
        order_id: &str,
    ) -> Result<(), CheckoutError> {
        if reservation_ids.is_empty() {
            return Ok(());
        }

        self.service
            .commit(reservation_ids, order_id)
            .await
            .map_err(|e| CheckoutError::CommitFailure(e.to_string()))?;

        Counters::add(
            &self.counters.reservations_committed,
            reservation_ids.len() as u64,
        );
        Ok(())
    }
}

/// Local bookkeeping once the server has committed the handles.
pub fn mark_committed(handles: &mut [ReservationHandle]) {
    let now = Utc::now();
    for h in handles.iter_mut().filter(|h| h.is_live(now)) {
        h.status = ReservationStatus::Committed;
    }
}
