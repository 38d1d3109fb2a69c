//! In-memory collaborators for driving a cart session without a network.
//!
//! Available to unit tests and, through the `test-utils` feature, to the
//! integration tests under `tests/`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::cart::model::ProductId;
use crate::error::ServiceError;
use crate::order::client::OrderService;
use crate::order::types::{CreateOrderRequest, CreateOrderResponse};
use crate::pending::model::{PendingOrder, PendingOrderSummary};
use crate::pending::repository::PendingOrderRepository;
use crate::promotion::catalog::PromotionCatalog;
use crate::promotion::types::PromotionRule;
use crate::reservation::client::ReservationService;
use crate::reservation::types::{ReleaseReason, ReservationHandle, ReservationId, ReservationStatus};

#[derive(Clone)]
struct Held {
    lot_id: String,
    quantity: u32,
    committed: bool,
}

#[derive(Default)]
struct LotBook {
    available: HashMap<String, u32>,
    held: HashMap<ReservationId, Held>,
    failing_releases: HashSet<ReservationId>,
    committed: Vec<ReservationId>,
    batches: Vec<(Vec<ReservationId>, ReleaseReason)>,
    calls: Vec<String>,
}

/// A single shared stock counter per lot, as the real service keeps.
///
/// `claim` simulates another terminal taking capacity behind this one's back.
pub struct InMemoryReservationService {
    book: Mutex<LotBook>,
    ttl: ChronoDuration,
    batch_unavailable: AtomicBool,
}

impl Default for InMemoryReservationService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryReservationService {
    pub fn new() -> Self {
        Self::with_ttl(ChronoDuration::minutes(15))
    }

    /// A negative TTL hands out handles that are already expired.
    pub fn with_ttl(ttl: ChronoDuration) -> Self {
        Self {
            book: Mutex::new(LotBook::default()),
            ttl,
            batch_unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_stock(&self, lot_id: &str, quantity: u32) {
        self.book.lock().available.insert(lot_id.to_string(), quantity);
    }

    pub fn available(&self, lot_id: &str) -> u32 {
        self.book.lock().available.get(lot_id).copied().unwrap_or(0)
    }

    /// Takes capacity directly, as a concurrent terminal would.
    pub fn claim(&self, lot_id: &str, quantity: u32) {
        let mut book = self.book.lock();
        let slot = book.available.entry(lot_id.to_string()).or_insert(0);
        *slot = slot.saturating_sub(quantity);
    }

    pub fn fail_release_of(&self, reservation_id: &str) {
        self.book
            .lock()
            .failing_releases
            .insert(reservation_id.to_string());
    }

    pub fn fail_batch_release(&self) {
        self.batch_unavailable.store(true, Ordering::SeqCst);
    }

    /// Number of single `release` calls that reached the service.
    pub fn release_calls(&self) -> usize {
        self.book
            .lock()
            .calls
            .iter()
            .filter(|c| c.starts_with("release:"))
            .count()
    }

    pub fn reserve_calls(&self) -> usize {
        self.book
            .lock()
            .calls
            .iter()
            .filter(|c| c.starts_with("reserve:"))
            .count()
    }

    /// `reserve:{qty}`, `release:{id}`, `release_batch:{n}` and `commit:{n}`, in call order.
    pub fn call_log(&self) -> Vec<String> {
        self.book.lock().calls.clone()
    }

    pub fn committed_ids(&self) -> Vec<ReservationId> {
        self.book.lock().committed.clone()
    }

    pub fn batches(&self) -> Vec<(Vec<ReservationId>, ReleaseReason)> {
        self.book.lock().batches.clone()
    }

    /// Units currently held (not committed) against `lot_id`.
    pub fn held_on(&self, lot_id: &str) -> u32 {
        self.book
            .lock()
            .held
            .values()
            .filter(|h| h.lot_id == lot_id && !h.committed)
            .map(|h| h.quantity)
            .sum()
    }

    fn return_capacity(book: &mut LotBook, reservation_id: &str) {
        let Some(held) = book.held.get(reservation_id).cloned() else {
            return;
        };
        if held.committed {
            return;
        }
        book.held.remove(reservation_id);
        *book.available.entry(held.lot_id).or_insert(0) += held.quantity;
    }
}

#[async_trait]
impl ReservationService for InMemoryReservationService {
    async fn reserve(
        &self,
        lot_id: &str,
        quantity: u32,
        _actor_id: &str,
    ) -> Result<ReservationHandle, ServiceError> {
        let mut book = self.book.lock();
        book.calls.push(format!("reserve:{quantity}"));

        let available = book.available.get(lot_id).copied().unwrap_or(0);
        if available < quantity {
            return Err(ServiceError::InsufficientStock {
                lot_id: lot_id.to_string(),
                requested: quantity,
                available: Some(available),
            });
        }
        book.available.insert(lot_id.to_string(), available - quantity);

        let reservation_id = format!("RSV-{}", Uuid::new_v4().simple());
        book.held.insert(
            reservation_id.clone(),
            Held {
                lot_id: lot_id.to_string(),
                quantity,
                committed: false,
            },
        );

        let now = Utc::now();
        Ok(ReservationHandle {
            reservation_id,
            lot_id: lot_id.to_string(),
            quantity,
            status: ReservationStatus::Active,
            reserved_at: now,
            expires_at: now + self.ttl,
        })
    }

    async fn release(&self, reservation_id: &str, _reason: ReleaseReason) -> Result<(), ServiceError> {
        let mut book = self.book.lock();
        book.calls.push(format!("release:{reservation_id}"));

        if book.failing_releases.contains(reservation_id) {
            return Err(ServiceError::UnexpectedStatus {
                endpoint: "reservations/release",
                status: 503,
                body: "unavailable".into(),
            });
        }
        Self::return_capacity(&mut book, reservation_id);
        Ok(())
    }

    async fn release_batch(
        &self,
        reservation_ids: &[ReservationId],
        reason: ReleaseReason,
    ) -> Result<(), ServiceError> {
        let mut book = self.book.lock();
        book.calls.push(format!("release_batch:{}", reservation_ids.len()));

        if self.batch_unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::UnexpectedStatus {
                endpoint: "reservations/release-batch",
                status: 503,
                body: "unavailable".into(),
            });
        }
        for id in reservation_ids {
            Self::return_capacity(&mut book, id);
        }
        book.batches.push((reservation_ids.to_vec(), reason));
        Ok(())
    }

    async fn commit(&self, reservation_ids: &[ReservationId], _order_id: &str) -> Result<(), ServiceError> {
        let mut book = self.book.lock();
        book.calls.push(format!("commit:{}", reservation_ids.len()));

        for id in reservation_ids {
            if let Some(h) = book.held.get_mut(id) {
                h.committed = true;
            }
            book.committed.push(id.clone());
        }
        Ok(())
    }
}

/// Fixed promotion table; unknown products have no promotion.
#[derive(Default)]
pub struct StaticPromotionCatalog {
    rules: Mutex<HashMap<ProductId, PromotionRule>>,
    unavailable: AtomicBool,
}

impl StaticPromotionCatalog {
    pub fn with_rule(self, product_id: &str, rule: PromotionRule) -> Self {
        self.rules.lock().insert(product_id.to_string(), rule);
        self
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl PromotionCatalog for StaticPromotionCatalog {
    async fn active_promotion_for(
        &self,
        product_id: &str,
    ) -> Result<Option<PromotionRule>, ServiceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::InvalidResponse("catalog offline".into()));
        }
        Ok(self.rules.lock().get(product_id).cloned())
    }
}

/// Accepts orders and records every request it saw.
///
/// By default the service reports reservations as committed; the
/// reservation fake is not touched unless `leave_commit_to_caller` is set.
#[derive(Default)]
pub struct RecordingOrderService {
    requests: Mutex<Vec<CreateOrderRequest>>,
    failing: AtomicBool,
    leave_commit: AtomicBool,
}

impl RecordingOrderService {
    pub fn fail_next_orders(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn leave_commit_to_caller(&self, leave: bool) {
        self.leave_commit.store(leave, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<CreateOrderRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl OrderService for RecordingOrderService {
    async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<CreateOrderResponse, ServiceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ServiceError::UnexpectedStatus {
                endpoint: "orders",
                status: 500,
                body: "order service down".into(),
            });
        }

        let mut requests = self.requests.lock();
        requests.push(request.clone());

        let total: i64 = request
            .items
            .iter()
            .map(|i| i64::from(i.quantity) * i.unit_price)
            .sum();

        Ok(CreateOrderResponse {
            order_id: format!("ORD-{}", requests.len()),
            order_date: Utc::now(),
            total_amount: total,
            change_returned: (request.amount_given - total).max(0),
            rounding_adjustment: 0,
            points_earned: 0,
            reservations_committed: !self.leave_commit.load(Ordering::SeqCst),
        })
    }
}

#[derive(Default)]
pub struct InMemoryPendingOrderRepository {
    rows: Mutex<HashMap<Uuid, PendingOrder>>,
}

impl InMemoryPendingOrderRepository {
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

#[async_trait]
impl PendingOrderRepository for InMemoryPendingOrderRepository {
    async fn save(&self, order: &PendingOrder) -> anyhow::Result<()> {
        self.rows.lock().insert(order.session_id, order.clone());
        Ok(())
    }

    async fn fetch_by_id(&self, session_id: &Uuid) -> anyhow::Result<Option<PendingOrder>> {
        Ok(self.rows.lock().get(session_id).cloned())
    }

    async fn delete(&self, session_id: &Uuid) -> anyhow::Result<()> {
        self.rows.lock().remove(session_id);
        Ok(())
    }

    async fn list(&self, limit: usize) -> anyhow::Result<Vec<PendingOrderSummary>> {
        let mut rows: Vec<PendingOrderSummary> = self
            .rows
            .lock()
            .values()
            .map(|o| PendingOrderSummary {
                session_id: o.session_id,
                label: o.label.clone(),
                created_at: o.created_at,
                paused_at: o.paused_at,
            })
            .collect();
        rows.sort_by(|a, b| b.paused_at.cmp(&a.paused_at));
        rows.truncate(limit);
        Ok(rows)
    }
}
