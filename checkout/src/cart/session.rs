//! The cart aggregate for one terminal.
//!
//! Every mutation follows the same order: reserve against the lot, apply the
//! result locally, then run one promotion pass. Lock discipline:
//!
//! - `state` is a plain mutex and is never held across an await
//! - a per-`(product, lot)` async lock serializes in-flight reservation calls
//!   for the same paid line; unrelated lines proceed concurrently
//! - `mutation_gate` is taken shared by line mutations and exclusively by
//!   whole-cart operations (clear, checkout, pause, restore)
//! - `promotion_gate` makes evaluator passes strictly sequential

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::cart::model::{Customer, LineId, LineItem, LineKey, Lot, PaymentMethod, Product};
use crate::error::CheckoutError;
use crate::logger::warn_if_slow;
use crate::metrics::counters::Counters;
use crate::order::client::OrderService;
use crate::order::types::{CreateOrderRequest, OrderItem, Receipt};
use crate::pending::model::PendingOrder;
use crate::pricing::{DiscountRule, Money, Totals, compute_totals, settle};
use crate::promotion::catalog::PromotionCatalog;
use crate::promotion::evaluator::PromotionEvaluator;
use crate::promotion::types::{PromotionKind, PromotionRule, SyncOutcome, entitlement};
use crate::reservation::coordinator::{ReservationCoordinator, mark_committed};
use crate::reservation::types::{ReleaseReason, ReleaseReport, ReservationHandle, ReservationId};

/// Result of a successful line mutation.
#[derive(Debug)]
pub struct Mutation {
    pub line_id: LineId,
    /// Quantity the line ended up with; zero once removed. May be below the
    /// requested quantity when clamped to the lot's known stock.
    pub quantity: u32,
    /// Changes (and degraded outcomes) of the promotion pass that followed.
    pub promotions: Vec<SyncOutcome>,
}

#[derive(Debug, Default)]
pub struct ReacquireReport {
    pub reacquired: Vec<LineId>,
    /// Lines left in the cart without full cover, flagged for the cashier.
    pub failed: Vec<(LineId, CheckoutError)>,
}

impl ReacquireReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct RestoreReport {
    pub reservations: ReacquireReport,
    pub promotions: Vec<SyncOutcome>,
}

struct CartState {
    /// Identity of the sale in progress; renewed whenever the cart is
    /// checked out, cleared or parked.
    session_id: Uuid,
    created_at: DateTime<Utc>,
    items: Vec<LineItem>,
    customer: Customer,
    payment_method: Option<PaymentMethod>,
    discount: DiscountRule,
    cash_tendered: Money,
}

impl CartState {
    fn fresh() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            created_at: Utc::now(),
            items: Vec::new(),
            customer: Customer::default(),
            payment_method: None,
            discount: DiscountRule::default(),
            cash_tendered: 0,
        }
    }
}

pub struct CartSession {
    label: String,
    /// Staff member reservations are made for. Without one the terminal
    /// sells without reserving.
    actor_id: Option<String>,

    state: Mutex<CartState>,
    line_locks: Mutex<HashMap<LineKey, Arc<AsyncMutex<()>>>>,
    mutation_gate: RwLock<()>,
    promotion_gate: AsyncMutex<()>,

    coordinator: Arc<ReservationCoordinator>,
    evaluator: PromotionEvaluator,
    catalog: Arc<dyn PromotionCatalog>,
    orders: Arc<dyn OrderService>,
}

impl CartSession {
    pub fn new(
        label: impl Into<String>,
        actor_id: Option<String>,
        coordinator: Arc<ReservationCoordinator>,
        catalog: Arc<dyn PromotionCatalog>,
        orders: Arc<dyn OrderService>,
    ) -> Self {
        Self {
            label: label.into(),
            actor_id,
            state: Mutex::new(CartState::fresh()),
            line_locks: Mutex::new(HashMap::new()),
            mutation_gate: RwLock::new(()),
            promotion_gate: AsyncMutex::new(()),
            evaluator: PromotionEvaluator::new(coordinator.clone()),
            coordinator,
            catalog,
            orders,
        }
    }

    /// Id of the sale in progress. Changes after checkout, clear and pause.
    pub fn session_id(&self) -> Uuid {
        self.state.lock().session_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.state.lock().created_at
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }

    pub fn counters(&self) -> &Counters {
        self.coordinator.counters()
    }

    pub fn items(&self) -> Vec<LineItem> {
        self.state.lock().items.clone()
    }

    pub fn line(&self, line_id: LineId) -> Option<LineItem> {
        self.state
            .lock()
            .items
            .iter()
            .find(|l| l.id == line_id)
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Lines the cashier has to look at before checkout.
    pub fn needs_attention(&self) -> Vec<LineId> {
        self.state
            .lock()
            .items
            .iter()
            .filter(|l| l.needs_attention)
            .map(|l| l.id)
            .collect()
    }

    pub fn customer(&self) -> Customer {
        self.state.lock().customer.clone()
    }

    pub fn set_customer(&self, customer: Customer) {
        self.state.lock().customer = customer;
    }

    pub fn set_payment_method(&self, payment_method: Option<PaymentMethod>) {
        self.state.lock().payment_method = payment_method;
    }

    pub fn set_discount(&self, discount: DiscountRule) {
        self.state.lock().discount = discount;
    }

    pub fn set_cash_tendered(&self, cash_tendered: Money) {
        self.state.lock().cash_tendered = cash_tendered;
    }

    pub fn cash_tendered(&self) -> Money {
        self.state.lock().cash_tendered
    }

    /// Totals for the cart as it stands.
    pub fn totals(&self) -> Totals {
        let s = self.state.lock();
        compute_totals(&s.items, &s.discount, s.payment_method, &s.customer)
    }

    /// Ids of every reservation still live on the server's clock as far as
    /// this terminal knows.
    pub fn active_reservation_ids(&self) -> Vec<ReservationId> {
        let now = Utc::now();
        self.state
            .lock()
            .items
            .iter()
            .flat_map(|l| l.reservations.iter())
            .filter(|h| h.is_live(now))
            .map(|h| h.reservation_id.clone())
            .collect()
    }

    /// Adds `quantity` units of `product` from `lot`.
    ///
    /// A line for the same `(product, lot)` is merged into by reserving only
    /// the extra units. If the reservation fails the cart is left untouched.
    #[instrument(
        skip(self, product, lot),
        target = "cart",
        fields(session_id = %self.session_id(), product_id = %product.product_id)
    )]
    pub async fn add_item(
        &self,
        product: &Product,
        lot: Option<&Lot>,
        quantity: u32,
    ) -> Result<Mutation, CheckoutError> {
        let Some(lot) = lot else {
            return Err(CheckoutError::MissingLotReference {
                product_id: product.product_id.clone(),
            });
        };
        if quantity == 0 {
            return Err(CheckoutError::InvalidQuantity(0));
        }

        let _gate = self.mutation_gate.read().await;
        let key = LineKey {
            product_id: product.product_id.clone(),
            lot_id: lot.lot_id.clone(),
        };
        let lock = self.line_lock(&key);

        let (line_id, line_quantity) = {
            let _line = lock.lock().await;

            let existing = self.find_by_key(&key);
            let promotion = match existing {
                Some(_) => None,
                None => self.lookup_promotion(&product.product_id).await,
            };

            let handle = match self.actor_id.as_deref() {
                Some(actor) => Some(self.coordinator.reserve(&lot.lot_id, quantity, actor).await?),
                None => None,
            };

            let mut s = self.state.lock();
            let idx = existing.and_then(|id| s.items.iter().position(|l| l.id == id));
            match idx {
                Some(i) => {
                    let line = &mut s.items[i];
                    line.quantity = line.quantity.saturating_add(quantity);
                    line.lot_quantity = Some(lot.known_quantity);
                    line.reservations.extend(handle);
                    debug!(line_id = %line.id, total = line.quantity, "merged into existing line");
                    (line.id, line.quantity)
                }
                None => {
                    let line = new_line(product, lot, quantity, promotion, handle);
                    let out = (line.id, line.quantity);
                    s.items.push(line);
                    out
                }
            }
        };

        let promotions = self.sync_promotions().await;
        Ok(Mutation {
            line_id,
            quantity: line_quantity,
            promotions,
        })
    }

    /// Moves a paid line to `new_quantity`, clamped to the lot's known stock.
    ///
    /// Free units drawn from the same lot count against that stock, including
    /// the ones the new quantity would earn. Zero removes the line. On failure the line keeps its quantity.
    #[instrument(skip(self), target = "cart", fields(session_id = %self.session_id(), line_id = %line_id))]
    pub async fn update_quantity(
        &self,
        line_id: LineId,
        new_quantity: u32,
    ) -> Result<Mutation, CheckoutError> {
        if new_quantity == 0 {
            return self.remove_item(line_id).await;
        }

        let _gate = self.mutation_gate.read().await;
        let key = self.paid_line_key(line_id)?;
        let Some(key) = key else {
            let product_id = self
                .line(line_id)
                .map(|l| l.product_id)
                .unwrap_or_default();
            return Err(CheckoutError::MissingLotReference { product_id });
        };
        let lock = self.line_lock(&key);

        let quantity = {
            let _line = lock.lock().await;
            let line = self.line(line_id).ok_or(CheckoutError::LineNotFound(line_id))?;

            let target = match quantity_cap(&self.items(), &line) {
                Some(cap) if new_quantity > cap => {
                    info!(requested = new_quantity, cap, "quantity clamped to lot stock");
                    cap
                }
                _ => new_quantity,
            };
            if target == 0 {
                return Err(CheckoutError::InsufficientStock {
                    lot_id: key.lot_id,
                    requested: new_quantity,
                    available: Some(0),
                });
            }
            if target == line.quantity {
                return Ok(Mutation {
                    line_id,
                    quantity: target,
                    promotions: Vec::new(),
                });
            }

            let reservations = match self.actor_id.as_deref() {
                None => None,
                Some(actor) => {
                    let adjusted = self
                        .coordinator
                        .adjust_quantity(&key.lot_id, line.reservations.clone(), target, actor)
                        .await;
                    match adjusted {
                        Ok(handles) => Some(handles),
                        Err(failure) => {
                            self.with_line(line_id, |l| {
                                l.reservations = failure.held;
                                if !l.is_fully_reserved(Utc::now()) {
                                    l.needs_attention = true;
                                }
                            });
                            return Err(failure.error);
                        }
                    }
                }
            };

            self.with_line(line_id, |l| {
                l.quantity = target;
                if let Some(handles) = reservations {
                    l.reservations = handles;
                    l.needs_attention = false;
                }
            });
            target
        };

        let promotions = self.sync_promotions().await;
        Ok(Mutation {
            line_id,
            quantity,
            promotions,
        })
    }

    /// Removes a paid line and releases what it held. Release failures are
    /// left to TTL expiry.
    #[instrument(skip(self), target = "cart", fields(session_id = %self.session_id(), line_id = %line_id))]
    pub async fn remove_item(&self, line_id: LineId) -> Result<Mutation, CheckoutError> {
        let _gate = self.mutation_gate.read().await;
        let key = self.paid_line_key(line_id)?;
        let lock = key.as_ref().map(|k| self.line_lock(k));
        let _line = match &lock {
            Some(l) => Some(l.lock().await),
            None => None,
        };

        let removed = {
            let mut s = self.state.lock();
            let idx = s
                .items
                .iter()
                .position(|l| l.id == line_id)
                .ok_or(CheckoutError::LineNotFound(line_id))?;
            s.items.remove(idx)
        };

        let mut handles = removed.reservations;
        let report = self
            .coordinator
            .release_all(&mut handles, ReleaseReason::ItemRemoved)
            .await;
        if !report.is_clean() {
            warn!(failed = report.failed.len(), "line removed with unreleased reservations");
        }
        drop(_line);

        let promotions = self.sync_promotions().await;
        Ok(Mutation {
            line_id,
            quantity: 0,
            promotions,
        })
    }

    /// Empties the cart, releasing every reservation best-effort.
    #[instrument(skip(self), target = "cart", fields(session_id = %self.session_id(), reason = %reason))]
    pub async fn clear(&self, reason: ReleaseReason) -> ReleaseReport {
        let _gate = self.mutation_gate.write().await;

        let items = std::mem::replace(&mut *self.state.lock(), CartState::fresh()).items;
        self.line_locks.lock().clear();

        let mut handles: Vec<ReservationHandle> =
            items.into_iter().flat_map(|l| l.reservations).collect();
        let report = self.coordinator.release_all(&mut handles, reason).await;

        info!(
            released = report.released.len(),
            failed = report.failed.len(),
            "cart cleared"
        );
        report
    }

    /// Validates the cart, settles payment and submits the order.
    ///
    /// The Order Service commits the reservations together with the order.
    /// The cart is cleared only when the order is accepted; on any error it
    /// is left intact for a retry.
    #[instrument(
        skip(self, discount),
        target = "cart",
        fields(session_id = %self.session_id(), payment_method = ?payment_method)
    )]
    pub async fn checkout(
        &self,
        payment_method: Option<PaymentMethod>,
        cash_tendered: Money,
        discount: DiscountRule,
    ) -> Result<Receipt, CheckoutError> {
        let _gate = self.mutation_gate.write().await;

        let (session_id, items, customer) = {
            let mut s = self.state.lock();
            s.payment_method = payment_method;
            s.cash_tendered = cash_tendered;
            s.discount = discount.clone();
            (s.session_id, s.items.clone(), s.customer.clone())
        };

        if items.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }
        let payment_method = payment_method.ok_or(CheckoutError::PaymentMethodUnset)?;

        let now = Utc::now();
        let mut order_items = Vec::with_capacity(items.len());
        for line in &items {
            let lot_id = line
                .lot_id
                .clone()
                .ok_or_else(|| CheckoutError::MissingLotReference {
                    product_id: line.product_id.clone(),
                })?;
            if self.actor_id.is_some() && !line.is_fully_reserved(now) {
                return Err(CheckoutError::ReservationUnavailable { line_id: line.id });
            }
            order_items.push(OrderItem::from_line(line, lot_id));
        }

        validate_loyalty(&discount, &customer)?;
        let totals = compute_totals(&items, &discount, Some(payment_method), &customer);
        let settlement = settle(&totals, payment_method, cash_tendered)?;

        let reservation_ids: Vec<ReservationId> = items
            .iter()
            .flat_map(|l| l.reservations.iter())
            .filter(|h| h.is_live(now))
            .map(|h| h.reservation_id.clone())
            .collect();

        let request = CreateOrderRequest {
            staff_id: self.actor_id.clone(),
            customer_id: customer.customer_id().map(str::to_string),
            payment_method,
            amount_given: settlement.amount_given,
            items: order_items,
            discount: (!discount.is_none()).then(|| discount.clone()),
            reservation_ids: reservation_ids.clone(),
        };

        let response = match warn_if_slow(
            "order_create",
            Duration::from_secs(2),
            self.orders.create_order(&request),
        )
        .await
        {
            Ok(r) => r,
            Err(e) => {
                Counters::incr(&self.counters().commit_failures);
                error!(error = %e, "order submission failed; cart kept for retry");
                return Err(CheckoutError::CommitFailure(e.to_string()));
            }
        };

        if !response.reservations_committed {
            if let Err(e) = self
                .coordinator
                .commit(&reservation_ids, &response.order_id)
                .await
            {
                // The order exists; uncommitted reservations lapse at TTL.
                Counters::incr(&self.counters().commit_failures);
                error!(error = %e, order_id = %response.order_id, "reservation commit failed after order creation");
            }
        }

        let mut items = items;
        for line in &mut items {
            mark_committed(&mut line.reservations);
        }

        *self.state.lock() = CartState::fresh();
        self.line_locks.lock().clear();
        Counters::incr(&self.counters().orders_committed);
        info!(order_id = %response.order_id, payable = totals.payable, "order committed");

        Ok(Receipt {
            session_id,
            order_id: response.order_id,
            order_date: response.order_date,
            customer,
            items,
            totals,
            settlement,
            total_amount: response.total_amount,
            change_returned: response.change_returned,
            rounding_adjustment: response.rounding_adjustment,
            points_earned: response.points_earned,
        })
    }

    /// Snapshots and empties the cart without releasing anything; what was
    /// held lapses at TTL and is re-acquired on restore.
    #[instrument(skip(self), target = "cart", fields(session_id = %self.session_id()))]
    pub async fn pause(&self) -> PendingOrder {
        let _gate = self.mutation_gate.write().await;

        let state = std::mem::replace(&mut *self.state.lock(), CartState::fresh());
        self.line_locks.lock().clear();

        let abandoned = state
            .items
            .iter()
            .map(|l| l.reservations.len())
            .sum::<usize>();
        info!(items = state.items.len(), abandoned, "cart paused");

        PendingOrder::new(
            state.session_id,
            self.label.clone(),
            state.items,
            state.customer,
            state.payment_method,
            state.discount,
            state.created_at,
        )
    }

    /// Loads a parked cart into this (empty) session.
    ///
    /// The session takes over the parked sale's id and creation time, so
    /// parking it again replaces the same snapshot.
    /// Every paid line gets a fresh reservation; lines that cannot be covered
    /// stay in the cart flagged for attention. Free items are re-derived.
    #[instrument(skip(self, pending), target = "cart", fields(session_id = %self.session_id(), pending_session = %pending.session_id))]
    pub async fn restore(&self, pending: PendingOrder) -> Result<RestoreReport, CheckoutError> {
        let _gate = self.mutation_gate.write().await;

        {
            let mut s = self.state.lock();
            if !s.items.is_empty() {
                return Err(CheckoutError::CartNotEmpty);
            }
            s.items = pending
                .items
                .into_iter()
                .filter(|l| !l.is_free_item)
                .map(|mut l| {
                    l.reservations.clear();
                    l.needs_attention = true;
                    l
                })
                .collect();
            s.session_id = pending.session_id;
            s.created_at = pending.created_at;
            s.customer = pending.customer;
            s.payment_method = pending.payment_method;
            s.discount = pending.discount;
        }

        let reservations = self.reacquire().await;
        let promotions = self.sync_promotions().await;

        info!(
            reacquired = reservations.reacquired.len(),
            flagged = reservations.failed.len(),
            "pending order restored"
        );
        Ok(RestoreReport {
            reservations,
            promotions,
        })
    }

    /// Retries reservations for every line not fully covered.
    #[instrument(skip(self), target = "cart", fields(session_id = %self.session_id()))]
    pub async fn reacquire_reservations(&self) -> ReacquireReport {
        let _gate = self.mutation_gate.read().await;
        self.reacquire().await
    }

    async fn reacquire(&self) -> ReacquireReport {
        // Free items are rewritten by evaluator passes; hold them off.
        let _pass = self.promotion_gate.lock().await;
        let mut report = ReacquireReport::default();

        let Some(actor) = self.actor_id.as_deref() else {
            for line in self.state.lock().items.iter_mut() {
                line.needs_attention = false;
            }
            return report;
        };

        let now = Utc::now();
        let candidates: Vec<(LineId, Option<LineKey>)> = self
            .state
            .lock()
            .items
            .iter()
            .filter(|l| l.needs_attention || !l.is_fully_reserved(now))
            .map(|l| (l.id, l.key()))
            .collect();

        for (line_id, key) in candidates {
            let lock = key.as_ref().map(|k| self.line_lock(k));
            let _line = match &lock {
                Some(l) => Some(l.lock().await),
                None => None,
            };
            let Some(line) = self.line(line_id) else {
                continue;
            };

            match self.cover_line(&line, actor).await {
                Ok(handle) => {
                    self.with_line(line_id, |l| {
                        let now = Utc::now();
                        l.reservations.retain(|h| h.is_live(now));
                        l.reservations.extend(handle);
                        l.needs_attention = false;
                    });
                    report.reacquired.push(line_id);
                }
                Err(e) => {
                    warn!(line_id = %line_id, error = %e, "line left without reservation");
                    self.with_line(line_id, |l| l.needs_attention = true);
                    report.failed.push((line_id, e));
                }
            }
        }

        report
    }

    /// Reserves whatever part of `line` is not covered by live handles.
    async fn cover_line(
        &self,
        line: &LineItem,
        actor: &str,
    ) -> Result<Option<ReservationHandle>, CheckoutError> {
        let lot_id = line
            .lot_id
            .as_deref()
            .ok_or_else(|| CheckoutError::MissingLotReference {
                product_id: line.product_id.clone(),
            })?;
        let missing = line.quantity.saturating_sub(line.reserved_quantity(Utc::now()));
        if missing == 0 {
            return Ok(None);
        }
        self.coordinator.reserve(lot_id, missing, actor).await.map(Some)
    }

    /// One evaluator pass over a fresh snapshot. Passes never overlap.
    async fn sync_promotions(&self) -> Vec<SyncOutcome> {
        let _pass = self.promotion_gate.lock().await;

        let snapshot = self.state.lock().items.clone();
        if !snapshot
            .iter()
            .any(|l| l.is_free_item || l.buy_x_get_y().is_some())
        {
            return Vec::new();
        }

        let sync = self.evaluator.sync(&snapshot, self.actor_id.as_deref()).await;

        let mut s = self.state.lock();
        s.items.retain(|l| !l.is_free_item);
        s.items.extend(sync.free_items);
        sync.outcomes
    }

    async fn lookup_promotion(&self, product_id: &str) -> Option<PromotionRule> {
        match self.catalog.active_promotion_for(product_id).await {
            Ok(rule) => rule,
            Err(e) => {
                warn!(error = %e, product_id, "promotion lookup failed; selling at catalog price");
                None
            }
        }
    }

    fn line_lock(&self, key: &LineKey) -> Arc<AsyncMutex<()>> {
        self.line_locks.lock().entry(key.clone()).or_default().clone()
    }

    fn find_by_key(&self, key: &LineKey) -> Option<LineId> {
        self.state
            .lock()
            .items
            .iter()
            .find(|l| l.key().as_ref() == Some(key))
            .map(|l| l.id)
    }

    /// Key of a paid line; free items are rejected.
    fn paid_line_key(&self, line_id: LineId) -> Result<Option<LineKey>, CheckoutError> {
        let s = self.state.lock();
        let line = s
            .items
            .iter()
            .find(|l| l.id == line_id)
            .ok_or(CheckoutError::LineNotFound(line_id))?;
        if line.is_free_item {
            return Err(CheckoutError::FreeItemImmutable(line_id));
        }
        Ok(line.key())
    }

    fn with_line(&self, line_id: LineId, f: impl FnOnce(&mut LineItem)) {
        if let Some(line) = self.state.lock().items.iter_mut().find(|l| l.id == line_id) {
            f(line);
        }
    }
}

/// Largest quantity `line` can take without the line plus the free units on
/// its lot exceeding the lot's known stock.
fn quantity_cap(items: &[LineItem], line: &LineItem) -> Option<u32> {
    let known = line.lot_quantity?;
    let Some(lot_id) = line.lot_id.as_deref() else {
        return Some(known);
    };
    let same_group = |l: &LineItem| {
        l.product_id == line.product_id
            && l.promotion_id.is_some()
            && l.promotion_id == line.promotion_id
    };

    // Free units of other promotions parked on the same lot.
    let held_elsewhere: u32 = items
        .iter()
        .filter(|l| l.is_free_item && l.lot_id.as_deref() == Some(lot_id) && !same_group(l))
        .map(|l| l.quantity)
        .sum();
    let budget = known.saturating_sub(held_elsewhere);

    let Some((buy, get)) = line.buy_x_get_y() else {
        return Some(budget);
    };
    // The group's free item comes out of its earliest paid line's lot.
    let group_lot = items
        .iter()
        .filter(|l| !l.is_free_item && same_group(l))
        .find_map(|l| l.lot_id.as_deref());
    if group_lot.is_some_and(|lot| lot != lot_id) {
        return Some(budget);
    }

    let other_paid: u32 = items
        .iter()
        .filter(|l| !l.is_free_item && l.id != line.id && same_group(l))
        .map(|l| l.quantity)
        .sum();
    let fits = |paid: u32| {
        paid.saturating_add(entitlement(paid.saturating_add(other_paid), buy, get)) <= budget
    };

    let (mut lo, mut hi) = (0, budget);
    while lo < hi {
        let mid = lo + (hi - lo).div_ceil(2);
        if fits(mid) {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    Some(lo)
}

fn new_line(
    product: &Product,
    lot: &Lot,
    quantity: u32,
    promotion: Option<PromotionRule>,
    handle: Option<ReservationHandle>,
) -> LineItem {
    let mut line = LineItem {
        id: Uuid::new_v4(),
        product_id: product.product_id.clone(),
        product_name: product.name.clone(),
        lot_id: Some(lot.lot_id.clone()),
        lot_quantity: Some(lot.known_quantity),
        quantity,
        unit_price: product.unit_price,
        effective_unit_price: product.unit_price,
        is_free_item: false,
        promotion_id: None,
        buy_quantity: None,
        get_quantity: None,
        reservations: handle.into_iter().collect(),
        needs_attention: false,
    };

    let Some(rule) = promotion else {
        return line;
    };
    match &rule.kind {
        PromotionKind::Discount { .. } => {
            line.effective_unit_price = rule.kind.effective_price(product.unit_price);
            line.promotion_id = Some(rule.promotion_id);
        }
        PromotionKind::BuyXGetY {
            buy_quantity,
            get_quantity,
            product_id,
        } if *product_id == product.product_id && *buy_quantity > 0 => {
            line.buy_quantity = Some(*buy_quantity);
            line.get_quantity = Some(*get_quantity);
            line.promotion_id = Some(rule.promotion_id);
        }
        PromotionKind::BuyXGetY { product_id, .. } => {
            debug!(rule_product = %product_id, "buy-x-get-y rule targets another product; ignored");
        }
    }
    line
}

fn validate_loyalty(discount: &DiscountRule, customer: &Customer) -> Result<(), CheckoutError> {
    let DiscountRule::LoyaltyPoints { points_to_use } = discount else {
        return Ok(());
    };
    match customer {
        Customer::Guest => Err(CheckoutError::LoyaltyRequiresCustomer),
        Customer::Identified { loyalty_points, .. } if points_to_use > loyalty_points => {
            Err(CheckoutError::InsufficientLoyaltyPoints {
                requested: *points_to_use,
                available: *loyalty_points,
            })
        }
        Customer::Identified { .. } => Ok(()),
    }
}
