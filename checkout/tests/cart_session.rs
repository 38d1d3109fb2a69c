use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use checkout::cart::model::{Customer, Lot, PaymentMethod, Product};
use checkout::cart::session::CartSession;
use checkout::error::{CheckoutError, ServiceError};
use checkout::lifecycle::guardian::{FlushOutcome, LifecycleGuardian};
use checkout::metrics::counters::Counters;
use checkout::pending::store::PendingOrderStore;
use checkout::pricing::DiscountRule;
use checkout::promotion::types::{PromotionKind, PromotionRule, SyncOutcome};
use checkout::reservation::client::ReservationService;
use checkout::reservation::coordinator::ReservationCoordinator;
use checkout::reservation::types::{
    ReleaseReason, ReservationHandle, ReservationId, ReservationStatus,
};
use checkout::testing::{
    InMemoryPendingOrderRepository, InMemoryReservationService, RecordingOrderService,
    StaticPromotionCatalog,
};

const LOT: &str = "LOT-A";
const ACTOR: &str = "staff-1";

struct Harness {
    svc: Arc<InMemoryReservationService>,
    orders: Arc<RecordingOrderService>,
    catalog: Arc<StaticPromotionCatalog>,
    cart: CartSession,
}

fn yogurt() -> Product {
    Product {
        product_id: "P1".into(),
        name: "Yogurt 4-pack".into(),
        unit_price: 50_000,
    }
}

fn noodles() -> Product {
    Product {
        product_id: "P2".into(),
        name: "Instant noodles".into(),
        unit_price: 4_500,
    }
}

fn lot(id: &str, known: u32) -> Lot {
    Lot {
        lot_id: id.into(),
        known_quantity: known,
    }
}

fn buy_two_get_one() -> PromotionRule {
    PromotionRule {
        promotion_id: "B2G1".into(),
        kind: PromotionKind::BuyXGetY {
            buy_quantity: 2,
            get_quantity: 1,
            product_id: "P1".into(),
        },
    }
}

fn cart_for(
    svc: Arc<dyn ReservationService>,
    catalog: Arc<StaticPromotionCatalog>,
    orders: Arc<RecordingOrderService>,
    actor: Option<&str>,
) -> CartSession {
    let coord = Arc::new(ReservationCoordinator::new(svc, Counters::default()));
    CartSession::new("till-1", actor.map(str::to_string), coord, catalog, orders)
}

fn harness_with(actor: Option<&str>, stock: u32) -> Harness {
    let svc = Arc::new(InMemoryReservationService::new());
    svc.set_stock(LOT, stock);
    let orders = Arc::new(RecordingOrderService::default());
    let catalog = Arc::new(StaticPromotionCatalog::default().with_rule("P1", buy_two_get_one()));
    let cart = cart_for(svc.clone(), catalog.clone(), orders.clone(), actor);
    Harness {
        svc,
        orders,
        catalog,
        cart,
    }
}

fn harness(stock: u32) -> Harness {
    harness_with(Some(ACTOR), stock)
}

fn free_items(cart: &CartSession) -> Vec<u32> {
    cart.items()
        .iter()
        .filter(|l| l.is_free_item)
        .map(|l| l.quantity)
        .collect()
}

#[tokio::test]
async fn buy_two_get_one_checkout_settles_exact_cash() {
    let h = harness(10);

    let m = h.cart.add_item(&yogurt(), Some(&lot(LOT, 10)), 3).await.unwrap();
    assert!(matches!(m.promotions[0], SyncOutcome::Granted { quantity: 1, .. }));
    assert_eq!(free_items(&h.cart), vec![1]);
    assert_eq!(h.svc.available(LOT), 6);

    let receipt = h
        .cart
        .checkout(Some(PaymentMethod::Cash), 150_000, DiscountRule::None)
        .await
        .unwrap();

    assert_eq!(receipt.totals.subtotal, 150_000);
    assert_eq!(receipt.totals.rounded_cash_total, 150_000);
    assert_eq!(receipt.settlement.change_returned, 0);
    assert_eq!(receipt.items.len(), 2);
    assert!(
        receipt
            .items
            .iter()
            .flat_map(|l| &l.reservations)
            .all(|r| r.status == ReservationStatus::Committed)
    );
    assert!(h.cart.is_empty());

    let sent = &h.orders.requests()[0];
    assert_eq!(sent.staff_id.as_deref(), Some(ACTOR));
    assert_eq!(sent.reservation_ids.len(), 2);
    assert_eq!(sent.discount, None);
    let free = sent.items.iter().find(|i| i.is_free_item).unwrap();
    assert_eq!((free.quantity, free.unit_price, free.original_unit_price), (1, 0, 50_000));
    assert_eq!(Counters::get(&h.cart.counters().orders_committed), 1);
}

#[tokio::test]
async fn add_without_lot_is_rejected_before_any_call() {
    let h = harness(10);

    let err = h.cart.add_item(&yogurt(), None, 1).await.unwrap_err();

    assert!(matches!(err, CheckoutError::MissingLotReference { .. }));
    assert!(h.cart.is_empty());
    assert!(h.svc.call_log().is_empty());
}

#[tokio::test]
async fn failed_merge_leaves_line_untouched() {
    let h = harness(2);
    let l = lot(LOT, 2);
    h.cart.add_item(&noodles(), Some(&l), 1).await.unwrap();

    let err = h.cart.add_item(&noodles(), Some(&l), 5).await.unwrap_err();

    assert!(err.is_insufficient_stock());
    let items = h.cart.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity, 1);
    assert_eq!(h.svc.available(LOT), 1);
}

#[tokio::test]
async fn merge_reserves_only_the_delta() {
    let h = harness(20);
    let l = lot(LOT, 20);

    let a = h.cart.add_item(&noodles(), Some(&l), 2).await.unwrap();
    let b = h.cart.add_item(&noodles(), Some(&l), 3).await.unwrap();

    assert_eq!(a.line_id, b.line_id);
    assert_eq!(b.quantity, 5);
    assert_eq!(h.svc.call_log(), vec!["reserve:2", "reserve:3"]);
    assert_eq!(h.svc.available(LOT), 15);
}

#[tokio::test]
async fn same_product_from_two_lots_gets_two_lines() {
    let h = harness(5);
    h.svc.set_stock("LOT-B", 5);

    h.cart.add_item(&noodles(), Some(&lot(LOT, 5)), 1).await.unwrap();
    h.cart.add_item(&noodles(), Some(&lot("LOT-B", 5)), 1).await.unwrap();

    assert_eq!(h.cart.items().len(), 2);
}

#[tokio::test]
async fn decrease_on_exhausted_lot_still_succeeds() {
    let h = harness(4);
    let m = h.cart.add_item(&noodles(), Some(&lot(LOT, 4)), 4).await.unwrap();
    assert_eq!(h.svc.available(LOT), 0);

    let m = h.cart.update_quantity(m.line_id, 2).await.unwrap();

    assert_eq!(m.quantity, 2);
    assert_eq!(h.svc.available(LOT), 2);
    let line = h.cart.line(m.line_id).unwrap();
    assert!(line.is_fully_reserved(Utc::now()));
    assert_eq!(Counters::get(&h.cart.counters().adjust_fallbacks), 1);
}

#[tokio::test]
async fn failed_increase_keeps_quantity_and_reservation() {
    let h = harness(5);
    let m = h.cart.add_item(&noodles(), Some(&lot(LOT, 5)), 3).await.unwrap();
    h.svc.claim(LOT, 2); // another terminal

    let err = h.cart.update_quantity(m.line_id, 5).await.unwrap_err();

    assert!(err.is_insufficient_stock());
    let line = h.cart.line(m.line_id).unwrap();
    assert_eq!(line.quantity, 3);
    assert_eq!(line.reserved_quantity(Utc::now()), 3);
    assert!(!line.needs_attention);
}

/// Hands every unit freed by a release to a competing terminal.
struct ContendedLot {
    inner: Arc<InMemoryReservationService>,
    steal: AtomicBool,
}

#[async_trait]
impl ReservationService for ContendedLot {
    async fn reserve(
        &self,
        lot_id: &str,
        quantity: u32,
        actor_id: &str,
    ) -> Result<ReservationHandle, ServiceError> {
        self.inner.reserve(lot_id, quantity, actor_id).await
    }

    async fn release(&self, reservation_id: &str, reason: ReleaseReason) -> Result<(), ServiceError> {
        self.inner.release(reservation_id, reason).await?;
        if self.steal.load(Ordering::SeqCst) {
            self.inner.claim(LOT, self.inner.available(LOT));
        }
        Ok(())
    }

    async fn release_batch(
        &self,
        reservation_ids: &[ReservationId],
        reason: ReleaseReason,
    ) -> Result<(), ServiceError> {
        self.inner.release_batch(reservation_ids, reason).await
    }

    async fn commit(&self, reservation_ids: &[ReservationId], order_id: &str) -> Result<(), ServiceError> {
        self.inner.commit(reservation_ids, order_id).await
    }
}

#[tokio::test]
async fn lost_fallback_race_flags_line_and_keeps_quantity() {
    let inner = Arc::new(InMemoryReservationService::new());
    inner.set_stock(LOT, 4);
    let contended = Arc::new(ContendedLot {
        inner: inner.clone(),
        steal: AtomicBool::new(false),
    });
    let cart = cart_for(
        contended.clone(),
        Arc::new(StaticPromotionCatalog::default()),
        Arc::new(RecordingOrderService::default()),
        Some(ACTOR),
    );
    let m = cart.add_item(&noodles(), Some(&lot(LOT, 4)), 4).await.unwrap();

    contended.steal.store(true, Ordering::SeqCst);
    let err = cart.update_quantity(m.line_id, 2).await.unwrap_err();

    assert!(err.is_insufficient_stock());
    let line = cart.line(m.line_id).unwrap();
    assert_eq!(line.quantity, 4, "no silent quantity drift");
    assert_eq!(line.reserved_quantity(Utc::now()), 0);
    assert_eq!(cart.needs_attention(), vec![m.line_id]);

    // The other terminal gives the stock back.
    contended.steal.store(false, Ordering::SeqCst);
    inner.set_stock(LOT, 4);
    let report = cart.reacquire_reservations().await;

    assert_eq!(report.reacquired, vec![m.line_id]);
    assert!(cart.needs_attention().is_empty());
    assert!(cart.line(m.line_id).unwrap().is_fully_reserved(Utc::now()));
}

#[tokio::test]
async fn free_items_cannot_be_edited_directly() {
    let h = harness(10);
    h.cart.add_item(&yogurt(), Some(&lot(LOT, 10)), 2).await.unwrap();
    let free = h.cart.items().into_iter().find(|l| l.is_free_item).unwrap();

    let update = h.cart.update_quantity(free.id, 5).await.unwrap_err();
    let remove = h.cart.remove_item(free.id).await.unwrap_err();

    assert!(matches!(update, CheckoutError::FreeItemImmutable(id) if id == free.id));
    assert!(matches!(remove, CheckoutError::FreeItemImmutable(_)));
}

#[tokio::test]
async fn removing_paid_line_releases_its_free_item() {
    let h = harness(10);
    let m = h.cart.add_item(&yogurt(), Some(&lot(LOT, 10)), 2).await.unwrap();
    assert_eq!(h.svc.available(LOT), 7);

    let removed = h.cart.remove_item(m.line_id).await.unwrap();

    assert!(h.cart.is_empty());
    assert_eq!(h.svc.available(LOT), 10);
    assert!(
        removed
            .promotions
            .iter()
            .any(|o| matches!(o, SyncOutcome::Revoked { .. } | SyncOutcome::Orphaned { .. }))
    );
}

#[tokio::test]
async fn quantity_changes_resize_and_revoke_free_items() {
    let h = harness(20);
    let m = h.cart.add_item(&yogurt(), Some(&lot(LOT, 20)), 2).await.unwrap();

    h.cart.update_quantity(m.line_id, 6).await.unwrap();
    assert_eq!(free_items(&h.cart), vec![3]);

    h.cart.update_quantity(m.line_id, 1).await.unwrap();
    assert!(free_items(&h.cart).is_empty());
    assert_eq!(h.svc.available(LOT), 19);
}

#[tokio::test]
async fn update_to_zero_removes_the_line() {
    let h = harness(5);
    let m = h.cart.add_item(&noodles(), Some(&lot(LOT, 5)), 2).await.unwrap();

    let out = h.cart.update_quantity(m.line_id, 0).await.unwrap();

    assert_eq!(out.quantity, 0);
    assert!(h.cart.is_empty());
    assert_eq!(h.svc.available(LOT), 5);
}

#[tokio::test]
async fn unknown_line_is_reported() {
    let h = harness(5);
    let id = uuid::Uuid::new_v4();

    assert!(matches!(
        h.cart.update_quantity(id, 2).await,
        Err(CheckoutError::LineNotFound(_))
    ));
    assert!(matches!(
        h.cart.remove_item(id).await,
        Err(CheckoutError::LineNotFound(_))
    ));
}

#[tokio::test]
async fn concurrent_adds_converge_on_one_promotion_state() {
    let h = harness(20);
    let p = yogurt();
    let l = lot(LOT, 20);

    let (a, b) = tokio::join!(
        h.cart.add_item(&p, Some(&l), 2),
        h.cart.add_item(&p, Some(&l), 2)
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(free_items(&h.cart), vec![2]);
    assert_eq!(h.svc.held_on(LOT), 6);
}

#[tokio::test]
async fn clear_releases_everything() {
    let h = harness(10);
    h.cart.add_item(&yogurt(), Some(&lot(LOT, 10)), 2).await.unwrap();
    h.cart.add_item(&noodles(), Some(&lot(LOT, 10)), 3).await.unwrap();

    let report = h.cart.clear(ReleaseReason::CartCleared).await;

    assert!(report.is_clean());
    assert_eq!(report.released.len(), 3);
    assert!(h.cart.is_empty());
    assert_eq!(h.svc.available(LOT), 10);
}

#[tokio::test]
async fn checkout_preconditions_block_submission() {
    let h = harness(10);
    assert!(matches!(
        h.cart
            .checkout(Some(PaymentMethod::Cash), 0, DiscountRule::None)
            .await,
        Err(CheckoutError::EmptyCart)
    ));

    h.cart.add_item(&yogurt(), Some(&lot(LOT, 10)), 3).await.unwrap();

    assert!(matches!(
        h.cart.checkout(None, 150_000, DiscountRule::None).await,
        Err(CheckoutError::PaymentMethodUnset)
    ));
    assert!(matches!(
        h.cart
            .checkout(Some(PaymentMethod::Cash), 149_000, DiscountRule::None)
            .await,
        Err(CheckoutError::InsufficientTender {
            required: 150_000,
            tendered: 149_000
        })
    ));
    assert!(matches!(
        h.cart
            .checkout(
                Some(PaymentMethod::Card),
                0,
                DiscountRule::LoyaltyPoints { points_to_use: 1_000 }
            )
            .await,
        Err(CheckoutError::LoyaltyRequiresCustomer)
    ));

    assert!(h.orders.requests().is_empty());
    assert_eq!(h.cart.items().len(), 2);
}

#[tokio::test]
async fn order_failure_keeps_cart_for_retry() {
    let h = harness(10);
    h.cart.add_item(&noodles(), Some(&lot(LOT, 10)), 2).await.unwrap();
    h.orders.fail_next_orders(true);

    let err = h
        .cart
        .checkout(Some(PaymentMethod::Transfer), 0, DiscountRule::None)
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::CommitFailure(_)));
    assert_eq!(h.cart.items().len(), 1);
    assert_eq!(h.cart.active_reservation_ids().len(), 1);
    assert_eq!(Counters::get(&h.cart.counters().commit_failures), 1);

    h.orders.fail_next_orders(false);
    let receipt = h
        .cart
        .checkout(Some(PaymentMethod::Transfer), 0, DiscountRule::None)
        .await
        .unwrap();
    assert_eq!(receipt.settlement.payable, 9_000);
    assert!(h.cart.is_empty());
}

#[tokio::test]
async fn reservations_are_committed_when_order_service_defers() {
    let h = harness(10);
    h.cart.add_item(&yogurt(), Some(&lot(LOT, 10)), 2).await.unwrap();
    let held = h.cart.active_reservation_ids();
    h.orders.leave_commit_to_caller(true);

    h.cart
        .checkout(Some(PaymentMethod::Card), 0, DiscountRule::None)
        .await
        .unwrap();

    let mut committed = h.svc.committed_ids();
    let mut expected = held;
    committed.sort();
    expected.sort();
    assert_eq!(committed, expected);
}

#[tokio::test]
async fn identified_customer_redeems_points_and_earns_accrual() {
    let h = harness(10);
    h.cart.set_customer(Customer::Identified {
        customer_id: "C-7".into(),
        name: "Minh".into(),
        loyalty_points: 5_000,
    });
    h.cart.add_item(&yogurt(), Some(&lot(LOT, 10)), 1).await.unwrap();

    let receipt = h
        .cart
        .checkout(
            Some(PaymentMethod::Cash),
            50_000,
            DiscountRule::LoyaltyPoints { points_to_use: 2_500 },
        )
        .await
        .unwrap();

    assert_eq!(receipt.totals.discount_amount, 2_500);
    assert_eq!(receipt.totals.final_total, 47_500);
    assert_eq!(receipt.totals.rounded_cash_total, 48_000);
    assert_eq!(receipt.totals.loyalty_points_earned, 475);
    assert_eq!(receipt.settlement.change_returned, 2_000);
    assert_eq!(h.orders.requests()[0].customer_id.as_deref(), Some("C-7"));
}

#[tokio::test]
async fn terminal_without_actor_sells_without_reserving() {
    let h = harness_with(None, 10);

    h.cart.add_item(&yogurt(), Some(&lot(LOT, 10)), 4).await.unwrap();
    assert_eq!(free_items(&h.cart), vec![2]);

    let receipt = h
        .cart
        .checkout(Some(PaymentMethod::Card), 0, DiscountRule::None)
        .await
        .unwrap();

    assert!(h.svc.call_log().is_empty());
    assert!(h.orders.requests()[0].reservation_ids.is_empty());
    assert_eq!(receipt.totals.payable, 200_000);
}

#[tokio::test]
async fn catalog_outage_adds_at_catalog_price() {
    let h = harness(10);
    h.catalog.set_unavailable(true);

    let m = h.cart.add_item(&yogurt(), Some(&lot(LOT, 10)), 3).await.unwrap();

    assert!(m.promotions.is_empty());
    let line = h.cart.line(m.line_id).unwrap();
    assert_eq!(line.promotion_id, None);
    assert_eq!(line.effective_unit_price, 50_000);
}

#[tokio::test]
async fn pause_then_restore_reacquires_fresh_reservations() {
    let h = harness(10);
    h.cart.add_item(&yogurt(), Some(&lot(LOT, 10)), 3).await.unwrap();
    h.cart.set_payment_method(Some(PaymentMethod::Cash));

    let pending = h.cart.pause().await;

    assert!(h.cart.is_empty());
    assert_eq!(pending.items.len(), 2);
    assert!(pending.items.iter().all(|l| l.reservations.is_empty()));
    assert_eq!(h.svc.available(LOT), 6, "pause leaves reservations to expire");
    assert_eq!(h.svc.release_calls(), 0);

    // TTL lapsed while parked.
    h.svc.set_stock(LOT, 10);
    let report = h.cart.restore(pending).await.unwrap();

    assert!(report.reservations.is_clean());
    assert_eq!(report.reservations.reacquired.len(), 1);
    assert_eq!(free_items(&h.cart), vec![1]);
    assert_eq!(h.svc.available(LOT), 6);
    assert!(h.cart.needs_attention().is_empty());
    assert_eq!(h.cart.totals().payable, 150_000);
}

#[tokio::test]
async fn restore_flags_lines_it_cannot_cover() {
    let h = harness(10);
    h.cart.add_item(&noodles(), Some(&lot(LOT, 10)), 3).await.unwrap();
    let pending = h.cart.pause().await;
    h.svc.set_stock(LOT, 1);

    let report = h.cart.restore(pending).await.unwrap();

    assert_eq!(report.reservations.failed.len(), 1);
    let flagged = h.cart.needs_attention();
    assert_eq!(flagged.len(), 1);
    assert_eq!(h.cart.items()[0].quantity, 3, "kept, not dropped");
    assert!(matches!(
        h.cart
            .checkout(Some(PaymentMethod::Card), 0, DiscountRule::None)
            .await,
        Err(CheckoutError::ReservationUnavailable { line_id }) if line_id == flagged[0]
    ));
}

#[tokio::test]
async fn restore_requires_an_empty_cart() {
    let h = harness(10);
    h.cart.add_item(&noodles(), Some(&lot(LOT, 10)), 1).await.unwrap();
    let pending = h.cart.pause().await;
    h.cart.add_item(&noodles(), Some(&lot(LOT, 10)), 1).await.unwrap();

    assert!(matches!(
        h.cart.restore(pending).await,
        Err(CheckoutError::CartNotEmpty)
    ));
}

#[tokio::test]
async fn guardian_flushes_live_reservations_of_a_session() {
    let h = harness(10);
    h.cart.add_item(&yogurt(), Some(&lot(LOT, 10)), 2).await.unwrap();
    let guardian = LifecycleGuardian::new(h.svc.clone(), std::time::Duration::from_millis(500));

    let outcome = guardian.on_terminate(&h.cart).await;

    assert_eq!(outcome, FlushOutcome::Delivered { count: 2 });
    assert_eq!(h.svc.available(LOT), 10);
}

fn pending_store() -> (Arc<InMemoryPendingOrderRepository>, PendingOrderStore) {
    let repo = Arc::new(InMemoryPendingOrderRepository::default());
    (repo.clone(), PendingOrderStore::new(repo))
}

#[tokio::test]
async fn parking_two_carts_in_a_row_keeps_both() {
    let h = harness(10);
    let (repo, store) = pending_store();

    h.cart.add_item(&yogurt(), Some(&lot(LOT, 10)), 1).await.unwrap();
    let first = h.cart.pause().await;
    store.park(&first).await.unwrap();

    h.cart.add_item(&noodles(), Some(&lot(LOT, 10)), 2).await.unwrap();
    let second = h.cart.pause().await;
    store.park(&second).await.unwrap();

    assert_ne!(first.session_id, second.session_id);
    assert!(second.created_at >= first.created_at);
    assert_eq!(repo.len(), 2);
    assert_eq!(store.list(10).await.unwrap().len(), 2);

    let a = store.take(&first.session_id).await.unwrap().unwrap();
    let b = store.take(&second.session_id).await.unwrap().unwrap();
    assert_eq!(a.items[0].product_id, "P1");
    assert_eq!(b.items[0].product_id, "P2");
    assert_eq!(b.items[0].quantity, 2);
}

#[tokio::test]
async fn checkout_starts_a_new_sale() {
    let h = harness(10);
    let sale = h.cart.session_id();
    let opened = h.cart.created_at();
    h.cart.add_item(&noodles(), Some(&lot(LOT, 10)), 1).await.unwrap();

    let receipt = h
        .cart
        .checkout(Some(PaymentMethod::Card), 0, DiscountRule::None)
        .await
        .unwrap();

    assert_eq!(receipt.session_id, sale);
    assert_ne!(h.cart.session_id(), sale);
    assert!(h.cart.created_at() >= opened);
}

#[tokio::test]
async fn failed_checkout_stays_on_the_same_sale() {
    let h = harness(10);
    h.cart.add_item(&noodles(), Some(&lot(LOT, 10)), 1).await.unwrap();
    let sale = h.cart.session_id();
    h.orders.fail_next_orders(true);

    assert!(
        h.cart
            .checkout(Some(PaymentMethod::Card), 0, DiscountRule::None)
            .await
            .is_err()
    );
    assert_eq!(h.cart.session_id(), sale);
}

#[tokio::test]
async fn restored_cart_is_parked_again_under_its_own_id() {
    let h = harness(10);
    let (repo, store) = pending_store();
    h.cart.add_item(&noodles(), Some(&lot(LOT, 10)), 1).await.unwrap();
    let parked = h.cart.pause().await;

    h.cart.restore(parked.clone()).await.unwrap();
    assert_eq!(h.cart.session_id(), parked.session_id);
    assert_eq!(h.cart.created_at(), parked.created_at);

    store.park(&h.cart.pause().await).await.unwrap();
    store.park(&parked).await.unwrap();
    assert_eq!(repo.len(), 1);
}

#[tokio::test]
async fn shutdown_releases_holds_and_parks_the_cart() {
    let h = harness(10);
    let (_, store) = pending_store();
    h.cart.add_item(&yogurt(), Some(&lot(LOT, 10)), 2).await.unwrap();
    let guardian = LifecycleGuardian::new(h.svc.clone(), std::time::Duration::from_millis(500));

    let report = guardian.park_on_shutdown(&h.cart, &store).await.unwrap();

    assert_eq!(report.flush, FlushOutcome::Delivered { count: 2 });
    assert_eq!(h.svc.available(LOT), 10);
    assert!(h.cart.is_empty());

    // Next start of the terminal.
    let parked = report.parked.unwrap();
    let pending = store.take(&parked).await.unwrap().unwrap();
    let next = cart_for(h.svc.clone(), h.catalog.clone(), h.orders.clone(), Some(ACTOR));
    let restored = next.restore(pending).await.unwrap();

    assert!(restored.reservations.is_clean());
    assert_eq!(next.session_id(), parked);
    assert_eq!(free_items(&next), vec![1]);
    assert_eq!(h.svc.available(LOT), 7);
}

#[tokio::test]
async fn shutdown_with_empty_cart_parks_nothing() {
    let h = harness(10);
    let (repo, store) = pending_store();
    let guardian = LifecycleGuardian::new(h.svc.clone(), std::time::Duration::from_millis(500));

    let report = guardian.park_on_shutdown(&h.cart, &store).await.unwrap();

    assert_eq!(report.flush, FlushOutcome::Nothing);
    assert!(report.parked.is_none());
    assert!(repo.is_empty());
}
