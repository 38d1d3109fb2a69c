use std::sync::Arc;

use anyhow::Context;
use checkout::{
    cart::session::CartSession,
    config::AppConfig,
    db::Db,
    lifecycle::guardian::LifecycleGuardian,
    logger::{TraceId, annotate_span, init_tracing, root_span},
    metrics::counters::Counters,
    order::client::HttpOrderClient,
    pending::{repository_sqlx::SqlxPendingOrderRepository, store::PendingOrderStore},
    promotion::catalog::HttpPromotionCatalog,
    reservation::{client::HttpReservationClient, coordinator::ReservationCoordinator},
};
use tracing::Instrument;
use uuid::Uuid;

/// How many parked carts are scanned for this terminal's latest one.
const PARKED_SCAN_LIMIT: usize = 50;

/// Connects local storage and runs migrations.
async fn init_pending_store(cfg: &AppConfig) -> anyhow::Result<PendingOrderStore> {
    let db = Db::connect(&cfg.database_url)
        .await
        .context("failed to open local database")?;
    db.migrate().await.context("failed to migrate local database")?;

    let repo = Arc::new(SqlxPendingOrderRepository::new(db.pool.clone()));
    Ok(PendingOrderStore::new(repo))
}

/// Builds the HTTP collaborators and an empty cart session.
fn build_session(
    cfg: &AppConfig,
    reservations: Arc<HttpReservationClient>,
) -> anyhow::Result<CartSession> {
    let orders = HttpOrderClient::new(cfg.order_service_url.clone(), cfg.http_timeout)
        .context("failed to build order client")?;
    let catalog = HttpPromotionCatalog::new(cfg.promotion_service_url.clone(), cfg.http_timeout)
        .context("failed to build promotion client")?;

    let coordinator = Arc::new(ReservationCoordinator::new(
        reservations,
        Counters::default(),
    ));

    Ok(CartSession::new(
        cfg.terminal_label.clone(),
        cfg.actor_id.clone(),
        coordinator,
        Arc::new(catalog),
        Arc::new(orders),
    ))
}

/// Picks up the requested parked cart, or else the latest one this terminal
/// parked.
async fn resume_parked_cart(
    store: &PendingOrderStore,
    session: &CartSession,
    requested: Option<Uuid>,
) -> anyhow::Result<()> {
    let session_id = match requested {
        Some(id) => Some(id),
        None => store
            .list(PARKED_SCAN_LIMIT)
            .await?
            .into_iter()
            .find(|p| p.label == session.label())
            .map(|p| p.session_id),
    };
    let Some(session_id) = session_id else {
        return Ok(());
    };
    let Some(pending) = store.take(&session_id).await? else {
        tracing::warn!(%session_id, "no parked cart under the requested session");
        return Ok(());
    };

    let report = session
        .restore(pending)
        .await
        .context("failed to restore parked cart")?;

    if !report.reservations.is_clean() {
        tracing::warn!(
            flagged = report.reservations.failed.len(),
            "restored cart has lines without stock reservations"
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    let cfg = AppConfig::from_env();

    let trace_id = TraceId::new(uuid::Uuid::new_v4().to_string());
    let span = root_span("checkout", &trace_id, &cfg.terminal_label);

    async move {
        tracing::info!("Starting checkout terminal...");

        let store = init_pending_store(&cfg).await?;

        let reservations = Arc::new(
            HttpReservationClient::new(cfg.reservation_service_url.clone(), cfg.http_timeout)
                .context("failed to build reservation client")?,
        );
        let session = build_session(&cfg, reservations.clone())?;
        resume_parked_cart(&store, &session, cfg.resume_session_id).await?;
        annotate_span(&tracing::Span::current(), &session.session_id());

        if cfg.actor_id.is_none() {
            tracing::warn!("STAFF_ID not set; items will be sold without stock reservations");
        }

        let guardian = LifecycleGuardian::new(reservations, cfg.guardian_flush_timeout);

        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown signal received");

        match guardian.park_on_shutdown(&session, &store).await {
            Ok(report) => tracing::info!(flush = ?report.flush, parked = ?report.parked, "terminal stopped"),
            Err(e) => tracing::error!(error = ?e, "terminal stopped without parking its cart"),
        }

        Ok::<(), anyhow::Error>(())
    }
    .instrument(span)
    .await
}
