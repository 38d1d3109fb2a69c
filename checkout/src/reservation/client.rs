use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use crate::error::ServiceError;
use crate::http::{build_client, ensure_success, join};
use crate::reservation::types::{
    CommitRequest, InsufficientStockBody, ReleaseBatchRequest, ReleaseReason, ReleaseRequest,
    ReservationHandle, ReservationId, ReservationStatus, ReserveRequest, ReserveResponse,
};

/// Abstraction over the external Reservation Service.
///
/// The service is the sole owner of lot stock; concurrent `reserve` calls
/// against one lot compete for a single server-side counter. Implementations
/// hold no local state.
#[async_trait]
pub trait ReservationService: Send + Sync + 'static {
    /// Fails with `ServiceError::InsufficientStock` when the lot cannot cover `quantity`.
    async fn reserve(
        &self,
        lot_id: &str,
        quantity: u32,
        actor_id: &str,
    ) -> Result<ReservationHandle, ServiceError>;

    /// Idempotent: unknown, released or expired ids succeed.
    async fn release(
        &self,
        reservation_id: &str,
        reason: ReleaseReason,
    ) -> Result<(), ServiceError>;

    async fn release_batch(
        &self,
        reservation_ids: &[ReservationId],
        reason: ReleaseReason,
    ) -> Result<(), ServiceError>;

    async fn commit(
        &self,
        reservation_ids: &[ReservationId],
        order_id: &str,
    ) -> Result<(), ServiceError>;
}

#[derive(Clone)]
pub struct HttpReservationClient {
    http: Client,
    url: String,
}

impl HttpReservationClient {
    pub fn new(url: String, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            http: build_client(timeout)?,
            url,
        })
    }
}

#[async_trait]
impl ReservationService for HttpReservationClient {
    #[instrument(skip(self, actor_id), fields(lot_id = %lot_id), level = "debug")]
    async fn reserve(
        &self,
        lot_id: &str,
        quantity: u32,
        actor_id: &str,
    ) -> Result<ReservationHandle, ServiceError> {
        let url = join(&self.url, "reservations/reserve");

        let resp = self
            .http
            .post(&url)
            .json(&ReserveRequest {
                lot_id,
                quantity,
                actor_id,
            })
            .send()
            .await?;

        if resp.status() == StatusCode::CONFLICT {
            let body: InsufficientStockBody = resp.json().await.unwrap_or_default();
            return Err(ServiceError::InsufficientStock {
                lot_id: lot_id.to_string(),
                requested: quantity,
                available: body.available,
            });
        }

        let body: ReserveResponse = ensure_success("reserve", resp).await?.json().await?;

        debug!(
            reservation_id = %body.reservation_id,
            expires_at = %body.expires_at,
            "reservation acquired"
        );

        Ok(ReservationHandle {
            reservation_id: body.reservation_id,
            lot_id: lot_id.to_string(),
            quantity,
            status: ReservationStatus::Active,
            reserved_at: body.reserved_at.unwrap_or_else(Utc::now),
            expires_at: body.expires_at,
        })
    }

    #[instrument(skip(self), fields(reservation_id = %reservation_id, reason = %reason), level = "debug")]
    async fn release(
        &self,
        reservation_id: &str,
        reason: ReleaseReason,
    ) -> Result<(), ServiceError> {
        let url = join(&self.url, "reservations/release");

        let resp = self
            .http
            .post(&url)
            .json(&ReleaseRequest {
                reservation_id,
                reason,
            })
            .send()
            .await?;

        // Already gone server-side (released, committed or expired).
        if matches!(resp.status(), StatusCode::NOT_FOUND | StatusCode::GONE) {
            debug!("reservation already inactive on server");
            return Ok(());
        }

        ensure_success("release", resp).await?;
        Ok(())
    }

    #[instrument(skip(self, reservation_ids), fields(count = reservation_ids.len(), reason = %reason), level = "debug")]
    async fn release_batch(
        &self,
        reservation_ids: &[ReservationId],
        reason: ReleaseReason,
    ) -> Result<(), ServiceError> {
        let url = join(&self.url, "reservations/release-batch");

        let resp = self
            .http
            .post(&url)
            .json(&ReleaseBatchRequest {
                reservation_ids,
                reason,
            })
            .send()
            .await?;

        ensure_success("release_batch", resp).await?;
        Ok(())
    }

    #[instrument(skip(self, reservation_ids), fields(count = reservation_ids.len(), order_id = %order_id), level = "debug")]
    async fn commit(
        &self,
        reservation_ids: &[ReservationId],
        order_id: &str,
    ) -> Result<(), ServiceError> {
        let url = join(&self.url, "reservations/commit");

        let resp = self
            .http
            .post(&url)
            .json(&CommitRequest {
                reservation_ids,
                order_id,
            })
            .send()
            .await?;

        ensure_success("commit", resp).await?;
        Ok(())
    }
}
