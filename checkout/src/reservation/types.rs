use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ReservationId = String;
pub type LotId = String;

/// `Active -> {Committed, Released, Expired}`; all three are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Active,
    Committed,
    Released,
    Expired,
}

/// A time-boxed claim on `quantity` units of one lot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationHandle {
    pub reservation_id: ReservationId,
    pub lot_id: LotId,
    pub quantity: u32,
    pub status: ReservationStatus,
    pub reserved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ReservationHandle {
    /// Active and not yet past its server-side TTL.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Active && now < self.expires_at
    }
}

/// Sum of the live quantities in a handle set.
pub fn live_quantity(handles: &[ReservationHandle], now: DateTime<Utc>) -> u32 {
    handles
        .iter()
        .filter(|h| h.is_live(now))
        .map(|h| h.quantity)
        .sum()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseReason {
    ItemRemoved,
    QuantityChanged,
    PromotionRevoked,
    OrphanedFreeItem,
    CartCleared,
    SessionTerminated,
}

impl ReleaseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseReason::ItemRemoved => "ITEM_REMOVED",
            ReleaseReason::QuantityChanged => "QUANTITY_CHANGED",
            ReleaseReason::PromotionRevoked => "PROMOTION_REVOKED",
            ReleaseReason::OrphanedFreeItem => "ORPHANED_FREE_ITEM",
            ReleaseReason::CartCleared => "CART_CLEARED",
            ReleaseReason::SessionTerminated => "SESSION_TERMINATED",
        }
    }
}

impl fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-handle results of a best-effort bulk release.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    pub released: Vec<ReservationId>,
    /// Handles that were already terminal or past TTL; no call was made.
    pub skipped: Vec<ReservationId>,
    pub failed: Vec<ReservationId>,
}

impl ReleaseReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/* =========================
Wire types
========================= */

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRequest<'a> {
    pub lot_id: &'a str,
    pub quantity: u32,
    pub actor_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveResponse {
    pub reservation_id: ReservationId,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub reserved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsufficientStockBody {
    #[serde(default)]
    pub available: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequest<'a> {
    pub reservation_id: &'a str,
    pub reason: ReleaseReason,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseBatchRequest<'a> {
    pub reservation_ids: &'a [ReservationId],
    pub reason: ReleaseReason,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest<'a> {
    pub reservation_ids: &'a [ReservationId],
    pub order_id: &'a str,
}
