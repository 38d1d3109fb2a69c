use thiserror::Error;
use uuid::Uuid;

use crate::pricing::Money;

/// Transport-level failures from the reservation, order and promotion services.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("insufficient stock on lot {lot_id}: requested {requested}, available {available:?}")]
    InsufficientStock {
        lot_id: String,
        requested: u32,
        available: Option<u32>,
    },

    #[error("unexpected status {status} from {endpoint}: {body}")]
    UnexpectedStatus {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Operator-facing failures of cart mutations and checkout.
#[derive(Error, Debug)]
pub enum CheckoutError {
    #[error("insufficient stock on lot {lot_id}: requested {requested}, available {available:?}")]
    InsufficientStock {
        lot_id: String,
        requested: u32,
        available: Option<u32>,
    },

    #[error("product {product_id} cannot be sold without a scanned lot")]
    MissingLotReference { product_id: String },

    #[error("failed to release reservation {reservation_id}: {reason}")]
    ReleaseFailure {
        reservation_id: String,
        reason: String,
    },

    #[error("cash tendered {tendered} is below the payable amount {required}")]
    InsufficientTender { required: Money, tendered: Money },

    #[error("payment method is not set")]
    PaymentMethodUnset,

    #[error("cart is empty")]
    EmptyCart,

    #[error("order commit failed: {0}")]
    CommitFailure(String),

    #[error("line {0} not found")]
    LineNotFound(Uuid),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(u32),

    #[error("line {0} is a promotional free item and is managed automatically")]
    FreeItemImmutable(Uuid),

    #[error("line {line_id} has no live reservation covering its quantity")]
    ReservationUnavailable { line_id: Uuid },

    #[error("cart must be empty before restoring a pending order")]
    CartNotEmpty,

    #[error("loyalty point redemption requires an identified customer")]
    LoyaltyRequiresCustomer,

    #[error("customer has {available} loyalty points, {requested} requested")]
    InsufficientLoyaltyPoints { requested: Money, available: Money },

    #[error("reservation service error: {0}")]
    ReservationService(#[source] ServiceError),
}

impl CheckoutError {
    /// Stock conflicts are recoverable by the operator; everything else is not.
    pub fn is_insufficient_stock(&self) -> bool {
        matches!(self, CheckoutError::InsufficientStock { .. })
    }
}

impl From<ServiceError> for CheckoutError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::InsufficientStock {
                lot_id,
                requested,
                available,
            } => CheckoutError::InsufficientStock {
                lot_id,
                requested,
                available,
            },
            other => CheckoutError::ReservationService(other),
        }
    }
}
