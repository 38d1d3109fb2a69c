use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cart::model::{Customer, LineItem, PaymentMethod};
use crate::pricing::DiscountRule;

/// Frozen snapshot of a paused cart.
///
/// Carries no reservation ids: whatever the cart held is left to expire and
/// must be re-acquired on restore.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOrder {
    pub session_id: Uuid,
    pub label: String,
    pub items: Vec<LineItem>,
    pub customer: Customer,
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub discount: DiscountRule,
    pub created_at: DateTime<Utc>,
    pub paused_at: DateTime<Utc>,
}

impl PendingOrder {
    pub fn new(
        session_id: Uuid,
        label: String,
        items: Vec<LineItem>,
        customer: Customer,
        payment_method: Option<PaymentMethod>,
        discount: DiscountRule,
        created_at: DateTime<Utc>,
    ) -> Self {
        let items = items
            .into_iter()
            .map(|mut l| {
                l.reservations.clear();
                l.needs_attention = false;
                l
            })
            .collect();

        Self {
            session_id,
            label,
            items,
            customer,
            payment_method,
            discount,
            created_at,
            paused_at: Utc::now(),
        }
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }
}

/// Listing row for parked carts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingOrderSummary {
    pub session_id: Uuid,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub paused_at: DateTime<Utc>,
}
