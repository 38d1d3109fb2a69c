use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cart::model::{Customer, LineItem, PaymentMethod, PromotionId};
use crate::pricing::{DiscountRule, Money, Settlement, Totals};
use crate::reservation::types::{LotId, ReservationId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub lot_id: LotId,
    pub quantity: u32,
    /// Price actually charged per unit (zero for free items).
    pub unit_price: Money,
    pub original_unit_price: Money,
    pub promotion_id: Option<PromotionId>,
    pub is_free_item: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub staff_id: Option<String>,
    pub customer_id: Option<String>,
    pub payment_method: PaymentMethod,
    pub amount_given: Money,
    pub items: Vec<OrderItem>,
    pub discount: Option<DiscountRule>,
    /// Committed by the Order Service in the same transaction as the order.
    pub reservation_ids: Vec<ReservationId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResponse {
    pub order_id: String,
    pub order_date: DateTime<Utc>,
    pub total_amount: Money,
    pub change_returned: Money,
    pub rounding_adjustment: Money,
    pub points_earned: Money,
    /// False when the Order Service left reservation commit to the caller.
    #[serde(default = "committed_by_default")]
    pub reservations_committed: bool,
}

fn committed_by_default() -> bool {
    true
}

/// What the terminal prints after a successful checkout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub session_id: Uuid,
    pub order_id: String,
    pub order_date: DateTime<Utc>,
    pub customer: Customer,
    pub items: Vec<LineItem>,
    pub totals: Totals,
    pub settlement: Settlement,
    /// As reported by the Order Service.
    pub total_amount: Money,
    pub change_returned: Money,
    pub rounding_adjustment: Money,
    pub points_earned: Money,
}

impl OrderItem {
    pub fn from_line(line: &LineItem, lot_id: LotId) -> Self {
        Self {
            lot_id,
            quantity: line.quantity,
            unit_price: line.effective_unit_price,
            original_unit_price: line.unit_price,
            promotion_id: line.promotion_id.clone(),
            is_free_item: line.is_free_item,
        }
    }
}
