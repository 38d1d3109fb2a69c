use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pricing::Money;
use crate::reservation::types::{LotId, ReservationHandle, live_quantity};

pub type LineId = Uuid;
pub type ProductId = String;
pub type PromotionId = String;

/// Catalog view of a product at scan time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Money,
}

/// A scanned lot and the quantity the catalog last reported for it.
///
/// `known_quantity` only bounds quantity edits; the Reservation Service
/// remains the authority on what can actually be sold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lot {
    pub lot_id: LotId,
    pub known_quantity: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Customer {
    #[default]
    Guest,
    #[serde(rename_all = "camelCase")]
    Identified {
        customer_id: String,
        name: String,
        loyalty_points: Money,
    },
}

impl Customer {
    pub fn customer_id(&self) -> Option<&str> {
        match self {
            Customer::Guest => None,
            Customer::Identified { customer_id, .. } => Some(customer_id),
        }
    }

    pub fn is_identified(&self) -> bool {
        matches!(self, Customer::Identified { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
}

/// Paid lines are unique per `(product_id, lot_id)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LineKey {
    pub product_id: ProductId,
    pub lot_id: LotId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub id: LineId,
    pub product_id: ProductId,
    pub product_name: String,
    pub lot_id: Option<LotId>,
    /// Lot quantity known at scan time; caps quantity edits.
    #[serde(default)]
    pub lot_quantity: Option<u32>,
    pub quantity: u32,
    /// Catalog price.
    pub unit_price: Money,
    /// Promotional price; zero for free items.
    pub effective_unit_price: Money,
    pub is_free_item: bool,
    #[serde(default)]
    pub promotion_id: Option<PromotionId>,
    #[serde(default)]
    pub buy_quantity: Option<u32>,
    #[serde(default)]
    pub get_quantity: Option<u32>,
    /// Live total equals `quantity` when the line is fully reserved.
    #[serde(default)]
    pub reservations: Vec<ReservationHandle>,
    /// Set when a reservation could not be (re)acquired.
    #[serde(default)]
    pub needs_attention: bool,
}

impl LineItem {
    pub fn line_total(&self) -> Money {
        Money::from(self.quantity) * self.effective_unit_price
    }

    pub fn key(&self) -> Option<LineKey> {
        if self.is_free_item {
            return None;
        }
        self.lot_id.as_ref().map(|lot_id| LineKey {
            product_id: self.product_id.clone(),
            lot_id: lot_id.clone(),
        })
    }

    pub fn reserved_quantity(&self, now: DateTime<Utc>) -> u32 {
        live_quantity(&self.reservations, now)
    }

    /// True when live reservations cover the full quantity.
    pub fn is_fully_reserved(&self, now: DateTime<Utc>) -> bool {
        self.reserved_quantity(now) >= self.quantity
    }

    /// Buy-X-Get-Y terms, when this paid line carries them.
    pub fn buy_x_get_y(&self) -> Option<(u32, u32)> {
        if self.is_free_item || self.promotion_id.is_none() {
            return None;
        }
        match (self.buy_quantity, self.get_quantity) {
            (Some(buy), Some(get)) if buy > 0 && get > 0 => Some((buy, get)),
            _ => None,
        }
    }
}
