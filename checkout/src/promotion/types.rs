use serde::{Deserialize, Serialize};

use crate::cart::model::{ProductId, PromotionId};
use crate::error::CheckoutError;
use crate::pricing::Money;

/// Read-only promotion as published by the catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionRule {
    pub promotion_id: PromotionId,
    #[serde(flatten)]
    pub kind: PromotionKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromotionKind {
    /// Percentage off the catalog unit price.
    #[serde(rename_all = "camelCase")]
    Discount { percentage: u32 },
    /// Buy `buy_quantity` of `product_id`, get `get_quantity` of it free.
    #[serde(rename_all = "camelCase")]
    BuyXGetY {
        buy_quantity: u32,
        get_quantity: u32,
        product_id: ProductId,
    },
}

impl PromotionKind {
    /// Price after a `Discount` promotion; other kinds leave the price alone.
    pub fn effective_price(&self, unit_price: Money) -> Money {
        match self {
            PromotionKind::Discount { percentage } => {
                let pct = Money::from((*percentage).min(100));
                unit_price - unit_price * pct / 100
            }
            PromotionKind::BuyXGetY { .. } => unit_price,
        }
    }
}

/// Entitlement for a summed paid quantity.
pub fn entitlement(paid_quantity: u32, buy_quantity: u32, get_quantity: u32) -> u32 {
    if buy_quantity == 0 {
        return 0;
    }
    (paid_quantity / buy_quantity).saturating_mul(get_quantity)
}

/// Result of reconciling one `(product_id, promotion_id)` group.
///
/// Only groups that needed a change (or failed to change) produce an outcome;
/// a consistent cart yields none.
#[derive(Debug)]
pub enum SyncOutcome {
    Granted {
        product_id: ProductId,
        promotion_id: PromotionId,
        quantity: u32,
    },
    Resized {
        product_id: ProductId,
        promotion_id: PromotionId,
        from: u32,
        to: u32,
    },
    Revoked {
        product_id: ProductId,
        promotion_id: PromotionId,
    },
    Orphaned {
        product_id: ProductId,
        promotion_id: PromotionId,
    },
    /// The cart stays usable with fewer (or stale) free items.
    Skipped {
        product_id: ProductId,
        promotion_id: PromotionId,
        entitled: u32,
        error: CheckoutError,
    },
}

impl SyncOutcome {
    pub fn is_warning(&self) -> bool {
        matches!(self, SyncOutcome::Skipped { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entitlement_floors_per_bundle() {
        assert_eq!(entitlement(3, 2, 1), 1);
        assert_eq!(entitlement(4, 2, 1), 2);
        assert_eq!(entitlement(1, 2, 1), 0);
        assert_eq!(entitlement(7, 3, 2), 4);
        assert_eq!(entitlement(7, 0, 2), 0);
    }

    #[test]
    fn discount_price_is_floored_percentage() {
        let k = PromotionKind::Discount { percentage: 15 };
        assert_eq!(k.effective_price(10_000), 8_500);
        assert_eq!(PromotionKind::Discount { percentage: 150 }.effective_price(10_000), 0);
    }

    #[test]
    fn rule_parses_flattened_kind() {
        let json = r#"{"promotionId":"PR-1","type":"BUY_X_GET_Y","buyQuantity":2,"getQuantity":1,"productId":"P1"}"#;
        let rule: PromotionRule = serde_json::from_str(json).unwrap();
        assert_eq!(
            rule.kind,
            PromotionKind::BuyXGetY {
                buy_quantity: 2,
                get_quantity: 1,
                product_id: "P1".into()
            }
        );
    }
}
