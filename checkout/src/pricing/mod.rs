pub mod settlement;

use serde::{Deserialize, Serialize};

pub use settlement::{Settlement, Totals, compute_totals, discount_amount, round_cash, settle};

/// Whole Vietnamese dong.
pub type Money = i64;

/// Cash totals are rounded to this unit.
pub const CASH_ROUNDING_UNIT: Money = 1_000;

/// One loyalty point per this much of the final total.
pub const LOYALTY_ACCRUAL_DIVISOR: Money = 100;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountRule {
    #[default]
    None,
    #[serde(rename_all = "camelCase")]
    LoyaltyPoints { points_to_use: Money },
    #[serde(rename_all = "camelCase")]
    Percentage {
        percentage: u32,
        #[serde(default)]
        max_amount: Option<Money>,
    },
    #[serde(rename_all = "camelCase")]
    FixedAmount { amount: Money },
}

impl DiscountRule {
    pub fn is_none(&self) -> bool {
        matches!(self, DiscountRule::None)
    }
}
