//! Totals, discounts, cash rounding and tender validation.
//!
//! Pure functions over a snapshot of line items; no I/O.

use serde::{Deserialize, Serialize};

use crate::cart::model::{Customer, LineItem, PaymentMethod};
use crate::error::CheckoutError;
use crate::pricing::{CASH_ROUNDING_UNIT, DiscountRule, LOYALTY_ACCRUAL_DIVISOR, Money};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub subtotal: Money,
    pub discount_amount: Money,
    pub final_total: Money,
    pub rounded_cash_total: Money,
    /// `rounded_cash_total - final_total`; may be negative.
    pub rounding_adjustment: Money,
    /// Rounded for cash, exact otherwise.
    pub payable: Money,
    pub loyalty_points_earned: Money,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub payment_method: PaymentMethod,
    pub payable: Money,
    pub amount_given: Money,
    pub change_returned: Money,
}

pub fn subtotal(items: &[LineItem]) -> Money {
    items.iter().map(LineItem::line_total).sum()
}

/// Discount never exceeds the subtotal.
pub fn discount_amount(rule: &DiscountRule, subtotal: Money) -> Money {
    let subtotal = subtotal.max(0);
    let raw = match rule {
        DiscountRule::None => 0,
        DiscountRule::LoyaltyPoints { points_to_use } => *points_to_use,
        DiscountRule::Percentage {
            percentage,
            max_amount,
        } => {
            let pct = subtotal * Money::from(*percentage) / 100;
            match max_amount {
                Some(cap) => pct.min(*cap),
                None => pct,
            }
        }
        DiscountRule::FixedAmount { amount } => *amount,
    };

    raw.clamp(0, subtotal)
}

/// Half-up to the nearest `CASH_ROUNDING_UNIT`.
pub fn round_cash(final_total: Money) -> Money {
    let half = CASH_ROUNDING_UNIT / 2;
    (final_total + half).div_euclid(CASH_ROUNDING_UNIT) * CASH_ROUNDING_UNIT
}

pub fn compute_totals(
    items: &[LineItem],
    discount: &DiscountRule,
    payment_method: Option<PaymentMethod>,
    customer: &Customer,
) -> Totals {
    let subtotal = subtotal(items);
    let discount_amount = discount_amount(discount, subtotal);
    let final_total = (subtotal - discount_amount).max(0);
    let rounded_cash_total = round_cash(final_total);

    let payable = match payment_method {
        Some(PaymentMethod::Cash) => rounded_cash_total,
        _ => final_total,
    };

    let loyalty_points_earned = if customer.is_identified() {
        final_total / LOYALTY_ACCRUAL_DIVISOR
    } else {
        0
    };

    Totals {
        subtotal,
        discount_amount,
        final_total,
        rounded_cash_total,
        rounding_adjustment: rounded_cash_total - final_total,
        payable,
        loyalty_points_earned,
    }
}

/// Validates tender for `payment_method`.
///
/// Non-cash payments are taken for the exact final total with no change.
pub fn settle(
    totals: &Totals,
    payment_method: PaymentMethod,
    cash_tendered: Money,
) -> Result<Settlement, CheckoutError> {
    match payment_method {
        PaymentMethod::Cash => {
            let required = totals.rounded_cash_total;
            if cash_tendered < required {
                return Err(CheckoutError::InsufficientTender {
                    required,
                    tendered: cash_tendered,
                });
            }
            Ok(Settlement {
                payment_method,
                payable: required,
                amount_given: cash_tendered,
                change_returned: cash_tendered - required,
            })
        }
        PaymentMethod::Card | PaymentMethod::Transfer => Ok(Settlement {
            payment_method,
            payable: totals.final_total,
            amount_given: totals.final_total,
            change_returned: 0,
        }),
    }
}
