//! Keeps Buy-X-Get-Y free items consistent with the paid lines.
//!
//! A pass reads a snapshot of the cart and returns the complete set of free
//! items the cart should carry, plus one outcome per group that changed.
//! Reservation failures degrade the result (fewer free items) and never
//! fail the pass.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::cart::model::{LineItem, ProductId, PromotionId};
use crate::error::CheckoutError;
use crate::metrics::counters::Counters;
use crate::pricing::Money;
use crate::promotion::types::{SyncOutcome, entitlement};
use crate::reservation::coordinator::ReservationCoordinator;
use crate::reservation::types::{LotId, ReleaseReason};

/// Output of one evaluator pass.
#[derive(Debug, Default)]
pub struct PromotionSync {
    /// Every free item the cart should hold after this pass, in parent order.
    pub free_items: Vec<LineItem>,
    pub outcomes: Vec<SyncOutcome>,
}

impl PromotionSync {
    pub fn warnings(&self) -> impl Iterator<Item = &SyncOutcome> {
        self.outcomes.iter().filter(|o| o.is_warning())
    }
}

/// Paid lines sharing `(product_id, promotion_id)`, summed.
struct PaidGroup {
    product_id: ProductId,
    promotion_id: PromotionId,
    product_name: String,
    unit_price: Money,
    /// Lot of the earliest paid line; free units are drawn from it.
    lot_id: Option<LotId>,
    quantity: u32,
    buy: u32,
    get: u32,
}

impl PaidGroup {
    fn matches(&self, line: &LineItem) -> bool {
        line.product_id == self.product_id
            && line.promotion_id.as_deref() == Some(self.promotion_id.as_str())
    }
}

pub struct PromotionEvaluator {
    coordinator: Arc<ReservationCoordinator>,
}

impl PromotionEvaluator {
    pub fn new(coordinator: Arc<ReservationCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Runs one reconciliation pass over `items`.
    ///
    /// With no identified actor, free items are created and resized without
    /// reservations.
    #[instrument(skip(self, items, actor_id), target = "promotion", fields(lines = items.len()))]
    pub async fn sync(&self, items: &[LineItem], actor_id: Option<&str>) -> PromotionSync {
        let groups = group_paid_lines(items);

        let mut existing: Vec<Option<LineItem>> = items
            .iter()
            .filter(|l| l.is_free_item)
            .cloned()
            .map(Some)
            .collect();

        let mut out = PromotionSync::default();

        for g in &groups {
            let entitled = entitlement(g.quantity, g.buy, g.get);
            let current = existing
                .iter_mut()
                .find(|slot| slot.as_ref().is_some_and(|f| g.matches(f)))
                .and_then(Option::take);

            match current {
                None if entitled == 0 => {}
                None => match self.grant(g, entitled, actor_id).await {
                    Ok(free) => {
                        out.outcomes.push(SyncOutcome::Granted {
                            product_id: g.product_id.clone(),
                            promotion_id: g.promotion_id.clone(),
                            quantity: entitled,
                        });
                        out.free_items.push(free);
                    }
                    Err(error) => out.outcomes.push(self.skipped(g, entitled, error)),
                },
                Some(mut free) if entitled == 0 => {
                    self.coordinator
                        .release_all(&mut free.reservations, ReleaseReason::PromotionRevoked)
                        .await;
                    out.outcomes.push(SyncOutcome::Revoked {
                        product_id: g.product_id.clone(),
                        promotion_id: g.promotion_id.clone(),
                    });
                }
                Some(free) if free.quantity == entitled => out.free_items.push(free),
                Some(mut free) => {
                    let from = free.quantity;
                    match self.resize(&mut free, entitled, actor_id).await {
                        Ok(()) => out.outcomes.push(SyncOutcome::Resized {
                            product_id: g.product_id.clone(),
                            promotion_id: g.promotion_id.clone(),
                            from,
                            to: entitled,
                        }),
                        Err(error) => out.outcomes.push(self.skipped(g, entitled, error)),
                    }
                    out.free_items.push(free);
                }
            }
        }

        // Anything left has no paid parent.
        for mut orphan in existing.into_iter().flatten() {
            self.coordinator
                .release_all(&mut orphan.reservations, ReleaseReason::OrphanedFreeItem)
                .await;
            Counters::incr(&self.coordinator.counters().orphans_released);
            debug!(line_id = %orphan.id, product_id = %orphan.product_id, "orphaned free item removed");
            out.outcomes.push(SyncOutcome::Orphaned {
                product_id: orphan.product_id,
                promotion_id: orphan.promotion_id.unwrap_or_default(),
            });
        }

        out
    }

    async fn grant(
        &self,
        g: &PaidGroup,
        entitled: u32,
        actor_id: Option<&str>,
    ) -> Result<LineItem, CheckoutError> {
        let reservations = match actor_id {
            None => Vec::new(),
            Some(actor) => {
                let lot_id = g
                    .lot_id
                    .as_deref()
                    .ok_or_else(|| CheckoutError::MissingLotReference {
                        product_id: g.product_id.clone(),
                    })?;
                vec![self.coordinator.reserve(lot_id, entitled, actor).await?]
            }
        };

        Ok(LineItem {
            id: Uuid::new_v4(),
            product_id: g.product_id.clone(),
            product_name: g.product_name.clone(),
            lot_id: g.lot_id.clone(),
            lot_quantity: None,
            quantity: entitled,
            unit_price: g.unit_price,
            effective_unit_price: 0,
            is_free_item: true,
            promotion_id: Some(g.promotion_id.clone()),
            buy_quantity: None,
            get_quantity: None,
            reservations,
            needs_attention: false,
        })
    }

    /// On failure `free` keeps its previous quantity and whatever is still held.
    async fn resize(
        &self,
        free: &mut LineItem,
        entitled: u32,
        actor_id: Option<&str>,
    ) -> Result<(), CheckoutError> {
        let Some(actor) = actor_id else {
            free.quantity = entitled;
            return Ok(());
        };
        let Some(lot_id) = free.lot_id.clone() else {
            return Err(CheckoutError::MissingLotReference {
                product_id: free.product_id.clone(),
            });
        };

        let held = std::mem::take(&mut free.reservations);
        match self
            .coordinator
            .adjust_quantity(&lot_id, held, entitled, actor)
            .await
        {
            Ok(handles) => {
                free.quantity = entitled;
                free.reservations = handles;
                free.needs_attention = false;
                Ok(())
            }
            Err(failure) => {
                free.reservations = failure.held;
                if !free.is_fully_reserved(Utc::now()) {
                    free.needs_attention = true;
                }
                Err(failure.error)
            }
        }
    }

    fn skipped(&self, g: &PaidGroup, entitled: u32, error: CheckoutError) -> SyncOutcome {
        Counters::incr(&self.coordinator.counters().promotion_warnings);
        warn!(
            product_id = %g.product_id,
            promotion_id = %g.promotion_id,
            entitled,
            error = %error,
            "free item could not be synchronized; cart continues without it"
        );
        SyncOutcome::Skipped {
            product_id: g.product_id.clone(),
            promotion_id: g.promotion_id.clone(),
            entitled,
            error,
        }
    }
}

fn group_paid_lines(items: &[LineItem]) -> Vec<PaidGroup> {
    let mut groups: Vec<PaidGroup> = Vec::new();

    for line in items.iter().filter(|l| !l.is_free_item) {
        let Some((buy, get)) = line.buy_x_get_y() else {
            continue;
        };

        if let Some(g) = groups.iter_mut().find(|g| g.matches(line)) {
            g.quantity = g.quantity.saturating_add(line.quantity);
            if g.lot_id.is_none() {
                g.lot_id = line.lot_id.clone();
            }
            continue;
        }

        groups.push(PaidGroup {
            product_id: line.product_id.clone(),
            promotion_id: line.promotion_id.clone().unwrap_or_default(),
            product_name: line.product_name.clone(),
            unit_price: line.unit_price,
            lot_id: line.lot_id.clone(),
            quantity: line.quantity,
            buy,
            get,
        });
    }

    groups
}
