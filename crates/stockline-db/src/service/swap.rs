//! # Swap Service
//!
//! Exchanges invoiced goods for other goods of at least the same value.
//!
//! ## Apply
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  groups ──► validate_groups (all or nothing)                            │
//! │         ──► swap_groups + swap_group_items   (source of truth)          │
//! │         ──► swap_details                     (flat projection)          │
//! │                                                                         │
//! │  invoice lines                                                          │
//! │    take old qty      snapshot line, shrink or delete                    │
//! │    add replacement   grow matching line or create one at list price     │
//! │                                                                         │
//! │  ledger (swap:<id>)  SWAP_IN old items, SWAP_OUT replacements           │
//! │  delivery            synthetic, DELIVERED, one row per addition         │
//! │  recalculate invoice                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reversal walks the same steps backwards from the stored snapshots and
//! additions, so update and delete leave no trace of the old application.
//!
//! Nothing here runs while the invoice's latest regular delivery is pending
//! or failed; a failure restore would count the swapped goods.

use std::collections::HashMap;

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

use super::ledger::{self, Posting};
use super::recalculator::recalculate;
use super::{DocumentKind, Engine};
use crate::error::DbResult;
use crate::repository::swap::{self as swap_repo, SwapLineAddition, SwapLineSnapshot};
use crate::repository::{delivery as delivery_repo, invoice as invoice_repo, product};
use stockline_core::delivery::check_shipments_settled;
use stockline_core::money::Money;
use stockline_core::swap::{
    check_swappable, flatten, old_quantities, plan_lines, replacement_quantities, validate_groups, FlatDetail,
    LinePlan, SwapGroup, SwapValuation,
};
use stockline_core::totals::price_line;
use stockline_core::{
    CoreError, Delivery, DeliveryLineItem, DeliveryStatus, DiscountType, Invoice, InvoiceLineItem, Product,
    StockMovementType, StockReference, Swap, SwapDetail, SwapStatus,
};

/// Swap use cases.
pub struct SwapService<'a> {
    engine: &'a Engine,
}

/// Everything decided before a swap touches the database.
struct Prepared {
    valuation: SwapValuation,
    lines: LinePlan,
    details: Vec<FlatDetail>,
}

impl<'a> SwapService<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        SwapService { engine }
    }

    /// Validates and applies a swap against an invoice.
    ///
    /// One rejected group rejects the whole swap; nothing is written.
    pub async fn create(
        &self,
        invoice_id: &str,
        groups: &[SwapGroup],
        notes: Option<&str>,
        actor_id: &str,
    ) -> DbResult<Swap> {
        let actor = self.engine.actor(actor_id);

        let mut tx = self.engine.db().pool().begin().await?;
        let invoice = invoice_repo::require(&mut tx, invoice_id).await?;
        let deliveries = delivery_repo::for_invoice(&mut tx, &invoice.id).await?;
        check_swappable(&invoice, &deliveries)?;
        let prepared = prepare(&mut tx, &invoice, groups).await?;

        let now = Utc::now();
        let swap = Swap {
            id: Uuid::new_v4().to_string(),
            code: self.engine.next_code(DocumentKind::Swap),
            invoice_id: invoice.id.clone(),
            status: SwapStatus::Completed,
            base_total_cents: prepared.valuation.base_total.cents(),
            difference_cents: prepared.valuation.difference.cents(),
            notes: clean_notes(notes),
            created_by: actor.clone(),
            created_at: now,
            updated_at: now,
        };
        swap_repo::insert(&mut tx, &swap).await?;

        self.apply(&mut tx, &swap, groups, &prepared, &actor).await?;
        recalculate(&mut tx, &invoice.id).await?;
        tx.commit().await?;

        info!(
            id = %swap.id,
            invoice_id = %invoice.id,
            groups = groups.len(),
            base_total = swap.base_total_cents,
            difference = swap.difference_cents,
            "Swap applied"
        );
        Ok(swap)
    }

    /// Replaces a swap's groups and/or notes.
    ///
    /// With `groups` the old application is fully reversed and the new
    /// groups applied in the same transaction. `None` edits the notes only.
    pub async fn update(
        &self,
        swap_id: &str,
        groups: Option<&[SwapGroup]>,
        notes: Option<&str>,
        actor_id: &str,
    ) -> DbResult<Swap> {
        let actor = self.engine.actor(actor_id);

        let mut tx = self.engine.db().pool().begin().await?;
        let mut swap = swap_repo::require(&mut tx, swap_id).await?;
        if notes.is_some() {
            swap.notes = clean_notes(notes);
        }

        if let Some(groups) = groups {
            let invoice = invoice_repo::require(&mut tx, &swap.invoice_id).await?;
            let deliveries = delivery_repo::for_invoice(&mut tx, &invoice.id).await?;
            check_swappable(&invoice, &deliveries)?;

            self.reverse(&mut tx, &swap, &actor).await?;
            let prepared = prepare(&mut tx, &invoice, groups).await?;
            swap.base_total_cents = prepared.valuation.base_total.cents();
            swap.difference_cents = prepared.valuation.difference.cents();

            self.apply(&mut tx, &swap, groups, &prepared, &actor).await?;
            recalculate(&mut tx, &invoice.id).await?;
        }

        swap_repo::update_header(&mut tx, &swap).await?;
        let updated = swap_repo::require(&mut tx, &swap.id).await?;
        tx.commit().await?;

        info!(id = %updated.id, regrouped = groups.is_some(), difference = updated.difference_cents, "Swap updated");
        Ok(updated)
    }

    /// Reverses a swap completely and deletes it.
    pub async fn delete(&self, swap_id: &str, actor_id: &str) -> DbResult<()> {
        let actor = self.engine.actor(actor_id);

        let mut tx = self.engine.db().pool().begin().await?;
        let swap = swap_repo::require(&mut tx, swap_id).await?;
        let deliveries = delivery_repo::for_invoice(&mut tx, &swap.invoice_id).await?;
        check_shipments_settled(&swap.invoice_id, &deliveries, "delete a swap")?;

        self.reverse(&mut tx, &swap, &actor).await?;
        swap_repo::delete(&mut tx, &swap.id).await?;
        recalculate(&mut tx, &swap.invoice_id).await?;
        tx.commit().await?;

        info!(id = %swap.id, invoice_id = %swap.invoice_id, "Swap deleted");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Apply / Reverse
    // -------------------------------------------------------------------------

    async fn apply(
        &self,
        conn: &mut SqliteConnection,
        swap: &Swap,
        groups: &[SwapGroup],
        prepared: &Prepared,
        actor: &str,
    ) -> DbResult<()> {
        swap_repo::insert_groups(conn, &swap.id, groups, &prepared.valuation.groups).await?;
        for detail in &prepared.details {
            swap_repo::insert_detail(
                conn,
                &SwapDetail {
                    id: Uuid::new_v4().to_string(),
                    swap_id: swap.id.clone(),
                    old_item_id: detail.old_product_id.clone(),
                    replacement_item_id: detail.replacement_product_id.clone(),
                    old_item_cogs_cents: detail.old_item_cogs.cents(),
                    replacement_item_cogs_cents: detail.replacement_item_cogs.cents(),
                    old_item_quantity: detail.old_item_quantity,
                    replacement_item_quantity: detail.replacement_item_quantity,
                },
            )
            .await?;
        }

        for take in &prepared.lines.takes {
            let mut line = require_line(conn, &take.line_id).await?;
            swap_repo::insert_snapshot(
                conn,
                &SwapLineSnapshot {
                    id: Uuid::new_v4().to_string(),
                    swap_id: swap.id.clone(),
                    line_id: line.id.clone(),
                    product_id: line.product_id.clone(),
                    taken: take.taken,
                    price_cents: line.price_cents,
                    discount: line.discount,
                    discount_type: line.discount_type,
                    final_price_cents: line.final_price_cents,
                    tax_rate_bps: line.tax_rate_bps,
                    line_created_at: line.created_at,
                },
            )
            .await?;

            if take.remaining == 0 {
                invoice_repo::delete_line(conn, &line.id).await?;
            } else {
                line.resize(take.remaining);
                invoice_repo::update_line_quantity(conn, &line).await?;
            }
        }

        let mut added = Vec::with_capacity(prepared.lines.additions.len());
        for addition in &prepared.lines.additions {
            let (line_id, created_line) = match &addition.existing_line_id {
                Some(line_id) => {
                    let mut line = require_line(conn, line_id).await?;
                    line.resize(line.quantity + addition.quantity);
                    invoice_repo::update_line_quantity(conn, &line).await?;
                    (line.id, false)
                }
                None => {
                    let priced = price_line(addition.unit_price, 0, DiscountType::Amount, addition.quantity);
                    let line = InvoiceLineItem {
                        id: Uuid::new_v4().to_string(),
                        invoice_id: swap.invoice_id.clone(),
                        product_id: addition.product_id.clone(),
                        quantity: addition.quantity,
                        price_cents: addition.unit_price.cents(),
                        discount: 0,
                        discount_type: DiscountType::Amount,
                        final_price_cents: priced.final_price.cents(),
                        total_price_cents: priced.total_price.cents(),
                        tax_rate_bps: addition.tax_rate_bps,
                        created_at: Utc::now(),
                    };
                    invoice_repo::insert_line(conn, &line).await?;
                    (line.id, true)
                }
            };

            swap_repo::insert_addition(
                conn,
                &SwapLineAddition {
                    id: Uuid::new_v4().to_string(),
                    swap_id: swap.id.clone(),
                    line_id: line_id.clone(),
                    product_id: addition.product_id.clone(),
                    quantity: addition.quantity,
                    created_line,
                },
            )
            .await?;
            added.push((line_id, addition.product_id.clone(), addition.quantity));
        }

        let reference = StockReference::Swap(swap.id.clone()).to_string();
        for (product_id, quantity) in old_quantities(groups) {
            ledger::post(
                conn,
                Posting::new(&product_id, StockMovementType::SwapIn, quantity, &reference, actor),
            )
            .await?;
        }
        for (product_id, quantity) in replacement_quantities(groups) {
            ledger::post(
                conn,
                Posting::new(&product_id, StockMovementType::SwapOut, quantity, &reference, actor),
            )
            .await?;
        }

        self.ship_replacements(conn, swap, &added, actor).await
    }

    /// Synthetic delivery that records the replacement goods as handed over.
    async fn ship_replacements(
        &self,
        conn: &mut SqliteConnection,
        swap: &Swap,
        added: &[(String, String, i64)],
        actor: &str,
    ) -> DbResult<()> {
        let now = Utc::now();
        let delivery = Delivery {
            id: Uuid::new_v4().to_string(),
            code: self.engine.next_code(DocumentKind::Delivery),
            invoice_id: swap.invoice_id.clone(),
            swap_id: Some(swap.id.clone()),
            status: DeliveryStatus::Delivered,
            return_reason: None,
            completed_at: Some(now),
            created_by: actor.to_string(),
            created_at: now,
            updated_at: now,
        };
        delivery_repo::insert(conn, &delivery).await?;

        for (line_id, product_id, quantity) in added {
            delivery_repo::insert_line(
                conn,
                &DeliveryLineItem {
                    id: Uuid::new_v4().to_string(),
                    delivery_id: delivery.id.clone(),
                    invoice_line_id: Some(line_id.clone()),
                    product_id: product_id.clone(),
                    quantity_to_deliver: *quantity,
                    quantity_delivered: *quantity,
                    quantity_returned: 0,
                },
            )
            .await?;
        }

        debug!(swap_id = %swap.id, delivery_id = %delivery.id, rows = added.len(), "Swap delivery recorded");
        Ok(())
    }

    /// Undoes [`apply`](Self::apply): stock, replacement lines, taken lines,
    /// swap delivery, groups and details. The header stays.
    async fn reverse(&self, conn: &mut SqliteConnection, swap: &Swap, actor: &str) -> DbResult<()> {
        let reference = StockReference::Swap(swap.id.clone()).to_string();
        let strategy = self.engine.strategy();
        ledger::reverse_by_reference(conn, strategy, &reference, StockMovementType::SwapOut, actor).await?;
        ledger::reverse_by_reference(conn, strategy, &reference, StockMovementType::SwapIn, actor).await?;

        for addition in swap_repo::additions(conn, &swap.id).await?.into_iter().rev() {
            let mut line = invoice_repo::fetch_line(conn, &addition.line_id)
                .await?
                .ok_or_else(|| line_changed(swap, &addition.line_id))?;
            let quantity = line.quantity - addition.quantity;
            if quantity < 0 {
                return Err(line_changed(swap, &line.id).into());
            }
            if quantity == 0 && addition.created_line {
                invoice_repo::delete_line(conn, &line.id).await?;
            } else {
                line.resize(quantity);
                invoice_repo::update_line_quantity(conn, &line).await?;
            }
        }

        for snapshot in swap_repo::snapshots(conn, &swap.id).await?.into_iter().rev() {
            match invoice_repo::fetch_line(conn, &snapshot.line_id).await? {
                Some(mut line) => {
                    line.resize(line.quantity + snapshot.taken);
                    invoice_repo::update_line_quantity(conn, &line).await?;
                }
                None => {
                    let final_price = Money::from_cents(snapshot.final_price_cents);
                    invoice_repo::insert_line(
                        conn,
                        &InvoiceLineItem {
                            id: snapshot.line_id.clone(),
                            invoice_id: swap.invoice_id.clone(),
                            product_id: snapshot.product_id.clone(),
                            quantity: snapshot.taken,
                            price_cents: snapshot.price_cents,
                            discount: snapshot.discount,
                            discount_type: snapshot.discount_type,
                            final_price_cents: snapshot.final_price_cents,
                            total_price_cents: final_price.multiply_quantity(snapshot.taken).cents(),
                            tax_rate_bps: snapshot.tax_rate_bps,
                            created_at: snapshot.line_created_at,
                        },
                    )
                    .await?;
                }
            }
        }

        for delivery in delivery_repo::for_swap(conn, &swap.id).await? {
            delivery_repo::delete(conn, &delivery.id).await?;
        }
        swap_repo::clear_children(conn, &swap.id).await?;

        debug!(swap_id = %swap.id, "Swap application reversed");
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn prepare(conn: &mut SqliteConnection, invoice: &Invoice, groups: &[SwapGroup]) -> DbResult<Prepared> {
    let ids = groups
        .iter()
        .flat_map(|g| g.old_items.iter().chain(&g.replacement_items))
        .map(|item| item.product_id.as_str());
    let products: HashMap<String, Product> = product::require_many(conn, ids).await?;

    let valuation = validate_groups(groups, &products)?;
    let lines = invoice_repo::lines(conn, &invoice.id).await?;
    let line_plan = plan_lines(&lines, groups, &products)?;
    let details = flatten(groups, &products)?;

    Ok(Prepared {
        valuation,
        lines: line_plan,
        details,
    })
}

async fn require_line(conn: &mut SqliteConnection, id: &str) -> DbResult<InvoiceLineItem> {
    invoice_repo::fetch_line(conn, id)
        .await?
        .ok_or_else(|| CoreError::not_found("InvoiceLineItem", id).into())
}

fn line_changed(swap: &Swap, line_id: &str) -> CoreError {
    CoreError::invalid_state(
        "Swap",
        &swap.id,
        format!("invoice line {} changed since the swap", line_id),
        "reverse swap",
    )
}

fn clean_notes(notes: Option<&str>) -> Option<String> {
    notes.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string)
}

// =============================================================================
// Unit Tests
// =============================================================================
