//! # Credit Note Service
//!
//! Posting and deleting returns against an invoice.
//!
//! ## Posting
//! ```text
//! per planned line
//!   ├── credit_note_lines row
//!   ├── RETURN_IN product × qty            reference credit_note:<id>
//!   ├── delivery rows: delivered → returned (oldest first, recorded as moves)
//!   └── invoice line quantity −= qty
//! recalculate invoice
//! ```
//!
//! Deleting replays the recorded moves backwards, so the delivery rows end
//! exactly where they were.
//!
//! Both directions wait while the invoice's latest regular delivery is
//! pending or failed: a failure restore already counts those goods.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use super::ledger::{self, Posting};
use super::recalculator::recalculate;
use super::{DocumentKind, Engine};
use crate::error::DbResult;
use crate::repository::credit_note::{self as credit_note_repo, DeliveryMove};
use crate::repository::{delivery as delivery_repo, invoice as invoice_repo};
use stockline_core::credit_note::{distribute_return, plan, ReturnItem};
use stockline_core::delivery::check_shipments_settled;
use stockline_core::{CoreError, CreditNote, CreditNoteLine, CreditNoteStatus, StockMovementType, StockReference};

/// Credit note use cases.
pub struct CreditNoteService<'a> {
    engine: &'a Engine,
}

impl<'a> CreditNoteService<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        CreditNoteService { engine }
    }

    /// Posts a credit note for `items` and returns their goods to stock.
    pub async fn create(
        &self,
        invoice_id: &str,
        items: &[ReturnItem],
        reason: Option<&str>,
        actor_id: &str,
    ) -> DbResult<CreditNote> {
        let actor = self.engine.actor(actor_id);

        let mut tx = self.engine.db().pool().begin().await?;
        let invoice = invoice_repo::require(&mut tx, invoice_id).await?;
        let deliveries = delivery_repo::for_invoice(&mut tx, &invoice.id).await?;
        check_shipments_settled(&invoice.id, &deliveries, "issue a credit note")?;
        let lines = invoice_repo::lines(&mut tx, &invoice.id).await?;
        let planned = plan(&invoice, &lines, items)?;

        let note = CreditNote {
            id: Uuid::new_v4().to_string(),
            code: self.engine.next_code(DocumentKind::CreditNote),
            invoice_id: invoice.id.clone(),
            customer_id: invoice.customer_id.clone(),
            subtotal_cents: planned.subtotal.cents(),
            tax_cents: planned.tax.cents(),
            total_cents: planned.total.cents(),
            status: CreditNoteStatus::Posted,
            reason: reason.map(str::trim).filter(|r| !r.is_empty()).map(str::to_string),
            created_by: actor.clone(),
            created_at: Utc::now(),
        };
        credit_note_repo::insert(&mut tx, &note).await?;

        let reference = StockReference::CreditNote(note.id.clone()).to_string();
        for line in &planned.lines {
            credit_note_repo::insert_line(
                &mut tx,
                &CreditNoteLine {
                    id: Uuid::new_v4().to_string(),
                    credit_note_id: note.id.clone(),
                    invoice_line_id: line.invoice_line_id.clone(),
                    product_id: line.product_id.clone(),
                    quantity: line.quantity,
                    unit_price_cents: line.unit_price.cents(),
                    discount_cents: line.discount.cents(),
                    tax_rate_bps: line.tax_rate.bps(),
                    line_total_cents: line.line_total.cents(),
                },
            )
            .await?;

            ledger::post(
                &mut tx,
                Posting::new(&line.product_id, StockMovementType::ReturnIn, line.quantity, &reference, &actor),
            )
            .await?;

            let rows = delivery_repo::lines_for_invoice_line(&mut tx, &line.invoice_line_id).await?;
            for (row_id, moved) in distribute_return(line.quantity, &rows) {
                delivery_repo::shift_returned(&mut tx, &row_id, moved).await?;
                credit_note_repo::insert_move(
                    &mut tx,
                    &DeliveryMove {
                        id: Uuid::new_v4().to_string(),
                        credit_note_id: note.id.clone(),
                        delivery_line_item_id: row_id,
                        quantity: moved,
                    },
                )
                .await?;
            }

            // Re-read: several items may target the same line.
            let mut invoice_line = invoice_repo::fetch_line(&mut tx, &line.invoice_line_id)
                .await?
                .ok_or_else(|| CoreError::not_found("InvoiceLineItem", &line.invoice_line_id))?;
            invoice_line.resize(invoice_line.quantity - line.quantity);
            invoice_repo::update_line_quantity(&mut tx, &invoice_line).await?;
        }

        let updated = recalculate(&mut tx, &invoice.id).await?;
        tx.commit().await?;

        info!(
            id = %note.id,
            invoice_id = %invoice.id,
            total = note.total_cents,
            invoice_total = updated.total_cents,
            "Credit note posted"
        );
        Ok(note)
    }

    /// Deletes a credit note and puts its goods back on the invoice.
    ///
    /// Fails with `InsufficientStock` when the returned goods have been
    /// sold again in the meantime.
    pub async fn delete(&self, credit_note_id: &str, actor_id: &str) -> DbResult<()> {
        let actor = self.engine.actor(actor_id);

        let mut tx = self.engine.db().pool().begin().await?;
        let note = credit_note_repo::require(&mut tx, credit_note_id).await?;
        let deliveries = delivery_repo::for_invoice(&mut tx, &note.invoice_id).await?;
        check_shipments_settled(&note.invoice_id, &deliveries, "delete a credit note")?;

        let reference = StockReference::CreditNote(note.id.clone()).to_string();
        ledger::reverse_by_reference(
            &mut tx,
            self.engine.strategy(),
            &reference,
            StockMovementType::ReturnIn,
            &actor,
        )
        .await?;

        for delivery_move in credit_note_repo::moves(&mut tx, &note.id).await? {
            let shifted =
                delivery_repo::shift_returned(&mut tx, &delivery_move.delivery_line_item_id, -delivery_move.quantity)
                    .await?;
            if !shifted {
                debug!(row = %delivery_move.delivery_line_item_id, "Delivery row gone, move not replayed");
            }
        }

        for line in credit_note_repo::lines(&mut tx, &note.id).await? {
            let mut invoice_line = invoice_repo::fetch_line(&mut tx, &line.invoice_line_id)
                .await?
                .ok_or_else(|| {
                    CoreError::invalid_state(
                        "CreditNote",
                        &note.id,
                        "invoice line removed",
                        "restore returned quantities",
                    )
                })?;
            invoice_line.resize(invoice_line.quantity + line.quantity);
            invoice_repo::update_line_quantity(&mut tx, &invoice_line).await?;
        }

        credit_note_repo::delete(&mut tx, &note.id).await?;
        recalculate(&mut tx, &note.invoice_id).await?;
        tx.commit().await?;

        info!(id = %note.id, invoice_id = %note.invoice_id, "Credit note deleted");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
