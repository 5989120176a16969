//! # Invoice Total Recalculator
//!
//! Re-derives subtotal, actual discount, tax, total and remaining from the
//! live line items. Every service that adds, removes or resizes a line calls
//! [`recalculate`] as its last write before commit.
//!
//! `paid_cents` and both status columns are never touched here.

use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::DbResult;
use crate::repository::invoice;
use stockline_core::totals::InvoiceTotals;
use stockline_core::Invoice;

/// Recomputes and stores the derived totals of one invoice.
pub(crate) async fn recalculate(conn: &mut SqliteConnection, invoice_id: &str) -> DbResult<Invoice> {
    let mut current = invoice::require(conn, invoice_id).await?;
    let lines = invoice::lines(conn, invoice_id).await?;

    let totals = InvoiceTotals::for_invoice(&current, &lines);
    totals.apply_to(&mut current);
    invoice::update_totals(conn, &current).await?;

    debug!(
        invoice_id,
        subtotal = current.subtotal_cents,
        discount = current.actual_discount_cents,
        total = current.total_cents,
        remaining = current.remaining_cents,
        "Recalculated invoice totals"
    );

    Ok(current)
}
