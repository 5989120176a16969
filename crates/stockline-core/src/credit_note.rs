//! # Credit-Note Computation
//!
//! Validates a return request against the invoice's current lines and
//! computes the note's lines and totals.
//!
//! ## What a credit note touches
//! ```text
//! ReturnItem { line L, product P, qty 4 }
//!      │
//!      ├──► Ledger:         RETURN_IN P × 4            (stock 90 → 94)
//!      ├──► DeliveryLine:   delivered −= 4, returned += 4   (clamped)
//!      ├──► InvoiceLine L:  quantity 10 → 6, total = final_price × 6
//!      └──► Recalculator:   subtotal 10000 → 6000
//! ```
//!
//! `line_total = quantity × unit_price`. The unit price already carries the
//! line discount, so the discount is recorded but not subtracted again.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{DeliveryLineItem, Invoice, InvoiceLineItem, InvoiceStatus, TaxRate};
use crate::validation::validate_quantity;

/// One returned item as requested by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ReturnItem {
    pub invoice_line_id: String,
    pub product_id: String,
    pub quantity: i64,
    /// Defaults to the line's discounted unit price.
    pub unit_price_cents: Option<i64>,
    #[serde(default)]
    pub discount_cents: i64,
    /// Defaults to the line's tax rate.
    pub tax_rate_bps: Option<i64>,
}

/// A computed credit-note line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCreditLine {
    pub invoice_line_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub discount: Money,
    pub tax_rate: TaxRate,
    pub line_total: Money,
}

/// Lines and totals of a credit note about to be posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditNotePlan {
    pub lines: Vec<PlannedCreditLine>,
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
}

/// Validates `items` against the invoice and computes the note.
///
/// ## Rules
/// - Invoice is neither DRAFT nor CANCELLED
/// - At least one item; every quantity positive
/// - Each line belongs to the invoice and carries the item's product
/// - Per line, the summed quantity is at most what the line holds now
pub fn plan(invoice: &Invoice, lines: &[InvoiceLineItem], items: &[ReturnItem]) -> CoreResult<CreditNotePlan> {
    if matches!(invoice.status, InvoiceStatus::Draft | InvoiceStatus::Cancelled) {
        return Err(CoreError::invalid_state(
            "Invoice",
            &invoice.id,
            invoice.status.as_str(),
            "issue a credit note",
        ));
    }

    if items.is_empty() {
        return Err(ValidationError::Required {
            field: "return items".to_string(),
        }
        .into());
    }

    let by_id: HashMap<&str, &InvoiceLineItem> = lines.iter().map(|l| (l.id.as_str(), l)).collect();
    let mut requested: HashMap<&str, i64> = HashMap::new();
    let mut planned = Vec::with_capacity(items.len());

    for item in items {
        validate_quantity(item.quantity)?;

        let line = by_id
            .get(item.invoice_line_id.as_str())
            .copied()
            .filter(|l| l.invoice_id == invoice.id)
            .ok_or_else(|| ValidationError::ForeignReference {
                field: "invoice_line_id".to_string(),
                value: item.invoice_line_id.clone(),
                parent: format!("invoice {}", invoice.id),
            })?;

        if line.product_id != item.product_id {
            return Err(ValidationError::ForeignReference {
                field: "product_id".to_string(),
                value: item.product_id.clone(),
                parent: format!("invoice line {}", line.id),
            }
            .into());
        }

        let total_requested = requested.entry(line.id.as_str()).or_insert(0);
        *total_requested += item.quantity;
        if *total_requested > line.quantity {
            return Err(ValidationError::ExceedsAvailable {
                field: "return quantity".to_string(),
                line_id: line.id.clone(),
                available: line.quantity,
                requested: *total_requested,
            }
            .into());
        }

        let unit_price = item
            .unit_price_cents
            .map(Money::from_cents)
            .unwrap_or_else(|| line.final_price());
        let tax_rate = TaxRate::from_bps(item.tax_rate_bps.unwrap_or(line.tax_rate_bps));

        planned.push(PlannedCreditLine {
            invoice_line_id: line.id.clone(),
            product_id: line.product_id.clone(),
            quantity: item.quantity,
            unit_price,
            discount: Money::from_cents(item.discount_cents),
            tax_rate,
            line_total: unit_price.multiply_quantity(item.quantity),
        });
    }

    let subtotal: Money = planned.iter().map(|l| l.line_total).sum();
    let tax: Money = planned
        .iter()
        .map(|l| l.line_total.calculate_tax(l.tax_rate))
        .sum();

    Ok(CreditNotePlan {
        lines: planned,
        subtotal,
        tax,
        total: subtotal,
    })
}

/// Splits `quantity` returned units across the delivery lines of one invoice
/// line, moving at most each row's delivered quantity.
///
/// Returns `(delivery_line_id, moved)` for every row that changes. The sum
/// of `moved` is below `quantity` when less was delivered than returned.
pub fn distribute_return(quantity: i64, rows: &[DeliveryLineItem]) -> Vec<(String, i64)> {
    let mut left = quantity;
    let mut moves = Vec::new();
    for row in rows {
        if left == 0 {
            break;
        }
        let moved = left.min(row.quantity_delivered);
        if moved > 0 {
            moves.push((row.id.clone(), moved));
            left -= moved;
        }
    }
    moves
}

// =============================================================================
// Unit Tests
// =============================================================================
