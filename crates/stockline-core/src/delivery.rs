//! # Delivery State Machine
//!
//! Guards and status derivations for shipments against an invoice. The
//! database service runs these against rows it fetched inside the
//! transaction, then posts ledger movements and writes the outcome.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   create ──► PENDING ──┬──► DELIVERED   invoice: DELIVERED / COMPLETED │
//! │                        │                                                │
//! │                        ├──► RETURNED  ┐ invoice: RETURNED               │
//! │                        └──► CANCELLED ┘ allow_redelivery = false        │
//! │                                         RETURN_IN per carried line      │
//! │                                                │                        │
//! │              approve_redelivery ◄──────────────┘                        │
//! │              allow_redelivery = true, invoice SENT, SALES_OUT again     │
//! │                        │                                                │
//! │                        ▼                                                │
//! │                     create (consumes the approval)                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Deliveries a swap creates (`swap_id` set) live outside this machine:
//! they are born DELIVERED and only the swap engine removes them. Goods
//! they handed over are never planned into a regular delivery, so a failed
//! attempt only brings back what it actually carried.

use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};
use crate::types::{Delivery, DeliveryLineItem, DeliveryStatus, Invoice, InvoiceLineItem, InvoiceStatus, PaymentStatus};

const ENTITY: &str = "Delivery";

/// What creating a delivery does besides inserting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatePlan {
    /// The previous attempt failed and this one uses up the approval.
    pub consumes_approval: bool,
}

/// A delivery line to create for an invoice line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDeliveryLine {
    pub invoice_line_id: String,
    pub product_id: String,
    pub quantity_to_deliver: i64,
}

/// The newest regular (non-swap) delivery.
///
/// `deliveries` must be in creation order.
pub fn latest_regular(deliveries: &[Delivery]) -> Option<&Delivery> {
    deliveries.iter().rev().find(|d| !d.is_synthetic())
}

/// Checks whether a new delivery may be created for `invoice`.
///
/// ## Rules
/// - Invoice is SENT, PAID, or RETURNED
/// - A required delivery note has been attached
/// - No regular delivery is active (PENDING / DELIVERED)
/// - If the latest one failed, redelivery was approved
pub fn check_create(invoice: &Invoice, deliveries: &[Delivery]) -> CoreResult<CreatePlan> {
    if !matches!(
        invoice.status,
        InvoiceStatus::Sent | InvoiceStatus::Paid | InvoiceStatus::Returned
    ) {
        return Err(CoreError::invalid_state(
            "Invoice",
            &invoice.id,
            invoice.status.as_str(),
            "create delivery",
        ));
    }

    if invoice.requires_delivery_note && invoice.delivery_note_number.is_none() {
        return Err(CoreError::invalid_state(
            "Invoice",
            &invoice.id,
            invoice.status.as_str(),
            "create delivery without a delivery note",
        ));
    }

    if let Some(active) = deliveries
        .iter()
        .find(|d| !d.is_synthetic() && d.status.is_active())
    {
        return Err(CoreError::conflict(
            ENTITY,
            &active.id,
            format!("invoice {} already has an active delivery", invoice.id),
        ));
    }

    match latest_regular(deliveries) {
        None => Ok(CreatePlan {
            consumes_approval: false,
        }),
        Some(_) if invoice.allow_redelivery => Ok(CreatePlan {
            consumes_approval: true,
        }),
        Some(failed) => Err(CoreError::invalid_state(
            ENTITY,
            &failed.id,
            failed.status.as_str(),
            "create another delivery without redelivery approval",
        )),
    }
}

/// Quantity per invoice line that swap deliveries have handed over and the
/// customer still holds.
pub fn handed_over(swap_rows: &[DeliveryLineItem]) -> HashMap<String, i64> {
    let mut handed = HashMap::new();
    for row in swap_rows {
        if let Some(line_id) = &row.invoice_line_id {
            *handed.entry(line_id.clone()).or_insert(0) += row.quantity_delivered;
        }
    }
    handed
}

/// One delivery line per invoice line that still has goods to ship.
///
/// `handed` (see [`handed_over`]) is subtracted from each line.
pub fn plan_lines(lines: &[InvoiceLineItem], handed: &HashMap<String, i64>) -> Vec<PlannedDeliveryLine> {
    lines
        .iter()
        .filter_map(|l| {
            let quantity = l.quantity - handed.get(&l.id).copied().unwrap_or(0);
            (quantity > 0).then(|| PlannedDeliveryLine {
                invoice_line_id: l.id.clone(),
                product_id: l.product_id.clone(),
                quantity_to_deliver: quantity,
            })
        })
        .collect()
}

/// Credit notes and swaps move goods between the customer and the shelf;
/// they wait while a regular shipment is on the road or has come back.
///
/// Passes when there is no regular delivery or the latest one arrived.
pub fn check_shipments_settled(invoice_id: &str, deliveries: &[Delivery], operation: &str) -> CoreResult<()> {
    match latest_regular(deliveries) {
        Some(latest) if latest.status != DeliveryStatus::Delivered => Err(CoreError::invalid_state(
            ENTITY,
            &latest.id,
            latest.status.as_str(),
            format!("{} on invoice {}", operation, invoice_id),
        )),
        _ => Ok(()),
    }
}

/// Checks a status change. Only PENDING regular deliveries move.
pub fn check_transition(delivery: &Delivery, target: DeliveryStatus) -> CoreResult<()> {
    if delivery.is_synthetic() {
        return Err(CoreError::invalid_state(
            ENTITY,
            &delivery.id,
            delivery.status.as_str(),
            "change the status of a swap delivery",
        ));
    }

    if delivery.status.is_terminal() || target == DeliveryStatus::Pending {
        return Err(CoreError::invalid_state(
            ENTITY,
            &delivery.id,
            delivery.status.as_str(),
            format!("transition to {}", target.as_str()),
        ));
    }

    Ok(())
}

/// Invoice status once its goods arrived.
pub fn invoice_status_on_delivered(payment_status: PaymentStatus) -> InvoiceStatus {
    match payment_status {
        PaymentStatus::Paid => InvoiceStatus::Completed,
        PaymentStatus::Unpaid => InvoiceStatus::Delivered,
    }
}

/// Approval is only valid right after a failure that has not been approved.
pub fn check_approve_redelivery(invoice: &Invoice, deliveries: &[Delivery]) -> CoreResult<()> {
    let latest = latest_regular(deliveries).ok_or_else(|| {
        CoreError::invalid_state(
            "Invoice",
            &invoice.id,
            invoice.status.as_str(),
            "approve redelivery without a delivery",
        )
    })?;

    if !latest.status.is_failure() {
        return Err(CoreError::invalid_state(
            ENTITY,
            &latest.id,
            latest.status.as_str(),
            "approve redelivery",
        ));
    }

    if invoice.allow_redelivery {
        return Err(CoreError::invalid_state(
            "Invoice",
            &invoice.id,
            "already approved for redelivery",
            "approve redelivery",
        ));
    }

    Ok(())
}

/// Revoking needs an outstanding approval on a failed latest delivery.
pub fn check_revoke_redelivery(invoice: &Invoice, deliveries: &[Delivery]) -> CoreResult<()> {
    if !invoice.allow_redelivery {
        return Err(CoreError::invalid_state(
            "Invoice",
            &invoice.id,
            "not approved for redelivery",
            "revoke redelivery approval",
        ));
    }

    match latest_regular(deliveries) {
        Some(latest) if latest.status.is_failure() => Ok(()),
        Some(latest) => Err(CoreError::invalid_state(
            ENTITY,
            &latest.id,
            latest.status.as_str(),
            "revoke redelivery approval",
        )),
        None => Err(CoreError::invalid_state(
            "Invoice",
            &invoice.id,
            invoice.status.as_str(),
            "revoke redelivery approval without a delivery",
        )),
    }
}

/// Checks whether `delivery` may be deleted.
///
/// ## Refused when
/// - It belongs to a swap
/// - A newer regular delivery exists
/// - It is DELIVERED and the invoice has payments
/// - It failed and a redelivery approval is outstanding
pub fn check_delete(
    delivery: &Delivery,
    invoice: &Invoice,
    deliveries: &[Delivery],
    has_payments: bool,
) -> CoreResult<()> {
    let refuse = |operation: &str| {
        Err(CoreError::invalid_state(
            ENTITY,
            &delivery.id,
            delivery.status.as_str(),
            operation,
        ))
    };

    if delivery.is_synthetic() {
        return refuse("delete a swap delivery");
    }

    if latest_regular(deliveries).map(|d| d.id.as_str()) != Some(delivery.id.as_str()) {
        return refuse("delete a delivery that is not the latest");
    }

    if delivery.status == DeliveryStatus::Delivered && has_payments {
        return refuse("delete a delivered shipment whose invoice has payments");
    }

    if delivery.status.is_failure() && invoice.allow_redelivery {
        return refuse("delete while a redelivery approval is outstanding");
    }

    Ok(())
}

/// Invoice state written back after a delivery is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AfterDelete {
    pub status: InvoiceStatus,
    pub allow_redelivery: bool,
}

/// Invoice state once `remaining` deliveries are left after a delete
/// (creation order).
///
/// With none left the invoice goes back to its pre-shipment state: SENT,
/// or PAID when already settled. When the latest remaining attempt failed,
/// the deleted delivery had used up its redelivery approval and the
/// approval comes back, exactly as `approve_redelivery` left it.
pub fn after_delete(remaining: &[Delivery], payment_status: PaymentStatus) -> AfterDelete {
    let (status, allow_redelivery) = match latest_regular(remaining).map(|d| d.status) {
        Some(DeliveryStatus::Delivered) => (invoice_status_on_delivered(payment_status), false),
        Some(status) if status.is_failure() => (InvoiceStatus::Sent, true),
        _ => match payment_status {
            PaymentStatus::Paid => (InvoiceStatus::Paid, false),
            PaymentStatus::Unpaid => (InvoiceStatus::Sent, false),
        },
    };
    AfterDelete {
        status,
        allow_redelivery,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
