//! # Payment Service
//!
//! Applies and removes payments and keeps the invoice's settlement columns
//! (`paid_cents`, `remaining_cents`, `payment_status`) in step.
//!
//! When a payment settles an invoice that belongs to an external order, the
//! engine's [`OrderNotifier`](super::OrderNotifier) hears about it after
//! commit.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::Engine;
use crate::error::DbResult;
use crate::repository::{invoice as invoice_repo, payment as payment_repo};
use stockline_core::money::Money;
use stockline_core::totals::{status_after_payment, status_after_payment_removed};
use stockline_core::validation::validate_payment_amount;
use stockline_core::{CoreError, InvoiceStatus, Payment, PaymentMethod, PaymentStatus};

/// Payment use cases.
pub struct PaymentService<'a> {
    engine: &'a Engine,
}

impl<'a> PaymentService<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        PaymentService { engine }
    }

    /// Applies a payment of `amount_cents` to an invoice.
    ///
    /// The amount must be positive and at most what is still owed.
    pub async fn apply(
        &self,
        invoice_id: &str,
        amount_cents: i64,
        method: PaymentMethod,
        reference: Option<&str>,
        actor_id: &str,
    ) -> DbResult<Payment> {
        let actor = self.engine.actor(actor_id);

        let mut tx = self.engine.db().pool().begin().await?;
        let invoice = invoice_repo::require(&mut tx, invoice_id).await?;
        if matches!(invoice.status, InvoiceStatus::Draft | InvoiceStatus::Cancelled) {
            return Err(CoreError::invalid_state("Invoice", &invoice.id, invoice.status.as_str(), "apply a payment").into());
        }
        validate_payment_amount(amount_cents, invoice.remaining_cents)?;

        let payment = Payment {
            id: Uuid::new_v4().to_string(),
            invoice_id: invoice.id.clone(),
            method,
            amount_cents,
            reference: reference.map(str::trim).filter(|r| !r.is_empty()).map(str::to_string),
            created_by: actor,
            created_at: Utc::now(),
        };
        payment_repo::insert(&mut tx, &payment).await?;

        let paid = invoice.paid_cents + amount_cents;
        let remaining = invoice.remaining_cents - amount_cents;
        let (status, payment_status) = status_after_payment(invoice.status, Money::from_cents(remaining));
        invoice_repo::set_settlement(&mut tx, &invoice.id, paid, remaining, status, payment_status).await?;
        tx.commit().await?;

        info!(
            id = %payment.id,
            invoice_id = %invoice.id,
            amount = amount_cents,
            remaining,
            status = status.as_str(),
            "Payment applied"
        );

        let settled_now = invoice.payment_status == PaymentStatus::Unpaid && payment_status == PaymentStatus::Paid;
        if let (true, Some(order_id)) = (settled_now, invoice.order_id.as_deref()) {
            if let Err(e) = self.engine.notifier().order_completed(order_id, &invoice.id) {
                warn!(order_id, invoice_id = %invoice.id, error = %e, "Order completion not delivered");
            }
        }

        Ok(payment)
    }

    /// Removes a payment and reopens the invoice when something is owed again.
    pub async fn delete(&self, payment_id: &str, actor_id: &str) -> DbResult<()> {
        let actor = self.engine.actor(actor_id);

        let mut tx = self.engine.db().pool().begin().await?;
        let payment = payment_repo::require(&mut tx, payment_id).await?;
        let invoice = invoice_repo::require(&mut tx, &payment.invoice_id).await?;
        if invoice.status == InvoiceStatus::Cancelled {
            return Err(
                CoreError::invalid_state("Invoice", &invoice.id, invoice.status.as_str(), "remove a payment").into(),
            );
        }

        payment_repo::delete(&mut tx, &payment.id).await?;

        let paid = invoice.paid_cents - payment.amount_cents;
        let remaining = invoice.remaining_cents + payment.amount_cents;
        let (status, payment_status) =
            status_after_payment_removed(invoice.status, invoice.payment_status, Money::from_cents(remaining));
        invoice_repo::set_settlement(&mut tx, &invoice.id, paid, remaining, status, payment_status).await?;
        tx.commit().await?;

        info!(id = %payment.id, invoice_id = %invoice.id, actor = %actor, status = status.as_str(), "Payment removed");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
