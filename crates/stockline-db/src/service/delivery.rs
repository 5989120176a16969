//! # Delivery Service
//!
//! Drives the delivery state machine and its stock and invoice side effects.
//!
//! ## Transitions
//! ```text
//! ┌──────────────┬──────────────────────────────────────────────────────────┐
//! │ → DELIVERED  │ completed_at, quantity_delivered = to_deliver,           │
//! │              │ invoice COMPLETED (paid) or DELIVERED (unpaid)           │
//! ├──────────────┼──────────────────────────────────────────────────────────┤
//! │ → RETURNED   │ return_reason required; RETURN_IN per carried line       │
//! │ → CANCELLED  │ under delivery:<id> unless one is already outstanding;   │
//! │              │ invoice RETURNED, allow_redelivery = false               │
//! ├──────────────┼──────────────────────────────────────────────────────────┤
//! │ approve      │ allow_redelivery = true, invoice SENT,                   │
//! │              │ SALES_OUT per carried line under redelivery:<failed id>  │
//! │ revoke       │ reverse redelivery:<failed id>, allow_redelivery = false │
//! ├──────────────┼──────────────────────────────────────────────────────────┤
//! │ delete       │ a delivery made under an approval hands it back          │
//! └──────────────┴──────────────────────────────────────────────────────────┘
//! ```
//!
//! "Carried" lines are the failed delivery's own rows: goods a swap already
//! handed over never ride along, so they never come back with a failure.

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

use super::ledger::{self, Posting};
use super::{DocumentKind, Engine};
use crate::error::DbResult;
use crate::repository::{delivery as delivery_repo, invoice as invoice_repo, payment as payment_repo, stock_movement};
use stockline_core::delivery::{
    after_delete, check_approve_redelivery, check_create, check_delete, check_revoke_redelivery, check_transition,
    handed_over, invoice_status_on_delivered, latest_regular, plan_lines,
};
use stockline_core::validation::validate_required;
use stockline_core::{
    CoreError, Delivery, DeliveryLineItem, DeliveryStatus, InvoiceStatus, StockMovementType, StockReference,
    ValidationError,
};

const MAX_REASON_LEN: usize = 500;

/// Delivery use cases.
pub struct DeliveryService<'a> {
    engine: &'a Engine,
}

impl<'a> DeliveryService<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        DeliveryService { engine }
    }

    /// Creates a PENDING delivery carrying every line that still has goods
    /// to ship. Quantities a swap already handed over are left out.
    ///
    /// After a failed attempt this uses up the redelivery approval.
    pub async fn create(&self, invoice_id: &str, actor_id: &str) -> DbResult<Delivery> {
        let actor = self.engine.actor(actor_id);

        let mut tx = self.engine.db().pool().begin().await?;
        let invoice = invoice_repo::require(&mut tx, invoice_id).await?;
        let deliveries = delivery_repo::for_invoice(&mut tx, &invoice.id).await?;
        let plan = check_create(&invoice, &deliveries)?;

        let lines = invoice_repo::lines(&mut tx, &invoice.id).await?;
        let handed = handed_over(&delivery_repo::swap_rows_for_invoice(&mut tx, &invoice.id).await?);
        let planned = plan_lines(&lines, &handed);
        if planned.is_empty() {
            return Err(ValidationError::Required {
                field: "delivery lines".to_string(),
            }
            .into());
        }

        let now = Utc::now();
        let delivery = Delivery {
            id: Uuid::new_v4().to_string(),
            code: self.engine.next_code(DocumentKind::Delivery),
            invoice_id: invoice.id.clone(),
            swap_id: None,
            status: DeliveryStatus::Pending,
            return_reason: None,
            completed_at: None,
            created_by: actor,
            created_at: now,
            updated_at: now,
        };
        delivery_repo::insert(&mut tx, &delivery).await?;

        for line in planned {
            delivery_repo::insert_line(
                &mut tx,
                &DeliveryLineItem {
                    id: Uuid::new_v4().to_string(),
                    delivery_id: delivery.id.clone(),
                    invoice_line_id: Some(line.invoice_line_id),
                    product_id: line.product_id,
                    quantity_to_deliver: line.quantity_to_deliver,
                    quantity_delivered: 0,
                    quantity_returned: 0,
                },
            )
            .await?;
        }

        if plan.consumes_approval {
            invoice_repo::set_redelivery(&mut tx, &invoice.id, invoice.status, false).await?;
        }

        tx.commit().await?;

        info!(id = %delivery.id, invoice_id = %invoice.id, redelivery = plan.consumes_approval, "Delivery created");
        Ok(delivery)
    }

    /// Moves a PENDING delivery to a terminal state.
    ///
    /// `return_reason` is required for RETURNED and CANCELLED.
    pub async fn transition(
        &self,
        delivery_id: &str,
        target: DeliveryStatus,
        return_reason: Option<&str>,
        actor_id: &str,
    ) -> DbResult<Delivery> {
        let actor = self.engine.actor(actor_id);

        let mut tx = self.engine.db().pool().begin().await?;
        let delivery = delivery_repo::require(&mut tx, delivery_id).await?;
        check_transition(&delivery, target)?;
        let invoice = invoice_repo::require(&mut tx, &delivery.invoice_id).await?;

        if target == DeliveryStatus::Delivered {
            delivery_repo::set_status(&mut tx, &delivery.id, target, None, Some(Utc::now())).await?;
            delivery_repo::mark_lines_delivered(&mut tx, &delivery.id).await?;
            let status = invoice_status_on_delivered(invoice.payment_status);
            invoice_repo::set_status(&mut tx, &invoice.id, status).await?;
        } else {
            let reason = validate_required("return_reason", return_reason, MAX_REASON_LEN)?;
            delivery_repo::set_status(&mut tx, &delivery.id, target, Some(&reason), None).await?;
            restore_failed(&mut tx, &delivery, &actor).await?;
            invoice_repo::set_redelivery(&mut tx, &invoice.id, InvoiceStatus::Returned, false).await?;
        }

        let updated = delivery_repo::require(&mut tx, &delivery.id).await?;
        tx.commit().await?;

        info!(id = %updated.id, status = updated.status.as_str(), "Delivery status changed");
        Ok(updated)
    }

    /// Admin approval for another attempt after a failure. Ships the goods
    /// the failed delivery carried again: one SALES_OUT per row.
    pub async fn approve_redelivery(&self, invoice_id: &str, actor_id: &str) -> DbResult<()> {
        let actor = self.engine.actor(actor_id);

        let mut tx = self.engine.db().pool().begin().await?;
        let invoice = invoice_repo::require(&mut tx, invoice_id).await?;
        let deliveries = delivery_repo::for_invoice(&mut tx, &invoice.id).await?;
        check_approve_redelivery(&invoice, &deliveries)?;
        let failed = latest_failed(&deliveries, &invoice.id)?;

        let reference = StockReference::Redelivery(failed.id.clone()).to_string();
        if stock_movement::has_outstanding(&mut tx, &reference, StockMovementType::SalesOut).await? {
            return Err(CoreError::invalid_state(
                "Delivery",
                &failed.id,
                "goods already shipped again",
                "approve redelivery",
            )
            .into());
        }

        for row in delivery_repo::lines(&mut tx, &failed.id).await? {
            if row.quantity_to_deliver > 0 {
                ledger::post(
                    &mut tx,
                    Posting::new(
                        &row.product_id,
                        StockMovementType::SalesOut,
                        row.quantity_to_deliver,
                        &reference,
                        &actor,
                    ),
                )
                .await?;
            }
        }
        invoice_repo::set_redelivery(&mut tx, &invoice.id, InvoiceStatus::Sent, true).await?;
        tx.commit().await?;

        info!(invoice_id = %invoice.id, failed_delivery = %failed.id, "Redelivery approved");
        Ok(())
    }

    /// Withdraws an approval that has not been used yet.
    pub async fn revoke_redelivery(&self, invoice_id: &str, actor_id: &str) -> DbResult<()> {
        let actor = self.engine.actor(actor_id);

        let mut tx = self.engine.db().pool().begin().await?;
        let invoice = invoice_repo::require(&mut tx, invoice_id).await?;
        let deliveries = delivery_repo::for_invoice(&mut tx, &invoice.id).await?;
        check_revoke_redelivery(&invoice, &deliveries)?;
        let failed = latest_failed(&deliveries, &invoice.id)?;

        let reference = StockReference::Redelivery(failed.id.clone()).to_string();
        ledger::reverse_by_reference(
            &mut tx,
            self.engine.strategy(),
            &reference,
            StockMovementType::SalesOut,
            &actor,
        )
        .await?;
        invoice_repo::set_redelivery(&mut tx, &invoice.id, InvoiceStatus::Returned, false).await?;
        tx.commit().await?;

        info!(invoice_id = %invoice.id, "Redelivery approval revoked");
        Ok(())
    }

    /// Deletes the latest regular delivery of an invoice.
    ///
    /// A failed delivery gives its restored goods back to the invoice
    /// (the `delivery:<id>` restores are reversed). A delivery created under
    /// a redelivery approval returns that approval: the re-shipment it rode
    /// on stays posted and the next delivery may use it.
    pub async fn delete(&self, delivery_id: &str, actor_id: &str) -> DbResult<()> {
        let actor = self.engine.actor(actor_id);

        let mut tx = self.engine.db().pool().begin().await?;
        let delivery = delivery_repo::require(&mut tx, delivery_id).await?;
        let invoice = invoice_repo::require(&mut tx, &delivery.invoice_id).await?;
        let deliveries = delivery_repo::for_invoice(&mut tx, &invoice.id).await?;
        let has_payments = payment_repo::count_for_invoice(&mut tx, &invoice.id).await? > 0;
        check_delete(&delivery, &invoice, &deliveries, has_payments)?;

        if delivery.status.is_failure() {
            let reference = StockReference::Delivery(delivery.id.clone()).to_string();
            ledger::reverse_by_reference(
                &mut tx,
                self.engine.strategy(),
                &reference,
                StockMovementType::ReturnIn,
                &actor,
            )
            .await?;
        }

        delivery_repo::delete(&mut tx, &delivery.id).await?;

        let remaining = delivery_repo::for_invoice(&mut tx, &invoice.id).await?;
        let state = after_delete(&remaining, invoice.payment_status);
        invoice_repo::set_redelivery(&mut tx, &invoice.id, state.status, state.allow_redelivery).await?;
        tx.commit().await?;

        info!(
            id = %delivery.id,
            invoice_status = state.status.as_str(),
            allow_redelivery = state.allow_redelivery,
            "Delivery deleted"
        );
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn latest_failed<'d>(deliveries: &'d [Delivery], invoice_id: &str) -> DbResult<&'d Delivery> {
    latest_regular(deliveries)
        .filter(|d| d.status.is_failure())
        .ok_or_else(|| CoreError::invalid_state("Invoice", invoice_id, "no failed delivery", "manage redelivery").into())
}

/// Puts the goods a failed delivery carried back on the shelf, once.
async fn restore_failed(conn: &mut SqliteConnection, delivery: &Delivery, actor: &str) -> DbResult<()> {
    let reference = StockReference::Delivery(delivery.id.clone()).to_string();
    if stock_movement::has_outstanding(conn, &reference, StockMovementType::ReturnIn).await? {
        debug!(delivery_id = %delivery.id, "Stock already restored for delivery");
        return Ok(());
    }

    for row in delivery_repo::lines(conn, &delivery.id).await? {
        if row.quantity_to_deliver > 0 {
            ledger::post(
                conn,
                Posting::new(
                    &row.product_id,
                    StockMovementType::ReturnIn,
                    row.quantity_to_deliver,
                    &reference,
                    actor,
                ),
            )
            .await?;
        }
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::{self, ACTOR};
    use stockline_core::{ErrorKind, PaymentMethod};

    #[tokio::test]
    async fn test_deliver_marks_lines_and_invoice() {
        let engine = testing::engine().await;
        let p = testing::product(&engine, "P", 100, 600, 1000).await;
        let invoice = testing::invoice(&engine, vec![testing::line(&p, 10)]).await;

        let delivery = engine.deliveries().create(&invoice.id, ACTOR).await.unwrap();
        let delivered = engine
            .deliveries()
            .transition(&delivery.id, DeliveryStatus::Delivered, None, ACTOR)
            .await
            .unwrap();

        assert!(delivered.completed_at.is_some());
        let lines = engine.db().deliveries().lines(&delivery.id).await.unwrap();
        assert_eq!(lines[0].quantity_delivered, 10);
        assert_eq!(testing::reload(&engine, &invoice.id).await.status, InvoiceStatus::Delivered);
        assert_eq!(testing::stock(&engine, &p.id).await, 90);
    }

    #[tokio::test]
    async fn test_deliver_paid_invoice_completes_it() {
        let engine = testing::engine().await;
        let p = testing::product(&engine, "P", 100, 600, 1000).await;
        let invoice = testing::invoice(&engine, vec![testing::line(&p, 2)]).await;
        engine
            .payments()
            .apply(&invoice.id, 2000, PaymentMethod::Cash, None, ACTOR)
            .await
            .unwrap();

        let delivery = engine.deliveries().create(&invoice.id, ACTOR).await.unwrap();
        engine
            .deliveries()
            .transition(&delivery.id, DeliveryStatus::Delivered, None, ACTOR)
            .await
            .unwrap();

        assert_eq!(testing::reload(&engine, &invoice.id).await.status, InvoiceStatus::Completed);
    }

    #[tokio::test]
    async fn test_second_active_delivery_conflicts() {
        let engine = testing::engine().await;
        let p = testing::product(&engine, "P", 100, 600, 1000).await;
        let invoice = testing::invoice(&engine, vec![testing::line(&p, 1)]).await;
        engine.deliveries().create(&invoice.id, ACTOR).await.unwrap();

        let err = engine.deliveries().create(&invoice.id, ACTOR).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_delivery_note_prerequisite() {
        let engine = testing::engine().await;
        let p = testing::product(&engine, "P", 100, 600, 1000).await;
        let invoice = engine
            .invoices()
            .create(
                &stockline_core::NewInvoice {
                    customer_id: "cust-1".to_string(),
                    order_id: None,
                    discount: 0,
                    discount_type: stockline_core::DiscountType::Amount,
                    shipping_cost_cents: 0,
                    requires_delivery_note: true,
                    lines: vec![testing::line(&p, 1)],
                },
                ACTOR,
            )
            .await
            .unwrap();

        let err = engine.deliveries().create(&invoice.id, ACTOR).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        engine.invoices().attach_delivery_note(&invoice.id, "DN-1").await.unwrap();
        assert!(engine.deliveries().create(&invoice.id, ACTOR).await.is_ok());
    }

    #[tokio::test]
    async fn test_failure_requires_reason_and_restores_once() {
        let engine = testing::engine().await;
        let p = testing::product(&engine, "P", 100, 600, 1000).await;
        let invoice = testing::invoice(&engine, vec![testing::line(&p, 10)]).await;
        let delivery = engine.deliveries().create(&invoice.id, ACTOR).await.unwrap();

        let err = engine
            .deliveries()
            .transition(&delivery.id, DeliveryStatus::Returned, Some("  "), ACTOR)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);

        engine
            .deliveries()
            .transition(&delivery.id, DeliveryStatus::Returned, Some("customer absent"), ACTOR)
            .await
            .unwrap();
        assert_eq!(testing::stock(&engine, &p.id).await, 100);

        // Terminal: a second failure transition is refused and restores nothing.
        assert!(engine
            .deliveries()
            .transition(&delivery.id, DeliveryStatus::Cancelled, Some("again"), ACTOR)
            .await
            .is_err());
        assert_eq!(testing::stock(&engine, &p.id).await, 100);

        let invoice = testing::reload(&engine, &invoice.id).await;
        assert_eq!(invoice.status, InvoiceStatus::Returned);
        assert!(!invoice.allow_redelivery);
    }

    #[tokio::test]
    async fn test_redelivery_cycle() {
        let engine = testing::engine().await;
        let p = testing::product(&engine, "P", 100, 600, 1000).await;
        let invoice = testing::invoice(&engine, vec![testing::line(&p, 10)]).await;
        let first = engine.deliveries().create(&invoice.id, ACTOR).await.unwrap();
        engine
            .deliveries()
            .transition(&first.id, DeliveryStatus::Cancelled, Some("damaged"), ACTOR)
            .await
            .unwrap();

        // No approval yet.
        assert!(engine.deliveries().create(&invoice.id, ACTOR).await.is_err());

        engine.deliveries().approve_redelivery(&invoice.id, ACTOR).await.unwrap();
        assert_eq!(testing::stock(&engine, &p.id).await, 90);
        let approved = testing::reload(&engine, &invoice.id).await;
        assert!(approved.allow_redelivery);
        assert_eq!(approved.status, InvoiceStatus::Sent);

        // Approving twice is refused.
        assert!(engine.deliveries().approve_redelivery(&invoice.id, ACTOR).await.is_err());

        engine.deliveries().revoke_redelivery(&invoice.id, ACTOR).await.unwrap();
        assert_eq!(testing::stock(&engine, &p.id).await, 100);
        assert!(!testing::reload(&engine, &invoice.id).await.allow_redelivery);

        engine.deliveries().approve_redelivery(&invoice.id, ACTOR).await.unwrap();
        engine.deliveries().create(&invoice.id, ACTOR).await.unwrap();
        let consumed = testing::reload(&engine, &invoice.id).await;
        assert!(!consumed.allow_redelivery);
        assert_eq!(testing::stock(&engine, &p.id).await, 90);
        assert!(engine.ledger().check_conservation(&p.id).await.unwrap().holds());
    }

    #[tokio::test]
    async fn test_delete_redelivery_hands_approval_back() {
        let engine = testing::engine().await;
        let p = testing::product(&engine, "P", 100, 600, 1000).await;
        let invoice = testing::invoice(&engine, vec![testing::line(&p, 10)]).await;
        let first = engine.deliveries().create(&invoice.id, ACTOR).await.unwrap();
        engine
            .deliveries()
            .transition(&first.id, DeliveryStatus::Cancelled, Some("damaged"), ACTOR)
            .await
            .unwrap();
        engine.deliveries().approve_redelivery(&invoice.id, ACTOR).await.unwrap();
        let second = engine.deliveries().create(&invoice.id, ACTOR).await.unwrap();
        assert_eq!(testing::stock(&engine, &p.id).await, 90);

        engine.deliveries().delete(&second.id, ACTOR).await.unwrap();
        let restored = testing::reload(&engine, &invoice.id).await;
        assert!(restored.allow_redelivery);
        assert_eq!(restored.status, InvoiceStatus::Sent);
        assert_eq!(testing::stock(&engine, &p.id).await, 90);

        // The re-shipment is still posted: no second approval.
        let err = engine.deliveries().approve_redelivery(&invoice.id, ACTOR).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(testing::stock(&engine, &p.id).await, 90);

        engine.deliveries().create(&invoice.id, ACTOR).await.unwrap();
        assert_eq!(testing::stock(&engine, &p.id).await, 90);
        assert!(engine.ledger().check_conservation(&p.id).await.unwrap().holds());
    }

    #[tokio::test]
    async fn test_delete_failed_redelivery_keeps_reshipment() {
        let engine = testing::engine().await;
        let p = testing::product(&engine, "P", 100, 600, 1000).await;
        let invoice = testing::invoice(&engine, vec![testing::line(&p, 10)]).await;
        let first = engine.deliveries().create(&invoice.id, ACTOR).await.unwrap();
        engine
            .deliveries()
            .transition(&first.id, DeliveryStatus::Returned, Some("refused"), ACTOR)
            .await
            .unwrap();
        engine.deliveries().approve_redelivery(&invoice.id, ACTOR).await.unwrap();
        let second = engine.deliveries().create(&invoice.id, ACTOR).await.unwrap();
        engine
            .deliveries()
            .transition(&second.id, DeliveryStatus::Returned, Some("refused again"), ACTOR)
            .await
            .unwrap();
        assert_eq!(testing::stock(&engine, &p.id).await, 100);

        engine.deliveries().delete(&second.id, ACTOR).await.unwrap();
        assert_eq!(testing::stock(&engine, &p.id).await, 90);
        assert!(testing::reload(&engine, &invoice.id).await.allow_redelivery);

        engine.deliveries().revoke_redelivery(&invoice.id, ACTOR).await.unwrap();
        assert_eq!(testing::stock(&engine, &p.id).await, 100);
        assert!(engine.ledger().check_conservation(&p.id).await.unwrap().holds());
    }

    #[tokio::test]
    async fn test_swap_handed_goods_stay_out_of_failed_delivery() {
        let engine = testing::engine().await;
        let a = testing::product(&engine, "A", 10, 100, 150).await;
        let b = testing::product(&engine, "B", 10, 90, 120).await;
        let invoice = testing::invoice(&engine, vec![testing::line(&a, 3)]).await;
        engine
            .swaps()
            .create(
                &invoice.id,
                &[stockline_core::swap::SwapGroup {
                    old_items: vec![stockline_core::swap::SwapItem {
                        product_id: a.id.clone(),
                        quantity: 2,
                    }],
                    replacement_items: vec![stockline_core::swap::SwapItem {
                        product_id: b.id.clone(),
                        quantity: 2,
                    }],
                }],
                None,
                ACTOR,
            )
            .await
            .unwrap();
        assert_eq!((testing::stock(&engine, &a.id).await, testing::stock(&engine, &b.id).await), (9, 8));

        let delivery = engine.deliveries().create(&invoice.id, ACTOR).await.unwrap();
        let rows = engine.db().deliveries().lines(&delivery.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!((rows[0].product_id.as_str(), rows[0].quantity_to_deliver), (a.id.as_str(), 1));

        engine
            .deliveries()
            .transition(&delivery.id, DeliveryStatus::Returned, Some("customer absent"), ACTOR)
            .await
            .unwrap();
        assert_eq!(testing::stock(&engine, &a.id).await, 10);
        assert_eq!(testing::stock(&engine, &b.id).await, 8);
        for id in [&a.id, &b.id] {
            assert!(engine.ledger().check_conservation(id).await.unwrap().holds());
        }
    }

    #[tokio::test]
    async fn test_delete_failed_delivery_takes_restore_back() {
        let engine = testing::engine().await;
        let p = testing::product(&engine, "P", 100, 600, 1000).await;
        let invoice = testing::invoice(&engine, vec![testing::line(&p, 10)]).await;
        let delivery = engine.deliveries().create(&invoice.id, ACTOR).await.unwrap();
        engine
            .deliveries()
            .transition(&delivery.id, DeliveryStatus::Returned, Some("refused"), ACTOR)
            .await
            .unwrap();

        engine.deliveries().delete(&delivery.id, ACTOR).await.unwrap();

        assert_eq!(testing::stock(&engine, &p.id).await, 90);
        assert_eq!(testing::reload(&engine, &invoice.id).await.status, InvoiceStatus::Sent);
        assert!(engine.db().deliveries().for_invoice(&invoice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_delivered_with_payments_refused() {
        let engine = testing::engine().await;
        let p = testing::product(&engine, "P", 100, 600, 1000).await;
        let invoice = testing::invoice(&engine, vec![testing::line(&p, 1)]).await;
        let delivery = engine.deliveries().create(&invoice.id, ACTOR).await.unwrap();
        engine
            .deliveries()
            .transition(&delivery.id, DeliveryStatus::Delivered, None, ACTOR)
            .await
            .unwrap();
        engine
            .payments()
            .apply(&invoice.id, 500, PaymentMethod::Card, None, ACTOR)
            .await
            .unwrap();

        let err = engine.deliveries().delete(&delivery.id, ACTOR).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }
}
