//! # Invoice Service
//!
//! Raising, editing and cancelling invoices.
//!
//! ## Stock Effects
//! ```text
//! create        SALES_OUT per line            reference invoice:<id>
//! update_lines  reverse invoice:<id>, replace lines, SALES_OUT again
//! cancel        reverse everything the invoice still has out:
//!                 invoice:<id>       SALES_OUT
//!                 redelivery:<d>     SALES_OUT   (approved re-shipments)
//!                 delivery:<d>       RETURN_IN   (failed-delivery restores)
//! ```

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::info;
use uuid::Uuid;

use super::ledger::{self, Posting};
use super::recalculator::recalculate;
use super::{DocumentKind, Engine};
use crate::error::DbResult;
use crate::repository::{delivery as delivery_repo, invoice as invoice_repo, payment as payment_repo, product};
use stockline_core::money::Money;
use stockline_core::totals::price_line;
use stockline_core::validation::{
    validate_discount, validate_invoice_lines, validate_new_invoice, validate_price_cents, validate_required,
};
use stockline_core::{
    CoreError, DeliveryStatus, DiscountType, Invoice, InvoiceLineItem, InvoiceStatus, NewInvoice,
    NewInvoiceLine, PaymentStatus, StockMovementType, StockReference,
};

/// Invoice use cases.
pub struct InvoiceService<'a> {
    engine: &'a Engine,
}

impl<'a> InvoiceService<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        InvoiceService { engine }
    }

    /// Raises an invoice and takes its goods out of stock.
    ///
    /// The invoice starts SENT / UNPAID. Fails with `InsufficientStock`
    /// (nothing written) when any line cannot be covered.
    pub async fn create(&self, new: &NewInvoice, actor_id: &str) -> DbResult<Invoice> {
        validate_new_invoice(new)?;
        let actor = self.engine.actor(actor_id);

        let now = Utc::now();
        let invoice = Invoice {
            id: Uuid::new_v4().to_string(),
            code: self.engine.next_code(DocumentKind::Invoice),
            customer_id: new.customer_id.trim().to_string(),
            order_id: new.order_id.clone(),
            status: InvoiceStatus::Sent,
            payment_status: PaymentStatus::Unpaid,
            subtotal_cents: 0,
            discount: new.discount,
            discount_type: new.discount_type,
            actual_discount_cents: 0,
            tax_cents: 0,
            shipping_cost_cents: new.shipping_cost_cents,
            total_cents: 0,
            paid_cents: 0,
            remaining_cents: 0,
            allow_redelivery: false,
            requires_delivery_note: new.requires_delivery_note,
            delivery_note_number: None,
            created_by: actor.clone(),
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.engine.db().pool().begin().await?;
        invoice_repo::insert(&mut tx, &invoice).await?;
        insert_lines(&mut tx, &invoice.id, &new.lines, &actor).await?;
        let invoice = recalculate(&mut tx, &invoice.id).await?;
        tx.commit().await?;

        info!(id = %invoice.id, code = %invoice.code, total = invoice.total_cents, "Invoice created");
        Ok(invoice)
    }

    /// Replaces every line of an invoice that has not shipped yet.
    pub async fn update_lines(&self, invoice_id: &str, lines: &[NewInvoiceLine], actor_id: &str) -> DbResult<Invoice> {
        validate_invoice_lines(lines)?;
        let actor = self.engine.actor(actor_id);

        let mut tx = self.engine.db().pool().begin().await?;
        let current = invoice_repo::require(&mut tx, invoice_id).await?;
        check_lines_editable(&mut tx, &current).await?;

        let reference = StockReference::Invoice(current.id.clone()).to_string();
        ledger::reverse_by_reference(
            &mut tx,
            self.engine.strategy(),
            &reference,
            StockMovementType::SalesOut,
            &actor,
        )
        .await?;
        invoice_repo::delete_lines(&mut tx, &current.id).await?;
        insert_lines(&mut tx, &current.id, lines, &actor).await?;

        let invoice = recalculate(&mut tx, &current.id).await?;
        tx.commit().await?;

        info!(id = %invoice.id, lines = lines.len(), total = invoice.total_cents, "Invoice lines replaced");
        Ok(invoice)
    }

    /// Changes the configured discount and shipping cost.
    pub async fn update_pricing(
        &self,
        invoice_id: &str,
        discount: i64,
        discount_type: DiscountType,
        shipping_cost_cents: i64,
    ) -> DbResult<Invoice> {
        validate_discount("discount", discount, discount_type)?;
        validate_price_cents("shipping_cost", shipping_cost_cents)?;

        let mut tx = self.engine.db().pool().begin().await?;
        let mut current = invoice_repo::require(&mut tx, invoice_id).await?;
        if !current.status.is_editable() {
            return Err(CoreError::invalid_state("Invoice", &current.id, current.status.as_str(), "change pricing").into());
        }

        current.discount = discount;
        current.discount_type = discount_type;
        current.shipping_cost_cents = shipping_cost_cents;
        invoice_repo::set_pricing(&mut tx, &current).await?;

        let invoice = recalculate(&mut tx, &current.id).await?;
        tx.commit().await?;

        info!(id = %invoice.id, discount = invoice.actual_discount_cents, "Invoice pricing updated");
        Ok(invoice)
    }

    /// Records the delivery-note number that unlocks delivery creation.
    pub async fn attach_delivery_note(&self, invoice_id: &str, number: &str) -> DbResult<Invoice> {
        let number = validate_required("delivery_note_number", Some(number), 64)?;

        let mut tx = self.engine.db().pool().begin().await?;
        let current = invoice_repo::require(&mut tx, invoice_id).await?;
        if current.status == InvoiceStatus::Cancelled {
            return Err(CoreError::invalid_state(
                "Invoice",
                &current.id,
                current.status.as_str(),
                "attach a delivery note",
            )
            .into());
        }
        invoice_repo::set_delivery_note(&mut tx, &current.id, &number).await?;
        let invoice = invoice_repo::require(&mut tx, &current.id).await?;
        tx.commit().await?;

        info!(id = %invoice.id, number = %number, "Delivery note attached");
        Ok(invoice)
    }

    /// Cancels an invoice and puts its goods back.
    ///
    /// Refused once anything was paid, delivered, returned through a
    /// credit note, or swapped.
    pub async fn cancel(&self, invoice_id: &str, actor_id: &str) -> DbResult<Invoice> {
        let actor = self.engine.actor(actor_id);

        let mut tx = self.engine.db().pool().begin().await?;
        let current = invoice_repo::require(&mut tx, invoice_id).await?;
        let refuse = |operation: &str| -> DbResult<Invoice> {
            Err(CoreError::invalid_state("Invoice", &current.id, current.status.as_str(), operation).into())
        };

        if matches!(current.status, InvoiceStatus::Cancelled | InvoiceStatus::Completed) {
            return refuse("cancel");
        }
        if current.paid_cents > 0 || payment_repo::count_for_invoice(&mut tx, &current.id).await? > 0 {
            return refuse("cancel an invoice with payments");
        }
        if invoice_repo::dependent_documents(&mut tx, &current.id).await? > 0 {
            return refuse("cancel an invoice with credit notes or swaps");
        }
        let deliveries = delivery_repo::for_invoice(&mut tx, &current.id).await?;
        if deliveries.iter().any(|d| d.status == DeliveryStatus::Delivered) {
            return refuse("cancel a delivered invoice");
        }

        let strategy = self.engine.strategy();
        let invoice_ref = StockReference::Invoice(current.id.clone()).to_string();
        ledger::reverse_by_reference(&mut tx, strategy, &invoice_ref, StockMovementType::SalesOut, &actor).await?;
        for delivery in &deliveries {
            let reshipped = StockReference::Redelivery(delivery.id.clone()).to_string();
            ledger::reverse_by_reference(&mut tx, strategy, &reshipped, StockMovementType::SalesOut, &actor).await?;
            let restored = StockReference::Delivery(delivery.id.clone()).to_string();
            ledger::reverse_by_reference(&mut tx, strategy, &restored, StockMovementType::ReturnIn, &actor).await?;
        }

        invoice_repo::set_redelivery(&mut tx, &current.id, InvoiceStatus::Cancelled, false).await?;
        let invoice = invoice_repo::require(&mut tx, &current.id).await?;
        tx.commit().await?;

        info!(id = %invoice.id, "Invoice cancelled");
        Ok(invoice)
    }

    /// Re-derives the stored totals from the current lines.
    pub async fn recalculate(&self, invoice_id: &str) -> DbResult<Invoice> {
        let mut tx = self.engine.db().pool().begin().await?;
        let invoice = recalculate(&mut tx, invoice_id).await?;
        tx.commit().await?;
        Ok(invoice)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Lines may be replaced only before anything shipped, returned or swapped.
async fn check_lines_editable(conn: &mut SqliteConnection, invoice: &Invoice) -> DbResult<()> {
    if !invoice.status.is_editable() {
        return Err(CoreError::invalid_state("Invoice", &invoice.id, invoice.status.as_str(), "edit lines").into());
    }

    let has_deliveries = !delivery_repo::for_invoice(conn, &invoice.id).await?.is_empty();
    if has_deliveries || invoice_repo::dependent_documents(conn, &invoice.id).await? > 0 {
        return Err(CoreError::invalid_state(
            "Invoice",
            &invoice.id,
            invoice.status.as_str(),
            "edit lines after deliveries, credit notes or swaps",
        )
        .into());
    }
    Ok(())
}

/// Prices and inserts `lines`, posting one SALES_OUT per line.
async fn insert_lines(
    conn: &mut SqliteConnection,
    invoice_id: &str,
    lines: &[NewInvoiceLine],
    actor: &str,
) -> DbResult<()> {
    let reference = StockReference::Invoice(invoice_id.to_string()).to_string();
    let now = Utc::now();

    for requested in lines {
        let product = product::require(conn, &requested.product_id).await?;
        let price = requested.price_cents.unwrap_or(product.selling_price_cents);
        let priced = price_line(
            Money::from_cents(price),
            requested.discount,
            requested.discount_type,
            requested.quantity,
        );

        let line = InvoiceLineItem {
            id: Uuid::new_v4().to_string(),
            invoice_id: invoice_id.to_string(),
            product_id: product.id.clone(),
            quantity: requested.quantity,
            price_cents: price,
            discount: requested.discount,
            discount_type: requested.discount_type,
            final_price_cents: priced.final_price.cents(),
            total_price_cents: priced.total_price.cents(),
            tax_rate_bps: product.tax_rate().bps(),
            created_at: now,
        };
        invoice_repo::insert_line(conn, &line).await?;

        ledger::post(
            conn,
            Posting::new(&product.id, StockMovementType::SalesOut, line.quantity, &reference, actor),
        )
        .await?;
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
    use crate::DbError;
    use stockline_core::ErrorKind;

    #[tokio::test]
    async fn test_create_posts_sales_out_and_totals() {
        let engine = testing::engine().await;
        let p = testing::product(&engine, "P", 100, 600, 1000).await;

        let invoice = testing::invoice(&engine, vec![testing::line(&p, 10)]).await;

        assert_eq!(invoice.status, InvoiceStatus::Sent);
        assert_eq!(invoice.subtotal_cents, 10_000);
        assert_eq!(invoice.total_cents, 10_000);
        assert_eq!(invoice.remaining_cents, 10_000);
        assert!(invoice.code.starts_with("INV-"));
        assert_eq!(testing::stock(&engine, &p.id).await, 90);

        let history = engine.ledger().history(&p.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reference, format!("invoice:{}", invoice.id));
        assert_eq!(history[0].actor_id, ACTOR);
    }

    #[tokio::test]
    async fn test_create_rolls_back_on_insufficient_stock() {
        let engine = testing::engine().await;
        let a = testing::product(&engine, "A", 50, 100, 200).await;
        let b = testing::product(&engine, "B", 2, 100, 200).await;

        let err = engine
            .invoices()
            .create(
                &NewInvoice {
                    customer_id: "cust-1".to_string(),
                    order_id: None,
                    discount: 0,
                    discount_type: DiscountType::Amount,
                    shipping_cost_cents: 0,
                    requires_delivery_note: false,
                    lines: vec![testing::line(&a, 5), testing::line(&b, 3)],
                },
                ACTOR,
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert_eq!(testing::stock(&engine, &a.id).await, 50);
        assert!(engine.db().invoices().list_recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_percentage_discount_and_shipping() {
        let engine = testing::engine().await;
        let p = testing::product(&engine, "P", 100, 600, 1000).await;
        let invoice = testing::invoice(&engine, vec![testing::line(&p, 10)]).await;

        let invoice = engine
            .invoices()
            .update_pricing(&invoice.id, 1000, DiscountType::Percentage, 500)
            .await
            .unwrap();

        assert_eq!(invoice.actual_discount_cents, 1000);
        assert_eq!(invoice.total_cents, 10_000 - 1000 + 500);
        assert_eq!(invoice.remaining_cents, invoice.total_cents);
    }

    #[tokio::test]
    async fn test_update_lines_reposts_stock() {
        let engine = testing::engine().await;
        let p = testing::product(&engine, "P", 100, 600, 1000).await;
        let q = testing::product(&engine, "Q", 100, 600, 700).await;
        let invoice = testing::invoice(&engine, vec![testing::line(&p, 10)]).await;

        let invoice = engine
            .invoices()
            .update_lines(&invoice.id, &[testing::line(&q, 3)], ACTOR)
            .await
            .unwrap();

        assert_eq!(invoice.subtotal_cents, 2100);
        assert_eq!(testing::stock(&engine, &p.id).await, 100);
        assert_eq!(testing::stock(&engine, &q.id).await, 97);
        assert_eq!(engine.db().invoices().lines(&invoice.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_lines_refused_after_delivery() {
        let engine = testing::engine().await;
        let p = testing::product(&engine, "P", 100, 600, 1000).await;
        let invoice = testing::invoice(&engine, vec![testing::line(&p, 10)]).await;
        engine.deliveries().create(&invoice.id, ACTOR).await.unwrap();

        let err = engine
            .invoices()
            .update_lines(&invoice.id, &[testing::line(&p, 1)], ACTOR)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_cancel_restores_stock() {
        let engine = testing::engine().await;
        let p = testing::product(&engine, "P", 100, 600, 1000).await;
        let invoice = testing::invoice(&engine, vec![testing::line(&p, 10)]).await;

        let invoice = engine.invoices().cancel(&invoice.id, ACTOR).await.unwrap();

        assert_eq!(invoice.status, InvoiceStatus::Cancelled);
        assert_eq!(testing::stock(&engine, &p.id).await, 100);

        let again = engine.invoices().cancel(&invoice.id, ACTOR).await.unwrap_err();
        assert!(matches!(again, DbError::Domain(CoreError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_cancel_after_failed_delivery_nets_to_zero() {
        let engine = testing::engine().await;
        let p = testing::product(&engine, "P", 100, 600, 1000).await;
        let invoice = testing::invoice(&engine, vec![testing::line(&p, 10)]).await;
        let delivery = engine.deliveries().create(&invoice.id, ACTOR).await.unwrap();
        engine
            .deliveries()
            .transition(&delivery.id, DeliveryStatus::Returned, Some("refused"), ACTOR)
            .await
            .unwrap();
        assert_eq!(testing::stock(&engine, &p.id).await, 100);

        engine.invoices().cancel(&invoice.id, ACTOR).await.unwrap();

        assert_eq!(testing::stock(&engine, &p.id).await, 100);
        assert!(engine.ledger().check_conservation(&p.id).await.unwrap().holds());
    }

    #[tokio::test]
    async fn test_delivery_note_attach() {
        let engine = testing::engine().await;
        let p = testing::product(&engine, "P", 100, 600, 1000).await;
        let invoice = testing::invoice(&engine, vec![testing::line(&p, 1)]).await;

        let invoice = engine.invoices().attach_delivery_note(&invoice.id, " DN-77 ").await.unwrap();
        assert_eq!(invoice.delivery_note_number.as_deref(), Some("DN-77"));
        assert!(engine.invoices().attach_delivery_note(&invoice.id, "  ").await.is_err());
    }
}
