//! # Invoice Repository
//!
//! Database operations for invoices and their line items.
//!
//! ## Who Writes What
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  invoices                                                               │
//! │    status, payment_status, allow_redelivery ... service layer           │
//! │    subtotal/discount/tax/total/remaining  ..... service::recalculator   │
//! │    paid_cents ................................. service::payment        │
//! │                                                                         │
//! │  invoice_line_items                                                     │
//! │    quantity + total_price_cents always change together (resize)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{DbError, DbResult};
use stockline_core::{Invoice, InvoiceLineItem, InvoiceStatus, PaymentStatus};

const SELECT_INVOICE: &str = r#"
    SELECT id, code, customer_id, order_id, status, payment_status,
           subtotal_cents, discount, discount_type, actual_discount_cents,
           tax_cents, shipping_cost_cents, total_cents, paid_cents, remaining_cents,
           allow_redelivery, requires_delivery_note, delivery_note_number,
           created_by, created_at, updated_at
    FROM invoices
"#;

const SELECT_LINE: &str = r#"
    SELECT id, invoice_id, product_id, quantity, price_cents, discount, discount_type,
           final_price_cents, total_price_cents, tax_rate_bps, created_at
    FROM invoice_line_items
"#;

/// Repository for invoice reads.
///
/// ## Usage
/// ```rust,ignore
/// let invoice = db.invoices().get_by_id(&id).await?;
/// let lines = db.invoices().lines(&id).await?;
/// ```
#[derive(Debug, Clone)]
pub struct InvoiceRepository {
    pool: SqlitePool,
}

impl InvoiceRepository {
    /// Creates a new InvoiceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        InvoiceRepository { pool }
    }

    /// Gets an invoice by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Invoice>> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, id).await
    }

    /// Gets an invoice by its human-readable code.
    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<Invoice>> {
        let sql = format!("{} WHERE code = ?1", SELECT_INVOICE);
        let invoice = sqlx::query_as::<_, Invoice>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(invoice)
    }

    /// Line items of an invoice in creation order, fully returned ones
    /// (quantity 0) included.
    pub async fn lines(&self, invoice_id: &str) -> DbResult<Vec<InvoiceLineItem>> {
        let mut conn = self.pool.acquire().await?;
        lines(&mut conn, invoice_id).await
    }

    /// Most recent invoices first.
    pub async fn list_recent(&self, limit: u32) -> DbResult<Vec<Invoice>> {
        let sql = format!("{} ORDER BY created_at DESC LIMIT ?1", SELECT_INVOICE);
        let invoices = sqlx::query_as::<_, Invoice>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(invoices)
    }
}

// =============================================================================
// Transaction Helpers: Invoices
// =============================================================================

pub(crate) async fn insert(conn: &mut SqliteConnection, invoice: &Invoice) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO invoices (
            id, code, customer_id, order_id, status, payment_status,
            subtotal_cents, discount, discount_type, actual_discount_cents,
            tax_cents, shipping_cost_cents, total_cents, paid_cents, remaining_cents,
            allow_redelivery, requires_delivery_note, delivery_note_number,
            created_by, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                  ?16, ?17, ?18, ?19, ?20, ?21)
        "#,
    )
    .bind(&invoice.id)
    .bind(&invoice.code)
    .bind(&invoice.customer_id)
    .bind(&invoice.order_id)
    .bind(invoice.status)
    .bind(invoice.payment_status)
    .bind(invoice.subtotal_cents)
    .bind(invoice.discount)
    .bind(invoice.discount_type)
    .bind(invoice.actual_discount_cents)
    .bind(invoice.tax_cents)
    .bind(invoice.shipping_cost_cents)
    .bind(invoice.total_cents)
    .bind(invoice.paid_cents)
    .bind(invoice.remaining_cents)
    .bind(invoice.allow_redelivery)
    .bind(invoice.requires_delivery_note)
    .bind(&invoice.delivery_note_number)
    .bind(&invoice.created_by)
    .bind(invoice.created_at)
    .bind(invoice.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Invoice>> {
    let sql = format!("{} WHERE id = ?1", SELECT_INVOICE);
    let invoice = sqlx::query_as::<_, Invoice>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(invoice)
}

pub(crate) async fn require(conn: &mut SqliteConnection, id: &str) -> DbResult<Invoice> {
    fetch(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("Invoice", id))
}

/// Writes the derived totals. Only the recalculator calls this.
pub(crate) async fn update_totals(conn: &mut SqliteConnection, invoice: &Invoice) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE invoices SET
            subtotal_cents = ?1,
            actual_discount_cents = ?2,
            tax_cents = ?3,
            total_cents = ?4,
            remaining_cents = ?5,
            updated_at = ?6
        WHERE id = ?7
        "#,
    )
    .bind(invoice.subtotal_cents)
    .bind(invoice.actual_discount_cents)
    .bind(invoice.tax_cents)
    .bind(invoice.total_cents)
    .bind(invoice.remaining_cents)
    .bind(Utc::now())
    .bind(&invoice.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn set_status(conn: &mut SqliteConnection, id: &str, status: InvoiceStatus) -> DbResult<()> {
    sqlx::query("UPDATE invoices SET status = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(status)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn set_redelivery(
    conn: &mut SqliteConnection,
    id: &str,
    status: InvoiceStatus,
    allow_redelivery: bool,
) -> DbResult<()> {
    sqlx::query("UPDATE invoices SET status = ?1, allow_redelivery = ?2, updated_at = ?3 WHERE id = ?4")
        .bind(status)
        .bind(allow_redelivery)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn set_settlement(
    conn: &mut SqliteConnection,
    id: &str,
    paid_cents: i64,
    remaining_cents: i64,
    status: InvoiceStatus,
    payment_status: PaymentStatus,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE invoices SET
            paid_cents = ?1,
            remaining_cents = ?2,
            status = ?3,
            payment_status = ?4,
            updated_at = ?5
        WHERE id = ?6
        "#,
    )
    .bind(paid_cents)
    .bind(remaining_cents)
    .bind(status)
    .bind(payment_status)
    .bind(Utc::now())
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Stores the configured discount and shipping. Totals follow through the
/// recalculator.
pub(crate) async fn set_pricing(conn: &mut SqliteConnection, invoice: &Invoice) -> DbResult<()> {
    sqlx::query(
        "UPDATE invoices SET discount = ?1, discount_type = ?2, shipping_cost_cents = ?3, updated_at = ?4 WHERE id = ?5",
    )
    .bind(invoice.discount)
    .bind(invoice.discount_type)
    .bind(invoice.shipping_cost_cents)
    .bind(Utc::now())
    .bind(&invoice.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn set_delivery_note(conn: &mut SqliteConnection, id: &str, number: &str) -> DbResult<()> {
    sqlx::query("UPDATE invoices SET delivery_note_number = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(number)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Every code handed out across the document tables.
pub(crate) async fn all_document_codes(pool: &SqlitePool) -> DbResult<Vec<String>> {
    let codes: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT code FROM invoices
        UNION ALL SELECT code FROM deliveries
        UNION ALL SELECT code FROM credit_notes
        UNION ALL SELECT code FROM swaps
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(codes)
}

// =============================================================================
// Transaction Helpers: Line Items
// =============================================================================

/// Lines in a stable order that survives a line being deleted and
/// re-inserted with its original id and timestamp.
pub(crate) async fn lines(conn: &mut SqliteConnection, invoice_id: &str) -> DbResult<Vec<InvoiceLineItem>> {
    let sql = format!("{} WHERE invoice_id = ?1 ORDER BY created_at, id", SELECT_LINE);
    let rows = sqlx::query_as::<_, InvoiceLineItem>(&sql)
        .bind(invoice_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

pub(crate) async fn fetch_line(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<InvoiceLineItem>> {
    let sql = format!("{} WHERE id = ?1", SELECT_LINE);
    let line = sqlx::query_as::<_, InvoiceLineItem>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(line)
}

pub(crate) async fn insert_line(conn: &mut SqliteConnection, line: &InvoiceLineItem) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO invoice_line_items (
            id, invoice_id, product_id, quantity, price_cents, discount, discount_type,
            final_price_cents, total_price_cents, tax_rate_bps, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&line.id)
    .bind(&line.invoice_id)
    .bind(&line.product_id)
    .bind(line.quantity)
    .bind(line.price_cents)
    .bind(line.discount)
    .bind(line.discount_type)
    .bind(line.final_price_cents)
    .bind(line.total_price_cents)
    .bind(line.tax_rate_bps)
    .bind(line.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Persists a resized line: quantity and total in one statement.
pub(crate) async fn update_line_quantity(conn: &mut SqliteConnection, line: &InvoiceLineItem) -> DbResult<()> {
    let result = sqlx::query("UPDATE invoice_line_items SET quantity = ?1, total_price_cents = ?2 WHERE id = ?3")
        .bind(line.quantity)
        .bind(line.total_price_cents)
        .bind(&line.id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::not_found("InvoiceLineItem", &line.id));
    }
    Ok(())
}

pub(crate) async fn delete_line(conn: &mut SqliteConnection, id: &str) -> DbResult<()> {
    sqlx::query("DELETE FROM invoice_line_items WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn delete_lines(conn: &mut SqliteConnection, invoice_id: &str) -> DbResult<()> {
    sqlx::query("DELETE FROM invoice_line_items WHERE invoice_id = ?1")
        .bind(invoice_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// How many credit notes and swaps reference the invoice.
pub(crate) async fn dependent_documents(conn: &mut SqliteConnection, invoice_id: &str) -> DbResult<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT (SELECT COUNT(*) FROM credit_notes WHERE invoice_id = ?1)
             + (SELECT COUNT(*) FROM swaps WHERE invoice_id = ?1)
        "#,
    )
    .bind(invoice_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}
