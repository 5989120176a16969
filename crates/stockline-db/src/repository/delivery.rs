//! # Delivery Repository
//!
//! Database operations for deliveries and delivery line items.
//!
//! Deliveries are returned in creation order everywhere; the state machine
//! in `stockline_core::delivery` relies on it to find the latest attempt.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{DbError, DbResult};
use stockline_core::{Delivery, DeliveryLineItem, DeliveryStatus};

const SELECT_DELIVERY: &str = r#"
    SELECT id, code, invoice_id, swap_id, status, return_reason, completed_at,
           created_by, created_at, updated_at
    FROM deliveries
"#;

const SELECT_LINE: &str = r#"
    SELECT id, delivery_id, invoice_line_id, product_id,
           quantity_to_deliver, quantity_delivered, quantity_returned
    FROM delivery_line_items
"#;

/// Repository for delivery reads.
#[derive(Debug, Clone)]
pub struct DeliveryRepository {
    pool: SqlitePool,
}

impl DeliveryRepository {
    /// Creates a new DeliveryRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DeliveryRepository { pool }
    }

    /// Gets a delivery by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Delivery>> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, id).await
    }

    /// Deliveries of an invoice, oldest first. Swap deliveries included.
    pub async fn for_invoice(&self, invoice_id: &str) -> DbResult<Vec<Delivery>> {
        let mut conn = self.pool.acquire().await?;
        for_invoice(&mut conn, invoice_id).await
    }

    /// Line items of a delivery.
    pub async fn lines(&self, delivery_id: &str) -> DbResult<Vec<DeliveryLineItem>> {
        let mut conn = self.pool.acquire().await?;
        lines(&mut conn, delivery_id).await
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

pub(crate) async fn insert(conn: &mut SqliteConnection, delivery: &Delivery) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO deliveries (
            id, code, invoice_id, swap_id, status, return_reason, completed_at,
            created_by, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&delivery.id)
    .bind(&delivery.code)
    .bind(&delivery.invoice_id)
    .bind(&delivery.swap_id)
    .bind(delivery.status)
    .bind(&delivery.return_reason)
    .bind(delivery.completed_at)
    .bind(&delivery.created_by)
    .bind(delivery.created_at)
    .bind(delivery.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Delivery>> {
    let sql = format!("{} WHERE id = ?1", SELECT_DELIVERY);
    let delivery = sqlx::query_as::<_, Delivery>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(delivery)
}

pub(crate) async fn require(conn: &mut SqliteConnection, id: &str) -> DbResult<Delivery> {
    fetch(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("Delivery", id))
}

pub(crate) async fn for_invoice(conn: &mut SqliteConnection, invoice_id: &str) -> DbResult<Vec<Delivery>> {
    let sql = format!("{} WHERE invoice_id = ?1 ORDER BY rowid", SELECT_DELIVERY);
    let rows = sqlx::query_as::<_, Delivery>(&sql)
        .bind(invoice_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

pub(crate) async fn for_swap(conn: &mut SqliteConnection, swap_id: &str) -> DbResult<Vec<Delivery>> {
    let sql = format!("{} WHERE swap_id = ?1 ORDER BY rowid", SELECT_DELIVERY);
    let rows = sqlx::query_as::<_, Delivery>(&sql)
        .bind(swap_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

pub(crate) async fn set_status(
    conn: &mut SqliteConnection,
    id: &str,
    status: DeliveryStatus,
    return_reason: Option<&str>,
    completed_at: Option<DateTime<Utc>>,
) -> DbResult<()> {
    sqlx::query(
        "UPDATE deliveries SET status = ?1, return_reason = ?2, completed_at = ?3, updated_at = ?4 WHERE id = ?5",
    )
    .bind(status)
    .bind(return_reason)
    .bind(completed_at)
    .bind(Utc::now())
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Deletes a delivery; its line items cascade.
pub(crate) async fn delete(conn: &mut SqliteConnection, id: &str) -> DbResult<()> {
    sqlx::query("DELETE FROM deliveries WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn insert_line(conn: &mut SqliteConnection, line: &DeliveryLineItem) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO delivery_line_items (
            id, delivery_id, invoice_line_id, product_id,
            quantity_to_deliver, quantity_delivered, quantity_returned
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&line.id)
    .bind(&line.delivery_id)
    .bind(&line.invoice_line_id)
    .bind(&line.product_id)
    .bind(line.quantity_to_deliver)
    .bind(line.quantity_delivered)
    .bind(line.quantity_returned)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn lines(conn: &mut SqliteConnection, delivery_id: &str) -> DbResult<Vec<DeliveryLineItem>> {
    let sql = format!("{} WHERE delivery_id = ?1 ORDER BY rowid", SELECT_LINE);
    let rows = sqlx::query_as::<_, DeliveryLineItem>(&sql)
        .bind(delivery_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

/// Delivery rows carrying goods of one invoice line, oldest first.
pub(crate) async fn lines_for_invoice_line(
    conn: &mut SqliteConnection,
    invoice_line_id: &str,
) -> DbResult<Vec<DeliveryLineItem>> {
    let sql = format!("{} WHERE invoice_line_id = ?1 ORDER BY rowid", SELECT_LINE);
    let rows = sqlx::query_as::<_, DeliveryLineItem>(&sql)
        .bind(invoice_line_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

/// Rows of every swap delivery on an invoice.
pub(crate) async fn swap_rows_for_invoice(
    conn: &mut SqliteConnection,
    invoice_id: &str,
) -> DbResult<Vec<DeliveryLineItem>> {
    let rows = sqlx::query_as::<_, DeliveryLineItem>(
        r#"
        SELECT li.id, li.delivery_id, li.invoice_line_id, li.product_id,
               li.quantity_to_deliver, li.quantity_delivered, li.quantity_returned
        FROM delivery_line_items li
        JOIN deliveries d ON d.id = li.delivery_id
        WHERE d.invoice_id = ?1 AND d.swap_id IS NOT NULL
        ORDER BY li.rowid
        "#,
    )
    .bind(invoice_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// Marks every line of a delivery as fully delivered.
pub(crate) async fn mark_lines_delivered(conn: &mut SqliteConnection, delivery_id: &str) -> DbResult<()> {
    sqlx::query("UPDATE delivery_line_items SET quantity_delivered = quantity_to_deliver WHERE delivery_id = ?1")
        .bind(delivery_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Moves `quantity` from delivered to returned on one row. Negative
/// quantities move it back.
pub(crate) async fn shift_returned(conn: &mut SqliteConnection, line_id: &str, quantity: i64) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE delivery_line_items
        SET quantity_delivered = quantity_delivered - ?1,
            quantity_returned = quantity_returned + ?1
        WHERE id = ?2
        "#,
    )
    .bind(quantity)
    .bind(line_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}
