//! # Payment Repository
//!
//! Database operations for invoice payments.

use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{DbError, DbResult};
use stockline_core::Payment;

const SELECT_PAYMENT: &str = r#"
    SELECT id, invoice_id, method, amount_cents, reference, created_by, created_at
    FROM payments
"#;

/// Repository for payment reads.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    /// Creates a new PaymentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PaymentRepository { pool }
    }

    /// Payments applied to an invoice, oldest first.
    pub async fn for_invoice(&self, invoice_id: &str) -> DbResult<Vec<Payment>> {
        let sql = format!("{} WHERE invoice_id = ?1 ORDER BY rowid", SELECT_PAYMENT);
        let payments = sqlx::query_as::<_, Payment>(&sql)
            .bind(invoice_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(payments)
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

pub(crate) async fn insert(conn: &mut SqliteConnection, payment: &Payment) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO payments (id, invoice_id, method, amount_cents, reference, created_by, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&payment.id)
    .bind(&payment.invoice_id)
    .bind(payment.method)
    .bind(payment.amount_cents)
    .bind(&payment.reference)
    .bind(&payment.created_by)
    .bind(payment.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn require(conn: &mut SqliteConnection, id: &str) -> DbResult<Payment> {
    let sql = format!("{} WHERE id = ?1", SELECT_PAYMENT);
    sqlx::query_as::<_, Payment>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("Payment", id))
}

pub(crate) async fn count_for_invoice(conn: &mut SqliteConnection, invoice_id: &str) -> DbResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE invoice_id = ?1")
        .bind(invoice_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

pub(crate) async fn delete(conn: &mut SqliteConnection, id: &str) -> DbResult<()> {
    sqlx::query("DELETE FROM payments WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
