//! # Credit Note Repository
//!
//! Database operations for credit notes, their lines, and the delivery
//! quantity moves recorded when a note is posted.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::warn;

use crate::error::{DbError, DbResult};
use stockline_core::{CreditNote, CreditNoteLine};

const SELECT_NOTE: &str = r#"
    SELECT id, code, invoice_id, customer_id, subtotal_cents, tax_cents, total_cents,
           status, reason, created_by, created_at
    FROM credit_notes
"#;

const SELECT_LINE: &str = r#"
    SELECT id, credit_note_id, invoice_line_id, product_id, quantity,
           unit_price_cents, discount_cents, tax_rate_bps, line_total_cents
    FROM credit_note_lines
"#;

/// A quantity moved from delivered to returned on one delivery line.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DeliveryMove {
    pub id: String,
    pub credit_note_id: String,
    pub delivery_line_item_id: String,
    pub quantity: i64,
}

/// Repository for credit note reads.
#[derive(Debug, Clone)]
pub struct CreditNoteRepository {
    pool: SqlitePool,
}

impl CreditNoteRepository {
    /// Creates a new CreditNoteRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CreditNoteRepository { pool }
    }

    /// Gets a credit note by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<CreditNote>> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, id).await
    }

    /// Lines of a credit note.
    pub async fn lines(&self, credit_note_id: &str) -> DbResult<Vec<CreditNoteLine>> {
        let mut conn = self.pool.acquire().await?;
        lines(&mut conn, credit_note_id).await
    }

    /// Credit notes issued against an invoice, oldest first.
    ///
    /// Display-only read path: when the credit note tables are not there
    /// this returns an empty list instead of failing.
    pub async fn history_for_invoice(&self, invoice_id: &str) -> DbResult<Vec<CreditNote>> {
        let sql = format!("{} WHERE invoice_id = ?1 ORDER BY rowid", SELECT_NOTE);
        let result = sqlx::query_as::<_, CreditNote>(&sql)
            .bind(invoice_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from);

        match result {
            Ok(notes) => Ok(notes),
            Err(e) if e.is_missing_table() => {
                warn!(invoice_id = %invoice_id, error = %e, "Credit notes unavailable, returning empty history");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

pub(crate) async fn insert(conn: &mut SqliteConnection, note: &CreditNote) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO credit_notes (
            id, code, invoice_id, customer_id, subtotal_cents, tax_cents, total_cents,
            status, reason, created_by, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&note.id)
    .bind(&note.code)
    .bind(&note.invoice_id)
    .bind(&note.customer_id)
    .bind(note.subtotal_cents)
    .bind(note.tax_cents)
    .bind(note.total_cents)
    .bind(note.status)
    .bind(&note.reason)
    .bind(&note.created_by)
    .bind(note.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<CreditNote>> {
    let sql = format!("{} WHERE id = ?1", SELECT_NOTE);
    let note = sqlx::query_as::<_, CreditNote>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(note)
}

pub(crate) async fn require(conn: &mut SqliteConnection, id: &str) -> DbResult<CreditNote> {
    fetch(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("CreditNote", id))
}

/// Deletes a note; lines and moves cascade.
pub(crate) async fn delete(conn: &mut SqliteConnection, id: &str) -> DbResult<()> {
    sqlx::query("DELETE FROM credit_notes WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn insert_line(conn: &mut SqliteConnection, line: &CreditNoteLine) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO credit_note_lines (
            id, credit_note_id, invoice_line_id, product_id, quantity,
            unit_price_cents, discount_cents, tax_rate_bps, line_total_cents
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(&line.id)
    .bind(&line.credit_note_id)
    .bind(&line.invoice_line_id)
    .bind(&line.product_id)
    .bind(line.quantity)
    .bind(line.unit_price_cents)
    .bind(line.discount_cents)
    .bind(line.tax_rate_bps)
    .bind(line.line_total_cents)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn lines(conn: &mut SqliteConnection, credit_note_id: &str) -> DbResult<Vec<CreditNoteLine>> {
    let sql = format!("{} WHERE credit_note_id = ?1 ORDER BY rowid", SELECT_LINE);
    let rows = sqlx::query_as::<_, CreditNoteLine>(&sql)
        .bind(credit_note_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

pub(crate) async fn insert_move(conn: &mut SqliteConnection, delivery_move: &DeliveryMove) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO credit_note_delivery_moves (id, credit_note_id, delivery_line_item_id, quantity) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(&delivery_move.id)
    .bind(&delivery_move.credit_note_id)
    .bind(&delivery_move.delivery_line_item_id)
    .bind(delivery_move.quantity)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn moves(conn: &mut SqliteConnection, credit_note_id: &str) -> DbResult<Vec<DeliveryMove>> {
    let rows = sqlx::query_as::<_, DeliveryMove>(
        r#"
        SELECT id, credit_note_id, delivery_line_item_id, quantity
        FROM credit_note_delivery_moves
        WHERE credit_note_id = ?1
        ORDER BY rowid
        "#,
    )
    .bind(credit_note_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_history_degrades_when_table_is_gone() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.credit_notes().history_for_invoice("inv-1").await.unwrap().is_empty());

        sqlx::query("DROP TABLE credit_note_delivery_moves").execute(db.pool()).await.unwrap();
        sqlx::query("DROP TABLE credit_note_lines").execute(db.pool()).await.unwrap();
        sqlx::query("DROP TABLE credit_notes").execute(db.pool()).await.unwrap();

        let history = db.credit_notes().history_for_invoice("inv-1").await;
        assert_eq!(history.unwrap(), Vec::new());
    }
}
