//! # Stock Movement Repository
//!
//! Storage for the stock ledger.
//!
//! Rows are written once and never updated. The only deletes come from the
//! delete-and-restore reversal strategy, which rewinds `current_stock` in the
//! same transaction (see `service::ledger`).
//!
//! Ledger order is insertion order (`rowid`); two rows written in the same
//! millisecond still replay correctly.

use sqlx::{SqliteConnection, SqlitePool};

use crate::error::DbResult;
use stockline_core::{StockMovement, StockMovementType};

const SELECT_MOVEMENT: &str = r#"
    SELECT id, product_id, movement_type, quantity, previous_stock, new_stock,
           reference, notes, actor_id, reversal_of, created_at
    FROM stock_movements
"#;

/// Read access to the stock ledger.
#[derive(Debug, Clone)]
pub struct StockMovementRepository {
    pool: SqlitePool,
}

impl StockMovementRepository {
    /// Creates a new StockMovementRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StockMovementRepository { pool }
    }

    /// Every entry for a product, oldest first.
    pub async fn for_product(&self, product_id: &str) -> DbResult<Vec<StockMovement>> {
        let mut conn = self.pool.acquire().await?;
        for_product(&mut conn, product_id).await
    }

    /// Every entry recorded under a reference, oldest first.
    pub async fn for_reference(&self, reference: &str) -> DbResult<Vec<StockMovement>> {
        let mut conn = self.pool.acquire().await?;
        for_reference(&mut conn, reference).await
    }

    /// Total number of ledger rows.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stock_movements")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

pub(crate) async fn insert(conn: &mut SqliteConnection, movement: &StockMovement) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            id, product_id, movement_type, quantity, previous_stock, new_stock,
            reference, notes, actor_id, reversal_of, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&movement.id)
    .bind(&movement.product_id)
    .bind(movement.movement_type)
    .bind(movement.quantity)
    .bind(movement.previous_stock)
    .bind(movement.new_stock)
    .bind(&movement.reference)
    .bind(&movement.notes)
    .bind(&movement.actor_id)
    .bind(&movement.reversal_of)
    .bind(movement.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn for_product(conn: &mut SqliteConnection, product_id: &str) -> DbResult<Vec<StockMovement>> {
    let sql = format!("{} WHERE product_id = ?1 ORDER BY rowid", SELECT_MOVEMENT);
    let rows = sqlx::query_as::<_, StockMovement>(&sql)
        .bind(product_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

pub(crate) async fn for_reference(conn: &mut SqliteConnection, reference: &str) -> DbResult<Vec<StockMovement>> {
    let sql = format!("{} WHERE reference = ?1 ORDER BY rowid", SELECT_MOVEMENT);
    let rows = sqlx::query_as::<_, StockMovement>(&sql)
        .bind(reference)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

/// True when `reference` has an entry of `movement_type` that is still in
/// effect.
pub(crate) async fn has_outstanding(
    conn: &mut SqliteConnection,
    reference: &str,
    movement_type: StockMovementType,
) -> DbResult<bool> {
    let entries = for_reference(conn, reference).await?;
    Ok(!stockline_core::ledger::outstanding(&entries, movement_type).is_empty())
}

pub(crate) async fn delete(conn: &mut SqliteConnection, id: &str) -> DbResult<()> {
    sqlx::query("DELETE FROM stock_movements WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
