//! # Swap Repository
//!
//! Database operations for swaps.
//!
//! ## Tables
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  swaps                  header, base_total, difference                  │
//! │  swap_groups            ◄── source of truth: one row per group          │
//! │   └─ swap_group_items       OLD / REPLACEMENT items of the group        │
//! │  swap_details           derived flat projection (rebuilt on update)     │
//! │  swap_line_snapshots    invoice lines as they were before a take        │
//! │  swap_line_additions    quantities put onto replacement lines           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use stockline_core::swap::{GroupValuation, SwapGroup, SwapItem};
use stockline_core::{DiscountType, Swap, SwapDetail};

const SIDE_OLD: &str = "OLD";
const SIDE_REPLACEMENT: &str = "REPLACEMENT";

const SELECT_SWAP: &str = r#"
    SELECT id, code, invoice_id, status, base_total_cents, difference_cents, notes,
           created_by, created_at, updated_at
    FROM swaps
"#;

/// An invoice line as it was before a swap took `taken` units from it.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SwapLineSnapshot {
    pub id: String,
    pub swap_id: String,
    pub line_id: String,
    pub product_id: String,
    pub taken: i64,
    pub price_cents: i64,
    pub discount: i64,
    pub discount_type: DiscountType,
    pub final_price_cents: i64,
    pub tax_rate_bps: i64,
    pub line_created_at: DateTime<Utc>,
}

/// Units a swap added to an invoice line. `created_line` marks lines the
/// swap itself created.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SwapLineAddition {
    pub id: String,
    pub swap_id: String,
    pub line_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub created_line: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct GroupItemRow {
    group_id: String,
    side: String,
    product_id: String,
    quantity: i64,
}

/// Repository for swap reads.
#[derive(Debug, Clone)]
pub struct SwapRepository {
    pool: SqlitePool,
}

impl SwapRepository {
    /// Creates a new SwapRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SwapRepository { pool }
    }

    /// Gets a swap by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Swap>> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, id).await
    }

    /// Swaps taken against an invoice, oldest first.
    pub async fn for_invoice(&self, invoice_id: &str) -> DbResult<Vec<Swap>> {
        let sql = format!("{} WHERE invoice_id = ?1 ORDER BY rowid", SELECT_SWAP);
        let swaps = sqlx::query_as::<_, Swap>(&sql)
            .bind(invoice_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(swaps)
    }

    /// The groups the swap was created with.
    pub async fn groups(&self, swap_id: &str) -> DbResult<Vec<SwapGroup>> {
        let mut conn = self.pool.acquire().await?;
        groups(&mut conn, swap_id).await
    }

    /// The flat detail projection.
    pub async fn details(&self, swap_id: &str) -> DbResult<Vec<SwapDetail>> {
        let details = sqlx::query_as::<_, SwapDetail>(
            r#"
            SELECT id, swap_id, old_item_id, replacement_item_id, old_item_cogs_cents,
                   replacement_item_cogs_cents, old_item_quantity, replacement_item_quantity
            FROM swap_details
            WHERE swap_id = ?1
            ORDER BY rowid
            "#,
        )
        .bind(swap_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(details)
    }
}

// =============================================================================
// Transaction Helpers: Header
// =============================================================================

pub(crate) async fn insert(conn: &mut SqliteConnection, swap: &Swap) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO swaps (
            id, code, invoice_id, status, base_total_cents, difference_cents, notes,
            created_by, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&swap.id)
    .bind(&swap.code)
    .bind(&swap.invoice_id)
    .bind(swap.status)
    .bind(swap.base_total_cents)
    .bind(swap.difference_cents)
    .bind(&swap.notes)
    .bind(&swap.created_by)
    .bind(swap.created_at)
    .bind(swap.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Swap>> {
    let sql = format!("{} WHERE id = ?1", SELECT_SWAP);
    let swap = sqlx::query_as::<_, Swap>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(swap)
}

pub(crate) async fn require(conn: &mut SqliteConnection, id: &str) -> DbResult<Swap> {
    fetch(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("Swap", id))
}

pub(crate) async fn update_header(conn: &mut SqliteConnection, swap: &Swap) -> DbResult<()> {
    sqlx::query(
        "UPDATE swaps SET base_total_cents = ?1, difference_cents = ?2, notes = ?3, updated_at = ?4 WHERE id = ?5",
    )
    .bind(swap.base_total_cents)
    .bind(swap.difference_cents)
    .bind(&swap.notes)
    .bind(Utc::now())
    .bind(&swap.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Deletes the swap row; every child table cascades.
pub(crate) async fn delete(conn: &mut SqliteConnection, id: &str) -> DbResult<()> {
    sqlx::query("DELETE FROM swaps WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// =============================================================================
// Transaction Helpers: Groups and Details
// =============================================================================

pub(crate) async fn insert_groups(
    conn: &mut SqliteConnection,
    swap_id: &str,
    groups: &[SwapGroup],
    valuations: &[GroupValuation],
) -> DbResult<()> {
    for (position, (group, valuation)) in groups.iter().zip(valuations).enumerate() {
        let group_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO swap_groups (id, swap_id, position, old_value_cents, replacement_value_cents)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&group_id)
        .bind(swap_id)
        .bind(position as i64)
        .bind(valuation.old_value.cents())
        .bind(valuation.replacement_value.cents())
        .execute(&mut *conn)
        .await?;

        let sides = [
            (SIDE_OLD, &group.old_items),
            (SIDE_REPLACEMENT, &group.replacement_items),
        ];
        for (side, items) in sides {
            for (item_position, item) in items.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO swap_group_items (id, group_id, side, position, product_id, quantity)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                )
                .bind(Uuid::new_v4().to_string())
                .bind(&group_id)
                .bind(side)
                .bind(item_position as i64)
                .bind(&item.product_id)
                .bind(item.quantity)
                .execute(&mut *conn)
                .await?;
            }
        }
    }
    Ok(())
}

/// Rebuilds the group structure in its original order.
pub(crate) async fn groups(conn: &mut SqliteConnection, swap_id: &str) -> DbResult<Vec<SwapGroup>> {
    let group_ids: Vec<String> =
        sqlx::query_scalar("SELECT id FROM swap_groups WHERE swap_id = ?1 ORDER BY position")
            .bind(swap_id)
            .fetch_all(&mut *conn)
            .await?;

    let items = sqlx::query_as::<_, GroupItemRow>(
        r#"
        SELECT i.group_id, i.side, i.product_id, i.quantity
        FROM swap_group_items i
        JOIN swap_groups g ON g.id = i.group_id
        WHERE g.swap_id = ?1
        ORDER BY g.position, i.side, i.position
        "#,
    )
    .bind(swap_id)
    .fetch_all(&mut *conn)
    .await?;

    let groups = group_ids
        .iter()
        .map(|group_id| {
            let mut group = SwapGroup {
                old_items: Vec::new(),
                replacement_items: Vec::new(),
            };
            for row in items.iter().filter(|r| &r.group_id == group_id) {
                let item = SwapItem {
                    product_id: row.product_id.clone(),
                    quantity: row.quantity,
                };
                if row.side == SIDE_OLD {
                    group.old_items.push(item);
                } else {
                    group.replacement_items.push(item);
                }
            }
            group
        })
        .collect();

    Ok(groups)
}

pub(crate) async fn insert_detail(conn: &mut SqliteConnection, detail: &SwapDetail) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO swap_details (
            id, swap_id, old_item_id, replacement_item_id, old_item_cogs_cents,
            replacement_item_cogs_cents, old_item_quantity, replacement_item_quantity
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&detail.id)
    .bind(&detail.swap_id)
    .bind(&detail.old_item_id)
    .bind(&detail.replacement_item_id)
    .bind(detail.old_item_cogs_cents)
    .bind(detail.replacement_item_cogs_cents)
    .bind(detail.old_item_quantity)
    .bind(detail.replacement_item_quantity)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Drops groups, details, snapshots and additions, keeping the header.
pub(crate) async fn clear_children(conn: &mut SqliteConnection, swap_id: &str) -> DbResult<()> {
    for table in [
        "swap_groups",
        "swap_details",
        "swap_line_snapshots",
        "swap_line_additions",
    ] {
        let sql = format!("DELETE FROM {} WHERE swap_id = ?1", table);
        sqlx::query(&sql).bind(swap_id).execute(&mut *conn).await?;
    }
    Ok(())
}

// =============================================================================
// Transaction Helpers: Line Bookkeeping
// =============================================================================

pub(crate) async fn insert_snapshot(conn: &mut SqliteConnection, snapshot: &SwapLineSnapshot) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO swap_line_snapshots (
            id, swap_id, line_id, product_id, taken, price_cents, discount,
            discount_type, final_price_cents, tax_rate_bps, line_created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&snapshot.id)
    .bind(&snapshot.swap_id)
    .bind(&snapshot.line_id)
    .bind(&snapshot.product_id)
    .bind(snapshot.taken)
    .bind(snapshot.price_cents)
    .bind(snapshot.discount)
    .bind(snapshot.discount_type)
    .bind(snapshot.final_price_cents)
    .bind(snapshot.tax_rate_bps)
    .bind(snapshot.line_created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn snapshots(conn: &mut SqliteConnection, swap_id: &str) -> DbResult<Vec<SwapLineSnapshot>> {
    let rows = sqlx::query_as::<_, SwapLineSnapshot>(
        r#"
        SELECT id, swap_id, line_id, product_id, taken, price_cents, discount,
               discount_type, final_price_cents, tax_rate_bps, line_created_at
        FROM swap_line_snapshots
        WHERE swap_id = ?1
        ORDER BY rowid
        "#,
    )
    .bind(swap_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

pub(crate) async fn insert_addition(conn: &mut SqliteConnection, addition: &SwapLineAddition) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO swap_line_additions (id, swap_id, line_id, product_id, quantity, created_line)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(&addition.id)
    .bind(&addition.swap_id)
    .bind(&addition.line_id)
    .bind(&addition.product_id)
    .bind(addition.quantity)
    .bind(addition.created_line)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn additions(conn: &mut SqliteConnection, swap_id: &str) -> DbResult<Vec<SwapLineAddition>> {
    let rows = sqlx::query_as::<_, SwapLineAddition>(
        r#"
        SELECT id, swap_id, line_id, product_id, quantity, created_line
        FROM swap_line_additions
        WHERE swap_id = ?1
        ORDER BY rowid
        "#,
    )
    .bind(swap_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}
