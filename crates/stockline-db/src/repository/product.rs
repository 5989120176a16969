//! # Product Repository
//!
//! Database operations for products.
//!
//! ## Key Operations
//! - Registration with an opening stock balance
//! - Lookup by id / SKU, listing
//! - The guarded stock write used by the ledger
//!
//! ## Stock Writes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Only service::ledger calls set_stock_guarded():                        │
//! │                                                                         │
//! │    UPDATE products SET current_stock = :new                             │
//! │    WHERE id = :id AND current_stock = :previous                         │
//! │                                                                         │
//! │  0 rows → someone moved the product since it was read → Conflict        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use stockline_core::validation::validate_new_product;
use stockline_core::{NewProduct, Product};

const SELECT_PRODUCT: &str = r#"
    SELECT id, sku, name, unit, current_stock, cost_cents, selling_price_cents,
           tax_rate_bps, created_at, updated_at
    FROM products
"#;

/// Repository for product database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = db.products();
/// let product = repo.create(&new_product).await?;
/// let same = repo.get_by_sku("WIDGET-01").await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Registers a product with its opening stock.
    ///
    /// The opening balance is the base the ledger is replayed from; it is
    /// not itself a ledger movement.
    pub async fn create(&self, new: &NewProduct) -> DbResult<Product> {
        validate_new_product(new)?;

        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4().to_string(),
            sku: new.sku.trim().to_string(),
            name: new.name.trim().to_string(),
            unit: new.unit.trim().to_string(),
            current_stock: new.opening_stock,
            cost_cents: new.cost_cents,
            selling_price_cents: new.selling_price_cents,
            tax_rate_bps: new.tax_rate_bps,
            created_at: now,
            updated_at: now,
        };

        debug!(id = %product.id, sku = %product.sku, "Inserting product");

        let mut conn = self.pool.acquire().await?;
        insert(&mut conn, &product).await.map_err(|e| match e {
            DbError::UniqueViolation { .. } => DbError::duplicate("sku", &product.sku),
            other => other,
        })?;

        Ok(product)
    }

    /// Gets a product by its ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, id).await
    }

    /// Gets a product by its SKU.
    pub async fn get_by_sku(&self, sku: &str) -> DbResult<Option<Product>> {
        let sql = format!("{} WHERE sku = ?1", SELECT_PRODUCT);
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(sku.trim())
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    /// Lists products ordered by name.
    pub async fn list(&self, limit: u32) -> DbResult<Vec<Product>> {
        let sql = format!("{} ORDER BY name LIMIT ?1", SELECT_PRODUCT);
        let products = sqlx::query_as::<_, Product>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(products)
    }

    /// Opening balance the ledger is replayed from.
    pub async fn opening_stock(&self, id: &str) -> DbResult<i64> {
        let opening: Option<i64> = sqlx::query_scalar("SELECT opening_stock FROM products WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        opening.ok_or_else(|| DbError::not_found("Product", id))
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

pub(crate) async fn insert(conn: &mut SqliteConnection, product: &Product) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO products (
            id, sku, name, unit, current_stock, opening_stock,
            cost_cents, selling_price_cents, tax_rate_bps, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&product.id)
    .bind(&product.sku)
    .bind(&product.name)
    .bind(&product.unit)
    .bind(product.current_stock)
    .bind(product.cost_cents)
    .bind(product.selling_price_cents)
    .bind(product.tax_rate_bps)
    .bind(product.created_at)
    .bind(product.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Product>> {
    let sql = format!("{} WHERE id = ?1", SELECT_PRODUCT);
    let product = sqlx::query_as::<_, Product>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(product)
}

pub(crate) async fn require(conn: &mut SqliteConnection, id: &str) -> DbResult<Product> {
    fetch(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("Product", id))
}

/// Loads every product in `ids`, failing on the first missing one.
pub(crate) async fn require_many<'a, I>(conn: &mut SqliteConnection, ids: I) -> DbResult<HashMap<String, Product>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut products = HashMap::new();
    for id in ids {
        if !products.contains_key(id) {
            let product = require(conn, id).await?;
            products.insert(product.id.clone(), product);
        }
    }
    Ok(products)
}

/// Compare-and-set on `current_stock`.
pub(crate) async fn set_stock_guarded(
    conn: &mut SqliteConnection,
    id: &str,
    previous_stock: i64,
    new_stock: i64,
) -> DbResult<()> {
    let result = sqlx::query(
        "UPDATE products SET current_stock = ?1, updated_at = ?2 WHERE id = ?3 AND current_stock = ?4",
    )
    .bind(new_stock)
    .bind(Utc::now())
    .bind(id)
    .bind(previous_stock)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::conflict(
            "Product",
            id,
            format!("current_stock is no longer {}", previous_stock),
        ));
    }
    Ok(())
}
