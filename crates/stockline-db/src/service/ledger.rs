//! # Stock Ledger
//!
//! The only code that writes `products.current_stock`.
//!
//! ## Posting
//! ```text
//! post(product, SALES_OUT, 10, "invoice:42")
//!   1. read product                     current_stock = 100
//!   2. plan_movement()                  100 → 90   (InsufficientStock if < 0)
//!   3. UPDATE products … WHERE current_stock = 100   (0 rows → Conflict)
//!   4. INSERT stock_movements (previous 100, new 90)
//! ```
//!
//! ## Reversal
//! ```text
//! ┌──────────────────────┬──────────────────────────────────────────────────┐
//! │ Compensating         │ post inverse type, same qty + reference,         │
//! │ (default)            │ reversal_of = original id. Nothing is deleted.   │
//! ├──────────────────────┼──────────────────────────────────────────────────┤
//! │ DeleteAndRestore     │ rewind current_stock by the entries' net delta,  │
//! │                      │ then delete the entries.                         │
//! └──────────────────────┴──────────────────────────────────────────────────┘
//! ```
//! Every caller goes through [`reverse_by_reference`], so one configured
//! strategy applies everywhere.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

use super::Engine;
use crate::config::ReversalStrategy;
use crate::error::DbResult;
use crate::repository::{product, stock_movement};
use stockline_core::ledger::{outstanding, plan_movement, plan_purge, replay, snapshots_consistent};
use stockline_core::{StockMovement, StockMovementType};

/// A movement about to be posted.
#[derive(Debug, Clone, Copy)]
pub struct Posting<'a> {
    pub product_id: &'a str,
    pub movement_type: StockMovementType,
    pub quantity: i64,
    pub reference: &'a str,
    pub notes: Option<&'a str>,
    pub actor_id: &'a str,
    pub reversal_of: Option<&'a str>,
}

impl<'a> Posting<'a> {
    pub fn new(
        product_id: &'a str,
        movement_type: StockMovementType,
        quantity: i64,
        reference: &'a str,
        actor_id: &'a str,
    ) -> Self {
        Posting {
            product_id,
            movement_type,
            quantity,
            reference,
            notes: None,
            actor_id,
            reversal_of: None,
        }
    }

    pub fn with_notes(mut self, notes: &'a str) -> Self {
        self.notes = Some(notes);
        self
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

/// Posts one movement and moves `current_stock` with it.
pub(crate) async fn post(conn: &mut SqliteConnection, posting: Posting<'_>) -> DbResult<StockMovement> {
    let current = product::require(conn, posting.product_id).await?;
    let plan = plan_movement(
        &current.id,
        current.current_stock,
        posting.movement_type,
        posting.quantity,
    )?;

    product::set_stock_guarded(conn, &current.id, plan.previous_stock, plan.new_stock).await?;

    let movement = StockMovement {
        id: Uuid::new_v4().to_string(),
        product_id: current.id,
        movement_type: plan.movement_type,
        quantity: plan.quantity,
        previous_stock: plan.previous_stock,
        new_stock: plan.new_stock,
        reference: posting.reference.to_string(),
        notes: posting.notes.map(str::to_string),
        actor_id: posting.actor_id.to_string(),
        reversal_of: posting.reversal_of.map(str::to_string),
        created_at: Utc::now(),
    };
    stock_movement::insert(conn, &movement).await?;

    debug!(
        product_id = %movement.product_id,
        movement_type = movement.movement_type.as_str(),
        quantity = movement.quantity,
        previous = movement.previous_stock,
        new = movement.new_stock,
        reference = %movement.reference,
        "Posted stock movement"
    );

    Ok(movement)
}

/// Undoes every outstanding `movement_type` entry under `reference`.
///
/// Returns how many entries were reversed. Nothing outstanding is a no-op.
pub(crate) async fn reverse_by_reference(
    conn: &mut SqliteConnection,
    strategy: ReversalStrategy,
    reference: &str,
    movement_type: StockMovementType,
    actor_id: &str,
) -> DbResult<usize> {
    let entries = stock_movement::for_reference(conn, reference).await?;
    let targets: Vec<StockMovement> = outstanding(&entries, movement_type).into_iter().cloned().collect();

    match strategy {
        ReversalStrategy::Compensating => {
            for entry in targets.iter().rev() {
                let posting = Posting {
                    product_id: &entry.product_id,
                    movement_type: entry.movement_type.inverse(),
                    quantity: entry.quantity,
                    reference,
                    notes: Some("reversal"),
                    actor_id,
                    reversal_of: Some(&entry.id),
                };
                post(conn, posting).await?;
            }
        }
        ReversalStrategy::DeleteAndRestore => {
            let mut by_product: BTreeMap<&str, Vec<&StockMovement>> = BTreeMap::new();
            for entry in &targets {
                by_product.entry(entry.product_id.as_str()).or_default().push(entry);
            }

            for (product_id, group) in by_product {
                let current = product::require(conn, product_id).await?;
                let restored = plan_purge(product_id, current.current_stock, &group)?;
                product::set_stock_guarded(conn, product_id, current.current_stock, restored).await?;
                for entry in group {
                    stock_movement::delete(conn, &entry.id).await?;
                }
                debug!(product_id, previous = current.current_stock, restored, "Purged stock movements");
            }
        }
    }

    if !targets.is_empty() {
        debug!(
            reference,
            movement_type = movement_type.as_str(),
            count = targets.len(),
            ?strategy,
            "Reversed stock movements"
        );
    }
    Ok(targets.len())
}

// =============================================================================
// Public Service
// =============================================================================

/// Result of replaying a product's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConservationReport {
    pub product_id: String,
    pub opening_stock: i64,
    pub replayed_stock: i64,
    pub current_stock: i64,
    pub snapshots_consistent: bool,
}

impl ConservationReport {
    pub fn holds(&self) -> bool {
        self.snapshots_consistent && self.replayed_stock == self.current_stock
    }
}

/// Manual access to the stock ledger.
pub struct StockLedger<'a> {
    engine: &'a Engine,
}

impl<'a> StockLedger<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        StockLedger { engine }
    }

    /// Posts a single movement in its own transaction.
    pub async fn post(&self, posting: Posting<'_>) -> DbResult<StockMovement> {
        let actor = self.engine.actor(posting.actor_id);
        let mut tx = self.engine.db().pool().begin().await?;
        let movement = post(&mut tx, Posting { actor_id: &actor, ..posting }).await?;
        tx.commit().await?;

        info!(id = %movement.id, product_id = %movement.product_id, "Stock movement committed");
        Ok(movement)
    }

    /// Reverses every outstanding `movement_type` entry under `reference`
    /// with the configured strategy.
    pub async fn reverse(&self, reference: &str, movement_type: StockMovementType, actor_id: &str) -> DbResult<usize> {
        let actor = self.engine.actor(actor_id);
        let mut tx = self.engine.db().pool().begin().await?;
        let count = reverse_by_reference(&mut tx, self.engine.strategy(), reference, movement_type, &actor).await?;
        tx.commit().await?;
        Ok(count)
    }

    /// Ledger history of a product, oldest first.
    pub async fn history(&self, product_id: &str) -> DbResult<Vec<StockMovement>> {
        self.engine.db().stock_movements().for_product(product_id).await
    }

    /// Replays the ledger from the opening balance and compares it with the
    /// cached `current_stock`.
    pub async fn check_conservation(&self, product_id: &str) -> DbResult<ConservationReport> {
        let mut conn = self.engine.db().pool().acquire().await?;
        let current = product::require(&mut conn, product_id).await?;
        let entries = stock_movement::for_product(&mut conn, product_id).await?;
        drop(conn);

        let opening_stock = self.engine.db().products().opening_stock(product_id).await?;

        Ok(ConservationReport {
            product_id: product_id.to_string(),
            opening_stock,
            replayed_stock: replay(opening_stock, &entries),
            current_stock: current.current_stock,
            snapshots_consistent: snapshots_consistent(&entries),
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::pool::{Database, DbConfig};
    use stockline_core::{CoreError, NewProduct};

    async fn setup(strategy: ReversalStrategy) -> (Engine, String) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = db
            .products()
            .create(&NewProduct {
                sku: "BOLT-10".to_string(),
                name: "Bolt".to_string(),
                unit: "pcs".to_string(),
                opening_stock: 20,
                cost_cents: 50,
                selling_price_cents: 80,
                tax_rate_bps: None,
            })
            .await
            .unwrap();
        (Engine::new(db, &EngineConfig::default()).with_strategy(strategy), product.id)
    }

    async fn stock(engine: &Engine, id: &str) -> i64 {
        engine.db().products().get_by_id(id).await.unwrap().unwrap().current_stock
    }

    #[tokio::test]
    async fn test_post_updates_stock_and_snapshots() {
        let (engine, id) = setup(ReversalStrategy::Compensating).await;

        let movement = engine
            .ledger()
            .post(Posting::new(&id, StockMovementType::SalesOut, 7, "manual:1", "ops").with_notes("cycle count"))
            .await
            .unwrap();

        assert_eq!(movement.notes.as_deref(), Some("cycle count"));
        assert_eq!(movement.previous_stock, 20);
        assert_eq!(movement.new_stock, 13);
        assert_eq!(stock(&engine, &id).await, 13);
    }

    #[tokio::test]
    async fn test_post_rejects_negative_stock() {
        let (engine, id) = setup(ReversalStrategy::Compensating).await;

        let err = engine
            .ledger()
            .post(Posting::new(&id, StockMovementType::SalesOut, 21, "manual:1", "ops"))
            .await
            .unwrap_err();

        assert!(matches!(err, crate::DbError::Domain(CoreError::InsufficientStock { .. })));
        assert_eq!(stock(&engine, &id).await, 20);
        assert!(engine.ledger().history(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_compensating_reversal_keeps_history() {
        let (engine, id) = setup(ReversalStrategy::Compensating).await;
        let ledger = engine.ledger();
        ledger
            .post(Posting::new(&id, StockMovementType::SalesOut, 5, "manual:1", "ops"))
            .await
            .unwrap();

        assert_eq!(ledger.reverse("manual:1", StockMovementType::SalesOut, "ops").await.unwrap(), 1);
        // Second call finds nothing outstanding.
        assert_eq!(ledger.reverse("manual:1", StockMovementType::SalesOut, "ops").await.unwrap(), 0);

        let history = ledger.history(&id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].movement_type, StockMovementType::ReturnIn);
        assert_eq!(history[1].reversal_of.as_deref(), Some(history[0].id.as_str()));
        assert_eq!(stock(&engine, &id).await, 20);
        assert!(ledger.check_conservation(&id).await.unwrap().holds());
    }

    #[tokio::test]
    async fn test_delete_and_restore_rewinds_net_delta() {
        let (engine, id) = setup(ReversalStrategy::DeleteAndRestore).await;
        let ledger = engine.ledger();
        ledger
            .post(Posting::new(&id, StockMovementType::SalesOut, 5, "manual:1", "ops"))
            .await
            .unwrap();
        ledger
            .post(Posting::new(&id, StockMovementType::SalesOut, 3, "manual:2", "ops"))
            .await
            .unwrap();

        ledger.reverse("manual:1", StockMovementType::SalesOut, "ops").await.unwrap();

        let history = ledger.history(&id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reference, "manual:2");
        assert_eq!(stock(&engine, &id).await, 17);
        assert!(ledger.check_conservation(&id).await.unwrap().replayed_stock == 17);
    }

    #[tokio::test]
    async fn test_conservation_report_serializes_camel_case() {
        let (engine, id) = setup(ReversalStrategy::Compensating).await;
        let report = engine.ledger().check_conservation(&id).await.unwrap();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["productId"], serde_json::json!(id));
        assert_eq!(json["replayedStock"], json["currentStock"]);
        assert_eq!(json["snapshotsConsistent"], serde_json::json!(true));
    }
}
