//! # Stock Ledger Arithmetic
//!
//! The pure half of the stock ledger: snapshot math for a new movement,
//! selection of movements still awaiting reversal, and replay.
//!
//! ## Posting
//! ```text
//! current_stock = 100
//!      │
//!      │  plan_movement(SALES_OUT, 10)
//!      ▼
//! MovementPlan { previous_stock: 100, new_stock: 90 }
//!      │
//!      │  stockline-db writes the entry AND current_stock = 90
//!      ▼
//! Ledger: [SALES_OUT 10 │ 100 → 90]
//! ```
//!
//! ## Reversal
//! Compensating reversal posts `movement_type.inverse()` for every entry in
//! [`outstanding`] and links it through `reversal_of`. Delete-and-restore
//! removes the same entries and rewinds stock by their net delta, see
//! [`plan_purge`].

use std::collections::HashSet;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::{StockMovement, StockMovementType};

/// Snapshot values for a movement about to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovementPlan {
    pub movement_type: StockMovementType,
    pub quantity: i64,
    pub previous_stock: i64,
    pub new_stock: i64,
}

/// Computes the before/after snapshot for posting `quantity` units.
///
/// Fails with `InsufficientStock` when an OUT movement would take the
/// product below zero.
pub fn plan_movement(
    product_id: &str,
    current_stock: i64,
    movement_type: StockMovementType,
    quantity: i64,
) -> CoreResult<MovementPlan> {
    if quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "movement quantity".to_string(),
        }
        .into());
    }

    let new_stock = current_stock + movement_type.signed(quantity);
    if new_stock < 0 {
        return Err(CoreError::InsufficientStock {
            product_id: product_id.to_string(),
            available: current_stock,
            requested: quantity,
        });
    }

    Ok(MovementPlan {
        movement_type,
        quantity,
        previous_stock: current_stock,
        new_stock,
    })
}

/// Entries of `movement_type` that are neither compensations themselves nor
/// already compensated by another entry in `entries`.
///
/// `entries` is everything recorded under one reference, in posting order.
pub fn outstanding(entries: &[StockMovement], movement_type: StockMovementType) -> Vec<&StockMovement> {
    let reversed: HashSet<&str> = entries
        .iter()
        .filter_map(|e| e.reversal_of.as_deref())
        .collect();

    entries
        .iter()
        .filter(|e| e.movement_type == movement_type)
        .filter(|e| e.reversal_of.is_none())
        .filter(|e| !reversed.contains(e.id.as_str()))
        .collect()
}

/// Stock level after deleting `entries` of one product.
///
/// The entries' net delta is rewound from the live value rather than jumping
/// back to the oldest `previous_stock`, so movements posted in between
/// under other references survive. Fails when the rewind would go negative
/// (restored goods were consumed since).
pub fn plan_purge(product_id: &str, current_stock: i64, entries: &[&StockMovement]) -> CoreResult<i64> {
    let net: i64 = entries.iter().map(|e| e.delta()).sum();
    let restored = current_stock - net;
    if restored < 0 {
        return Err(CoreError::InsufficientStock {
            product_id: product_id.to_string(),
            available: current_stock,
            requested: net,
        });
    }
    Ok(restored)
}

/// Replays a product's ledger from its opening balance.
///
/// Compensated pairs cancel out, so the result equals the opening balance
/// plus the net of all non-reversed entries. Must match `current_stock`.
pub fn replay(opening_stock: i64, entries: &[StockMovement]) -> i64 {
    opening_stock + entries.iter().map(StockMovement::delta).sum::<i64>()
}

/// True when every entry's snapshot follows from its own type and quantity.
pub fn snapshots_consistent(entries: &[StockMovement]) -> bool {
    entries.iter().all(|e| {
        e.new_stock >= 0 && e.new_stock == e.previous_stock + e.movement_type.signed(e.quantity)
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
