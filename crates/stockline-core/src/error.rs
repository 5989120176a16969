//! # Error Types
//!
//! Domain-specific error types for stockline-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  stockline-core errors (this file)                                     │
//! │  ├── CoreError        - Business rule violations                       │
//! │  ├── ValidationError  - Input validation failures                      │
//! │  └── ErrorReport      - What callers see (kind + message + ids)        │
//! │                                                                         │
//! │  stockline-db errors (separate crate)                                  │
//! │  └── DbError          - Storage failures, wraps CoreError              │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → ErrorReport → caller    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every one of these aborts the surrounding transaction. Nothing here is
//! meant to be swallowed.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A referenced invoice, product, delivery, swap or credit note is missing.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The entity's current status forbids the operation.
    ///
    /// ## When This Occurs
    /// - Editing lines of a COMPLETED invoice
    /// - Transitioning a delivery that already reached a terminal state
    /// - Deleting a delivered shipment whose invoice has payments
    #[error("{entity} {id} is {status}, cannot {operation}")]
    InvalidState {
        entity: String,
        id: String,
        status: String,
        operation: String,
    },

    /// An OUT movement would drive `current_stock` negative.
    ///
    /// ## User Workflow
    /// ```text
    /// Swap: replacement B × 5
    ///      │
    ///      ▼
    /// Ledger: SWAP_OUT 5, stock of B = 3
    ///      │
    ///      ▼
    /// InsufficientStock { product_id: B, available: 3, requested: 5 }
    ///      │
    ///      ▼
    /// Whole swap rolls back (old items are NOT taken back either)
    /// ```
    #[error("Insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        available: i64,
        requested: i64,
    },

    /// A swap group whose replacement value is below the value taken back.
    #[error("Swap group {group} rejected: replacement value {replacement_value} is below old value {old_value}")]
    SwapGroupRejected {
        group: usize,
        old_value: i64,
        replacement_value: i64,
    },

    /// A second active delivery, or a concurrent write to the same row.
    #[error("{entity} {id} conflict: {reason}")]
    Conflict {
        entity: String,
        id: String,
        reason: String,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates an InvalidState error.
    pub fn invalid_state(
        entity: impl Into<String>,
        id: impl Into<String>,
        status: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        CoreError::InvalidState {
            entity: entity.into(),
            id: id.into(),
            status: status.into(),
            operation: operation.into(),
        }
    }

    /// Creates a Conflict error.
    pub fn conflict(
        entity: impl Into<String>,
        id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        CoreError::Conflict {
            entity: entity.into(),
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Returns the machine-readable category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::InvalidState { .. } => ErrorKind::InvalidState,
            CoreError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            CoreError::SwapGroupRejected { .. } | CoreError::Validation(_) => {
                ErrorKind::ValidationFailed
            }
            CoreError::Conflict { .. } => ErrorKind::Conflict,
        }
    }

    /// Ids of the entities the error is about, when known.
    pub fn entity_ids(&self) -> Vec<String> {
        match self {
            CoreError::NotFound { id, .. }
            | CoreError::InvalidState { id, .. }
            | CoreError::Conflict { id, .. } => vec![id.clone()],
            CoreError::InsufficientStock { product_id, .. } => vec![product_id.clone()],
            CoreError::SwapGroupRejected { .. } => Vec::new(),
            CoreError::Validation(e) => e.entity_id().into_iter().collect(),
        }
    }

    /// Builds the structured report handed back to callers.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            entity_ids: self.entity_ids(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any row is touched; the caller gets them as
/// `VALIDATION_FAILED`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Requested quantity is larger than what the referenced line holds.
    #[error("{field} {requested} exceeds available {available} on line {line_id}")]
    ExceedsAvailable {
        field: String,
        line_id: String,
        available: i64,
        requested: i64,
    },

    /// A referenced row does not belong to the parent being mutated.
    #[error("{field} '{value}' does not belong to {parent}")]
    ForeignReference {
        field: String,
        value: String,
        parent: String,
    },
}

impl ValidationError {
    fn entity_id(&self) -> Option<String> {
        match self {
            ValidationError::ExceedsAvailable { line_id, .. } => Some(line_id.clone()),
            ValidationError::ForeignReference { value, .. } => Some(value.clone()),
            _ => None,
        }
    }
}

// =============================================================================
// Error Report
// =============================================================================

/// Error categories surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    InsufficientStock,
    ValidationFailed,
    Conflict,
    /// Storage-level failure (connection, query, migration).
    Storage,
}

/// Structured error result: kind + human-readable message + offending ids.
///
/// ```json
/// {
///   "kind": "INSUFFICIENT_STOCK",
///   "message": "Insufficient stock for product p-1: available 3, requested 5",
///   "entityIds": ["p-1"]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    pub entity_ids: Vec<String>,
}

impl ErrorReport {
    /// Serializes the report for transport.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.message.clone())
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
