//! # stockline-core: Pure Business Logic for stockline
//!
//! The I/O-free half of the sell / ship / collect / return consistency core.
//! Every rule that can be decided from values alone lives here; the database
//! crate fetches rows inside a transaction, asks this crate what to do, and
//! writes the outcome.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        stockline Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Callers (forms, APIs, jobs)                     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ one call = one transaction             │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │            stockline-db services (transaction scripts)          │   │
//! │  │   invoice • delivery • credit note • swap • payment • ledger    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │            ★ stockline-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐ ┌─────────┐ ┌──────────┐ ┌─────────────┐ ┌──────┐ │   │
//! │  │   │ ledger  │ │ totals  │ │ delivery │ │ credit_note │ │ swap │ │   │
//! │  │   └─────────┘ └─────────┘ └──────────┘ └─────────────┘ └──────┘ │   │
//! │  │   types • money • validation • error                            │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain rows (Product, StockMovement, Invoice, Delivery, ...)
//! - [`money`] - Money type with integer arithmetic
//! - [`error`] - Error taxonomy and the structured [`ErrorReport`]
//! - [`validation`] - Field-level input checks
//! - [`ledger`] - Movement snapshots, reversal selection, replay
//! - [`totals`] - Line pricing, invoice totals, settlement statuses
//! - [`delivery`] - Delivery state machine guards
//! - [`credit_note`] - Return validation and credit-note totals
//! - [`swap`] - Swap group valuation, flattening and line planning
//!
//! ## Example Usage
//!
//! ```rust
//! use stockline_core::money::Money;
//! use stockline_core::totals::price_line;
//! use stockline_core::types::DiscountType;
//!
//! let line = price_line(Money::from_cents(1000), 0, DiscountType::Amount, 10);
//! assert_eq!(line.total_price.cents(), 10_000);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod credit_note;
pub mod delivery;
pub mod error;
pub mod ledger;
pub mod money;
pub mod swap;
pub mod totals;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ErrorKind, ErrorReport, ValidationError};
pub use money::Money;
pub use totals::InvoiceTotals;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Upper bound on the lines of one invoice.
pub const MAX_INVOICE_LINES: usize = 500;

/// Upper bound on a single line or movement quantity.
///
/// Catches typos (100000 instead of 100) before they hit the ledger.
pub const MAX_LINE_QUANTITY: i64 = 1_000_000;

/// Actor recorded when a caller supplies none (seeding, maintenance).
pub const SYSTEM_ACTOR_ID: &str = "system";
