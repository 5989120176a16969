//! # stockline-db: Storage and Transaction Scripts for stockline
//!
//! SQLite persistence for the consistency core, plus the [`Engine`] whose
//! services run every mutating use case inside one transaction.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        stockline Data Flow                              │
//! │                                                                         │
//! │  caller: engine.credit_notes().create(invoice_id, items, reason, actor) │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  stockline-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐   ┌───────────────┐   ┌──────────────────┐ │   │
//! │  │   │   service     │──►│  repository   │──►│ Database (pool)  │ │   │
//! │  │   │ Engine        │   │ tx helpers    │   │ SqlitePool, WAL  │ │   │
//! │  │   │ StockLedger   │   │ read repos    │   │ migrations       │ │   │
//! │  │   └───────┬───────┘   └───────────────┘   └──────────────────┘ │   │
//! │  │           │ pure rules                                          │   │
//! │  └───────────┼─────────────────────────────────────────────────────┘   │
//! │              ▼                                                          │
//! │        stockline-core                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - `stockline.toml` + environment overrides
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Read repositories and in-transaction helpers
//! - [`service`] - The engine and its use cases
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockline_db::{Engine, EngineConfig};
//!
//! let engine = Engine::open(&EngineConfig::load(None)?).await?;
//! let invoice = engine.invoices().create(&new_invoice, "clerk-7").await?;
//! engine.payments().apply(&invoice.id, invoice.total_cents, PaymentMethod::Cash, None, "clerk-7").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod service;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{EngineConfig, ReversalStrategy};
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use service::{
    CodeGenerator, ConservationReport, CreditNoteService, DeliveryService, DocumentKind, Engine, InvoiceService,
    NoopOrderNotifier, NotifyError, OrderNotifier, PaymentService, Posting, SequentialCodeGenerator, StockLedger,
    SwapService,
};

// Repository re-exports for convenience
pub use repository::credit_note::CreditNoteRepository;
pub use repository::delivery::DeliveryRepository;
pub use repository::invoice::InvoiceRepository;
pub use repository::payment::PaymentRepository;
pub use repository::product::ProductRepository;
pub use repository::stock_movement::StockMovementRepository;
pub use repository::swap::SwapRepository;
