//! # Services
//!
//! Transaction scripts: one public call opens one SQLite transaction, asks
//! `stockline_core` what to do, writes the outcome through the repository
//! helpers, runs the recalculator last, and commits.
//!
//! ## Call Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  engine.swaps().create(invoice_id, groups, notes, actor)                │
//! │    │                                                                    │
//! │    ├── tx = pool.begin()                                                │
//! │    ├── re-fetch invoice / lines / products        (ids only, no refs)   │
//! │    ├── stockline_core::swap::validate_groups(..)  (pure)                │
//! │    ├── ledger::post(&mut tx, ..)                  (only stock writer)   │
//! │    ├── repository helpers (&mut tx)                                     │
//! │    ├── recalculator::recalculate(&mut tx, ..)     (always last)         │
//! │    └── tx.commit()                                                      │
//! │                                                                         │
//! │  any `?` before commit drops tx → SQLite rolls everything back          │
//! │  side effects (order notification) run after commit                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Collaborators
//! - [`CodeGenerator`] hands out human-readable document codes
//! - [`OrderNotifier`] receives "order completed" once an invoice is paid

pub mod credit_note;
pub mod delivery;
pub mod invoice;
pub mod ledger;
pub mod payment;
pub mod recalculator;
pub mod swap;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{EngineConfig, ReversalStrategy};
use crate::error::DbResult;
use crate::pool::Database;
use crate::repository::invoice as invoice_repo;

pub use credit_note::CreditNoteService;
pub use delivery::DeliveryService;
pub use invoice::InvoiceService;
pub use ledger::{ConservationReport, Posting, StockLedger};
pub use payment::PaymentService;
pub use swap::SwapService;

// =============================================================================
// Code Generator
// =============================================================================

/// Documents that receive a human-readable code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Invoice,
    Delivery,
    CreditNote,
    Swap,
}

impl DocumentKind {
    pub const fn prefix(&self) -> &'static str {
        match self {
            DocumentKind::Invoice => "INV",
            DocumentKind::Delivery => "DEL",
            DocumentKind::CreditNote => "CN",
            DocumentKind::Swap => "SWP",
        }
    }
}

/// Produces unique document codes before an entity is created.
pub trait CodeGenerator: Send + Sync {
    fn next_code(&self, kind: DocumentKind) -> String;
}

/// `PREFIX-YYYYMMDD-NNNN` codes from one process-wide counter.
#[derive(Debug, Default)]
pub struct SequentialCodeGenerator {
    counter: AtomicU64,
}

impl SequentialCodeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continues numbering after `last`.
    pub fn starting_after(last: u64) -> Self {
        SequentialCodeGenerator {
            counter: AtomicU64::new(last),
        }
    }

    /// Highest numeric suffix among existing codes.
    fn last_sequence<'a>(codes: impl IntoIterator<Item = &'a str>) -> u64 {
        codes
            .into_iter()
            .filter_map(|code| code.rsplit('-').next())
            .filter_map(|suffix| suffix.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
    }
}

impl CodeGenerator for SequentialCodeGenerator {
    fn next_code(&self, kind: DocumentKind) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{}-{:04}", kind.prefix(), Utc::now().format("%Y%m%d"), n)
    }
}

// =============================================================================
// Order Notifier
// =============================================================================

#[derive(Debug, Error)]
#[error("order notification failed: {0}")]
pub struct NotifyError(pub String);

/// One-way push to the external order aggregate. Called after commit; a
/// failure is logged and never undoes the payment.
pub trait OrderNotifier: Send + Sync {
    fn order_completed(&self, order_id: &str, invoice_id: &str) -> Result<(), NotifyError>;
}

/// Notifier that drops every notification.
pub struct NoopOrderNotifier;

impl OrderNotifier for NoopOrderNotifier {
    fn order_completed(&self, _order_id: &str, _invoice_id: &str) -> Result<(), NotifyError> {
        Ok(())
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Entry point for every mutating use case.
///
/// ## Usage
/// ```rust,ignore
/// let engine = Engine::open(&EngineConfig::load(None)?).await?;
/// let invoice = engine.invoices().create(&new_invoice, "clerk-7").await?;
/// let delivery = engine.deliveries().create(&invoice.id, "clerk-7").await?;
/// ```
#[derive(Clone)]
pub struct Engine {
    db: Database,
    strategy: ReversalStrategy,
    default_actor: String,
    codes: Arc<dyn CodeGenerator>,
    notifier: Arc<dyn OrderNotifier>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("strategy", &self.strategy)
            .field("default_actor", &self.default_actor)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Wraps a database that holds no documents yet.
    ///
    /// The code counter starts at zero, so codes repeat those already stored
    /// in a used database. Use [`Engine::attach`] for one of those.
    pub fn new(db: Database, config: &EngineConfig) -> Self {
        Engine {
            db,
            strategy: config.reversal_strategy(),
            default_actor: config.engine.default_actor_id.clone(),
            codes: Arc::new(SequentialCodeGenerator::new()),
            notifier: Arc::new(NoopOrderNotifier),
        }
    }

    /// Opens the configured database and continues code numbering after
    /// the highest code already stored.
    pub async fn open(config: &EngineConfig) -> DbResult<Self> {
        let db = Database::new(config.db_config()).await?;
        let engine = Self::attach(db, config).await?;
        info!(strategy = ?config.reversal_strategy(), "Engine ready");
        Ok(engine)
    }

    /// Wraps an already open database, numbering after its stored codes.
    pub async fn attach(db: Database, config: &EngineConfig) -> DbResult<Self> {
        let codes = invoice_repo::all_document_codes(db.pool()).await?;
        let last = SequentialCodeGenerator::last_sequence(codes.iter().map(String::as_str));
        debug!(last, "Seeding document code counter");

        Ok(Self::new(db, config).with_code_generator(Arc::new(SequentialCodeGenerator::starting_after(last))))
    }

    pub fn with_code_generator(mut self, codes: Arc<dyn CodeGenerator>) -> Self {
        self.codes = codes;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn OrderNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_strategy(mut self, strategy: ReversalStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// The underlying database, for read-side repositories.
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn strategy(&self) -> ReversalStrategy {
        self.strategy
    }

    pub fn ledger(&self) -> StockLedger<'_> {
        StockLedger::new(self)
    }

    pub fn invoices(&self) -> InvoiceService<'_> {
        InvoiceService::new(self)
    }

    pub fn deliveries(&self) -> DeliveryService<'_> {
        DeliveryService::new(self)
    }

    pub fn credit_notes(&self) -> CreditNoteService<'_> {
        CreditNoteService::new(self)
    }

    pub fn swaps(&self) -> SwapService<'_> {
        SwapService::new(self)
    }

    pub fn payments(&self) -> PaymentService<'_> {
        PaymentService::new(self)
    }

    /// The actor recorded for a call; blank ids fall back to the default.
    pub(crate) fn actor(&self, actor_id: &str) -> String {
        let trimmed = actor_id.trim();
        if trimmed.is_empty() {
            self.default_actor.clone()
        } else {
            trimmed.to_string()
        }
    }

    pub(crate) fn next_code(&self, kind: DocumentKind) -> String {
        self.codes.next_code(kind)
    }

    pub(crate) fn notifier(&self) -> &dyn OrderNotifier {
        self.notifier.as_ref()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
