//! # Repository Module
//!
//! Row-level database access for stockline.
//!
//! ## Two Halves Per Repository
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  db.invoices().get_by_id(id)        XRepository { pool }                │
//! │       │                             read side, own connection           │
//! │       ▼                                                                 │
//! │  SQLite Database                                                        │
//! │       ▲                                                                 │
//! │       │                             pub(crate) fn x(conn: &mut Conn)    │
//! │  service::swap::create(...)         write side, borrows the caller's   │
//! │    let mut tx = pool.begin()        open transaction                   │
//! │    invoice::lines(&mut tx, id)                                          │
//! │    tx.commit()                                                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing outside `service` calls a write helper, so every mutation runs
//! inside exactly one transaction.
//!
//! ## Available Repositories
//!
//! - [`ProductRepository`] - Products and opening balances
//! - [`StockMovementRepository`] - The stock ledger
//! - [`InvoiceRepository`] - Invoices and line items
//! - [`DeliveryRepository`] - Deliveries and delivery lines
//! - [`CreditNoteRepository`] - Credit notes, lines, delivery moves
//! - [`SwapRepository`] - Swaps, groups and line bookkeeping
//! - [`PaymentRepository`] - Invoice payments
//!
//! [`ProductRepository`]: product::ProductRepository
//! [`StockMovementRepository`]: stock_movement::StockMovementRepository
//! [`InvoiceRepository`]: invoice::InvoiceRepository
//! [`DeliveryRepository`]: delivery::DeliveryRepository
//! [`CreditNoteRepository`]: credit_note::CreditNoteRepository
//! [`SwapRepository`]: swap::SwapRepository
//! [`PaymentRepository`]: payment::PaymentRepository

pub mod credit_note;
pub mod delivery;
pub mod invoice;
pub mod payment;
pub mod product;
pub mod stock_movement;
pub mod swap;
