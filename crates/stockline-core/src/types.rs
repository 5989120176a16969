//! # Domain Types
//!
//! The rows the consistency core reads and writes.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Product ◄──── StockMovement (immutable, before/after snapshot)        │
//! │     ▲                                                                   │
//! │     │ product_id                                                        │
//! │  InvoiceLineItem ◄──── Invoice ────► Payment                           │
//! │     ▲       ▲             │                                             │
//! │     │       │             ├──► Delivery ──► DeliveryLineItem            │
//! │     │       │             ├──► CreditNote ──► CreditNoteLine            │
//! │     │       └─────────────┴──► Swap ──► SwapDetail                     │
//! │     └──────────────────────────────────────────┘                        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All relations are by id only. Services re-fetch inside the transaction
//! instead of holding live references to each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (825 bps = 8.25%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(i64);

impl TaxRate {
    #[inline]
    pub const fn from_bps(bps: i64) -> Self {
        TaxRate(bps)
    }

    #[inline]
    pub const fn bps(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

// =============================================================================
// Product
// =============================================================================

/// A stocked product.
///
/// `current_stock` is a cache of the stock ledger. Only the ledger's
/// posting and reversal routines write it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    pub id: String,
    pub sku: String,
    pub name: String,
    /// Unit of measure ("pcs", "box", "kg").
    pub unit: String,
    pub current_stock: i64,
    /// Cost of goods per unit, in cents.
    pub cost_cents: i64,
    /// Selling price per unit, in cents.
    pub selling_price_cents: i64,
    /// Optional tax reference, in basis points.
    pub tax_rate_bps: Option<i64>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    #[inline]
    pub fn cost(&self) -> Money {
        Money::from_cents(self.cost_cents)
    }

    #[inline]
    pub fn selling_price(&self) -> Money {
        Money::from_cents(self.selling_price_cents)
    }

    #[inline]
    pub fn tax_rate(&self) -> TaxRate {
        TaxRate::from_bps(self.tax_rate_bps.unwrap_or(0))
    }
}

// =============================================================================
// Stock Movement
// =============================================================================

/// Which way a movement pushes `current_stock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementDirection {
    In,
    Out,
}

/// Ledger movement types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockMovementType {
    /// Goods leave stock against an invoice (or a re-shipment).
    SalesOut,
    /// Goods come back: failed delivery, credit note, revoked re-shipment.
    ReturnIn,
    /// Manual removal, used to take back a previously restored quantity.
    AdjustmentOut,
    /// Old goods taken back by a swap.
    SwapIn,
    /// Replacement goods handed out by a swap.
    SwapOut,
}

impl StockMovementType {
    pub const fn direction(&self) -> MovementDirection {
        match self {
            StockMovementType::ReturnIn | StockMovementType::SwapIn => MovementDirection::In,
            StockMovementType::SalesOut
            | StockMovementType::AdjustmentOut
            | StockMovementType::SwapOut => MovementDirection::Out,
        }
    }

    pub const fn is_inbound(&self) -> bool {
        matches!(self.direction(), MovementDirection::In)
    }

    /// The type a compensating entry for this movement is posted with.
    pub const fn inverse(&self) -> StockMovementType {
        match self {
            StockMovementType::SalesOut => StockMovementType::ReturnIn,
            StockMovementType::ReturnIn => StockMovementType::AdjustmentOut,
            StockMovementType::AdjustmentOut => StockMovementType::ReturnIn,
            StockMovementType::SwapIn => StockMovementType::SwapOut,
            StockMovementType::SwapOut => StockMovementType::SwapIn,
        }
    }

    /// Signed stock delta for `quantity` units of this type.
    pub const fn signed(&self, quantity: i64) -> i64 {
        match self.direction() {
            MovementDirection::In => quantity,
            MovementDirection::Out => -quantity,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            StockMovementType::SalesOut => "SALES_OUT",
            StockMovementType::ReturnIn => "RETURN_IN",
            StockMovementType::AdjustmentOut => "ADJUSTMENT_OUT",
            StockMovementType::SwapIn => "SWAP_IN",
            StockMovementType::SwapOut => "SWAP_OUT",
        }
    }
}

/// An immutable ledger row.
///
/// Invariant: `new_stock == previous_stock + movement_type.signed(quantity)`
/// and `new_stock >= 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockMovement {
    pub id: String,
    pub product_id: String,
    pub movement_type: StockMovementType,
    /// Always positive.
    pub quantity: i64,
    pub previous_stock: i64,
    pub new_stock: i64,
    /// Causing entity, see [`StockReference`].
    pub reference: String,
    pub notes: Option<String>,
    pub actor_id: String,
    /// Set on compensating entries: the movement this one cancels.
    pub reversal_of: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    /// Signed effect of this entry on `current_stock`.
    pub fn delta(&self) -> i64 {
        self.movement_type.signed(self.quantity)
    }
}

/// Free-text reference linking a movement back to its cause.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StockReference {
    Invoice(String),
    Delivery(String),
    /// Re-shipment approved after the given failed delivery.
    Redelivery(String),
    CreditNote(String),
    Swap(String),
}

impl std::fmt::Display for StockReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StockReference::Invoice(id) => write!(f, "invoice:{}", id),
            StockReference::Delivery(id) => write!(f, "delivery:{}", id),
            StockReference::Redelivery(delivery_id) => write!(f, "redelivery:{}", delivery_id),
            StockReference::CreditNote(id) => write!(f, "credit_note:{}", id),
            StockReference::Swap(id) => write!(f, "swap:{}", id),
        }
    }
}

// =============================================================================
// Invoice
// =============================================================================

/// Invoice lifecycle.
///
/// ```text
/// DRAFT ──► SENT ──┬──► PAID ───────┬──► COMPLETED
///                  └──► DELIVERED ──┘
///           SENT ──► CANCELLED
///           SENT/PAID ──► RETURNED (failed delivery) ──► SENT (redelivery)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Delivered,
    Completed,
    Cancelled,
    Returned,
}

impl InvoiceStatus {
    /// Line items, discount and shipping may only change in these states.
    pub const fn is_editable(&self) -> bool {
        matches!(self, InvoiceStatus::Draft | InvoiceStatus::Sent)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Sent => "SENT",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Delivered => "DELIVERED",
            InvoiceStatus::Completed => "COMPLETED",
            InvoiceStatus::Cancelled => "CANCELLED",
            InvoiceStatus::Returned => "RETURNED",
        }
    }
}

impl Default for InvoiceStatus {
    fn default() -> Self {
        InvoiceStatus::Draft
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

impl Default for PaymentStatus {
    fn default() -> Self {
        PaymentStatus::Unpaid
    }
}

/// How a configured discount value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    /// Discount value is a fixed amount in cents.
    Amount,
    /// Discount value is in basis points (1000 = 10%).
    Percentage,
}

impl Default for DiscountType {
    fn default() -> Self {
        DiscountType::Amount
    }
}

/// An invoice and its derived financial totals.
///
/// `discount`/`discount_type` are the configured rule; every `*_cents`
/// total below `shipping_cost_cents` is derived by the recalculator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Invoice {
    pub id: String,
    pub code: String,
    pub customer_id: String,
    /// External order this invoice settles, notified on full payment.
    pub order_id: Option<String>,
    pub status: InvoiceStatus,
    pub payment_status: PaymentStatus,
    pub subtotal_cents: i64,
    pub discount: i64,
    pub discount_type: DiscountType,
    pub actual_discount_cents: i64,
    /// Informational only, never part of `total_cents`.
    pub tax_cents: i64,
    pub shipping_cost_cents: i64,
    pub total_cents: i64,
    pub paid_cents: i64,
    pub remaining_cents: i64,
    pub allow_redelivery: bool,
    pub requires_delivery_note: bool,
    pub delivery_note_number: Option<String>,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    #[inline]
    pub fn remaining(&self) -> Money {
        Money::from_cents(self.remaining_cents)
    }
}

/// A product line on an invoice.
///
/// Invariant: `total_price_cents == final_price_cents * quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct InvoiceLineItem {
    pub id: String,
    pub invoice_id: String,
    pub product_id: String,
    pub quantity: i64,
    /// Unit price before the line discount.
    pub price_cents: i64,
    pub discount: i64,
    pub discount_type: DiscountType,
    /// Unit price after the line discount.
    pub final_price_cents: i64,
    pub total_price_cents: i64,
    pub tax_rate_bps: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl InvoiceLineItem {
    #[inline]
    pub fn final_price(&self) -> Money {
        Money::from_cents(self.final_price_cents)
    }

    #[inline]
    pub fn total_price(&self) -> Money {
        Money::from_cents(self.total_price_cents)
    }

    /// Sets a new quantity and recomputes the total in the same step.
    pub fn resize(&mut self, quantity: i64) {
        self.quantity = quantity;
        self.total_price_cents = self.final_price().multiply_quantity(quantity).cents();
    }
}

// =============================================================================
// Delivery
// =============================================================================

/// Shipment lifecycle.
///
/// ```text
/// PENDING ──┬──► DELIVERED  (terminal success)
///           ├──► RETURNED   (terminal failure)
///           └──► CANCELLED  (terminal failure)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Returned,
    Cancelled,
}

impl DeliveryStatus {
    pub const fn is_failure(&self) -> bool {
        matches!(self, DeliveryStatus::Returned | DeliveryStatus::Cancelled)
    }

    pub const fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }

    /// Active deliveries block the creation of another one.
    pub const fn is_active(&self) -> bool {
        !self.is_failure()
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::Delivered => "DELIVERED",
            DeliveryStatus::Returned => "RETURNED",
            DeliveryStatus::Cancelled => "CANCELLED",
        }
    }
}

impl Default for DeliveryStatus {
    fn default() -> Self {
        DeliveryStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Delivery {
    pub id: String,
    pub code: String,
    pub invoice_id: String,
    /// Set on the synthetic shipment a swap creates for its replacement goods.
    pub swap_id: Option<String>,
    pub status: DeliveryStatus,
    pub return_reason: Option<String>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    pub fn is_synthetic(&self) -> bool {
        self.swap_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct DeliveryLineItem {
    pub id: String,
    pub delivery_id: String,
    pub invoice_line_id: Option<String>,
    pub product_id: String,
    pub quantity_to_deliver: i64,
    pub quantity_delivered: i64,
    pub quantity_returned: i64,
}

// =============================================================================
// Credit Note
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreditNoteStatus {
    Posted,
}

/// A return of invoiced goods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CreditNote {
    pub id: String,
    pub code: String,
    pub invoice_id: String,
    pub customer_id: String,
    pub subtotal_cents: i64,
    /// Informational, like invoice tax.
    pub tax_cents: i64,
    pub total_cents: i64,
    pub status: CreditNoteStatus,
    pub reason: Option<String>,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CreditNoteLine {
    pub id: String,
    pub credit_note_id: String,
    pub invoice_line_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    /// Recorded for reference; already baked into `unit_price_cents`.
    pub discount_cents: i64,
    pub tax_rate_bps: i64,
    pub line_total_cents: i64,
}

// =============================================================================
// Swap
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapStatus {
    Completed,
}

/// A value-balanced exchange of invoiced goods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Swap {
    pub id: String,
    pub code: String,
    pub invoice_id: String,
    pub status: SwapStatus,
    /// Σ old value (cost × quantity) across all groups.
    pub base_total_cents: i64,
    /// Σ replacement value − Σ old value, never negative.
    pub difference_cents: i64,
    pub notes: Option<String>,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// Flat (old product, replacement product) pair derived from a swap group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SwapDetail {
    pub id: String,
    pub swap_id: String,
    pub old_item_id: String,
    pub replacement_item_id: String,
    pub old_item_cogs_cents: i64,
    pub replacement_item_cogs_cents: i64,
    pub old_item_quantity: i64,
    pub replacement_item_quantity: i64,
}

// =============================================================================
// Payment
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    Card,
}

/// A payment applied to an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Payment {
    pub id: String,
    pub invoice_id: String,
    pub method: PaymentMethod,
    pub amount_cents: i64,
    pub reference: Option<String>,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Commands
// =============================================================================

/// Input for registering a product with its opening stock.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub unit: String,
    pub opening_stock: i64,
    pub cost_cents: i64,
    pub selling_price_cents: i64,
    pub tax_rate_bps: Option<i64>,
}

/// A requested invoice line.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct NewInvoiceLine {
    pub product_id: String,
    pub quantity: i64,
    /// Defaults to the product's selling price.
    pub price_cents: Option<i64>,
    #[serde(default)]
    pub discount: i64,
    #[serde(default)]
    pub discount_type: DiscountType,
}

/// Input for raising an invoice.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct NewInvoice {
    pub customer_id: String,
    pub order_id: Option<String>,
    #[serde(default)]
    pub discount: i64,
    #[serde(default)]
    pub discount_type: DiscountType,
    #[serde(default)]
    pub shipping_cost_cents: i64,
    #[serde(default)]
    pub requires_delivery_note: bool,
    pub lines: Vec<NewInvoiceLine>,
}

// =============================================================================
// Unit Tests
// =============================================================================
