//! # Invoice Totals
//!
//! Line pricing and the invoice total identity.
//!
//! ```text
//! line:     final_price = price − line discount      (clamped ≥ 0)
//!           total_price = final_price × quantity
//!
//! invoice:  subtotal        = Σ total_price
//!           actual_discount = rule(discount, discount_type, subtotal)  ∈ [0, subtotal]
//!           total           = subtotal − actual_discount + shipping
//!           remaining       = total − paid
//!           tax             = Σ total_price × tax_rate   (informational)
//! ```
//!
//! The database recalculator feeds the current lines through
//! [`InvoiceTotals::compute`] as the last step of every transaction that
//! changes line items.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;
use crate::types::{DiscountType, Invoice, InvoiceLineItem, InvoiceStatus, PaymentStatus, TaxRate};

// =============================================================================
// Line Pricing
// =============================================================================

/// Applies a per-unit discount rule to a unit price.
///
/// ## Example
/// ```rust
/// use stockline_core::money::Money;
/// use stockline_core::totals::discounted_unit_price;
/// use stockline_core::types::DiscountType;
///
/// let price = Money::from_cents(1200);
/// assert_eq!(discounted_unit_price(price, 200, DiscountType::Amount).cents(), 1000);
/// assert_eq!(discounted_unit_price(price, 2500, DiscountType::Percentage).cents(), 900);
/// ```
pub fn discounted_unit_price(price: Money, discount: i64, discount_type: DiscountType) -> Money {
    let off = match discount_type {
        DiscountType::Amount => Money::from_cents(discount),
        DiscountType::Percentage => price.percentage_of(discount),
    };
    (price - off.clamp_to(price)).non_negative()
}

/// Derived price fields for one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinePrice {
    pub final_price: Money,
    pub total_price: Money,
}

/// Prices a line: the discounted unit price and its extension.
pub fn price_line(price: Money, discount: i64, discount_type: DiscountType, quantity: i64) -> LinePrice {
    let final_price = discounted_unit_price(price, discount, discount_type);
    LinePrice {
        final_price,
        total_price: final_price.multiply_quantity(quantity),
    }
}

// =============================================================================
// Invoice Totals
// =============================================================================

/// Monetary discount derived from the configured rule against `subtotal`.
pub fn actual_discount(subtotal: Money, discount: i64, discount_type: DiscountType) -> Money {
    let raw = match discount_type {
        DiscountType::Amount => Money::from_cents(discount),
        DiscountType::Percentage => subtotal.percentage_of(discount),
    };
    raw.clamp_to(subtotal)
}

/// Every derived financial field of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceTotals {
    pub subtotal: Money,
    pub actual_discount: Money,
    pub tax: Money,
    pub shipping: Money,
    pub total: Money,
    pub paid: Money,
    pub remaining: Money,
}

impl InvoiceTotals {
    /// Derives totals from the live line items and the invoice's configured
    /// discount, shipping and paid amount.
    pub fn compute(
        lines: &[InvoiceLineItem],
        discount: i64,
        discount_type: DiscountType,
        shipping: Money,
        paid: Money,
    ) -> Self {
        let subtotal: Money = lines.iter().map(InvoiceLineItem::total_price).sum();
        let tax: Money = lines
            .iter()
            .map(|l| l.total_price().calculate_tax(TaxRate::from_bps(l.tax_rate_bps)))
            .sum();
        let actual_discount = actual_discount(subtotal, discount, discount_type);
        let total = subtotal - actual_discount + shipping;

        InvoiceTotals {
            subtotal,
            actual_discount,
            tax,
            shipping,
            total,
            paid,
            remaining: total - paid,
        }
    }

    /// Recomputes totals for an invoice from the given lines.
    pub fn for_invoice(invoice: &Invoice, lines: &[InvoiceLineItem]) -> Self {
        Self::compute(
            lines,
            invoice.discount,
            invoice.discount_type,
            Money::from_cents(invoice.shipping_cost_cents),
            Money::from_cents(invoice.paid_cents),
        )
    }

    /// Reads the stored totals of an invoice.
    pub fn stored(invoice: &Invoice) -> Self {
        InvoiceTotals {
            subtotal: Money::from_cents(invoice.subtotal_cents),
            actual_discount: Money::from_cents(invoice.actual_discount_cents),
            tax: Money::from_cents(invoice.tax_cents),
            shipping: Money::from_cents(invoice.shipping_cost_cents),
            total: Money::from_cents(invoice.total_cents),
            paid: Money::from_cents(invoice.paid_cents),
            remaining: Money::from_cents(invoice.remaining_cents),
        }
    }

    /// `total == subtotal − actual_discount + shipping` and
    /// `remaining == total − paid`.
    pub fn holds_identity(&self) -> bool {
        self.total == self.subtotal - self.actual_discount + self.shipping
            && self.remaining == self.total - self.paid
    }

    /// Writes the derived fields onto an invoice value.
    pub fn apply_to(&self, invoice: &mut Invoice) {
        invoice.subtotal_cents = self.subtotal.cents();
        invoice.actual_discount_cents = self.actual_discount.cents();
        invoice.tax_cents = self.tax.cents();
        invoice.total_cents = self.total.cents();
        invoice.remaining_cents = self.remaining.cents();
    }
}

// =============================================================================
// Settlement
// =============================================================================

/// Statuses after a payment leaves `remaining` owed.
///
/// ```text
/// remaining > 0            → unchanged, UNPAID
/// remaining == 0, DELIVERED → COMPLETED, PAID
/// remaining == 0, SENT      → PAID, PAID
/// ```
pub fn status_after_payment(status: InvoiceStatus, remaining: Money) -> (InvoiceStatus, PaymentStatus) {
    if remaining.is_positive() {
        return (status, PaymentStatus::Unpaid);
    }
    let status = match status {
        InvoiceStatus::Delivered => InvoiceStatus::Completed,
        InvoiceStatus::Sent => InvoiceStatus::Paid,
        other => other,
    };
    (status, PaymentStatus::Paid)
}

/// Statuses after a payment is removed. Undoes [`status_after_payment`]
/// once something is owed again.
pub fn status_after_payment_removed(
    status: InvoiceStatus,
    payment_status: PaymentStatus,
    remaining: Money,
) -> (InvoiceStatus, PaymentStatus) {
    if !remaining.is_positive() {
        return (status, payment_status);
    }
    let status = match status {
        InvoiceStatus::Completed => InvoiceStatus::Delivered,
        InvoiceStatus::Paid => InvoiceStatus::Sent,
        other => other,
    };
    (status, PaymentStatus::Unpaid)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn line(qty: i64, price: i64, discount: i64, discount_type: DiscountType, tax_bps: i64) -> InvoiceLineItem {
        let priced = price_line(Money::from_cents(price), discount, discount_type, qty);
        InvoiceLineItem {
            id: format!("l-{}-{}", qty, price),
            invoice_id: "inv".to_string(),
            product_id: "p".to_string(),
            quantity: qty,
            price_cents: price,
            discount,
            discount_type,
            final_price_cents: priced.final_price.cents(),
            total_price_cents: priced.total_price.cents(),
            tax_rate_bps: tax_bps,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_line_discount_is_per_unit_and_clamped() {
        let priced = price_line(Money::from_cents(1000), 150, DiscountType::Amount, 3);
        assert_eq!(priced.final_price.cents(), 850);
        assert_eq!(priced.total_price.cents(), 2550);

        let priced = price_line(Money::from_cents(1000), 5000, DiscountType::Amount, 3);
        assert_eq!(priced.final_price.cents(), 0);
        assert_eq!(priced.total_price.cents(), 0);
    }

    #[test]
    fn test_scenario_subtotal() {
        let lines = vec![line(10, 1000, 0, DiscountType::Amount, 0)];
        let totals = InvoiceTotals::compute(
            &lines,
            0,
            DiscountType::Amount,
            Money::zero(),
            Money::zero(),
        );
        assert_eq!(totals.subtotal.cents(), 10_000);
        assert_eq!(totals.total.cents(), 10_000);
        assert!(totals.holds_identity());
    }

    #[test]
    fn test_percentage_discount_follows_live_subtotal() {
        let mut lines = vec![line(10, 1000, 0, DiscountType::Amount, 0)];
        let before = InvoiceTotals::compute(
            &lines,
            1000,
            DiscountType::Percentage,
            Money::from_cents(500),
            Money::from_cents(2000),
        );
        assert_eq!(before.actual_discount.cents(), 1000);
        assert_eq!(before.total.cents(), 9500);
        assert_eq!(before.remaining.cents(), 7500);

        lines[0].resize(6);
        let after = InvoiceTotals::compute(
            &lines,
            1000,
            DiscountType::Percentage,
            Money::from_cents(500),
            Money::from_cents(2000),
        );
        assert_eq!(after.subtotal.cents(), 6000);
        assert_eq!(after.actual_discount.cents(), 600);
        assert_eq!(after.total.cents(), 5900);
        assert!(after.holds_identity());
    }

    #[test]
    fn test_amount_discount_never_exceeds_subtotal() {
        let lines = vec![line(1, 300, 0, DiscountType::Amount, 0)];
        let totals = InvoiceTotals::compute(&lines, 1000, DiscountType::Amount, Money::zero(), Money::zero());
        assert_eq!(totals.actual_discount.cents(), 300);
        assert_eq!(totals.total.cents(), 0);
    }

    #[test]
    fn test_tax_is_informational() {
        let lines = vec![line(1, 10_000, 0, DiscountType::Amount, 1100)];
        let totals = InvoiceTotals::compute(&lines, 0, DiscountType::Amount, Money::zero(), Money::zero());
        assert_eq!(totals.tax.cents(), 1100);
        assert_eq!(totals.total.cents(), 10_000);
    }

    #[test]
    fn test_settlement_transitions() {
        assert_eq!(
            status_after_payment(InvoiceStatus::Delivered, Money::zero()),
            (InvoiceStatus::Completed, PaymentStatus::Paid)
        );
        assert_eq!(
            status_after_payment(InvoiceStatus::Sent, Money::zero()),
            (InvoiceStatus::Paid, PaymentStatus::Paid)
        );
        assert_eq!(
            status_after_payment(InvoiceStatus::Sent, Money::from_cents(1)),
            (InvoiceStatus::Sent, PaymentStatus::Unpaid)
        );
        assert_eq!(
            status_after_payment_removed(InvoiceStatus::Completed, PaymentStatus::Paid, Money::from_cents(10)),
            (InvoiceStatus::Delivered, PaymentStatus::Unpaid)
        );
        assert_eq!(
            status_after_payment_removed(InvoiceStatus::Paid, PaymentStatus::Paid, Money::zero()),
            (InvoiceStatus::Paid, PaymentStatus::Paid)
        );
    }
}
