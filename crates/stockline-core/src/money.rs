//! # Money Module
//!
//! Integer minor-unit money for invoice, credit-note and swap math.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Invoice totals are recomputed on EVERY line mutation:                  │
//! │                                                                         │
//! │    create → credit note → swap → swap edit → swap delete               │
//! │                                                                         │
//! │  With floats, each recompute can drift by a fraction of a cent and a   │
//! │  swap create + delete would NOT restore the invoice bit-for-bit.       │
//! │                                                                         │
//! │  With i64 cents every recompute is exact and reversible.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use stockline_core::money::Money;
//!
//! let final_price = Money::from_cents(1000);
//! let line_total = final_price.multiply_quantity(10);
//! assert_eq!(line_total.cents(), 10_000);
//!
//! // 10% of the live subtotal
//! assert_eq!(line_total.percentage_of(1000).cents(), 1_000);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

use crate::types::TaxRate;

/// Basis points in 100%.
pub const BPS_DENOMINATOR: i64 = 10_000;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit.
///
/// ## Where Money Flows
/// ```text
/// Product.selling_price ──► InvoiceLineItem.price ──► final_price ──► total_price
///                                                                      │
///              Σ total_price ──► Invoice.subtotal ──► actual_discount ─┤
///                                                                      ▼
///                              total = subtotal − actual_discount + shipping
///                              remaining = total − paid
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion.
    #[inline]
    pub const fn dollars(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Clamps the value into `[0, ceiling]`.
    ///
    /// Used for discounts: a discount can never be negative and can never
    /// exceed the amount it is applied to.
    pub fn clamp_to(self, ceiling: Money) -> Money {
        Money(self.0.max(0).min(ceiling.0.max(0)))
    }

    /// Returns the value, or zero when negative.
    #[inline]
    pub fn non_negative(self) -> Money {
        Money(self.0.max(0))
    }

    /// Calculates tax for this amount, rounding half up.
    ///
    /// ## Example
    /// ```rust
    /// use stockline_core::money::Money;
    /// use stockline_core::types::TaxRate;
    ///
    /// let amount = Money::from_cents(1000);
    /// let tax = amount.calculate_tax(TaxRate::from_bps(825));
    /// // 10.00 × 8.25% = 0.825 → 0.83
    /// assert_eq!(tax.cents(), 83);
    /// ```
    pub fn calculate_tax(&self, rate: TaxRate) -> Money {
        self.percentage_of(rate.bps())
    }

    /// Returns `bps` basis points of this amount, rounded half up.
    ///
    /// Formula: `(amount × bps + 5000) / 10000`, evaluated in i128 so large
    /// invoices cannot overflow.
    pub fn percentage_of(&self, bps: i64) -> Money {
        let scaled = self.0 as i128 * bps as i128;
        let half = (BPS_DENOMINATOR / 2) as i128;
        let rounded = if scaled >= 0 {
            (scaled + half) / BPS_DENOMINATOR as i128
        } else {
            (scaled - half) / BPS_DENOMINATOR as i128
        };
        Money(rounded as i64)
    }

    /// Multiplies a unit amount by a quantity.
    ///
    /// The only sanctioned way to derive a line total from a unit price.
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display for logs and debugging only; presentation formats its own.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(
            f,
            "{}{}.{:02}",
            sign,
            self.dollars().abs(),
            self.cents_part()
        )
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl From<i64> for Money {
    fn from(cents: i64) -> Self {
        Money(cents)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
