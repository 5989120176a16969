//! # Validation Module
//!
//! Field-level input checks run before a service touches any row.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: THIS MODULE (field checks)                                   │
//! │  ├── Required / length / sign / range                                  │
//! │  └── Discount and tax rules                                            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Component rules (credit_note, swap, delivery)                │
//! │  ├── Quantities against current invoice lines                          │
//! │  └── Status gates                                                       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (current_stock >= 0, quantity > 0)                          │
//! │  ├── UNIQUE constraints                                                │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use stockline_core::validation::{validate_sku, validate_quantity};
//!
//! validate_sku("WIDGET-01").unwrap();
//! validate_quantity(5).unwrap();
//! ```

use crate::error::ValidationError;
use crate::money::BPS_DENOMINATOR;
use crate::types::{DiscountType, NewInvoice, NewInvoiceLine, NewProduct};
use crate::{MAX_INVOICE_LINES, MAX_LINE_QUANTITY};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a SKU.
///
/// ## Rules
/// - Must not be empty
/// - At most 50 characters
/// - Letters, digits, hyphens and underscores only
///
/// ## Example
/// ```rust
/// use stockline_core::validation::validate_sku;
///
/// assert!(validate_sku("WIDGET-01").is_ok());
/// assert!(validate_sku("").is_err());
/// assert!(validate_sku("A".repeat(100).as_str()).is_err());
/// ```
pub fn validate_sku(sku: &str) -> ValidationResult<()> {
    let sku = sku.trim();

    if sku.is_empty() {
        return Err(ValidationError::Required {
            field: "sku".to_string(),
        });
    }

    if sku.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "sku".to_string(),
            max: 50,
        });
    }

    if !sku
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "sku".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a product name (1 to 200 characters).
pub fn validate_product_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if name.len() > 200 {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: 200,
        });
    }

    Ok(())
}

/// Validates that a free-text field is present and at most `max` characters.
///
/// Used for the return reason of a failed delivery and the id fields every
/// command carries.
pub fn validate_required(field: &str, value: Option<&str>, max: usize) -> ValidationResult<String> {
    let value = value.map(str::trim).unwrap_or_default();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(value.to_string())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line or movement quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed [`MAX_LINE_QUANTITY`]
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a non-negative amount in cents (prices, costs, shipping).
///
/// ## Example
/// ```rust
/// use stockline_core::validation::validate_price_cents;
///
/// assert!(validate_price_cents("price", 1099).is_ok());
/// assert!(validate_price_cents("price", 0).is_ok());
/// assert!(validate_price_cents("price", -100).is_err());
/// ```
pub fn validate_price_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

/// Validates a payment amount: positive and no more than what is owed.
pub fn validate_payment_amount(cents: i64, remaining_cents: i64) -> ValidationResult<()> {
    if cents <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "payment amount".to_string(),
        });
    }

    if cents > remaining_cents {
        return Err(ValidationError::OutOfRange {
            field: "payment amount".to_string(),
            min: 1,
            max: remaining_cents.max(0),
        });
    }

    Ok(())
}

/// Validates a tax rate in basis points (0% to 100%).
pub fn validate_tax_rate_bps(bps: i64) -> ValidationResult<()> {
    if !(0..=BPS_DENOMINATOR).contains(&bps) {
        return Err(ValidationError::OutOfRange {
            field: "tax_rate".to_string(),
            min: 0,
            max: BPS_DENOMINATOR,
        });
    }

    Ok(())
}

/// Validates a configured discount.
///
/// `AMOUNT` discounts are non-negative cents; `PERCENTAGE` discounts are
/// basis points between 0 and 10000.
pub fn validate_discount(field: &str, value: i64, discount_type: DiscountType) -> ValidationResult<()> {
    match discount_type {
        DiscountType::Amount => validate_price_cents(field, value),
        DiscountType::Percentage if !(0..=BPS_DENOMINATOR).contains(&value) => {
            Err(ValidationError::OutOfRange {
                field: field.to_string(),
                min: 0,
                max: BPS_DENOMINATOR,
            })
        }
        DiscountType::Percentage => Ok(()),
    }
}

// =============================================================================
// Command Validators
// =============================================================================

/// Validates a product registration.
pub fn validate_new_product(product: &NewProduct) -> ValidationResult<()> {
    validate_sku(&product.sku)?;
    validate_product_name(&product.name)?;
    validate_required("unit", Some(&product.unit), 20)?;
    if product.opening_stock < 0 {
        return Err(ValidationError::OutOfRange {
            field: "opening_stock".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }
    validate_price_cents("cost", product.cost_cents)?;
    validate_price_cents("selling_price", product.selling_price_cents)?;
    if let Some(bps) = product.tax_rate_bps {
        validate_tax_rate_bps(bps)?;
    }
    Ok(())
}

/// Validates an invoice request before any stock is touched.
pub fn validate_new_invoice(invoice: &NewInvoice) -> ValidationResult<()> {
    validate_required("customer_id", Some(&invoice.customer_id), 64)?;
    validate_discount("discount", invoice.discount, invoice.discount_type)?;
    validate_price_cents("shipping_cost", invoice.shipping_cost_cents)?;
    validate_invoice_lines(&invoice.lines)
}

/// Validates a full replacement set of invoice lines.
pub fn validate_invoice_lines(lines: &[NewInvoiceLine]) -> ValidationResult<()> {
    if lines.is_empty() {
        return Err(ValidationError::Required {
            field: "lines".to_string(),
        });
    }
    if lines.len() > MAX_INVOICE_LINES {
        return Err(ValidationError::OutOfRange {
            field: "lines".to_string(),
            min: 1,
            max: MAX_INVOICE_LINES as i64,
        });
    }

    for line in lines {
        validate_required("product_id", Some(&line.product_id), 64)?;
        validate_quantity(line.quantity)?;
        if let Some(price) = line.price_cents {
            validate_price_cents("price", price)?;
        }
        validate_discount("line discount", line.discount, line.discount_type)?;
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice_with(lines: Vec<NewInvoiceLine>) -> NewInvoice {
        NewInvoice {
            customer_id: "cust-1".to_string(),
            order_id: None,
            discount: 0,
            discount_type: DiscountType::Amount,
            shipping_cost_cents: 0,
            requires_delivery_note: false,
            lines,
        }
    }

    fn line(qty: i64) -> NewInvoiceLine {
        NewInvoiceLine {
            product_id: "p-1".to_string(),
            quantity: qty,
            price_cents: None,
            discount: 0,
            discount_type: DiscountType::Amount,
        }
    }

    #[test]
    fn test_validate_sku() {
        assert!(validate_sku("WIDGET-01").is_ok());
        assert!(validate_sku("product_1").is_ok());

        assert!(validate_sku("").is_err());
        assert!(validate_sku("   ").is_err());
        assert!(validate_sku("has space").is_err());
        assert!(validate_sku(&"A".repeat(100)).is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_LINE_QUANTITY).is_ok());

        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(MAX_LINE_QUANTITY + 1).is_err());
    }

    #[test]
    fn test_validate_required() {
        assert_eq!(
            validate_required("return_reason", Some("  damaged  "), 200).unwrap(),
            "damaged"
        );
        assert!(validate_required("return_reason", None, 200).is_err());
        assert!(validate_required("return_reason", Some("   "), 200).is_err());
        assert!(validate_required("return_reason", Some("abc"), 2).is_err());
    }

    #[test]
    fn test_validate_payment_amount() {
        assert!(validate_payment_amount(500, 1000).is_ok());
        assert!(validate_payment_amount(1000, 1000).is_ok());
        assert!(validate_payment_amount(0, 1000).is_err());
        assert!(validate_payment_amount(1001, 1000).is_err());
    }

    #[test]
    fn test_validate_discount() {
        assert!(validate_discount("d", 500, DiscountType::Amount).is_ok());
        assert!(validate_discount("d", -1, DiscountType::Amount).is_err());
        assert!(validate_discount("d", 10_000, DiscountType::Percentage).is_ok());
        assert!(validate_discount("d", 10_001, DiscountType::Percentage).is_err());
    }

    #[test]
    fn test_validate_tax_rate_bps() {
        assert!(validate_tax_rate_bps(0).is_ok());
        assert!(validate_tax_rate_bps(825).is_ok());
        assert!(validate_tax_rate_bps(10_001).is_err());
        assert!(validate_tax_rate_bps(-1).is_err());
    }

    #[test]
    fn test_validate_new_invoice() {
        assert!(validate_new_invoice(&invoice_with(vec![line(3)])).is_ok());
        assert!(matches!(
            validate_new_invoice(&invoice_with(vec![])),
            Err(ValidationError::Required { .. })
        ));
        assert!(validate_new_invoice(&invoice_with(vec![line(0)])).is_err());
    }

    #[test]
    fn test_validate_new_product() {
        let mut product = NewProduct {
            sku: "A-1".to_string(),
            name: "Widget".to_string(),
            unit: "pcs".to_string(),
            opening_stock: 100,
            cost_cents: 100,
            selling_price_cents: 120,
            tax_rate_bps: Some(1100),
        };
        assert!(validate_new_product(&product).is_ok());

        product.opening_stock = -1;
        assert!(validate_new_product(&product).is_err());
    }
}
