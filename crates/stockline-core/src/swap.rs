//! # Swap Valuation and Planning
//!
//! A swap exchanges invoiced goods for other goods. The caller hands in
//! groups; each group is one exchange of a set of old items for a set of
//! replacement items.
//!
//! ## Group Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  old value          = cost × quantity                                   │
//! │  replacement value  = selling_price × quantity + tax                    │
//! │                                                                         │
//! │  Σ replacement value ≥ Σ old value   per group, or the whole swap fails │
//! │                                                                         │
//! │  A ×2 @ cost 100      for  B ×2 @ 120   →  240 ≥ 200  ✓ difference 40   │
//! │  A ×2 @ cost 200      for  B ×1 @ 150   →  150 < 400  ✗ rejected        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Flat Projection
//! Groups are stored as-is. The flat `(old, replacement)` detail rows are a
//! derived view: pair `(i, j)` carries the old quantity only when `j == 0`
//! and the replacement quantity only when `i == 0`, so summing any column
//! gives back the group totals without double counting.
//!
//! ```text
//! old [A×2, C×1]  ×  replacement [B×3, D×1]
//!
//!   (A,B) old 2 rep 3     (A,D) old 0 rep 1
//!   (C,B) old 1 rep 0     (C,D) old 0 rep 0
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::delivery::check_shipments_settled;
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{Delivery, Invoice, InvoiceLineItem, InvoiceStatus, Product};
use crate::validation::validate_quantity;

// =============================================================================
// Input
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SwapItem {
    pub product_id: String,
    pub quantity: i64,
}

/// One exchange: the old items go back into stock, the replacements go out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SwapGroup {
    pub old_items: Vec<SwapItem>,
    pub replacement_items: Vec<SwapItem>,
}

// =============================================================================
// Valuation
// =============================================================================

/// Value of goods taken back: cost × quantity.
pub fn old_value(product: &Product, quantity: i64) -> Money {
    product.cost().multiply_quantity(quantity)
}

/// Value of goods handed out: selling price × quantity, tax included.
pub fn replacement_value(product: &Product, quantity: i64) -> Money {
    let net = product.selling_price().multiply_quantity(quantity);
    net + net.calculate_tax(product.tax_rate())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupValuation {
    pub old_value: Money,
    pub replacement_value: Money,
}

/// Values of every group plus the swap totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapValuation {
    pub groups: Vec<GroupValuation>,
    /// Σ old value.
    pub base_total: Money,
    pub replacement_total: Money,
    /// `replacement_total − base_total`, never negative once validated.
    pub difference: Money,
}

fn lookup<'a>(products: &'a HashMap<String, Product>, id: &str) -> CoreResult<&'a Product> {
    products
        .get(id)
        .ok_or_else(|| CoreError::not_found("Product", id))
}

/// Validates every group and values the swap.
///
/// Nothing is applied when any group fails; the first offending group is
/// reported with its computed values.
pub fn validate_groups(groups: &[SwapGroup], products: &HashMap<String, Product>) -> CoreResult<SwapValuation> {
    if groups.is_empty() {
        return Err(ValidationError::Required {
            field: "swap groups".to_string(),
        }
        .into());
    }

    let mut valued = Vec::with_capacity(groups.len());
    for (index, group) in groups.iter().enumerate() {
        if group.old_items.is_empty() {
            return Err(ValidationError::Required {
                field: format!("group {} old items", index),
            }
            .into());
        }
        if group.replacement_items.is_empty() {
            return Err(ValidationError::Required {
                field: format!("group {} replacement items", index),
            }
            .into());
        }

        let mut old = Money::zero();
        for item in &group.old_items {
            validate_quantity(item.quantity)?;
            old += old_value(lookup(products, &item.product_id)?, item.quantity);
        }

        let mut replacement = Money::zero();
        for item in &group.replacement_items {
            validate_quantity(item.quantity)?;
            replacement += replacement_value(lookup(products, &item.product_id)?, item.quantity);
        }

        if replacement < old {
            return Err(CoreError::SwapGroupRejected {
                group: index,
                old_value: old.cents(),
                replacement_value: replacement.cents(),
            });
        }

        valued.push(GroupValuation {
            old_value: old,
            replacement_value: replacement,
        });
    }

    let base_total: Money = valued.iter().map(|g| g.old_value).sum();
    let replacement_total: Money = valued.iter().map(|g| g.replacement_value).sum();

    Ok(SwapValuation {
        groups: valued,
        base_total,
        replacement_total,
        difference: replacement_total - base_total,
    })
}

/// Swaps are only taken against live invoices with no regular shipment on
/// the road or come back.
pub fn check_swappable(invoice: &Invoice, deliveries: &[Delivery]) -> CoreResult<()> {
    if matches!(
        invoice.status,
        InvoiceStatus::Draft | InvoiceStatus::Cancelled | InvoiceStatus::Returned
    ) {
        return Err(CoreError::invalid_state(
            "Invoice",
            &invoice.id,
            invoice.status.as_str(),
            "swap items",
        ));
    }
    check_shipments_settled(&invoice.id, deliveries, "swap items")
}

// =============================================================================
// Flattening
// =============================================================================

/// A derived `(old, replacement)` detail row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatDetail {
    pub old_product_id: String,
    pub replacement_product_id: String,
    pub old_item_cogs: Money,
    pub replacement_item_cogs: Money,
    pub old_item_quantity: i64,
    pub replacement_item_quantity: i64,
}

/// Builds the flat projection of `groups`. Cogs are unit costs.
pub fn flatten(groups: &[SwapGroup], products: &HashMap<String, Product>) -> CoreResult<Vec<FlatDetail>> {
    let mut rows = Vec::new();
    for group in groups {
        for (i, old) in group.old_items.iter().enumerate() {
            let old_product = lookup(products, &old.product_id)?;
            for (j, rep) in group.replacement_items.iter().enumerate() {
                let rep_product = lookup(products, &rep.product_id)?;
                rows.push(FlatDetail {
                    old_product_id: old.product_id.clone(),
                    replacement_product_id: rep.product_id.clone(),
                    old_item_cogs: old_product.cost(),
                    replacement_item_cogs: rep_product.cost(),
                    old_item_quantity: if j == 0 { old.quantity } else { 0 },
                    replacement_item_quantity: if i == 0 { rep.quantity } else { 0 },
                });
            }
        }
    }
    Ok(rows)
}

/// Old quantity per product across all groups.
pub fn old_quantities(groups: &[SwapGroup]) -> BTreeMap<String, i64> {
    let mut totals = BTreeMap::new();
    for item in groups.iter().flat_map(|g| &g.old_items) {
        *totals.entry(item.product_id.clone()).or_insert(0) += item.quantity;
    }
    totals
}

/// Replacement quantity per product across all groups.
pub fn replacement_quantities(groups: &[SwapGroup]) -> BTreeMap<String, i64> {
    let mut totals = BTreeMap::new();
    for item in groups.iter().flat_map(|g| &g.replacement_items) {
        *totals.entry(item.product_id.clone()).or_insert(0) += item.quantity;
    }
    totals
}

// =============================================================================
// Line Planning
// =============================================================================

/// Quantity taken off an existing invoice line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineTake {
    pub line_id: String,
    pub product_id: String,
    pub taken: i64,
    /// Zero means the line is deleted.
    pub remaining: i64,
}

/// Quantity added to the invoice for a replacement product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineAddition {
    pub product_id: String,
    /// `None` creates a new line at the product's selling price.
    pub existing_line_id: Option<String>,
    pub quantity: i64,
    pub unit_price: Money,
    pub tax_rate_bps: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinePlan {
    pub takes: Vec<LineTake>,
    pub additions: Vec<LineAddition>,
}

/// Plans the invoice line changes for `groups`.
///
/// Old quantities are taken from the product's lines in order; a line left
/// at zero is deleted. Replacement quantities go onto an existing surviving
/// line of the same product, or onto a new line.
pub fn plan_lines(
    lines: &[InvoiceLineItem],
    groups: &[SwapGroup],
    products: &HashMap<String, Product>,
) -> CoreResult<LinePlan> {
    let mut plan = LinePlan::default();

    for (product_id, requested) in old_quantities(groups) {
        let candidates: Vec<&InvoiceLineItem> = lines
            .iter()
            .filter(|l| l.product_id == product_id && l.quantity > 0)
            .collect();

        let first = candidates.first().ok_or_else(|| ValidationError::ForeignReference {
            field: "old item".to_string(),
            value: product_id.clone(),
            parent: "the invoice's current lines".to_string(),
        })?;

        let available: i64 = candidates.iter().map(|l| l.quantity).sum();
        if requested > available {
            return Err(ValidationError::ExceedsAvailable {
                field: "swap quantity".to_string(),
                line_id: first.id.clone(),
                available,
                requested,
            }
            .into());
        }

        let mut left = requested;
        for line in candidates {
            if left == 0 {
                break;
            }
            let taken = left.min(line.quantity);
            left -= taken;
            plan.takes.push(LineTake {
                line_id: line.id.clone(),
                product_id: product_id.clone(),
                taken,
                remaining: line.quantity - taken,
            });
        }
    }

    let deleted: HashSet<&str> = plan
        .takes
        .iter()
        .filter(|t| t.remaining == 0)
        .map(|t| t.line_id.as_str())
        .collect();

    for (product_id, quantity) in replacement_quantities(groups) {
        let existing = lines
            .iter()
            .find(|l| l.product_id == product_id && !deleted.contains(l.id.as_str()));

        let addition = match existing {
            Some(line) => LineAddition {
                product_id,
                existing_line_id: Some(line.id.clone()),
                quantity,
                unit_price: line.final_price(),
                tax_rate_bps: line.tax_rate_bps,
            },
            None => {
                let product = lookup(products, &product_id)?;
                LineAddition {
                    existing_line_id: None,
                    quantity,
                    unit_price: product.selling_price(),
                    tax_rate_bps: product.tax_rate().bps(),
                    product_id,
                }
            }
        };
        plan.additions.push(addition);
    }

    Ok(plan)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DiscountType;
    use chrono::Utc;

    fn product(id: &str, cost: i64, price: i64, tax: Option<i64>) -> Product {
        Product {
            id: id.to_string(),
            sku: id.to_uppercase(),
            name: id.to_string(),
            unit: "pcs".to_string(),
            current_stock: 100,
            cost_cents: cost,
            selling_price_cents: price,
            tax_rate_bps: tax,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn catalog(items: Vec<Product>) -> HashMap<String, Product> {
        items.into_iter().map(|p| (p.id.clone(), p)).collect()
    }

    fn item(product_id: &str, quantity: i64) -> SwapItem {
        SwapItem {
            product_id: product_id.to_string(),
            quantity,
        }
    }

    fn group(old: Vec<SwapItem>, rep: Vec<SwapItem>) -> SwapGroup {
        SwapGroup {
            old_items: old,
            replacement_items: rep,
        }
    }

    fn line(id: &str, product_id: &str, qty: i64, final_price: i64) -> InvoiceLineItem {
        InvoiceLineItem {
            id: id.to_string(),
            invoice_id: "inv".to_string(),
            product_id: product_id.to_string(),
            quantity: qty,
            price_cents: final_price,
            discount: 0,
            discount_type: DiscountType::Amount,
            final_price_cents: final_price,
            total_price_cents: final_price * qty,
            tax_rate_bps: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_valid_group_difference() {
        let products = catalog(vec![product("a", 100, 150, None), product("b", 90, 120, None)]);
        let valuation = validate_groups(&[group(vec![item("a", 2)], vec![item("b", 2)])], &products).unwrap();
        assert_eq!(valuation.base_total.cents(), 200);
        assert_eq!(valuation.replacement_total.cents(), 240);
        assert_eq!(valuation.difference.cents(), 40);
    }

    #[test]
    fn test_underpriced_group_rejected() {
        let products = catalog(vec![product("a", 200, 250, None), product("b", 90, 150, None)]);
        let err = validate_groups(&[group(vec![item("a", 2)], vec![item("b", 1)])], &products).unwrap_err();
        assert_eq!(
            err,
            CoreError::SwapGroupRejected {
                group: 0,
                old_value: 400,
                replacement_value: 150
            }
        );
    }

    #[test]
    fn test_replacement_value_includes_tax() {
        let products = catalog(vec![product("a", 110, 150, None), product("b", 90, 100, Some(1000))]);
        // 100 net + 10 tax = 110 ≥ 110
        assert!(validate_groups(&[group(vec![item("a", 1)], vec![item("b", 1)])], &products).is_ok());
    }

    #[test]
    fn test_one_bad_group_rejects_all() {
        let products = catalog(vec![product("a", 100, 150, None), product("b", 90, 120, None)]);
        let groups = [
            group(vec![item("a", 1)], vec![item("b", 1)]),
            group(vec![item("a", 5)], vec![item("b", 1)]),
        ];
        assert!(matches!(
            validate_groups(&groups, &products),
            Err(CoreError::SwapGroupRejected { group: 1, .. })
        ));
    }

    #[test]
    fn test_structural_rejections() {
        let products = catalog(vec![product("a", 100, 150, None)]);
        assert!(validate_groups(&[], &products).is_err());
        assert!(validate_groups(&[group(vec![], vec![item("a", 1)])], &products).is_err());
        assert!(validate_groups(&[group(vec![item("a", 0)], vec![item("a", 1)])], &products).is_err());
        assert!(matches!(
            validate_groups(&[group(vec![item("zz", 1)], vec![item("a", 1)])], &products),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_flatten_preserves_totals() {
        let products = catalog(vec![
            product("a", 10, 20, None),
            product("b", 10, 20, None),
            product("c", 10, 20, None),
            product("d", 10, 20, None),
        ]);
        let groups = [group(vec![item("a", 2), item("c", 1)], vec![item("b", 3), item("d", 1)])];
        let rows = flatten(&groups, &products).unwrap();
        assert_eq!(rows.len(), 4);

        let old: i64 = rows.iter().map(|r| r.old_item_quantity).sum();
        let rep: i64 = rows.iter().map(|r| r.replacement_item_quantity).sum();
        assert_eq!(old, 3);
        assert_eq!(rep, 4);

        // M = 1: only the first pair carries the replacement quantity.
        let rows = flatten(&[group(vec![item("a", 2), item("c", 1)], vec![item("b", 3)])], &products).unwrap();
        let reps: Vec<i64> = rows.iter().map(|r| r.replacement_item_quantity).collect();
        assert_eq!(reps, vec![3, 0]);
    }

    #[test]
    fn test_plan_lines_shrink_delete_and_add() {
        let products = catalog(vec![product("a", 100, 150, None), product("b", 90, 120, None)]);
        let lines = [line("la", "a", 5, 1000)];

        let plan = plan_lines(&lines, &[group(vec![item("a", 2)], vec![item("b", 2)])], &products).unwrap();
        assert_eq!(plan.takes[0].remaining, 3);
        assert_eq!(plan.additions[0].existing_line_id, None);
        assert_eq!(plan.additions[0].unit_price.cents(), 120);

        let plan = plan_lines(&lines, &[group(vec![item("a", 5)], vec![item("b", 5)])], &products).unwrap();
        assert_eq!(plan.takes[0].remaining, 0);
    }

    #[test]
    fn test_plan_lines_grows_existing_replacement_line() {
        let products = catalog(vec![product("a", 100, 150, None), product("b", 90, 120, None)]);
        let lines = [line("la", "a", 5, 1000), line("lb", "b", 1, 800)];
        let plan = plan_lines(&lines, &[group(vec![item("a", 1)], vec![item("b", 2)])], &products).unwrap();
        assert_eq!(plan.additions[0].existing_line_id.as_deref(), Some("lb"));
        assert_eq!(plan.additions[0].unit_price.cents(), 800);
    }

    #[test]
    fn test_plan_lines_rejects_missing_or_excess() {
        let products = catalog(vec![product("a", 100, 150, None), product("b", 90, 120, None)]);
        let lines = [line("la", "a", 2, 1000)];
        assert!(plan_lines(&lines, &[group(vec![item("a", 3)], vec![item("b", 3)])], &products).is_err());
        assert!(plan_lines(&lines, &[group(vec![item("b", 1)], vec![item("a", 1)])], &products).is_err());
    }

    #[test]
    fn test_swappable_statuses() {
        let mut inv = Invoice {
            id: "inv".to_string(),
            code: "INV".to_string(),
            customer_id: "c".to_string(),
            order_id: None,
            status: InvoiceStatus::Delivered,
            payment_status: crate::types::PaymentStatus::Unpaid,
            subtotal_cents: 0,
            discount: 0,
            discount_type: DiscountType::Amount,
            actual_discount_cents: 0,
            tax_cents: 0,
            shipping_cost_cents: 0,
            total_cents: 0,
            paid_cents: 0,
            remaining_cents: 0,
            allow_redelivery: false,
            requires_delivery_note: false,
            delivery_note_number: None,
            created_by: "tester".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(check_swappable(&inv, &[]).is_ok());

        let pending = Delivery {
            id: "d1".to_string(),
            code: "DEL-1".to_string(),
            invoice_id: inv.id.clone(),
            swap_id: None,
            status: crate::types::DeliveryStatus::Pending,
            return_reason: None,
            completed_at: None,
            created_by: "tester".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(matches!(
            check_swappable(&inv, &[pending]),
            Err(CoreError::InvalidState { .. })
        ));

        inv.status = InvoiceStatus::Cancelled;
        assert!(check_swappable(&inv, &[]).is_err());
    }
}
