//! Fixtures shared by the service tests.

use crate::config::{EngineConfig, ReversalStrategy};
use crate::pool::{Database, DbConfig};
use crate::service::Engine;
use stockline_core::{DiscountType, Invoice, NewInvoice, NewInvoiceLine, NewProduct, Product};

pub(crate) const ACTOR: &str = "tester";

pub(crate) async fn engine() -> Engine {
    engine_with(ReversalStrategy::Compensating).await
}

pub(crate) async fn engine_with(strategy: ReversalStrategy) -> Engine {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    Engine::new(db, &EngineConfig::default()).with_strategy(strategy)
}

pub(crate) async fn product(engine: &Engine, sku: &str, stock: i64, cost: i64, price: i64) -> Product {
    engine
        .db()
        .products()
        .create(&NewProduct {
            sku: sku.to_string(),
            name: format!("Product {}", sku),
            unit: "pcs".to_string(),
            opening_stock: stock,
            cost_cents: cost,
            selling_price_cents: price,
            tax_rate_bps: None,
        })
        .await
        .unwrap()
}

pub(crate) fn line(product: &Product, quantity: i64) -> NewInvoiceLine {
    NewInvoiceLine {
        product_id: product.id.clone(),
        quantity,
        price_cents: None,
        discount: 0,
        discount_type: DiscountType::Amount,
    }
}

pub(crate) async fn invoice(engine: &Engine, lines: Vec<NewInvoiceLine>) -> Invoice {
    engine
        .invoices()
        .create(
            &NewInvoice {
                customer_id: "cust-1".to_string(),
                order_id: None,
                discount: 0,
                discount_type: DiscountType::Amount,
                shipping_cost_cents: 0,
                requires_delivery_note: false,
                lines,
            },
            ACTOR,
        )
        .await
        .unwrap()
}

pub(crate) async fn stock(engine: &Engine, product_id: &str) -> i64 {
    engine
        .db()
        .products()
        .get_by_id(product_id)
        .await
        .unwrap()
        .unwrap()
        .current_stock
}

pub(crate) async fn reload(engine: &Engine, invoice_id: &str) -> Invoice {
    engine.db().invoices().get_by_id(invoice_id).await.unwrap().unwrap()
}
