//! End-to-end consistency checks through the public engine API.

use stockline_core::credit_note::ReturnItem;
use stockline_core::swap::{SwapGroup, SwapItem};
use stockline_core::{
    DeliveryStatus, DiscountType, ErrorKind, Invoice, InvoiceStatus, InvoiceTotals, NewInvoice, NewInvoiceLine,
    NewProduct, PaymentMethod, PaymentStatus, Product, StockMovementType,
};
use stockline_db::{Database, DbConfig, Engine, EngineConfig, ReversalStrategy};

const ACTOR: &str = "clerk-7";

async fn engine(strategy: ReversalStrategy) -> Engine {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    Engine::new(db, &EngineConfig::default()).with_strategy(strategy)
}

async fn product(engine: &Engine, sku: &str, stock: i64, cost: i64, price: i64) -> Product {
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

fn line(product: &Product, quantity: i64) -> NewInvoiceLine {
    NewInvoiceLine {
        product_id: product.id.clone(),
        quantity,
        price_cents: None,
        discount: 0,
        discount_type: DiscountType::Amount,
    }
}

async fn invoice(engine: &Engine, lines: Vec<NewInvoiceLine>, shipping: i64, discount: i64) -> Invoice {
    engine
        .invoices()
        .create(
            &NewInvoice {
                customer_id: "cust-1".to_string(),
                order_id: None,
                discount,
                discount_type: DiscountType::Amount,
                shipping_cost_cents: shipping,
                requires_delivery_note: false,
                lines,
            },
            ACTOR,
        )
        .await
        .unwrap()
}

async fn reload(engine: &Engine, id: &str) -> Invoice {
    engine.db().invoices().get_by_id(id).await.unwrap().unwrap()
}

async fn stock(engine: &Engine, id: &str) -> i64 {
    engine.db().products().get_by_id(id).await.unwrap().unwrap().current_stock
}

async fn assert_conserved(engine: &Engine, products: &[&Product]) {
    for p in products {
        let report = engine.ledger().check_conservation(&p.id).await.unwrap();
        assert!(report.holds(), "ledger out of balance for {}: {:?}", p.sku, report);
    }
}

async fn assert_identity(engine: &Engine, id: &str) {
    let current = reload(engine, id).await;
    assert!(
        InvoiceTotals::stored(&current).holds_identity(),
        "totals identity broken: {:?}",
        current
    );
}

async fn invoiced(engine: &Engine, invoice_id: &str, product_id: &str) -> i64 {
    engine
        .db()
        .invoices()
        .lines(invoice_id)
        .await
        .unwrap()
        .iter()
        .filter(|l| l.product_id == product_id)
        .map(|l| l.quantity)
        .sum()
}

/// Stock may only sit above `opening - invoiced` by what a failed shipment
/// brought back and nothing has shipped again.
async fn assert_bounded(engine: &Engine, p: &Product, opening: i64, invoice_id: &str, brought_back: i64) {
    let on_hand = stock(engine, &p.id).await;
    let ceiling = opening - invoiced(engine, invoice_id, &p.id).await + brought_back;
    assert!(on_hand <= ceiling, "{} holds {} above ceiling {}", p.sku, on_hand, ceiling);
}

fn return_item(invoice_line_id: String, p: &Product, quantity: i64) -> ReturnItem {
    ReturnItem {
        invoice_line_id,
        product_id: p.id.clone(),
        quantity,
        unit_price_cents: None,
        discount_cents: 0,
        tax_rate_bps: None,
    }
}

fn swap_group(old: &Product, old_qty: i64, replacement: &Product, rep_qty: i64) -> SwapGroup {
    SwapGroup {
        old_items: vec![SwapItem {
            product_id: old.id.clone(),
            quantity: old_qty,
        }],
        replacement_items: vec![SwapItem {
            product_id: replacement.id.clone(),
            quantity: rep_qty,
        }],
    }
}

#[tokio::test]
async fn sell_ship_return_scenario() {
    let engine = engine(ReversalStrategy::Compensating).await;
    let p = product(&engine, "P", 100, 600, 1000).await;

    let inv = invoice(&engine, vec![line(&p, 10)], 0, 0).await;
    assert_eq!(stock(&engine, &p.id).await, 90);
    assert_eq!(inv.subtotal_cents, 10_000);

    let delivery = engine.deliveries().create(&inv.id, ACTOR).await.unwrap();
    engine
        .deliveries()
        .transition(&delivery.id, DeliveryStatus::Delivered, None, ACTOR)
        .await
        .unwrap();
    assert_eq!(reload(&engine, &inv.id).await.status, InvoiceStatus::Delivered);

    let line_id = engine.db().invoices().lines(&inv.id).await.unwrap()[0].id.clone();
    engine
        .credit_notes()
        .create(
            &inv.id,
            &[ReturnItem {
                invoice_line_id: line_id,
                product_id: p.id.clone(),
                quantity: 4,
                unit_price_cents: None,
                discount_cents: 0,
                tax_rate_bps: None,
            }],
            Some("damaged"),
            ACTOR,
        )
        .await
        .unwrap();

    let after = reload(&engine, &inv.id).await;
    assert_eq!(stock(&engine, &p.id).await, 94);
    assert_eq!(after.subtotal_cents, 6000);
    assert_eq!(after.total_cents, 6000);
    assert_identity(&engine, &inv.id).await;
    assert_conserved(&engine, &[&p]).await;
}

#[tokio::test]
async fn totals_identity_survives_every_line_mutation() {
    let engine = engine(ReversalStrategy::Compensating).await;
    let a = product(&engine, "A", 50, 100, 150).await;
    let b = product(&engine, "B", 50, 90, 120).await;

    let inv = invoice(&engine, vec![line(&a, 4), line(&b, 1)], 2_500, 100).await;
    assert_identity(&engine, &inv.id).await;

    engine
        .invoices()
        .update_lines(&inv.id, &[line(&a, 3), line(&b, 2)], ACTOR)
        .await
        .unwrap();
    assert_identity(&engine, &inv.id).await;

    engine
        .payments()
        .apply(&inv.id, 1_000, PaymentMethod::Cash, None, ACTOR)
        .await
        .unwrap();
    assert_identity(&engine, &inv.id).await;

    let swap = engine
        .swaps()
        .create(&inv.id, &[swap_group(&a, 1, &b, 1)], None, ACTOR)
        .await
        .unwrap();
    assert_identity(&engine, &inv.id).await;

    engine.swaps().delete(&swap.id, ACTOR).await.unwrap();
    assert_identity(&engine, &inv.id).await;
    assert_conserved(&engine, &[&a, &b]).await;
}

#[tokio::test]
async fn swap_round_trip_restores_everything() {
    for strategy in [ReversalStrategy::Compensating, ReversalStrategy::DeleteAndRestore] {
        let engine = engine(strategy).await;
        let a = product(&engine, "A", 20, 100, 150).await;
        let b = product(&engine, "B", 20, 90, 120).await;
        let c = product(&engine, "C", 20, 40, 70).await;
        let inv = invoice(&engine, vec![line(&a, 5), line(&c, 2)], 1_000, 0).await;

        let lines_before = engine.db().invoices().lines(&inv.id).await.unwrap();
        let invoice_before = reload(&engine, &inv.id).await;
        let stock_before = [stock(&engine, &a.id).await, stock(&engine, &b.id).await, stock(&engine, &c.id).await];

        let swap = engine
            .swaps()
            .create(
                &inv.id,
                &[swap_group(&a, 5, &b, 5), swap_group(&c, 1, &a, 1)],
                Some("exchange"),
                ACTOR,
            )
            .await
            .unwrap();
        assert!(swap.difference_cents >= 0);
        engine.swaps().delete(&swap.id, ACTOR).await.unwrap();

        let invoice_after = reload(&engine, &inv.id).await;
        assert_eq!(engine.db().invoices().lines(&inv.id).await.unwrap(), lines_before, "{:?}", strategy);
        assert_eq!(invoice_after.subtotal_cents, invoice_before.subtotal_cents);
        assert_eq!(invoice_after.total_cents, invoice_before.total_cents);
        assert_eq!(invoice_after.remaining_cents, invoice_before.remaining_cents);
        assert_eq!(
            [stock(&engine, &a.id).await, stock(&engine, &b.id).await, stock(&engine, &c.id).await],
            stock_before
        );
        assert_conserved(&engine, &[&a, &b, &c]).await;
    }
}

#[tokio::test]
async fn swap_value_inequality() {
    let engine = engine(ReversalStrategy::Compensating).await;
    let cheap_a = product(&engine, "A1", 10, 100, 150).await;
    let dear_a = product(&engine, "A2", 10, 200, 300).await;
    let b = product(&engine, "B", 10, 90, 120).await;
    let b150 = product(&engine, "B2", 10, 90, 150).await;

    let ok = invoice(&engine, vec![line(&cheap_a, 2)], 0, 0).await;
    let swap = engine
        .swaps()
        .create(&ok.id, &[swap_group(&cheap_a, 2, &b, 2)], None, ACTOR)
        .await
        .unwrap();
    assert_eq!(swap.difference_cents, 40);

    let rejected = invoice(&engine, vec![line(&dear_a, 2)], 0, 0).await;
    let err = engine
        .swaps()
        .create(&rejected.id, &[swap_group(&dear_a, 2, &b150, 1)], None, ACTOR)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    assert_eq!(stock(&engine, &b150.id).await, 10);
}

#[tokio::test]
async fn failed_delivery_restores_once_and_waits_for_approval() {
    let engine = engine(ReversalStrategy::Compensating).await;
    let p = product(&engine, "P", 30, 600, 1000).await;
    let inv = invoice(&engine, vec![line(&p, 10)], 0, 0).await;

    let first = engine.deliveries().create(&inv.id, ACTOR).await.unwrap();
    engine
        .deliveries()
        .transition(&first.id, DeliveryStatus::Returned, Some("address unknown"), ACTOR)
        .await
        .unwrap();
    assert_eq!(stock(&engine, &p.id).await, 30);
    assert!(engine
        .deliveries()
        .transition(&first.id, DeliveryStatus::Returned, Some("again"), ACTOR)
        .await
        .is_err());
    assert_eq!(stock(&engine, &p.id).await, 30);

    let failed = reload(&engine, &inv.id).await;
    assert!(!failed.allow_redelivery);
    assert_eq!(failed.status, InvoiceStatus::Returned);
    assert!(engine.deliveries().create(&inv.id, ACTOR).await.is_err());

    engine.deliveries().approve_redelivery(&inv.id, ACTOR).await.unwrap();
    assert_eq!(stock(&engine, &p.id).await, 20);
    let movements = engine.db().stock_movements().for_product(&p.id).await.unwrap();
    assert_eq!(
        movements
            .iter()
            .filter(|m| m.movement_type == StockMovementType::SalesOut)
            .count(),
        2
    );

    let second = engine.deliveries().create(&inv.id, ACTOR).await.unwrap();
    engine
        .deliveries()
        .transition(&second.id, DeliveryStatus::Cancelled, Some("truck broke down"), ACTOR)
        .await
        .unwrap();
    assert_eq!(stock(&engine, &p.id).await, 30);
    assert!(!reload(&engine, &inv.id).await.allow_redelivery);
    assert_conserved(&engine, &[&p]).await;
}

#[tokio::test]
async fn full_payment_then_delivery_completes() {
    let engine = engine(ReversalStrategy::Compensating).await;
    let p = product(&engine, "P", 10, 600, 1000).await;
    let inv = invoice(&engine, vec![line(&p, 2)], 500, 0).await;

    engine
        .payments()
        .apply(&inv.id, inv.total_cents, PaymentMethod::Card, None, ACTOR)
        .await
        .unwrap();
    let paid = reload(&engine, &inv.id).await;
    assert_eq!((paid.status, paid.payment_status), (InvoiceStatus::Paid, PaymentStatus::Paid));

    let delivery = engine.deliveries().create(&inv.id, ACTOR).await.unwrap();
    engine
        .deliveries()
        .transition(&delivery.id, DeliveryStatus::Delivered, None, ACTOR)
        .await
        .unwrap();
    assert_eq!(reload(&engine, &inv.id).await.status, InvoiceStatus::Completed);
}

#[tokio::test]
async fn cancel_after_everything_was_undone() {
    let engine = engine(ReversalStrategy::Compensating).await;
    let p = product(&engine, "P", 10, 600, 1000).await;
    let inv = invoice(&engine, vec![line(&p, 3)], 0, 0).await;

    engine.invoices().cancel(&inv.id, ACTOR).await.unwrap();
    assert_eq!(stock(&engine, &p.id).await, 10);
    assert_eq!(reload(&engine, &inv.id).await.status, InvoiceStatus::Cancelled);

    let err = engine.invoices().cancel(&inv.id, ACTOR).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_conserved(&engine, &[&p]).await;
}

#[tokio::test]
async fn missing_entities_are_not_found() {
    let engine = engine(ReversalStrategy::Compensating).await;
    assert_eq!(
        engine.deliveries().create("nope", ACTOR).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(engine.swaps().delete("nope", ACTOR).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(
        engine.credit_notes().delete("nope", ACTOR).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn credit_note_waits_until_failed_goods_ship_again() {
    let engine = engine(ReversalStrategy::Compensating).await;
    let p = product(&engine, "P", 100, 600, 1000).await;
    let inv = invoice(&engine, vec![line(&p, 10)], 0, 0).await;
    let line_id = engine.db().invoices().lines(&inv.id).await.unwrap()[0].id.clone();

    let first = engine.deliveries().create(&inv.id, ACTOR).await.unwrap();
    engine
        .deliveries()
        .transition(&first.id, DeliveryStatus::Returned, Some("nobody home"), ACTOR)
        .await
        .unwrap();
    assert_eq!(stock(&engine, &p.id).await, 100);

    let err = engine
        .credit_notes()
        .create(&inv.id, &[return_item(line_id.clone(), &p, 4)], None, ACTOR)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(stock(&engine, &p.id).await, 100);
    assert_bounded(&engine, &p, 100, &inv.id, 10).await;

    engine.deliveries().approve_redelivery(&inv.id, ACTOR).await.unwrap();
    assert_bounded(&engine, &p, 100, &inv.id, 0).await;
    let second = engine.deliveries().create(&inv.id, ACTOR).await.unwrap();
    engine
        .deliveries()
        .transition(&second.id, DeliveryStatus::Delivered, None, ACTOR)
        .await
        .unwrap();

    engine
        .credit_notes()
        .create(&inv.id, &[return_item(line_id, &p, 4)], None, ACTOR)
        .await
        .unwrap();
    assert_eq!(stock(&engine, &p.id).await, 94);
    assert_bounded(&engine, &p, 100, &inv.id, 0).await;
    assert_identity(&engine, &inv.id).await;
    assert_conserved(&engine, &[&p]).await;
}

#[tokio::test]
async fn deleting_the_redelivery_never_ships_twice() {
    for strategy in [ReversalStrategy::Compensating, ReversalStrategy::DeleteAndRestore] {
        let engine = engine(strategy).await;
        let p = product(&engine, "P", 100, 600, 1000).await;
        let inv = invoice(&engine, vec![line(&p, 10)], 0, 0).await;

        let first = engine.deliveries().create(&inv.id, ACTOR).await.unwrap();
        engine
            .deliveries()
            .transition(&first.id, DeliveryStatus::Returned, Some("refused"), ACTOR)
            .await
            .unwrap();
        engine.deliveries().approve_redelivery(&inv.id, ACTOR).await.unwrap();
        let second = engine.deliveries().create(&inv.id, ACTOR).await.unwrap();
        engine.deliveries().delete(&second.id, ACTOR).await.unwrap();

        assert_eq!(stock(&engine, &p.id).await, 90, "{:?}", strategy);
        assert!(reload(&engine, &inv.id).await.allow_redelivery);
        let err = engine.deliveries().approve_redelivery(&inv.id, ACTOR).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(stock(&engine, &p.id).await, 90);
        assert_bounded(&engine, &p, 100, &inv.id, 0).await;

        let third = engine.deliveries().create(&inv.id, ACTOR).await.unwrap();
        engine
            .deliveries()
            .transition(&third.id, DeliveryStatus::Delivered, None, ACTOR)
            .await
            .unwrap();
        assert_eq!(stock(&engine, &p.id).await, 90);
        assert_bounded(&engine, &p, 100, &inv.id, 0).await;
        assert_conserved(&engine, &[&p]).await;
    }
}

#[tokio::test]
async fn swapped_goods_stay_with_the_customer_when_shipment_fails() {
    let engine = engine(ReversalStrategy::Compensating).await;
    let a = product(&engine, "A", 10, 100, 150).await;
    let b = product(&engine, "B", 10, 90, 120).await;
    let inv = invoice(&engine, vec![line(&a, 3)], 0, 0).await;

    let pending = engine.deliveries().create(&inv.id, ACTOR).await.unwrap();
    let err = engine
        .swaps()
        .create(&inv.id, &[swap_group(&a, 2, &b, 2)], None, ACTOR)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    engine.deliveries().delete(&pending.id, ACTOR).await.unwrap();

    engine
        .swaps()
        .create(&inv.id, &[swap_group(&a, 2, &b, 2)], None, ACTOR)
        .await
        .unwrap();
    let shipment = engine.deliveries().create(&inv.id, ACTOR).await.unwrap();
    engine
        .deliveries()
        .transition(&shipment.id, DeliveryStatus::Returned, Some("damaged in transit"), ACTOR)
        .await
        .unwrap();

    assert_eq!(stock(&engine, &a.id).await, 10);
    assert_eq!(stock(&engine, &b.id).await, 8);
    assert_bounded(&engine, &a, 10, &inv.id, 1).await;
    assert_bounded(&engine, &b, 10, &inv.id, 0).await;
    assert_identity(&engine, &inv.id).await;
    assert_conserved(&engine, &[&a, &b]).await;
}
