//! # Seed Data Generator
//!
//! Populates a development database with products and walks one invoice
//! through the full cycle: sell, ship, return part, swap, settle.
//!
//! ## Usage
//! ```bash
//! # Seed ./stockline_dev.db with the default catalog
//! cargo run -p stockline-db --bin seed
//!
//! # Specify database path
//! cargo run -p stockline-db --bin seed -- --db ./data/stockline.db
//!
//! # Use the delete-and-restore reversal strategy
//! cargo run -p stockline-db --bin seed -- --strategy delete_and_restore
//! ```
//!
//! Configuration comes from `stockline.toml` and `STOCKLINE_*` variables;
//! the flags above override it.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::info;
use tracing_subscriber::EnvFilter;

use stockline_core::credit_note::ReturnItem;
use stockline_core::swap::{SwapGroup, SwapItem};
use stockline_core::{DeliveryStatus, DiscountType, NewInvoice, NewInvoiceLine, NewProduct, PaymentMethod};
use stockline_db::{Engine, EngineConfig, ReversalStrategy};

/// (sku, name, unit, opening stock, cost, selling price, tax bps)
const CATALOG: &[(&str, &str, &str, i64, i64, i64, Option<i64>)] = &[
    ("CEM-50", "Cement 50kg", "bag", 400, 5_200, 6_500, Some(1_100)),
    ("RBR-10", "Rebar 10mm", "pcs", 1_200, 4_100, 5_000, Some(1_100)),
    ("RBR-12", "Rebar 12mm", "pcs", 900, 5_900, 7_200, Some(1_100)),
    ("SND-M3", "River Sand", "m3", 80, 18_000, 23_500, None),
    ("PNT-WH", "Wall Paint White 5L", "can", 150, 9_500, 12_900, Some(1_100)),
    ("PNT-GR", "Wall Paint Grey 5L", "can", 120, 9_500, 12_900, Some(1_100)),
];

const ACTOR: &str = "seed";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut db_path = PathBuf::from("./stockline_dev.db");
    let mut strategy: Option<ReversalStrategy> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                config_path = Some(PathBuf::from(&args[i + 1]));
                i += 1;
            }
            "--db" | "-d" if i + 1 < args.len() => {
                db_path = PathBuf::from(&args[i + 1]);
                i += 1;
            }
            "--strategy" | "-s" if i + 1 < args.len() => {
                strategy = Some(ReversalStrategy::from_str(&args[i + 1])?);
                i += 1;
            }
            "--help" | "-h" => {
                println!("stockline Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("      --config <PATH>     Config file (default: ./stockline.toml)");
                println!("  -d, --db <PATH>         Database file path (default: ./stockline_dev.db)");
                println!("  -s, --strategy <NAME>   compensating | delete_and_restore");
                println!("  -h, --help              Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let mut config = EngineConfig::load_or_default(config_path);
    config.database.path = db_path;
    if let Some(strategy) = strategy {
        config.ledger.reversal_strategy = strategy;
    }

    let engine = Engine::open(&config).await?;
    info!(db = %config.database.path.display(), strategy = ?engine.strategy(), "Connected");

    if !engine.db().products().list(1).await?.is_empty() {
        println!("⚠ Database already has products, skipping seed.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let mut products = Vec::with_capacity(CATALOG.len());
    for (sku, name, unit, stock, cost, price, tax) in CATALOG {
        let product = engine
            .db()
            .products()
            .create(&NewProduct {
                sku: sku.to_string(),
                name: name.to_string(),
                unit: unit.to_string(),
                opening_stock: *stock,
                cost_cents: *cost,
                selling_price_cents: *price,
                tax_rate_bps: *tax,
            })
            .await?;
        products.push(product);
    }
    println!("✓ Created {} products", products.len());

    let line = |index: usize, quantity: i64| NewInvoiceLine {
        product_id: products[index].id.clone(),
        quantity,
        price_cents: None,
        discount: 0,
        discount_type: DiscountType::Amount,
    };

    let invoice = engine
        .invoices()
        .create(
            &NewInvoice {
                customer_id: "cust-demo".to_string(),
                order_id: Some("order-demo-1".to_string()),
                discount: 500,
                discount_type: DiscountType::Percentage,
                shipping_cost_cents: 15_000,
                requires_delivery_note: false,
                lines: vec![line(0, 40), line(1, 60), line(4, 6)],
            },
            ACTOR,
        )
        .await?;
    println!("✓ Invoice {} total {}", invoice.code, invoice.total_cents);

    let delivery = engine.deliveries().create(&invoice.id, ACTOR).await?;
    engine
        .deliveries()
        .transition(&delivery.id, DeliveryStatus::Delivered, None, ACTOR)
        .await?;
    println!("✓ Delivery {} delivered", delivery.code);

    let cement_line = engine
        .db()
        .invoices()
        .lines(&invoice.id)
        .await?
        .into_iter()
        .find(|l| l.product_id == products[0].id)
        .ok_or("cement line missing")?;
    let note = engine
        .credit_notes()
        .create(
            &invoice.id,
            &[ReturnItem {
                invoice_line_id: cement_line.id.clone(),
                product_id: products[0].id.clone(),
                quantity: 5,
                unit_price_cents: None,
                discount_cents: 0,
                tax_rate_bps: None,
            }],
            Some("torn bags"),
            ACTOR,
        )
        .await?;
    println!("✓ Credit note {} total {}", note.code, note.total_cents);

    let swap = engine
        .swaps()
        .create(
            &invoice.id,
            &[SwapGroup {
                old_items: vec![SwapItem {
                    product_id: products[4].id.clone(),
                    quantity: 2,
                }],
                replacement_items: vec![SwapItem {
                    product_id: products[5].id.clone(),
                    quantity: 2,
                }],
            }],
            Some("colour change"),
            ACTOR,
        )
        .await?;
    println!("✓ Swap {} difference {}", swap.code, swap.difference_cents);

    let owed = engine
        .db()
        .invoices()
        .get_by_id(&invoice.id)
        .await?
        .ok_or("invoice missing")?;
    engine
        .payments()
        .apply(&invoice.id, owed.remaining_cents, PaymentMethod::BankTransfer, Some("TRX-SEED"), ACTOR)
        .await?;

    let settled = engine
        .db()
        .invoices()
        .get_by_id(&invoice.id)
        .await?
        .ok_or("invoice missing")?;
    println!(
        "✓ Invoice {} is {} / {}",
        settled.code,
        settled.status.as_str(),
        if settled.remaining_cents == 0 { "settled" } else { "open" }
    );

    println!();
    println!("Checking stock conservation...");
    for product in &products {
        let report = engine.ledger().check_conservation(&product.id).await?;
        println!(
            "  {:<8} opening {:>5}  current {:>5}  {}",
            product.sku,
            report.opening_stock,
            report.current_stock,
            if report.holds() { "✓" } else { "✗" }
        );
    }

    println!();
    println!("✓ Seed complete!");
    Ok(())
}

/// Initializes the tracing subscriber.
///
/// `RUST_LOG` overrides the default filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stockline_db=debug,stockline_core=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
