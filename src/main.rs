// Order Reconciliation - CLI
//
// Usage: order-reconciliation <command> [args]
// Configuration comes from RECON_CONFIG (JSON file) or RECON_* variables.

use anyhow::{bail, Context, Result};
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use order_reconciliation::{
    load_products_csv, AppConfig, ConversionOutcome, CsvDocumentWriter, IncomingOrder,
    OrderIntake, OrderLifecycleController, OrderStatus, ReviewStatus, SqliteStore,
    UnresolvedFilter, VERSION,
};

type Controller = OrderLifecycleController<SqliteStore>;

const USAGE: &str = "\
Usage: order-reconciliation <command> [args]

Commands:
  init                                         Create the database
  import-catalog <products.csv>                Bulk-load catalog products
  intake <order.json>                          Reconcile a new order or bill
  orders [status]                              List orders
  mismatches                                   List orders awaiting a price decision
  approve-order <order-id>                     Accept mismatches and convert
  reject-order <order-id> --confirm            Permanently delete a mismatched order
  convert <order-id>                           Generate the sales order (retry-safe)
  revalidate <order-id>                        Re-run resolution and pricing
  unresolved [status]                          List product codes awaiting review
  approve-code <entry-id> <product-id> [--persist-mapping]
  reject-code <entry-id>";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("order-reconciliation {}\n\n{}", VERSION, USAGE);
        return Ok(());
    };

    let config = load_config()?;
    let rest = &args[1..];

    match command.as_str() {
        "init" => run_init(&config),
        "import-catalog" => run_import_catalog(&config, arg(rest, 0, "products.csv")?),
        "intake" => run_intake(&open_controller(&config)?, arg(rest, 0, "order.json")?),
        "orders" => run_orders(&open_controller(&config)?, rest.first()),
        "mismatches" => run_mismatches(&open_controller(&config)?),
        "approve-order" => run_approve_order(&open_controller(&config)?, arg(rest, 0, "order-id")?),
        "reject-order" => run_reject_order(
            &open_controller(&config)?,
            arg(rest, 0, "order-id")?,
            has_flag(rest, "--confirm"),
        ),
        "convert" => run_convert(&open_controller(&config)?, arg(rest, 0, "order-id")?),
        "revalidate" => run_revalidate(&open_controller(&config)?, arg(rest, 0, "order-id")?),
        "unresolved" => run_unresolved(&open_controller(&config)?, rest.first()),
        "approve-code" => run_approve_code(
            &open_controller(&config)?,
            arg(rest, 0, "entry-id")?,
            arg(rest, 1, "product-id")?,
            has_flag(rest, "--persist-mapping"),
        ),
        "reject-code" => run_reject_code(&open_controller(&config)?, arg(rest, 0, "entry-id")?),
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("unknown command '{}'\n\n{}", other, USAGE),
    }
}

fn load_config() -> Result<AppConfig> {
    match env::var("RECON_CONFIG") {
        Ok(path) => AppConfig::from_file(&path),
        Err(_) => Ok(AppConfig::from_env()),
    }
}

fn open_controller(config: &AppConfig) -> Result<Controller> {
    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("Failed to open database {:?}", config.database_path))?;
    let dispatcher = Arc::new(CsvDocumentWriter::new(&config.dispatch_dir));

    Ok(OrderLifecycleController::new(store, dispatcher, config.pipeline.clone()).with_actor("cli"))
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.iter()
        .filter(|a| !a.starts_with("--"))
        .nth(index)
        .map(String::as_str)
        .with_context(|| format!("missing argument <{}>\n\n{}", name, USAGE))
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

// ============================================================================
// Catalog
// ============================================================================

fn run_init(config: &AppConfig) -> Result<()> {
    println!("🔧 Setting up database...");
    SqliteStore::open(&config.database_path)
        .with_context(|| format!("Failed to open database {:?}", config.database_path))?;
    println!("✓ Database ready at {:?} (WAL mode)", config.database_path);
    Ok(())
}

fn run_import_catalog(config: &AppConfig, csv_path: &str) -> Result<()> {
    println!("📂 Loading catalog CSV...");
    let products = load_products_csv(Path::new(csv_path))?;
    println!("✓ Loaded {} products from CSV", products.len());

    let store = SqliteStore::open(&config.database_path)?;
    let summary = store.import_products(&products)?;

    println!("✓ Inserted: {}", summary.inserted);
    println!("✓ Skipped (code exists): {}", summary.skipped);
    Ok(())
}

// ============================================================================
// Orders
// ============================================================================

fn run_intake(controller: &Controller, path: &str) -> Result<()> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    let intake: OrderIntake =
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path))?;

    let order = controller.process_intake(intake)?;
    print_order(&order);

    if let Some(verdict) = &order.duplicate_match {
        println!(
            "   ⚠️  duplicate of {} ({}, {:?}): {}",
            verdict.matched_order_id,
            verdict.match_type.as_str(),
            verdict.confidence,
            verdict.explanation
        );
    }
    for mismatch in order.price_mismatch_details.iter().flatten() {
        println!(
            "   ⚠️  line {} '{}': {:?} ({:+.1}%)",
            mismatch.line_index + 1,
            mismatch.line_description,
            mismatch.reason,
            mismatch.difference_percent
        );
    }
    Ok(())
}

fn run_orders(controller: &Controller, status: Option<&String>) -> Result<()> {
    let status = status
        .map(|s| s.parse::<OrderStatus>())
        .transpose()
        .map_err(anyhow::Error::msg)?;

    let orders = controller.list_orders(None, status)?;
    println!("📊 {} orders", orders.len());
    for order in &orders {
        print_order(order);
    }
    Ok(())
}

fn run_mismatches(controller: &Controller) -> Result<()> {
    let orders = controller.list_price_mismatch_orders()?;
    println!("⚖️  {} orders awaiting a price decision", orders.len());
    for order in &orders {
        print_order(order);
        for mismatch in order.price_mismatch_details.iter().flatten() {
            println!(
                "     line {}: {} submitted {:.2} vs catalog {} ({:+.1}%)",
                mismatch.line_index + 1,
                mismatch.line_description,
                mismatch.actual_price,
                mismatch
                    .expected_price
                    .map(|p| format!("{:.2}", p))
                    .unwrap_or_else(|| "unmatched".to_string()),
                mismatch.difference_percent
            );
        }
    }
    Ok(())
}

fn run_approve_order(controller: &Controller, order_id: &str) -> Result<()> {
    let outcome = controller.approve_order(order_id)?;
    println!(
        "✅ Order {} approved ({} mismatches accepted)",
        order_id, outcome.accepted_mismatches
    );

    match outcome.dispatch {
        Ok(conversion) => print_conversion(&conversion),
        Err(e) => {
            eprintln!("❌ Sales order dispatch failed: {}", e);
            eprintln!("   The approval is kept. Retry with: order-reconciliation convert {}", order_id);
        }
    }
    Ok(())
}

fn run_reject_order(controller: &Controller, order_id: &str, confirmed: bool) -> Result<()> {
    controller.reject_order(order_id, confirmed)?;
    println!("🗑️  Order {} rejected and deleted", order_id);
    Ok(())
}

fn run_convert(controller: &Controller, order_id: &str) -> Result<()> {
    let outcome = controller.convert_order(order_id)?;
    print_conversion(&outcome);
    Ok(())
}

fn run_revalidate(controller: &Controller, order_id: &str) -> Result<()> {
    let order = controller.revalidate_order(order_id)?;
    print_order(&order);
    Ok(())
}

fn print_order(order: &IncomingOrder) {
    println!(
        "  {} [{}] {} {} - {} {:.2} {}",
        order.id,
        order.status,
        order.kind.as_str(),
        if order.has_order_number() { order.external_order_number.as_str() } else { "(no number)" },
        order.counterparty_name,
        order.total_amount,
        order.currency
    );
}

fn print_conversion(outcome: &ConversionOutcome) {
    match outcome {
        ConversionOutcome::Converted { document, receipt } => {
            println!(
                "📨 Sales order {} dispatched to {} (total {:.2} {})",
                document.so_number, receipt.location, document.total, document.currency
            );
            for line in document.lines.iter().filter(|l| l.adjusted) {
                println!(
                    "   ↑ {}: {} requested, {} ordered (pack multiple)",
                    line.description, line.requested_quantity, line.quantity
                );
            }
        }
        ConversionOutcome::AlreadyConverted => println!("✓ Already converted, nothing sent"),
    }
}

// ============================================================================
// Code review
// ============================================================================

fn run_unresolved(controller: &Controller, status: Option<&String>) -> Result<()> {
    let status = match status {
        Some(s) => Some(s.parse::<ReviewStatus>().map_err(anyhow::Error::msg)?),
        None => Some(ReviewStatus::Pending),
    };
    let filter = UnresolvedFilter {
        status,
        ..Default::default()
    };

    let entries = controller.list_unresolved_codes(&filter)?;
    println!("🔎 {} unresolved codes", entries.len());
    for entry in &entries {
        println!(
            "  {} [{}] {} '{}' (order {}) suggestion: {} ({:.2})",
            entry.id,
            entry.status,
            entry.external_code,
            entry.external_description,
            entry.source_document_id,
            entry.suggested_product_id.as_deref().unwrap_or("none"),
            entry.suggestion_confidence
        );
    }
    Ok(())
}

fn run_approve_code(
    controller: &Controller,
    entry_id: &str,
    product_id: &str,
    persist_mapping: bool,
) -> Result<()> {
    let entry = controller.approve_code(entry_id, product_id, persist_mapping)?;
    println!("✅ Code '{}' approved as product {}", entry.external_code, product_id);
    if persist_mapping {
        println!("   Mapping saved for future documents");
    }
    println!(
        "   Re-check the order with: order-reconciliation revalidate {}",
        entry.source_document_id
    );
    Ok(())
}

fn run_reject_code(controller: &Controller, entry_id: &str) -> Result<()> {
    let entry = controller.reject_code(entry_id)?;
    println!("🚫 Code '{}' rejected; the line stays unmatched", entry.external_code);
    Ok(())
}
