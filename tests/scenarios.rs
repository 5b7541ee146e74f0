use chrono::NaiveDate;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, OnceLock};
use std::thread;
use tempfile::{tempdir, TempDir};

use order_reconciliation::{
    CatalogStore, Confidence, ConversionOutcome, CounterpartyProductMapping, CsvDocumentWriter,
    DispatchError, DispatchReceipt, DocumentDispatcher, DocumentKind, LineItem, MatchType,
    MismatchReason, OrderIntake, OrderLifecycleController, OrderStatus, OrderStore, PipelineConfig,
    Product, ReconcileError, ReviewStatus, SalesOrderDocument, SourceMetadata, SqliteStore,
    UnresolvedFilter,
};

type Controller = OrderLifecycleController<SqliteStore>;

// Each test gets its own database file in a temp dir (removed on drop).
fn create_test_controller(temp_dir: &TempDir, catalog: &[Product]) -> anyhow::Result<Controller> {
    let store = SqliteStore::open(temp_dir.path().join("orders.db"))?;
    for product in catalog {
        store.create_product(product)?;
    }
    let dispatcher = Arc::new(CsvDocumentWriter::new(temp_dir.path().join("sales_orders")));
    Ok(OrderLifecycleController::new(store, dispatcher, PipelineConfig::default()))
}

fn create_test_intake(number: &str, lines: Vec<LineItem>) -> OrderIntake {
    let total = lines.iter().map(|l| l.quantity * l.unit_price).sum();
    OrderIntake {
        kind: DocumentKind::PurchaseOrder,
        external_order_number: number.to_string(),
        counterparty_id: Some("acme".to_string()),
        counterparty_name: "Acme".to_string(),
        counterparty_address: None,
        order_date: NaiveDate::from_ymd_opt(2024, 3, 1),
        delivery_date: NaiveDate::from_ymd_opt(2024, 3, 15),
        currency: "INR".to_string(),
        total_amount: total,
        line_items: lines,
        source: SourceMetadata::Manual,
    }
}

fn steel_rod() -> Product {
    Product::new("SR-10", "Steel Rod", "pcs", 100.0)
}

#[test]
fn resubmission_with_different_case_is_duplicate() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let controller = create_test_controller(&temp_dir, &[steel_rod()])?;

    let mut first = create_test_intake("PO-1001", vec![LineItem::new("Steel Rod", Some("SR-10"), 50.0, 100.0)]);
    first.total_amount = 5000.0;
    let original = controller.process_intake(first.clone())?;
    assert_eq!(original.status, OrderStatus::Processed);

    first.external_order_number = "po1001".to_string();
    let second = controller.process_intake(first)?;

    assert_eq!(second.status, OrderStatus::Duplicate);
    let verdict = second.duplicate_match.expect("duplicate verdict");
    assert_eq!(verdict.match_type, MatchType::NormalizedOrderNumber);
    assert_eq!(verdict.confidence, Confidence::High);
    assert_eq!(verdict.matched_order_id, original.id);

    Ok(())
}

#[test]
fn normalized_number_beats_counterparty_amount_date() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let controller = create_test_controller(&temp_dir, &[steel_rod()])?;

    let intake = create_test_intake("PO-1001", vec![LineItem::new("Steel Rod", Some("SR-10"), 50.0, 100.0)]);
    controller.process_intake(intake.clone())?;

    // Same counterparty, amount and date AND the same normalized number
    let mut resubmitted = intake;
    resubmitted.external_order_number = " po 1001 ".to_string();
    let second = controller.process_intake(resubmitted)?;

    let verdict = second.duplicate_match.expect("duplicate verdict");
    assert_eq!(verdict.match_type, MatchType::NormalizedOrderNumber);

    Ok(())
}

#[test]
fn unknown_code_is_queued_with_fuzzy_suggestion() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let grade_a = Product::new("SR-10-A", "Steel Rod 10mm — Grade A", "pcs", 50.0);
    let controller = create_test_controller(&temp_dir, &[grade_a.clone()])?;

    let order = controller.process_intake(create_test_intake(
        "PO-2001",
        vec![LineItem::new("Steel Rod 10mm", Some("ACM-7"), 10.0, 50.0)],
    ))?;

    assert_eq!(order.status, OrderStatus::PriceMismatch);
    let details = order.price_mismatch_details.as_ref().expect("mismatch details");
    assert_eq!(details.len(), 1);
    assert_eq!(details[0].reason, MismatchReason::UnmatchedProduct);
    assert_eq!(details[0].difference_percent, 100.0);

    let entries = controller.list_unresolved_codes(&UnresolvedFilter::pending())?;
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.external_code, "ACM-7");
    assert_eq!(entry.source_document_id, order.id);
    assert_eq!(entry.status, ReviewStatus::Pending);
    assert_eq!(entry.suggested_product_id.as_deref(), Some(grade_a.id.as_str()));
    assert!(entry.suggestion_confidence >= 0.60 && entry.suggestion_confidence < 0.85);

    Ok(())
}

#[test]
fn approved_mapping_resolves_future_documents() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let grade_a = Product::new("SR-10-A", "Steel Rod 10mm — Grade A", "pcs", 50.0);
    let controller = create_test_controller(&temp_dir, &[grade_a.clone()])?;

    let first = controller.process_intake(create_test_intake(
        "PO-3001",
        vec![LineItem::new("Steel Rod 10mm", Some("ACM-7"), 10.0, 50.0)],
    ))?;
    let entry = controller.list_unresolved_codes(&UnresolvedFilter::pending())?.remove(0);

    controller.approve_code(&entry.id, &grade_a.id, true)?;
    assert_eq!(controller.revalidate_order(&first.id)?.status, OrderStatus::Processed);

    let second = controller.process_intake(create_test_intake(
        "PO-3002",
        vec![LineItem::new("Steel Rod 10mm", Some("acm-7"), 4.0, 51.0)],
    ))?;

    assert_eq!(second.status, OrderStatus::Processed);
    assert!(controller.list_unresolved_codes(&UnresolvedFilter::pending())?.is_empty());

    Ok(())
}

#[test]
fn sales_order_rounds_up_to_pack_multiple() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let boxed = Product::new("WID-12", "Widget", "pcs", 50.0).sold_in_multiples_of(12);
    let controller = create_test_controller(&temp_dir, &[boxed])?;

    let order = controller.process_intake(create_test_intake(
        "PO-4001",
        vec![LineItem::new("Widget", Some("WID-12"), 25.0, 50.0)],
    ))?;
    assert_eq!(order.status, OrderStatus::Processed);

    let ConversionOutcome::Converted { document, receipt } = controller.convert_order(&order.id)? else {
        panic!("expected a new conversion");
    };

    let line = &document.lines[0];
    assert_eq!(line.requested_quantity, 25.0);
    assert_eq!(line.quantity, 36.0);
    assert_eq!(line.line_total, 1800.0);
    assert_eq!(document.total, 1800.0);
    assert!(std::path::Path::new(&receipt.location).exists());

    let stored = controller.get_order(&order.id)?;
    assert_eq!(stored.status, OrderStatus::Converted);
    assert_eq!(stored.converted_total, Some(1800.0));

    Ok(())
}

#[test]
fn conversion_twice_sends_one_document() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let controller = create_test_controller(&temp_dir, &[steel_rod()])?;
    let order = controller.process_intake(create_test_intake(
        "PO-5001",
        vec![LineItem::new("Steel Rod", Some("SR-10"), 2.0, 100.0)],
    ))?;

    controller.convert_order(&order.id)?;
    let again = controller.convert_order(&order.id)?;

    assert_eq!(again, ConversionOutcome::AlreadyConverted);
    let written = std::fs::read_dir(temp_dir.path().join("sales_orders"))?.count();
    assert_eq!(written, 1);

    let converted_events = controller
        .order_history(&order.id)?
        .into_iter()
        .filter(|e| e.event_type == "order_converted")
        .count();
    assert_eq!(converted_events, 1);

    Ok(())
}

#[test]
fn price_exactly_on_threshold_is_not_flagged() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let controller = create_test_controller(&temp_dir, &[steel_rod()])?;

    let at_boundary = controller.process_intake(create_test_intake(
        "PO-6001",
        vec![LineItem::new("Steel Rod", Some("SR-10"), 1.0, 105.0)],
    ))?;
    let above = controller.process_intake(create_test_intake(
        "PO-6002",
        vec![LineItem::new("Steel Rod", Some("SR-10"), 1.0, 106.0)],
    ))?;

    assert_eq!(at_boundary.status, OrderStatus::Processed);
    assert_eq!(above.status, OrderStatus::PriceMismatch);
    let details = above.price_mismatch_details.expect("mismatch details");
    assert_eq!(details[0].reason, MismatchReason::PriceDeviation);
    assert!((details[0].difference_percent - 6.0).abs() < 1e-9);

    Ok(())
}

#[test]
fn concurrent_code_approvals_leave_one_mapping() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let grade_a = Product::new("SR-10-A", "Steel Rod 10mm — Grade A", "pcs", 50.0);
    let controller = Arc::new(create_test_controller(&temp_dir, &[grade_a.clone()])?);

    controller.process_intake(create_test_intake(
        "PO-7001",
        vec![LineItem::new("Steel Rod 10mm", Some("ACM-7"), 10.0, 50.0)],
    ))?;
    let entry = controller.list_unresolved_codes(&UnresolvedFilter::pending())?.remove(0);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let controller = Arc::clone(&controller);
            let entry_id = entry.id.clone();
            let product_id = grade_a.id.clone();
            thread::spawn(move || controller.approve_code(&entry_id, &product_id, true))
        })
        .collect();

    for handle in handles {
        let approved = handle.join().expect("thread panicked")?;
        assert_eq!(approved.status, ReviewStatus::Approved);
    }

    let mappings = controller.list_mappings("acme")?;
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].product_id, grade_a.id);

    Ok(())
}

#[test]
fn concurrent_upserts_across_connections_keep_one_row() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db_path = temp_dir.path().join("orders.db");
    let product = steel_rod();
    SqliteStore::open(&db_path)?.create_product(&product)?;

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let db_path = db_path.clone();
            let product_id = product.id.clone();
            thread::spawn(move || -> anyhow::Result<()> {
                let store = SqliteStore::open(&db_path)?;
                store.upsert_mapping(&CounterpartyProductMapping::new("acme", "ACM-7", &product_id))?;
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("thread panicked")?;
    }

    assert_eq!(SqliteStore::open(&db_path)?.list_mappings("acme")?.len(), 1);
    Ok(())
}

#[test]
fn concurrent_identical_intakes_store_one_live_order() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    create_test_controller(&temp_dir, &[steel_rod()])?;
    let db_path = temp_dir.path().join("orders.db");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let db_path = db_path.clone();
            let dispatch_dir = temp_dir.path().join("sales_orders");
            thread::spawn(move || -> anyhow::Result<OrderStatus> {
                // Separate connections: only the storage backstop is shared
                let store = SqliteStore::open(&db_path)?;
                let controller = OrderLifecycleController::new(
                    store,
                    Arc::new(CsvDocumentWriter::new(dispatch_dir)),
                    PipelineConfig::default(),
                );
                let order = controller.process_intake(create_test_intake(
                    "PO-8001",
                    vec![LineItem::new("Steel Rod", Some("SR-10"), 1.0, 100.0)],
                ))?;
                Ok(order.status)
            })
        })
        .collect();

    let mut statuses = Vec::new();
    for handle in handles {
        statuses.push(handle.join().expect("thread panicked")?);
    }

    let live = statuses.iter().filter(|s| **s != OrderStatus::Duplicate).count();
    assert_eq!(live, 1);
    Ok(())
}

#[test]
fn vendor_bills_are_checked_separately_from_purchase_orders() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let controller = create_test_controller(&temp_dir, &[steel_rod()])?;

    let po = create_test_intake("DOC-1", vec![LineItem::new("Steel Rod", Some("SR-10"), 1.0, 100.0)]);
    let mut bill = po.clone();
    bill.kind = DocumentKind::VendorBill;

    controller.process_intake(po)?;
    let bill = controller.process_intake(bill)?;

    assert_ne!(bill.status, OrderStatus::Duplicate);
    Ok(())
}

#[test]
fn zero_quote_needs_a_price_decision() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let controller = create_test_controller(&temp_dir, &[steel_rod()])?;

    let order = controller.process_intake(create_test_intake(
        "PO-9001",
        vec![LineItem::new("Steel Rod", Some("SR-10"), 3.0, 0.0)],
    ))?;

    assert_eq!(order.status, OrderStatus::PriceMismatch);
    let details = order.price_mismatch_details.expect("mismatch details");
    assert_eq!(details[0].reason, MismatchReason::PriceDeviation);
    assert!((details[0].difference_percent + 100.0).abs() < 1e-9);

    Ok(())
}

// ============================================================================
// Races between reviewers (two controllers, one database file)
// ============================================================================

/// Second controller on the same database, as a CLI next to the server.
fn open_second_controller(temp_dir: &TempDir) -> anyhow::Result<Controller> {
    let store = SqliteStore::open(temp_dir.path().join("orders.db"))?;
    let dispatcher = Arc::new(CsvDocumentWriter::new(temp_dir.path().join("sales_orders")));
    Ok(OrderLifecycleController::new(store, dispatcher, PipelineConfig::default()))
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

#[test]
fn approve_and_reject_of_one_code_never_leave_a_rejected_mapping() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let rod = steel_rod();
    let first = Arc::new(create_test_controller(&temp_dir, &[rod.clone()])?);
    let second = Arc::new(open_second_controller(&temp_dir)?);

    let mut entries = Vec::new();
    for i in 0..8 {
        let code = format!("ZZ-{}", i);
        first.process_intake(create_test_intake(
            &format!("PO-10{}", i),
            vec![LineItem::new("Unknown part", Some(code.as_str()), (i + 1) as f64, 5.0)],
        ))?;
        let filter = UnresolvedFilter::pending();
        let entry = first
            .list_unresolved_codes(&filter)?
            .into_iter()
            .find(|e| e.external_code == code)
            .expect("queued entry");
        entries.push(entry);
    }

    for entry in &entries {
        let barrier = Arc::new(Barrier::new(2));

        let approve = {
            let (controller, barrier) = (Arc::clone(&first), Arc::clone(&barrier));
            let (entry_id, product_id) = (entry.id.clone(), rod.id.clone());
            thread::spawn(move || {
                barrier.wait();
                controller.approve_code(&entry_id, &product_id, true).is_ok()
            })
        };
        let reject = {
            let (controller, barrier) = (Arc::clone(&second), Arc::clone(&barrier));
            let entry_id = entry.id.clone();
            thread::spawn(move || {
                barrier.wait();
                controller.reject_code(&entry_id).is_ok()
            })
        };

        let approved = approve.join().expect("thread panicked");
        let rejected = reject.join().expect("thread panicked");
        assert!(approved != rejected, "exactly one review decision must win");

        let stored = first.store().get_mapping("acme", &entry.external_code)?;
        let current = first
            .list_unresolved_codes(&UnresolvedFilter::default())?
            .into_iter()
            .find(|e| e.id == entry.id)
            .expect("entry");
        match current.status {
            ReviewStatus::Approved => assert_eq!(stored.map(|p| p.id), Some(rod.id.clone())),
            ReviewStatus::Rejected => assert!(stored.is_none()),
            ReviewStatus::Pending => panic!("entry left pending"),
        }
    }

    Ok(())
}

#[test]
fn approve_and_reject_of_one_order_send_at_most_one_document() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let first = Arc::new(create_test_controller(&temp_dir, &[steel_rod()])?);
    let second = Arc::new(open_second_controller(&temp_dir)?);

    let mut approvals_won = 0;
    for i in 0..8 {
        let order = first.process_intake(create_test_intake(
            &format!("PO-11{}", i),
            vec![LineItem::new("Steel Rod", Some("SR-10"), (i + 1) as f64, 120.0)],
        ))?;
        assert_eq!(order.status, OrderStatus::PriceMismatch);

        let barrier = Arc::new(Barrier::new(2));
        let approve = {
            let (controller, barrier) = (Arc::clone(&first), Arc::clone(&barrier));
            let order_id = order.id.clone();
            thread::spawn(move || {
                barrier.wait();
                controller.approve_order(&order_id).is_ok()
            })
        };
        let reject = {
            let (controller, barrier) = (Arc::clone(&second), Arc::clone(&barrier));
            let order_id = order.id.clone();
            thread::spawn(move || {
                barrier.wait();
                controller.reject_order(&order_id, true).is_ok()
            })
        };

        let approved = approve.join().expect("thread panicked");
        let rejected = reject.join().expect("thread panicked");
        assert!(approved != rejected, "exactly one order decision must win");

        let stored = first.store().get_order(&order.id)?;
        if approved {
            approvals_won += 1;
            assert_eq!(stored.map(|o| o.status), Some(OrderStatus::Converted));
        } else {
            assert!(stored.is_none());
        }
    }

    assert_eq!(count_files(&temp_dir.path().join("sales_orders")), approvals_won);
    Ok(())
}

#[derive(Default)]
struct CountingDispatcher {
    calls: AtomicUsize,
}

impl DocumentDispatcher for CountingDispatcher {
    fn dispatch(&self, document: &SalesOrderDocument) -> Result<DispatchReceipt, DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(DispatchReceipt {
            so_number: document.so_number.clone(),
            location: "memory".to_string(),
        })
    }
}

/// While sending, asks a competing controller to convert the same order.
#[derive(Default)]
struct CompetingDispatcher {
    calls: AtomicUsize,
    competitor: OnceLock<Arc<OrderLifecycleController<SqliteStore>>>,
    competitor_refused: AtomicBool,
}

impl DocumentDispatcher for CompetingDispatcher {
    fn dispatch(&self, document: &SalesOrderDocument) -> Result<DispatchReceipt, DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(competitor) = self.competitor.get() {
            let refused = matches!(
                competitor.convert_order(&document.order_id),
                Err(ReconcileError::DispatchInProgress(_))
            );
            self.competitor_refused.store(refused, Ordering::SeqCst);
        }
        Ok(DispatchReceipt {
            so_number: document.so_number.clone(),
            location: "memory".to_string(),
        })
    }
}

#[test]
fn conversion_from_two_processes_dispatches_once() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db_path = temp_dir.path().join("orders.db");

    let first_store = SqliteStore::open(&db_path)?;
    first_store.create_product(&steel_rod())?;
    let first_dispatcher = Arc::new(CompetingDispatcher::default());
    let first = OrderLifecycleController::new(first_store, first_dispatcher.clone(), PipelineConfig::default());

    let second_dispatcher = Arc::new(CountingDispatcher::default());
    let second = Arc::new(OrderLifecycleController::new(
        SqliteStore::open(&db_path)?,
        second_dispatcher.clone(),
        PipelineConfig::default(),
    ));
    assert!(first_dispatcher.competitor.set(Arc::clone(&second)).is_ok());

    let order = first.process_intake(create_test_intake(
        "PO-12001",
        vec![LineItem::new("Steel Rod", Some("SR-10"), 2.0, 100.0)],
    ))?;

    let outcome = first.convert_order(&order.id)?;

    assert!(matches!(outcome, ConversionOutcome::Converted { .. }));
    assert!(first_dispatcher.competitor_refused.load(Ordering::SeqCst));
    assert_eq!(first_dispatcher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(second_dispatcher.calls.load(Ordering::SeqCst), 0);

    // Once converted, the other process sees a no-op
    assert_eq!(second.convert_order(&order.id)?, ConversionOutcome::AlreadyConverted);
    assert_eq!(second_dispatcher.calls.load(Ordering::SeqCst), 0);
    Ok(())
}
