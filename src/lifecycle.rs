// 🔄 Order Lifecycle Controller - intake → reconciliation → conversion
//
// State machine:
//   pending ──duplicate──▶ duplicate        (exit: confirmed force-delete)
//   pending ──mismatch───▶ price_mismatch   (exit: approve → processed, reject → deleted)
//   pending ──clean──────▶ processed ──dispatch──▶ converted
//
// Every transition is a compare-and-set on the stored status, so two
// reviewers racing on the same order cannot both win. Dispatch is guarded
// by a claim stored on the order, which holds across processes sharing the
// database. Dispatch failures leave the committed status alone and are
// reported on their own channel.

use crate::config::PipelineConfig;
use crate::db::Event;
use crate::deduplication::DuplicateDetector;
use crate::document::{DispatchReceipt, DocumentDispatcher, SalesOrderDocument};
use crate::entities::{
    CounterpartyProductMapping, DocumentKind, DuplicateMatchResult, IncomingOrder, NewProduct,
    OrderIntake, OrderStatus, Product, ReviewStatus, UnresolvedCodeEntry, UnresolvedFilter,
};
use crate::error::{DispatchError, ReconcileError, ReconcileResult, StoreError};
use crate::pricing::PriceValidator;
use crate::resolver::CodeResolver;
use crate::store::{OrderStore, Store};
use crate::validation::{validate_intake, validate_mapping, validate_product};
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard};

/// A dispatch claim older than this is assumed to belong to a dead process.
const DISPATCH_CLAIM_TTL_MINUTES: i64 = 15;

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ConversionOutcome {
    Converted {
        document: SalesOrderDocument,
        receipt: DispatchReceipt,
    },
    /// The order was converted earlier; nothing was sent again
    AlreadyConverted,
}

/// Result of a force-approval. The approval itself is committed even when
/// `dispatch` carries an error; retry with `convert_order`.
#[derive(Debug)]
pub struct ApprovalOutcome {
    pub order: IncomingOrder,
    pub accepted_mismatches: usize,
    pub dispatch: Result<ConversionOutcome, DispatchError>,
}

// ============================================================================
// CONTROLLER
// ============================================================================

pub struct OrderLifecycleController<S: Store> {
    store: S,
    dispatcher: Arc<dyn DocumentDispatcher>,
    detector: DuplicateDetector,
    resolver: CodeResolver,
    pricing: PriceValidator,
    actor: String,
    /// Serializes snapshot + insert for intake within this process
    intake_lock: Mutex<()>,
}

impl<S: Store> OrderLifecycleController<S> {
    pub fn new(store: S, dispatcher: Arc<dyn DocumentDispatcher>, config: PipelineConfig) -> Self {
        let config = config.or_default_if_invalid();

        OrderLifecycleController {
            store,
            dispatcher,
            detector: DuplicateDetector::with_epsilon(config.amount_epsilon),
            resolver: CodeResolver::from_config(&config),
            pricing: PriceValidator::from_config(&config),
            actor: "system".to_string(),
            intake_lock: Mutex::new(()),
        }
    }

    /// Name recorded as the actor of audit events.
    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ------------------------------------------------------------------------
    // Intake
    // ------------------------------------------------------------------------

    /// Run a new document through duplicate detection, code resolution and
    /// price validation. Invalid records are rejected and never stored.
    pub fn process_intake(&self, intake: OrderIntake) -> ReconcileResult<IncomingOrder> {
        validate_intake(&intake)?;
        let mut order = IncomingOrder::from_intake(intake);

        {
            let _guard = lock(&self.intake_lock);

            if let Some(verdict) = self.detect_duplicate(&order)? {
                return self.store_duplicate(order, verdict);
            }

            order.status = OrderStatus::Pending;
            match self.store.insert_order(&order) {
                Ok(()) => {}
                Err(StoreError::Conflict(reason)) => {
                    // Another writer stored the same number after our snapshot
                    tracing::warn!(
                        order_number = %order.external_order_number,
                        %reason,
                        "intake raced with a concurrent submission, re-running detection"
                    );
                    return match self.detect_duplicate(&order)? {
                        Some(verdict) => self.store_duplicate(order, verdict),
                        None => Err(StoreError::Conflict(reason).into()),
                    };
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.record(
            "order_received",
            "order",
            &order.id,
            json!({
                "kind": order.kind.as_str(),
                "order_number": order.external_order_number,
                "counterparty": order.counterparty_name,
                "total_amount": order.total_amount,
                "lines": order.line_items.len(),
            }),
        )?;

        self.reconcile(order, OrderStatus::Pending)
    }

    fn detect_duplicate(&self, order: &IncomingOrder) -> ReconcileResult<Option<DuplicateMatchResult>> {
        // Earlier duplicates point at a live original; comparing against
        // them would only produce ties
        let existing: Vec<IncomingOrder> = self
            .store
            .list_orders(Some(order.kind), None)?
            .into_iter()
            .filter(|o| o.status != OrderStatus::Duplicate)
            .collect();

        Ok(self.detector.detect(order, &existing))
    }

    fn store_duplicate(
        &self,
        mut order: IncomingOrder,
        verdict: DuplicateMatchResult,
    ) -> ReconcileResult<IncomingOrder> {
        order.status = OrderStatus::Duplicate;
        order.duplicate_match = Some(verdict);
        self.store.insert_order(&order)?;

        self.record(
            "order_duplicate",
            "order",
            &order.id,
            serde_json::to_value(&order.duplicate_match).map_err(StoreError::from)?,
        )?;

        Ok(order)
    }

    /// Resolve codes, validate prices and move the order out of `expected`.
    fn reconcile(&self, mut order: IncomingOrder, expected: OrderStatus) -> ReconcileResult<IncomingOrder> {
        let summary = self.resolver.resolve_order(&self.store, &mut order)?;
        let check = self.pricing.validate(&self.store, &order)?;

        order.status = if check.is_clean() {
            OrderStatus::Processed
        } else {
            OrderStatus::PriceMismatch
        };
        order.price_mismatch_details = check.into_details();
        order.updated_at = Utc::now();

        if !self.store.update_order_if_status(&order, expected)? {
            return Err(self.transition_error(&order.id, expected.as_str()));
        }

        let mismatches = order.price_mismatch_details.as_ref().map_or(0, Vec::len);
        tracing::info!(
            order_id = %order.id,
            status = %order.status,
            mismatches,
            queued_codes = summary.queued.len(),
            "order reconciled"
        );
        self.record(
            "order_reconciled",
            "order",
            &order.id,
            json!({
                "from": expected.as_str(),
                "status": order.status.as_str(),
                "resolved_lines": summary.resolved,
                "queued_codes": summary.queued,
                "mismatches": mismatches,
            }),
        )?;

        Ok(order)
    }

    /// Re-run resolution and pricing, typically after review entries for
    /// the order were approved.
    pub fn revalidate_order(&self, order_id: &str) -> ReconcileResult<IncomingOrder> {
        let order = self.get_order(order_id)?;
        match order.status {
            OrderStatus::PriceMismatch | OrderStatus::Pending => {
                let from = order.status;
                self.reconcile(order, from)
            }
            actual => Err(ReconcileError::InvalidTransition {
                order_id: order_id.to_string(),
                actual,
                expected: "pending or price_mismatch",
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Review decisions on orders
    // ------------------------------------------------------------------------

    /// Accept a `price_mismatch` order as is, then generate its sales order.
    pub fn approve_order(&self, order_id: &str) -> ReconcileResult<ApprovalOutcome> {
        let mut order = self.get_order(order_id)?;
        if order.status != OrderStatus::PriceMismatch {
            return Err(ReconcileError::InvalidTransition {
                order_id: order_id.to_string(),
                actual: order.status,
                expected: "price_mismatch",
            });
        }

        let accepted = order.price_mismatch_details.clone().unwrap_or_default();
        order.status = OrderStatus::Processed;
        order.updated_at = Utc::now();

        if !self.store.update_order_if_status(&order, OrderStatus::PriceMismatch)? {
            return Err(self.transition_error(order_id, "price_mismatch"));
        }

        tracing::info!(order_id, accepted = accepted.len(), "order force-approved");
        self.record(
            "order_force_approved",
            "order",
            order_id,
            json!({ "accepted_mismatches": accepted }),
        )?;

        let dispatch = match self.convert_order(order_id) {
            Ok(outcome) => Ok(outcome),
            Err(ReconcileError::Dispatch(e)) => Err(e),
            Err(e) => return Err(e),
        };

        Ok(ApprovalOutcome {
            order: self.get_order(order_id)?,
            accepted_mismatches: accepted.len(),
            dispatch,
        })
    }

    /// Permanently delete a `price_mismatch` order.
    pub fn reject_order(&self, order_id: &str, confirmed: bool) -> ReconcileResult<()> {
        if !confirmed {
            return Err(ReconcileError::ConfirmationRequired("rejecting an order"));
        }
        self.delete_in_status(order_id, OrderStatus::PriceMismatch, "order_rejected")
    }

    /// Force-delete an order classified as `duplicate`.
    pub fn delete_duplicate(&self, order_id: &str, confirmed: bool) -> ReconcileResult<()> {
        if !confirmed {
            return Err(ReconcileError::ConfirmationRequired("deleting a duplicate"));
        }
        self.delete_in_status(order_id, OrderStatus::Duplicate, "duplicate_deleted")
    }

    fn delete_in_status(&self, order_id: &str, expected: OrderStatus, event_type: &str) -> ReconcileResult<()> {
        let order = self.get_order(order_id)?;
        if order.status != expected {
            return Err(ReconcileError::InvalidTransition {
                order_id: order_id.to_string(),
                actual: order.status,
                expected: expected.as_str(),
            });
        }

        if !self.store.delete_order_if_status(order_id, expected)? {
            return Err(self.transition_error(order_id, expected.as_str()));
        }

        let retired = self.retire_review_entries(order_id)?;

        tracing::info!(order_id, event_type, retired_entries = retired.len(), "order deleted");
        // The event keeps the last state of the deleted order
        let snapshot = serde_json::to_value(&order).map_err(StoreError::from)?;
        self.record(
            event_type,
            "order",
            order_id,
            json!({ "order": snapshot, "retired_review_entries": retired }),
        )
    }

    /// Reject the pending review entries of a deleted document so nobody
    /// can approve codes (and persist mappings) for it later.
    fn retire_review_entries(&self, order_id: &str) -> ReconcileResult<Vec<String>> {
        let filter = UnresolvedFilter {
            status: Some(ReviewStatus::Pending),
            source_document_id: Some(order_id.to_string()),
            ..Default::default()
        };

        let mut retired = Vec::new();
        for entry in self.store.list_unresolved(&filter)? {
            if !self
                .store
                .resolve_entry_if_pending(&entry.id, ReviewStatus::Rejected, None)?
            {
                // Reviewed meanwhile
                continue;
            }
            self.record(
                "code_rejected",
                "unresolved_code",
                &entry.id,
                json!({
                    "external_code": entry.external_code,
                    "reason": "source document deleted",
                }),
            )?;
            retired.push(entry.id);
        }
        Ok(retired)
    }

    // ------------------------------------------------------------------------
    // Conversion
    // ------------------------------------------------------------------------

    /// Generate and dispatch the sales order of a `processed` order.
    ///
    /// Converting an already converted order is a no-op. A failed dispatch
    /// leaves the order `processed` so the call can simply be retried.
    pub fn convert_order(&self, order_id: &str) -> ReconcileResult<ConversionOutcome> {
        let order = self.get_order(order_id)?;
        ensure_convertible(&order)?;
        if order.status == OrderStatus::Converted {
            return Ok(ConversionOutcome::AlreadyConverted);
        }

        let stale_before = Utc::now() - Duration::minutes(DISPATCH_CLAIM_TTL_MINUTES);
        let Some(_claim) = DispatchClaim::acquire(&self.store, order_id, stale_before)? else {
            // Someone else holds the order: finished, in flight, or moved on
            let current = self.get_order(order_id)?;
            return match current.status {
                OrderStatus::Converted => Ok(ConversionOutcome::AlreadyConverted),
                OrderStatus::Processed => Err(ReconcileError::DispatchInProgress(order_id.to_string())),
                actual => Err(ReconcileError::InvalidTransition {
                    order_id: order_id.to_string(),
                    actual,
                    expected: "processed",
                }),
            };
        };

        // Re-read under the claim: a conversion may have finished meanwhile
        let mut order = self.get_order(order_id)?;
        if order.status != OrderStatus::Processed {
            ensure_convertible(&order)?;
            return Ok(ConversionOutcome::AlreadyConverted);
        }

        let document = SalesOrderDocument::build(&self.store, &order)?;

        let receipt = match self.dispatcher.dispatch(&document) {
            Ok(receipt) => receipt,
            Err(e) => {
                tracing::warn!(order_id, so_number = %document.so_number, error = %e, "dispatch failed");
                self.record(
                    "dispatch_failed",
                    "order",
                    order_id,
                    json!({ "so_number": document.so_number, "error": e.to_string() }),
                )?;
                return Err(e.into());
            }
        };

        order.status = OrderStatus::Converted;
        order.converted_total = Some(document.total);
        order.updated_at = Utc::now();

        if !self.store.update_order_if_status(&order, OrderStatus::Processed)? {
            tracing::warn!(order_id, so_number = %document.so_number, "order changed while its document was dispatched");
            return Err(self.transition_error(order_id, "processed"));
        }

        tracing::info!(order_id, so_number = %document.so_number, total = document.total, "order converted");
        self.record(
            "order_converted",
            "order",
            order_id,
            json!({
                "so_number": document.so_number,
                "total": document.total,
                "location": receipt.location,
            }),
        )?;

        Ok(ConversionOutcome::Converted { document, receipt })
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn get_order(&self, order_id: &str) -> ReconcileResult<IncomingOrder> {
        self.store
            .get_order(order_id)?
            .ok_or_else(|| ReconcileError::not_found("order", order_id))
    }

    pub fn list_orders(
        &self,
        kind: Option<DocumentKind>,
        status: Option<OrderStatus>,
    ) -> ReconcileResult<Vec<IncomingOrder>> {
        Ok(self.store.list_orders(kind, status)?)
    }

    pub fn list_price_mismatch_orders(&self) -> ReconcileResult<Vec<IncomingOrder>> {
        self.list_orders(None, Some(OrderStatus::PriceMismatch))
    }

    pub fn list_duplicate_orders(&self) -> ReconcileResult<Vec<IncomingOrder>> {
        self.list_orders(None, Some(OrderStatus::Duplicate))
    }

    pub fn order_history(&self, order_id: &str) -> ReconcileResult<Vec<Event>> {
        Ok(self.store.events_for("order", order_id)?)
    }

    // ------------------------------------------------------------------------
    // Code review
    // ------------------------------------------------------------------------

    pub fn list_unresolved_codes(&self, filter: &UnresolvedFilter) -> ReconcileResult<Vec<UnresolvedCodeEntry>> {
        Ok(self.store.list_unresolved(filter)?)
    }

    /// Approve an unresolved code with an existing product, optionally
    /// remembering the mapping for future documents of the counterparty.
    ///
    /// Approving again with the same product is a no-op.
    pub fn approve_code(
        &self,
        entry_id: &str,
        product_id: &str,
        persist_mapping: bool,
    ) -> ReconcileResult<UnresolvedCodeEntry> {
        let entry = self.get_entry(entry_id)?;
        check_reviewable(&entry, Some(product_id))?;

        let product = self
            .store
            .get_product(product_id)?
            .ok_or_else(|| ReconcileError::not_found("product", product_id))?;

        if entry.is_pending()
            && self
                .store
                .resolve_entry_if_pending(entry_id, ReviewStatus::Approved, Some(product_id))?
        {
            tracing::info!(entry_id, product_code = %product.internal_code, "code approved");
            self.record(
                "code_approved",
                "unresolved_code",
                entry_id,
                json!({
                    "product_id": product_id,
                    "external_code": entry.external_code,
                    "persist_mapping": persist_mapping,
                }),
            )?;
        }

        // Lost a race or already approved: fine only if it agrees with us.
        // Approved entries never change again, so the mapping is safe to
        // write from here on.
        let current = self.get_entry(entry_id)?;
        if current.status != ReviewStatus::Approved {
            return Err(ReconcileError::AlreadyResolved {
                entry_id: entry_id.to_string(),
                status: current.status.to_string(),
            });
        }
        check_reviewable(&current, Some(product_id))?;

        if persist_mapping {
            self.persist_mapping(&current, &product)?;
        }
        Ok(current)
    }

    /// Create a new catalog product and approve the entry with it.
    pub fn approve_code_with_new_product(
        &self,
        entry_id: &str,
        new_product: NewProduct,
        persist_mapping: bool,
    ) -> ReconcileResult<(UnresolvedCodeEntry, Product)> {
        let entry = self.get_entry(entry_id)?;
        if !entry.is_pending() {
            return Err(ReconcileError::AlreadyResolved {
                entry_id: entry_id.to_string(),
                status: entry.status.to_string(),
            });
        }

        let product = self.create_product(new_product)?;
        let entry = self.approve_code(entry_id, &product.id, persist_mapping)?;
        Ok((entry, product))
    }

    /// Reject an unresolved code; the line stays unmatched for that order.
    pub fn reject_code(&self, entry_id: &str) -> ReconcileResult<UnresolvedCodeEntry> {
        let entry = self.get_entry(entry_id)?;
        match entry.status {
            ReviewStatus::Rejected => return Ok(entry),
            ReviewStatus::Approved => {
                return Err(ReconcileError::AlreadyResolved {
                    entry_id: entry_id.to_string(),
                    status: entry.status.to_string(),
                })
            }
            ReviewStatus::Pending => {}
        }

        if self
            .store
            .resolve_entry_if_pending(entry_id, ReviewStatus::Rejected, None)?
        {
            tracing::info!(entry_id, external_code = %entry.external_code, "code rejected");
            self.record(
                "code_rejected",
                "unresolved_code",
                entry_id,
                json!({ "external_code": entry.external_code }),
            )?;
        }

        let current = self.get_entry(entry_id)?;
        if current.status != ReviewStatus::Rejected {
            return Err(ReconcileError::AlreadyResolved {
                entry_id: entry_id.to_string(),
                status: current.status.to_string(),
            });
        }
        Ok(current)
    }

    fn get_entry(&self, entry_id: &str) -> ReconcileResult<UnresolvedCodeEntry> {
        self.store
            .get_unresolved(entry_id)?
            .ok_or_else(|| ReconcileError::not_found("unresolved code", entry_id))
    }

    fn persist_mapping(&self, entry: &UnresolvedCodeEntry, product: &Product) -> ReconcileResult<()> {
        let Some(counterparty_id) = entry.counterparty_id.as_deref() else {
            tracing::warn!(
                entry_id = %entry.id,
                "document has no counterparty id, mapping not persisted"
            );
            return Ok(());
        };

        let mapping = CounterpartyProductMapping::new(counterparty_id, &entry.external_code, &product.id)
            .with_external_name(Some(entry.external_description.clone()))
            .with_notes(&format!("approved from review entry {}", entry.id));
        self.create_mapping(mapping)?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Catalog maintenance
    // ------------------------------------------------------------------------

    pub fn create_product(&self, new_product: NewProduct) -> ReconcileResult<Product> {
        let product = Product::from_new(new_product);
        validate_product(&product)?;
        self.store.create_product(&product)?;

        tracing::info!(product_code = %product.internal_code, "product created");
        self.record(
            "product_created",
            "product",
            &product.id,
            serde_json::to_value(&product).map_err(StoreError::from)?,
        )?;
        Ok(product)
    }

    pub fn update_product(&self, product: Product) -> ReconcileResult<Product> {
        let mut product = product;
        validate_product(&product)?;
        product.updated_at = Utc::now();

        if !self.store.update_product(&product)? {
            return Err(ReconcileError::not_found("product", &product.id));
        }

        self.record(
            "product_updated",
            "product",
            &product.id,
            serde_json::to_value(&product).map_err(StoreError::from)?,
        )?;
        Ok(product)
    }

    pub fn set_product_active(&self, product_id: &str, active: bool) -> ReconcileResult<()> {
        if !self.store.set_product_active(product_id, active)? {
            return Err(ReconcileError::not_found("product", product_id));
        }
        self.record(
            "product_active_changed",
            "product",
            product_id,
            json!({ "active": active }),
        )
    }

    /// Insert or update the mapping for (counterparty, external code).
    pub fn create_mapping(&self, mapping: CounterpartyProductMapping) -> ReconcileResult<CounterpartyProductMapping> {
        validate_mapping(&mapping)?;
        if self.store.get_product(&mapping.product_id)?.is_none() {
            return Err(ReconcileError::not_found("product", &mapping.product_id));
        }

        let stored = self.store.upsert_mapping(&mapping)?;
        tracing::info!(
            counterparty_id = %stored.counterparty_id,
            external_code = %stored.external_code,
            product_id = %stored.product_id,
            "mapping stored"
        );
        self.record(
            "mapping_upserted",
            "mapping",
            &stored.id,
            serde_json::to_value(&stored).map_err(StoreError::from)?,
        )?;
        Ok(stored)
    }

    pub fn set_mapping_active(&self, counterparty_id: &str, external_code: &str, active: bool) -> ReconcileResult<()> {
        if !self
            .store
            .set_mapping_active(counterparty_id, external_code, active)?
        {
            return Err(ReconcileError::not_found(
                "mapping",
                &format!("{}/{}", counterparty_id, external_code),
            ));
        }
        Ok(())
    }

    pub fn list_mappings(&self, counterparty_id: &str) -> ReconcileResult<Vec<CounterpartyProductMapping>> {
        Ok(self.store.list_mappings(counterparty_id)?)
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn record(&self, event_type: &str, entity_type: &str, entity_id: &str, data: serde_json::Value) -> ReconcileResult<()> {
        let event = Event::new(event_type, entity_type, entity_id, data, &self.actor);
        self.store.record(&event)?;
        Ok(())
    }

    /// Error for a compare-and-set that found a different status.
    fn transition_error(&self, order_id: &str, expected: &'static str) -> ReconcileError {
        match self.store.get_order(order_id) {
            Ok(Some(current)) => ReconcileError::InvalidTransition {
                order_id: order_id.to_string(),
                actual: current.status,
                expected,
            },
            Ok(None) => ReconcileError::not_found("order", order_id),
            Err(e) => e.into(),
        }
    }
}

fn ensure_convertible(order: &IncomingOrder) -> ReconcileResult<()> {
    match order.status {
        OrderStatus::Processed | OrderStatus::Converted => Ok(()),
        actual => Err(ReconcileError::InvalidTransition {
            order_id: order.id.clone(),
            actual,
            expected: "processed",
        }),
    }
}

/// Pending entries, or entries already approved with `product_id`, may be
/// (re)approved; anything else is already settled.
fn check_reviewable(entry: &UnresolvedCodeEntry, product_id: Option<&str>) -> ReconcileResult<()> {
    match entry.status {
        ReviewStatus::Pending => Ok(()),
        ReviewStatus::Approved if entry.resolved_product_id.as_deref() == product_id => Ok(()),
        _ => Err(ReconcileError::AlreadyResolved {
            entry_id: entry.id.clone(),
            status: entry.status.to_string(),
        }),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Stored claim on a `processed` order while its document is dispatched;
/// released on drop.
struct DispatchClaim<'a, S: OrderStore> {
    store: &'a S,
    order_id: String,
}

impl<'a, S: OrderStore> DispatchClaim<'a, S> {
    fn acquire(
        store: &'a S,
        order_id: &str,
        stale_before: chrono::DateTime<Utc>,
    ) -> ReconcileResult<Option<Self>> {
        if !store.claim_dispatch(order_id, stale_before)? {
            return Ok(None);
        }
        Ok(Some(DispatchClaim {
            store,
            order_id: order_id.to_string(),
        }))
    }
}

impl<S: OrderStore> Drop for DispatchClaim<'_, S> {
    fn drop(&mut self) {
        if let Err(e) = self.store.release_dispatch(&self.order_id) {
            tracing::warn!(order_id = %self.order_id, error = %e, "failed to release dispatch claim");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
