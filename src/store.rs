//! Repository interfaces injected into the pipeline.
//!
//! Concurrency guarantees are part of each contract, not of any one
//! implementation:
//! - [`CatalogStore::upsert_mapping`] is a single atomic upsert keyed on
//!   `(counterparty_id, external_code)`.
//! - [`OrderStore::update_order_if_status`] and
//!   [`OrderStore::delete_order_if_status`] are compare-and-set on status.
//! - [`OrderStore::insert_order`] enforces uniqueness of the normalized
//!   document number among non-duplicate orders of the same kind and reports
//!   a violation as [`StoreError::Conflict`](crate::error::StoreError).
//! - [`OrderStore::claim_dispatch`] is compare-and-set on a `processed`
//!   order without a live claim, so only one process dispatches a document.
//! - [`ReviewQueue::resolve_entry_if_pending`] is compare-and-set on
//!   `pending`.
//!
//! Lookups that find nothing return `Ok(None)`.

use crate::db::Event;
use crate::entities::{
    CounterpartyProductMapping, DocumentKind, IncomingOrder, OrderStatus, Product, ReviewStatus,
    UnresolvedCodeEntry, UnresolvedFilter,
};
use crate::error::StoreResult;
use chrono::{DateTime, Utc};

pub trait CatalogStore: Send + Sync {
    fn get_product(&self, id: &str) -> StoreResult<Option<Product>>;

    /// Case-insensitive lookup on `internal_code`, active products only.
    fn get_product_by_code(&self, code: &str) -> StoreResult<Option<Product>>;

    /// Case-insensitive exact lookup on `name`, active products only.
    fn find_products_by_name(&self, name: &str) -> StoreResult<Vec<Product>>;

    fn list_active_products(&self) -> StoreResult<Vec<Product>>;

    /// Active mapping for (counterparty, code) whose product is active.
    fn get_mapping(&self, counterparty_id: &str, external_code: &str)
        -> StoreResult<Option<Product>>;

    /// Insert or update the mapping for `(counterparty_id, external_code)`;
    /// returns the stored row.
    fn upsert_mapping(
        &self,
        mapping: &CounterpartyProductMapping,
    ) -> StoreResult<CounterpartyProductMapping>;

    fn set_mapping_active(
        &self,
        counterparty_id: &str,
        external_code: &str,
        active: bool,
    ) -> StoreResult<bool>;

    fn list_mappings(&self, counterparty_id: &str) -> StoreResult<Vec<CounterpartyProductMapping>>;

    fn create_product(&self, product: &Product) -> StoreResult<()>;

    /// Returns false when no product has this id.
    fn update_product(&self, product: &Product) -> StoreResult<bool>;

    fn set_product_active(&self, id: &str, active: bool) -> StoreResult<bool>;
}

pub trait OrderStore: Send + Sync {
    fn insert_order(&self, order: &IncomingOrder) -> StoreResult<()>;

    fn get_order(&self, id: &str) -> StoreResult<Option<IncomingOrder>>;

    /// Orders in intake order (oldest first).
    fn list_orders(
        &self,
        kind: Option<DocumentKind>,
        status: Option<OrderStatus>,
    ) -> StoreResult<Vec<IncomingOrder>>;

    /// Persist `order` only if the stored status still equals `expected`.
    fn update_order_if_status(
        &self,
        order: &IncomingOrder,
        expected: OrderStatus,
    ) -> StoreResult<bool>;

    fn delete_order_if_status(&self, id: &str, expected: OrderStatus) -> StoreResult<bool>;

    /// Mark a `processed` order as being dispatched. Fails while another
    /// claim newer than `stale_before` is held. Any status update clears it.
    fn claim_dispatch(&self, id: &str, stale_before: DateTime<Utc>) -> StoreResult<bool>;

    fn release_dispatch(&self, id: &str) -> StoreResult<()>;
}

pub trait ReviewQueue: Send + Sync {
    fn insert_unresolved(&self, entry: &UnresolvedCodeEntry) -> StoreResult<()>;

    fn get_unresolved(&self, id: &str) -> StoreResult<Option<UnresolvedCodeEntry>>;

    fn list_unresolved(&self, filter: &UnresolvedFilter) -> StoreResult<Vec<UnresolvedCodeEntry>>;

    /// Most recent entry for this (document, external code), any status.
    fn find_unresolved(
        &self,
        source_document_id: &str,
        external_code: &str,
    ) -> StoreResult<Option<UnresolvedCodeEntry>>;

    fn resolve_entry_if_pending(
        &self,
        id: &str,
        status: ReviewStatus,
        resolved_product_id: Option<&str>,
    ) -> StoreResult<bool>;
}

/// Append-only audit trail.
pub trait AuditLog: Send + Sync {
    fn record(&self, event: &Event) -> StoreResult<()>;

    fn events_for(&self, entity_type: &str, entity_id: &str) -> StoreResult<Vec<Event>>;
}

/// Everything the lifecycle controller needs from storage.
pub trait Store: CatalogStore + OrderStore + ReviewQueue + AuditLog {}

impl<T: CatalogStore + OrderStore + ReviewQueue + AuditLog> Store for T {}
