// Order Reconciliation - Core Library
// Exposes all modules for use in the CLI, the API server, and tests

pub mod config;
pub mod db;
pub mod deduplication;  // Duplicate Detector
pub mod document;       // Sales order document + dispatch boundary
pub mod entities;
pub mod error;
pub mod lifecycle;      // Order Lifecycle Controller
pub mod pricing;        // Price Validator
pub mod quantity;       // Quantity Normalizer
pub mod resolver;       // Code Resolver
pub mod store;
pub mod validation;

// Re-export commonly used types
pub use config::{AppConfig, PipelineConfig, ServerConfig};
pub use db::{
    Event, ImportSummary, SqliteStore,
    get_events_for_entity, insert_event, load_products_csv, setup_database,
};
pub use deduplication::{content_fingerprint, normalize_order_number, DuplicateDetector, MatchFields};
pub use document::{
    CsvDocumentWriter, DispatchReceipt, DocumentDispatcher, SalesOrderDocument, SalesOrderLine,
};
pub use entities::{
    Confidence, CounterpartyProductMapping, CounterpartyType, DocumentKind, DuplicateMatchResult,
    IncomingOrder, LineItem, LineResolution, MatchType, MismatchReason, NewProduct, OrderIntake,
    OrderStatus, PriceMismatchLine, Product, ResolutionMethod, ReviewStatus, SourceMetadata,
    UnresolvedCodeEntry, UnresolvedFilter,
};
pub use error::{DispatchError, ReconcileError, ReconcileResult, StoreError, StoreResult};
pub use lifecycle::{ApprovalOutcome, ConversionOutcome, OrderLifecycleController};
pub use pricing::{PriceCheck, PriceValidator};
pub use quantity::{normalize_quantity, NormalizedQuantity};
pub use resolver::{similarity, CodeResolver, LineOutcome, ResolutionSummary, Suggestion};
pub use store::{AuditLog, CatalogStore, OrderStore, ReviewQueue, Store};
pub use validation::{validate_intake, validate_product, ValidationError, ValidationErrors};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
