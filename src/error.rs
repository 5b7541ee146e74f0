// Error taxonomy for the reconciliation core
//
// Storage and dispatch failures stay on separate channels: a failed dispatch
// never rewrites the reconciliation status that was already committed.

use crate::entities::OrderStatus;
use crate::validation::ValidationErrors;

/// Failures raised by a store implementation.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to (de)serialize stored record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unique constraint violated: {0}")]
    Conflict(String),
}

/// Failures from the external document channel (generation or delivery).
#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("failed to write sales order document: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode sales order document: {0}")]
    Csv(#[from] csv::Error),
    #[error("dispatcher rejected sales order {so_number}: {reason}")]
    Rejected { so_number: String, reason: String },
}

/// Errors surfaced by the lifecycle controller and review operations.
#[derive(thiserror::Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("order {order_id} is {actual:?}, expected {expected}")]
    InvalidTransition {
        order_id: String,
        actual: OrderStatus,
        expected: &'static str,
    },
    #[error("{0} is irreversible and requires explicit confirmation")]
    ConfirmationRequired(&'static str),
    #[error("unresolved code {entry_id} was already {status}")]
    AlreadyResolved { entry_id: String, status: String },
    #[error("order {0} is already being converted")]
    DispatchInProgress(String),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl ReconcileError {
    pub fn not_found(entity: &'static str, id: &str) -> Self {
        ReconcileError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type ReconcileResult<T> = Result<T, ReconcileError>;
