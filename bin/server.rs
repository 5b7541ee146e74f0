// Order Reconciliation - Web Server
// REST API for the intake collaborator, the review UI and catalog maintenance

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use order_reconciliation::{
    AppConfig, ConversionOutcome, CounterpartyProductMapping, CsvDocumentWriter, DocumentKind,
    IncomingOrder, NewProduct, OrderIntake, OrderLifecycleController, OrderStatus, Product,
    ReconcileError, SqliteStore, StoreError, UnresolvedFilter,
};

type Controller = OrderLifecycleController<SqliteStore>;

/// Shared application state
#[derive(Clone)]
struct AppState {
    controller: Arc<Controller>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

// ============================================================================
// Request / response bodies
// ============================================================================

#[derive(Deserialize)]
struct OrderQuery {
    kind: Option<DocumentKind>,
    status: Option<OrderStatus>,
}

#[derive(Deserialize, Default)]
struct ConfirmRequest {
    #[serde(default)]
    confirm: bool,
}

#[derive(Deserialize)]
struct ApproveCodeRequest {
    product_id: String,
    #[serde(default)]
    persist_mapping: bool,
}

#[derive(Deserialize)]
struct ApproveNewProductRequest {
    product: NewProduct,
    #[serde(default)]
    persist_mapping: bool,
}

#[derive(Deserialize)]
struct ActiveRequest {
    active: bool,
}

#[derive(Serialize)]
struct ConversionResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    so_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

impl From<ConversionOutcome> for ConversionResponse {
    fn from(outcome: ConversionOutcome) -> Self {
        match outcome {
            ConversionOutcome::Converted { document, receipt } => Self {
                status: "converted",
                so_number: Some(document.so_number),
                total: Some(document.total),
                location: Some(receipt.location),
            },
            ConversionOutcome::AlreadyConverted => Self {
                status: "already_converted",
                so_number: None,
                total: None,
                location: None,
            },
        }
    }
}

#[derive(Serialize)]
struct ApprovalResponse {
    order: IncomingOrder,
    accepted_mismatches: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversion: Option<ConversionResponse>,
    /// Set when the approval stuck but the sales order could not be sent
    #[serde(skip_serializing_if = "Option::is_none")]
    dispatch_error: Option<String>,
}

// ============================================================================
// Plumbing
// ============================================================================

fn status_for(error: &ReconcileError) -> StatusCode {
    match error {
        ReconcileError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ReconcileError::NotFound { .. } => StatusCode::NOT_FOUND,
        ReconcileError::ConfirmationRequired(_) => StatusCode::BAD_REQUEST,
        ReconcileError::InvalidTransition { .. }
        | ReconcileError::AlreadyResolved { .. }
        | ReconcileError::DispatchInProgress(_)
        | ReconcileError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
        ReconcileError::Dispatch(_) => StatusCode::BAD_GATEWAY,
        ReconcileError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Run a controller call on the blocking pool and wrap the result.
async fn run<T, F>(state: AppState, call: F) -> Response
where
    T: Serialize + Send + 'static,
    F: FnOnce(&Controller) -> Result<T, ReconcileError> + Send + 'static,
{
    let controller = state.controller.clone();

    match tokio::task::spawn_blocking(move || call(&controller)).await {
        Ok(Ok(data)) => (StatusCode::OK, Json(ApiResponse::ok(data))).into_response(),
        Ok(Err(e)) => {
            let status = status_for(&e);
            if status.is_server_error() {
                tracing::error!(error = %e, "request failed");
            } else {
                tracing::debug!(error = %e, "request rejected");
            }
            (status, Json(ApiResponse::err(e.to_string()))).into_response()
        }
        Err(join_error) => {
            tracing::error!(error = %join_error, "controller task panicked");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err("internal error".to_string())),
            )
                .into_response()
        }
    }
}

fn decode(segment: String) -> String {
    urlencoding::decode(&segment)
        .map(|s| s.into_owned())
        .unwrap_or(segment)
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/orders - Intake a new order or bill
async fn intake_order(State(state): State<AppState>, Json(intake): Json<OrderIntake>) -> Response {
    run(state, move |c| c.process_intake(intake)).await
}

/// GET /api/orders?kind=&status=
async fn list_orders(State(state): State<AppState>, Query(query): Query<OrderQuery>) -> Response {
    run(state, move |c| c.list_orders(query.kind, query.status)).await
}

/// GET /api/orders/:id
async fn get_order(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    run(state, move |c| c.get_order(&id)).await
}

/// GET /api/orders/:id/events - Audit trail
async fn order_events(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    run(state, move |c| c.order_history(&id)).await
}

/// GET /api/mismatches - Orders awaiting a price decision
async fn list_mismatches(State(state): State<AppState>) -> Response {
    run(state, |c| c.list_price_mismatch_orders()).await
}

/// GET /api/duplicates
async fn list_duplicates(State(state): State<AppState>) -> Response {
    run(state, |c| c.list_duplicate_orders()).await
}

/// POST /api/orders/:id/approve - Accept mismatches, then convert
async fn approve_order(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    run(state, move |c| {
        let outcome = c.approve_order(&id)?;
        let (conversion, dispatch_error) = match outcome.dispatch {
            Ok(conversion) => (Some(conversion.into()), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Ok(ApprovalResponse {
            order: outcome.order,
            accepted_mismatches: outcome.accepted_mismatches,
            conversion,
            dispatch_error,
        })
    })
    .await
}

/// POST /api/orders/:id/reject - body {"confirm": true}
async fn reject_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ConfirmRequest>>,
) -> Response {
    let confirm = body.map(|Json(b)| b.confirm).unwrap_or_default();
    run(state, move |c| c.reject_order(&id, confirm)).await
}

/// POST /api/orders/:id/convert - Generate the sales order (retry-safe)
async fn convert_order(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    run(state, move |c| c.convert_order(&id).map(ConversionResponse::from)).await
}

/// POST /api/orders/:id/revalidate
async fn revalidate_order(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    run(state, move |c| c.revalidate_order(&id)).await
}

/// POST /api/duplicates/:id/delete - body {"confirm": true}
async fn delete_duplicate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ConfirmRequest>>,
) -> Response {
    let confirm = body.map(|Json(b)| b.confirm).unwrap_or_default();
    run(state, move |c| c.delete_duplicate(&id, confirm)).await
}

/// GET /api/unresolved?status=&counterparty_type=&counterparty_id=&source_document_id=
async fn list_unresolved(
    State(state): State<AppState>,
    Query(filter): Query<UnresolvedFilter>,
) -> Response {
    run(state, move |c| c.list_unresolved_codes(&filter)).await
}

/// POST /api/unresolved/:id/approve
async fn approve_code(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ApproveCodeRequest>,
) -> Response {
    run(state, move |c| c.approve_code(&id, &req.product_id, req.persist_mapping)).await
}

/// POST /api/unresolved/:id/approve-new - Create the product, then approve
async fn approve_code_new_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ApproveNewProductRequest>,
) -> Response {
    run(state, move |c| {
        c.approve_code_with_new_product(&id, req.product, req.persist_mapping)
    })
    .await
}

/// POST /api/unresolved/:id/reject
async fn reject_code(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    run(state, move |c| c.reject_code(&id)).await
}

/// POST /api/products
async fn create_product(State(state): State<AppState>, Json(product): Json<NewProduct>) -> Response {
    run(state, move |c| c.create_product(product)).await
}

/// PUT /api/products/:id
async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut product): Json<Product>,
) -> Response {
    product.id = id;
    run(state, move |c| c.update_product(product)).await
}

/// POST /api/products/:id/active - body {"active": false}
async fn set_product_active(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ActiveRequest>,
) -> Response {
    run(state, move |c| c.set_product_active(&id, req.active)).await
}

/// POST /api/mappings - Insert or update a counterparty mapping
async fn create_mapping(
    State(state): State<AppState>,
    Json(mapping): Json<CounterpartyProductMapping>,
) -> Response {
    run(state, move |c| c.create_mapping(mapping)).await
}

/// GET /api/mappings/:counterparty_id
async fn list_mappings(State(state): State<AppState>, Path(counterparty_id): Path<String>) -> Response {
    let counterparty_id = decode(counterparty_id);
    run(state, move |c| c.list_mappings(&counterparty_id)).await
}

/// POST /api/mappings/:counterparty_id/:code/active - body {"active": false}
async fn set_mapping_active(
    State(state): State<AppState>,
    Path((counterparty_id, code)): Path<(String, String)>,
    Json(req): Json<ActiveRequest>,
) -> Response {
    let counterparty_id = decode(counterparty_id);
    let code = decode(code);
    run(state, move |c| c.set_mapping_active(&counterparty_id, &code, req.active)).await
}

// ============================================================================
// Main Server
// ============================================================================

fn load_config() -> anyhow::Result<AppConfig> {
    match std::env::var("RECON_CONFIG") {
        Ok(path) => AppConfig::from_file(&path),
        Err(_) => Ok(AppConfig::from_env()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;

    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("Failed to open database {:?}", config.database_path))?;
    tracing::info!(path = ?config.database_path, "database opened");

    let dispatcher = Arc::new(CsvDocumentWriter::new(&config.dispatch_dir));
    let controller = OrderLifecycleController::new(store, dispatcher, config.pipeline.clone())
        .with_actor("api");

    // Create shared state
    let state = AppState {
        controller: Arc::new(controller),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/orders", post(intake_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/events", get(order_events))
        .route("/orders/:id/approve", post(approve_order))
        .route("/orders/:id/reject", post(reject_order))
        .route("/orders/:id/convert", post(convert_order))
        .route("/orders/:id/revalidate", post(revalidate_order))
        .route("/mismatches", get(list_mismatches))
        .route("/duplicates", get(list_duplicates))
        .route("/duplicates/:id/delete", post(delete_duplicate))
        .route("/unresolved", get(list_unresolved))
        .route("/unresolved/:id/approve", post(approve_code))
        .route("/unresolved/:id/approve-new", post(approve_code_new_product))
        .route("/unresolved/:id/reject", post(reject_code))
        .route("/products", post(create_product))
        .route("/products/:id", put(update_product))
        .route("/products/:id/active", post(set_product_active))
        .route("/mappings", post(create_mapping))
        .route("/mappings/:counterparty_id", get(list_mappings))
        .route("/mappings/:counterparty_id/:code/active", post(set_mapping_active))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("server running on http://{}", addr);
    tracing::info!("   API: http://{}/api/orders", addr);

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
