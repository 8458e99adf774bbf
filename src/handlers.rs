use crate::config::Config;
use crate::errors::AppError;
use crate::models::*;
use crate::registry::RegistryClient;
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Registry client; clones share one cached credential.
    pub registry: RegistryClient,
}

/// Registry-backed API routes, without state or middleware.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/v1/protocolos",
            get(list_protocols).post(submit_protocol),
        )
        .route("/api/v1/protocolos/lote", post(submit_protocol_batch))
        .route(
            "/api/v1/protocolos/:hash",
            get(detail_protocol).delete(delete_protocol),
        )
        .route(
            "/api/v1/protocolos/:hash/cobranca",
            post(generate_automated_billing),
        )
        .route(
            "/api/v1/cobrancas/tipos-pagamento",
            get(list_payment_types),
        )
        .route("/api/v1/cobrancas/:hash", get(detail_billing))
        .route("/api/v1/cobrancas/:hash/cancelar", post(cancel_billing))
        .route("/api/v1/cobrancas/:hash/pix/devolucao", post(refund_pix))
}

/// Full application router with the health check, without middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api_routes())
        .with_state(state)
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-cartorio-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// GET /api/v1/protocolos
///
/// Lists one page of protocols; query filters are forwarded verbatim.
pub async fn list_protocols(
    State(state): State<Arc<AppState>>,
    Query(filters): Query<ProtocolFilters>,
) -> Result<Json<Page<Protocol>>, AppError> {
    tracing::info!("GET /protocolos - filters: {:?}", filters);
    let page = state.registry.protocols().list_protocols(&filters).await?;
    Ok(Json(page))
}

/// GET /api/v1/protocolos/:hash
pub async fn detail_protocol(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<Json<Protocol>, AppError> {
    tracing::info!("GET /protocolos/{}", hash);
    let protocol = state.registry.protocols().detail_protocol(&hash).await?;
    Ok(Json(protocol))
}

/// POST /api/v1/protocolos
pub async fn submit_protocol(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ProtocolRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmissionResult>), AppError> {
    let request = json_body(payload)?;
    tracing::info!(
        "POST /protocolos - tipoSolicitacao {}",
        request.tipo_solicitacao
    );
    let result = state.registry.protocols().submit_protocol(&request).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// POST /api/v1/protocolos/lote
pub async fn submit_protocol_batch(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ProtocolBatchRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BatchSubmissionResult>), AppError> {
    let request = json_body(payload)?;
    tracing::info!("POST /protocolos/lote - {} protocolo(s)", request.protocolos.len());
    let result = state
        .registry
        .protocols()
        .submit_protocol_batch(&request)
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// DELETE /api/v1/protocolos/:hash
pub async fn delete_protocol(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<Json<OperationAck>, AppError> {
    tracing::info!("DELETE /protocolos/{}", hash);
    let ack = state.registry.protocols().delete_protocol(&hash).await?;
    Ok(Json(ack))
}

/// POST /api/v1/protocolos/:hash/cobranca
///
/// Generates the automated billing for a protocol. An empty body means no
/// parameters; a body that is present must be a valid request.
pub async fn generate_automated_billing(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Billing>), AppError> {
    tracing::info!("POST /protocolos/{}/cobranca", hash);
    let request = optional_json_body::<AutomatedBillingRequest>(&body)?;
    let billing = state
        .registry
        .protocols()
        .generate_automated_billing(&hash, &request)
        .await?;
    Ok((StatusCode::CREATED, Json(billing)))
}

/// GET /api/v1/cobrancas/:hash
pub async fn detail_billing(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<Json<Billing>, AppError> {
    tracing::info!("GET /cobrancas/{}", hash);
    let billing = state.registry.billing().detail_billing(&hash).await?;
    Ok(Json(billing))
}

/// POST /api/v1/cobrancas/:hash/cancelar
pub async fn cancel_billing(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<Json<OperationAck>, AppError> {
    tracing::info!("POST /cobrancas/{}/cancelar", hash);
    let ack = state.registry.billing().cancel_billing(&hash).await?;
    Ok(Json(ack))
}

/// GET /api/v1/cobrancas/tipos-pagamento
pub async fn list_payment_types(
    State(state): State<Arc<AppState>>,
    Query(filters): Query<PaymentTypeFilters>,
) -> Result<Json<Page<PaymentType>>, AppError> {
    tracing::info!("GET /cobrancas/tipos-pagamento - filters: {:?}", filters);
    let page = state.registry.billing().list_payment_types(&filters).await?;
    Ok(Json(page))
}

/// POST /api/v1/cobrancas/:hash/pix/devolucao
pub async fn refund_pix(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
    payload: Result<Json<PixRefundRequest>, JsonRejection>,
) -> Result<Json<PixRefundResult>, AppError> {
    let request = json_body(payload)?;
    tracing::info!("POST /cobrancas/{}/pix/devolucao - valor {}", hash, request.valor);
    let result = state.registry.billing().refund_pix(&hash, &request).await?;
    Ok(Json(result))
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

fn optional_json_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {}", e)))
}
