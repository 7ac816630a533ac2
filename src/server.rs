//! HTTP query server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/query` | Answer `{question, conversation?}` |
//! | `GET`  | `/api/recommendations` | Current trend recommendations |
//! | `GET`  | `/api/metadata` | Products, locations, months, parse report |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Every failure is a non-2xx status with a JSON body:
//!
//! ```json
//! { "error": "question must not be empty" }
//! ```
//!
//! | Status | Cause |
//! |--------|-------|
//! | 400 | Empty or oversized question, malformed body |
//! | 429 | Client exceeded the rolling rate-limit window |
//! | 502 | Dataset fetch failed or returned nothing |
//! | 500 | Anything else |
//!
//! `/api/*` routes are rate-limited per client IP. CORS permits all
//! origins, methods, and headers.

use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use sales_insight_core::intent::ConversationTurn;
use sales_insight_core::recommend::Recommendation;
use sales_insight_core::store::memory::InMemoryKvStore;
use sales_insight_core::store::KvStore;

use crate::config::{Config, Credentials};
use crate::error::ServiceError;
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::service::{InsightService, MetadataResponse, QueryResponse};

/// Shared state passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<InsightService>,
    pub limiter: Arc<RateLimiter>,
}

/// Build the service from configuration and serve until terminated.
pub async fn run_server(config: &Config, credentials: &Credentials) -> anyhow::Result<()> {
    let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
    let service = InsightService::from_config(config, credentials, store.clone())?;
    let state = AppState {
        service: Arc::new(service),
        limiter: Arc::new(RateLimiter::new(store, &config.rate_limit)),
    };

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "query server listening");
    serve(listener, state).await
}

/// Serve `state` on an already-bound listener.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/query", post(handle_query))
        .route("/api/recommendations", get(handle_recommendations))
        .route("/api/metadata", get(handle_metadata))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    message: String,
    retry_after_secs: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::Source(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Config(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        let retry_after_secs = match &err {
            ServiceError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        AppError {
            status,
            message: err.to_string(),
            retry_after_secs,
        }
    }
}

async fn enforce_rate_limit(state: &AppState, addr: SocketAddr) -> Result<(), AppError> {
    let decision = state
        .limiter
        .check(&addr.ip().to_string())
        .await
        .map_err(ServiceError::Internal)?;
    match decision {
        RateDecision::Allowed { .. } => Ok(()),
        RateDecision::Limited { retry_after_secs } => {
            Err(ServiceError::RateLimited { retry_after_secs }.into())
        }
    }
}

// ============ POST /api/query ============

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub conversation: Vec<ConversationTurn>,
}

async fn handle_query(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Result<Json<QueryRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    enforce_rate_limit(&state, addr).await?;
    let Json(request) = body.map_err(|e| ServiceError::BadRequest(e.body_text()))?;
    let response = state
        .service
        .ask(&request.question, &request.conversation)
        .await?;
    Ok(Json(response))
}

// ============ GET /api/recommendations ============

#[derive(Serialize)]
struct RecommendationsResponse {
    recommendations: Vec<Recommendation>,
}

async fn handle_recommendations(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Json<RecommendationsResponse>, AppError> {
    enforce_rate_limit(&state, addr).await?;
    let recommendations = state.service.recommendations().await?;
    Ok(Json(RecommendationsResponse { recommendations }))
}

// ============ GET /api/metadata ============

async fn handle_metadata(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Json<MetadataResponse>, AppError> {
    enforce_rate_limit(&state, addr).await?;
    Ok(Json(state.service.metadata().await?))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
