//! REST API Handlers
//!
//! Exposes the registry chains over HTTP: register, find and unregister for
//! each entry kind, plus health and metrics endpoints.
//!
//! Request headers prefixed with `x-registry-` become call metadata and the
//! metadata left after the call is echoed back as response headers. An
//! `Authorization: Bearer` token is handed to the chain as the caller token.

use crate::api::{is_metadata_key, BEARER_PREFIX};
use crate::chain::Chain;
use crate::domain::{CallContext, EntryKind, Query, RegistryEntry};
use crate::error::Error;
use crate::health::ServingStatus;
use crate::registry::{collect_entries, MemoryRegistry};
use axum::{
    extract::{Json, Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<&Error> for ApiErrorResponse {
    fn from(e: &Error) -> Self {
        Self {
            error: e.code().to_string(),
            message: e.to_string(),
            details: None,
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub service: String,
    pub status: ServingStatus,
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    registry: Arc<MemoryRegistry>,
    request_timeout: Duration,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(registry: Arc<MemoryRegistry>, request_timeout: Duration) -> Self {
        Self {
            registry,
            request_timeout,
        }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
        };

        Router::new()
            // Registry endpoints
            .nest(
                &format!("/v1/{}", EntryKind::Ns),
                kind_routes(self.registry.service_chain(), self.request_timeout),
            )
            .nest(
                &format!("/v1/{}", EntryKind::Nse),
                kind_routes(self.registry.endpoint_chain(), self.request_timeout),
            )
            // Health endpoints
            .route("/v1/health/:service", get(service_health))
            .route("/healthz", get(health_check))
            // Metrics endpoint
            .route("/metrics", get(metrics))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    registry: Arc<MemoryRegistry>,
}

/// State of the routes of one entry kind
struct KindState<E: RegistryEntry> {
    chain: Chain<E>,
    timeout: Duration,
}

impl<E: RegistryEntry> Clone for KindState<E> {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            timeout: self.timeout,
        }
    }
}

fn kind_routes<E: RegistryEntry, S>(chain: Chain<E>, timeout: Duration) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/register", post(register::<E>))
        .route("/find", post(find::<E>))
        .route("/unregister", post(unregister::<E>))
        .with_state(KindState { chain, timeout })
}

// =============================================================================
// Call Context Mapping
// =============================================================================

/// Build the call context of a request from its headers
fn call_context(headers: &HeaderMap) -> CallContext {
    let mut ctx = CallContext::new();

    for (name, value) in headers {
        if !is_metadata_key(name.as_str()) {
            continue;
        }
        match value.to_str() {
            Ok(value) => {
                ctx.metadata.insert(name.as_str().to_string(), value.to_string());
            }
            Err(_) => debug!(header = %name, "Skipping non-text metadata header"),
        }
    }

    ctx.token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(str::to_string);

    ctx
}

/// Attach the metadata left in `ctx` to a response
fn with_metadata(ctx: &CallContext, response: impl IntoResponse) -> Response {
    let mut response = response.into_response();
    for (key, value) in &ctx.metadata {
        if !is_metadata_key(key) {
            continue;
        }
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => warn!(key = %key, "Dropping metadata that is not a valid header"),
        }
    }
    response
}

fn error_response(ctx: &CallContext, e: &Error) -> Response {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        warn!(error = %e, code = e.code(), "Registry call failed");
    } else {
        debug!(error = %e, code = e.code(), "Registry call rejected");
    }
    with_metadata(ctx, (status, Json(ApiErrorResponse::from(e))))
}

/// Run a chain call under the request timeout
async fn with_timeout<T>(
    timeout: Duration,
    call: impl Future<Output = crate::error::Result<T>>,
) -> crate::error::Result<T> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| Error::Timeout(timeout))?
}

// =============================================================================
// Registry Handlers
// =============================================================================

/// Register an entry
async fn register<E: RegistryEntry>(
    State(state): State<KindState<E>>,
    headers: HeaderMap,
    Json(entry): Json<E>,
) -> Response {
    let mut ctx = call_context(&headers);
    debug!(kind = %E::KIND, name = entry.name(), "Register");

    match with_timeout(state.timeout, state.chain.register(&mut ctx, entry)).await {
        Ok(entry) => with_metadata(&ctx, (StatusCode::OK, Json(entry))),
        Err(e) => error_response(&ctx, &e),
    }
}

/// Find entries matching a query; watch queries need a streaming transport
async fn find<E: RegistryEntry>(
    State(state): State<KindState<E>>,
    headers: HeaderMap,
    Json(query): Json<Query<E>>,
) -> Response {
    let mut ctx = call_context(&headers);

    if query.watch {
        let e = Error::Validation("watch is not supported over REST".into());
        return error_response(&ctx, &e);
    }

    let result = with_timeout(state.timeout, async {
        let stream = state.chain.find(&mut ctx, query).await?;
        collect_entries(stream).await
    })
    .await;

    match result {
        Ok(entries) => with_metadata(&ctx, (StatusCode::OK, Json(entries))),
        Err(e) => error_response(&ctx, &e),
    }
}

/// Unregister an entry
async fn unregister<E: RegistryEntry>(
    State(state): State<KindState<E>>,
    headers: HeaderMap,
    Json(entry): Json<E>,
) -> Response {
    let mut ctx = call_context(&headers);
    debug!(kind = %E::KIND, name = entry.name(), "Unregister");

    match with_timeout(state.timeout, state.chain.unregister(&mut ctx, entry)).await {
        Ok(()) => with_metadata(&ctx, StatusCode::NO_CONTENT),
        Err(e) => error_response(&ctx, &e),
    }
}

// =============================================================================
// Health and Metrics Handlers
// =============================================================================

/// Serving status of one logical service
async fn service_health(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> impl IntoResponse {
    let status = state.registry.health().status(&service);
    let code = match status {
        ServingStatus::Serving => StatusCode::OK,
        ServingStatus::NotServing => StatusCode::SERVICE_UNAVAILABLE,
        ServingStatus::ServiceUnknown => StatusCode::NOT_FOUND,
    };
    (code, Json(HealthResponse { service, status }))
}

/// Liveness of the whole registry
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.registry.health().is_serving() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT_SERVING")
    }
}

/// Prometheus text exposition
async fn metrics(State(state): State<AppState>) -> Response {
    match state.registry.metrics().encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiErrorResponse::from(&e)),
        )
            .into_response(),
    }
}
