//! # Job Gateway HTTP Service
//!
//! HTTP server receiving job webhooks and dispatching them to allow-listed
//! job functions.
//!
//! This service provides:
//! - the webhook endpoint (`POST /webhook` by default), authenticated by HMAC
//!   signature or legacy token
//! - a liveness endpoint (`GET /health`)

pub mod config;
pub mod errors;

pub use config::{
    GoogleConfig, JobsConfig, LoggingConfig, ServerConfig, ServiceConfig, SlackConfig,
    WebhookConfig,
};
pub use errors::{ConfigError, GatewayError, ServiceError};

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, HeaderValue},
    middleware,
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use job_gateway_core::auth::{AuthHeaders, SIGNATURE_HEADER, TIMESTAMP_HEADER, TOKEN_HEADER};
use job_gateway_core::{DispatchRequest, JobDispatcher, WebhookAuthenticator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info, instrument, warn};

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the service
    pub config: Arc<ServiceConfig>,

    /// Request authentication
    pub authenticator: Arc<WebhookAuthenticator>,

    /// Allow-list enforcement and job execution
    pub dispatcher: Arc<JobDispatcher>,
}

impl AppState {
    /// Create application state, building the authenticator from the webhook
    /// settings
    pub fn new(config: ServiceConfig, dispatcher: JobDispatcher) -> Self {
        let authenticator = WebhookAuthenticator::new(
            config.webhook.secret.clone(),
            config.webhook.token.clone(),
        )
        .with_tolerance_seconds(config.webhook.tolerance_seconds);

        Self {
            config: Arc::new(config),
            authenticator: Arc::new(authenticator),
            dispatcher: Arc::new(dispatcher),
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    let max_body_size = state.config.server.max_body_size;

    let webhook_routes =
        Router::new().route(&state.config.webhook.endpoint_path, post(handle_webhook));

    let health_routes = Router::new().route("/health", get(handle_health_check));

    Router::new()
        .merge(webhook_routes)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_logging_middleware))
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(max_body_size))
                .into_inner(),
        )
        .with_state(state)
}

/// Start HTTP server
pub async fn start_server(config: ServiceConfig, dispatcher: JobDispatcher) -> Result<(), ServiceError> {
    config.validate()?;

    let host = config.server.host.clone();
    let port = config.server.port;
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);

    let state = AppState::new(config, dispatcher);
    let app = create_router(state);

    let address = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: address.clone(),
            message: e.to_string(),
        })?;

    info!("Starting HTTP server on {}", address);

    let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel();
    let shutdown_signal = async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C signal handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM signal handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), draining requests for up to {}s", shutdown_timeout.as_secs());
            },
            _ = terminate => {
                info!("Received SIGTERM, draining requests for up to {}s", shutdown_timeout.as_secs());
            },
        }
        let _ = signalled_tx.send(());
    };

    // In-flight requests finish; no new connections are accepted.
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .into_future();
    serve_until_drained(server, signalled_rx, shutdown_timeout).await?;

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Run `server` to completion, but give up on draining once `shutdown_timeout`
/// has passed since the shutdown signal fired.
async fn serve_until_drained<F>(
    server: F,
    signalled: tokio::sync::oneshot::Receiver<()>,
    shutdown_timeout: Duration,
) -> Result<(), ServiceError>
where
    F: Future<Output = std::io::Result<()>>,
{
    let drain_deadline = async move {
        match signalled.await {
            Ok(()) => tokio::time::sleep(shutdown_timeout).await,
            Err(_) => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = server => result.map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        }),
        _ = drain_deadline => {
            warn!(
                "Graceful shutdown exceeded {}s; abandoning in-flight requests",
                shutdown_timeout.as_secs()
            );
            Ok(())
        }
    }
}

// ============================================================================
// Webhook Handler
// ============================================================================

/// Handle a job webhook
///
/// Authentication always runs first, against the raw body bytes. Only an
/// authenticated request is parsed and dispatched.
#[instrument(skip_all)]
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, GatewayError> {
    let mode = state
        .authenticator
        .authenticate(&auth_headers(&headers), &body)?;
    info!(mode = %mode, "Webhook authenticated");

    let request = DispatchRequest::from_body(&body)?;
    let result = state
        .dispatcher
        .dispatch(&request.job, &request.function, request.payload)
        .await?;

    Ok(Json(WebhookResponse::ok(result)))
}

/// Authentication headers; values that are not visible ASCII count as absent
fn auth_headers(headers: &HeaderMap) -> AuthHeaders {
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    AuthHeaders {
        signature: value(SIGNATURE_HEADER),
        timestamp: value(TIMESTAMP_HEADER),
        token: value(TOKEN_HEADER),
    }
}

// ============================================================================
// Health Check Handler
// ============================================================================

/// Liveness check; answers whenever the process serves requests
async fn handle_health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

// ============================================================================
// Middleware
// ============================================================================

/// Tags each request with a correlation id and logs its outcome.
///
/// The caller's `x-correlation-id` is kept when present; otherwise a v4 UUID
/// is assigned. The id is echoed on the response.
#[instrument(skip_all, fields(correlation_id))]
async fn request_logging_middleware(
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let correlation_id = correlation_id(request.headers());
    tracing::Span::current().record("correlation_id", correlation_id.as_str());
    request.extensions_mut().insert(correlation_id.clone());

    let route = format!("{} {}", request.method(), request.uri().path());
    let started = std::time::Instant::now();
    let mut response = next.run(request).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }

    let status = response.status().as_u16();
    match response.status() {
        s if s.is_server_error() => error!(%route, status, elapsed_ms, "Request failed"),
        s if s.is_client_error() => warn!(%route, status, elapsed_ms, "Request rejected"),
        _ => info!(%route, status, elapsed_ms, "Request served"),
    }

    response
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

// ============================================================================
// Responses
// ============================================================================

/// Successful webhook response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub status: String,
    pub result: Value,
}

impl WebhookResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            status: "ok".to_string(),
            result,
        }
    }
}

/// Health check response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
