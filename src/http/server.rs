//! HTTP server implementation.

use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use super::middleware::{enforce_rate_limit, ClientKey, RateLimitLayerState};
use crate::error::Result;
use crate::jobs::{EmailJob, JobQueue};

/// State shared by the route handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: JobQueue,
}

/// Build the application router with the rate limiter wrapped around every route.
pub fn router(limit: RateLimitLayerState, jobs: JobQueue) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/send-email", post(send_email_handler))
        .fallback(echo_handler)
        .with_state(AppState { jobs })
        .layer(middleware::from_fn_with_state(limit, enforce_rate_limit))
}

async fn echo_handler(Extension(ClientKey(key)): Extension<ClientKey>) -> String {
    format!("Your IP: {} - Request received", key)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn send_email_handler(State(state): State<AppState>, Json(job): Json<EmailJob>) -> Response {
    match state.jobs.enqueue(job) {
        Ok(id) => {
            info!(job_id = id, "Email job added to queue");
            (StatusCode::OK, "Email job added to queue!").into_response()
        }
        Err(e) => {
            warn!(error = %e, "Rejected email job");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "message": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// HTTP server for the rate limited service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    limit: RateLimitLayerState,
    jobs: JobQueue,
}

impl HttpServer {
    /// Create a new server.
    pub fn new(addr: SocketAddr, limit: RateLimitLayerState, jobs: JobQueue) -> Self {
        Self { addr, limit, jobs }
    }

    /// Bind and serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            e
        })?;

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        let app = router(self.limit, self.jobs);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}
