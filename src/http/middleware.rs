//! Rate limiting middleware for axum.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

use super::key::KeyExtractor;
use crate::ratelimit::{Clock, Decision, RateLimiter};

/// Body message sent with every 429 response.
pub const TOO_MANY_REQUESTS_MESSAGE: &str = "Too many request!. Try again some time later";

/// Bucket shared by requests whose key cannot be determined.
pub const UNKNOWN_KEY: &str = "unknown";

/// The key a request was rate limited under, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey(pub String);

/// Everything the middleware needs to decide on a request.
#[derive(Clone)]
pub struct RateLimitLayerState {
    pub limiter: Arc<RateLimiter>,
    pub clock: Arc<dyn Clock>,
    pub extractor: Arc<dyn KeyExtractor>,
}

impl RateLimitLayerState {
    /// Bundle a limiter with its clock and key extractor.
    pub fn new(
        limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
        extractor: Arc<dyn KeyExtractor>,
    ) -> Self {
        Self {
            limiter,
            clock,
            extractor,
        }
    }
}

/// Rejection returned for denied requests.
#[derive(Debug, Clone, Copy)]
pub struct TooManyRequests;

impl IntoResponse for TooManyRequests {
    fn into_response(self) -> Response {
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "message": TOO_MANY_REQUESTS_MESSAGE })),
        )
            .into_response()
    }
}

/// Check every request against the limiter before it reaches a handler.
///
/// Use with `axum::middleware::from_fn_with_state`.
pub async fn enforce_rate_limit(
    State(state): State<RateLimitLayerState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Response {
    let key = match state.extractor.extract(request.headers(), peer) {
        Some(key) if !key.is_empty() => key,
        _ => {
            debug!(peer = %peer, "No client key, using shared bucket");
            UNKNOWN_KEY.to_string()
        }
    };

    match state.limiter.check(&key, state.clock.now()) {
        Decision::Allow => {
            request.extensions_mut().insert(ClientKey(key));
            next.run(request).await
        }
        Decision::Deny => {
            info!(
                key = %key,
                count = state.limiter.count(&key).unwrap_or_default(),
                path = %request.uri().path(),
                "Blocked client"
            );
            TooManyRequests.into_response()
        }
    }
}
