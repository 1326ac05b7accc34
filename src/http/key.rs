//! Client key extraction.

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

/// Derives the rate limit key for an inbound request.
pub trait KeyExtractor: Send + Sync {
    /// Return the key for a request, or `None` if it cannot be determined.
    fn extract(&self, headers: &HeaderMap, peer: SocketAddr) -> Option<String>;
}

/// Keys requests by the remote socket's IP address.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerIp;

impl KeyExtractor for PeerIp {
    fn extract(&self, _headers: &HeaderMap, peer: SocketAddr) -> Option<String> {
        Some(peer.ip().to_string())
    }
}

/// Keys requests by the first entry of a header, e.g. `x-forwarded-for`.
///
/// Falls back to the peer IP when the header is missing, empty or not
/// valid UTF-8.
#[derive(Debug, Clone)]
pub struct HeaderKey {
    name: String,
}

impl HeaderKey {
    /// Create an extractor reading `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
        }
    }
}

impl KeyExtractor for HeaderKey {
    fn extract(&self, headers: &HeaderMap, peer: SocketAddr) -> Option<String> {
        headers
            .get(self.name.as_str())
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .or_else(|| PeerIp.extract(headers, peer))
    }
}

/// Where the client key comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// The remote socket address
    #[default]
    PeerIp,
    /// A request header, see `RateLimitingConfig::key_header`
    Header,
}

impl KeySource {
    /// Build the extractor for this source.
    pub fn extractor(&self, header: &str) -> Arc<dyn KeyExtractor> {
        match self {
            KeySource::PeerIp => Arc::new(PeerIp),
            KeySource::Header => Arc::new(HeaderKey::new(header)),
        }
    }
}
