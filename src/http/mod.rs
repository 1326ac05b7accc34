//! HTTP front end: key extraction, rate limiting middleware and routes.

pub mod key;
pub mod middleware;
pub mod server;

pub use key::{HeaderKey, KeyExtractor, KeySource, PeerIp};
pub use middleware::{enforce_rate_limit, ClientKey, RateLimitLayerState, TooManyRequests};
pub use server::{router, HttpServer};
