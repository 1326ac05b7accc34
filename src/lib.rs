//! Tollbooth - In-Process Request Rate Limiting
//!
//! This crate implements a fixed-window rate limiter that throttles requests
//! per client key without any external store, plus a small axum service
//! that puts the limiter in front of every route.

pub mod config;
pub mod error;
pub mod http;
pub mod jobs;
pub mod ratelimit;
