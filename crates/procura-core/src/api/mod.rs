//! HTTP client for the procurement REST API.
//!
//! This module provides the `ApiClient`, which decorates every outgoing
//! request with the bearer token, the CSRF token and a fixed set of
//! security headers, throttles requests through the
//! `RateLimitedExecutor`, and ends the session on a 401 response.

pub mod client;
pub mod error;

pub use client::{ApiClient, UnauthorizedHook};
pub use error::ApiError;
