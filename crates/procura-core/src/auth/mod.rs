//! Authentication token lifecycle.
//!
//! This module provides:
//! - `TokenManager`: bearer token storage with automatic expiry
//! - `Credential`: a token together with its expiry and location
//!
//! Tokens expire 30 minutes after they are stored unless configured otherwise.

pub mod token;

pub use token::{Credential, StoreKind, TokenManager, CSRF_TOKEN_KEY};
