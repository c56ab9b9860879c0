//! Procura core library.
//!
//! Session and security utilities for the procurement front-end:
//!
//! - [`auth`]: bearer token storage with expiry (`TokenManager`)
//! - [`idle`]: idle-session detection driven by user activity (`IdleTimer`)
//! - [`rate_limit`]: per-identifier attempt limiting (`RateLimiter`)
//! - [`executor`]: request throttling and 429 retry (`RateLimitedExecutor`)
//! - [`validation`]: form validation and free-text sanitization
//! - [`api`]: HTTP client that ties the token and executor together
//! - [`storage`]: session-scoped and durable key-value stores
//! - [`config`]: persisted configuration with environment overrides
//!
//! Services are constructed explicitly and passed to whatever needs them;
//! there are no process-wide instances.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod executor;
pub mod idle;
pub mod rate_limit;
pub mod storage;
pub mod validation;

pub use api::{ApiClient, ApiError};
pub use auth::{Credential, StoreKind, TokenManager};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, SessionConfig};
pub use executor::{RateLimitSignal, RateLimitedExecutor};
pub use idle::{ActivityBus, ActivityEvent, IdleState, IdleTimer};
pub use rate_limit::{AttemptWindow, RateLimiter};
pub use storage::{FileStore, KeyValueStore, KeyringStore, MemoryStore, StorageError};
pub use validation::{ProductForm, ValidationResult};
