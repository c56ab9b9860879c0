use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::storage::KeyValueStore;

/// Key of the CSRF value written by the server-rendered shell
pub const CSRF_TOKEN_KEY: &str = "csrf_token";

/// Suffix of the key holding a token's expiry timestamp
const EXPIRES_SUFFIX: &str = "_expires";

/// Which store a credential lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Ends with the process
    Session,
    /// Survives restarts ("remember me")
    Durable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub store: StoreKind,
}

impl Credential {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn time_until_expiry_at(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Minutes remaining until expiry (for display)
    pub fn minutes_until_expiry_at(&self, now: DateTime<Utc>) -> i64 {
        self.time_until_expiry_at(now).num_minutes().max(0)
    }
}

/// Holds the authentication token and its expiry.
///
/// Writes go to the durable store when the user asked to be remembered and
/// to the session store otherwise; the other store is cleared so only one
/// credential exists at a time. Reads prefer the durable store. An expired
/// token is removed from both stores on read.
///
/// Store failures are logged and treated as "no token".
pub struct TokenManager {
    session: Arc<dyn KeyValueStore>,
    durable: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    token_key: String,
    expires_key: String,
    session_timeout: Duration,
    refresh_buffer: Duration,
}

impl TokenManager {
    pub fn new(
        session: Arc<dyn KeyValueStore>,
        durable: Arc<dyn KeyValueStore>,
        config: &SessionConfig,
    ) -> Self {
        Self::with_clock(session, durable, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        session: Arc<dyn KeyValueStore>,
        durable: Arc<dyn KeyValueStore>,
        config: &SessionConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            session,
            durable,
            clock,
            token_key: config.token_key.clone(),
            expires_key: format!("{}{}", config.token_key, EXPIRES_SUFFIX),
            session_timeout: config.session_timeout(),
            refresh_buffer: config.refresh_buffer(),
        }
    }

    pub fn token_key(&self) -> &str {
        &self.token_key
    }

    pub fn expires_key(&self) -> &str {
        &self.expires_key
    }

    /// Store a new token valid for the configured session timeout.
    pub fn set_token(&self, token: &str, remember: bool) {
        let expires_at = self.clock.now() + self.session_timeout;
        let (target, other, kind) = if remember {
            (&self.durable, &self.session, StoreKind::Durable)
        } else {
            (&self.session, &self.durable, StoreKind::Session)
        };

        let expires_ms = expires_at.timestamp_millis().to_string();
        let result = target
            .set(&self.token_key, token)
            .and_then(|_| target.set(&self.expires_key, &expires_ms));
        if let Err(e) = result {
            warn!(error = %e, store = ?kind, "Failed to store token");
            return;
        }

        // A token left in the other store would shadow or outlive this one
        self.clear_store(other.as_ref());
        debug!(store = ?kind, expires_at = %expires_at, "Stored token");
    }

    /// The live token, if any. Expired tokens are cleared from both stores.
    pub fn get_token(&self) -> Option<String> {
        self.credential().map(|c| c.token)
    }

    /// The live credential with its expiry and location.
    pub fn credential(&self) -> Option<Credential> {
        let credential = self
            .read(self.durable.as_ref(), StoreKind::Durable)
            .or_else(|| self.read(self.session.as_ref(), StoreKind::Session))?;

        match credential {
            Ok(credential) if !credential.is_expired_at(self.clock.now()) => Some(credential),
            Ok(credential) => {
                debug!(
                    store = ?credential.store,
                    expired_at = %credential.expires_at,
                    "Token expired"
                );
                self.clear_token();
                None
            }
            Err(store) => {
                warn!(store = ?store, "Token has no valid expiry, discarding");
                self.clear_token();
                None
            }
        }
    }

    /// Remove token and expiry from both stores.
    pub fn clear_token(&self) {
        self.clear_store(self.session.as_ref());
        self.clear_store(self.durable.as_ref());
    }

    /// True when no live token exists. Clears an expired token as a side effect.
    pub fn is_token_expired(&self) -> bool {
        self.get_token().is_none()
    }

    /// Remaining validity of the live token
    pub fn time_until_expiry(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.credential().map(|c| c.time_until_expiry_at(now))
    }

    /// Whether the live token expires within the refresh buffer
    pub fn needs_refresh(&self) -> bool {
        self.time_until_expiry()
            .map(|remaining| remaining <= self.refresh_buffer)
            .unwrap_or(false)
    }

    /// CSRF value for outgoing requests. Read-only; the server shell writes it.
    pub fn csrf_token(&self) -> Option<String> {
        for store in [&self.session, &self.durable] {
            match store.get(CSRF_TOKEN_KEY) {
                Ok(Some(value)) if !value.is_empty() => return Some(value),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Failed to read CSRF token"),
            }
        }
        None
    }

    /// Read the credential from one store.
    /// `None` when no token is there, `Err` when the token has no usable expiry.
    fn read(
        &self,
        store: &dyn KeyValueStore,
        kind: StoreKind,
    ) -> Option<Result<Credential, StoreKind>> {
        let token = match store.get(&self.token_key) {
            Ok(Some(token)) => token,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, store = ?kind, "Failed to read token");
                return None;
            }
        };

        let expires_at = store
            .get(&self.expires_key)
            .ok()
            .flatten()
            .and_then(|raw| raw.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis);

        Some(match expires_at {
            Some(expires_at) => Ok(Credential {
                token,
                expires_at,
                store: kind,
            }),
            None => Err(kind),
        })
    }

    fn clear_store(&self, store: &dyn KeyValueStore) {
        for key in [&self.token_key, &self.expires_key] {
            if let Err(e) = store.remove(key) {
                warn!(error = %e, key = %key, "Failed to remove token key");
            }
        }
    }
}
