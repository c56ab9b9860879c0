//! API client for the procurement backend.
//!
//! Every request carries the headers built by `request_headers` and runs
//! through the shared `RateLimitedExecutor`. A 401 response clears the
//! stored token and hands the login route to the unauthorized hook so the
//! UI can navigate there.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::ApiError;
use crate::auth::TokenManager;
use crate::config::SessionConfig;
use crate::executor::RateLimitedExecutor;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum in-flight requests for batched fetches. The executor still
/// spaces their start times.
const MAX_CONCURRENT_REQUESTS: usize = 4;

const CSRF_HEADER: HeaderName = HeaderName::from_static("x-csrf-token");

/// Headers added to every outgoing request
const SECURITY_HEADERS: [(HeaderName, &str); 4] = [
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (header::X_FRAME_OPTIONS, "DENY"),
    (header::X_XSS_PROTECTION, "1; mode=block"),
    (header::REFERRER_POLICY, "strict-origin-when-cross-origin"),
];

/// Called with the login route after a 401 response
pub type UnauthorizedHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Clone is cheap - reqwest::Client, the token manager and the executor
/// are all shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    login_route: String,
    tokens: Arc<TokenManager>,
    executor: Arc<RateLimitedExecutor>,
    on_unauthorized: Option<UnauthorizedHook>,
}

impl ApiClient {
    pub fn new(
        config: &SessionConfig,
        tokens: Arc<TokenManager>,
        executor: Arc<RateLimitedExecutor>,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            login_route: config.login_route.clone(),
            tokens,
            executor,
            on_unauthorized: None,
        })
    }

    /// Register the navigation hook invoked after a 401
    pub fn on_unauthorized(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_unauthorized = Some(Arc::new(hook));
        self
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Headers for an outgoing request: bearer token and CSRF token when
    /// present, plus the security headers.
    pub fn request_headers(&self) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = self.tokens.get_token() {
            headers.insert(
                header::AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }
        if let Some(csrf) = self.tokens.csrf_token() {
            headers.insert(CSRF_HEADER, HeaderValue::from_str(&csrf)?);
        }
        for (name, value) in SECURITY_HEADERS {
            headers.insert(name, HeaderValue::from_static(value));
        }
        Ok(headers)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        let this = self;
        let url = &url;
        self.executor
            .execute(move || async move {
                let response = this
                    .client
                    .get(url)
                    .headers(this.request_headers()?)
                    .send()
                    .await?;
                this.parse_response(response).await
            })
            .await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        let this = self;
        let url = &url;
        self.executor
            .execute(move || async move {
                let response = this
                    .client
                    .post(url)
                    .headers(this.request_headers()?)
                    .json(body)
                    .send()
                    .await?;
                this.parse_response(response).await
            })
            .await
    }

    /// Fetch several resources, keeping results in request order.
    pub async fn get_json_many<T: DeserializeOwned>(
        &self,
        paths: &[&str],
    ) -> Vec<Result<T, ApiError>> {
        stream::iter(paths.iter().copied())
            .map(|path| self.get_json(path))
            .buffered(MAX_CONCURRENT_REQUESTS)
            .collect()
            .await
    }

    async fn parse_response<T: DeserializeOwned>(&self, response: Response) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.error_for_status(status, &body));
        }
        let url = response.url().to_string();
        response.json().await.map_err(|source| {
            warn!(url = %url, error = %source, "Failed to parse JSON response");
            ApiError::Decode { url, source }
        })
    }

    /// Map a failed status to an error. A 401 also ends the session.
    fn error_for_status(&self, status: StatusCode, body: &str) -> ApiError {
        let error = ApiError::from_status(status, body);
        if matches!(error, ApiError::Unauthorized) {
            warn!(login_route = %self.login_route, "Unauthorized response, clearing session");
            self.tokens.clear_token();
            match &self.on_unauthorized {
                Some(hook) => hook(&self.login_route),
                None => debug!("No unauthorized hook registered"),
            }
        }
        error
    }
}
