use reqwest::header::InvalidHeaderValue;
use reqwest::StatusCode;
use thiserror::Error;

use crate::executor::RateLimitSignal;

/// Longest response body carried in a `Status` error
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Error, Debug)]
pub enum ApiError {
    /// 401. The client has already cleared the session by the time this is returned.
    #[error("Session expired or revoked, sign in again")]
    Unauthorized,

    /// 429 after the executor's retries ran out
    #[error("Too many requests, retries exhausted")]
    RateLimited,

    #[error("Request failed with {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Malformed response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),
}

impl ApiError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
            StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited,
            _ => ApiError::Status {
                status,
                body: clip(body),
            },
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Unauthorized => Some(StatusCode::UNAUTHORIZED),
            ApiError::RateLimited => Some(StatusCode::TOO_MANY_REQUESTS),
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Network(e) => e.status(),
            ApiError::Decode { .. } | ApiError::InvalidHeader(_) => None,
        }
    }
}

/// Cut a body down to the limit on a char boundary
fn clip(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes)", &body[..end], body.len())
}

impl RateLimitSignal for ApiError {
    fn is_rate_limited(&self) -> bool {
        self.status() == Some(StatusCode::TOO_MANY_REQUESTS)
    }
}
