use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use thiserror::Error;

use crate::models::generation::{GenerationOptions, Prompt, RawResult};
use crate::models::session::Credential;

/// Failure classes the gateway reacts to differently.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The credential was rejected (401/403 class).
    #[error("remote rejected credential: {0}")]
    Auth(String),

    /// Explicit throttling, optionally with a retry hint.
    #[error("remote rate limit (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Anything else.
    #[error("remote server error {status}: {message}")]
    Server { status: StatusCode, message: String },
}

impl RemoteError {
    /// Classifies an HTTP failure.
    ///
    /// # Arguments
    ///
    /// * `status` - The response status, expected to be a non-success code.
    /// * `message` - Body or reason text for diagnostics.
    /// * `retry_after` - Parsed `Retry-After` header, if any.
    pub fn from_status(
        status: StatusCode,
        message: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Auth(message.into()),
            StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited { retry_after },
            _ => RemoteError::Server {
                status,
                message: message.into(),
            },
        }
    }
}

/// The unofficial generation endpoint.
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn call_generate(
        &self,
        credential: &Credential,
        prompt: &Prompt,
        options: &GenerationOptions,
    ) -> Result<RawResult, RemoteError>;
}
