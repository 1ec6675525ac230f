use std::time::Duration;

use thiserror::Error;

/// The crate's error type.
///
/// `Clone` is required because a single in-flight acquisition or generation
/// call hands the same outcome to every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// The caller supplied a request that can never succeed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No usable session could be obtained without user interaction.
    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),

    /// The acquisition the caller was waiting on was cancelled.
    #[error("Authentication cancelled")]
    AuthenticationCancelled,

    /// A non-authentication failure reported by the remote service.
    #[error("Remote service error ({status:?}): {message}")]
    RemoteService {
        /// HTTP status reported by the remote side, when one exists.
        status: Option<u16>,
        /// Diagnostic message.
        message: String,
    },

    /// The remote service kept throttling after every retry.
    #[error("Rate limited by remote service (retry after {retry_after:?})")]
    RateLimited {
        /// The last backoff hint received from the remote side.
        retry_after: Option<Duration>,
    },

    /// The credential store could not be written.
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// An encryption error.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// An internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::StorageFailure(e.to_string())
    }
}

impl AppError {
    /// Returns `true` if the host has to involve the user to recover.
    pub fn requires_user(&self) -> bool {
        matches!(
            self,
            AppError::AuthenticationRequired(_) | AppError::AuthenticationCancelled
        )
    }

    /// Logs the error at the severity its variant deserves.
    pub fn log(&self) {
        match self {
            AppError::InvalidInput(msg) => {
                tracing::debug!("Invalid input: {}", msg);
            }

            AppError::AuthenticationRequired(msg) => {
                tracing::warn!("🔐 Authentication required: {}", msg);
            }

            AppError::AuthenticationCancelled => {
                tracing::info!("Authentication cancelled");
            }

            AppError::RemoteService { status, message } => {
                tracing::error!("Remote service error ({:?}): {}", status, message);
            }

            AppError::RateLimited { retry_after } => {
                tracing::warn!("Rate limited (retry after {:?})", retry_after);
            }

            AppError::StorageFailure(msg) => {
                tracing::error!("❌ Storage failure: {}", msg);
            }

            AppError::Encryption(msg) => {
                tracing::error!("Encryption error: {}", msg);
            }

            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
            }
        }
    }
}
