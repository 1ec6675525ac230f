//! Boundary to whatever produces credentials: usually an embedded browser
//! the user logs in through, plus an optional silent refresh call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::session::Credential;

/// Result of a full, possibly interactive, authentication.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub credential: Credential,
    pub expires_at: DateTime<Utc>,
    pub identity_hint: Option<String>,
}

/// Result of a silent refresh.
#[derive(Debug, Clone)]
pub struct RefreshedCredential {
    pub credential: Credential,
    pub expires_at: DateTime<Utc>,
}

/// Why a full authentication did not produce a credential.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthenticatorError {
    /// The user closed the authentication surface.
    #[error("authentication cancelled by user")]
    Cancelled,

    #[error("authentication failed: {0}")]
    Failed(String),
}

/// Why a silent refresh did not produce a credential.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// The remote side offers no silent refresh.
    #[error("silent refresh not supported")]
    Unsupported,

    /// Account access was revoked; refreshing again cannot help.
    #[error("credential revoked: {0}")]
    Revoked(String),

    /// The remote side wants the user to consent again.
    #[error("interactive re-consent required: {0}")]
    InteractionRequired(String),

    /// Network or server hiccup; worth retrying.
    #[error("transient refresh failure: {0}")]
    Transient(String),
}

impl RefreshError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RefreshError::Transient(_))
    }
}

/// Produces fresh credentials for the session manager.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Runs the full authentication flow, which may involve the user.
    ///
    /// `cancel` fires when the host abandons the attempt (logout, shutdown,
    /// explicit cancellation); implementations should close their surface
    /// and return [`AuthenticatorError::Cancelled`].
    async fn authenticate(
        &self,
        cancel: CancellationToken,
    ) -> Result<IssuedCredential, AuthenticatorError>;

    /// Exchanges an existing credential for a new one without interaction.
    async fn refresh(&self, _existing: &Credential) -> Result<RefreshedCredential, RefreshError> {
        Err(RefreshError::Unsupported)
    }
}
