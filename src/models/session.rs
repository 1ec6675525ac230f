use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{AppError, Result};

/// The serialization/encryption format version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

/// Opaque bearer material (cookie string or token) for the remote service.
///
/// ⚠️ Never log this. `Debug` is redacted and there is no `Display`.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wraps raw bearer material.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Exposes the raw material for the remote call.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl Eq for Credential {}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// The only persisted entity: one authenticated session.
///
/// Invariant: `expires_at > issued_at`. Records are only built through
/// [`SessionRecord::new`] or checked with [`SessionRecord::validate`] after
/// being decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    credential: Credential,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    refresh_buffer: Duration,
    identity_hint: Option<String>,
    schema_version: u32,
}

impl SessionRecord {
    /// Creates a new record stamped with the current schema version.
    ///
    /// # Arguments
    ///
    /// * `credential` - The bearer material.
    /// * `issued_at` - When the credential was obtained.
    /// * `expires_at` - When the remote service stops accepting it.
    /// * `refresh_buffer` - How long before expiry a refresh must begin.
    ///   Capped at half the credential's lifetime, so a short-lived
    ///   credential is usable for a while before its refresh comes due.
    /// * `identity_hint` - Optional non-secret label for diagnostics.
    ///
    /// # Returns
    ///
    /// The record, or `InvalidInput` if `expires_at <= issued_at`.
    pub fn new(
        credential: Credential,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        refresh_buffer: Duration,
        identity_hint: Option<String>,
    ) -> Result<Self> {
        let lifetime = (expires_at - issued_at).to_std().unwrap_or(Duration::ZERO);
        let refresh_buffer = refresh_buffer.min(lifetime / 2);

        let record = Self {
            credential,
            issued_at,
            expires_at,
            refresh_buffer,
            identity_hint,
            schema_version: SCHEMA_VERSION,
        };
        record.validate()?;
        Ok(record)
    }

    /// Checks the record's invariants.
    pub fn validate(&self) -> Result<()> {
        if self.expires_at <= self.issued_at {
            return Err(AppError::InvalidInput(format!(
                "Session expires at {} which is not after its issue time {}",
                self.expires_at, self.issued_at
            )));
        }
        if self.schema_version != SCHEMA_VERSION {
            return Err(AppError::InvalidInput(format!(
                "Unsupported session schema version {}",
                self.schema_version
            )));
        }
        Ok(())
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn refresh_buffer(&self) -> Duration {
        self.refresh_buffer
    }

    pub fn identity_hint(&self) -> Option<&str> {
        self.identity_hint.as_deref()
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// The instant at which proactive refresh must begin.
    pub fn refresh_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.refresh_buffer)
            .ok()
            .and_then(|buffer| self.expires_at.checked_sub_signed(buffer))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Returns `true` once `now` is inside the refresh buffer.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now >= self.refresh_at()
    }

    /// Returns `true` once the remote service presumes the credential invalid.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left until the refresh timer should fire, zero if already due.
    pub fn refresh_delay(&self, now: DateTime<Utc>) -> Duration {
        (self.refresh_at() - now).to_std().unwrap_or(Duration::ZERO)
    }
}
