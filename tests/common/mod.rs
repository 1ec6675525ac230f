#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use tether::crypto::aes::SecureKey;
use tether::{
    Authenticator, AuthenticatorError, Credential, CredentialVault, GatewayPolicy,
    GenerationGateway, GenerationOptions, IssuedCredential, Prompt, RawResult, RefreshError,
    RefreshedCredential, RemoteError, RemoteService, SessionLifecycleManager, SessionPolicy,
    SessionRecord,
};

pub const IDENTITY: &str = "tester@example.com";

/// Authenticator that counts calls and follows a script.
///
/// Unscripted authentications succeed; unscripted refreshes report
/// `Unsupported`.
pub struct FakeAuthenticator {
    pub authenticate_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    lifetime: chrono::Duration,
    refresh_lifetime: chrono::Duration,
    auth_delay: Duration,
    refresh_delay: Duration,
    block_until_cancelled: bool,
    auth_script: Mutex<VecDeque<AuthenticatorError>>,
    refresh_script: Mutex<VecDeque<Result<(), RefreshError>>>,
}

impl FakeAuthenticator {
    pub fn new() -> Self {
        Self {
            authenticate_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            lifetime: chrono::Duration::hours(1),
            refresh_lifetime: chrono::Duration::hours(1),
            auth_delay: Duration::ZERO,
            refresh_delay: Duration::ZERO,
            block_until_cancelled: false,
            auth_script: Mutex::new(VecDeque::new()),
            refresh_script: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_lifetime(mut self, lifetime: chrono::Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn with_auth_delay(mut self, delay: Duration) -> Self {
        self.auth_delay = delay;
        self
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    /// Authentication waits for the cancellation token, like a login window
    /// the user never completes.
    pub fn blocking_until_cancelled(mut self) -> Self {
        self.block_until_cancelled = true;
        self
    }

    pub fn failing_auth(self, errors: impl IntoIterator<Item = AuthenticatorError>) -> Self {
        self.auth_script.lock().unwrap().extend(errors);
        self
    }

    pub fn scripted_refresh(self, outcomes: impl IntoIterator<Item = Result<(), RefreshError>>) -> Self {
        self.refresh_script.lock().unwrap().extend(outcomes);
        self
    }

    pub fn authentications(&self) -> usize {
        self.authenticate_calls.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn authenticate(
        &self,
        cancel: CancellationToken,
    ) -> Result<IssuedCredential, AuthenticatorError> {
        let n = self.authenticate_calls.fetch_add(1, Ordering::SeqCst) + 1;

        if self.block_until_cancelled {
            cancel.cancelled().await;
            return Err(AuthenticatorError::Cancelled);
        }
        if !self.auth_delay.is_zero() {
            tokio::time::sleep(self.auth_delay).await;
        }
        if let Some(error) = self.auth_script.lock().unwrap().pop_front() {
            return Err(error);
        }

        Ok(IssuedCredential {
            credential: Credential::new(format!("cred-{}", n)),
            expires_at: Utc::now() + self.lifetime,
            identity_hint: Some(IDENTITY.to_string()),
        })
    }

    async fn refresh(&self, _existing: &Credential) -> Result<RefreshedCredential, RefreshError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        let scripted = self.refresh_script.lock().unwrap().pop_front();
        match scripted {
            Some(Ok(())) => Ok(RefreshedCredential {
                credential: Credential::new(format!("refreshed-{}", n)),
                expires_at: Utc::now() + self.refresh_lifetime,
            }),
            Some(Err(e)) => Err(e),
            None => Err(RefreshError::Unsupported),
        }
    }
}

/// Remote service that replays scripted failures, then echoes the prompt.
pub struct ScriptedRemote {
    pub calls: AtomicUsize,
    delay: Duration,
    script: Mutex<VecDeque<RemoteError>>,
    credentials_seen: Mutex<Vec<String>>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            script: Mutex::new(VecDeque::new()),
            credentials_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_with(self, errors: impl IntoIterator<Item = RemoteError>) -> Self {
        self.script.lock().unwrap().extend(errors);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn credentials_seen(&self) -> Vec<String> {
        self.credentials_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteService for ScriptedRemote {
    async fn call_generate(
        &self,
        credential: &Credential,
        prompt: &Prompt,
        _options: &GenerationOptions,
    ) -> Result<RawResult, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.credentials_seen
            .lock()
            .unwrap()
            .push(credential.expose().to_string());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(error) = self.script.lock().unwrap().pop_front() {
            return Err(error);
        }

        Ok(RawResult {
            body: prompt.as_str().as_bytes().to_vec(),
            content_type: Some("text/plain".to_string()),
        })
    }
}

pub fn test_key() -> SecureKey {
    SecureKey::new([7u8; 32])
}

pub fn vault_in(dir: &TempDir) -> CredentialVault {
    CredentialVault::new(dir.path().join("session.vault"), test_key())
}

/// A vault whose parent path is a regular file, so every write fails.
pub fn unwritable_vault(dir: &TempDir) -> CredentialVault {
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"file").unwrap();
    CredentialVault::new(blocker.join("session.vault"), test_key())
}

pub fn fast_session_policy() -> SessionPolicy {
    SessionPolicy {
        refresh_buffer: Duration::from_secs(300),
        refresh_attempts: 3,
        refresh_backoff: Duration::from_millis(10),
    }
}

pub fn fast_gateway_policy() -> GatewayPolicy {
    GatewayPolicy {
        max_prompt_chars: 100,
        min_request_interval: Duration::ZERO,
        server_retries: 2,
        server_backoff: Duration::from_millis(10),
        rate_limit_retries: 2,
        rate_limit_backoff: Duration::from_millis(10),
    }
}

pub fn manager(auth: &Arc<FakeAuthenticator>, vault: CredentialVault) -> SessionLifecycleManager {
    SessionLifecycleManager::new(auth.clone(), vault, fast_session_policy())
}

pub fn gateway(
    auth: &Arc<FakeAuthenticator>,
    remote: &Arc<ScriptedRemote>,
    vault: CredentialVault,
    policy: GatewayPolicy,
) -> GenerationGateway {
    GenerationGateway::new(manager(auth, vault), remote.clone(), policy)
}

/// A stored record that expires `expires_in` from now.
pub fn stored_record(expires_in: chrono::Duration, hint: Option<&str>) -> SessionRecord {
    let now = Utc::now();
    let issued_at = now - chrono::Duration::hours(2);
    SessionRecord::new(
        Credential::new("stored-cred"),
        issued_at,
        now + expires_in,
        Duration::from_secs(300),
        hint.map(str::to_owned),
    )
    .unwrap()
}
