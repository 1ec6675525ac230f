//! Session lifecycle: acquisition, persistence, proactive refresh and
//! invalidation of the one active [`SessionRecord`].
//!
//! State machine: `Empty -> Acquiring -> Valid -> Refreshing -> Valid | Empty`.
//! Every acquisition or refresh runs as one spawned *flight*; callers that
//! arrive while a flight is running await the same shared outcome, so the
//! authenticator is never invoked twice concurrently. A monotonically
//! increasing epoch guards every transition: a flight or timer whose epoch
//! no longer matches the machine's has been superseded and must not install
//! anything.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backoff;
use crate::error::{AppError, Result};
use crate::models::session::SessionRecord;
use crate::repositories::vault::CredentialVault;
use crate::services::authenticator::{Authenticator, AuthenticatorError, RefreshError};

/// Timing and retry policy for session acquisition.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    /// How long before expiry a proactive refresh starts.
    pub refresh_buffer: Duration,
    /// Silent refresh attempts before falling back to full authentication.
    pub refresh_attempts: u32,
    /// Base delay for exponential backoff between refresh attempts.
    pub refresh_backoff: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            refresh_buffer: Duration::from_secs(300),
            refresh_attempts: 3,
            refresh_backoff: Duration::from_millis(500),
        }
    }
}

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    Acquiring,
    Valid,
    Refreshing,
}

type FlightOutcome = Shared<BoxFuture<'static, Result<Arc<SessionRecord>>>>;

#[derive(Clone)]
struct Flight {
    outcome: FlightOutcome,
    cancel: CancellationToken,
}

enum Phase {
    Empty,
    Acquiring(Flight),
    Valid(Arc<SessionRecord>),
    Refreshing {
        current: Arc<SessionRecord>,
        flight: Flight,
    },
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Phase::Empty => SessionState::Empty,
            Phase::Acquiring(_) => SessionState::Acquiring,
            Phase::Valid(_) => SessionState::Valid,
            Phase::Refreshing { .. } => SessionState::Refreshing,
        }
    }

    fn flight(&self) -> Option<&Flight> {
        match self {
            Phase::Acquiring(flight) | Phase::Refreshing { flight, .. } => Some(flight),
            _ => None,
        }
    }
}

struct Machine {
    phase: Phase,
    epoch: u64,
    timer: Option<JoinHandle<()>>,
}

/// What `acquire` decided while holding the lock.
enum Next {
    Ready(Arc<SessionRecord>),
    Join(Flight),
    Start(Option<Arc<SessionRecord>>),
}

struct Inner {
    authenticator: Arc<dyn Authenticator>,
    vault: CredentialVault,
    policy: SessionPolicy,
    machine: Mutex<Machine>,
    status: watch::Sender<SessionState>,
    shutdown: CancellationToken,
}

/// Owns the active session for one account.
///
/// Cheap to clone; clones share the same state. Construct one per account
/// and pass it to whoever needs a session.
#[derive(Clone)]
pub struct SessionLifecycleManager {
    inner: Arc<Inner>,
}

impl SessionLifecycleManager {
    /// Creates a manager in the `Empty` state. Call [`restore`](Self::restore)
    /// to pick up a persisted session.
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        vault: CredentialVault,
        policy: SessionPolicy,
    ) -> Self {
        let (status, _) = watch::channel(SessionState::Empty);
        Self {
            inner: Arc::new(Inner {
                authenticator,
                vault,
                policy,
                machine: Mutex::new(Machine {
                    phase: Phase::Empty,
                    epoch: 0,
                    timer: None,
                }),
                status,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Loads the persisted session, if any, and arms its refresh timer.
    ///
    /// Expired records are discarded and the vault cleared. Does nothing if
    /// the manager already left `Empty`.
    pub async fn restore(&self) -> SessionState {
        let Some(record) = self.inner.vault.load().await else {
            return self.state();
        };

        let mut m = self.inner.machine.lock().await;
        if !matches!(m.phase, Phase::Empty) {
            return m.phase.state();
        }

        if record.is_expired(Utc::now()) {
            tracing::info!("Stored session expired at {}, discarding", record.expires_at());
            if let Err(e) = self.inner.vault.clear().await {
                e.log();
            }
            return SessionState::Empty;
        }

        let record = Arc::new(record);
        m.epoch += 1;
        m.phase = Phase::Valid(Arc::clone(&record));
        self.inner.arm_timer(&mut m, &record);
        self.inner.publish(&m);
        tracing::info!("✅ Session restored (expires {})", record.expires_at());
        SessionState::Valid
    }

    /// Returns a session that is valid and outside its refresh buffer,
    /// acquiring or refreshing one first if needed.
    ///
    /// Concurrent callers share a single in-flight attempt.
    ///
    /// # Returns
    ///
    /// The active record, or:
    /// * `AuthenticationRequired` if refresh and full authentication failed.
    /// * `AuthenticationCancelled` if the attempt was cancelled.
    /// * `StorageFailure` if the new session could not be persisted. The
    ///   session is installed in memory regardless, so the next call succeeds.
    pub async fn acquire(&self) -> Result<Arc<SessionRecord>> {
        let flight = {
            let mut m = self.inner.machine.lock().await;
            let now = Utc::now();
            let next = match &m.phase {
                Phase::Valid(record) if !record.needs_refresh(now) => Next::Ready(Arc::clone(record)),
                Phase::Valid(record) => Next::Start(Some(Arc::clone(record))),
                Phase::Acquiring(flight) | Phase::Refreshing { flight, .. } => Next::Join(flight.clone()),
                Phase::Empty => Next::Start(None),
            };
            match next {
                Next::Ready(record) => return Ok(record),
                Next::Join(flight) => flight,
                Next::Start(prior) => self.inner.start_flight(&mut m, prior),
            }
        };

        let record = flight.outcome.await?;
        if record.is_expired(Utc::now()) {
            return Err(AppError::AuthenticationRequired(
                "Session expired before it could be used".to_string(),
            ));
        }
        Ok(record)
    }

    /// Same as [`acquire`](Self::acquire); the name callers use before a
    /// remote call.
    pub async fn get_active(&self) -> Result<Arc<SessionRecord>> {
        self.acquire().await
    }

    /// Drops the session: cancels the refresh timer and any in-flight
    /// attempt, then clears the vault. Also the logout path. Idempotent.
    pub async fn invalidate(&self) -> Result<()> {
        let mut m = self.inner.machine.lock().await;
        self.inner.reset(&mut m);
        tracing::info!("🧹 Session invalidated");
        self.inner.vault.clear().await
    }

    /// Invalidates only if `record` is still the active session.
    ///
    /// Several calls failing on the same stale credential then trigger one
    /// re-acquisition instead of cancelling each other's.
    ///
    /// # Returns
    ///
    /// `true` if the session was invalidated.
    pub async fn invalidate_if_current(&self, record: &Arc<SessionRecord>) -> Result<bool> {
        let mut m = self.inner.machine.lock().await;
        let is_current = matches!(&m.phase, Phase::Valid(active) if Arc::ptr_eq(active, record));
        if !is_current {
            tracing::debug!("Rejected session already superseded");
            return Ok(false);
        }

        self.inner.reset(&mut m);
        tracing::info!("🧹 Session invalidated after remote rejection");
        self.inner.vault.clear().await?;
        Ok(true)
    }

    /// Cancels the in-flight acquisition or refresh, e.g. because the user
    /// closed the login window. Waiters receive `AuthenticationCancelled`.
    ///
    /// # Returns
    ///
    /// `true` if there was something to cancel.
    pub async fn cancel_acquisition(&self) -> bool {
        let m = self.inner.machine.lock().await;
        match m.phase.flight() {
            Some(flight) => {
                tracing::info!("Cancelling in-flight session acquisition");
                flight.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Stops timers and in-flight work for process teardown. The vault is
    /// left as is so the session can be restored on next start.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let mut m = self.inner.machine.lock().await;
        self.inner.reset(&mut m);
        tracing::info!("Session manager shut down");
    }

    pub fn state(&self) -> SessionState {
        *self.inner.status.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.status.subscribe()
    }

    /// The active record without triggering acquisition, if it has not expired.
    pub async fn current(&self) -> Option<Arc<SessionRecord>> {
        let m = self.inner.machine.lock().await;
        let record = match &m.phase {
            Phase::Valid(record) | Phase::Refreshing { current: record, .. } => record,
            _ => return None,
        };
        (!record.is_expired(Utc::now())).then(|| Arc::clone(record))
    }

    /// Non-secret account label of the active session, for diagnostics.
    pub async fn identity_hint(&self) -> Option<String> {
        self.current()
            .await
            .and_then(|record| record.identity_hint().map(str::to_owned))
    }
}

impl Inner {
    fn publish(&self, m: &Machine) {
        self.status.send_replace(m.phase.state());
    }

    /// Forces `Empty`, cancelling timer and flight.
    fn reset(&self, m: &mut Machine) {
        m.epoch += 1;
        if let Some(timer) = m.timer.take() {
            timer.abort();
        }
        if let Some(flight) = m.phase.flight() {
            flight.cancel.cancel();
        }
        m.phase = Phase::Empty;
        self.publish(m);
    }

    fn start_flight(self: &Arc<Self>, m: &mut Machine, prior: Option<Arc<SessionRecord>>) -> Flight {
        m.epoch += 1;
        let epoch = m.epoch;
        let cancel = self.shutdown.child_token();

        let inner = Arc::clone(self);
        let task_cancel = cancel.clone();
        let task_prior = prior.clone();
        let handle = tokio::spawn(async move { inner.run_flight(epoch, task_prior, task_cancel).await });

        let outcome = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(AppError::Internal(format!("Session task failed: {}", e))))
        }
        .boxed()
        .shared();

        let flight = Flight { outcome, cancel };
        m.phase = match prior {
            Some(current) => {
                tracing::info!("🔄 Refreshing session");
                Phase::Refreshing {
                    current,
                    flight: flight.clone(),
                }
            }
            None => {
                tracing::info!("🔐 Acquiring session");
                Phase::Acquiring(flight.clone())
            }
        };
        self.publish(m);
        flight
    }

    async fn run_flight(
        self: Arc<Self>,
        epoch: u64,
        prior: Option<Arc<SessionRecord>>,
        cancel: CancellationToken,
    ) -> Result<Arc<SessionRecord>> {
        let obtained = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AppError::AuthenticationCancelled),
            result = self.obtain(prior.as_deref(), cancel.clone()) => result,
        };

        match obtained {
            Ok(record) => self.install(epoch, record).await,
            Err(e) => {
                self.abandon(epoch, &e).await;
                Err(e)
            }
        }
    }

    /// Silent refresh first when there is a prior record, full
    /// authentication otherwise or when refresh gives up.
    async fn obtain(
        &self,
        prior: Option<&SessionRecord>,
        cancel: CancellationToken,
    ) -> Result<SessionRecord> {
        if let Some(prior) = prior {
            match self.refresh_with_backoff(prior).await {
                Ok(record) => return Ok(record),
                Err(RefreshError::Unsupported) => {
                    tracing::debug!("Silent refresh unsupported, running full authentication");
                }
                Err(e) => {
                    tracing::warn!("⚠️  Silent refresh gave up ({}), running full authentication", e);
                }
            }
        }
        self.authenticate(cancel).await
    }

    async fn refresh_with_backoff(
        &self,
        prior: &SessionRecord,
    ) -> std::result::Result<SessionRecord, RefreshError> {
        let attempts = self.policy.refresh_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = self
                .authenticator
                .refresh(prior.credential())
                .await
                .and_then(|fresh| {
                    SessionRecord::new(
                        fresh.credential,
                        Utc::now(),
                        fresh.expires_at,
                        self.policy.refresh_buffer,
                        prior.identity_hint().map(str::to_owned),
                    )
                    .map_err(|e| RefreshError::Transient(e.to_string()))
                });

            match outcome {
                Ok(record) => {
                    tracing::info!("✅ Session refreshed silently (attempt {})", attempt);
                    return Ok(record);
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    let wait = backoff::delay(self.policy.refresh_backoff, attempt);
                    tracing::warn!(
                        "Refresh attempt {}/{} failed: {}; retrying in {:?}",
                        attempt,
                        attempts,
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn authenticate(&self, cancel: CancellationToken) -> Result<SessionRecord> {
        tracing::info!("🔐 Running full authentication");
        let issued = self
            .authenticator
            .authenticate(cancel)
            .await
            .map_err(|e| match e {
                AuthenticatorError::Cancelled => AppError::AuthenticationCancelled,
                AuthenticatorError::Failed(msg) => AppError::AuthenticationRequired(msg),
            })?;

        SessionRecord::new(
            issued.credential,
            Utc::now(),
            issued.expires_at,
            self.policy.refresh_buffer,
            issued.identity_hint,
        )
        .map_err(|e| {
            AppError::AuthenticationRequired(format!("Authenticator returned an unusable credential: {}", e))
        })
    }

    /// Makes `record` the active session and persists it.
    ///
    /// Persistence happens under the machine lock so it can never land
    /// after a concurrent `invalidate` cleared the vault.
    async fn install(self: &Arc<Self>, epoch: u64, record: SessionRecord) -> Result<Arc<SessionRecord>> {
        let record = Arc::new(record);
        let mut m = self.machine.lock().await;
        if m.epoch != epoch {
            tracing::debug!("Discarding credential from a superseded attempt");
            return Err(AppError::AuthenticationCancelled);
        }

        m.epoch += 1;
        m.phase = Phase::Valid(Arc::clone(&record));
        self.arm_timer(&mut m, &record);
        self.publish(&m);
        tracing::info!(
            "✅ Session active until {} ({})",
            record.expires_at(),
            record.identity_hint().unwrap_or("unknown identity")
        );

        if let Err(e) = self.vault.save(&record).await {
            tracing::warn!("⚠️  Session is usable but was not persisted");
            e.log();
            return Err(e);
        }
        Ok(record)
    }

    async fn abandon(&self, epoch: u64, error: &AppError) {
        let mut m = self.machine.lock().await;
        if m.epoch != epoch {
            return;
        }

        self.reset(&mut m);
        if self.shutdown.is_cancelled() {
            return;
        }

        tracing::warn!("❌ Session acquisition failed: {}", error);
        if let Err(e) = self.vault.clear().await {
            e.log();
        }
    }

    fn arm_timer(self: &Arc<Self>, m: &mut Machine, record: &SessionRecord) {
        if let Some(timer) = m.timer.take() {
            timer.abort();
        }

        let delay = record.refresh_delay(Utc::now());
        let epoch = m.epoch;
        let weak: Weak<Inner> = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();

        tracing::debug!("⏰ Refresh scheduled in {:?}", delay);
        m.timer = Some(tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if let Some(inner) = weak.upgrade() {
                inner.refresh_due(epoch).await;
            }
        }));
    }

    /// Timer callback. A changed epoch means another attempt already
    /// replaced or dropped the record; that attempt arms its own timer.
    async fn refresh_due(self: Arc<Self>, epoch: u64) {
        let mut m = self.machine.lock().await;
        if m.epoch != epoch {
            tracing::debug!("Scheduled refresh superseded");
            return;
        }
        m.timer = None;

        let current = match &m.phase {
            Phase::Valid(record) => Arc::clone(record),
            _ => return,
        };
        tracing::info!("⏰ Proactive refresh due (expires {})", current.expires_at());
        self.start_flight(&mut m, Some(current));
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(timer) = self.machine.get_mut().timer.take() {
            timer.abort();
        }
    }
}
