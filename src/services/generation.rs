use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::backoff;
use crate::error::{AppError, Result};
use crate::middleware_layer::coalesce::Coalescer;
use crate::middleware_layer::rate_limit::RequestSpacer;
use crate::models::generation::{GenerationOptions, GenerationResult, Prompt, RequestKey};
use crate::models::session::SessionRecord;
use crate::services::remote::{RemoteError, RemoteService};
use crate::services::session::SessionLifecycleManager;
use crate::validation::prompt::validate_prompt;

/// Admission and retry policy for generation calls.
#[derive(Debug, Clone)]
pub struct GatewayPolicy {
    /// Longest accepted prompt, in characters.
    pub max_prompt_chars: usize,
    /// Minimum spacing between remote calls.
    pub min_request_interval: Duration,
    /// Retries after a server error before giving up.
    pub server_retries: u32,
    /// Base delay for server error backoff.
    pub server_backoff: Duration,
    /// Retries after a rate limit signal before giving up.
    pub rate_limit_retries: u32,
    /// Base delay when the remote side gives no retry hint.
    pub rate_limit_backoff: Duration,
}

impl Default for GatewayPolicy {
    fn default() -> Self {
        Self {
            max_prompt_chars: 4000,
            min_request_interval: Duration::from_secs(2),
            server_retries: 2,
            server_backoff: Duration::from_secs(1),
            rate_limit_retries: 2,
            rate_limit_backoff: Duration::from_secs(30),
        }
    }
}

/// Everything one execution needs; kept apart from the coalescer so
/// in-flight executions never hold a reference back to it.
#[derive(Clone)]
struct Executor {
    sessions: SessionLifecycleManager,
    remote: Arc<dyn RemoteService>,
    spacer: Arc<RequestSpacer>,
    policy: GatewayPolicy,
}

struct GatewayInner {
    executor: Executor,
    coalescer: Coalescer<RequestKey, GenerationResult>,
}

/// Single entry point for remote generation.
///
/// Owns the "retry once on authentication failure" rule, request
/// coalescing and request spacing, so call sites never reimplement them.
#[derive(Clone)]
pub struct GenerationGateway {
    inner: Arc<GatewayInner>,
}

impl GenerationGateway {
    /// Creates a new `GenerationGateway`.
    ///
    /// # Arguments
    ///
    /// * `sessions` - The session manager calls are authenticated through.
    /// * `remote` - The generation endpoint.
    /// * `policy` - Admission and retry policy.
    pub fn new(
        sessions: SessionLifecycleManager,
        remote: Arc<dyn RemoteService>,
        policy: GatewayPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                executor: Executor {
                    sessions,
                    remote,
                    spacer: Arc::new(RequestSpacer::new(policy.min_request_interval)),
                    policy,
                },
                coalescer: Coalescer::new(),
            }),
        }
    }

    /// Generates content for `prompt`.
    ///
    /// Fails fast with `InvalidInput` on a bad prompt. Identical requests
    /// issued while one is in flight share its result. May suspend while a
    /// session is being acquired or refreshed.
    ///
    /// # Returns
    ///
    /// The result, or one of `InvalidInput`, `AuthenticationRequired`,
    /// `AuthenticationCancelled`, `RemoteService`, `RateLimited`.
    pub async fn generate(&self, prompt: &str, options: GenerationOptions) -> Result<GenerationResult> {
        let prompt = validate_prompt(prompt, self.inner.executor.policy.max_prompt_chars)?;
        let key = RequestKey::derive(&prompt, &options);

        let executor = self.inner.executor.clone();
        let result = self
            .inner
            .coalescer
            .run(key, move || async move { executor.execute(key, prompt, options).await })
            .await;

        if let Err(e) = &result {
            e.log();
        }
        result
    }

    pub fn sessions(&self) -> &SessionLifecycleManager {
        &self.inner.executor.sessions
    }

    pub fn policy(&self) -> &GatewayPolicy {
        &self.inner.executor.policy
    }
}

impl Executor {
    async fn execute(
        &self,
        key: RequestKey,
        prompt: Prompt,
        options: GenerationOptions,
    ) -> Result<GenerationResult> {
        let request_id = Uuid::new_v4();
        let mut attempts = 0u32;
        let mut reauthenticated = false;
        let mut server_failures = 0u32;
        let mut throttles = 0u32;

        loop {
            let session = self.active_session().await?;
            self.spacer.admit().await;
            attempts += 1;
            tracing::debug!("➡️  Request {} ({}) attempt {}", request_id, key, attempts);

            match self
                .remote
                .call_generate(session.credential(), &prompt, &options)
                .await
            {
                Ok(output) => {
                    tracing::info!("✅ Request {} completed after {} attempt(s)", request_id, attempts);
                    return Ok(GenerationResult {
                        request_id,
                        key,
                        output,
                        attempts,
                        completed_at: Utc::now(),
                    });
                }

                Err(RemoteError::Auth(msg)) => {
                    if reauthenticated {
                        return Err(AppError::AuthenticationRequired(format!(
                            "Remote rejected a freshly acquired session: {}",
                            msg
                        )));
                    }
                    reauthenticated = true;
                    tracing::warn!("🔐 Remote rejected session ({}), re-acquiring once", msg);
                    if let Err(e) = self.sessions.invalidate_if_current(&session).await {
                        e.log();
                    }
                }

                Err(RemoteError::RateLimited { retry_after }) => {
                    throttles += 1;
                    if throttles > self.policy.rate_limit_retries {
                        return Err(AppError::RateLimited { retry_after });
                    }
                    let wait = retry_after
                        .unwrap_or_else(|| backoff::delay(self.policy.rate_limit_backoff, throttles));
                    tracing::warn!(
                        "Rate limited on request {} ({}/{}), waiting {:?}",
                        request_id,
                        throttles,
                        self.policy.rate_limit_retries,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                }

                Err(RemoteError::Server { status, message }) => {
                    server_failures += 1;
                    if server_failures > self.policy.server_retries {
                        return Err(AppError::RemoteService {
                            status: Some(status.as_u16()),
                            message,
                        });
                    }
                    let wait = backoff::delay(self.policy.server_backoff, server_failures);
                    tracing::warn!(
                        "Remote error {} on request {} ({}/{}), retrying in {:?}",
                        status,
                        request_id,
                        server_failures,
                        self.policy.server_retries,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// A session that failed to persist is still installed in memory, so a
    /// second lookup returns it without another acquisition.
    async fn active_session(&self) -> Result<Arc<SessionRecord>> {
        match self.sessions.get_active().await {
            Err(AppError::StorageFailure(msg)) => {
                tracing::warn!("⚠️  Session not persisted ({}), continuing in memory", msg);
                self.sessions.get_active().await
            }
            other => other,
        }
    }
}
