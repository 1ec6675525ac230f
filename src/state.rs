use std::sync::Arc;

use zeroize::Zeroizing;

use crate::config::Config;
use crate::crypto::machine_key;
use crate::error::{AppError, Result};
use crate::repositories::vault::CredentialVault;
use crate::services::authenticator::Authenticator;
use crate::services::generation::GenerationGateway;
use crate::services::remote::RemoteService;
use crate::services::session::SessionLifecycleManager;

/// Everything a host needs, wired together once at startup.
#[derive(Clone)]
pub struct AppState {
    /// The configuration the state was built from.
    pub config: Config,
    /// The encrypted session store.
    pub vault: CredentialVault,
    /// The session lifecycle manager.
    pub sessions: SessionLifecycleManager,
    /// The generation gateway.
    pub gateway: GenerationGateway,
}

impl AppState {
    /// Creates a new `AppState` and restores any persisted session.
    ///
    /// # Arguments
    ///
    /// * `config` - The library configuration.
    /// * `authenticator` - Produces credentials, possibly with user interaction.
    /// * `remote` - The generation endpoint.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(
        config: &Config,
        authenticator: Arc<dyn Authenticator>,
        remote: Arc<dyn RemoteService>,
    ) -> Result<Self> {
        let material = match &config.key_material {
            Some(material) => Zeroizing::new(material.as_bytes().to_vec()),
            None => machine_key::machine_material(),
        };
        let key = tokio::task::spawn_blocking(move || machine_key::derive_vault_key(&material))
            .await
            .map_err(|e| AppError::Internal(format!("Key derivation task failed: {}", e)))??;

        let vault = CredentialVault::new(config.vault_path.clone(), key);
        tracing::info!("✅ Credential vault ready at {}", vault.path().display());

        let sessions = SessionLifecycleManager::new(authenticator, vault.clone(), config.session.clone());
        let restored = sessions.restore().await;
        tracing::info!("✅ Session manager initialized ({:?})", restored);

        let gateway = GenerationGateway::new(sessions.clone(), remote, config.gateway.clone());
        tracing::info!(
            "✅ Generation gateway initialized (min interval {:?})",
            config.gateway.min_request_interval
        );

        Ok(AppState {
            config: config.clone(),
            vault,
            sessions,
            gateway,
        })
    }

    /// Stops refresh timers and in-flight acquisitions.
    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
    }
}
