//! Session lifecycle management for an unofficial web service, plus a
//! rate-limited, retrying generation client built on top of it.
//!
//! [`SessionLifecycleManager`] owns the active session: it restores it from
//! the encrypted [`CredentialVault`], acquires a new one through an
//! [`Authenticator`] with single-flight semantics, refreshes it ahead of
//! expiry and drops it on invalidation. [`GenerationGateway`] obtains
//! sessions from it, coalesces duplicate requests, spaces distinct ones and
//! re-authenticates exactly once on a credential rejection.
//!
//! ```rust,ignore
//! let config = tether::Config::load()?;
//! tether::telemetry::init();
//! let state = tether::AppState::new(&config, authenticator, remote).await?;
//! let result = state.gateway.generate("a lighthouse at dusk", Default::default()).await?;
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod state;
pub mod telemetry;

pub mod crypto {
    pub mod aes;
    pub mod machine_key;
}

pub mod models {
    pub mod generation;
    pub mod session;
}

pub mod repositories {
    pub mod vault;
}

pub mod services {
    pub mod authenticator;
    pub mod generation;
    pub mod remote;
    pub mod session;
}

pub mod middleware_layer {
    pub mod coalesce;
    pub mod rate_limit;
}

pub mod validation {
    pub mod prompt;
}

pub use config::Config;
pub use error::{AppError, Result};
pub use models::generation::{GenerationOptions, GenerationResult, Prompt, RawResult, RequestKey};
pub use models::session::{Credential, SessionRecord};
pub use repositories::vault::CredentialVault;
pub use services::authenticator::{
    Authenticator, AuthenticatorError, IssuedCredential, RefreshError, RefreshedCredential,
};
pub use services::generation::{GatewayPolicy, GenerationGateway};
pub use services::remote::{RemoteError, RemoteService};
pub use services::session::{SessionLifecycleManager, SessionPolicy, SessionState};
pub use state::AppState;
