use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use zeroize::Zeroizing;

use crate::services::generation::GatewayPolicy;
use crate::services::session::SessionPolicy;

/// Default location of the credential vault.
pub const DEFAULT_VAULT_PATH: &str = ".tether/session.vault";

/// The library's configuration.
#[derive(Clone)]
pub struct Config {
    /// Where the encrypted session record lives.
    pub vault_path: PathBuf,
    /// Overrides the machine material the vault key is derived from.
    pub key_material: Option<Zeroizing<String>>,
    /// Session acquisition and refresh policy.
    pub session: SessionPolicy,
    /// Generation admission and retry policy.
    pub gateway: GatewayPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vault_path: PathBuf::from(DEFAULT_VAULT_PATH),
            key_material: None,
            session: SessionPolicy::default(),
            gateway: GatewayPolicy::default(),
        }
    }
}

impl Config {
    /// Loads `.env` if present, then reads the environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Creates a new `Config` from environment variables.
    ///
    /// Every variable is optional; unset ones keep their defaults.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`, or an error naming the variable
    /// that failed to parse.
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();
        let session = defaults.session;
        let gateway = defaults.gateway;

        let key_material = match env::var("TETHER_KEY_MATERIAL") {
            Ok(raw) if raw.trim().is_empty() => {
                anyhow::bail!("TETHER_KEY_MATERIAL must not be blank when set")
            }
            Ok(raw) => Some(Zeroizing::new(raw)),
            Err(_) => None,
        };

        Ok(Self {
            vault_path: env::var("TETHER_VAULT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.vault_path),
            key_material,
            session: SessionPolicy {
                refresh_buffer: Duration::from_secs(env_or(
                    "TETHER_REFRESH_BUFFER_SECS",
                    session.refresh_buffer.as_secs(),
                )?),
                refresh_attempts: env_or("TETHER_REFRESH_ATTEMPTS", session.refresh_attempts)?,
                refresh_backoff: Duration::from_millis(env_or(
                    "TETHER_REFRESH_BACKOFF_MS",
                    session.refresh_backoff.as_millis() as u64,
                )?),
            },
            gateway: GatewayPolicy {
                max_prompt_chars: env_or("TETHER_MAX_PROMPT_CHARS", gateway.max_prompt_chars)?,
                min_request_interval: Duration::from_millis(env_or(
                    "TETHER_MIN_REQUEST_INTERVAL_MS",
                    gateway.min_request_interval.as_millis() as u64,
                )?),
                server_retries: env_or("TETHER_SERVER_RETRIES", gateway.server_retries)?,
                server_backoff: Duration::from_millis(env_or(
                    "TETHER_SERVER_BACKOFF_MS",
                    gateway.server_backoff.as_millis() as u64,
                )?),
                rate_limit_retries: env_or("TETHER_RATE_LIMIT_RETRIES", gateway.rate_limit_retries)?,
                rate_limit_backoff: Duration::from_secs(env_or(
                    "TETHER_RATE_LIMIT_BACKOFF_SECS",
                    gateway.rate_limit_backoff.as_secs(),
                )?),
            },
        })
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}
