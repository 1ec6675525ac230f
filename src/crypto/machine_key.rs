use argon2::{Algorithm, Argon2, ParamsBuilder, Version};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::crypto::aes::{SecureKey, KEY_SIZE};
use crate::error::{AppError, Result};

/// Domain label mixed into the salt so other tools reading the same machine
/// id never derive the vault key.
const SALT_LABEL: &[u8] = b"tether/credential-vault/v1";
/// The memory cost for Argon2 in MB.
const ARGON2_MEMORY_MB: u32 = 19;
/// The number of iterations for Argon2.
const ARGON2_ITERATIONS: u32 = 2;
/// The parallelism factor for Argon2.
const ARGON2_PARALLELISM: u32 = 1;

/// Files holding a stable per-installation identifier, in lookup order.
const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// Collects stable local-machine material for key derivation.
///
/// Prefers the OS machine id; falls back to host name plus user name, which
/// is stable enough for a per-user desktop install.
pub fn machine_material() -> Zeroizing<Vec<u8>> {
    for path in MACHINE_ID_PATHS {
        if let Ok(id) = std::fs::read_to_string(path) {
            let id = id.trim();
            if !id.is_empty() {
                tracing::debug!("Using machine id from {}", path);
                return Zeroizing::new(id.as_bytes().to_vec());
            }
        }
    }

    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string());
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();

    tracing::warn!("⚠️  No machine id found, deriving vault key from host and user name");
    Zeroizing::new(format!("{}:{}", host, user).into_bytes())
}

fn salt() -> [u8; 16] {
    let digest = Sha256::digest(SALT_LABEL);
    let mut salt = [0u8; 16];
    salt.copy_from_slice(&digest[..16]);
    salt
}

/// Derives the vault key from the given material using Argon2id.
///
/// The derivation is deterministic: the same material always yields the
/// same key, so no separate key file is needed.
pub fn derive_vault_key(material: &[u8]) -> Result<SecureKey> {
    if material.is_empty() {
        return Err(AppError::Encryption("Key material must not be empty".to_string()));
    }

    let argon2 = Argon2::new(
        Algorithm::Argon2id,
        Version::V0x13,
        ParamsBuilder::new()
            .m_cost(ARGON2_MEMORY_MB * 1024)
            .t_cost(ARGON2_ITERATIONS)
            .p_cost(ARGON2_PARALLELISM)
            .build()
            .map_err(|e| AppError::Encryption(format!("Argon2 params: {}", e)))?,
    );

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(material, &salt(), &mut key)
        .map_err(|e| AppError::Encryption(format!("Argon2 key derivation error: {}", e)))?;

    let key = SecureKey::new(key);
    tracing::debug!("Vault key derived (fingerprint {})", key.fingerprint());
    Ok(key)
}
