use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use zeroize::Zeroizing;

use crate::crypto::aes::{self, SecureKey, NONCE_SIZE};
use crate::error::{AppError, Result};
use crate::models::session::{SessionRecord, SCHEMA_VERSION};

/// Leading bytes of every vault file.
const MAGIC: &[u8; 4] = b"TTHR";
/// Magic plus one version byte; authenticated as AES-GCM associated data.
const HEADER_LEN: usize = MAGIC.len() + 1;

/// Encrypted, single-record credential store.
///
/// On-disk layout: `MAGIC | version | nonce | ciphertext`. The plaintext is
/// the bincode encoding of a [`SessionRecord`]. The store is process-local;
/// concurrent writers in other processes are not coordinated.
#[derive(Clone)]
pub struct CredentialVault {
    inner: Arc<VaultInner>,
}

struct VaultInner {
    path: PathBuf,
    key: SecureKey,
    io_lock: Mutex<()>,
}

impl CredentialVault {
    /// Creates a vault backed by the file at `path`, encrypted with `key`.
    pub fn new(path: impl Into<PathBuf>, key: SecureKey) -> Self {
        Self {
            inner: Arc::new(VaultInner {
                path: path.into(),
                key,
                io_lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Encrypts and durably writes `record`, replacing any previous one.
    ///
    /// # Returns
    ///
    /// `StorageFailure` if the record cannot be encoded, encrypted or written.
    pub async fn save(&self, record: &SessionRecord) -> Result<()> {
        let blob = self.inner.seal(record).map_err(|e| match e {
            AppError::StorageFailure(msg) => AppError::StorageFailure(msg),
            other => AppError::StorageFailure(other.to_string()),
        })?;

        let inner = self.inner.clone();
        run_blocking(move || inner.write(&blob)).await?;

        tracing::debug!("✅ Session persisted to {}", self.inner.path.display());
        Ok(())
    }

    /// Reads back the stored record.
    ///
    /// Never fails: a missing file is `None`; an unreadable, undecryptable or
    /// outdated blob is deleted and reported as `None`.
    pub async fn load(&self) -> Option<SessionRecord> {
        let inner = self.inner.clone();
        match run_blocking(move || Ok(inner.load_or_discard())).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("⚠️  Vault load task failed: {}", e);
                None
            }
        }
    }

    /// Deletes the stored record. Succeeds when nothing is stored.
    pub async fn clear(&self) -> Result<()> {
        let inner = self.inner.clone();
        run_blocking(move || {
            let _guard = inner.io_lock.lock().unwrap_or_else(|e| e.into_inner());
            inner.remove()
        })
        .await
    }
}

impl VaultInner {
    fn seal(&self, record: &SessionRecord) -> Result<Vec<u8>> {
        let plaintext = Zeroizing::new(
            bincode::serde::encode_to_vec(record, bincode::config::standard())
                .map_err(|e| AppError::StorageFailure(format!("Session encoding failed: {}", e)))?,
        );

        let header = header();
        let (ciphertext, nonce) = aes::encrypt(&self.key, &plaintext, &header)?;

        let mut blob = Vec::with_capacity(HEADER_LEN + NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&header);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn open(&self, blob: &[u8]) -> std::result::Result<SessionRecord, String> {
        if blob.len() < HEADER_LEN + NONCE_SIZE {
            return Err(format!("blob too short ({} bytes)", blob.len()));
        }

        let (header, rest) = blob.split_at(HEADER_LEN);
        if &header[..MAGIC.len()] != MAGIC {
            return Err("bad magic".to_string());
        }
        let version = header[MAGIC.len()] as u32;
        if version != SCHEMA_VERSION {
            return Err(format!("unsupported schema version {}", version));
        }

        let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);
        let nonce: [u8; NONCE_SIZE] = nonce
            .try_into()
            .map_err(|_| "invalid nonce size".to_string())?;

        let plaintext = Zeroizing::new(
            aes::decrypt(&self.key, ciphertext, &nonce, header).map_err(|e| e.to_string())?,
        );

        let (record, _): (SessionRecord, usize) =
            bincode::serde::decode_from_slice(&plaintext, bincode::config::standard())
                .map_err(|e| format!("decode failed: {}", e))?;

        record.validate().map_err(|e| e.to_string())?;
        Ok(record)
    }

    fn load_or_discard(&self) -> Option<SessionRecord> {
        let _guard = self.io_lock.lock().unwrap_or_else(|e| e.into_inner());

        let blob = match fs::read(&self.path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("No stored session at {}", self.path.display());
                return None;
            }
            Err(e) => {
                tracing::warn!("⚠️  Could not read session vault: {}", e);
                return None;
            }
        };

        match self.open(&blob) {
            Ok(record) => {
                tracing::info!("✅ Stored session loaded (expires {})", record.expires_at());
                Some(record)
            }
            Err(reason) => {
                tracing::warn!("⚠️  Discarding unreadable session vault: {}", reason);
                if let Err(e) = self.remove() {
                    tracing::error!("❌ Failed to discard corrupt vault: {}", e);
                }
                None
            }
        }
    }

    fn write(&self, blob: &[u8]) -> Result<()> {
        let _guard = self.io_lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.tmp_path();
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp)?;
        file.write_all(blob)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!("🧹 Session vault cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "session.vault".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn header() -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[..MAGIC.len()].copy_from_slice(MAGIC);
    header[MAGIC.len()] = SCHEMA_VERSION as u8;
    header
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("Vault task failed: {}", e)))?
}
