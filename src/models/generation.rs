use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A prompt that passed validation: trimmed, non-empty and within the
/// configured length limit. Build one with
/// [`validate_prompt`](crate::validation::prompt::validate_prompt).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt(String);

impl Prompt {
    pub(crate) fn new_unchecked(text: String) -> Self {
        Self(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Per-request knobs forwarded to the remote service as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Remote model or style identifier.
    pub model: Option<String>,
    /// Number of outputs requested.
    pub count: Option<u8>,
    /// Aspect ratio such as `"16:9"`.
    pub aspect_ratio: Option<String>,
    /// Anything else the remote side understands.
    pub extra: BTreeMap<String, String>,
}

/// Identity of a logical request, used for coalescing duplicates.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestKey([u8; 32]);

impl RequestKey {
    /// Hashes the prompt and options into a key.
    ///
    /// Two requests share a key exactly when prompt text and every option
    /// are equal; `extra` is a `BTreeMap` so its ordering is canonical.
    pub fn derive(prompt: &Prompt, options: &GenerationOptions) -> Self {
        let mut hasher = blake3::Hasher::new();
        match bincode::serde::encode_to_vec((prompt, options), bincode::config::standard()) {
            Ok(bytes) => {
                hasher.update(&bytes);
            }
            Err(e) => {
                // Unreachable for these types; fall back to a debug rendering.
                tracing::warn!("Request key encoding failed, using debug form: {}", e);
                hasher.update(format!("{:?}{:?}", prompt, options).as_bytes());
            }
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

impl std::fmt::Debug for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RequestKey({})", self)
    }
}

/// Opaque payload returned by the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResult {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

/// What `generate` hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    /// Unique per remote execution; coalesced callers see the same id.
    pub request_id: Uuid,
    pub key: RequestKey,
    pub output: RawResult,
    /// Remote calls made for this result, retries included.
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
}
