//! Credential vault: per-target secrets plus the encrypted session cache.
//!
//! ## Layout
//!
//! ```text
//! {state_dir}/sessions/
//! ├── instagram.session.json   # {"version":1,"target_id":"instagram","payload":"BASE64"}
//! └── twitter.session.json
//! ```
//!
//! `payload` is the AES-256-GCM sealed JSON `{artifact, saved_at}`, bound to
//! the target id. The master key comes from `ENGAGE_MASTER_KEY`; when it is not
//! supplied the cache is disabled and every run authenticates with credentials.
//!
//! ## Usage
//!
//! ```ignore
//! let vault = CredentialVault::unlock(Some(key), SessionStore::new(dir), credentials)?;
//! let credential = vault.get("instagram")?;
//! if let Some(session) = vault.get_session("instagram").await { /* reuse */ }
//! vault.put_session("instagram", &artifact).await;
//! vault.invalidate_session("instagram").await;
//! ```

mod crypto;
mod session_store;

pub use crypto::{CryptoError, MasterKey, SessionCipher};
pub use session_store::SessionStore;

use crate::error::VaultError;
use crate::types::{Credential, Session};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Current on-disk envelope version
const ENVELOPE_VERSION: u32 = 1;

/// Shared handle returned by [`CredentialVault::unlock`].
pub type VaultHandle = Arc<CredentialVault>;

#[derive(Debug, Serialize, Deserialize)]
struct SessionEnvelope {
    version: u32,
    target_id: String,
    payload: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SealedSession {
    artifact: String,
    saved_at: DateTime<Utc>,
}

pub struct CredentialVault {
    credentials: HashMap<String, Arc<Credential>>,
    cipher: Option<SessionCipher>,
    sessions: SessionStore,
}

impl CredentialVault {
    /// Build the vault. Without a master key the session cache is disabled.
    pub fn unlock(
        master_key: Option<MasterKey>,
        sessions: SessionStore,
        credentials: impl IntoIterator<Item = Credential>,
    ) -> Result<VaultHandle, CryptoError> {
        let cipher = match master_key {
            Some(key) => Some(SessionCipher::new(&key)?),
            None => {
                tracing::warn!(
                    "No master key supplied; session cache disabled, every target will log in with credentials"
                );
                None
            }
        };

        let credentials = credentials
            .into_iter()
            .map(|c| (c.target_id.clone(), Arc::new(c)))
            .collect();

        Ok(Arc::new(Self {
            credentials,
            cipher,
            sessions,
        }))
    }

    pub fn sessions_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn get(&self, target_id: &str) -> Result<Arc<Credential>, VaultError> {
        self.credentials
            .get(target_id)
            .cloned()
            .ok_or_else(|| VaultError::UnknownTarget(target_id.to_string()))
    }

    /// Load the cached session for a target.
    ///
    /// Returns `None` on a miss, when the cache is disabled, or when the file
    /// cannot be read or fails authentication. Undecryptable files are deleted.
    pub async fn get_session(&self, target_id: &str) -> Option<Session> {
        let cipher = self.cipher.as_ref()?;

        let bytes = match self.sessions.load(target_id).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(target_id = %target_id, "Failed to read cached session: {}", e);
                return None;
            }
        };

        match Self::open_envelope(cipher, target_id, &bytes) {
            Ok(session) => {
                tracing::debug!(target_id = %target_id, saved_at = %session.saved_at, "Loaded cached session");
                Some(session)
            }
            Err(reason) => {
                tracing::warn!(
                    target_id = %target_id,
                    "Discarding unreadable cached session ({}); a fresh login will be used",
                    reason
                );
                self.invalidate_session(target_id).await;
                None
            }
        }
    }

    fn open_envelope(
        cipher: &SessionCipher,
        target_id: &str,
        bytes: &[u8],
    ) -> Result<Session, String> {
        let envelope: SessionEnvelope =
            serde_json::from_slice(bytes).map_err(|e| format!("malformed envelope: {}", e))?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(format!("unsupported envelope version {}", envelope.version));
        }
        if envelope.target_id != target_id {
            return Err(format!("envelope belongs to {}", envelope.target_id));
        }

        let plaintext = cipher
            .open(&envelope.payload, target_id.as_bytes())
            .map_err(|e| e.to_string())?;
        let sealed: SealedSession =
            serde_json::from_slice(&plaintext).map_err(|e| format!("malformed session: {}", e))?;
        let artifact = BASE64
            .decode(sealed.artifact)
            .map_err(|e| format!("malformed artifact: {}", e))?;

        Ok(Session {
            target_id: target_id.to_string(),
            artifact,
            saved_at: sealed.saved_at,
        })
    }

    /// Encrypt and persist a session artifact, replacing any previous one.
    ///
    /// Failures are logged and swallowed: losing the cache only costs a future login.
    pub async fn put_session(&self, target_id: &str, artifact: &[u8]) {
        let Some(cipher) = self.cipher.as_ref() else {
            return;
        };

        let sealed = SealedSession {
            artifact: BASE64.encode(artifact),
            saved_at: Utc::now(),
        };
        let result = serde_json::to_vec(&sealed)
            .map_err(|e| e.to_string())
            .and_then(|plaintext| {
                cipher
                    .seal(&plaintext, target_id.as_bytes())
                    .map_err(|e| e.to_string())
            })
            .and_then(|payload| {
                serde_json::to_vec_pretty(&SessionEnvelope {
                    version: ENVELOPE_VERSION,
                    target_id: target_id.to_string(),
                    payload,
                })
                .map_err(|e| e.to_string())
            });

        let data = match result {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(target_id = %target_id, "Failed to seal session: {}", e);
                return;
            }
        };

        match self.sessions.save(target_id, &data).await {
            Ok(()) => tracing::debug!(target_id = %target_id, "Saved session to cache"),
            Err(e) => tracing::warn!(target_id = %target_id, "Failed to save session: {}", e),
        }
    }

    pub async fn invalidate_session(&self, target_id: &str) {
        match self.sessions.delete(target_id).await {
            Ok(()) => tracing::info!(target_id = %target_id, "Invalidated cached session"),
            Err(e) => tracing::warn!(target_id = %target_id, "Failed to delete session: {}", e),
        }
    }
}
