//! Platform adapters - the per-site collaborators the orchestrator drives.
//!
//! The core never touches a browser or a page. Everything site-specific
//! (login forms, selectors, waits, 2FA prompts) lives behind
//! [`PlatformAdapter`]; one implementation per site, chosen by the `adapter`
//! block of the target's configuration through an [`AdapterRegistry`].
//!
//! Built-in kinds:
//! - `process`: bridges to an external helper program over JSON on stdio
//! - `simulated`: no network, reports success for synthetic candidates

mod process;
mod registry;
mod simulated;

pub use process::{ProcessAdapter, ProcessOptions};
pub use registry::{AdapterFactory, AdapterRegistry};
pub use simulated::{SimulatedAdapter, SimulatedOptions};

use crate::error::AdapterError;
use crate::types::{ActionKind, ActionOutcome, Candidate, Credential, Session};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Adapter selection as written in the targets file.
///
/// `kind` picks the factory; every other key is handed to that factory as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterSpec {
    pub kind: String,
    #[serde(flatten)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl AdapterSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            options: serde_json::Map::new(),
        }
    }

    /// Deserialize the kind-specific options.
    pub fn options<T: serde::de::DeserializeOwned>(&self) -> Result<T, AdapterError> {
        serde_json::from_value(serde_json::Value::Object(self.options.clone())).map_err(|e| {
            AdapterError::fault(format!("invalid options for adapter '{}': {}", self.kind, e))
        })
    }
}

/// Login and interaction mechanics for one target site.
///
/// # Contract
/// - `authenticate` is called once per run before any other method. When
///   `cached` is `Some`, the adapter should try to resume that session first and
///   only fall back to the credential path if the session is rejected; it
///   returns the artifact to cache (possibly unchanged).
/// - `discover` returns at most `max` candidates.
/// - `act` classifies what happened via [`ActionOutcome`]; `Err` is reserved
///   for failures the adapter could not classify as an outcome.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn authenticate(
        &self,
        credential: &Credential,
        cached: Option<&Session>,
    ) -> Result<Vec<u8>, AdapterError>;

    async fn discover(
        &self,
        target_account: &str,
        max: usize,
    ) -> Result<Vec<Candidate>, AdapterError>;

    async fn act(
        &self,
        candidate: &Candidate,
        action: ActionKind,
    ) -> Result<ActionOutcome, AdapterError>;
}
