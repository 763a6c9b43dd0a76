//! Offline adapter for dry runs of a configuration.

use super::PlatformAdapter;
use crate::error::AdapterError;
use crate::types::{ActionKind, ActionOutcome, Candidate, Credential, Session, Target};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulatedOptions {
    /// Number of synthetic candidates `discover` can return
    #[serde(default = "default_candidates")]
    pub candidates: usize,
    /// Artificial latency per call
    #[serde(default)]
    pub latency_ms: u64,
}

fn default_candidates() -> usize {
    10
}

impl Default for SimulatedOptions {
    fn default() -> Self {
        Self {
            candidates: default_candidates(),
            latency_ms: 0,
        }
    }
}

/// Never talks to the network: every login works and every action succeeds.
pub struct SimulatedAdapter {
    target_id: String,
    options: SimulatedOptions,
}

impl SimulatedAdapter {
    pub fn new(target: &Target, options: SimulatedOptions) -> Self {
        Self {
            target_id: target.id.clone(),
            options,
        }
    }

    async fn pause(&self) {
        if self.options.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.options.latency_ms)).await;
        }
    }
}

#[async_trait]
impl PlatformAdapter for SimulatedAdapter {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn authenticate(
        &self,
        credential: &Credential,
        cached: Option<&Session>,
    ) -> Result<Vec<u8>, AdapterError> {
        self.pause().await;
        if let Some(session) = cached {
            tracing::debug!(target_id = %self.target_id, "Simulated login reusing cached session");
            return Ok(session.artifact.clone());
        }
        tracing::debug!(target_id = %self.target_id, principal = %credential.principal, "Simulated login");
        Ok(format!("simulated-session:{}", credential.principal).into_bytes())
    }

    async fn discover(
        &self,
        target_account: &str,
        max: usize,
    ) -> Result<Vec<Candidate>, AdapterError> {
        self.pause().await;
        Ok((0..self.options.candidates.min(max))
            .map(|i| Candidate {
                key: format!("{}-follower-{}", target_account, i + 1),
                label: None,
            })
            .collect())
    }

    async fn act(
        &self,
        candidate: &Candidate,
        action: ActionKind,
    ) -> Result<ActionOutcome, AdapterError> {
        self.pause().await;
        tracing::info!(target_id = %self.target_id, candidate = %candidate.key, %action, "Simulated action");
        Ok(ActionOutcome::success().with_detail("simulated"))
    }
}
