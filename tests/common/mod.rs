//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use engage_orchestrator::adapter::PlatformAdapter;
use engage_orchestrator::error::AdapterError;
use engage_orchestrator::orchestrator::{Orchestrator, TargetPlan};
use engage_orchestrator::retry::BackoffPolicy;
use engage_orchestrator::store::{InMemoryStateStore, SharedState};
use engage_orchestrator::types::{
    ActionKind, ActionOutcome, Candidate, Credential, Session, Target,
};
use engage_orchestrator::vault::{CredentialVault, MasterKey, SessionStore, VaultHandle};

/// One scripted response to `act`.
#[derive(Clone, Debug)]
pub enum Step {
    Outcome(ActionOutcome),
    Error(AdapterError),
    Panic(&'static str),
}

impl Step {
    pub fn success() -> Self {
        Step::Outcome(ActionOutcome::success())
    }

    pub fn transient() -> Self {
        Step::Outcome(ActionOutcome::transient("timed out"))
    }

    pub fn throttled() -> Self {
        Step::Outcome(ActionOutcome::rate_limited("try again later"))
    }
}

/// Adapter whose behavior is fixed up front.
///
/// `act` plays `script` in order and then repeats `fallback`. Counters record
/// how the adapter was driven.
pub struct ScriptedAdapter {
    candidates: usize,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    login_error: Mutex<Option<AdapterError>>,
    panic_on_discover: bool,
    accept_cached: bool,
    pub act_calls: AtomicU32,
    pub credential_logins: AtomicU32,
    pub session_resumes: AtomicU32,
    pub act_log: Mutex<Vec<(String, ActionKind)>>,
    pub act_times: Mutex<Vec<tokio::time::Instant>>,
}

impl ScriptedAdapter {
    pub fn new(candidates: usize) -> Self {
        Self {
            candidates,
            script: Mutex::new(VecDeque::new()),
            fallback: Step::success(),
            login_error: Mutex::new(None),
            panic_on_discover: false,
            accept_cached: true,
            act_calls: AtomicU32::new(0),
            credential_logins: AtomicU32::new(0),
            session_resumes: AtomicU32::new(0),
            act_log: Mutex::new(Vec::new()),
            act_times: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, step: Step) -> Self {
        self.script.lock().unwrap().push_back(step);
        self
    }

    pub fn always(mut self, step: Step) -> Self {
        self.fallback = step;
        self
    }

    pub fn failing_login(self, error: AdapterError) -> Self {
        *self.login_error.lock().unwrap() = Some(error);
        self
    }

    pub fn panicking_discover(mut self) -> Self {
        self.panic_on_discover = true;
        self
    }

    pub fn rejecting_cached(mut self) -> Self {
        self.accept_cached = false;
        self
    }

    pub fn acts(&self) -> u32 {
        self.act_calls.load(Ordering::SeqCst)
    }

    pub fn logins(&self) -> u32 {
        self.credential_logins.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> u32 {
        self.session_resumes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn authenticate(
        &self,
        credential: &Credential,
        cached: Option<&Session>,
    ) -> Result<Vec<u8>, AdapterError> {
        if let Some(session) = cached {
            if self.accept_cached {
                self.session_resumes.fetch_add(1, Ordering::SeqCst);
                return Ok(session.artifact.clone());
            }
            return Err(AdapterError::authentication("session expired"));
        }

        let failure = self.login_error.lock().unwrap().clone();
        if let Some(error) = failure {
            return Err(error);
        }
        let n = self.credential_logins.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("session-{}-{}", credential.principal, n).into_bytes())
    }

    async fn discover(
        &self,
        target_account: &str,
        max: usize,
    ) -> Result<Vec<Candidate>, AdapterError> {
        if self.panic_on_discover {
            panic!("discovery page layout changed");
        }
        Ok((0..self.candidates.min(max))
            .map(|i| Candidate::new(format!("{}-{}", target_account, i)))
            .collect())
    }

    async fn act(
        &self,
        candidate: &Candidate,
        action: ActionKind,
    ) -> Result<ActionOutcome, AdapterError> {
        self.act_calls.fetch_add(1, Ordering::SeqCst);
        self.act_times.lock().unwrap().push(tokio::time::Instant::now());
        self.act_log
            .lock()
            .unwrap()
            .push((candidate.key.clone(), action));

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            Step::Outcome(outcome) => Ok(outcome),
            Step::Error(error) => Err(error),
            Step::Panic(message) => panic!("{}", message),
        }
    }
}

pub fn target(id: &str, limit: u32) -> Target {
    Target::new(id, "https://example.test", limit, [ActionKind::Follow], "acct")
}

pub fn plan(target: Target, adapter: &Arc<ScriptedAdapter>) -> TargetPlan {
    TargetPlan::new(target, adapter.clone() as Arc<dyn PlatformAdapter>)
}

pub fn credentials(ids: &[&str]) -> Vec<Credential> {
    ids.iter()
        .map(|id| Credential::new(*id, format!("{}-user", id), "secret"))
        .collect()
}

/// Vault with the session cache under `dir`.
pub fn vault(dir: &Path, ids: &[&str]) -> VaultHandle {
    CredentialVault::unlock(
        Some(MasterKey::from_bytes([7; 32])),
        SessionStore::new(dir.join("sessions")),
        credentials(ids),
    )
    .unwrap()
}

/// Vault without a master key: no session files are touched.
pub fn vault_without_cache(dir: &Path, ids: &[&str]) -> VaultHandle {
    CredentialVault::unlock(None, SessionStore::new(dir.join("sessions")), credentials(ids)).unwrap()
}

pub fn memory_state() -> (Arc<InMemoryStateStore>, SharedState) {
    let store = Arc::new(InMemoryStateStore::new());
    let state = SharedState::from_store(store.clone());
    (store, state)
}

pub fn fast_policy() -> BackoffPolicy {
    BackoffPolicy {
        max_attempts: 3,
        base_delay: std::time::Duration::from_millis(1),
        max_delay: std::time::Duration::from_millis(10),
        jitter: 0.0,
    }
}

pub fn orchestrator(vault: VaultHandle, state: SharedState) -> Orchestrator {
    Orchestrator::new(vault, state, fast_policy())
}
