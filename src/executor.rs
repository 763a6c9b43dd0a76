//! Action executor: one adapter call wrapped in dedup, quota and retry handling.
//!
//! ```text
//! execute(candidate, kind)
//!   ├─ authenticate (first call only, cached session first)
//!   ├─ has_succeeded? ──yes──► AlreadyDone (no adapter call, quota untouched)
//!   ├─ reserve(1) ──0──► RateLimited (local cap, target finishes)
//!   └─ act ──► Success       record succeeded, keep reservation
//!              AlreadyDone   record skipped, release
//!              Transient     backoff and retry, then record failed, release
//!              Fatal         record failed, release, abort target
//!              RateLimited   record skipped, release, abort target
//! ```
//!
//! Every reservation taken here is settled here: either a `succeeded` record
//! keeps it or the unit is released, including when the run is cancelled
//! during a backoff sleep.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::adapter::PlatformAdapter;
use crate::error::{AdapterError, AdapterErrorKind, ErrorClass, StoreError, TargetFault};
use crate::retry::BackoffPolicy;
use crate::store::{self, SharedState};
use crate::types::{
    ActionKind, ActionOutcome, Candidate, InteractionRecord, InteractionStatus, OutcomeKind,
    Target,
};
use crate::util::panic_message;
use crate::vault::VaultHandle;

/// What the worker should do after an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Move on to the next action
    Continue,
    /// Stop issuing actions; the target still ends in `Done`
    Finish(ErrorClass),
    /// Stop issuing actions; the target ends in `Aborted`
    Abort(TargetFault),
}

/// Result of one `execute` call.
#[derive(Debug, Clone)]
pub struct Execution {
    pub outcome: ActionOutcome,
    /// Summary bucket this action counts towards; `None` when nothing was attempted
    pub tally: Option<InteractionStatus>,
    /// Number of adapter `act` calls made
    pub attempts: u32,
    pub directive: Directive,
}

impl Execution {
    fn new(
        outcome: ActionOutcome,
        tally: Option<InteractionStatus>,
        attempts: u32,
        directive: Directive,
    ) -> Self {
        Self {
            outcome,
            tally,
            attempts,
            directive,
        }
    }

    fn abort(fault: TargetFault) -> Self {
        let outcome = ActionOutcome::fatal(fault.detail.clone());
        Self::new(outcome, None, 0, Directive::Abort(fault))
    }

    /// Error class this action reported, if any.
    ///
    /// A replayed action (already recorded, or reported done by the platform)
    /// is `Replay`: a no-op signal, never a reason to stop the target.
    pub fn signal(&self) -> Option<ErrorClass> {
        match &self.directive {
            Directive::Finish(class) => Some(*class),
            Directive::Abort(fault) => Some(fault.class),
            Directive::Continue => match self.outcome.kind {
                OutcomeKind::AlreadyDone => Some(ErrorClass::Replay),
                OutcomeKind::TransientFailure => Some(ErrorClass::TransientIo),
                _ => None,
            },
        }
    }
}

fn storage_fault(e: StoreError) -> TargetFault {
    TargetFault::new(ErrorClass::Storage, e.to_string())
}

fn cancelled_fault() -> TargetFault {
    TargetFault::new(ErrorClass::Cancelled, "run cancelled")
}

/// Drives one adapter for one target. Owned by that target's worker.
pub struct ActionExecutor {
    target: Arc<Target>,
    adapter: Arc<dyn PlatformAdapter>,
    vault: VaultHandle,
    state: SharedState,
    policy: BackoffPolicy,
    cancel: CancellationToken,
    authenticated: bool,
}

impl ActionExecutor {
    pub fn new(
        target: Arc<Target>,
        adapter: Arc<dyn PlatformAdapter>,
        vault: VaultHandle,
        state: SharedState,
        policy: BackoffPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            target,
            adapter,
            vault,
            state,
            policy,
            cancel,
            authenticated: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Log in, preferring the cached session. No-op once authenticated.
    ///
    /// A cached session the adapter rejects is invalidated and the login is
    /// retried once with credentials only.
    pub async fn authenticate(&mut self) -> Result<(), TargetFault> {
        if self.authenticated {
            return Ok(());
        }

        let target_id = self.target.id.clone();
        let credential = self
            .vault
            .get(&target_id)
            .map_err(|e| TargetFault::new(ErrorClass::Authentication, e.to_string()))?;
        let cached = self.vault.get_session(&target_id).await;
        let adapter = self.adapter.clone();

        let first = self
            .with_retry("authenticate", || {
                adapter.authenticate(&credential, cached.as_ref())
            })
            .await;

        let (artifact, resumed) = match first {
            Ok(artifact) => {
                let resumed = cached
                    .as_ref()
                    .map(|session| session.artifact == artifact)
                    .unwrap_or(false);
                (artifact, resumed)
            }
            Err(fault) if fault.class == ErrorClass::Authentication && cached.is_some() => {
                tracing::warn!(target_id = %target_id, "Cached session rejected, logging in with credentials");
                self.vault.invalidate_session(&target_id).await;
                let artifact = self
                    .with_retry("authenticate", || adapter.authenticate(&credential, None))
                    .await?;
                (artifact, false)
            }
            Err(fault) => return Err(fault),
        };

        if resumed {
            tracing::info!(target_id = %target_id, "Resumed cached session");
        } else {
            tracing::info!(target_id = %target_id, "Authenticated");
            self.vault.put_session(&target_id, &artifact).await;
        }

        self.authenticated = true;
        Ok(())
    }

    /// Ask the adapter for up to `max` candidates.
    pub async fn discover(&mut self, max: usize) -> Result<Vec<Candidate>, TargetFault> {
        self.authenticate().await?;
        let adapter = self.adapter.clone();
        let account = self.target.target_account.clone();

        let mut candidates = self
            .with_retry("discover", || adapter.discover(&account, max))
            .await?;
        if candidates.len() > max {
            tracing::debug!(
                target_id = %self.target.id,
                returned = candidates.len(),
                max,
                "Adapter returned more candidates than requested, truncating"
            );
            candidates.truncate(max);
        }
        Ok(candidates)
    }

    /// Apply `kind` to `candidate` once, following the dedup and reservation protocol.
    pub async fn execute(&mut self, candidate: &Candidate, kind: ActionKind) -> Execution {
        if let Err(fault) = self.authenticate().await {
            return Execution::abort(fault);
        }

        let target = self.target.clone();
        match self
            .state
            .log
            .has_succeeded(&target.id, &candidate.key, kind)
            .await
        {
            Ok(true) => {
                tracing::debug!(target_id = %target.id, candidate = %candidate.key, action = %kind, "Already done, skipping");
                return Execution::new(
                    ActionOutcome::already_done(),
                    Some(InteractionStatus::Skipped),
                    0,
                    Directive::Continue,
                );
            }
            Ok(false) => {}
            Err(e) => return Execution::abort(storage_fault(e)),
        }

        let day = store::today();
        match self
            .state
            .ledger
            .reserve(&target.id, day, 1, target.daily_limit)
            .await
        {
            Ok(0) => {
                tracing::info!(target_id = %target.id, limit = target.daily_limit, "Daily limit reached");
                return Execution::new(
                    ActionOutcome::rate_limited("daily limit reached"),
                    None,
                    0,
                    Directive::Finish(ErrorClass::QuotaExhausted),
                );
            }
            Ok(_) => {}
            Err(e) => return Execution::abort(storage_fault(e)),
        }

        self.act_reserved(candidate, kind, day).await
    }

    /// Call `act` with one unit reserved for `day`, retrying transient failures.
    async fn act_reserved(
        &self,
        candidate: &Candidate,
        kind: ActionKind,
        day: NaiveDate,
    ) -> Execution {
        let target_id = self.target.id.clone();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let result = AssertUnwindSafe(self.adapter.act(candidate, kind))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(AdapterError::fault(format!(
                        "adapter panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                });

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) if e.is_transient() => ActionOutcome::transient(e.message),
                Err(e) => {
                    return self
                        .act_error(candidate, kind, day, attempt, e)
                        .await;
                }
            };

            match outcome.kind {
                OutcomeKind::Success => {
                    let record = InteractionRecord::new(
                        &target_id,
                        &candidate.key,
                        kind,
                        InteractionStatus::Succeeded,
                        outcome.detail.clone(),
                    );
                    return match self.state.log.record(&record).await {
                        Ok(()) => {
                            tracing::info!(target_id = %target_id, candidate = %candidate.key, action = %kind, attempt, "Action succeeded");
                            Execution::new(
                                outcome,
                                Some(InteractionStatus::Succeeded),
                                attempt,
                                Directive::Continue,
                            )
                        }
                        Err(StoreError::DuplicateSuccess { .. }) => {
                            tracing::warn!(target_id = %target_id, candidate = %candidate.key, action = %kind, "Success already recorded, releasing reservation");
                            let directive = match self.state.ledger.release(&target_id, day, 1).await {
                                Ok(()) => Directive::Continue,
                                Err(e) => Directive::Abort(storage_fault(e)),
                            };
                            Execution::new(
                                ActionOutcome::already_done(),
                                Some(InteractionStatus::Skipped),
                                attempt,
                                directive,
                            )
                        }
                        Err(e) => {
                            // The action happened; keep the unit so the cap stays conservative.
                            tracing::error!(target_id = %target_id, candidate = %candidate.key, "Failed to record success: {}", e);
                            Execution::new(
                                outcome,
                                Some(InteractionStatus::Succeeded),
                                attempt,
                                Directive::Abort(storage_fault(e)),
                            )
                        }
                    };
                }
                OutcomeKind::AlreadyDone => {
                    return self
                        .settle(
                            candidate,
                            kind,
                            day,
                            outcome,
                            InteractionStatus::Skipped,
                            attempt,
                            Directive::Continue,
                        )
                        .await;
                }
                OutcomeKind::RateLimited => {
                    tracing::warn!(target_id = %target_id, detail = ?outcome.detail, "Platform rate limit, stopping target");
                    let fault = TargetFault::new(
                        ErrorClass::PlatformThrottled,
                        outcome.detail.clone().unwrap_or_else(|| "rate limited".into()),
                    );
                    return self
                        .settle(
                            candidate,
                            kind,
                            day,
                            outcome,
                            InteractionStatus::Skipped,
                            attempt,
                            Directive::Abort(fault),
                        )
                        .await;
                }
                OutcomeKind::FatalFailure => {
                    tracing::error!(target_id = %target_id, candidate = %candidate.key, detail = ?outcome.detail, "Fatal action failure, stopping target");
                    let fault = TargetFault::new(
                        ErrorClass::AdapterFault,
                        outcome.detail.clone().unwrap_or_else(|| "fatal failure".into()),
                    );
                    return self
                        .settle(
                            candidate,
                            kind,
                            day,
                            outcome,
                            InteractionStatus::Failed,
                            attempt,
                            Directive::Abort(fault),
                        )
                        .await;
                }
                OutcomeKind::TransientFailure => {
                    if !self.policy.should_retry(attempt) {
                        tracing::warn!(target_id = %target_id, candidate = %candidate.key, attempts = attempt, "Giving up after transient failures");
                        return self
                            .settle(
                                candidate,
                                kind,
                                day,
                                outcome,
                                InteractionStatus::Failed,
                                attempt,
                                Directive::Continue,
                            )
                            .await;
                    }

                    let delay = self.policy.delay_for(attempt);
                    tracing::warn!(
                        target_id = %target_id,
                        candidate = %candidate.key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        detail = ?outcome.detail,
                        "Transient failure, retrying"
                    );
                    if !self.backoff(delay).await {
                        return self
                            .settle(
                                candidate,
                                kind,
                                day,
                                outcome,
                                InteractionStatus::Failed,
                                attempt,
                                Directive::Abort(cancelled_fault()),
                            )
                            .await;
                    }
                }
            }
        }
    }

    /// Settle an `act` call that returned an error the adapter did not classify as an outcome.
    async fn act_error(
        &self,
        candidate: &Candidate,
        kind: ActionKind,
        day: NaiveDate,
        attempt: u32,
        error: AdapterError,
    ) -> Execution {
        tracing::error!(target_id = %self.target.id, candidate = %candidate.key, "Adapter error: {}", error);
        match error.kind {
            AdapterErrorKind::Throttled => {
                let outcome = ActionOutcome::rate_limited(error.message.clone());
                self.settle(
                    candidate,
                    kind,
                    day,
                    outcome,
                    InteractionStatus::Skipped,
                    attempt,
                    Directive::Abort(error.into_fault()),
                )
                .await
            }
            AdapterErrorKind::Authentication => {
                self.vault.invalidate_session(&self.target.id).await;
                let outcome = ActionOutcome::fatal(error.message.clone());
                self.settle(
                    candidate,
                    kind,
                    day,
                    outcome,
                    InteractionStatus::Failed,
                    attempt,
                    Directive::Abort(error.into_fault()),
                )
                .await
            }
            AdapterErrorKind::Transient | AdapterErrorKind::Fault => {
                let outcome = ActionOutcome::fatal(error.message.clone());
                let fault = TargetFault::new(ErrorClass::AdapterFault, error.message);
                self.settle(
                    candidate,
                    kind,
                    day,
                    outcome,
                    InteractionStatus::Failed,
                    attempt,
                    Directive::Abort(fault),
                )
                .await
            }
        }
    }

    /// Append a non-success record and give the reserved unit back.
    #[allow(clippy::too_many_arguments)]
    async fn settle(
        &self,
        candidate: &Candidate,
        kind: ActionKind,
        day: NaiveDate,
        outcome: ActionOutcome,
        status: InteractionStatus,
        attempts: u32,
        directive: Directive,
    ) -> Execution {
        let record = InteractionRecord::new(
            &self.target.id,
            &candidate.key,
            kind,
            status,
            outcome.detail.clone(),
        );
        let recorded = self.state.log.record(&record).await;
        let released = self.state.ledger.release(&self.target.id, day, 1).await;

        let directive = match recorded.and(released) {
            Ok(()) => directive,
            Err(e) => {
                tracing::error!(target_id = %self.target.id, candidate = %candidate.key, "Failed to settle action: {}", e);
                match directive {
                    Directive::Abort(fault) => Directive::Abort(fault),
                    _ => Directive::Abort(storage_fault(e)),
                }
            }
        };
        Execution::new(outcome, Some(status), attempts, directive)
    }

    /// Run an authenticate/discover call, retrying transient errors under the backoff policy.
    async fn with_retry<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T, TargetFault>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let mut attempt = 1u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && self.policy.should_retry(attempt) => {
                    let delay = self.policy.delay_for(attempt);
                    tracing::warn!(
                        target_id = %self.target.id,
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient adapter error: {}",
                        e.message
                    );
                    if !self.backoff(delay).await {
                        return Err(cancelled_fault());
                    }
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(target_id = %self.target.id, op, attempts = attempt, "Adapter call failed: {}", e);
                    return Err(e.into_fault());
                }
            }
        }
    }

    /// Sleep for `delay`; returns `false` if the run was cancelled first.
    async fn backoff(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStateStore, InteractionLog, QuotaLedger};
    use crate::types::{Credential, Session};
    use crate::vault::{CredentialVault, MasterKey, SessionStore};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Returns queued `act` results in order, then `Success`.
    #[derive(Default)]
    struct QueueAdapter {
        acts: Mutex<VecDeque<Result<ActionOutcome, AdapterError>>>,
        auths: Mutex<VecDeque<Result<Vec<u8>, AdapterError>>>,
        act_calls: AtomicU32,
        auth_calls: AtomicU32,
        panic_on_act: bool,
    }

    impl QueueAdapter {
        fn with_acts(acts: Vec<Result<ActionOutcome, AdapterError>>) -> Self {
            Self {
                acts: Mutex::new(acts.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl PlatformAdapter for QueueAdapter {
        fn name(&self) -> &str {
            "queue"
        }

        async fn authenticate(
            &self,
            _credential: &Credential,
            cached: Option<&Session>,
        ) -> Result<Vec<u8>, AdapterError> {
            self.auth_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(next) = self.auths.lock().unwrap().pop_front() {
                return next;
            }
            Ok(cached
                .map(|s| s.artifact.clone())
                .unwrap_or_else(|| b"fresh".to_vec()))
        }

        async fn discover(
            &self,
            _target_account: &str,
            max: usize,
        ) -> Result<Vec<Candidate>, AdapterError> {
            Ok((0..max + 2).map(|i| Candidate::new(format!("c{}", i))).collect())
        }

        async fn act(
            &self,
            _candidate: &Candidate,
            _action: ActionKind,
        ) -> Result<ActionOutcome, AdapterError> {
            self.act_calls.fetch_add(1, Ordering::SeqCst);
            if self.panic_on_act {
                panic!("selector not found");
            }
            self.acts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ActionOutcome::success()))
        }
    }

    struct Fixture {
        _temp: tempfile::TempDir,
        store: Arc<InMemoryStateStore>,
        vault: VaultHandle,
        target: Arc<Target>,
    }

    fn fixture(limit: u32) -> Fixture {
        let temp = tempfile::tempdir().expect("tempdir");
        let vault = CredentialVault::unlock(
            Some(MasterKey::from_bytes([9; 32])),
            SessionStore::new(temp.path().join("sessions")),
            vec![Credential::new("ig", "alice", "pw")],
        )
        .unwrap();
        Fixture {
            _temp: temp,
            store: Arc::new(InMemoryStateStore::new()),
            vault,
            target: Arc::new(Target::new(
                "ig",
                "https://example.test",
                limit,
                [ActionKind::Follow],
                "acct",
            )),
        }
    }

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: 0.0,
        }
    }

    fn executor(fx: &Fixture, adapter: Arc<QueueAdapter>) -> ActionExecutor {
        ActionExecutor::new(
            fx.target.clone(),
            adapter,
            fx.vault.clone(),
            SharedState::from_store(fx.store.clone()),
            fast_policy(),
            CancellationToken::new(),
        )
    }

    async fn used(fx: &Fixture) -> u32 {
        fx.store
            .current("ig", store::today())
            .await
            .unwrap()
            .map(|r| r.used)
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_success_keeps_reservation() {
        let fx = fixture(5);
        let adapter = Arc::new(QueueAdapter::default());
        let mut exec = executor(&fx, adapter.clone());

        let result = exec.execute(&Candidate::new("bob"), ActionKind::Follow).await;
        assert_eq!(result.outcome.kind, OutcomeKind::Success);
        assert_eq!(result.tally, Some(InteractionStatus::Succeeded));
        assert_eq!(result.directive, Directive::Continue);
        assert_eq!(result.signal(), None);
        assert_eq!(used(&fx).await, 1);
    }

    #[tokio::test]
    async fn test_second_execute_is_already_done_without_adapter_call() {
        let fx = fixture(5);
        let adapter = Arc::new(QueueAdapter::default());
        let mut exec = executor(&fx, adapter.clone());

        exec.execute(&Candidate::new("bob"), ActionKind::Follow).await;
        let again = exec.execute(&Candidate::new("bob"), ActionKind::Follow).await;

        assert_eq!(again.outcome.kind, OutcomeKind::AlreadyDone);
        assert_eq!(again.tally, Some(InteractionStatus::Skipped));
        assert_eq!(again.signal(), Some(ErrorClass::Replay));
        assert_eq!(adapter.act_calls.load(Ordering::SeqCst), 1);
        assert_eq!(used(&fx).await, 1);
    }

    #[tokio::test]
    async fn test_local_cap_refuses_without_adapter_call() {
        let fx = fixture(1);
        let adapter = Arc::new(QueueAdapter::default());
        let mut exec = executor(&fx, adapter.clone());

        exec.execute(&Candidate::new("a"), ActionKind::Follow).await;
        let refused = exec.execute(&Candidate::new("b"), ActionKind::Follow).await;

        assert_eq!(refused.outcome.kind, OutcomeKind::RateLimited);
        assert_eq!(refused.tally, None);
        assert_eq!(
            refused.directive,
            Directive::Finish(ErrorClass::QuotaExhausted)
        );
        assert_eq!(adapter.act_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_adapter_already_done_releases() {
        let fx = fixture(5);
        let adapter = Arc::new(QueueAdapter::with_acts(vec![Ok(ActionOutcome::already_done())]));
        let mut exec = executor(&fx, adapter);

        let result = exec.execute(&Candidate::new("bob"), ActionKind::Follow).await;
        assert_eq!(result.tally, Some(InteractionStatus::Skipped));
        assert_eq!(used(&fx).await, 0);
    }

    #[tokio::test]
    async fn test_transient_exhaustion_records_failed_and_releases() {
        let fx = fixture(5);
        let adapter = Arc::new(QueueAdapter::with_acts(vec![
            Ok(ActionOutcome::transient("timeout")),
            Err(AdapterError::transient("reset")),
            Ok(ActionOutcome::transient("timeout")),
        ]));
        let mut exec = executor(&fx, adapter.clone());

        let result = exec.execute(&Candidate::new("bob"), ActionKind::Follow).await;
        assert_eq!(result.attempts, 3);
        assert_eq!(result.tally, Some(InteractionStatus::Failed));
        assert_eq!(result.directive, Directive::Continue);
        assert_eq!(result.signal(), Some(ErrorClass::TransientIo));
        assert_eq!(adapter.act_calls.load(Ordering::SeqCst), 3);
        assert_eq!(used(&fx).await, 0);

        let records = fx.store.records_for("ig").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, InteractionStatus::Failed);
    }

    /// Log whose `record` always fails, as if another writer won the race
    /// (`duplicate`) or the disk went away.
    struct FailingLog {
        duplicate: bool,
    }

    #[async_trait]
    impl InteractionLog for FailingLog {
        async fn has_succeeded(
            &self,
            _target_id: &str,
            _candidate_key: &str,
            _action_kind: ActionKind,
        ) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn record(&self, record: &InteractionRecord) -> Result<(), StoreError> {
            if self.duplicate {
                Err(StoreError::DuplicateSuccess {
                    target_id: record.target_id.clone(),
                    candidate_key: record.candidate_key.clone(),
                    action_kind: record.action_kind.to_string(),
                })
            } else {
                Err(StoreError::Corrupt("disk full".into()))
            }
        }

        async fn records_for(&self, _target_id: &str) -> Result<Vec<InteractionRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn executor_with_log(fx: &Fixture, log: FailingLog) -> ActionExecutor {
        let state = SharedState {
            ledger: fx.store.clone(),
            log: Arc::new(log),
        };
        ActionExecutor::new(
            fx.target.clone(),
            Arc::new(QueueAdapter::default()),
            fx.vault.clone(),
            state,
            fast_policy(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_success_releases_unit() {
        let fx = fixture(5);
        let mut exec = executor_with_log(&fx, FailingLog { duplicate: true });

        let result = exec.execute(&Candidate::new("bob"), ActionKind::Follow).await;
        assert_eq!(result.outcome.kind, OutcomeKind::AlreadyDone);
        assert_eq!(result.tally, Some(InteractionStatus::Skipped));
        assert_eq!(result.directive, Directive::Continue);
        assert_eq!(result.signal(), Some(ErrorClass::Replay));
        assert_eq!(used(&fx).await, 0);
    }

    #[tokio::test]
    async fn test_unrecordable_success_keeps_unit_and_aborts() {
        let fx = fixture(5);
        let mut exec = executor_with_log(&fx, FailingLog { duplicate: false });

        let result = exec.execute(&Candidate::new("bob"), ActionKind::Follow).await;
        assert_eq!(result.outcome.kind, OutcomeKind::Success);
        assert_eq!(result.tally, Some(InteractionStatus::Succeeded));
        assert!(matches!(
            result.directive,
            Directive::Abort(ref fault) if fault.class == ErrorClass::Storage
        ));
        assert_eq!(used(&fx).await, 1);
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let fx = fixture(5);
        let adapter = Arc::new(QueueAdapter::with_acts(vec![Ok(ActionOutcome::transient(
            "timeout",
        ))]));
        let mut exec = executor(&fx, adapter);

        let result = exec.execute(&Candidate::new("bob"), ActionKind::Follow).await;
        assert_eq!(result.attempts, 2);
        assert_eq!(result.tally, Some(InteractionStatus::Succeeded));
        assert_eq!(used(&fx).await, 1);
    }

    #[tokio::test]
    async fn test_fatal_aborts_and_releases() {
        let fx = fixture(5);
        let adapter = Arc::new(QueueAdapter::with_acts(vec![Ok(ActionOutcome::fatal(
            "account suspended",
        ))]));
        let mut exec = executor(&fx, adapter);

        let result = exec.execute(&Candidate::new("bob"), ActionKind::Follow).await;
        match result.directive {
            Directive::Abort(fault) => assert_eq!(fault.class, ErrorClass::AdapterFault),
            other => panic!("expected abort, got {:?}", other),
        }
        assert_eq!(result.tally, Some(InteractionStatus::Failed));
        assert_eq!(used(&fx).await, 0);
    }

    #[tokio::test]
    async fn test_platform_rate_limit_aborts_as_throttled() {
        let fx = fixture(5);
        let adapter = Arc::new(QueueAdapter::with_acts(vec![Err(AdapterError::throttled(
            "try again later",
        ))]));
        let mut exec = executor(&fx, adapter);

        let result = exec.execute(&Candidate::new("bob"), ActionKind::Follow).await;
        assert_eq!(result.outcome.kind, OutcomeKind::RateLimited);
        assert_eq!(result.tally, Some(InteractionStatus::Skipped));
        match result.directive {
            Directive::Abort(fault) => assert_eq!(fault.class, ErrorClass::PlatformThrottled),
            other => panic!("expected abort, got {:?}", other),
        }
        assert_eq!(used(&fx).await, 0);
    }

    #[tokio::test]
    async fn test_panic_in_act_is_adapter_fault() {
        let fx = fixture(5);
        let adapter = Arc::new(QueueAdapter {
            panic_on_act: true,
            ..Default::default()
        });
        let mut exec = executor(&fx, adapter);

        let result = exec.execute(&Candidate::new("bob"), ActionKind::Follow).await;
        match result.directive {
            Directive::Abort(fault) => {
                assert_eq!(fault.class, ErrorClass::AdapterFault);
                assert!(fault.detail.contains("selector not found"));
            }
            other => panic!("expected abort, got {:?}", other),
        }
        assert_eq!(used(&fx).await, 0);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_releases() {
        let fx = fixture(5);
        let adapter = Arc::new(QueueAdapter::with_acts(vec![Ok(ActionOutcome::transient(
            "timeout",
        ))]));
        let cancel = CancellationToken::new();
        let mut exec = ActionExecutor::new(
            fx.target.clone(),
            adapter,
            fx.vault.clone(),
            SharedState::from_store(fx.store.clone()),
            BackoffPolicy {
                base_delay: Duration::from_secs(60),
                max_delay: Duration::from_secs(60),
                ..fast_policy()
            },
            cancel.clone(),
        );
        exec.authenticate().await.unwrap();
        cancel.cancel();

        let result = exec.execute(&Candidate::new("bob"), ActionKind::Follow).await;
        match result.directive {
            Directive::Abort(fault) => assert_eq!(fault.class, ErrorClass::Cancelled),
            other => panic!("expected abort, got {:?}", other),
        }
        assert_eq!(result.attempts, 1);
        assert_eq!(used(&fx).await, 0);
    }

    #[tokio::test]
    async fn test_rejected_cached_session_is_invalidated_and_retried() {
        let fx = fixture(5);
        fx.vault.put_session("ig", b"stale").await;

        let adapter = Arc::new(QueueAdapter {
            auths: Mutex::new(
                vec![
                    Err(AdapterError::authentication("session expired")),
                    Ok(b"renewed".to_vec()),
                ]
                .into(),
            ),
            ..Default::default()
        });
        let mut exec = executor(&fx, adapter.clone());

        exec.authenticate().await.unwrap();
        assert_eq!(adapter.auth_calls.load(Ordering::SeqCst), 2);
        let session = fx.vault.get_session("ig").await.unwrap();
        assert_eq!(session.artifact, b"renewed");
    }

    #[tokio::test]
    async fn test_bad_credentials_abort_as_authentication() {
        let fx = fixture(5);
        let adapter = Arc::new(QueueAdapter {
            auths: Mutex::new(vec![Err(AdapterError::authentication("bad password"))].into()),
            ..Default::default()
        });
        let mut exec = executor(&fx, adapter.clone());

        let fault = exec.authenticate().await.unwrap_err();
        assert_eq!(fault.class, ErrorClass::Authentication);
        assert_eq!(adapter.auth_calls.load(Ordering::SeqCst), 1);
        assert!(!exec.is_authenticated());
    }

    #[tokio::test]
    async fn test_discover_truncates() {
        let fx = fixture(5);
        let adapter = Arc::new(QueueAdapter::default());
        let mut exec = executor(&fx, adapter);

        let found = exec.discover(3).await.unwrap();
        assert_eq!(found.len(), 3);
    }
}
