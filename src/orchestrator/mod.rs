//! Runs every configured target in its own task and collects the summaries.
//!
//! Targets share nothing but the quota ledger and the interaction log. A
//! worker that fails, panics or is throttled ends its own target in `Aborted`;
//! the other workers keep going and the run always returns a summary per target.
//!
//! Concurrency is bounded by a semaphore (default: one permit per target).
//! Cancelling the token stops workers between actions: a target still waiting
//! for a permit is aborted without starting, a running one finishes its
//! in-flight adapter call, settles its reservation and aborts.

mod state;
mod worker;

pub use state::TargetState;

use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::adapter::PlatformAdapter;
use crate::error::{ErrorClass, RunError};
use crate::executor::ActionExecutor;
use crate::report::{RunReport, Summary};
use crate::retry::BackoffPolicy;
use crate::store::SharedState;
use crate::types::Target;
use crate::util::panic_message;
use crate::vault::VaultHandle;
use worker::TargetWorker;

/// A target paired with the adapter that will drive it.
#[derive(Clone)]
pub struct TargetPlan {
    pub target: Arc<Target>,
    pub adapter: Arc<dyn PlatformAdapter>,
}

impl TargetPlan {
    pub fn new(target: Target, adapter: Arc<dyn PlatformAdapter>) -> Self {
        Self {
            target: Arc::new(target),
            adapter,
        }
    }
}

pub struct Orchestrator {
    vault: VaultHandle,
    state: SharedState,
    policy: BackoffPolicy,
    max_concurrency: Option<usize>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(vault: VaultHandle, state: SharedState, policy: BackoffPolicy) -> Self {
        Self {
            vault,
            state,
            policy,
            max_concurrency: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Bound the number of targets processed at once. `None` means one worker per target.
    pub fn with_max_concurrency(mut self, max_concurrency: Option<usize>) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Token that cancels the run when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Process every target and return its summary, keyed by target id.
    ///
    /// # Errors
    /// `RunError::DuplicateTarget` if two plans share an id; nothing is started.
    pub async fn run(&self, plans: Vec<TargetPlan>) -> Result<BTreeMap<String, Summary>, RunError> {
        let mut seen = HashSet::new();
        for plan in &plans {
            if !seen.insert(plan.target.id.as_str()) {
                return Err(RunError::DuplicateTarget(plan.target.id.clone()));
            }
        }

        let permits = self
            .max_concurrency
            .unwrap_or(plans.len())
            .max(1);
        let semaphore = Arc::new(Semaphore::new(permits));
        tracing::info!(targets = plans.len(), max_concurrency = permits, "Starting run");

        let mut handles = Vec::with_capacity(plans.len());
        for plan in plans {
            let target_id = plan.target.id.clone();
            let handle = tokio::spawn(self.run_target(plan, semaphore.clone()));
            handles.push((target_id, handle));
        }

        let mut summaries = BTreeMap::new();
        for (target_id, handle) in handles {
            let summary = match handle.await {
                Ok(summary) => summary,
                Err(e) => {
                    tracing::error!(target_id = %target_id, "Worker task failed: {}", e);
                    let mut summary = Summary::new(&target_id);
                    summary.abort(ErrorClass::AdapterFault, format!("worker task failed: {}", e));
                    summary
                }
            };
            summaries.insert(target_id, summary);
        }
        Ok(summaries)
    }

    /// `run`, wrapped with identity and timing for reporting.
    pub async fn run_report(&self, plans: Vec<TargetPlan>) -> Result<RunReport, RunError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let targets = self
            .run(plans)
            .instrument(tracing::info_span!("run", run_id = %run_id))
            .await?;
        Ok(RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            targets,
        })
    }

    /// Future for one target's task. Never panics: failures end up in the summary.
    fn run_target(
        &self,
        plan: TargetPlan,
        semaphore: Arc<Semaphore>,
    ) -> impl std::future::Future<Output = Summary> + Send + 'static {
        let cancel = self.cancel.clone();
        let state = self.state.clone();
        let executor = ActionExecutor::new(
            plan.target.clone(),
            plan.adapter,
            self.vault.clone(),
            self.state.clone(),
            self.policy.clone(),
            cancel.clone(),
        );
        let target = plan.target;
        let span = tracing::info_span!("target", target_id = %target.id);

        async move {
            let mut summary = Summary::new(&target.id);

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.acquire_owned() => permit.ok(),
            };
            let Some(_permit) = permit else {
                tracing::info!("Cancelled before start");
                summary.abort(ErrorClass::Cancelled, "run cancelled before the target started");
                return summary;
            };

            let worker = TargetWorker::new(target, executor, state, cancel);
            let result = AssertUnwindSafe(worker.run(&mut summary))
                .catch_unwind()
                .await;
            if let Err(payload) = result {
                let message = panic_message(payload.as_ref());
                tracing::error!("Worker panicked: {}", message);
                summary.abort(ErrorClass::AdapterFault, format!("worker panicked: {}", message));
            }

            tracing::info!(
                state = %summary.state,
                succeeded = summary.succeeded,
                skipped = summary.skipped,
                failed = summary.failed,
                "Target finished"
            );
            summary
        }
        .instrument(span)
    }
}
