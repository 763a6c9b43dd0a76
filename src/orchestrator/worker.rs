use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::TargetState;
use crate::error::ErrorClass;
use crate::executor::{ActionExecutor, Directive};
use crate::report::Summary;
use crate::store::{self, SharedState};
use crate::types::Target;

/// Drives one target through its lifecycle. Owns the target's executor.
pub(crate) struct TargetWorker {
    target: Arc<Target>,
    executor: ActionExecutor,
    state: SharedState,
    cancel: CancellationToken,
}

impl TargetWorker {
    pub(crate) fn new(
        target: Arc<Target>,
        executor: ActionExecutor,
        state: SharedState,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            target,
            executor,
            state,
            cancel,
        }
    }

    pub(crate) async fn run(mut self, summary: &mut Summary) {
        summary.advance(TargetState::Authenticating);
        if self.cancel.is_cancelled() {
            summary.abort(ErrorClass::Cancelled, "run cancelled");
            return;
        }
        if let Err(fault) = self.executor.authenticate().await {
            summary.abort_with(fault);
            return;
        }

        summary.advance(TargetState::Discovering);
        let remaining = match self
            .state
            .ledger
            .remaining(&self.target.id, store::today(), self.target.daily_limit)
            .await
        {
            Ok(remaining) => remaining,
            Err(e) => {
                summary.abort(ErrorClass::Storage, e.to_string());
                return;
            }
        };
        if remaining == 0 {
            tracing::info!(limit = self.target.daily_limit, "Daily limit already reached");
            summary.quota_exhausted = true;
            summary.advance(TargetState::Done);
            return;
        }

        let candidates = match self.executor.discover(remaining as usize).await {
            Ok(candidates) => candidates,
            Err(fault) => {
                summary.abort_with(fault);
                return;
            }
        };
        tracing::info!(
            account = %self.target.target_account,
            candidates = candidates.len(),
            remaining,
            "Discovered candidates"
        );

        summary.advance(TargetState::Acting);
        let mut paced = false;
        for candidate in &candidates {
            for &kind in &self.target.action_kinds {
                if self.cancel.is_cancelled() {
                    summary.abort(ErrorClass::Cancelled, "run cancelled");
                    return;
                }
                if paced && !self.pace().await {
                    summary.abort(ErrorClass::Cancelled, "run cancelled");
                    return;
                }

                let execution = self.executor.execute(candidate, kind).await;
                tracing::debug!(
                    candidate = %candidate.key,
                    action = %kind,
                    outcome = ?execution.outcome.kind,
                    signal = ?execution.signal(),
                    "Action settled"
                );
                paced = execution.attempts > 0;
                if let Some(status) = execution.tally {
                    summary.tally(status);
                }

                match execution.directive {
                    Directive::Continue => {}
                    Directive::Finish(class) => {
                        summary.quota_exhausted = class == ErrorClass::QuotaExhausted;
                        summary.advance(TargetState::Done);
                        return;
                    }
                    Directive::Abort(fault) => {
                        summary.abort_with(fault);
                        return;
                    }
                }
            }
        }

        summary.advance(TargetState::Done);
    }

    /// Fixed pause between actions; returns `false` if cancelled first.
    async fn pace(&self) -> bool {
        if self.target.pacing.is_zero() {
            return true;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.target.pacing) => true,
        }
    }
}
