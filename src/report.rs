//! Per-target summaries and the run report.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorClass, TargetFault};
use crate::orchestrator::TargetState;
use crate::types::InteractionStatus;

/// Outcome of one target after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub target_id: String,
    pub succeeded: u32,
    pub skipped: u32,
    pub failed: u32,
    pub state: TargetState,
    /// Why the target was aborted; only set when `state` is `Aborted`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// The local daily cap stopped the target
    #[serde(default)]
    pub quota_exhausted: bool,
}

impl Summary {
    pub fn new(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            succeeded: 0,
            skipped: 0,
            failed: 0,
            state: TargetState::Pending,
            error: None,
            detail: None,
            quota_exhausted: false,
        }
    }

    /// Move to `next` if the transition is legal. Returns whether it happened.
    pub fn advance(&mut self, next: TargetState) -> bool {
        if !self.state.can_advance_to(next) {
            tracing::debug!(
                target_id = %self.target_id,
                from = %self.state,
                to = %next,
                "Ignoring illegal state transition"
            );
            return false;
        }
        self.state = next;
        true
    }

    pub fn tally(&mut self, status: InteractionStatus) {
        match status {
            InteractionStatus::Succeeded => self.succeeded += 1,
            InteractionStatus::Skipped => self.skipped += 1,
            InteractionStatus::Failed => self.failed += 1,
        }
    }

    /// End the target in `Aborted`. No effect once terminal.
    pub fn abort(&mut self, class: ErrorClass, detail: impl Into<String>) {
        if self.advance(TargetState::Aborted) {
            self.error = Some(class);
            self.detail = Some(detail.into());
        }
    }

    pub fn abort_with(&mut self, fault: TargetFault) {
        self.abort(fault.class, fault.detail);
    }

    /// Total number of actions counted.
    pub fn total(&self) -> u32 {
        self.succeeded + self.skipped + self.failed
    }
}

/// Everything a run produced, ready to log or serialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub targets: BTreeMap<String, Summary>,
}

impl RunReport {
    pub fn aborted(&self) -> impl Iterator<Item = &Summary> {
        self.targets
            .values()
            .filter(|s| s.state == TargetState::Aborted)
    }

    pub fn total_succeeded(&self) -> u32 {
        self.targets.values().map(|s| s.succeeded).sum()
    }

    /// One log line per target plus a totals line.
    pub fn log_summary(&self) {
        for summary in self.targets.values() {
            match summary.state {
                TargetState::Aborted => tracing::warn!(
                    target_id = %summary.target_id,
                    succeeded = summary.succeeded,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    error = ?summary.error,
                    detail = summary.detail.as_deref().unwrap_or(""),
                    "Target aborted"
                ),
                _ => tracing::info!(
                    target_id = %summary.target_id,
                    succeeded = summary.succeeded,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    quota_exhausted = summary.quota_exhausted,
                    "Target {}",
                    summary.state
                ),
            }
        }

        let elapsed = self.finished_at - self.started_at;
        tracing::info!(
            run_id = %self.run_id,
            targets = self.targets.len(),
            aborted = self.aborted().count(),
            succeeded = self.total_succeeded(),
            actions = self.targets.values().map(Summary::total).sum::<u32>(),
            elapsed_secs = elapsed.num_seconds(),
            "Run complete"
        );
    }

    /// Write the report as pretty JSON, replacing any previous file atomically.
    pub async fn write_to(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        crate::util::write_atomic(path, &json).await
    }
}
