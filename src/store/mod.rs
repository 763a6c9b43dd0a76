//! Persisted run state with pluggable backends.
//!
//! Two stores are shared by every target worker:
//! - the **quota ledger**: actions taken per `(target, day)`, capped by the target's daily limit
//! - the **interaction log**: append-only record of every action, used for dedup and auditing
//!
//! Backends:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `sqlite`: SQLite database; both stores share one `state.db`
//!
//! Reservations are pessimistic: `reserve` counts an action before it is
//! attempted and `release` gives the unit back when the action fails or turns
//! out to be a duplicate. Under a race the ledger can over-restrict for a moment
//! but never lets more than `limit` actions through.

mod lock;
mod memory;
mod sqlite;

pub use lock::StateLock;
pub use memory::InMemoryStateStore;
pub use sqlite::SqliteStateStore;

use crate::error::StoreError;
use crate::types::{ActionKind, InteractionRecord, QuotaRecord};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;

/// Daily action counter per target.
#[async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Atomically reserve up to `n` units for `(target_id, date)`.
    ///
    /// The record is created lazily with `used = 0` and `limit` copied from the
    /// argument; an existing record keeps the limit it was created with.
    /// Returns the number of units granted (`<= n`); `0` means the day is exhausted.
    async fn reserve(
        &self,
        target_id: &str,
        date: NaiveDate,
        n: u32,
        limit: u32,
    ) -> Result<u32, StoreError>;

    /// Return `n` previously reserved units. `used` never drops below zero.
    async fn release(&self, target_id: &str, date: NaiveDate, n: u32) -> Result<(), StoreError>;

    /// Current record for `(target_id, date)`, if one was created.
    async fn current(
        &self,
        target_id: &str,
        date: NaiveDate,
    ) -> Result<Option<QuotaRecord>, StoreError>;

    /// Units still available today for a target with the given limit.
    async fn remaining(
        &self,
        target_id: &str,
        date: NaiveDate,
        limit: u32,
    ) -> Result<u32, StoreError> {
        Ok(self
            .current(target_id, date)
            .await?
            .map(|record| record.remaining())
            .unwrap_or(limit))
    }
}

/// Append-only memory of every action taken.
#[async_trait]
pub trait InteractionLog: Send + Sync {
    /// Whether a `succeeded` record exists for this triple.
    async fn has_succeeded(
        &self,
        target_id: &str,
        candidate_key: &str,
        action_kind: ActionKind,
    ) -> Result<bool, StoreError>;

    /// Append a record.
    ///
    /// # Errors
    /// `StoreError::DuplicateSuccess` if the record is `succeeded` and one already exists.
    async fn record(&self, record: &InteractionRecord) -> Result<(), StoreError>;

    /// All records for a target, in insertion order.
    async fn records_for(&self, target_id: &str) -> Result<Vec<InteractionRecord>, StoreError>;
}

/// The two shared stores as handed to executors.
#[derive(Clone)]
pub struct SharedState {
    pub ledger: Arc<dyn QuotaLedger>,
    pub log: Arc<dyn InteractionLog>,
}

impl SharedState {
    /// Use one backend for both stores.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: QuotaLedger + InteractionLog + 'static,
    {
        Self {
            ledger: store.clone(),
            log: store,
        }
    }
}

/// Ledger day for "now", on the process-local clock.
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Format used for the `date` column and map keys.
pub(crate) fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
pub(crate) mod conformance {
    //! Behavior every backend must share; called from each backend's tests.

    use super::*;
    use crate::types::InteractionStatus;

    pub fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    pub async fn reserve_caps_at_limit<S: QuotaLedger>(store: &S) {
        assert_eq!(store.reserve("t1", day(), 1, 5).await.unwrap(), 1);
        assert_eq!(store.reserve("t1", day(), 3, 5).await.unwrap(), 3);
        // Partial grant: only one unit left.
        assert_eq!(store.reserve("t1", day(), 3, 5).await.unwrap(), 1);
        assert_eq!(store.reserve("t1", day(), 1, 5).await.unwrap(), 0);

        let record = store.current("t1", day()).await.unwrap().unwrap();
        assert_eq!(record.used, 5);
        assert_eq!(record.limit, 5);
        assert_eq!(store.remaining("t1", day(), 5).await.unwrap(), 0);
    }

    pub async fn release_never_goes_negative<S: QuotaLedger>(store: &S) {
        assert_eq!(store.reserve("t1", day(), 2, 3).await.unwrap(), 2);
        store.release("t1", day(), 1).await.unwrap();
        assert_eq!(store.current("t1", day()).await.unwrap().unwrap().used, 1);
        store.release("t1", day(), 5).await.unwrap();
        assert_eq!(store.current("t1", day()).await.unwrap().unwrap().used, 0);
        // Releasing against a day with no record is a no-op.
        store
            .release("t1", day().succ_opt().unwrap(), 1)
            .await
            .unwrap();
    }

    pub async fn new_day_starts_fresh<S: QuotaLedger>(store: &S) {
        assert_eq!(store.reserve("t1", day(), 2, 2).await.unwrap(), 2);
        let tomorrow = day().succ_opt().unwrap();
        assert_eq!(store.remaining("t1", tomorrow, 2).await.unwrap(), 2);
        assert_eq!(store.reserve("t1", tomorrow, 1, 2).await.unwrap(), 1);
        assert_eq!(store.current("t1", tomorrow).await.unwrap().unwrap().used, 1);
    }

    pub async fn limit_is_fixed_at_creation<S: QuotaLedger>(store: &S) {
        assert_eq!(store.reserve("t1", day(), 1, 2).await.unwrap(), 1);
        // A later call with a larger limit does not widen today's record.
        assert_eq!(store.reserve("t1", day(), 5, 10).await.unwrap(), 1);
        assert_eq!(store.current("t1", day()).await.unwrap().unwrap().limit, 2);
    }

    pub async fn targets_are_independent<S: QuotaLedger>(store: &S) {
        assert_eq!(store.reserve("t1", day(), 1, 1).await.unwrap(), 1);
        assert_eq!(store.reserve("t2", day(), 1, 1).await.unwrap(), 1);
        assert_eq!(store.reserve("t1", day(), 1, 1).await.unwrap(), 0);
    }

    pub async fn dedup_invariant<S: InteractionLog>(store: &S) {
        let failed =
            InteractionRecord::new("t1", "alice", ActionKind::Follow, InteractionStatus::Failed, None);
        store.record(&failed).await.unwrap();
        assert!(!store
            .has_succeeded("t1", "alice", ActionKind::Follow)
            .await
            .unwrap());

        let ok = InteractionRecord::new(
            "t1",
            "alice",
            ActionKind::Follow,
            InteractionStatus::Succeeded,
            None,
        );
        store.record(&ok).await.unwrap();
        assert!(store
            .has_succeeded("t1", "alice", ActionKind::Follow)
            .await
            .unwrap());
        // Other kinds and targets are unaffected.
        assert!(!store
            .has_succeeded("t1", "alice", ActionKind::Like)
            .await
            .unwrap());
        assert!(!store
            .has_succeeded("t2", "alice", ActionKind::Follow)
            .await
            .unwrap());

        let again = store.record(&ok).await;
        assert!(matches!(again, Err(StoreError::DuplicateSuccess { .. })));

        let records = store.records_for("t1").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].outcome, InteractionStatus::Failed);
        assert_eq!(records[1].outcome, InteractionStatus::Succeeded);
    }
}
