//! In-memory state store (non-persistent).

use super::{day_key, InteractionLog, QuotaLedger};
use crate::error::StoreError;
use crate::types::{ActionKind, InteractionRecord, InteractionStatus, QuotaRecord};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

#[derive(Default)]
struct LogState {
    records: Vec<InteractionRecord>,
    succeeded: HashSet<(String, String, ActionKind)>,
}

#[derive(Default)]
pub struct InMemoryStateStore {
    quotas: Mutex<HashMap<(String, String), QuotaRecord>>,
    log: Mutex<LogState>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuotaLedger for InMemoryStateStore {
    async fn reserve(
        &self,
        target_id: &str,
        date: NaiveDate,
        n: u32,
        limit: u32,
    ) -> Result<u32, StoreError> {
        let mut quotas = self.quotas.lock().await;
        let record = quotas
            .entry((target_id.to_string(), day_key(date)))
            .or_insert_with(|| QuotaRecord {
                target_id: target_id.to_string(),
                date,
                used: 0,
                limit,
            });
        let granted = n.min(record.remaining());
        record.used += granted;
        Ok(granted)
    }

    async fn release(&self, target_id: &str, date: NaiveDate, n: u32) -> Result<(), StoreError> {
        let mut quotas = self.quotas.lock().await;
        match quotas.get_mut(&(target_id.to_string(), day_key(date))) {
            Some(record) => {
                if n > record.used {
                    tracing::warn!(
                        target_id = %target_id,
                        used = record.used,
                        requested = n,
                        "Release exceeds reserved units; clamping at zero"
                    );
                }
                record.used = record.used.saturating_sub(n);
            }
            None => {
                tracing::warn!(target_id = %target_id, %date, "Release without a quota record");
            }
        }
        Ok(())
    }

    async fn current(
        &self,
        target_id: &str,
        date: NaiveDate,
    ) -> Result<Option<QuotaRecord>, StoreError> {
        Ok(self
            .quotas
            .lock()
            .await
            .get(&(target_id.to_string(), day_key(date)))
            .cloned())
    }
}

#[async_trait]
impl InteractionLog for InMemoryStateStore {
    async fn has_succeeded(
        &self,
        target_id: &str,
        candidate_key: &str,
        action_kind: ActionKind,
    ) -> Result<bool, StoreError> {
        let key = (target_id.to_string(), candidate_key.to_string(), action_kind);
        Ok(self.log.lock().await.succeeded.contains(&key))
    }

    async fn record(&self, record: &InteractionRecord) -> Result<(), StoreError> {
        let mut log = self.log.lock().await;
        if record.outcome == InteractionStatus::Succeeded {
            let key = (
                record.target_id.clone(),
                record.candidate_key.clone(),
                record.action_kind,
            );
            if !log.succeeded.insert(key) {
                return Err(StoreError::DuplicateSuccess {
                    target_id: record.target_id.clone(),
                    candidate_key: record.candidate_key.clone(),
                    action_kind: record.action_kind.to_string(),
                });
            }
        }
        log.records.push(record.clone());
        Ok(())
    }

    async fn records_for(&self, target_id: &str) -> Result<Vec<InteractionRecord>, StoreError> {
        Ok(self
            .log
            .lock()
            .await
            .records
            .iter()
            .filter(|r| r.target_id == target_id)
            .cloned()
            .collect())
    }
}
