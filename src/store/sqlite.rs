//! SQLite-based state store holding both the quota ledger and the interaction log.

use super::{day_key, InteractionLog, QuotaLedger};
use crate::error::StoreError;
use crate::types::{ActionKind, InteractionRecord, InteractionStatus, QuotaRecord};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS quota_ledger (
    target_id TEXT NOT NULL,
    day TEXT NOT NULL,
    used INTEGER NOT NULL DEFAULT 0 CHECK (used >= 0),
    quota_limit INTEGER NOT NULL CHECK (quota_limit > 0),
    updated_at TEXT NOT NULL,
    PRIMARY KEY (target_id, day),
    CHECK (used <= quota_limit)
);

CREATE TABLE IF NOT EXISTS interactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target_id TEXT NOT NULL,
    candidate_key TEXT NOT NULL,
    action_kind TEXT NOT NULL,
    outcome TEXT NOT NULL,
    detail TEXT,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_interactions_lookup
    ON interactions(target_id, candidate_key, action_kind);
CREATE UNIQUE INDEX IF NOT EXISTS idx_interactions_one_success
    ON interactions(target_id, candidate_key, action_kind) WHERE outcome = 'succeeded';
"#;

pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    /// Open (or create) the database at `db_path`.
    pub async fn open(db_path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.execute_batch(SCHEMA)?;
            tracing::debug!("Opened state database at {}", db_path.display());
            Ok::<_, StoreError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await?
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {:?}: {}", value, e)))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl QuotaLedger for SqliteStateStore {
    async fn reserve(
        &self,
        target_id: &str,
        date: NaiveDate,
        n: u32,
        limit: u32,
    ) -> Result<u32, StoreError> {
        let target_id = target_id.to_string();
        let day = day_key(date);
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO quota_ledger (target_id, day, used, quota_limit, updated_at)
                 VALUES (?1, ?2, 0, ?3, ?4)",
                params![target_id, day, limit, Utc::now().to_rfc3339()],
            )?;
            let (used, quota_limit): (u32, u32) = tx.query_row(
                "SELECT used, quota_limit FROM quota_ledger WHERE target_id = ?1 AND day = ?2",
                params![target_id, day],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let granted = n.min(quota_limit.saturating_sub(used));
            if granted > 0 {
                tx.execute(
                    "UPDATE quota_ledger SET used = used + ?3, updated_at = ?4
                     WHERE target_id = ?1 AND day = ?2",
                    params![target_id, day, granted, Utc::now().to_rfc3339()],
                )?;
            }
            tx.commit()?;
            Ok(granted)
        })
        .await
    }

    async fn release(&self, target_id: &str, date: NaiveDate, n: u32) -> Result<(), StoreError> {
        let target_id = target_id.to_string();
        let day = day_key(date);
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let used: Option<u32> = tx
                .query_row(
                    "SELECT used FROM quota_ledger WHERE target_id = ?1 AND day = ?2",
                    params![target_id, day],
                    |row| row.get(0),
                )
                .optional()?;

            match used {
                Some(used) => {
                    if n > used {
                        tracing::warn!(
                            target_id = %target_id,
                            used,
                            requested = n,
                            "Release exceeds reserved units; clamping at zero"
                        );
                    }
                    tx.execute(
                        "UPDATE quota_ledger SET used = ?3, updated_at = ?4
                         WHERE target_id = ?1 AND day = ?2",
                        params![target_id, day, used.saturating_sub(n), Utc::now().to_rfc3339()],
                    )?;
                }
                None => {
                    tracing::warn!(target_id = %target_id, day = %day, "Release without a quota record");
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn current(
        &self,
        target_id: &str,
        date: NaiveDate,
    ) -> Result<Option<QuotaRecord>, StoreError> {
        let target_id = target_id.to_string();
        let day = day_key(date);
        self.with_conn(move |conn| {
            let row: Option<(u32, u32)> = conn
                .query_row(
                    "SELECT used, quota_limit FROM quota_ledger WHERE target_id = ?1 AND day = ?2",
                    params![target_id, day],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            Ok(row.map(|(used, limit)| QuotaRecord {
                target_id,
                date,
                used,
                limit,
            }))
        })
        .await
    }
}

#[async_trait]
impl InteractionLog for SqliteStateStore {
    async fn has_succeeded(
        &self,
        target_id: &str,
        candidate_key: &str,
        action_kind: ActionKind,
    ) -> Result<bool, StoreError> {
        let target_id = target_id.to_string();
        let candidate_key = candidate_key.to_string();
        self.with_conn(move |conn| {
            let exists = conn
                .prepare_cached(
                    "SELECT 1 FROM interactions
                     WHERE target_id = ?1 AND candidate_key = ?2 AND action_kind = ?3
                       AND outcome = 'succeeded'",
                )?
                .exists(params![target_id, candidate_key, action_kind.as_str()])?;
            Ok(exists)
        })
        .await
    }

    async fn record(&self, record: &InteractionRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let result = conn.execute(
                "INSERT INTO interactions
                    (target_id, candidate_key, action_kind, outcome, detail, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.target_id,
                    record.candidate_key,
                    record.action_kind.as_str(),
                    record.outcome.as_str(),
                    record.detail,
                    record.timestamp.to_rfc3339(),
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateSuccess {
                    target_id: record.target_id,
                    candidate_key: record.candidate_key,
                    action_kind: record.action_kind.to_string(),
                }),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn records_for(&self, target_id: &str) -> Result<Vec<InteractionRecord>, StoreError> {
        let target_id = target_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT candidate_key, action_kind, outcome, detail, recorded_at
                 FROM interactions WHERE target_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![target_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (candidate_key, kind, outcome, detail, recorded_at) = row?;
                let action_kind = ActionKind::parse(&kind)
                    .ok_or_else(|| StoreError::Corrupt(format!("action kind {:?}", kind)))?;
                let outcome = InteractionStatus::parse(&outcome)
                    .ok_or_else(|| StoreError::Corrupt(format!("outcome {:?}", outcome)))?;
                records.push(InteractionRecord {
                    target_id: target_id.clone(),
                    candidate_key,
                    action_kind,
                    outcome,
                    timestamp: parse_timestamp(&recorded_at)?,
                    detail,
                });
            }
            Ok(records)
        })
        .await
    }
}
