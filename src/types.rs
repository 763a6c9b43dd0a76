//! Core data model shared by the vault, the stores, the executor and the orchestrator.

use chrono::{DateTime, NaiveDate, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Kind of engagement action a target supports.
///
/// The derived ordering (follow, like, comment) is the order in which the
/// orchestrator applies kinds to a single candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Follow,
    Like,
    Comment,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Follow => "follow",
            ActionKind::Like => "like",
            ActionKind::Comment => "comment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "follow" => Some(ActionKind::Follow),
            "like" => Some(ActionKind::Like),
            "comment" => Some(ActionKind::Comment),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One external service the orchestrator drives. Immutable after configuration load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Stable key used for the ledger, the interaction log and the session cache
    pub id: String,
    pub base_url: String,
    /// Maximum number of actions per calendar day (always > 0)
    pub daily_limit: u32,
    pub action_kinds: BTreeSet<ActionKind>,
    /// Account whose audience is discovered for candidates
    pub target_account: String,
    /// Fixed pause between consecutive actions
    pub pacing: Duration,
}

impl Target {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        daily_limit: u32,
        action_kinds: impl IntoIterator<Item = ActionKind>,
        target_account: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            daily_limit,
            action_kinds: action_kinds.into_iter().collect(),
            target_account: target_account.into(),
            pacing: Duration::ZERO,
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }
}

/// Login material for one target. The secret never leaves memory in clear
/// and is redacted from `Debug` output.
pub struct Credential {
    pub target_id: String,
    pub principal: String,
    secret: SecretString,
}

impl Credential {
    pub fn new(
        target_id: impl Into<String>,
        principal: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            principal: principal.into(),
            secret: SecretString::from(secret.into()),
        }
    }

    pub fn expose_secret(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("target_id", &self.target_id)
            .field("principal", &self.principal)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// A discovered entity (profile, post) eligible for an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    /// Stable identity, e.g. a profile handle or post identifier
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Candidate {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: None,
        }
    }
}

/// Cached authentication state for one target.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub target_id: String,
    /// Opaque blob produced by the adapter (e.g. serialized cookies)
    pub artifact: Vec<u8>,
    pub saved_at: DateTime<Utc>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("target_id", &self.target_id)
            .field("artifact_len", &self.artifact.len())
            .field("saved_at", &self.saved_at)
            .finish()
    }
}

/// Actions taken against one target on one calendar day.
///
/// # Invariants
/// - `used <= limit`
/// - `limit` is copied from the target when the record is created and never changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub target_id: String,
    pub date: NaiveDate,
    pub used: u32,
    pub limit: u32,
}

impl QuotaRecord {
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }
}

/// Outcome stored in the interaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionStatus {
    Succeeded,
    Skipped,
    Failed,
}

impl InteractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionStatus::Succeeded => "succeeded",
            InteractionStatus::Skipped => "skipped",
            InteractionStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "succeeded" => Some(InteractionStatus::Succeeded),
            "skipped" => Some(InteractionStatus::Skipped),
            "failed" => Some(InteractionStatus::Failed),
            _ => None,
        }
    }
}

/// One append-only entry of the interaction log.
///
/// At most one `Succeeded` record exists per `(target_id, candidate_key, action_kind)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub target_id: String,
    pub candidate_key: String,
    pub action_kind: ActionKind,
    pub outcome: InteractionStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl InteractionRecord {
    pub fn new(
        target_id: &str,
        candidate_key: &str,
        action_kind: ActionKind,
        outcome: InteractionStatus,
        detail: Option<String>,
    ) -> Self {
        Self {
            target_id: target_id.to_string(),
            candidate_key: candidate_key.to_string(),
            action_kind,
            outcome,
            timestamp: Utc::now(),
            detail,
        }
    }
}

/// Classification of a single adapter action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    AlreadyDone,
    RateLimited,
    TransientFailure,
    FatalFailure,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeKind::Success => "success",
            OutcomeKind::AlreadyDone => "already done",
            OutcomeKind::RateLimited => "rate limited",
            OutcomeKind::TransientFailure => "transient failure",
            OutcomeKind::FatalFailure => "fatal failure",
        };
        f.write_str(s)
    }
}

/// Transient value describing what happened to one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub kind: OutcomeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ActionOutcome {
    pub fn new(kind: OutcomeKind, detail: Option<String>) -> Self {
        Self { kind, detail }
    }

    pub fn success() -> Self {
        Self::new(OutcomeKind::Success, None)
    }

    pub fn already_done() -> Self {
        Self::new(OutcomeKind::AlreadyDone, None)
    }

    pub fn rate_limited(detail: impl Into<String>) -> Self {
        Self::new(OutcomeKind::RateLimited, Some(detail.into()))
    }

    pub fn transient(detail: impl Into<String>) -> Self {
        Self::new(OutcomeKind::TransientFailure, Some(detail.into()))
    }

    pub fn fatal(detail: impl Into<String>) -> Self {
        Self::new(OutcomeKind::FatalFailure, Some(detail.into()))
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.kind, detail),
            None => write!(f, "{}", self.kind),
        }
    }
}
