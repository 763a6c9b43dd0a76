//! Error types with per-target classification.
//!
//! Every failure that happens while a target is being processed is mapped onto
//! an [`ErrorClass`]. Classes are target-scoped: none of them ever stops the
//! processing of a different target.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of why a target stopped (or why an action did not count).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Bad credentials or rejected session - fatal for the target
    Authentication,
    /// Action already recorded as succeeded - a no-op signal, not a failure
    Replay,
    /// Local daily cap reached - the target stops gracefully
    QuotaExhausted,
    /// The remote platform asked us to back off - authoritative, the target stops
    PlatformThrottled,
    /// Network/timeout failure that survived every retry
    TransientIo,
    /// Unexpected or unclassified failure raised by the adapter (including panics)
    AdapterFault,
    /// The run was cancelled (signal or deadline) before the target finished
    Cancelled,
    /// The quota ledger or interaction log could not be read or written mid-run
    Storage,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::Authentication => "Authentication error",
            ErrorClass::Replay => "Replay",
            ErrorClass::QuotaExhausted => "Quota exhausted",
            ErrorClass::PlatformThrottled => "Platform throttled",
            ErrorClass::TransientIo => "Transient I/O error",
            ErrorClass::AdapterFault => "Adapter fault",
            ErrorClass::Cancelled => "Cancelled",
            ErrorClass::Storage => "Storage error",
        };
        f.write_str(s)
    }
}

/// Why a target could not continue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{class}: {detail}")]
pub struct TargetFault {
    pub class: ErrorClass,
    pub detail: String,
}

impl TargetFault {
    pub fn new(class: ErrorClass, detail: impl Into<String>) -> Self {
        Self {
            class,
            detail: detail.into(),
        }
    }
}

/// Classification of errors raised by a platform adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterErrorKind {
    /// Credentials or cached session rejected
    Authentication,
    /// Platform returned a "try again later" signal
    Throttled,
    /// Network error, timeout, or crashed helper - retry with backoff
    Transient,
    /// Anything the adapter could not classify
    Fault,
}

impl AdapterErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterErrorKind::Transient)
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            AdapterErrorKind::Authentication => ErrorClass::Authentication,
            AdapterErrorKind::Throttled => ErrorClass::PlatformThrottled,
            AdapterErrorKind::Transient => ErrorClass::TransientIo,
            AdapterErrorKind::Fault => ErrorClass::AdapterFault,
        }
    }
}

impl fmt::Display for AdapterErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterErrorKind::Authentication => write!(f, "Authentication rejected"),
            AdapterErrorKind::Throttled => write!(f, "Throttled"),
            AdapterErrorKind::Transient => write!(f, "Transient error"),
            AdapterErrorKind::Fault => write!(f, "Adapter fault"),
        }
    }
}

/// Error from a platform adapter call.
#[derive(Debug, Clone)]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub message: String,
}

impl AdapterError {
    pub fn authentication(message: impl Into<String>) -> Self {
        Self {
            kind: AdapterErrorKind::Authentication,
            message: message.into(),
        }
    }

    pub fn throttled(message: impl Into<String>) -> Self {
        Self {
            kind: AdapterErrorKind::Throttled,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: AdapterErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn fault(message: impl Into<String>) -> Self {
        Self {
            kind: AdapterErrorKind::Fault,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    pub fn into_fault(self) -> TargetFault {
        TargetFault::new(self.kind.class(), self.message)
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AdapterError {}

/// Error from the quota ledger or the interaction log.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("A succeeded record already exists for {target_id}/{candidate_key}/{action_kind}")]
    DuplicateSuccess {
        target_id: String,
        candidate_key: String,
        action_kind: String,
    },

    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
}

/// Error that stops a run before any target starts.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Target id {0} appears more than once")]
    DuplicateTarget(String),
}

/// Error from the credential vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("No credential configured for target {0}")]
    UnknownTarget(String),
}
