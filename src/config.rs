//! Configuration management for the engagement orchestrator.
//!
//! Process settings come from environment variables:
//! - `ENGAGE_TARGETS_FILE` - Optional. Path to the targets file. Defaults to `targets.yaml`.
//! - `ENGAGE_STATE_DIR` - Optional. Directory for `state.db` and `sessions/`. Defaults to `.engage`.
//! - `ENGAGE_MASTER_KEY` - Optional. 32-byte session cache key, hex or base64.
//!   Without it the session cache is disabled and every run logs in with credentials.
//! - `ENGAGE_MAX_CONCURRENCY` - Optional. Number of targets processed at once. Defaults to all.
//! - `ENGAGE_RUN_TIMEOUT_SECS` - Optional. Cancel the run after this many seconds.
//! - `ENGAGE_MAX_ATTEMPTS` - Optional. Attempts per action on transient failures. Defaults to `3`.
//! - `ENGAGE_BACKOFF_BASE_MS` - Optional. First retry delay. Defaults to `500`.
//! - `ENGAGE_BACKOFF_MAX_MS` - Optional. Retry delay cap. Defaults to `30000`.
//! - `ENGAGE_REPORT_PATH` - Optional. Where to write the JSON run report.
//!
//! Targets are described in a YAML file:
//!
//! ```yaml
//! targets:
//!   instagram:
//!     base_url: https://www.instagram.com
//!     daily_limit: 133
//!     action_kinds: [follow]
//!     target_account: davidguetta
//!     pacing_ms: 1000
//!     credential:
//!       principal_env: INSTAGRAM_USERNAME
//!       secret_env: INSTAGRAM_PASSWORD
//!     adapter:
//!       kind: process
//!       command: ["node", "adapters/instagram.mjs"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::adapter::{AdapterRegistry, AdapterSpec};
use crate::retry::BackoffPolicy;
use crate::types::{ActionKind, Credential, Target};
use crate::util::parse_opt;
use crate::vault::MasterKey;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to read targets file {path}: {source}")]
    ReadTargets {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse targets file: {0}")]
    ParseTargets(#[from] serde_yaml::Error),

    #[error("Invalid target '{0}': {1}")]
    InvalidTarget(String, String),
}

/// Process-level settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub targets_file: PathBuf,
    pub state_dir: PathBuf,
    pub master_key: Option<MasterKey>,
    pub max_concurrency: Option<usize>,
    pub run_timeout: Option<Duration>,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub report_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` for unparseable numbers or a malformed master key.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let number = |name: &str| -> Result<Option<u64>, ConfigError> {
            parse_opt::<u64>(lookup(name))
                .map_err(|e| ConfigError::InvalidValue(name.to_string(), e))
        };

        let targets_file = lookup("ENGAGE_TARGETS_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("targets.yaml"));

        let state_dir = lookup("ENGAGE_STATE_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".engage"));

        // The key itself never appears in the error.
        let master_key = match lookup("ENGAGE_MASTER_KEY").filter(|v| !v.trim().is_empty()) {
            Some(raw) => Some(MasterKey::parse(&raw).map_err(|e| {
                ConfigError::InvalidValue("ENGAGE_MASTER_KEY".to_string(), e.to_string())
            })?),
            None => None,
        };

        let max_concurrency = match number("ENGAGE_MAX_CONCURRENCY")? {
            Some(0) => {
                return Err(ConfigError::InvalidValue(
                    "ENGAGE_MAX_CONCURRENCY".to_string(),
                    "must be at least 1".to_string(),
                ))
            }
            other => other.map(|n| n as usize),
        };

        let run_timeout = number("ENGAGE_RUN_TIMEOUT_SECS")?.map(Duration::from_secs);

        let max_attempts = number("ENGAGE_MAX_ATTEMPTS")?.unwrap_or(3);
        if max_attempts == 0 || max_attempts > u32::MAX as u64 {
            return Err(ConfigError::InvalidValue(
                "ENGAGE_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let backoff_base = Duration::from_millis(number("ENGAGE_BACKOFF_BASE_MS")?.unwrap_or(500));
        let backoff_max = Duration::from_millis(number("ENGAGE_BACKOFF_MAX_MS")?.unwrap_or(30_000));
        if backoff_base.is_zero() {
            return Err(ConfigError::InvalidValue(
                "ENGAGE_BACKOFF_BASE_MS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if backoff_base > backoff_max {
            return Err(ConfigError::InvalidValue(
                "ENGAGE_BACKOFF_BASE_MS".to_string(),
                "must not exceed ENGAGE_BACKOFF_MAX_MS".to_string(),
            ));
        }

        let report_path = lookup("ENGAGE_REPORT_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            targets_file,
            state_dir,
            master_key,
            max_concurrency,
            run_timeout,
            max_attempts: max_attempts as u32,
            backoff_base,
            backoff_max,
            report_path,
        })
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.backoff_base,
            max_delay: self.backoff_max,
            ..BackoffPolicy::default()
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.state_dir.join("state.db")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.state_dir.join("sessions")
    }
}

/// Names of the environment variables holding a target's login.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialRef {
    pub principal_env: String,
    pub secret_env: String,
}

/// One entry of the targets file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    pub base_url: String,
    pub daily_limit: u32,
    pub action_kinds: Vec<ActionKind>,
    /// Account whose audience is used for discovery
    pub target_account: String,
    #[serde(default)]
    pub pacing_ms: u64,
    pub credential: CredentialRef,
    pub adapter: AdapterSpec,
}

/// A target with its credential looked up and ready to run.
#[derive(Debug)]
pub struct ResolvedTarget {
    pub target: Target,
    pub credential: Credential,
    pub adapter: AdapterSpec,
}

/// The parsed targets file. Immutable for the run.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetsFile {
    pub targets: BTreeMap<String, TargetConfig>,
}

impl TargetsFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadTargets {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: TargetsFile = serde_yaml::from_str(raw)?;
        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::InvalidValue(
                "targets".to_string(),
                "at least one target is required".to_string(),
            ));
        }

        for (id, cfg) in &self.targets {
            let invalid = |msg: &str| ConfigError::InvalidTarget(id.clone(), msg.to_string());

            if id.is_empty()
                || !id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(invalid("id may only contain letters, digits, '-' and '_'"));
            }
            if cfg.daily_limit == 0 {
                return Err(invalid("daily_limit must be greater than 0"));
            }
            if cfg.action_kinds.is_empty() {
                return Err(invalid("action_kinds must not be empty"));
            }
            if cfg.target_account.trim().is_empty() {
                return Err(invalid("target_account must not be empty"));
            }
            if cfg.base_url.trim().is_empty() {
                return Err(invalid("base_url must not be empty"));
            }
        }
        Ok(())
    }

    /// Check adapter kinds and read credentials through `lookup`.
    ///
    /// # Errors
    /// Unknown adapter kinds and missing or empty credential variables.
    pub fn resolve(
        &self,
        registry: &AdapterRegistry,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Vec<ResolvedTarget>, ConfigError> {
        let mut resolved = Vec::with_capacity(self.targets.len());

        for (id, cfg) in &self.targets {
            if !registry.contains(&cfg.adapter.kind) {
                return Err(ConfigError::InvalidTarget(
                    id.clone(),
                    format!(
                        "unknown adapter kind '{}' (available: {})",
                        cfg.adapter.kind,
                        registry.kinds().join(", ")
                    ),
                ));
            }

            let read = |name: &str| {
                lookup(name)
                    .filter(|v| !v.trim().is_empty())
                    .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
            };
            let principal = read(&cfg.credential.principal_env)?;
            let secret = read(&cfg.credential.secret_env)?;

            let target = Target::new(
                id.clone(),
                cfg.base_url.clone(),
                cfg.daily_limit,
                cfg.action_kinds.iter().copied(),
                cfg.target_account.clone(),
            )
            .with_pacing(Duration::from_millis(cfg.pacing_ms));

            resolved.push(ResolvedTarget {
                target,
                credential: Credential::new(id.clone(), principal, secret),
                adapter: cfg.adapter.clone(),
            });
        }

        Ok(resolved)
    }
}
