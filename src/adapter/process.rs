//! Adapter that delegates to an external helper program.
//!
//! Every call spawns `command`, writes one JSON request line to its stdin and
//! reads the response from the last non-empty line of stdout. The helper owns
//! all page automation; this side only classifies what it reports.
//!
//! Request:  `{"op":"act","target_id":"ig","base_url":"...","candidate":{"key":"bob"},"action":"follow"}`
//! Response: `{"status":"ok"|"already_done"|"auth_failed"|"rate_limited"|"transient"|"fatal", "detail":"...", ...}`
//!
//! `authenticate` responses carry `session` (base64) and `discover` responses
//! carry `candidates`. The helper also receives `ENGAGE_TARGET_ID` and
//! `ENGAGE_BASE_URL` in its environment. Stderr is forwarded to the log.

use super::PlatformAdapter;
use crate::error::AdapterError;
use crate::types::{ActionKind, ActionOutcome, Candidate, Credential, OutcomeKind, Session, Target};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessOptions {
    /// Program and arguments, e.g. `["node", "adapters/instagram.mjs"]`
    pub command: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Authenticate {
        target_id: &'a str,
        base_url: &'a str,
        principal: &'a str,
        secret: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        session: Option<String>,
    },
    Discover {
        target_id: &'a str,
        base_url: &'a str,
        target_account: &'a str,
        max: usize,
    },
    Act {
        target_id: &'a str,
        base_url: &'a str,
        candidate: &'a Candidate,
        action: ActionKind,
    },
}

impl Request<'_> {
    fn op(&self) -> &'static str {
        match self {
            Request::Authenticate { .. } => "authenticate",
            Request::Discover { .. } => "discover",
            Request::Act { .. } => "act",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ResponseStatus {
    Ok,
    AlreadyDone,
    AuthFailed,
    RateLimited,
    Transient,
    Fatal,
}

#[derive(Debug, Deserialize)]
struct Response {
    status: ResponseStatus,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    session: Option<String>,
    #[serde(default)]
    candidates: Option<Vec<Candidate>>,
}

impl Response {
    fn detail_or(&self, fallback: &str) -> String {
        self.detail.clone().unwrap_or_else(|| fallback.to_string())
    }

    /// Map a non-`ok` status of an authenticate/discover call onto an error.
    fn into_error(self, op: &str) -> AdapterError {
        let detail = self.detail_or(op);
        match self.status {
            ResponseStatus::AuthFailed => AdapterError::authentication(detail),
            ResponseStatus::RateLimited => AdapterError::throttled(detail),
            ResponseStatus::Transient => AdapterError::transient(detail),
            ResponseStatus::Ok | ResponseStatus::AlreadyDone | ResponseStatus::Fatal => {
                AdapterError::fault(detail)
            }
        }
    }
}

pub struct ProcessAdapter {
    target_id: String,
    base_url: String,
    program: String,
    args: Vec<String>,
    options: ProcessOptions,
}

impl ProcessAdapter {
    pub fn new(target: &Target, options: ProcessOptions) -> Result<Self, AdapterError> {
        let (program, args) = options
            .command
            .split_first()
            .ok_or_else(|| AdapterError::fault("process adapter needs a non-empty 'command'"))?;
        Ok(Self {
            target_id: target.id.clone(),
            base_url: target.base_url.clone(),
            program: program.clone(),
            args: args.to_vec(),
            options,
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.options.timeout_secs.max(1))
    }

    async fn call(&self, request: &Request<'_>) -> Result<Response, AdapterError> {
        let op = request.op();
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("ENGAGE_TARGET_ID", &self.target_id)
            .env("ENGAGE_BASE_URL", &self.base_url)
            .envs(&self.options.env);
        if let Some(dir) = &self.options.working_dir {
            cmd.current_dir(dir);
        }

        tracing::debug!(target_id = %self.target_id, op, program = %self.program, "Spawning adapter helper");
        let mut child = cmd.spawn().map_err(|e| {
            AdapterError::fault(format!(
                "failed to spawn adapter helper '{}': {}",
                self.program, e
            ))
        })?;

        let mut line = serde_json::to_vec(request)
            .map_err(|e| AdapterError::fault(format!("failed to encode {} request: {}", op, e)))?;
        line.push(b'\n');
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&line).await {
                return Err(AdapterError::transient(format!(
                    "failed to write {} request to helper: {}",
                    op, e
                )));
            }
        }

        let output = match tokio::time::timeout(self.timeout(), child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(AdapterError::transient(format!(
                    "failed to wait for helper: {}",
                    e
                )))
            }
            Err(_) => {
                return Err(AdapterError::transient(format!(
                    "helper did not answer {} within {}s",
                    op,
                    self.timeout().as_secs()
                )))
            }
        };

        for line in String::from_utf8_lossy(&output.stderr).lines() {
            if !line.trim().is_empty() {
                tracing::debug!(target_id = %self.target_id, op, "helper: {}", line);
            }
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(last) = stdout.lines().rev().find(|l| !l.trim().is_empty()) else {
            return Err(if output.status.success() {
                AdapterError::fault(format!("helper returned no response to {}", op))
            } else {
                AdapterError::transient(format!(
                    "helper exited with {} without a response to {}",
                    output.status, op
                ))
            });
        };

        serde_json::from_str(last.trim()).map_err(|e| {
            AdapterError::fault(format!("unparseable {} response from helper: {}", op, e))
        })
    }
}

#[async_trait]
impl PlatformAdapter for ProcessAdapter {
    fn name(&self) -> &str {
        "process"
    }

    async fn authenticate(
        &self,
        credential: &Credential,
        cached: Option<&Session>,
    ) -> Result<Vec<u8>, AdapterError> {
        let request = Request::Authenticate {
            target_id: &self.target_id,
            base_url: &self.base_url,
            principal: &credential.principal,
            secret: credential.expose_secret(),
            session: cached.map(|s| BASE64.encode(&s.artifact)),
        };
        let response = self.call(&request).await?;
        if response.status != ResponseStatus::Ok {
            return Err(response.into_error("authentication failed"));
        }

        match response.session {
            Some(encoded) => BASE64.decode(encoded.trim()).map_err(|e| {
                AdapterError::fault(format!("helper returned an invalid session: {}", e))
            }),
            None => match cached {
                Some(session) => Ok(session.artifact.clone()),
                None => Err(AdapterError::fault(
                    "helper reported a login without returning a session",
                )),
            },
        }
    }

    async fn discover(
        &self,
        target_account: &str,
        max: usize,
    ) -> Result<Vec<Candidate>, AdapterError> {
        let request = Request::Discover {
            target_id: &self.target_id,
            base_url: &self.base_url,
            target_account,
            max,
        };
        let response = self.call(&request).await?;
        if response.status != ResponseStatus::Ok {
            return Err(response.into_error("discovery failed"));
        }

        let mut candidates = response.candidates.unwrap_or_default();
        candidates.truncate(max);
        Ok(candidates)
    }

    async fn act(
        &self,
        candidate: &Candidate,
        action: ActionKind,
    ) -> Result<ActionOutcome, AdapterError> {
        let request = Request::Act {
            target_id: &self.target_id,
            base_url: &self.base_url,
            candidate,
            action,
        };
        let response = match self.call(&request).await {
            Ok(response) => response,
            Err(e) if e.is_transient() => return Ok(ActionOutcome::transient(e.message)),
            Err(e) => return Err(e),
        };

        let kind = match response.status {
            ResponseStatus::Ok => OutcomeKind::Success,
            ResponseStatus::AlreadyDone => OutcomeKind::AlreadyDone,
            ResponseStatus::RateLimited => OutcomeKind::RateLimited,
            ResponseStatus::Transient => OutcomeKind::TransientFailure,
            ResponseStatus::Fatal => OutcomeKind::FatalFailure,
            ResponseStatus::AuthFailed => {
                return Err(AdapterError::authentication(
                    response.detail_or("session rejected while acting"),
                ))
            }
        };
        Ok(ActionOutcome::new(kind, response.detail))
    }
}
