//! # Engage Orchestrator
//!
//! Runs scheduled engagement actions (follow, like, comment) against several
//! third-party sites, each through its own platform adapter.
//!
//! This library provides:
//! - A credential vault with an encrypted, per-target session cache
//! - A persisted daily quota ledger and an append-only interaction log
//! - An action executor with dedup, reservations and bounded retry
//! - An orchestrator running one isolated worker per target
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!                 │         Orchestrator         │
//!                 │  (one worker task per target)│
//!                 └───────┬──────────────┬───────┘
//!                         │              │
//!                         ▼              ▼
//!              ┌────────────────┐  ┌────────────────┐
//!              │ ActionExecutor │  │ ActionExecutor │   ...
//!              └──┬─────┬────┬──┘  └────────────────┘
//!                 │     │    │
//!        ┌────────┘     │    └───────────┐
//!        ▼              ▼                ▼
//!  ┌───────────┐ ┌──────────────┐ ┌─────────────────┐
//!  │  Vault    │ │ QuotaLedger  │ │ PlatformAdapter │
//!  │ (sessions)│ │ Interaction  │ │ (per site)      │
//!  └───────────┘ │ Log (sqlite) │ └─────────────────┘
//!                └──────────────┘
//! ```
//!
//! ## Target Flow
//! 1. Authenticate, reusing the cached session when the adapter accepts it
//! 2. Discover candidates, capped by what is left of today's quota
//! 3. Execute every configured action kind per candidate
//! 4. Report succeeded/skipped/failed counts and the terminal state
//!
//! ## Modules
//! - `vault`: credentials and the encrypted session cache
//! - `store`: quota ledger and interaction log backends
//! - `adapter`: the platform adapter trait and built-in adapters
//! - `executor`: per-action protocol
//! - `orchestrator`: per-target workers and the run loop

pub mod adapter;
pub mod config;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod report;
pub mod retry;
pub mod store;
pub mod types;
pub mod util;
pub mod vault;

pub use config::Config;
pub use error::{AdapterError, ErrorClass, RunError, TargetFault};
pub use orchestrator::{Orchestrator, TargetPlan, TargetState};
pub use report::{RunReport, Summary};
