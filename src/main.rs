//! engage-orchestrator - command-line entry point
//!
//! Loads the targets file, runs every target once and reports per-target results.

use std::sync::Arc;

use anyhow::Context;
use engage_orchestrator::{
    adapter::AdapterRegistry,
    config::{Config, TargetsFile},
    orchestrator::{Orchestrator, TargetPlan},
    store::{SharedState, SqliteStateStore, StateLock},
    vault::{CredentialVault, SessionStore},
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "engage_orchestrator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: targets_file={}, state_dir={}",
        config.targets_file.display(),
        config.state_dir.display()
    );

    let _lock = StateLock::acquire(&config.state_dir)
        .with_context(|| format!("Cannot lock {}", config.state_dir.display()))?;

    let registry = AdapterRegistry::with_builtins();
    let targets = TargetsFile::load(&config.targets_file)?
        .resolve(&registry, |name| std::env::var(name).ok())?;

    let mut plans = Vec::with_capacity(targets.len());
    let mut credentials = Vec::with_capacity(targets.len());
    for resolved in targets {
        let adapter = registry
            .build(&resolved.target, &resolved.adapter)
            .with_context(|| format!("Cannot build adapter for target {}", resolved.target.id))?;
        info!(
            target_id = %resolved.target.id,
            adapter = adapter.name(),
            daily_limit = resolved.target.daily_limit,
            "Configured target"
        );
        plans.push(TargetPlan::new(resolved.target, adapter));
        credentials.push(resolved.credential);
    }

    let vault = CredentialVault::unlock(
        config.master_key.clone(),
        SessionStore::new(config.sessions_dir()),
        credentials,
    )?;
    info!(
        session_cache = vault.sessions_enabled(),
        "Unlocked credential vault for {} target(s)",
        plans.len()
    );

    let store = SqliteStateStore::open(config.db_path())
        .await
        .with_context(|| format!("Cannot open state database {}", config.db_path().display()))?;
    let state = SharedState::from_store(Arc::new(store));

    let orchestrator = Orchestrator::new(vault, state, config.backoff_policy())
        .with_max_concurrency(config.max_concurrency);

    let cancel = orchestrator.cancellation_token();
    let run_timeout = config.run_timeout;
    tokio::spawn(async move {
        let deadline = async {
            match run_timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);
        tokio::select! {
            _ = cancel.cancelled() => return,
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    warn!("Interrupt received, stopping after in-flight actions");
                    cancel.cancel();
                    return;
                }
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            },
            _ = &mut deadline => {
                warn!("Run timeout reached, stopping after in-flight actions");
                cancel.cancel();
                return;
            }
        }
        // Ctrl-C unavailable; only the deadline can stop the run.
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = &mut deadline => {
                warn!("Run timeout reached, stopping after in-flight actions");
                cancel.cancel();
            }
        }
    });

    let report = orchestrator.run_report(plans).await?;
    orchestrator.cancel();
    report.log_summary();

    if let Some(path) = &config.report_path {
        match report.write_to(path).await {
            Ok(()) => info!("Wrote run report to {}", path.display()),
            Err(e) => warn!("Failed to write run report to {}: {}", path.display(), e),
        }
    }

    Ok(())
}
