//! Run command: keep every policy converged until interrupted
//!
//! Policies are re-read from the configuration file on SIGHUP. Engine,
//! driver and registry settings are fixed for the life of the process.

use anyhow::{Context, Result};
use camino::Utf8Path;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tagmirror_core::{
    ConvergenceDriver, DeclaredPolicies, FileStatusSink, MirrorConfig, RegistryCapability,
};
use tracing::{info, warn};

use super::{build_engine, load_config};
use crate::cli::RunArgs;
use crate::output;

pub async fn run(args: RunArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let declared = config.declared_policies();
    let engine = build_engine(&config)?;

    let mut options = config.driver_options();
    if let Some(secs) = args.resync_interval {
        options.resync_interval = (secs > 0).then(|| Duration::from_secs(secs));
    }

    let status_dir = config.status_dir();
    info!(
        policies = declared.valid.len(),
        rejected = declared.invalid.len(),
        status_dir = %status_dir,
        resync_secs = options.resync_interval.map(|d| d.as_secs()),
        "Starting convergence driver"
    );

    let driver = ConvergenceDriver::new(
        engine,
        Arc::new(FileStatusSink::new(status_dir)),
        options,
    );
    apply_policies(&driver, declared).await;
    output::info("Mirroring; press Ctrl-C to stop");

    let mut hangup = HangupSignal::new();
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                break;
            }
            _ = hangup.recv() => reload(&driver, &config).await,
        }
    }

    info!("Interrupted, stopping policy workers");
    driver.shutdown().await;
    output::success("Stopped");
    Ok(())
}

/// Re-read the policies, hand them to the driver and start a pass for each
///
/// A file that no longer loads leaves the running policies untouched.
async fn reload<R: RegistryCapability + 'static>(
    driver: &ConvergenceDriver<R>,
    config: &MirrorConfig,
) {
    match MirrorConfig::load(Some(&config.config_path)) {
        Ok(reloaded) => {
            info!(path = %config.config_path, "Reloading policies");
            apply_policies(driver, reloaded.declared_policies()).await;
            driver.trigger_all();
        }
        Err(e) => {
            warn!(path = %config.config_path, error = %e, "Keeping current policies")
        }
    }
}

/// Make the driver's policy set equal to the declared valid policies
///
/// New and changed policies are upserted and rejected ones get a terminal
/// status; policies no longer declared are removed. Returns the names that
/// were removed.
async fn apply_policies<R: RegistryCapability + 'static>(
    driver: &ConvergenceDriver<R>,
    declared: DeclaredPolicies,
) -> Vec<String> {
    let valid: HashSet<String> = declared.valid.iter().map(|p| p.name.clone()).collect();

    for (name, problem) in &declared.invalid {
        output::warning(&format!("{}: {}", name, problem));
        driver.reject(name, problem).await;
    }
    for policy in declared.valid {
        driver.upsert(policy);
    }

    let mut removed = Vec::new();
    for name in driver.policies() {
        if !valid.contains(&name) && driver.remove(&name).await {
            info!(policy = %name, "Policy no longer declared");
            removed.push(name);
        }
    }
    removed
}

#[cfg(unix)]
struct HangupSignal(Option<tokio::signal::unix::Signal>);

#[cfg(unix)]
impl HangupSignal {
    fn new() -> Self {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::hangup()) {
            Ok(signal) => Self(Some(signal)),
            Err(e) => {
                warn!(error = %e, "SIGHUP reload unavailable");
                Self(None)
            }
        }
    }

    async fn recv(&mut self) {
        if let Some(signal) = &mut self.0 {
            if signal.recv().await.is_some() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

#[cfg(not(unix))]
struct HangupSignal;

#[cfg(not(unix))]
impl HangupSignal {
    fn new() -> Self {
        Self
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await
    }
}
