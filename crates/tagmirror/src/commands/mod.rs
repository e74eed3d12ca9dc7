//! CLI command implementations

pub mod check;
pub mod plan;
pub mod run;
pub mod select;
pub mod status;
pub mod sync;

use anyhow::{anyhow, Context, Result};
use camino::Utf8Path;
use std::sync::Arc;
use tagmirror_core::{DeclaredPolicies, Keychain, MirrorConfig, ReconciliationEngine};
use tagmirror_registry::OciRegistry;
use tracing::debug;

/// Load the configuration from `--config` or by searching upwards
pub(crate) fn load_config(config_path: Option<&Utf8Path>) -> Result<MirrorConfig> {
    let config =
        MirrorConfig::load(config_path).context("Failed to load tagmirror configuration")?;
    debug!("Loaded configuration from {}", config.config_path);
    Ok(config)
}

/// The policies a command acts on: one by name, or all of them
///
/// Policies that cannot be built are returned as rejected rather than
/// failing the whole selection.
pub(crate) fn select_policies(
    config: &MirrorConfig,
    name: Option<&str>,
) -> Result<DeclaredPolicies> {
    let declared = config.declared_policies();
    match name {
        Some(name) => declared
            .only(name)
            .ok_or_else(|| anyhow!("No policy named '{}'", name)),
        None => Ok(declared),
    }
}

/// Registry adapter and engine, with the keychain loaded once
pub(crate) fn build_engine(config: &MirrorConfig) -> Result<ReconciliationEngine<OciRegistry>> {
    let keychain = Keychain::load_default(config.docker_config_path().as_deref())
        .context("Failed to load registry credentials")?;
    debug!("Keychain has {} registry entries", keychain.len());

    let registry = OciRegistry::builder(Arc::new(keychain))
        .insecure(config.insecure_registries().iter().cloned())
        .build()
        .context("Failed to create registry client")?;

    Ok(ReconciliationEngine::new(
        Arc::new(registry),
        config.engine_options(),
    ))
}
