//! Configuration file loading and parsing

use crate::backoff::BackoffPolicy;
use crate::credentials::CredentialsSpec;
use crate::driver::DriverOptions;
use crate::error::{Error, Result};
use crate::policy::MirrorPolicy;
use crate::reconcile::{EngineOptions, DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_CONCURRENT_TRANSFERS};
use crate::status::status_file_name;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration file names to search for
const CONFIG_FILE_NAMES: &[&str] = &["tagmirror.yaml", "tagmirror.yml"];

/// Status directory used when none is configured
const DEFAULT_STATUS_DIR: &str = ".tagmirror/status";

/// Top-level `tagmirror.yaml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MirrorConfigFile {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub driver: DriverConfig,

    #[serde(default)]
    pub registries: RegistriesConfig,

    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
}

/// `engine:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfig {
    #[serde(default = "default_max_concurrent_transfers")]
    pub max_concurrent_transfers: usize,

    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: default_max_concurrent_transfers(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

fn default_max_concurrent_transfers() -> usize {
    DEFAULT_MAX_CONCURRENT_TRANSFERS
}

fn default_call_timeout_secs() -> u64 {
    DEFAULT_CALL_TIMEOUT.as_secs()
}

impl EngineConfig {
    pub fn to_options(&self) -> EngineOptions {
        EngineOptions {
            max_concurrent_transfers: self.max_concurrent_transfers.max(1),
            call_timeout: Duration::from_secs(self.call_timeout_secs.max(1)),
        }
    }
}

/// `driver:` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DriverConfig {
    /// Trigger every policy on this period
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resync_interval_secs: Option<u64>,

    /// Where per-policy status JSON is written, relative to the config file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_dir: Option<Utf8PathBuf>,

    #[serde(default)]
    pub backoff: BackoffPolicy,
}

impl DriverConfig {
    pub fn to_options(&self) -> DriverOptions {
        DriverOptions {
            backoff: self.backoff.clone(),
            resync_interval: self
                .resync_interval_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }
}

/// `registries:` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RegistriesConfig {
    /// Hosts reached over plain HTTP
    #[serde(default)]
    pub insecure: Vec<String>,

    /// Docker `config.json` for the default keychain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_config: Option<String>,
}

/// One entry of `policies:`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PolicyConfig {
    /// Defaults to `image-name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub source_repository: String,

    #[serde(default)]
    pub destination_repository: String,

    #[serde(default)]
    pub image_name: String,

    /// Missing means no tags are selected
    #[serde(default)]
    pub pattern: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_credentials: Option<CredentialsSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_credentials: Option<CredentialsSpec>,
}

impl PolicyConfig {
    /// Policy identity
    pub fn name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.image_name)
    }

    /// Resolve credentials and build a validated policy
    pub fn to_policy(&self) -> Result<MirrorPolicy> {
        let mut policy = MirrorPolicy::new(
            self.name(),
            &self.source_repository,
            &self.destination_repository,
            &self.image_name,
            &self.pattern,
        );
        policy.validate()?;

        if let Some(spec) = &self.source_credentials {
            policy.source_credentials = spec
                .resolve()
                .map_err(|e| with_context(e, "source", policy.name.as_str()))?;
        }
        if let Some(spec) = &self.destination_credentials {
            policy.destination_credentials = spec
                .resolve()
                .map_err(|e| with_context(e, "destination", policy.name.as_str()))?;
        }

        Ok(policy)
    }
}

/// Name used to report a policy entry, `#<n>` when it has none
fn policy_label(index: usize, entry: &PolicyConfig) -> String {
    match entry.name() {
        "" => format!("#{}", index + 1),
        name => name.to_string(),
    }
}

/// Reserve the status file of `name`, failing when an earlier policy holds it
fn claim_status_file(claimed: &mut HashMap<String, String>, name: &str) -> Result<()> {
    let file = status_file_name(name);
    match claimed.get(&file) {
        Some(owner) if owner == name => Err(Error::duplicate_policy(name)),
        Some(owner) => Err(Error::invalid_config(format!(
            "policy '{}' would share status file {} with policy '{}'",
            name, file, owner
        ))),
        None => {
            claimed.insert(file, name.to_string());
            Ok(())
        }
    }
}

fn with_context(err: Error, side: &str, policy: &str) -> Error {
    match err {
        Error::InvalidCredentials { message } => Error::invalid_credentials(format!(
            "{} credentials of policy '{}': {}",
            side, policy, message
        )),
        other => other,
    }
}

/// Declared policies, split by whether they could be built
#[derive(Debug, Default)]
pub struct DeclaredPolicies {
    pub valid: Vec<MirrorPolicy>,
    /// Policy name and why it was rejected
    pub invalid: Vec<(String, Error)>,
}

impl DeclaredPolicies {
    /// Keep only the policy called `name`
    ///
    /// Returns `None` when no policy of that name is declared.
    pub fn only(self, name: &str) -> Option<Self> {
        let selected = Self {
            valid: self.valid.into_iter().filter(|p| p.name == name).collect(),
            invalid: self
                .invalid
                .into_iter()
                .filter(|(label, _)| label == name)
                .collect(),
        };
        if selected.valid.is_empty() && selected.invalid.is_empty() {
            None
        } else {
            Some(selected)
        }
    }
}

/// Loaded tagmirror configuration
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// The parsed configuration
    pub config: MirrorConfigFile,

    /// Path to the configuration file
    pub config_path: Utf8PathBuf,

    /// Directory relative paths resolve against
    pub working_dir: Utf8PathBuf,
}

impl MirrorConfig {
    /// Load configuration from the specified path or search for it
    pub fn load(path: Option<&Utf8Path>) -> Result<Self> {
        let (config_path, content) = if let Some(p) = path {
            let content = fs::read_to_string(p).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::config_not_found(p.as_str())
                } else {
                    Error::Io(e)
                }
            })?;
            (p.to_owned(), content)
        } else {
            Self::find_config()?
        };

        let working_dir = config_path
            .parent()
            .map(|p| p.to_owned())
            .filter(|p| !p.as_str().is_empty())
            .unwrap_or_else(|| Utf8PathBuf::from("."));

        let config: MirrorConfigFile = serde_yaml_ng::from_str(&content)?;

        Ok(Self {
            config,
            config_path,
            working_dir,
        })
    }

    /// Find configuration file in current directory or parent directories
    fn find_config() -> Result<(Utf8PathBuf, String)> {
        let cwd = std::env::current_dir().map_err(Error::Io)?;
        let cwd = Utf8PathBuf::try_from(cwd)
            .map_err(|_| Error::invalid_config("Current directory path is not valid UTF-8"))?;

        let mut current = cwd.as_path();

        loop {
            for name in CONFIG_FILE_NAMES {
                let path = current.join(name);
                if path.exists() {
                    let content = fs::read_to_string(&path)?;
                    return Ok((path, content));
                }
            }

            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }

        Err(Error::config_not_found(
            "tagmirror.yaml (searched current and parent directories)",
        ))
    }

    /// Build each declared policy on its own
    ///
    /// A policy with a missing field or unresolvable credentials, or one
    /// whose name (or status file) an earlier policy already took, lands in
    /// `invalid`; the rest are unaffected.
    pub fn declared_policies(&self) -> DeclaredPolicies {
        let mut declared = DeclaredPolicies::default();
        let mut claimed = HashMap::new();

        for (index, entry) in self.config.policies.iter().enumerate() {
            let label = policy_label(index, entry);
            let built =
                claim_status_file(&mut claimed, &label).and_then(|()| entry.to_policy());
            match built {
                Ok(policy) => declared.valid.push(policy),
                Err(e) => declared.invalid.push((label, e)),
            }
        }

        declared
    }

    /// Build every declared policy
    ///
    /// # Errors
    /// Fails with the first policy [`declared_policies`](Self::declared_policies)
    /// rejects.
    pub fn policies(&self) -> Result<Vec<MirrorPolicy>> {
        let declared = self.declared_policies();
        match declared.invalid.into_iter().next() {
            Some((_, e)) => Err(e),
            None => Ok(declared.valid),
        }
    }

    /// Build one policy by name, regardless of the others
    pub fn policy(&self, name: &str) -> Result<MirrorPolicy> {
        let declared = self
            .declared_policies()
            .only(name)
            .ok_or_else(|| Error::invalid_config(format!("No policy named '{}'", name)))?;
        match declared.invalid.into_iter().next() {
            Some((_, e)) => Err(e),
            None => declared
                .valid
                .into_iter()
                .next()
                .ok_or_else(|| Error::invalid_config(format!("No policy named '{}'", name))),
        }
    }

    /// Every problem in the declared policies, without stopping at the first
    ///
    /// Each entry is the policy name and what is wrong with it.
    pub fn check(&self) -> Vec<(String, Error)> {
        let mut problems = Vec::new();
        let mut claimed = HashMap::new();

        if self.config.policies.is_empty() {
            problems.push((
                String::from("-"),
                Error::invalid_config("no policies declared"),
            ));
        }

        for (index, entry) in self.config.policies.iter().enumerate() {
            let label = policy_label(index, entry);

            if let Err(e) = claim_status_file(&mut claimed, &label) {
                problems.push((label.clone(), e));
            }

            let policy = match entry.to_policy() {
                Ok(policy) => policy,
                Err(e) => {
                    problems.push((label, e));
                    continue;
                }
            };

            if let Err(e) = policy.compile_pattern() {
                problems.push((label.clone(), e));
            }
            if let Err(e) = policy.source() {
                problems.push((label.clone(), e));
            }
            if let Err(e) = policy.destination() {
                problems.push((label, e));
            }
        }

        problems
    }

    pub fn engine_options(&self) -> EngineOptions {
        self.config.engine.to_options()
    }

    pub fn driver_options(&self) -> DriverOptions {
        self.config.driver.to_options()
    }

    /// Status directory, resolved against the config file's directory
    pub fn status_dir(&self) -> Utf8PathBuf {
        let dir = self
            .config
            .driver
            .status_dir
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_STATUS_DIR));
        if dir.is_absolute() {
            dir
        } else {
            self.working_dir.join(dir)
        }
    }

    /// Docker config path for the keychain, with `~/` expanded
    pub fn docker_config_path(&self) -> Option<PathBuf> {
        let raw = self.config.registries.docker_config.as_deref()?;
        match raw.strip_prefix("~/") {
            Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
            None => Some(PathBuf::from(raw)),
        }
    }

    /// Hosts reached over plain HTTP
    pub fn insecure_registries(&self) -> &[String] {
        &self.config.registries.insecure
    }
}
