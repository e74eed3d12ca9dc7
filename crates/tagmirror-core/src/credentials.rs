//! Registry credentials and the default keychain
//!
//! Policies may carry explicit credentials per side. When they do not, the
//! registry adapter falls back to a [`Keychain`] built from the Docker
//! `config.json`. The keychain is loaded once, at process start, by
//! [`Keychain::load_default`] and shared read-only behind an `Arc`.

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Resolved credentials for one registry
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Username and password (or a personal access token used as one)
    Basic { username: String, password: String },
    /// Pre-issued bearer token
    Bearer { token: String },
}

impl Credentials {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Credentials::Bearer {
            token: token.into(),
        }
    }

    /// Decode a Docker-style `auth` value: base64 of `username:password`
    pub fn from_auth(auth: &str) -> Result<Self> {
        let decoded = STANDARD
            .decode(auth.trim())
            .map_err(|e| Error::invalid_credentials(format!("auth is not valid base64: {}", e)))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| Error::invalid_credentials("auth is not valid UTF-8"))?;
        match decoded.split_once(':') {
            Some((username, password)) if !username.is_empty() && !password.is_empty() => {
                Ok(Self::basic(username, password))
            }
            _ => Err(Error::invalid_credentials(
                "auth must decode to 'username:password'",
            )),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Basic { username, .. } => {
                write!(f, "Basic(username={}, password=[REDACTED])", username)
            }
            Credentials::Bearer { .. } => write!(f, "Bearer([REDACTED])"),
        }
    }
}

/// Credentials as declared in configuration
///
/// Exactly one form should be given: `username` with `password` or
/// `password-env`, `token` or `token-env`, or a base64 `auth` value.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CredentialsSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Environment variable holding the password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Environment variable holding the bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    /// base64 of `username:password`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
}

impl fmt::Debug for CredentialsSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsSpec")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("password_env", &self.password_env)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("token_env", &self.token_env)
            .field("auth", &self.auth.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl CredentialsSpec {
    /// Resolve to concrete credentials
    ///
    /// Returns `Ok(None)` when nothing is declared, so the caller falls back
    /// to the keychain.
    pub fn resolve(&self) -> Result<Option<Credentials>> {
        if let Some(auth) = &self.auth {
            return Credentials::from_auth(auth).map(Some);
        }

        if let Some(token) = &self.token {
            return Ok(Some(Credentials::bearer(token)));
        }
        if let Some(var) = &self.token_env {
            return read_env(var).map(|token| Some(Credentials::bearer(token)));
        }

        match (&self.username, &self.password, &self.password_env) {
            (None, None, None) => Ok(None),
            (Some(username), Some(password), _) => {
                Ok(Some(Credentials::basic(username, password)))
            }
            (Some(username), None, Some(var)) => {
                read_env(var).map(|password| Some(Credentials::basic(username, password)))
            }
            (Some(_), None, None) => Err(Error::invalid_credentials(
                "username given without password or password-env",
            )),
            (None, _, _) => Err(Error::invalid_credentials(
                "password given without username",
            )),
        }
    }
}

fn read_env(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::invalid_credentials(format!(
            "environment variable {} is not set",
            var
        ))),
    }
}

/// Process-wide fallback credentials, keyed by registry host
#[derive(Debug, Clone, Default)]
pub struct Keychain {
    entries: HashMap<String, Credentials>,
}

#[derive(Debug, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, DockerAuthEntry>,
}

#[derive(Debug, Deserialize)]
struct DockerAuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl Keychain {
    /// An empty keychain: every lookup is anonymous
    pub fn empty() -> Self {
        Self::default()
    }

    /// Path of the Docker config, honoring `DOCKER_CONFIG`
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var("DOCKER_CONFIG") {
            return Some(PathBuf::from(dir).join("config.json"));
        }
        dirs::home_dir().map(|home| home.join(".docker").join("config.json"))
    }

    /// Build the default keychain
    ///
    /// This is the single initialization point: call it once from the
    /// process entry point and pass the result down. A missing file gives an
    /// empty keychain; an unreadable or malformed one is an error.
    pub fn load_default(path: Option<&Path>) -> Result<Self> {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => path,
            None => return Ok(Self::empty()),
        };

        if !path.exists() {
            debug!("No docker config at {}, using empty keychain", path.display());
            return Ok(Self::empty());
        }

        let content = std::fs::read_to_string(&path)?;
        let keychain = Self::from_docker_config(&content)?;
        debug!(
            "Loaded {} keychain entries from {}",
            keychain.entries.len(),
            path.display()
        );
        Ok(keychain)
    }

    /// Parse the `auths` section of a Docker `config.json`
    pub fn from_docker_config(content: &str) -> Result<Self> {
        let config: DockerConfig = serde_json::from_str(content)?;
        let mut entries = HashMap::new();

        for (server, entry) in config.auths {
            let host = normalize_host(&server);
            let credentials = if let Some(auth) = entry.auth.filter(|a| !a.is_empty()) {
                match Credentials::from_auth(&auth) {
                    Ok(credentials) => Some(credentials),
                    Err(e) => {
                        warn!("Skipping keychain entry for {}: {}", host, e);
                        None
                    }
                }
            } else {
                match (entry.username, entry.password) {
                    (Some(username), Some(password)) => {
                        Some(Credentials::basic(username, password))
                    }
                    _ => None,
                }
            };

            if let Some(credentials) = credentials {
                entries.insert(host, credentials);
            }
        }

        Ok(Self { entries })
    }

    /// Add or replace the entry for a registry host
    pub fn insert(&mut self, registry: &str, credentials: Credentials) {
        self.entries.insert(normalize_host(registry), credentials);
    }

    /// Credentials for a registry host, if any
    pub fn lookup(&self, registry: &str) -> Option<&Credentials> {
        self.entries.get(&normalize_host(registry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reduce a Docker config server key to a bare host
///
/// `https://index.docker.io/v1/`, `index.docker.io` and
/// `registry-1.docker.io` all name Docker Hub.
fn normalize_host(server: &str) -> String {
    let host = server
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = host.split('/').next().unwrap_or(host).to_ascii_lowercase();
    match host.as_str() {
        "index.docker.io" | "registry-1.docker.io" | "registry.hub.docker.com" => {
            "docker.io".to_string()
        }
        _ => host,
    }
}
