//! Repository names and tagged image references

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Registry assumed when a name has no registry component
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Join a registry root and an image name with exactly one `/`
///
/// `docker.io/library` + `centos` and `docker.io/library/` + `centos` both
/// give `docker.io/library/centos`.
pub fn normalized_name(root: &str, image_name: &str) -> String {
    if root.is_empty() || root.ends_with('/') {
        format!("{}{}", root, image_name)
    } else {
        format!("{}/{}", root, image_name)
    }
}

/// A repository at a registry host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryName {
    /// Registry hostname, with port if any (e.g., "ghcr.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g., "library/centos")
    pub repository: String,
}

impl RepositoryName {
    /// Parse a repository name like "ghcr.io/acme/toolbox"
    ///
    /// The first path component is the registry when it looks like a host
    /// (contains `.` or `:`, or is `localhost`); otherwise the whole name
    /// is a repository on [`DEFAULT_REGISTRY`].
    pub fn parse(name: &str) -> Result<Self> {
        let name = name.trim().trim_end_matches('/');
        if name.is_empty() {
            return Err(Error::invalid_reference(name, "empty repository name"));
        }
        if name.contains('@') {
            return Err(Error::invalid_reference(
                name,
                "repository names cannot contain a digest",
            ));
        }

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest)) if looks_like_host(first) => (first.to_string(), rest.to_string()),
            None if looks_like_host(name) => {
                return Err(Error::invalid_reference(name, "missing repository path"))
            }
            _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        };

        if repository.is_empty() {
            return Err(Error::invalid_reference(name, "missing repository path"));
        }
        if repository.split('/').any(|part| part.is_empty()) {
            return Err(Error::invalid_reference(name, "empty path component"));
        }
        if repository.chars().any(|c| c.is_ascii_uppercase() || c == ':') {
            return Err(Error::invalid_reference(
                name,
                "repository path must be lowercase and untagged",
            ));
        }

        Ok(Self {
            registry,
            repository,
        })
    }

    /// Reference to one tag in this repository
    pub fn with_tag(&self, tag: impl Into<String>) -> ImageReference {
        ImageReference {
            repository: self.clone(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for RepositoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)
    }
}

fn looks_like_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

/// A fully-qualified tagged image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    pub repository: RepositoryName,
    pub tag: String,
}

impl ImageReference {
    /// Registry hostname
    pub fn registry(&self) -> &str {
        &self.repository.registry
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}
