//! Mirror policies: what to copy, from where, to where

use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::pattern::TagPattern;
use crate::reference::{normalized_name, RepositoryName};

/// Declared desired state for one mirrored image
///
/// A policy is immutable for the duration of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorPolicy {
    /// Policy identity; at most one pass per name runs at a time
    pub name: String,
    /// Source registry root (e.g., "docker.io/library")
    pub source_repository: String,
    /// Destination registry root (e.g., "registry.example.com/mirror/")
    pub destination_repository: String,
    /// Image name appended to both roots (e.g., "centos")
    pub image_name: String,
    /// Prefixed tag selection pattern (e.g., "glob:8*")
    pub pattern: String,
    pub source_credentials: Option<Credentials>,
    pub destination_credentials: Option<Credentials>,
}

impl MirrorPolicy {
    pub fn new(
        name: impl Into<String>,
        source_repository: impl Into<String>,
        destination_repository: impl Into<String>,
        image_name: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_repository: source_repository.into(),
            destination_repository: destination_repository.into(),
            image_name: image_name.into(),
            pattern: pattern.into(),
            source_credentials: None,
            destination_credentials: None,
        }
    }

    pub fn with_source_credentials(mut self, credentials: Credentials) -> Self {
        self.source_credentials = Some(credentials);
        self
    }

    pub fn with_destination_credentials(mut self, credentials: Credentials) -> Self {
        self.destination_credentials = Some(credentials);
        self
    }

    /// Check required fields
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("name", &self.name),
            ("source-repository", &self.source_repository),
            ("destination-repository", &self.destination_repository),
            ("image-name", &self.image_name),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::missing_field(format!("{} (policy '{}')", field, self.name)));
            }
        }
        Ok(())
    }

    /// Compile the tag selection pattern
    pub fn compile_pattern(&self) -> Result<TagPattern> {
        TagPattern::compile(&self.pattern)
    }

    /// Fully-qualified source repository
    pub fn source(&self) -> Result<RepositoryName> {
        RepositoryName::parse(&normalized_name(&self.source_repository, &self.image_name))
    }

    /// Fully-qualified destination repository
    pub fn destination(&self) -> Result<RepositoryName> {
        RepositoryName::parse(&normalized_name(
            &self.destination_repository,
            &self.image_name,
        ))
    }
}
