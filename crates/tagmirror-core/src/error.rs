//! Error types for tagmirror-core

use std::fmt;
use thiserror::Error;

/// Result type alias using tagmirror-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration and input errors
///
/// Every variant here is terminal: retrying the same input cannot succeed
/// until the declared configuration changes.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {message}")]
    InvalidConfig { message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing required field
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    /// Pattern failed to compile
    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Credentials could not be decoded or resolved
    #[error("Invalid credentials: {message}")]
    InvalidCredentials { message: String },

    /// Malformed repository name or image reference
    #[error("Invalid reference '{reference}': {message}")]
    InvalidReference { reference: String, message: String },

    /// Duplicate policy identity
    #[error("Duplicate policy name: {name}")]
    DuplicatePolicy { name: String },
}

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Create an invalid pattern error
    pub fn invalid_pattern(pattern: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            message: message.to_string(),
        }
    }

    /// Create an invalid credentials error
    pub fn invalid_credentials(message: impl Into<String>) -> Self {
        Self::InvalidCredentials {
            message: message.into(),
        }
    }

    /// Create an invalid reference error
    pub fn invalid_reference(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
            message: message.into(),
        }
    }

    /// Create a duplicate policy error
    pub fn duplicate_policy(name: impl Into<String>) -> Self {
        Self::DuplicatePolicy { name: name.into() }
    }
}

/// Classification of a registry failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryErrorKind {
    /// Repository (or manifest) does not exist
    NotFound,
    /// Credentials missing, expired, or rejected
    Unauthorized,
    /// Network failure, rate limiting, server error, timeout
    Transient,
    /// Registry refused the request for a reason retrying will not fix
    Rejected,
    /// Image shape the transport cannot carry
    Unsupported,
    /// Caller cancelled the operation
    Cancelled,
}

/// Errors returned by a [`crate::registry::RegistryCapability`]
#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    /// Repository or manifest is not known to the registry
    #[error("not found: {target}")]
    NotFound { target: String },

    /// Authentication or authorization failure
    #[error("unauthorized for {target}: {message}")]
    Unauthorized { target: String, message: String },

    /// Failure expected to clear on its own
    #[error("transient registry error for {target}: {message}")]
    Transient { target: String, message: String },

    /// Registry rejected the request
    #[error("registry rejected request for {target}: {message}")]
    Rejected { target: String, message: String },

    /// Image cannot be transferred as a single unit
    #[error("unsupported image {target}: {message}")]
    Unsupported { target: String, message: String },

    /// Per-call timeout elapsed
    #[error("timed out after {secs}s: {target}")]
    Timeout { target: String, secs: u64 },

    /// Cancelled by the caller
    #[error("cancelled: {target}")]
    Cancelled { target: String },
}

impl RegistryError {
    pub fn not_found(target: impl Into<String>) -> Self {
        Self::NotFound {
            target: target.into(),
        }
    }

    pub fn unauthorized(target: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Unauthorized {
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub fn transient(target: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Transient {
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub fn rejected(target: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Rejected {
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub fn unsupported(target: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Unsupported {
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub fn timeout(target: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            target: target.into(),
            secs,
        }
    }

    pub fn cancelled(target: impl Into<String>) -> Self {
        Self::Cancelled {
            target: target.into(),
        }
    }

    /// Get the classification of this error
    pub fn kind(&self) -> RegistryErrorKind {
        match self {
            RegistryError::NotFound { .. } => RegistryErrorKind::NotFound,
            RegistryError::Unauthorized { .. } => RegistryErrorKind::Unauthorized,
            RegistryError::Transient { .. } | RegistryError::Timeout { .. } => {
                RegistryErrorKind::Transient
            }
            RegistryError::Rejected { .. } => RegistryErrorKind::Rejected,
            RegistryError::Unsupported { .. } => RegistryErrorKind::Unsupported,
            RegistryError::Cancelled { .. } => RegistryErrorKind::Cancelled,
        }
    }

    /// Check if this error indicates the repository does not exist
    pub fn is_not_found(&self) -> bool {
        self.kind() == RegistryErrorKind::NotFound
    }

    /// Check if a later pass may succeed where this one failed
    ///
    /// Authorization failures count as retryable: credentials can be
    /// refreshed outside the process between passes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            RegistryErrorKind::Transient
                | RegistryErrorKind::Unauthorized
                | RegistryErrorKind::Cancelled
        )
    }
}

/// Which side of a mirror a registry call addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Source,
    Destination,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Destination => write!(f, "destination"),
        }
    }
}

/// Failure that ends a reconciliation pass before or during transfers
#[derive(Error, Debug)]
pub enum PassFailure {
    /// Policy cannot be acted on until its declaration changes
    #[error("configuration error: {0}")]
    Configuration(#[from] Error),

    /// Listing tags on one side failed
    #[error("unable to list {side} tags for {repository}: {source}")]
    Listing {
        side: Side,
        repository: String,
        #[source]
        source: RegistryError,
    },

    /// Caller cancelled the pass
    #[error("reconciliation pass cancelled")]
    Cancelled,
}

impl PassFailure {
    /// Whether the driver should schedule a retry
    pub fn is_retryable(&self) -> bool {
        match self {
            PassFailure::Configuration(_) => false,
            PassFailure::Listing { .. } => true,
            PassFailure::Cancelled => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_classification() {
        assert!(RegistryError::not_found("docker.io/library/centos").is_not_found());
        assert!(!RegistryError::not_found("x").is_retryable());
        assert!(RegistryError::unauthorized("x", "denied").is_retryable());
        assert!(RegistryError::transient("x", "503").is_retryable());
        assert!(RegistryError::timeout("x", 30).is_retryable());
        assert!(!RegistryError::rejected("x", "manifest invalid").is_retryable());
        assert!(!RegistryError::unsupported("x", "image index").is_retryable());
        assert_eq!(
            RegistryError::timeout("x", 30).kind(),
            RegistryErrorKind::Transient
        );
    }

    #[test]
    fn test_pass_failure_retryable() {
        let config = PassFailure::from(Error::invalid_pattern("regex:(", "unclosed group"));
        assert!(!config.is_retryable());

        let listing = PassFailure::Listing {
            side: Side::Source,
            repository: "docker.io/library/centos".to_string(),
            source: RegistryError::transient("docker.io/library/centos", "502 Bad Gateway"),
        };
        assert!(listing.is_retryable());
        assert!(listing.to_string().contains("source"));

        assert!(PassFailure::Cancelled.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = Error::invalid_pattern("semver:>>1", "unexpected character");
        let display = err.to_string();
        assert!(display.contains("semver:>>1"));
        assert!(display.contains("unexpected character"));
    }
}
