//! Error types for tagmirror-registry and HTTP failure classification

use crate::types::ErrorResponse;
use reqwest::StatusCode;
use tagmirror_core::RegistryError;
use thiserror::Error;

/// Errors building the registry adapter
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Result type alias using tagmirror-registry's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Map an HTTP failure to a registry error kind
///
/// Distribution error codes take precedence over the status where they
/// are more specific (some registries answer `NAME_UNKNOWN` with 401).
pub(crate) fn classify(
    status: StatusCode,
    codes: &[&str],
    message: String,
    target: &str,
) -> RegistryError {
    let has = |wanted: &[&str]| codes.iter().any(|code| wanted.contains(code));

    if status == StatusCode::NOT_FOUND || has(&["NAME_UNKNOWN", "MANIFEST_UNKNOWN"]) {
        return RegistryError::not_found(target);
    }
    if has(&["TOOMANYREQUESTS"])
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        return RegistryError::transient(target, message);
    }
    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || has(&["UNAUTHORIZED", "DENIED"])
    {
        return RegistryError::unauthorized(target, message);
    }
    RegistryError::rejected(target, message)
}

/// Turn a non-success response into a registry error
pub(crate) async fn error_for(response: reqwest::Response, target: &str) -> RegistryError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let details: ErrorResponse = serde_json::from_str(&body).unwrap_or_default();

    let codes: Vec<&str> = details.errors.iter().map(|e| e.code.as_str()).collect();
    let message = match details.errors.first() {
        Some(detail) if !detail.message.is_empty() => {
            format!("{} ({}: {})", status, detail.code, detail.message)
        }
        Some(detail) => format!("{} ({})", status, detail.code),
        None if body.trim().is_empty() => status.to_string(),
        None => format!("{}: {}", status, truncate(body.trim(), 200)),
    };

    classify(status, &codes, message, target)
}

/// Network-level failure from reqwest
pub(crate) fn transport_error(target: &str, err: reqwest::Error) -> RegistryError {
    if err.is_builder() {
        RegistryError::rejected(target, err)
    } else {
        RegistryError::transient(target, err)
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
