use std::io;

use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised while talking to the upstream API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("GET {url} responded with {status}")]
    Status { status: StatusCode, url: String },
    #[error("no resource found at {url}")]
    NotFound { url: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("invalid header value for {0}")]
    InvalidHeader(String),
    #[error("unexpected response shape from {endpoint}: {reason}")]
    UnexpectedShape { endpoint: String, reason: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl ApiError {
    /// Status code carried by the error, if the upstream answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::NotFound { .. } => Some(StatusCode::NOT_FOUND),
            ApiError::Http(err) => err.status(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    /// True for 401 and 403, which the API uses interchangeably for missing permissions.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN)
        )
    }
}

/// A raw record could not be turned into a typed entity.
#[derive(Debug, Error)]
#[error("invalid {entity}{}: {reason}", key_suffix(.key))]
pub struct ValidationError {
    pub entity: &'static str,
    pub key: Option<String>,
    pub reason: String,
}

impl ValidationError {
    pub fn new<T: Into<String>>(entity: &'static str, key: Option<String>, reason: T) -> Self {
        Self {
            entity,
            key,
            reason: reason.into(),
        }
    }
}

fn key_suffix(key: &Option<String>) -> String {
    key.as_deref()
        .map(|key| format!(" '{key}'"))
        .unwrap_or_default()
}

/// Errors raised while loading or overriding configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid key {0:?}: must be a relative path inside the storage root")]
    InvalidKey(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("unknown storage provider: {0}")]
    UnsupportedProvider(String),
}

/// Errors raised while exporting talks to JSON.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = ApiError> = std::result::Result<T, E>;
