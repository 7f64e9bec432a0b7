//! Error types for Honya.
//!
//! Each layer has its own `thiserror` enum. The aggregation service reduces all
//! of them to a [`ServiceError`], which carries a stable [`ErrorKind`] so the
//! HTTP layer can branch on the kind instead of matching message text.

use std::fmt;
use thiserror::Error;

/// Errors raised by the shared network access layer.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Transport-level failure (connect, TLS, timeout, body read).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered with a non-success status.
    #[error("Upstream returned {status} for {url}")]
    Status { status: u16, url: String },

    /// Body could not be decoded as the expected JSON shape.
    #[error("Failed to decode JSON from {url}: {message}")]
    Decode { url: String, message: String },

    /// Proxy URL from config or environment is not usable.
    #[error("Invalid proxy '{0}'")]
    InvalidProxy(String),
}

impl NetworkError {
    /// Returns true when the upstream reported that the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, NetworkError::Status { status: 404, .. })
    }
}

/// Errors raised by provider implementations and the provider registry.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// No provider is registered under this id.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Network access failed.
    #[error(transparent)]
    Network(NetworkError),

    /// A required element is missing from the upstream page.
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// Upstream payload has an unexpected shape.
    #[error("Failed to parse upstream content: {0}")]
    ParseError(String),

    /// Novel or chapter does not exist upstream.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rank options the provider cannot work with.
    #[error("Invalid option: {0}")]
    InvalidOption(String),
}

impl From<NetworkError> for ProviderError {
    fn from(err: NetworkError) -> Self {
        if err.is_not_found() {
            ProviderError::NotFound(err.to_string())
        } else {
            ProviderError::Network(err)
        }
    }
}

/// Errors raised by the repository boundary.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Row does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Backend failure.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A read-through store had to reach a provider and that failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Error type for configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Invalid configuration value
    #[error("Invalid config value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Config directory not found
    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Classification of a failed service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    NotFound,
    Conflict,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::BadRequest => "bad request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Terminal failure of an aggregation service operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ServiceError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => ServiceError::not_found(msg),
            StoreError::Provider(err) => err.into(),
            StoreError::Backend(msg) => ServiceError::internal(msg),
        }
    }
}

impl From<ProviderError> for ServiceError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::UnknownProvider(_) | ProviderError::NotFound(_) => {
                ServiceError::not_found(err.to_string())
            }
            ProviderError::InvalidOption(_) => {
                ServiceError::new(ErrorKind::BadRequest, err.to_string())
            }
            other => ServiceError::internal(other.to_string()),
        }
    }
}

/// Result type alias using anyhow for application-level error handling.
pub type Result<T> = anyhow::Result<T>;
