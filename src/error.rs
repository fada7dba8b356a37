//! Error types for the math-fallback library.

use thiserror::Error;

/// Result type alias for this library.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the library.
///
/// Rendering failures never surface through this type: they are absorbed by
/// the recovery layer. Only setup concerns (configuration, solution payloads,
/// IO) are reported to callers.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid solution payload: {0}")]
    Solution(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("`{field}` must be greater than zero")]
    Zero { field: &'static str },

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),
}

/// Errors raised by a rendering backend.
///
/// The display strings are what the recovery layer classifies, so each
/// variant's message carries the vocabulary of its category.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("backend not ready: {0}")]
    NotReady(String),

    #[error("parse error: {0}")]
    Syntax(String),

    #[error("unsupported command: {0}")]
    Unsupported(String),

    #[error("render timed out after {0} ms")]
    Timeout(u64),

    #[error("out of memory: {0}")]
    ResourceLimit(String),

    #[error("network failure while loading backend: {0}")]
    Network(String),

    #[error("target surface is detached: {0}")]
    Detached(String),

    #[error("no usable backend registered")]
    NoBackend,

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Short, stable name of the variant, recorded in the error history.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::NotReady(_) => "not_ready",
            BackendError::Syntax(_) => "syntax",
            BackendError::Unsupported(_) => "unsupported",
            BackendError::Timeout(_) => "timeout",
            BackendError::ResourceLimit(_) => "resource_limit",
            BackendError::Network(_) => "network",
            BackendError::Detached(_) => "detached",
            BackendError::NoBackend => "no_backend",
            BackendError::Other(_) => "other",
        }
    }
}
