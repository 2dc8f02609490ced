//! Error taxonomy for the build pipeline.
//!
//! Every fallible operation in the core returns [`Result<T>`]. The frontend
//! is the only place that translates a [`NixeryError`] into an HTTP
//! response; nothing downstream of the orchestrator should know about
//! status codes.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, NixeryError>;

#[derive(thiserror::Error, Debug, Clone)]
pub enum NixeryError {
    /// The resolver reported that one or more packages do not exist.
    #[error("could not find packages: {pkgs:?}")]
    ResolverNotFound { pkgs: Vec<String> },

    /// The resolver subprocess exited non-zero, timed out, or produced
    /// output that could not be parsed.
    #[error("resolver failed: {0}")]
    ResolverFailure(String),

    /// The resolver subprocess did not finish within its configured
    /// timeout and was killed.
    #[error("resolver timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A storage backend I/O error: persist, fetch, move, or serve.
    #[error("storage error: {0}")]
    Storage(String),

    /// A requested blob or manifest digest is absent from the backend.
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// Tar construction failed while walking store paths.
    #[error("packing error: {0}")]
    Packing(String),

    /// A cache operation failed (scratch directory I/O, corrupt entry).
    #[error("cache error at {path:?}: {message}")]
    Cache { message: String, path: Option<PathBuf> },

    /// The requested image name or reference did not match the expected
    /// grammar.
    #[error("invalid image name: {0}")]
    InvalidName(String),

    /// Serialization/deserialization of JSON wire data failed.
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<std::io::Error> for NixeryError {
    fn from(err: std::io::Error) -> Self {
        NixeryError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for NixeryError {
    fn from(err: serde_json::Error) -> Self {
        NixeryError::Parse(err.to_string())
    }
}

impl NixeryError {
    pub fn cache(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        NixeryError::Cache { message: message.into(), path }
    }

    pub fn storage(message: impl std::fmt::Display) -> Self {
        NixeryError::Storage(message.to_string())
    }

    pub fn packing(message: impl std::fmt::Display) -> Self {
        NixeryError::Packing(message.to_string())
    }
}
