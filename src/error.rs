//! Error types for flowspec
//!
//! Carrier-level failures only: reading or decoding the document. Problems
//! found *inside* a well-formed document are diagnostics on the
//! `ValidationReport`, never `Error`s.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// flowspec errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid document: {0}")]
    Document(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_norway::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}
