//! Error type shared by the core modules.

use thiserror::Error;

/// Errors produced by core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A value fell outside the range a container or codec accepts.
    #[error("range error: {0}")]
    Range(String),

    /// Malformed input while parsing a textual or binary format.
    #[error("parse error: {0}")]
    Parse(String),

    /// Binary serialization failed (truncated data, bad tag, oversized VLQ).
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An id space was exhausted or an id was used twice.
    #[error("id map error: {0}")]
    IdMap(String),

    /// A promise keeper was used after the promise already finished.
    #[error("promise error: {0}")]
    Promise(String),

    /// A versioned JSON envelope could not be loaded or migrated.
    #[error("versioning error: {0}")]
    Versioning(String),

    /// Advisory lock acquisition failed.
    #[error("lock file error: {0}")]
    LockFile(String),

    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn range(msg: impl Into<String>) -> Self {
        Error::Range(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Error::Serialization(msg.into())
    }
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_category() {
        let err = Error::range("light index 40 out of 32");
        assert_eq!(format!("{err}"), "range error: light index 40 out of 32");
    }
}
