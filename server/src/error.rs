//! Server-side error type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    /// A malformed or out-of-contract packet from a client.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket-level failure; the connection is closed afterwards.
    #[error("network error: {0}")]
    Network(String),

    /// Authentication or authorization failure.
    #[error("auth error: {0}")]
    Auth(String),

    /// World simulation failure; the owning world thread stops.
    #[error("world error: {0}")]
    World(String),

    /// Dungeon definition or placement failure.
    #[error("dungeon error: {0}")]
    Dungeon(String),

    /// Persistent storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration surface failure.
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] skyward_core::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        ServerError::Protocol(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        ServerError::Network(msg.into())
    }

    pub fn world(msg: impl Into<String>) -> Self {
        ServerError::World(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        ServerError::Storage(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
