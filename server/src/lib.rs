//! # Skyward Server
//!
//! The server-authoritative core of the Skyward sandbox universe: a
//! multi-world orchestrator (`universe`), per-world simulation threads
//! (`world`), the wire protocol (`packets`, `connection`), and durable
//! per-client state (`client_context`).

pub mod client_context;
pub mod config;
pub mod connection;
pub mod error;
pub mod packets;
pub mod universe;
pub mod warping;
pub mod world;

pub use error::{Result, ServerError};
