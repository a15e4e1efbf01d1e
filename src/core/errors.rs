// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::num::ParseIntError;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the agent.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum MusterError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rules error: {0}")]
    Rules(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Unknown address '{0}'")]
    UnknownAddress(String),

    #[error("Operation not allowed in the current state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for MusterError {
    fn clone(&self) -> Self {
        match self {
            MusterError::Io(e) => MusterError::Io(Arc::clone(e)),
            MusterError::Config(s) => MusterError::Config(s.clone()),
            MusterError::Rules(s) => MusterError::Rules(s.clone()),
            MusterError::Protocol(s) => MusterError::Protocol(s.clone()),
            MusterError::Rpc(s) => MusterError::Rpc(s.clone()),
            MusterError::UnknownAddress(s) => MusterError::UnknownAddress(s.clone()),
            MusterError::InvalidState(s) => MusterError::InvalidState(s.clone()),
            MusterError::Internal(s) => MusterError::Internal(s.clone()),
        }
    }
}

impl PartialEq for MusterError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MusterError::Io(e1), MusterError::Io(e2)) => e1.to_string() == e2.to_string(),
            (MusterError::Config(s1), MusterError::Config(s2)) => s1 == s2,
            (MusterError::Rules(s1), MusterError::Rules(s2)) => s1 == s2,
            (MusterError::Protocol(s1), MusterError::Protocol(s2)) => s1 == s2,
            (MusterError::Rpc(s1), MusterError::Rpc(s2)) => s1 == s2,
            (MusterError::UnknownAddress(s1), MusterError::UnknownAddress(s2)) => s1 == s2,
            (MusterError::InvalidState(s1), MusterError::InvalidState(s2)) => s1 == s2,
            (MusterError::Internal(s1), MusterError::Internal(s2)) => s1 == s2,
            _ => false,
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for MusterError {
    fn from(e: std::io::Error) -> Self {
        MusterError::Io(Arc::new(e))
    }
}

impl From<toml::de::Error> for MusterError {
    fn from(e: toml::de::Error) -> Self {
        MusterError::Config(e.to_string())
    }
}

impl From<serde_json::Error> for MusterError {
    fn from(e: serde_json::Error) -> Self {
        MusterError::Protocol(format!("JSON serialization/deserialization error: {e}"))
    }
}

impl From<ParseIntError> for MusterError {
    fn from(e: ParseIntError) -> Self {
        MusterError::Protocol(format!("invalid integer field: {e}"))
    }
}
