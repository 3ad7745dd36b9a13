//! Error types for Synheart Stride

use thiserror::Error;

/// Errors that can occur while acquiring or persisting steps
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Step capability unavailable: {0}")]
    Unavailable(String),

    #[error("Step access not authorized: {0}")]
    Unauthorized(String),

    #[error("Timed out after {seconds}s waiting for {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("Step query failed ({code}): {message}")]
    QueryFailed { code: String, message: String },

    #[error("Failed to deserialize record '{key}': {reason}")]
    DeserializationFailed { key: String, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Reset handler priority {0} is already registered")]
    DuplicatePriority(i32),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised by a durable key-value store implementation
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
