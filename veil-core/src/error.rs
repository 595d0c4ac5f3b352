//! Error types for Veil Core

use thiserror::Error;

use crate::types::Identity;

/// Core errors
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unauthorized: {caller} is not the {role}")]
    Unauthorized { caller: Identity, role: &'static str },

    #[error("No pending admin transfer")]
    NoPendingTransfer,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
