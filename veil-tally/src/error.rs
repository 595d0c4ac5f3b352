//! Error types for Veil Tally

use thiserror::Error;
use veil_core::{ContextId, CoreError, Identity, RequestId};

/// Tally errors
#[derive(Error, Debug)]
pub enum TallyError {
    #[error("Context not open: {0}")]
    NotOpen(ContextId),

    #[error("Context already open: {0}")]
    AlreadyOpen(ContextId),

    #[error("Context {0} cannot close before its close timestamp")]
    TooEarly(ContextId),

    #[error("Decryption already requested for {0}")]
    AlreadyRequested(ContextId),

    #[error("Context not awaiting decryption: {0}")]
    ContextNotClosed(ContextId),

    #[error("Duplicate contribution from {contributor} in {context_id}")]
    DuplicateContribution {
        context_id: ContextId,
        contributor: Identity,
    },

    #[error("Contribution weight is zero")]
    ZeroWeight,

    #[error("Unknown decryption request: {0}")]
    UnknownRequest(RequestId),

    #[error("Unauthorized: {caller} is not the {role}")]
    Unauthorized { caller: Identity, role: &'static str },

    #[error("Unknown context: {0}")]
    UnknownContext(ContextId),

    #[error("Invalid window: close timestamp must be after open")]
    InvalidWindow,

    #[error("Expected {expected} plaintexts, got {actual}")]
    PlaintextCountMismatch { expected: usize, actual: usize },

    #[error("Decryption deadline not reached for {0}")]
    DeadlineNotReached(ContextId),

    #[error("Decryption attempts exhausted for {context_id} ({attempts} requests)")]
    DecryptionExhausted { context_id: ContextId, attempts: u32 },

    /// Transient gateway failure; the request may be re-issued
    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Weight source error: {0}")]
    WeightSource(String),

    #[error("Invalid ciphertext: {0}")]
    Ciphertext(String),

    #[error("Plaintext out of decryptable range")]
    PlaintextOutOfRange,

    #[error("Arithmetic overflow in {0}")]
    Overflow(&'static str),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl TallyError {
    /// Whether retrying the same call may succeed
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Gateway(_))
    }
}

/// Result type for tally operations
pub type TallyResult<T> = Result<T, TallyError>;
