//! Error types for Veil Signer

use thiserror::Error;
use veil_core::{CoreError, Identity, SignerId};

/// Signer errors
#[derive(Error, Debug)]
pub enum SignerError {
    #[error("Invalid format: {field} must be {expected} bytes, got {actual}")]
    InvalidFormat {
        field: &'static str,
        expected: String,
        actual: usize,
    },

    #[error("Invalid threshold: t={threshold}, n={total_signers} (require 0 < t <= n)")]
    InvalidThreshold { threshold: u32, total_signers: u32 },

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Crypto backend unavailable: {0}")]
    BackendUnavailable(&'static str),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Signer not found: {0}")]
    SignerNotFound(SignerId),

    #[error("Signer already registered: {0}")]
    SignerExists(SignerId),

    #[error("Unauthorized: {caller} is not the authority of {signer_id}")]
    Unauthorized { caller: Identity, signer_id: SignerId },

    #[error("Public key changed during reshare of {0}")]
    PublicKeyChanged(SignerId),

    #[error("Invalid generation: target {target}, current {current}")]
    InvalidGeneration { target: u64, current: u64 },

    #[error("Invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: u64, got: u64 },

    #[error("Signature rejected for {0}")]
    SignatureRejected(SignerId),

    #[error("Authorization cap exceeded: requested {requested}, available {available}")]
    AuthorizationCapExceeded { requested: u128, available: u128 },

    #[error("Rate limit exceeded: {used}/{limit} operations in window")]
    RateLimitExceeded { used: u32, limit: u32 },

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for signer operations
pub type SignerResult<T> = Result<T, SignerError>;
