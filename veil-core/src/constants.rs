//! Protocol Constants
//!
//! Default values and protocol-defined limits shared by the Veil crates.

// ============================================================================
// Tally
// ============================================================================

/// Fixed denominator for basis-ratio arithmetic (parts per million)
pub const BASIS_DENOMINATOR: u128 = 1_000_000;

/// Default basis numerator (50%)
pub const DEFAULT_BASIS_NUMERATOR: u128 = 500_000;

/// Default quorum (total Yes + Abstain weight)
pub const DEFAULT_QUORUM_THRESHOLD: u128 = 100;

// ============================================================================
// Decryption
// ============================================================================

/// Decryption deadline after the context closes (1 day)
pub const DEFAULT_DECRYPTION_DEADLINE_SECS: i64 = 86_400;

/// Decryption attempts per context before it is reported exhausted
pub const DEFAULT_MAX_DECRYPTION_ATTEMPTS: u32 = 3;

// ============================================================================
// Cost model
// ============================================================================

/// Base cost units of a threshold verification
pub const DEFAULT_VERIFY_BASE_COST: u64 = 50_000;

/// Additional cost units per signer
pub const DEFAULT_VERIFY_PER_SIGNER_COST: u64 = 5_000;

// ============================================================================
// Spend guard
// ============================================================================

/// Default rate-limit window (1 hour)
pub const DEFAULT_SPEND_WINDOW_SECS: i64 = 3_600;

/// Default maximum authorized operations per window
pub const DEFAULT_MAX_OPERATIONS_PER_WINDOW: u32 = 100;
