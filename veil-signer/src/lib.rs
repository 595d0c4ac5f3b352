//! Veil Signer
//!
//! Threshold and post-quantum signature verification.
//!
//! # Algorithm Families
//!
//! - FROST secp256k1 threshold Schnorr
//! - Threshold ECDSA over secp256k1
//! - ML-DSA-65 and lattice threshold (via an injected backend)
//! - BLS12-381 aggregate signatures
//! - Hybrid classical + post-quantum and full post-quantum
//!
//! # Key Lifecycle
//!
//! Signers are registered with a group key and (t, n) parameters.
//! Proactive resharing moves them through numbered generations while the
//! group key stays fixed; rollback returns to an earlier generation.
//! Threshold-signed privileged operations are authorized against the
//! current generation, with replay protection and spend caps.

pub mod algorithm;
pub mod authorize;
pub mod backend;
pub mod bls;
pub mod ecdsa;
pub mod error;
pub mod policy;
pub mod rotation;
pub mod schnorr;
pub mod verifier;

pub use algorithm::{ByteLength, SignatureAlgorithm};
pub use authorize::{AuthorizationReceipt, Authorizer, PrivilegedOperation, SpendGuard, SpendGuardStats};
pub use backend::{CryptoBackend, LatticeBackend, NativeBackend};
pub use error::{SignerError, SignerResult};
pub use policy::ThresholdPolicy;
pub use rotation::{GenerationRecord, KeyRegistry, RotationEvent, RotationKind, ThresholdSigner};
pub use verifier::SignatureVerifier;
