//! Cryptographic Backends
//!
//! [`CryptoBackend`] is the seam between format/parameter checking (done
//! once in [`crate::SignatureVerifier`]) and the primitive verification of
//! each family. [`NativeBackend`] verifies the elliptic-curve families in
//! process and hands lattice families to an injected [`LatticeBackend`]
//! (a host precompile, an FFI binding, or a remote verifier).

use std::sync::Arc;

use crate::bls;
use crate::ecdsa;
use crate::error::{SignerError, SignerResult};
use crate::schnorr;

/// Primitive verification per algorithm family
///
/// Inputs have already passed length and (t, n) checks. Implementations
/// return `Ok(false)` for a signature that does not verify and reserve
/// errors for unusable keys or an unavailable primitive.
pub trait CryptoBackend: Send + Sync {
    fn verify_schnorr(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> SignerResult<bool>;

    fn verify_ecdsa(&self, public_key: &[u8], prehash: &[u8], signature: &[u8]) -> SignerResult<bool>;

    fn verify_bls(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> SignerResult<bool>;

    fn verify_ml_dsa(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> SignerResult<bool>;

    fn verify_lattice_threshold(
        &self,
        public_key: &[u8],
        message: &[u8],
        signature: &[u8],
        threshold: u32,
        total_signers: u32,
    ) -> SignerResult<bool>;
}

/// Post-quantum verification primitives supplied by the host
pub trait LatticeBackend: Send + Sync {
    /// ML-DSA-65 (FIPS 204) verification
    fn verify_ml_dsa(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> SignerResult<bool>;

    /// Lattice threshold verification for a (t, n) group
    fn verify_threshold(
        &self,
        public_key: &[u8],
        message: &[u8],
        signature: &[u8],
        threshold: u32,
        total_signers: u32,
    ) -> SignerResult<bool>;
}

/// In-process backend for the elliptic-curve families
#[derive(Clone, Default)]
pub struct NativeBackend {
    lattice: Option<Arc<dyn LatticeBackend>>,
}

impl NativeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route lattice families to `lattice`
    pub fn with_lattice(lattice: Arc<dyn LatticeBackend>) -> Self {
        Self {
            lattice: Some(lattice),
        }
    }

    pub fn has_lattice(&self) -> bool {
        self.lattice.is_some()
    }

    fn lattice(&self) -> SignerResult<&dyn LatticeBackend> {
        self.lattice
            .as_deref()
            .ok_or(SignerError::BackendUnavailable("lattice verification"))
    }
}

impl CryptoBackend for NativeBackend {
    fn verify_schnorr(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> SignerResult<bool> {
        schnorr::verify(public_key, message, signature)
    }

    fn verify_ecdsa(&self, public_key: &[u8], prehash: &[u8], signature: &[u8]) -> SignerResult<bool> {
        ecdsa::verify(public_key, prehash, signature)
    }

    fn verify_bls(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> SignerResult<bool> {
        bls::verify(public_key, message, signature)
    }

    fn verify_ml_dsa(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> SignerResult<bool> {
        self.lattice()?.verify_ml_dsa(public_key, message, signature)
    }

    fn verify_lattice_threshold(
        &self,
        public_key: &[u8],
        message: &[u8],
        signature: &[u8],
        threshold: u32,
        total_signers: u32,
    ) -> SignerResult<bool> {
        self.lattice()?
            .verify_threshold(public_key, message, signature, threshold, total_signers)
    }
}
