//! Signature Verifier
//!
//! Single entry point for every supported family. Length and (t, n) checks
//! run first and fail fast with typed errors; only well-formed input
//! reaches the [`CryptoBackend`]. Hybrid signatures are split at fixed
//! offsets and both halves must verify.

use std::sync::Arc;

use tracing::{debug, instrument, warn};
use veil_core::logging::operations;

use crate::algorithm::{
    SignatureAlgorithm, BLS_PUBLIC_KEY_LEN, BLS_SIGNATURE_LEN, ML_DSA_PUBLIC_KEY_LEN,
    ML_DSA_SIGNATURE_LEN,
};
use crate::backend::{CryptoBackend, NativeBackend};
use crate::bls::BlsPublicKey;
use crate::ecdsa;
use crate::error::{SignerError, SignerResult};
use crate::policy::ThresholdPolicy;
use crate::schnorr;

/// Signature verifier over an injected backend
#[derive(Clone)]
pub struct SignatureVerifier {
    backend: Arc<dyn CryptoBackend>,
}

impl SignatureVerifier {
    pub fn new(backend: Arc<dyn CryptoBackend>) -> Self {
        Self { backend }
    }

    /// Elliptic-curve families only; lattice families fail with `BackendUnavailable`
    pub fn native() -> Self {
        Self::new(Arc::new(NativeBackend::new()))
    }

    /// Verify `signature` over `message_hash`
    ///
    /// `Ok(false)` means the signature is well-formed but does not verify.
    /// Malformed input is an error and never reaches the backend.
    #[instrument(skip_all, fields(algorithm = %algorithm, t = threshold, n = total_signers))]
    pub fn verify(
        &self,
        algorithm: SignatureAlgorithm,
        public_key: &[u8],
        message_hash: &[u8; 32],
        signature: &[u8],
        threshold: u32,
        total_signers: u32,
    ) -> SignerResult<bool> {
        Self::check_format(algorithm, public_key, signature)?;
        if algorithm.is_threshold() {
            ThresholdPolicy::validate(threshold, total_signers)?;
        }
        Self::precheck_key(algorithm, public_key)?;

        let valid = self.dispatch(
            algorithm,
            public_key,
            message_hash,
            signature,
            threshold,
            total_signers,
        )?;

        if valid {
            debug!(operation = operations::VERIFY, "Signature verified");
        } else {
            warn!(operation = operations::VERIFY, "Signature rejected");
        }
        Ok(valid)
    }

    /// Length check of key and signature against the family layout
    pub fn check_format(
        algorithm: SignatureAlgorithm,
        public_key: &[u8],
        signature: &[u8],
    ) -> SignerResult<()> {
        let pk_len = algorithm.public_key_length();
        if !pk_len.accepts(public_key.len()) {
            return Err(SignerError::InvalidFormat {
                field: "public key",
                expected: pk_len.to_string(),
                actual: public_key.len(),
            });
        }
        let sig_len = algorithm.signature_length();
        if !sig_len.accepts(signature.len()) {
            return Err(SignerError::InvalidFormat {
                field: "signature",
                expected: sig_len.to_string(),
                actual: signature.len(),
            });
        }
        Ok(())
    }

    /// Full key validation at registration time
    pub fn check_public_key(algorithm: SignatureAlgorithm, public_key: &[u8]) -> SignerResult<()> {
        let pk_len = algorithm.public_key_length();
        if !pk_len.accepts(public_key.len()) {
            return Err(SignerError::InvalidFormat {
                field: "public key",
                expected: pk_len.to_string(),
                actual: public_key.len(),
            });
        }
        match algorithm {
            SignatureAlgorithm::SchnorrThreshold => {
                schnorr::parse_public_key(public_key)?;
            }
            SignatureAlgorithm::EcdsaThreshold => {
                ecdsa::parse_public_key(public_key)?;
            }
            SignatureAlgorithm::BlsAggregate => {
                BlsPublicKey::from_bytes(public_key)?;
            }
            SignatureAlgorithm::HybridClassicalPq => {
                BlsPublicKey::from_bytes(&public_key[..BLS_PUBLIC_KEY_LEN])?;
            }
            SignatureAlgorithm::LatticeSingle
            | SignatureAlgorithm::LatticeThreshold
            | SignatureAlgorithm::HybridFullPq => {}
        }
        Ok(())
    }

    /// Cheap key checks that must precede any verification work
    fn precheck_key(algorithm: SignatureAlgorithm, public_key: &[u8]) -> SignerResult<()> {
        match algorithm {
            SignatureAlgorithm::SchnorrThreshold => schnorr::parse_public_key(public_key).map(|_| ()),
            SignatureAlgorithm::EcdsaThreshold if public_key[0] != 0x04 => Err(
                SignerError::InvalidPublicKey("ecdsa key must be uncompressed".to_string()),
            ),
            _ => Ok(()),
        }
    }

    fn dispatch(
        &self,
        algorithm: SignatureAlgorithm,
        public_key: &[u8],
        message_hash: &[u8; 32],
        signature: &[u8],
        threshold: u32,
        total_signers: u32,
    ) -> SignerResult<bool> {
        let backend = self.backend.as_ref();
        match algorithm {
            SignatureAlgorithm::SchnorrThreshold => {
                backend.verify_schnorr(public_key, message_hash, signature)
            }
            SignatureAlgorithm::EcdsaThreshold => {
                backend.verify_ecdsa(public_key, message_hash, signature)
            }
            SignatureAlgorithm::LatticeSingle => {
                backend.verify_ml_dsa(public_key, message_hash, signature)
            }
            SignatureAlgorithm::LatticeThreshold => backend.verify_lattice_threshold(
                public_key,
                message_hash,
                signature,
                threshold,
                total_signers,
            ),
            SignatureAlgorithm::BlsAggregate => {
                backend.verify_bls(public_key, message_hash, signature)
            }
            SignatureAlgorithm::HybridClassicalPq => {
                // BLS ‖ lattice threshold
                let (bls_pk, lattice_pk) = public_key.split_at(BLS_PUBLIC_KEY_LEN);
                let (bls_sig, lattice_sig) = signature.split_at(BLS_SIGNATURE_LEN);

                if !backend.verify_bls(bls_pk, message_hash, bls_sig)? {
                    return Ok(false);
                }
                backend.verify_lattice_threshold(
                    lattice_pk,
                    message_hash,
                    lattice_sig,
                    threshold,
                    total_signers,
                )
            }
            SignatureAlgorithm::HybridFullPq => {
                // lattice threshold ‖ ML-DSA
                let (lattice_pk, ml_dsa_pk) =
                    public_key.split_at(public_key.len() - ML_DSA_PUBLIC_KEY_LEN);
                let (lattice_sig, ml_dsa_sig) =
                    signature.split_at(signature.len() - ML_DSA_SIGNATURE_LEN);

                if !backend.verify_lattice_threshold(
                    lattice_pk,
                    message_hash,
                    lattice_sig,
                    threshold,
                    total_signers,
                )? {
                    return Ok(false);
                }
                backend.verify_ml_dsa(ml_dsa_pk, message_hash, ml_dsa_sig)
            }
        }
    }
}
