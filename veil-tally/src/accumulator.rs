//! Confidential Accumulator
//!
//! Opaque encrypted running sums. Ciphertexts are combined blindly through
//! a [`HomomorphicBackend`]; nothing here can decrypt. The encrypted zero
//! every context starts from is computed once at construction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use veil_core::Digest;

use crate::error::TallyResult;

/// Opaque ciphertext bytes, meaningful only to the backend that produced them
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncryptedValue(Vec<u8>);

impl EncryptedValue {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn digest(&self) -> Digest {
        Digest::sha256(&self.0)
    }
}

impl fmt::Debug for EncryptedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedValue({})", self.digest().short())
    }
}

/// Immutable handle to an encrypted sum; every add yields a new handle
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatorHandle {
    ciphertext: EncryptedValue,
}

impl AccumulatorHandle {
    pub fn ciphertext(&self) -> &EncryptedValue {
        &self.ciphertext
    }

    pub fn digest(&self) -> Digest {
        self.ciphertext.digest()
    }
}

impl fmt::Debug for AccumulatorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccumulatorHandle({})", self.digest().short())
    }
}

/// Additively homomorphic encryption scheme
pub trait HomomorphicBackend: Send + Sync {
    /// Deterministic encryption of a known plaintext (no hiding)
    fn encrypt_trivial(&self, value: u64) -> TallyResult<EncryptedValue>;

    /// Randomized encryption under the backend's public key
    fn encrypt(&self, value: u64) -> TallyResult<EncryptedValue>;

    /// Ciphertext of the sum of the two plaintexts
    fn add(&self, a: &EncryptedValue, b: &EncryptedValue) -> TallyResult<EncryptedValue>;
}

pub struct ConfidentialAccumulator {
    backend: Arc<dyn HomomorphicBackend>,
    zero: AccumulatorHandle,
}

impl ConfidentialAccumulator {
    pub fn new(backend: Arc<dyn HomomorphicBackend>) -> TallyResult<Self> {
        let zero = AccumulatorHandle {
            ciphertext: backend.encrypt_trivial(0)?,
        };
        Ok(Self { backend, zero })
    }

    /// The cached encrypted zero
    pub fn zero(&self) -> AccumulatorHandle {
        self.zero.clone()
    }

    pub fn add_encrypted(
        &self,
        acc: &AccumulatorHandle,
        value: &EncryptedValue,
    ) -> TallyResult<AccumulatorHandle> {
        let ciphertext = self.backend.add(&acc.ciphertext, value)?;
        trace!(from = %acc.digest().short(), to = %ciphertext.digest().short(), "Blind add");
        Ok(AccumulatorHandle { ciphertext })
    }

    pub fn encrypt_plain(&self, value: u64) -> TallyResult<EncryptedValue> {
        self.backend.encrypt(value)
    }
}
