//! BLS12-381 Aggregate Signatures
//!
//! min-pk variant via blst: 48-byte G1 public keys, 96-byte G2 signatures.
//! An aggregate signature over one message verifies against the
//! aggregate of the participating public keys.

use blst::min_pk::{AggregatePublicKey, AggregateSignature, PublicKey, SecretKey, Signature};
use blst::BLST_ERROR;
use rand_core::{OsRng, RngCore};

use crate::algorithm::{BLS_PUBLIC_KEY_LEN, BLS_SIGNATURE_LEN};
use crate::error::{SignerError, SignerResult};

/// Domain Separation Tag (IETF BLS basic scheme, G2 signatures)
pub const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_NUL_";

/// BLS secret key wrapper
#[derive(Clone)]
pub struct BlsSecretKey {
    inner: SecretKey,
}

impl BlsSecretKey {
    /// Generate a new random BLS secret key
    pub fn generate() -> SignerResult<Self> {
        let mut ikm = [0u8; 32];
        OsRng.fill_bytes(&mut ikm);
        let sk = SecretKey::key_gen(&ikm, &[])
            .map_err(|e| SignerError::Crypto(format!("BLS key generation failed: {:?}", e)))?;
        Ok(Self { inner: sk })
    }

    /// Create from raw bytes (32 bytes)
    pub fn from_bytes(bytes: &[u8; 32]) -> SignerResult<Self> {
        let sk = SecretKey::from_bytes(bytes)
            .map_err(|e| SignerError::Crypto(format!("Invalid BLS secret key: {:?}", e)))?;
        Ok(Self { inner: sk })
    }

    pub fn public_key(&self) -> BlsPublicKey {
        BlsPublicKey {
            inner: self.inner.sk_to_pk(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> BlsSignature {
        BlsSignature {
            inner: self.inner.sign(message, DST, &[]),
        }
    }
}

/// BLS public key wrapper
#[derive(Clone, Debug)]
pub struct BlsPublicKey {
    inner: PublicKey,
}

impl BlsPublicKey {
    /// Parse a compressed key, rejecting infinity and off-subgroup points
    pub fn from_bytes(bytes: &[u8]) -> SignerResult<Self> {
        if bytes.len() != BLS_PUBLIC_KEY_LEN {
            return Err(SignerError::InvalidFormat {
                field: "bls public key",
                expected: BLS_PUBLIC_KEY_LEN.to_string(),
                actual: bytes.len(),
            });
        }
        let pk = PublicKey::key_validate(bytes)
            .map_err(|e| SignerError::InvalidPublicKey(format!("BLS: {:?}", e)))?;
        Ok(Self { inner: pk })
    }

    pub fn to_bytes(&self) -> [u8; 48] {
        self.inner.compress()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn verify(&self, message: &[u8], signature: &BlsSignature) -> bool {
        signature
            .inner
            .verify(true, message, DST, &[], &self.inner, false)
            == BLST_ERROR::BLST_SUCCESS
    }
}

/// BLS signature wrapper
#[derive(Clone, Debug)]
pub struct BlsSignature {
    inner: Signature,
}

impl BlsSignature {
    pub fn from_bytes(bytes: &[u8]) -> SignerResult<Self> {
        if bytes.len() != BLS_SIGNATURE_LEN {
            return Err(SignerError::InvalidFormat {
                field: "bls signature",
                expected: BLS_SIGNATURE_LEN.to_string(),
                actual: bytes.len(),
            });
        }
        let sig = Signature::from_bytes(bytes)
            .map_err(|e| SignerError::Crypto(format!("Invalid BLS signature: {:?}", e)))?;
        Ok(Self { inner: sig })
    }

    pub fn to_bytes(&self) -> [u8; 96] {
        self.inner.compress()
    }
}

/// Aggregate signatures from the participating signers
pub fn aggregate_signatures(signatures: &[BlsSignature]) -> SignerResult<BlsSignature> {
    let (first, rest) = signatures
        .split_first()
        .ok_or_else(|| SignerError::Crypto("No signatures to aggregate".to_string()))?;

    let mut agg = AggregateSignature::from_signature(&first.inner);
    for sig in rest {
        agg.add_signature(&sig.inner, true)
            .map_err(|e| SignerError::Crypto(format!("Failed to aggregate signature: {:?}", e)))?;
    }

    Ok(BlsSignature {
        inner: agg.to_signature(),
    })
}

/// Aggregate the public keys of the participating signers
pub fn aggregate_public_keys(keys: &[BlsPublicKey]) -> SignerResult<BlsPublicKey> {
    let (first, rest) = keys
        .split_first()
        .ok_or_else(|| SignerError::Crypto("No public keys to aggregate".to_string()))?;

    let mut agg = AggregatePublicKey::from_public_key(&first.inner);
    for key in rest {
        agg.add_public_key(&key.inner, true)
            .map_err(|e| SignerError::Crypto(format!("Failed to aggregate public key: {:?}", e)))?;
    }

    Ok(BlsPublicKey {
        inner: agg.to_public_key(),
    })
}

/// Verify raw bytes: an invalid key is an error, a malformed signature is a
/// plain rejection
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> SignerResult<bool> {
    let pk = BlsPublicKey::from_bytes(public_key)?;
    let sig = match BlsSignature::from_bytes(signature) {
        Ok(sig) => sig,
        Err(_) => return Ok(false),
    };
    Ok(pk.verify(message, &sig))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let sk = BlsSecretKey::generate().unwrap();
        let pk = sk.public_key();
        let sig = sk.sign(b"tally digest");

        assert!(verify(&pk.to_bytes(), b"tally digest", &sig.to_bytes()).unwrap());
        assert!(!verify(&pk.to_bytes(), b"other digest", &sig.to_bytes()).unwrap());
    }

    #[test]
    fn test_aggregate_three_of_five() {
        let keys: Vec<BlsSecretKey> = (0..5).map(|_| BlsSecretKey::generate().unwrap()).collect();
        let message = [7u8; 32];

        let participants = &keys[..3];
        let sigs: Vec<BlsSignature> = participants.iter().map(|k| k.sign(&message)).collect();
        let pks: Vec<BlsPublicKey> = participants.iter().map(|k| k.public_key()).collect();

        let agg_sig = aggregate_signatures(&sigs).unwrap();
        let agg_pk = aggregate_public_keys(&pks).unwrap();
        assert!(agg_pk.verify(&message, &agg_sig));

        // A non-participant's key does not match the aggregate
        let wrong: Vec<BlsPublicKey> = keys[2..].iter().map(|k| k.public_key()).collect();
        let wrong_pk = aggregate_public_keys(&wrong).unwrap();
        assert!(!wrong_pk.verify(&message, &agg_sig));
    }

    #[test]
    fn test_invalid_key_bytes() {
        let garbage = [0xFFu8; 48];
        let sig = [0u8; 96];
        assert!(matches!(
            verify(&garbage, b"m", &sig),
            Err(SignerError::InvalidPublicKey(_))
        ));
    }

    #[test]
    fn test_empty_aggregation_rejected() {
        assert!(aggregate_signatures(&[]).is_err());
        assert!(aggregate_public_keys(&[]).is_err());
    }
}
