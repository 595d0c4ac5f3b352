//! Threshold ECDSA Verification (secp256k1)
//!
//! Threshold ECDSA output is an ordinary ECDSA signature, so verification
//! recovers the signing key from (r, s, v) over the 32-byte prehash and
//! compares it against the registered group key. High-s signatures are
//! rejected to keep signatures non-malleable.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

use crate::algorithm::{ECDSA_PUBLIC_KEY_LEN, ECDSA_SIGNATURE_LEN};
use crate::error::{SignerError, SignerResult};

/// Parse an uncompressed (0x04 ‖ X ‖ Y) group key
pub fn parse_public_key(bytes: &[u8]) -> SignerResult<VerifyingKey> {
    if bytes.len() != ECDSA_PUBLIC_KEY_LEN {
        return Err(SignerError::InvalidFormat {
            field: "ecdsa public key",
            expected: ECDSA_PUBLIC_KEY_LEN.to_string(),
            actual: bytes.len(),
        });
    }
    if bytes[0] != 0x04 {
        return Err(SignerError::InvalidPublicKey(format!(
            "ecdsa key prefix 0x{:02x} is not an uncompressed point",
            bytes[0]
        )));
    }
    VerifyingKey::from_sec1_bytes(bytes)
        .map_err(|_| SignerError::InvalidPublicKey("ecdsa key is not on the curve".to_string()))
}

/// Map the recovery byte; both raw (0/1) and Ethereum-style (27/28) forms are accepted
fn recovery_id(v: u8) -> Option<RecoveryId> {
    match v {
        0 | 27 => RecoveryId::from_byte(0),
        1 | 28 => RecoveryId::from_byte(1),
        _ => None,
    }
}

pub fn verify(public_key: &[u8], prehash: &[u8], signature: &[u8]) -> SignerResult<bool> {
    let expected = parse_public_key(public_key)?;

    if signature.len() != ECDSA_SIGNATURE_LEN {
        return Err(SignerError::InvalidFormat {
            field: "ecdsa signature",
            expected: ECDSA_SIGNATURE_LEN.to_string(),
            actual: signature.len(),
        });
    }

    let recid = match recovery_id(signature[64]) {
        Some(id) => id,
        None => return Ok(false),
    };
    let sig = match Signature::from_slice(&signature[..64]) {
        Ok(sig) => sig,
        Err(_) => return Ok(false),
    };
    if sig.normalize_s().is_some() {
        return Ok(false);
    }

    match VerifyingKey::recover_from_prehash(prehash, &sig, recid) {
        Ok(recovered) => Ok(recovered == expected),
        Err(_) => Ok(false),
    }
}
