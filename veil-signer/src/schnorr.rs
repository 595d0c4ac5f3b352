//! FROST(secp256k1, SHA-256) Signature Verification
//!
//! Verifies group signatures produced by a FROST signing round (RFC 9591).
//! The group key is a SEC1 compressed point; the signature is the
//! compressed commitment R followed by the 32-byte big-endian response z.
//!
//! Accepts iff `z·G == R + c·P` where
//! `c = H2(R ‖ P ‖ msg)` is hash_to_field with expand_message_xmd(SHA-256)
//! under the "FROST-secp256k1-SHA256-v1chal" tag.

use k256::elliptic_curve::hash2curve::{hash_to_field, ExpandMsgXmd};
use k256::elliptic_curve::sec1::FromEncodedPoint;
use k256::elliptic_curve::PrimeField;
use k256::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar};
use sha2::Sha256;

use crate::algorithm::{SCHNORR_PUBLIC_KEY_LEN, SCHNORR_SIGNATURE_LEN};
use crate::error::{SignerError, SignerResult};

/// Challenge domain tag from the FROST secp256k1 ciphersuite
pub const CHALLENGE_DST: &[u8] = b"FROST-secp256k1-SHA256-v1chal";

/// secp256k1 group order n, big-endian
const CURVE_ORDER: [u8; 32] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE,
    0xBA, 0xAE, 0xDC, 0xE6, 0xAF, 0x48, 0xA0, 0x3B, 0xBF, 0xD2, 0x5E, 0x8C, 0xD0, 0x36, 0x41, 0x41,
];

/// Parse and range-check a group public key
///
/// The x-coordinate must be below the group order n before any curve
/// arithmetic happens, so keys in [n, p) are refused even though some of
/// them are valid field elements.
pub fn parse_public_key(bytes: &[u8]) -> SignerResult<AffinePoint> {
    if bytes.len() != SCHNORR_PUBLIC_KEY_LEN {
        return Err(SignerError::InvalidFormat {
            field: "schnorr public key",
            expected: SCHNORR_PUBLIC_KEY_LEN.to_string(),
            actual: bytes.len(),
        });
    }
    if bytes[0] != 0x02 && bytes[0] != 0x03 {
        return Err(SignerError::InvalidPublicKey(format!(
            "schnorr key prefix 0x{:02x} is not a compressed point",
            bytes[0]
        )));
    }
    // Equal-length byte slices compare as big-endian integers
    if bytes[1..] >= CURVE_ORDER[..] {
        return Err(SignerError::InvalidPublicKey(
            "schnorr key x-coordinate is not below the group order".to_string(),
        ));
    }

    decode_point(bytes)
        .ok_or_else(|| SignerError::InvalidPublicKey("schnorr key is not on the curve".to_string()))
}

fn decode_point(bytes: &[u8]) -> Option<AffinePoint> {
    let encoded = EncodedPoint::from_bytes(bytes).ok()?;
    Option::from(AffinePoint::from_encoded_point(&encoded))
}

/// FROST challenge scalar over the serialized commitment, key and message
pub fn challenge(commitment: &[u8], public_key: &[u8], message: &[u8]) -> SignerResult<Scalar> {
    let mut out = [Scalar::ZERO];
    hash_to_field::<ExpandMsgXmd<Sha256>, Scalar>(
        &[commitment, public_key, message],
        &[CHALLENGE_DST],
        &mut out,
    )
    .map_err(|e| SignerError::Crypto(format!("challenge derivation failed: {}", e)))?;
    Ok(out[0])
}

/// Verify a FROST group signature
///
/// Key problems are errors; a malformed commitment or out-of-range
/// response is an ordinary rejection.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> SignerResult<bool> {
    let group_key = parse_public_key(public_key)?;

    if signature.len() != SCHNORR_SIGNATURE_LEN {
        return Err(SignerError::InvalidFormat {
            field: "schnorr signature",
            expected: SCHNORR_SIGNATURE_LEN.to_string(),
            actual: signature.len(),
        });
    }
    let (r_bytes, z_bytes) = signature.split_at(33);

    let commitment = match decode_point(r_bytes) {
        Some(point) => point,
        None => return Ok(false),
    };
    let z: Scalar = match Option::from(Scalar::from_repr(FieldBytes::clone_from_slice(z_bytes))) {
        Some(z) => z,
        None => return Ok(false),
    };

    let c = challenge(r_bytes, public_key, message)?;

    let lhs = ProjectivePoint::GENERATOR * z;
    let rhs = ProjectivePoint::from(commitment) + ProjectivePoint::from(group_key) * c;
    Ok(lhs == rhs)
}
