//! Exponential ElGamal over secp256k1
//!
//! Additively homomorphic: Enc(m; r) = (r·G, m·G + r·H) with H = x·G.
//! Ciphertexts are two compressed points (33 bytes each, identity encoded
//! as zeros), 66 bytes total. Decryption recovers m·G and solves the
//! discrete log with a bounded baby-step giant-step table, so plaintexts
//! must stay below the table bound.

use k256::elliptic_curve::group::GroupEncoding;
use k256::elliptic_curve::{Field, PrimeField};
use k256::{CompressedPoint, FieldBytes, ProjectivePoint, Scalar};
use rand_core::OsRng;
use std::collections::HashMap;

use crate::accumulator::{EncryptedValue, HomomorphicBackend};
use crate::error::{TallyError, TallyResult};

pub const POINT_LEN: usize = 33;
pub const CIPHERTEXT_LEN: usize = 2 * POINT_LEN;

fn encode_point(point: &ProjectivePoint) -> [u8; POINT_LEN] {
    let mut out = [0u8; POINT_LEN];
    out.copy_from_slice(&point.to_bytes());
    out
}

fn decode_point(bytes: &[u8]) -> TallyResult<ProjectivePoint> {
    let repr = CompressedPoint::clone_from_slice(bytes);
    Option::from(ProjectivePoint::from_bytes(&repr))
        .ok_or_else(|| TallyError::Ciphertext("point is not on the curve".to_string()))
}

#[derive(Clone, Copy)]
struct Ciphertext {
    c1: ProjectivePoint,
    c2: ProjectivePoint,
}

impl Ciphertext {
    fn parse(value: &EncryptedValue) -> TallyResult<Self> {
        let bytes = value.as_bytes();
        if bytes.len() != CIPHERTEXT_LEN {
            return Err(TallyError::Ciphertext(format!(
                "expected {} bytes, got {}",
                CIPHERTEXT_LEN,
                bytes.len()
            )));
        }
        Ok(Self {
            c1: decode_point(&bytes[..POINT_LEN])?,
            c2: decode_point(&bytes[POINT_LEN..])?,
        })
    }

    fn encode(&self) -> EncryptedValue {
        let mut bytes = Vec::with_capacity(CIPHERTEXT_LEN);
        bytes.extend_from_slice(&encode_point(&self.c1));
        bytes.extend_from_slice(&encode_point(&self.c2));
        EncryptedValue::from_bytes(bytes)
    }
}

/// Encryption key shared with contributors and the accumulator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElGamalPublicKey {
    point: ProjectivePoint,
}

impl ElGamalPublicKey {
    pub fn from_bytes(bytes: &[u8]) -> TallyResult<Self> {
        if bytes.len() != POINT_LEN {
            return Err(TallyError::Ciphertext(format!(
                "public key must be {} bytes",
                POINT_LEN
            )));
        }
        Ok(Self {
            point: decode_point(bytes)?,
        })
    }

    pub fn to_bytes(&self) -> [u8; POINT_LEN] {
        encode_point(&self.point)
    }

    /// Randomized encryption for confidential contributions
    pub fn encrypt(&self, value: u64) -> EncryptedValue {
        let r = Scalar::random(&mut OsRng);
        Ciphertext {
            c1: ProjectivePoint::GENERATOR * r,
            c2: ProjectivePoint::GENERATOR * Scalar::from(value) + self.point * r,
        }
        .encode()
    }
}

/// Decryption key; held only by the decryption gateway
#[derive(Clone)]
pub struct ElGamalSecretKey {
    scalar: Scalar,
}

impl ElGamalSecretKey {
    pub fn generate() -> Self {
        Self {
            scalar: Scalar::random(&mut OsRng),
        }
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> TallyResult<Self> {
        let scalar: Option<Scalar> = Scalar::from_repr(FieldBytes::clone_from_slice(bytes)).into();
        match scalar {
            Some(s) if !bool::from(s.is_zero()) => Ok(Self { scalar: s }),
            _ => Err(TallyError::Ciphertext("secret key out of range".to_string())),
        }
    }

    pub fn public_key(&self) -> ElGamalPublicKey {
        ElGamalPublicKey {
            point: ProjectivePoint::GENERATOR * self.scalar,
        }
    }

    pub fn decrypt(&self, value: &EncryptedValue, table: &DiscreteLogTable) -> TallyResult<u64> {
        let ct = Ciphertext::parse(value)?;
        let message_point = ct.c2 - ct.c1 * self.scalar;
        table.solve(&message_point).ok_or(TallyError::PlaintextOutOfRange)
    }
}

/// Baby-step giant-step table for discrete logs in [0, bound]
pub struct DiscreteLogTable {
    step: u64,
    bound: u64,
    baby_steps: HashMap<[u8; POINT_LEN], u64>,
    giant_step: ProjectivePoint,
}

impl DiscreteLogTable {
    pub fn new(bound: u64) -> Self {
        let step = ((bound as f64).sqrt().ceil() as u64).max(1);

        let mut baby_steps = HashMap::with_capacity(step as usize);
        let mut point = ProjectivePoint::IDENTITY;
        for j in 0..step {
            baby_steps.insert(encode_point(&point), j);
            point += ProjectivePoint::GENERATOR;
        }

        Self {
            step,
            bound,
            baby_steps,
            giant_step: -(ProjectivePoint::GENERATOR * Scalar::from(step)),
        }
    }

    pub fn bound(&self) -> u64 {
        self.bound
    }

    /// m with m·G == target, if m <= bound
    pub fn solve(&self, target: &ProjectivePoint) -> Option<u64> {
        let mut gamma = *target;
        for i in 0..=self.step {
            if let Some(j) = self.baby_steps.get(&encode_point(&gamma)) {
                let m = i * self.step + j;
                return (m <= self.bound).then_some(m);
            }
            gamma += self.giant_step;
        }
        None
    }
}

/// [`HomomorphicBackend`] over exponential ElGamal
pub struct ElGamalBackend {
    public_key: ElGamalPublicKey,
}

impl ElGamalBackend {
    pub fn new(public_key: ElGamalPublicKey) -> Self {
        Self { public_key }
    }

    pub fn public_key(&self) -> &ElGamalPublicKey {
        &self.public_key
    }
}

impl HomomorphicBackend for ElGamalBackend {
    fn encrypt_trivial(&self, value: u64) -> TallyResult<EncryptedValue> {
        Ok(Ciphertext {
            c1: ProjectivePoint::IDENTITY,
            c2: ProjectivePoint::GENERATOR * Scalar::from(value),
        }
        .encode())
    }

    fn encrypt(&self, value: u64) -> TallyResult<EncryptedValue> {
        Ok(self.public_key.encrypt(value))
    }

    fn add(&self, a: &EncryptedValue, b: &EncryptedValue) -> TallyResult<EncryptedValue> {
        let a = Ciphertext::parse(a)?;
        let b = Ciphertext::parse(b)?;
        Ok(Ciphertext {
            c1: a.c1 + b.c1,
            c2: a.c2 + b.c2,
        }
        .encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let secret = ElGamalSecretKey::generate();
        let table = DiscreteLogTable::new(10_000);

        for value in [0u64, 1, 77, 9_999] {
            let ct = secret.public_key().encrypt(value);
            assert_eq!(ct.as_bytes().len(), CIPHERTEXT_LEN);
            assert_eq!(secret.decrypt(&ct, &table).unwrap(), value);
        }
    }

    #[test]
    fn test_randomized_encryption_hides_equal_values() {
        let secret = ElGamalSecretKey::generate();
        let a = secret.public_key().encrypt(5);
        let b = secret.public_key().encrypt(5);
        assert_ne!(a, b);
    }

    #[test]
    fn test_trivial_zero_encodes_identity() {
        let backend = ElGamalBackend::new(ElGamalSecretKey::generate().public_key());
        let zero = backend.encrypt_trivial(0).unwrap();
        assert!(zero.as_bytes().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_homomorphic_add() {
        let secret = ElGamalSecretKey::generate();
        let backend = ElGamalBackend::new(secret.public_key());
        let table = DiscreteLogTable::new(1 << 16);

        let sum = backend
            .add(
                &secret.public_key().encrypt(1_200),
                &backend.encrypt_trivial(34).unwrap(),
            )
            .unwrap();
        assert_eq!(secret.decrypt(&sum, &table).unwrap(), 1_234);
    }

    #[test]
    fn test_out_of_range() {
        let secret = ElGamalSecretKey::generate();
        let table = DiscreteLogTable::new(100);
        let ct = secret.public_key().encrypt(1_000_000);
        assert!(matches!(
            secret.decrypt(&ct, &table),
            Err(TallyError::PlaintextOutOfRange)
        ));
    }

    #[test]
    fn test_wrong_key_does_not_decrypt_to_value() {
        let secret = ElGamalSecretKey::generate();
        let other = ElGamalSecretKey::generate();
        let table = DiscreteLogTable::new(1_000);
        let ct = secret.public_key().encrypt(500);
        assert!(other.decrypt(&ct, &table).is_err());
    }

    #[test]
    fn test_public_key_roundtrip() {
        let pk = ElGamalSecretKey::generate().public_key();
        assert_eq!(ElGamalPublicKey::from_bytes(&pk.to_bytes()).unwrap(), pk);
    }
}
