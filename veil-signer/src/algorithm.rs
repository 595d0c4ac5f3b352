//! Signature Algorithm Families
//!
//! One variant per supported family, each carrying its byte-layout
//! constants. Layouts are preserved exactly for interoperability with
//! existing on-chain deployments.
//!
//! | Variant           | Public key            | Signature             |
//! |-------------------|-----------------------|-----------------------|
//! | SchnorrThreshold  | 33 (SEC1 compressed)  | 65 (R ‖ z)            |
//! | EcdsaThreshold    | 65 (0x04 ‖ X ‖ Y)     | 65 (r ‖ s ‖ v)        |
//! | LatticeSingle     | 1952                  | 3309                  |
//! | LatticeThreshold  | 1000..=2000           | 3500..=5000           |
//! | BlsAggregate      | 48                    | 96                    |
//! | HybridClassicalPq | BLS ‖ lattice thresh. | BLS ‖ lattice thresh. |
//! | HybridFullPq      | lattice thresh. ‖ ML-DSA | lattice thresh. ‖ ML-DSA |

use serde::{Deserialize, Serialize};
use std::fmt;

/// secp256k1 Schnorr (FROST) public key: SEC1 compressed point
pub const SCHNORR_PUBLIC_KEY_LEN: usize = 33;
/// secp256k1 Schnorr (FROST) signature: compressed R followed by z
pub const SCHNORR_SIGNATURE_LEN: usize = 65;

/// secp256k1 ECDSA public key: uncompressed SEC1 point
pub const ECDSA_PUBLIC_KEY_LEN: usize = 65;
/// secp256k1 ECDSA signature: r ‖ s ‖ v
pub const ECDSA_SIGNATURE_LEN: usize = 65;

/// BLS12-381 min-pk public key (G1 compressed)
pub const BLS_PUBLIC_KEY_LEN: usize = 48;
/// BLS12-381 min-pk signature (G2 compressed)
pub const BLS_SIGNATURE_LEN: usize = 96;

/// ML-DSA-65 (FIPS 204 level 3) public key
pub const ML_DSA_PUBLIC_KEY_LEN: usize = 1952;
/// ML-DSA-65 signature
pub const ML_DSA_SIGNATURE_LEN: usize = 3309;

/// Lattice threshold public key bounds
pub const LATTICE_THRESHOLD_PUBLIC_KEY_MIN: usize = 1000;
pub const LATTICE_THRESHOLD_PUBLIC_KEY_MAX: usize = 2000;
/// Lattice threshold signature bounds
pub const LATTICE_THRESHOLD_SIGNATURE_MIN: usize = 3500;
pub const LATTICE_THRESHOLD_SIGNATURE_MAX: usize = 5000;

/// Required byte length of a key or signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteLength {
    Exact(usize),
    Range { min: usize, max: usize },
}

impl ByteLength {
    pub fn accepts(&self, len: usize) -> bool {
        match *self {
            Self::Exact(n) => len == n,
            Self::Range { min, max } => (min..=max).contains(&len),
        }
    }

    /// Shift the bounds by a fixed-size prefix or suffix
    const fn plus(self, fixed: usize) -> Self {
        match self {
            Self::Exact(n) => Self::Exact(n + fixed),
            Self::Range { min, max } => Self::Range {
                min: min + fixed,
                max: max + fixed,
            },
        }
    }
}

impl fmt::Display for ByteLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(n) => write!(f, "{}", n),
            Self::Range { min, max } => write!(f, "{}..={}", min, max),
        }
    }
}

const LATTICE_THRESHOLD_PK: ByteLength = ByteLength::Range {
    min: LATTICE_THRESHOLD_PUBLIC_KEY_MIN,
    max: LATTICE_THRESHOLD_PUBLIC_KEY_MAX,
};

const LATTICE_THRESHOLD_SIG: ByteLength = ByteLength::Range {
    min: LATTICE_THRESHOLD_SIGNATURE_MIN,
    max: LATTICE_THRESHOLD_SIGNATURE_MAX,
};

/// Supported signature algorithm families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureAlgorithm {
    /// FROST secp256k1-SHA256 threshold Schnorr
    SchnorrThreshold,
    /// Threshold ECDSA (CGGMP21 output) over secp256k1
    EcdsaThreshold,
    /// ML-DSA-65 single signer
    LatticeSingle,
    /// Lattice-based threshold signature
    LatticeThreshold,
    /// BLS12-381 aggregate signature
    BlsAggregate,
    /// BLS aggregate plus lattice threshold
    HybridClassicalPq,
    /// Lattice threshold plus ML-DSA single signer
    HybridFullPq,
}

impl SignatureAlgorithm {
    pub const ALL: [SignatureAlgorithm; 7] = [
        Self::SchnorrThreshold,
        Self::EcdsaThreshold,
        Self::LatticeSingle,
        Self::LatticeThreshold,
        Self::BlsAggregate,
        Self::HybridClassicalPq,
        Self::HybridFullPq,
    ];

    pub const fn public_key_length(&self) -> ByteLength {
        match self {
            Self::SchnorrThreshold => ByteLength::Exact(SCHNORR_PUBLIC_KEY_LEN),
            Self::EcdsaThreshold => ByteLength::Exact(ECDSA_PUBLIC_KEY_LEN),
            Self::LatticeSingle => ByteLength::Exact(ML_DSA_PUBLIC_KEY_LEN),
            Self::LatticeThreshold => LATTICE_THRESHOLD_PK,
            Self::BlsAggregate => ByteLength::Exact(BLS_PUBLIC_KEY_LEN),
            Self::HybridClassicalPq => LATTICE_THRESHOLD_PK.plus(BLS_PUBLIC_KEY_LEN),
            Self::HybridFullPq => LATTICE_THRESHOLD_PK.plus(ML_DSA_PUBLIC_KEY_LEN),
        }
    }

    pub const fn signature_length(&self) -> ByteLength {
        match self {
            Self::SchnorrThreshold => ByteLength::Exact(SCHNORR_SIGNATURE_LEN),
            Self::EcdsaThreshold => ByteLength::Exact(ECDSA_SIGNATURE_LEN),
            Self::LatticeSingle => ByteLength::Exact(ML_DSA_SIGNATURE_LEN),
            Self::LatticeThreshold => LATTICE_THRESHOLD_SIG,
            Self::BlsAggregate => ByteLength::Exact(BLS_SIGNATURE_LEN),
            Self::HybridClassicalPq => LATTICE_THRESHOLD_SIG.plus(BLS_SIGNATURE_LEN),
            Self::HybridFullPq => LATTICE_THRESHOLD_SIG.plus(ML_DSA_SIGNATURE_LEN),
        }
    }

    /// Whether (t, n) parameters apply to this family
    pub const fn is_threshold(&self) -> bool {
        !matches!(self, Self::LatticeSingle)
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::SchnorrThreshold => "schnorr_threshold",
            Self::EcdsaThreshold => "ecdsa_threshold",
            Self::LatticeSingle => "lattice_single",
            Self::LatticeThreshold => "lattice_threshold",
            Self::BlsAggregate => "bls_aggregate",
            Self::HybridClassicalPq => "hybrid_classical_pq",
            Self::HybridFullPq => "hybrid_full_pq",
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
