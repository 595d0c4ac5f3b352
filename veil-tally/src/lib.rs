//! Veil Tally
//!
//! Confidential tallying with deferred threshold decryption.
//!
//! # Flow
//!
//! 1. An admin opens a context with a snapshot block and a close time
//! 2. Contributors add public and/or confidential weight to one category;
//!    confidential weight is summed blindly under additive homomorphism
//! 3. After close, the confidential totals go to a decryption gateway
//! 4. The gateway's authenticated callback supplies the plaintexts and the
//!    context is finalized exactly once against its quorum and basis policy
//!
//! Nothing confidential is revealed before step 4.

pub mod accumulator;
pub mod context;
pub mod coordinator;
pub mod elgamal;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod weight;

pub use accumulator::{AccumulatorHandle, ConfidentialAccumulator, EncryptedValue, HomomorphicBackend};
pub use context::{
    evaluate, Category, CategoryTotals, ContextSnapshot, ContextState, Outcome, MAX_PUBLIC_TOTAL,
};
pub use coordinator::{DecryptionCoordinator, DecryptionRequest};
pub use elgamal::{DiscreteLogTable, ElGamalBackend, ElGamalPublicKey, ElGamalSecretKey};
pub use engine::TallyEngine;
pub use error::{TallyError, TallyResult};
pub use gateway::{
    CallbackProof, DecryptionCallback, DecryptionGateway, GatewayAuthenticator,
    LocalDecryptionGateway,
};
pub use weight::{blend, ConfidentialWeight, StaticWeightSource, Weight, WeightQuote, WeightSource};
