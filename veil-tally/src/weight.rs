//! Contribution Weights and Weight Sources
//!
//! A contribution carries a public portion, a confidential portion, or
//! both. Weight sources are external oracles queried at a context's
//! `start_block`; sources flagged private feed the confidential portion.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use veil_core::Identity;

use crate::accumulator::EncryptedValue;
use crate::error::{TallyError, TallyResult};

/// Confidential portion of a weight
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfidentialWeight {
    /// Known plaintext, encrypted by the engine before it is stored
    Plain(u64),
    /// Ciphertext produced by the contributor
    Encrypted(EncryptedValue),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Weight {
    pub public: u128,
    pub confidential: Option<ConfidentialWeight>,
}

impl Weight {
    pub fn public(amount: u128) -> Self {
        Self {
            public: amount,
            confidential: None,
        }
    }

    pub fn confidential(amount: u64) -> Self {
        Self {
            public: 0,
            confidential: Some(ConfidentialWeight::Plain(amount)),
        }
    }

    pub fn encrypted(ciphertext: EncryptedValue) -> Self {
        Self {
            public: 0,
            confidential: Some(ConfidentialWeight::Encrypted(ciphertext)),
        }
    }

    /// Public and confidential portions together
    pub fn split(public: u128, confidential: ConfidentialWeight) -> Self {
        Self {
            public,
            confidential: Some(confidential),
        }
    }

    /// Zero only when every portion is known to be zero; ciphertexts are never known
    pub fn is_zero(&self) -> bool {
        self.public == 0
            && match &self.confidential {
                None | Some(ConfidentialWeight::Plain(0)) => true,
                Some(_) => false,
            }
    }
}

/// Weight reported by a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightQuote {
    pub amount: u64,
    /// Block of the checkpoint the amount was read from
    pub checkpoint: Option<u64>,
}

/// External weight oracle
#[async_trait]
pub trait WeightSource: Send + Sync {
    fn name(&self) -> &str;

    /// Private sources contribute to the confidential total
    fn is_private(&self) -> bool;

    async fn weight_of(
        &self,
        contributor: &Identity,
        start_block: u64,
        aux: &[u8],
    ) -> TallyResult<WeightQuote>;
}

/// Blend quotes into one weight, routing private quotes to the confidential portion
pub fn blend(quotes: &[(bool, WeightQuote)]) -> TallyResult<Weight> {
    let mut public: u128 = 0;
    let mut private: Option<u64> = None;
    for (is_private, quote) in quotes {
        if *is_private {
            let sum = private
                .unwrap_or(0)
                .checked_add(quote.amount)
                .ok_or(TallyError::Overflow("confidential weight"))?;
            private = Some(sum);
        } else {
            public = public
                .checked_add(quote.amount as u128)
                .ok_or(TallyError::Overflow("public weight"))?;
        }
    }
    Ok(Weight {
        public,
        confidential: private.map(ConfidentialWeight::Plain),
    })
}

/// In-memory checkpointed balances
///
/// The weight at block b is the latest checkpoint at or before b.
pub struct StaticWeightSource {
    name: String,
    private: bool,
    checkpoints: RwLock<HashMap<Identity, BTreeMap<u64, u64>>>,
}

impl StaticWeightSource {
    pub fn new(name: impl Into<String>, private: bool) -> Self {
        Self {
            name: name.into(),
            private,
            checkpoints: RwLock::new(HashMap::new()),
        }
    }

    pub async fn set_balance(&self, contributor: Identity, block: u64, amount: u64) {
        self.checkpoints
            .write()
            .await
            .entry(contributor)
            .or_default()
            .insert(block, amount);
    }
}

#[async_trait]
impl WeightSource for StaticWeightSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_private(&self) -> bool {
        self.private
    }

    async fn weight_of(
        &self,
        contributor: &Identity,
        start_block: u64,
        _aux: &[u8],
    ) -> TallyResult<WeightQuote> {
        let checkpoints = self.checkpoints.read().await;
        let found = checkpoints
            .get(contributor)
            .and_then(|history| history.range(..=start_block).next_back());
        Ok(match found {
            Some((block, amount)) => WeightQuote {
                amount: *amount,
                checkpoint: Some(*block),
            },
            None => WeightQuote {
                amount: 0,
                checkpoint: None,
            },
        })
    }
}
