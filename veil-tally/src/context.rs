//! Tally Context
//!
//! One context per decidable unit. State only moves forward:
//! `Uninitialized -> Open -> AwaitingDecryption -> Finalized`.

use chrono::{DateTime, Utc};
use k256::elliptic_curve::bigint::U256;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use veil_core::{ContextId, Digest, Identity, TallyConfig, BASIS_DENOMINATOR};

use crate::accumulator::AccumulatorHandle;
use crate::error::{TallyError, TallyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Yes,
    No,
    Abstain,
}

impl Category {
    /// Decryption order of the confidential totals
    pub const ALL: [Category; 3] = [Category::Yes, Category::No, Category::Abstain];

    pub const fn index(&self) -> usize {
        match self {
            Self::Yes => 0,
            Self::No => 1,
            Self::Abstain => 2,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yes => f.write_str("yes"),
            Self::No => f.write_str("no"),
            Self::Abstain => f.write_str("abstain"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    Uninitialized,
    Open,
    AwaitingDecryption,
    Finalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Undecided,
    Passed,
    Failed,
}

/// Per-category totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub yes: u128,
    pub no: u128,
    pub abstain: u128,
}

impl CategoryTotals {
    pub fn get(&self, category: Category) -> u128 {
        match category {
            Category::Yes => self.yes,
            Category::No => self.no,
            Category::Abstain => self.abstain,
        }
    }

    fn slot(&mut self, category: Category) -> &mut u128 {
        match category {
            Category::Yes => &mut self.yes,
            Category::No => &mut self.no,
            Category::Abstain => &mut self.abstain,
        }
    }

    /// Copy with `amount` added to `category`
    pub fn checked_add(&self, category: Category, amount: u128) -> TallyResult<Self> {
        let mut next = *self;
        let slot = next.slot(category);
        *slot = slot
            .checked_add(amount)
            .ok_or(TallyError::Overflow("category total"))?;
        Ok(next)
    }

    /// Element-wise sum
    pub fn combine(&self, other: &CategoryTotals) -> TallyResult<Self> {
        let mut sum = *self;
        for category in Category::ALL {
            sum = sum.checked_add(category, other.get(category))?;
        }
        Ok(sum)
    }

    pub fn from_plaintexts(plaintexts: &[u64]) -> TallyResult<Self> {
        match plaintexts {
            [yes, no, abstain] => Ok(Self {
                yes: *yes as u128,
                no: *no as u128,
                abstain: *abstain as u128,
            }),
            _ => Err(TallyError::PlaintextCountMismatch {
                expected: Category::ALL.len(),
                actual: plaintexts.len(),
            }),
        }
    }
}

/// Ceiling on a public category total
///
/// Leaves room for one decrypted u64 total, so public + decrypted never
/// overflows at finalization.
pub const MAX_PUBLIC_TOTAL: u128 = u128::MAX - u64::MAX as u128;

/// Evaluate quorum and the strict basis ratio
///
/// quorum: yes + abstain >= quorum_threshold
/// ratio:  yes · DENOMINATOR > (yes + no) · basis_numerator
///
/// The ratio is compared in 256 bits: operands are below 2^129 and the
/// factors below 2^21, so neither side can wrap.
pub fn evaluate(totals: &CategoryTotals, policy: &TallyConfig) -> bool {
    let quorum = totals.yes.saturating_add(totals.abstain) >= policy.quorum_threshold;

    let yes = U256::from_u128(totals.yes);
    let decided = yes.wrapping_add(&U256::from_u128(totals.no));
    let lhs = yes.wrapping_mul(&U256::from_u128(BASIS_DENOMINATOR));
    let rhs = decided.wrapping_mul(&U256::from_u128(policy.basis_numerator.min(BASIS_DENOMINATOR)));

    quorum && lhs > rhs
}

/// Mutable state of one context; always accessed under its mutex
#[derive(Debug, Clone)]
pub struct TallyContext {
    pub(crate) context_id: ContextId,
    pub(crate) start_block: u64,
    pub(crate) open_timestamp: DateTime<Utc>,
    pub(crate) close_timestamp: DateTime<Utc>,
    pub(crate) closed_at: Option<DateTime<Utc>>,
    pub(crate) finalized_at: Option<DateTime<Utc>>,
    pub(crate) state: ContextState,
    pub(crate) policy: TallyConfig,
    pub(crate) public_totals: CategoryTotals,
    pub(crate) confidential_totals: [AccumulatorHandle; 3],
    pub(crate) decrypted_totals: Option<CategoryTotals>,
    pub(crate) outcome: Outcome,
    pub(crate) contributors: HashSet<Identity>,
}

impl TallyContext {
    pub(crate) fn new(
        context_id: ContextId,
        start_block: u64,
        open_timestamp: DateTime<Utc>,
        close_timestamp: DateTime<Utc>,
        policy: TallyConfig,
        zero: AccumulatorHandle,
    ) -> Self {
        Self {
            context_id,
            start_block,
            open_timestamp,
            close_timestamp,
            closed_at: None,
            finalized_at: None,
            state: ContextState::Open,
            policy,
            public_totals: CategoryTotals::default(),
            confidential_totals: [zero.clone(), zero.clone(), zero],
            decrypted_totals: None,
            outcome: Outcome::Undecided,
            contributors: HashSet::new(),
        }
    }

    /// Open and inside [open, close]
    pub(crate) fn accepts_contributions(&self, now: DateTime<Utc>) -> bool {
        self.state == ContextState::Open && now >= self.open_timestamp && now <= self.close_timestamp
    }

    /// Public totals before finalization, public + decrypted after
    pub(crate) fn total_votes(&self) -> TallyResult<CategoryTotals> {
        match &self.decrypted_totals {
            Some(decrypted) => self.public_totals.combine(decrypted),
            None => Ok(self.public_totals),
        }
    }

    pub(crate) fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            context_id: self.context_id,
            state: self.state,
            start_block: self.start_block,
            open_timestamp: self.open_timestamp,
            close_timestamp: self.close_timestamp,
            finalized_at: self.finalized_at,
            policy: self.policy,
            public_totals: self.public_totals,
            decrypted_totals: self.decrypted_totals,
            outcome: self.outcome,
            contribution_count: self.contributors.len(),
            confidential_handles: self.confidential_totals.iter().map(|h| h.digest()).collect(),
        }
    }
}

/// Public view of a context
///
/// Confidential totals appear only as handle digests until decrypted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub context_id: ContextId,
    pub state: ContextState,
    pub start_block: u64,
    pub open_timestamp: DateTime<Utc>,
    pub close_timestamp: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub policy: TallyConfig,
    pub public_totals: CategoryTotals,
    pub decrypted_totals: Option<CategoryTotals>,
    pub outcome: Outcome,
    pub contribution_count: usize,
    pub confidential_handles: Vec<Digest>,
}
