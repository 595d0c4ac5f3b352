//! Threshold Policy
//!
//! (t, n) parameter validation, participation checks and the linear cost
//! model used for gas-style budgeting of threshold verification.

use veil_core::{VeilConfig, VerifierConfig};

use crate::error::{SignerError, SignerResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdPolicy {
    cost: VerifierConfig,
}

impl ThresholdPolicy {
    pub fn new(cost: VerifierConfig) -> Self {
        Self { cost }
    }

    /// Cost model taken from the `verifier` section
    pub fn from_config(config: &VeilConfig) -> Self {
        Self::new(config.verifier)
    }

    /// Require 0 < t <= n
    pub fn validate(threshold: u32, total_signers: u32) -> SignerResult<()> {
        if threshold == 0 || threshold > total_signers {
            return Err(SignerError::InvalidThreshold {
                threshold,
                total_signers,
            });
        }
        Ok(())
    }

    /// Whether `participating` signers satisfy threshold `t`
    pub fn is_met(participating: u32, threshold: u32) -> bool {
        participating >= threshold
    }

    /// Count participants from a signer bitmap (bit i of byte i/8, LSB first)
    pub fn participants(bitmap: &[u8], total_signers: u32) -> u32 {
        (0..total_signers)
            .filter(|&i| {
                bitmap
                    .get((i / 8) as usize)
                    .map(|byte| byte & (1 << (i % 8)) != 0)
                    .unwrap_or(false)
            })
            .count() as u32
    }

    /// base + per_signer · n, saturating
    pub fn estimate_cost(&self, total_signers: u32) -> u64 {
        self.cost
            .base_cost
            .saturating_add(self.cost.per_signer_cost.saturating_mul(total_signers as u64))
    }
}
