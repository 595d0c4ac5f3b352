//! Key Rotation
//!
//! Registry of threshold signers with proactive resharing. A reshare
//! changes (t, n) and the share commitment but must leave the group public
//! key untouched; each accepted reshare appends a new generation. Rollback
//! moves the current pointer back to an earlier generation without
//! discarding history, so every generation ever issued stays auditable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use veil_core::logging::operations;
use veil_core::{AdminRole, Clock, Digest, Identity, SignerId};

use crate::algorithm::SignatureAlgorithm;
use crate::error::{SignerError, SignerResult};
use crate::policy::ThresholdPolicy;
use crate::verifier::SignatureVerifier;

/// One key generation of a signer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub generation: u64,
    pub threshold: u32,
    pub total_signers: u32,
    /// Commitment to the share set of this generation
    pub commitment: Digest,
    /// Generation this one was reshared from
    pub parent: Option<u64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationKind {
    Registered,
    Reshared,
    RolledBack,
}

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationEvent {
    pub signer_id: SignerId,
    pub kind: RotationKind,
    pub from_generation: Option<u64>,
    pub to_generation: u64,
    pub actor: Identity,
    pub at: DateTime<Utc>,
}

/// A threshold signer: fixed group key, evolving share set
#[derive(Debug, Clone)]
pub struct ThresholdSigner {
    signer_id: SignerId,
    algorithm: SignatureAlgorithm,
    public_key: Vec<u8>,
    threshold: u32,
    total_signers: u32,
    generation: u64,
    authority: AdminRole,
    history: Vec<GenerationRecord>,
}

impl ThresholdSigner {
    pub fn signer_id(&self) -> &SignerId {
        &self.signer_id
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn total_signers(&self) -> u32 {
        self.total_signers
    }

    /// Current generation (may trail the latest after a rollback)
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Highest generation ever issued
    pub fn latest_generation(&self) -> u64 {
        self.history.last().map(|r| r.generation).unwrap_or(0)
    }

    pub fn authority(&self) -> &Identity {
        self.authority.admin()
    }

    pub fn history(&self) -> &[GenerationRecord] {
        &self.history
    }

    pub fn record(&self, generation: u64) -> Option<&GenerationRecord> {
        // Generations are issued densely from 1
        generation
            .checked_sub(1)
            .and_then(|i| self.history.get(i as usize))
    }

    pub fn current_record(&self) -> Option<&GenerationRecord> {
        self.record(self.generation)
    }

    fn ensure_authority(&self, caller: &Identity) -> SignerResult<()> {
        if self.authority.is_admin(caller) {
            Ok(())
        } else {
            Err(SignerError::Unauthorized {
                caller: caller.clone(),
                signer_id: self.signer_id.clone(),
            })
        }
    }
}

/// Registry of threshold signers
pub struct KeyRegistry {
    signers: HashMap<SignerId, ThresholdSigner>,
    events: Vec<RotationEvent>,
    clock: Arc<dyn Clock>,
}

/// (t, n) rules: 0 < t <= n for threshold families, exactly (1, 1) otherwise
fn check_parameters(
    algorithm: SignatureAlgorithm,
    threshold: u32,
    total_signers: u32,
) -> SignerResult<()> {
    if algorithm.is_threshold() {
        return ThresholdPolicy::validate(threshold, total_signers);
    }
    if threshold != 1 || total_signers != 1 {
        return Err(SignerError::InvalidThreshold {
            threshold,
            total_signers,
        });
    }
    Ok(())
}

impl KeyRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            signers: HashMap::new(),
            events: Vec::new(),
            clock,
        }
    }

    /// Register a signer at generation 1; `authority` owns resharing
    pub fn register(
        &mut self,
        authority: Identity,
        signer_id: SignerId,
        algorithm: SignatureAlgorithm,
        public_key: Vec<u8>,
        threshold: u32,
        total_signers: u32,
        commitment: Digest,
    ) -> SignerResult<&ThresholdSigner> {
        if self.signers.contains_key(&signer_id) {
            return Err(SignerError::SignerExists(signer_id));
        }
        check_parameters(algorithm, threshold, total_signers)?;
        SignatureVerifier::check_public_key(algorithm, &public_key)?;

        let now = self.clock.now();
        let record = GenerationRecord {
            generation: 1,
            threshold,
            total_signers,
            commitment,
            parent: None,
            created_at: now,
        };

        info!(
            signer_id = %signer_id,
            algorithm = %algorithm,
            t = threshold,
            n = total_signers,
            "Signer registered"
        );

        self.events.push(RotationEvent {
            signer_id: signer_id.clone(),
            kind: RotationKind::Registered,
            from_generation: None,
            to_generation: 1,
            actor: authority.clone(),
            at: now,
        });

        let signer = ThresholdSigner {
            signer_id: signer_id.clone(),
            algorithm,
            public_key,
            threshold,
            total_signers,
            generation: 1,
            authority: AdminRole::new(authority),
            history: vec![record],
        };
        Ok(self.signers.entry(signer_id).or_insert(signer))
    }

    pub fn get(&self, signer_id: &SignerId) -> SignerResult<&ThresholdSigner> {
        self.signers
            .get(signer_id)
            .ok_or_else(|| SignerError::SignerNotFound(signer_id.clone()))
    }

    fn get_mut(&mut self, signer_id: &SignerId) -> SignerResult<&mut ThresholdSigner> {
        self.signers
            .get_mut(signer_id)
            .ok_or_else(|| SignerError::SignerNotFound(signer_id.clone()))
    }

    /// Reshare to new (t, n) parameters
    ///
    /// `reported_public_key` is the group key emitted by the reshare
    /// ceremony; any difference from the registered key rejects the reshare.
    /// Returns the new generation.
    pub fn reshare(
        &mut self,
        caller: &Identity,
        signer_id: &SignerId,
        threshold: u32,
        total_signers: u32,
        commitment: Digest,
        reported_public_key: &[u8],
    ) -> SignerResult<u64> {
        let now = self.clock.now();
        let signer = self.get_mut(signer_id)?;
        signer.ensure_authority(caller)?;
        check_parameters(signer.algorithm, threshold, total_signers)?;
        if reported_public_key != signer.public_key.as_slice() {
            warn!(
                signer_id = %signer_id,
                operation = operations::RESHARE,
                "Reshare reported a different group key"
            );
            return Err(SignerError::PublicKeyChanged(signer_id.clone()));
        }

        let parent = signer.generation;
        let generation = signer.latest_generation() + 1;
        signer.history.push(GenerationRecord {
            generation,
            threshold,
            total_signers,
            commitment,
            parent: Some(parent),
            created_at: now,
        });
        signer.threshold = threshold;
        signer.total_signers = total_signers;
        signer.generation = generation;

        info!(
            signer_id = %signer_id,
            operation = operations::RESHARE,
            from = parent,
            generation,
            t = threshold,
            n = total_signers,
            "Signer reshared"
        );

        self.events.push(RotationEvent {
            signer_id: signer_id.clone(),
            kind: RotationKind::Reshared,
            from_generation: Some(parent),
            to_generation: generation,
            actor: caller.clone(),
            at: now,
        });
        Ok(generation)
    }

    /// Move the current generation back to `target` (0 < target < current)
    pub fn rollback(
        &mut self,
        caller: &Identity,
        signer_id: &SignerId,
        target: u64,
    ) -> SignerResult<()> {
        let now = self.clock.now();
        let signer = self.get_mut(signer_id)?;
        signer.ensure_authority(caller)?;

        let current = signer.generation;
        if target == 0 || target >= current {
            return Err(SignerError::InvalidGeneration { target, current });
        }
        let record = signer
            .record(target)
            .cloned()
            .ok_or(SignerError::InvalidGeneration { target, current })?;

        signer.threshold = record.threshold;
        signer.total_signers = record.total_signers;
        signer.generation = target;

        warn!(
            signer_id = %signer_id,
            operation = operations::ROLLBACK,
            from = current,
            generation = target,
            "Signer rolled back"
        );

        self.events.push(RotationEvent {
            signer_id: signer_id.clone(),
            kind: RotationKind::RolledBack,
            from_generation: Some(current),
            to_generation: target,
            actor: caller.clone(),
            at: now,
        });
        Ok(())
    }

    /// Phase one of an authority handover
    pub fn propose_authority(
        &mut self,
        caller: &Identity,
        signer_id: &SignerId,
        successor: Identity,
    ) -> SignerResult<()> {
        let signer = self.get_mut(signer_id)?;
        signer.ensure_authority(caller)?;
        signer.authority.propose(caller, successor)?;
        Ok(())
    }

    /// Phase two: the nominee accepts
    pub fn accept_authority(&mut self, caller: &Identity, signer_id: &SignerId) -> SignerResult<()> {
        self.get_mut(signer_id)?.authority.accept(caller)?;
        Ok(())
    }

    /// Audit events for one signer, oldest first
    pub fn events(&self, signer_id: &SignerId) -> Vec<&RotationEvent> {
        self.events
            .iter()
            .filter(|e| &e.signer_id == signer_id)
            .collect()
    }

    pub fn signer_ids(&self) -> Vec<&SignerId> {
        self.signers.keys().collect()
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }
}
