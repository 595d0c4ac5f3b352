//! Operation Authorization
//!
//! Threshold-signed privileged operations (treasury moves, parameter
//! changes). An operation is accepted when its nonce is the signer's next
//! nonce, its signature verifies under the signer's current generation, and
//! the spend guard admits its value.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use veil_core::logging::operations;
use veil_core::{Clock, Digest, SignerId, SpendConfig};

use crate::error::{SignerError, SignerResult};
use crate::rotation::KeyRegistry;
use crate::verifier::SignatureVerifier;

/// Domain tag for operation digests
pub const OPERATION_DOMAIN: &[u8] = b"VEIL:PrivilegedOperation:v1\0";

/// A privileged operation awaiting threshold approval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegedOperation {
    pub nonce: u64,
    /// Value moved or put at risk (checked against spend caps)
    pub value: u128,
    pub payload: Vec<u8>,
}

impl PrivilegedOperation {
    /// Digest the signer group signs over
    pub fn digest(&self, signer_id: &SignerId) -> Digest {
        let id = signer_id.as_str().as_bytes();
        let payload_hash = Digest::sha256(&self.payload);
        Digest::sha256_parts(&[
            OPERATION_DOMAIN,
            &(id.len() as u32).to_be_bytes(),
            id,
            &self.nonce.to_be_bytes(),
            &self.value.to_be_bytes(),
            payload_hash.as_bytes(),
        ])
    }
}

/// Proof that an operation was authorized
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationReceipt {
    pub signer_id: SignerId,
    pub nonce: u64,
    pub generation: u64,
    pub digest: Digest,
    pub authorized_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct SpendEntry {
    value: u128,
    at: DateTime<Utc>,
}

/// Spend guard statistics
#[derive(Debug, Clone, Default)]
pub struct SpendGuardStats {
    pub total_admitted: u64,
    pub total_value_admitted: u128,
    pub cap_blocked_count: u64,
    pub rate_blocked_count: u64,
}

/// Per-operation cap plus sliding-window count and value limits, per signer
pub struct SpendGuard {
    config: SpendConfig,
    clock: Arc<dyn Clock>,
    windows: RwLock<HashMap<SignerId, VecDeque<SpendEntry>>>,
    stats: RwLock<SpendGuardStats>,
}

impl SpendGuard {
    pub fn new(config: SpendConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            windows: RwLock::new(HashMap::new()),
            stats: RwLock::new(SpendGuardStats::default()),
        }
    }

    fn window(&self) -> Duration {
        Duration::seconds(self.config.window_secs)
    }

    /// Admit `value` for `signer_id` and record it, or fail without recording
    pub async fn admit(&self, signer_id: &SignerId, value: u128) -> SignerResult<()> {
        let now = self.clock.now();
        let cutoff = now - self.window();

        if let Some(cap) = self.config.per_operation_cap {
            if value > cap {
                self.stats.write().await.cap_blocked_count += 1;
                return Err(SignerError::AuthorizationCapExceeded {
                    requested: value,
                    available: cap,
                });
            }
        }

        let mut windows = self.windows.write().await;
        let entries = windows.entry(signer_id.clone()).or_default();
        while entries.front().map(|e| e.at <= cutoff).unwrap_or(false) {
            entries.pop_front();
        }

        let used = entries.len() as u32;
        if used >= self.config.max_operations_per_window {
            self.stats.write().await.rate_blocked_count += 1;
            return Err(SignerError::RateLimitExceeded {
                used,
                limit: self.config.max_operations_per_window,
            });
        }

        if let Some(cap) = self.config.window_value_cap {
            let spent: u128 = entries.iter().map(|e| e.value).fold(0, u128::saturating_add);
            let available = cap.saturating_sub(spent);
            if value > available {
                self.stats.write().await.cap_blocked_count += 1;
                return Err(SignerError::AuthorizationCapExceeded {
                    requested: value,
                    available,
                });
            }
        }

        entries.push_back(SpendEntry { value, at: now });

        let mut stats = self.stats.write().await;
        stats.total_admitted += 1;
        stats.total_value_admitted = stats.total_value_admitted.saturating_add(value);
        Ok(())
    }

    /// Operations still admissible in the current window
    pub async fn remaining_operations(&self, signer_id: &SignerId) -> u32 {
        let cutoff = self.clock.now() - self.window();
        let windows = self.windows.read().await;
        let used = windows
            .get(signer_id)
            .map(|entries| entries.iter().filter(|e| e.at > cutoff).count() as u32)
            .unwrap_or(0);
        self.config.max_operations_per_window.saturating_sub(used)
    }

    pub async fn stats(&self) -> SpendGuardStats {
        self.stats.read().await.clone()
    }
}

/// Authorizes threshold-signed operations against the key registry
pub struct Authorizer {
    registry: Arc<RwLock<KeyRegistry>>,
    verifier: SignatureVerifier,
    guard: SpendGuard,
    clock: Arc<dyn Clock>,
    /// Next expected nonce per signer; the lock serializes authorization
    nonces: Mutex<HashMap<SignerId, u64>>,
}

impl Authorizer {
    pub fn new(
        registry: Arc<RwLock<KeyRegistry>>,
        verifier: SignatureVerifier,
        spend: SpendConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            verifier,
            guard: SpendGuard::new(spend, clock.clone()),
            clock,
            nonces: Mutex::new(HashMap::new()),
        }
    }

    pub async fn next_nonce(&self, signer_id: &SignerId) -> u64 {
        self.nonces.lock().await.get(signer_id).copied().unwrap_or(0)
    }

    pub fn spend_guard(&self) -> &SpendGuard {
        &self.guard
    }

    /// Verify and admit `operation`; the nonce is consumed only on success
    pub async fn authorize(
        &self,
        signer_id: &SignerId,
        operation: &PrivilegedOperation,
        signature: &[u8],
    ) -> SignerResult<AuthorizationReceipt> {
        let mut nonces = self.nonces.lock().await;
        let expected = nonces.get(signer_id).copied().unwrap_or(0);
        if operation.nonce != expected {
            warn!(
                signer_id = %signer_id,
                operation = operations::AUTHORIZE,
                expected,
                got = operation.nonce,
                "Nonce mismatch"
            );
            return Err(SignerError::InvalidNonce {
                expected,
                got: operation.nonce,
            });
        }

        let (algorithm, public_key, threshold, total_signers, generation) = {
            let registry = self.registry.read().await;
            let signer = registry.get(signer_id)?;
            (
                signer.algorithm(),
                signer.public_key().to_vec(),
                signer.threshold(),
                signer.total_signers(),
                signer.generation(),
            )
        };

        let digest = operation.digest(signer_id);
        let valid = self.verifier.verify(
            algorithm,
            &public_key,
            digest.as_bytes(),
            signature,
            threshold,
            total_signers,
        )?;
        if !valid {
            return Err(SignerError::SignatureRejected(signer_id.clone()));
        }

        self.guard.admit(signer_id, operation.value).await?;
        nonces.insert(signer_id.clone(), expected + 1);

        info!(
            signer_id = %signer_id,
            operation = operations::AUTHORIZE,
            nonce = operation.nonce,
            generation,
            "Operation authorized"
        );
        debug!(digest = %digest.short(), value = %operation.value, "Authorized operation detail");

        Ok(AuthorizationReceipt {
            signer_id: signer_id.clone(),
            nonce: operation.nonce,
            generation,
            digest,
            authorized_at: self.clock.now(),
        })
    }
}
