//! Decryption Coordinator
//!
//! Owns the `request_id -> context_id` map. At most one request is
//! outstanding per context: the context slot is reserved before the
//! gateway is awaited, so concurrent requests for one context never both
//! reach the gateway. A callback consumes its request with an atomic
//! remove; a replayed or stale request id finds nothing.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use veil_core::logging::operations;
use veil_core::{ContextId, DecryptionConfig, Digest, Identity, RequestId};

use crate::accumulator::AccumulatorHandle;
use crate::error::{TallyError, TallyResult};
use crate::gateway::{CallbackProof, DecryptionGateway, GatewayAuthenticator};

/// An issued decryption request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptionRequest {
    pub request_id: RequestId,
    pub context_id: ContextId,
    /// Digests of the submitted handles, in submission order
    pub handles: Vec<Digest>,
    pub deadline: DateTime<Utc>,
    /// 1 for the first request of a context
    pub attempt: u32,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    /// Gateway submission in flight
    Submitting,
    Outstanding(RequestId),
}

#[derive(Default)]
struct CoordinatorState {
    requests: HashMap<RequestId, DecryptionRequest>,
    slots: HashMap<ContextId, Slot>,
    attempts: HashMap<ContextId, u32>,
}

pub struct DecryptionCoordinator {
    gateway: Arc<dyn DecryptionGateway>,
    authenticator: GatewayAuthenticator,
    config: DecryptionConfig,
    state: Mutex<CoordinatorState>,
}

impl DecryptionCoordinator {
    /// Callbacks are authenticated by the gateway's identity only
    pub fn new(gateway: Arc<dyn DecryptionGateway>, config: DecryptionConfig) -> Self {
        let authenticator = GatewayAuthenticator::new(gateway.identity().clone());
        Self::with_authenticator(gateway, authenticator, config)
    }

    pub fn with_authenticator(
        gateway: Arc<dyn DecryptionGateway>,
        authenticator: GatewayAuthenticator,
        config: DecryptionConfig,
    ) -> Self {
        Self {
            gateway,
            authenticator,
            config,
            state: Mutex::new(CoordinatorState::default()),
        }
    }

    pub fn config(&self) -> &DecryptionConfig {
        &self.config
    }

    /// Deadline for a context closing at `close_timestamp`
    pub fn deadline_for(&self, close_timestamp: DateTime<Utc>) -> DateTime<Utc> {
        close_timestamp + Duration::seconds(self.config.deadline_secs)
    }

    /// Submit `handles` for `context_id`
    ///
    /// The caller has already checked that the context awaits decryption.
    pub async fn request_decryption(
        &self,
        context_id: ContextId,
        handles: &[AccumulatorHandle],
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> TallyResult<RequestId> {
        let attempt = {
            let mut state = self.state.lock().await;
            if state.slots.contains_key(&context_id) {
                return Err(TallyError::AlreadyRequested(context_id));
            }
            let attempts = state.attempts.get(&context_id).copied().unwrap_or(0);
            if attempts >= self.config.max_attempts {
                return Err(TallyError::DecryptionExhausted {
                    context_id,
                    attempts,
                });
            }
            state.slots.insert(context_id, Slot::Submitting);
            attempts + 1
        };

        let submitted = self.gateway.submit(handles, deadline).await;

        let mut state = self.state.lock().await;
        let request_id = match submitted {
            Ok(id) => id,
            Err(e) => {
                state.slots.remove(&context_id);
                warn!(
                    context_id = %context_id,
                    operation = operations::REQUEST_DECRYPTION,
                    error = %e,
                    "Gateway submission failed"
                );
                return Err(e);
            }
        };

        state.requests.insert(
            request_id,
            DecryptionRequest {
                request_id,
                context_id,
                handles: handles.iter().map(|h| h.digest()).collect(),
                deadline,
                attempt,
                requested_at: now,
            },
        );
        state.slots.insert(context_id, Slot::Outstanding(request_id));
        state.attempts.insert(context_id, attempt);

        info!(
            context_id = %context_id,
            request_id = %request_id,
            operation = operations::REQUEST_DECRYPTION,
            count = handles.len(),
            attempt,
            "Decryption requested"
        );
        Ok(request_id)
    }

    /// Drop a request whose deadline has passed and issue a fresh one
    ///
    /// With no outstanding request (e.g. the last submission failed) this is
    /// a plain request.
    pub async fn retry_decryption(
        &self,
        context_id: ContextId,
        handles: &[AccumulatorHandle],
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> TallyResult<RequestId> {
        {
            let mut state = self.state.lock().await;
            // Keep the stale request when no fresh one could replace it
            let attempts = state.attempts.get(&context_id).copied().unwrap_or(0);
            if attempts >= self.config.max_attempts {
                return Err(TallyError::DecryptionExhausted {
                    context_id,
                    attempts,
                });
            }
            match state.slots.get(&context_id).copied() {
                Some(Slot::Submitting) => return Err(TallyError::AlreadyRequested(context_id)),
                Some(Slot::Outstanding(stale)) => {
                    let expired = state
                        .requests
                        .get(&stale)
                        .map(|r| now > r.deadline)
                        .unwrap_or(true);
                    if !expired {
                        return Err(TallyError::DeadlineNotReached(context_id));
                    }
                    state.requests.remove(&stale);
                    state.slots.remove(&context_id);
                    warn!(
                        context_id = %context_id,
                        request_id = %stale,
                        operation = operations::RETRY_DECRYPTION,
                        "Dropped expired decryption request"
                    );
                }
                None => {}
            }
        }

        self.request_decryption(context_id, handles, deadline, now)
            .await
    }

    /// Authenticate a callback against its outstanding request
    ///
    /// Nothing is consumed; returns a copy of the matching request.
    pub async fn check_callback(
        &self,
        caller: &Identity,
        request_id: RequestId,
        plaintexts: &[u64],
        proof: Option<&CallbackProof>,
    ) -> TallyResult<DecryptionRequest> {
        if let Err(e) = self
            .authenticator
            .authenticate(caller, request_id, plaintexts, proof)
        {
            warn!(
                caller = %caller,
                request_id = %request_id,
                operation = operations::DECRYPTION_CALLBACK,
                "Unauthenticated decryption callback"
            );
            return Err(e);
        }

        let state = self.state.lock().await;
        let request = match state.requests.get(&request_id) {
            Some(request) => request.clone(),
            None => {
                warn!(
                    request_id = %request_id,
                    operation = operations::DECRYPTION_CALLBACK,
                    "Callback for unknown or consumed request"
                );
                return Err(TallyError::UnknownRequest(request_id));
            }
        };
        if plaintexts.len() != request.handles.len() {
            return Err(TallyError::PlaintextCountMismatch {
                expected: request.handles.len(),
                actual: plaintexts.len(),
            });
        }
        Ok(request)
    }

    /// Atomically remove a request; only the first caller gets it
    pub async fn consume(&self, request_id: RequestId) -> TallyResult<DecryptionRequest> {
        let mut state = self.state.lock().await;
        let request = state
            .requests
            .remove(&request_id)
            .ok_or(TallyError::UnknownRequest(request_id))?;
        state.slots.remove(&request.context_id);
        Ok(request)
    }

    /// Authenticate and consume a callback
    ///
    /// On success the request is gone; on any error nothing changes.
    pub async fn consume_callback(
        &self,
        caller: &Identity,
        request_id: RequestId,
        plaintexts: &[u64],
        proof: Option<&CallbackProof>,
    ) -> TallyResult<DecryptionRequest> {
        self.check_callback(caller, request_id, plaintexts, proof)
            .await?;
        self.consume(request_id).await
    }

    /// Outstanding request of a context
    pub async fn outstanding(&self, context_id: ContextId) -> Option<DecryptionRequest> {
        let state = self.state.lock().await;
        match state.slots.get(&context_id) {
            Some(Slot::Outstanding(id)) => state.requests.get(id).cloned(),
            _ => None,
        }
    }

    /// Requests issued so far for a context
    pub async fn attempts(&self, context_id: ContextId) -> u32 {
        self.state
            .lock()
            .await
            .attempts
            .get(&context_id)
            .copied()
            .unwrap_or(0)
    }

    /// Drop bookkeeping of a pruned context
    pub async fn forget(&self, context_id: ContextId) {
        let mut state = self.state.lock().await;
        if let Some(Slot::Outstanding(id)) = state.slots.remove(&context_id) {
            state.requests.remove(&id);
        }
        state.attempts.remove(&context_id);
    }
}
