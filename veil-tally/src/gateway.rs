//! Decryption Gateway
//!
//! The threshold decryption network is reached through
//! [`DecryptionGateway`]: handles go out with a deadline, a request id comes
//! back, and plaintexts later arrive through an authenticated callback.
//! Callbacks are Ed25519-signed with domain separation:
//! the signed message is `domain_tag || request_id || plaintexts`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use veil_core::{Identity, RequestId};

use crate::accumulator::AccumulatorHandle;
use crate::elgamal::{DiscreteLogTable, ElGamalPublicKey, ElGamalSecretKey};
use crate::error::{TallyError, TallyResult};

/// Domain tag for decryption callback signatures
pub const CALLBACK_DOMAIN: &[u8] = b"VEIL:DecryptionCallback:v1\0";

/// Default discrete-log bound of the local gateway
pub const DEFAULT_DECRYPTION_BOUND: u64 = 1 << 32;

/// Signed message for a callback
pub fn callback_message(request_id: RequestId, plaintexts: &[u64]) -> Vec<u8> {
    let mut message = Vec::with_capacity(CALLBACK_DOMAIN.len() + 8 + plaintexts.len() * 8);
    message.extend_from_slice(CALLBACK_DOMAIN);
    message.extend_from_slice(&request_id.to_be_bytes());
    for value in plaintexts {
        message.extend_from_slice(&value.to_be_bytes());
    }
    message
}

/// Gateway signature over a callback
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackProof {
    signature: Signature,
}

impl CallbackProof {
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Self {
            signature: Signature::from_bytes(bytes),
        }
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.signature.to_bytes()
    }
}

/// Threshold decryption service
#[async_trait]
pub trait DecryptionGateway: Send + Sync {
    /// Identity the gateway's callbacks come from
    fn identity(&self) -> &Identity;

    /// Submit handles for decryption, in order
    async fn submit(
        &self,
        handles: &[AccumulatorHandle],
        deadline: DateTime<Utc>,
    ) -> TallyResult<RequestId>;
}

/// Authenticates callbacks: caller identity, plus the signature when a key is pinned
#[derive(Clone, Debug)]
pub struct GatewayAuthenticator {
    identity: Identity,
    key: Option<VerifyingKey>,
}

impl GatewayAuthenticator {
    /// Identity check only
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            key: None,
        }
    }

    /// Identity check plus Ed25519 proof
    pub fn with_key(identity: Identity, key: VerifyingKey) -> Self {
        Self {
            identity,
            key: Some(key),
        }
    }

    pub fn from_key_bytes(identity: Identity, bytes: &[u8; 32]) -> TallyResult<Self> {
        let key = VerifyingKey::from_bytes(bytes)
            .map_err(|e| TallyError::Gateway(format!("Invalid gateway key: {}", e)))?;
        Ok(Self::with_key(identity, key))
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn authenticate(
        &self,
        caller: &Identity,
        request_id: RequestId,
        plaintexts: &[u64],
        proof: Option<&CallbackProof>,
    ) -> TallyResult<()> {
        let unauthorized = || TallyError::Unauthorized {
            caller: caller.clone(),
            role: "decryption gateway",
        };

        if caller != &self.identity {
            return Err(unauthorized());
        }
        if let Some(key) = &self.key {
            let proof = proof.ok_or_else(unauthorized)?;
            key.verify(&callback_message(request_id, plaintexts), &proof.signature)
                .map_err(|_| unauthorized())?;
        }
        Ok(())
    }
}

/// A callback ready to be delivered to the engine
#[derive(Clone, Debug)]
pub struct DecryptionCallback {
    pub caller: Identity,
    pub request_id: RequestId,
    pub plaintexts: Vec<u64>,
    pub proof: Option<CallbackProof>,
}

/// Submission recorded by the local gateway
#[derive(Clone, Debug)]
pub struct Submission {
    pub request_id: RequestId,
    pub handles: Vec<AccumulatorHandle>,
    pub deadline: DateTime<Utc>,
}

/// In-process gateway holding the ElGamal secret key
///
/// Submissions queue until [`LocalDecryptionGateway::fulfill`] decrypts
/// them, which models the asynchronous gap between request and callback.
pub struct LocalDecryptionGateway {
    identity: Identity,
    secret: ElGamalSecretKey,
    signing_key: SigningKey,
    table: DiscreteLogTable,
    next_id: AtomicU64,
    submit_count: AtomicU64,
    offline: AtomicBool,
    submissions: Mutex<HashMap<RequestId, Submission>>,
}

impl LocalDecryptionGateway {
    pub fn new(identity: Identity, secret: ElGamalSecretKey) -> Self {
        Self::with_bound(identity, secret, DEFAULT_DECRYPTION_BOUND)
    }

    /// Largest plaintext this gateway can recover is `bound`
    pub fn with_bound(identity: Identity, secret: ElGamalSecretKey, bound: u64) -> Self {
        Self {
            identity,
            secret,
            signing_key: SigningKey::generate(&mut OsRng),
            table: DiscreteLogTable::new(bound),
            next_id: AtomicU64::new(1),
            submit_count: AtomicU64::new(0),
            offline: AtomicBool::new(false),
            submissions: Mutex::new(HashMap::new()),
        }
    }

    pub fn encryption_key(&self) -> ElGamalPublicKey {
        self.secret.public_key()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Authenticator pinned to this gateway's identity and key
    pub fn authenticator(&self) -> GatewayAuthenticator {
        GatewayAuthenticator::with_key(self.identity.clone(), self.verifying_key())
    }

    /// While offline every submission fails with a transient error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Accepted submissions so far
    pub fn submit_count(&self) -> u64 {
        self.submit_count.load(Ordering::SeqCst)
    }

    pub async fn pending(&self) -> Vec<RequestId> {
        let mut ids: Vec<RequestId> = self.submissions.lock().await.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn submission(&self, request_id: RequestId) -> Option<Submission> {
        self.submissions.lock().await.get(&request_id).cloned()
    }

    /// Sign an arbitrary callback (the gateway's signing primitive)
    pub fn sign_callback(&self, request_id: RequestId, plaintexts: &[u64]) -> CallbackProof {
        CallbackProof {
            signature: self
                .signing_key
                .sign(&callback_message(request_id, plaintexts)),
        }
    }

    /// Decrypt a pending submission and produce its signed callback
    ///
    /// The submission stays pending if decryption fails.
    pub async fn fulfill(&self, request_id: RequestId) -> TallyResult<DecryptionCallback> {
        let mut submissions = self.submissions.lock().await;
        let submission = submissions
            .get(&request_id)
            .ok_or(TallyError::UnknownRequest(request_id))?;

        let plaintexts = submission
            .handles
            .iter()
            .map(|h| self.secret.decrypt(h.ciphertext(), &self.table))
            .collect::<TallyResult<Vec<u64>>>();
        let plaintexts = match plaintexts {
            Ok(plaintexts) => plaintexts,
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Gateway could not decrypt submission");
                return Err(e);
            }
        };
        submissions.remove(&request_id);
        drop(submissions);

        debug!(request_id = %request_id, count = plaintexts.len(), "Gateway decrypted submission");

        Ok(DecryptionCallback {
            caller: self.identity.clone(),
            request_id,
            proof: Some(self.sign_callback(request_id, &plaintexts)),
            plaintexts,
        })
    }
}

#[async_trait]
impl DecryptionGateway for LocalDecryptionGateway {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    async fn submit(
        &self,
        handles: &[AccumulatorHandle],
        deadline: DateTime<Utc>,
    ) -> TallyResult<RequestId> {
        if self.offline.load(Ordering::SeqCst) {
            warn!(count = handles.len(), "Gateway offline, submission refused");
            return Err(TallyError::Gateway("gateway offline".to_string()));
        }

        let request_id = RequestId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.submissions.lock().await.insert(
            request_id,
            Submission {
                request_id,
                handles: handles.to_vec(),
                deadline,
            },
        );
        self.submit_count.fetch_add(1, Ordering::SeqCst);

        info!(request_id = %request_id, count = handles.len(), deadline = %deadline, "Gateway accepted submission");
        Ok(request_id)
    }
}
