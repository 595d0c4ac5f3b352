//! Tally Engine
//!
//! Drives each context through `open -> contribute -> request_close ->
//! finalize`. Every context sits behind its own mutex (single writer per
//! context); the engine-wide map is only write-locked to insert or prune.
//! Finalization happens exclusively through an authenticated decryption
//! callback and is guarded by a compare-and-set on the context state.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use veil_core::logging::operations;
use veil_core::{
    AdminRole, Clock, ContextId, CoreError, Identity, RequestId, TallyConfig, VeilConfig,
};

use crate::accumulator::{AccumulatorHandle, ConfidentialAccumulator};
use crate::context::{
    evaluate, Category, CategoryTotals, ContextSnapshot, ContextState, Outcome, TallyContext,
    MAX_PUBLIC_TOTAL,
};
use crate::coordinator::{DecryptionCoordinator, DecryptionRequest};
use crate::error::{TallyError, TallyResult};
use crate::gateway::{CallbackProof, DecryptionGateway};
use crate::weight::{blend, ConfidentialWeight, Weight, WeightSource};

/// Map the core admin rejection onto the tally taxonomy
fn access_error(e: CoreError) -> TallyError {
    match e {
        CoreError::Unauthorized { caller, role } => TallyError::Unauthorized { caller, role },
        other => TallyError::Core(other),
    }
}

pub struct TallyEngine {
    admin: RwLock<AdminRole>,
    /// Policy snapshotted into contexts opened from now on
    policy: RwLock<TallyConfig>,
    accumulator: Arc<ConfidentialAccumulator>,
    coordinator: DecryptionCoordinator,
    clock: Arc<dyn Clock>,
    contexts: RwLock<HashMap<ContextId, Arc<Mutex<TallyContext>>>>,
    /// Pruned ids; never reopened
    retired: RwLock<HashSet<ContextId>>,
    sources: RwLock<Vec<Arc<dyn WeightSource>>>,
}

impl TallyEngine {
    pub fn new(
        admin: Identity,
        policy: TallyConfig,
        accumulator: Arc<ConfidentialAccumulator>,
        coordinator: DecryptionCoordinator,
        clock: Arc<dyn Clock>,
    ) -> TallyResult<Self> {
        policy.validate()?;
        Ok(Self {
            admin: RwLock::new(AdminRole::new(admin)),
            policy: RwLock::new(policy),
            accumulator,
            coordinator,
            clock,
            contexts: RwLock::new(HashMap::new()),
            retired: RwLock::new(HashSet::new()),
            sources: RwLock::new(Vec::new()),
        })
    }

    /// Engine wired from configuration; callbacks authenticated by gateway identity
    pub fn from_config(
        admin: Identity,
        config: &VeilConfig,
        accumulator: Arc<ConfidentialAccumulator>,
        gateway: Arc<dyn DecryptionGateway>,
        clock: Arc<dyn Clock>,
    ) -> TallyResult<Self> {
        config.validate()?;
        let coordinator = DecryptionCoordinator::new(gateway, config.decryption);
        Self::new(admin, config.tally, accumulator, coordinator, clock)
    }

    // ------------------------------------------------------------------
    // Administration
    // ------------------------------------------------------------------

    pub async fn admin(&self) -> Identity {
        self.admin.read().await.admin().clone()
    }

    async fn ensure_admin(&self, caller: &Identity) -> TallyResult<()> {
        self.admin.read().await.ensure_admin(caller).map_err(access_error)
    }

    pub async fn propose_admin(&self, caller: &Identity, successor: Identity) -> TallyResult<()> {
        self.admin
            .write()
            .await
            .propose(caller, successor)
            .map_err(access_error)
    }

    pub async fn accept_admin(&self, caller: &Identity) -> TallyResult<()> {
        self.admin.write().await.accept(caller).map_err(access_error)
    }

    /// Replace the policy for contexts opened later; open contexts keep theirs
    pub async fn set_policy(&self, caller: &Identity, policy: TallyConfig) -> TallyResult<()> {
        self.ensure_admin(caller).await?;
        policy.validate()?;
        *self.policy.write().await = policy;
        info!(
            quorum = %policy.quorum_threshold,
            basis = %policy.basis_numerator,
            "Tally policy updated"
        );
        Ok(())
    }

    pub async fn register_weight_source(
        &self,
        caller: &Identity,
        source: Arc<dyn WeightSource>,
    ) -> TallyResult<()> {
        self.ensure_admin(caller).await?;
        info!(source = source.name(), private = source.is_private(), "Weight source registered");
        self.sources.write().await.push(source);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    async fn context(&self, context_id: ContextId) -> Option<Arc<Mutex<TallyContext>>> {
        self.contexts.read().await.get(&context_id).cloned()
    }

    pub async fn open(
        &self,
        caller: &Identity,
        context_id: ContextId,
        start_block: u64,
        close_timestamp: DateTime<Utc>,
    ) -> TallyResult<()> {
        self.ensure_admin(caller).await?;

        let now = self.clock.now();
        if close_timestamp <= now {
            return Err(TallyError::InvalidWindow);
        }
        let policy = *self.policy.read().await;

        let mut contexts = self.contexts.write().await;
        if contexts.contains_key(&context_id) || self.retired.read().await.contains(&context_id) {
            return Err(TallyError::AlreadyOpen(context_id));
        }
        contexts.insert(
            context_id,
            Arc::new(Mutex::new(TallyContext::new(
                context_id,
                start_block,
                now,
                close_timestamp,
                policy,
                self.accumulator.zero(),
            ))),
        );

        info!(
            context_id = %context_id,
            operation = operations::OPEN,
            start_block,
            close = %close_timestamp,
            "Context opened"
        );
        Ok(())
    }

    pub async fn contribute(
        &self,
        context_id: ContextId,
        contributor: &Identity,
        category: Category,
        weight: Weight,
    ) -> TallyResult<()> {
        let ctx = self
            .context(context_id)
            .await
            .ok_or(TallyError::NotOpen(context_id))?;
        let mut ctx = ctx.lock().await;

        if !ctx.accepts_contributions(self.clock.now()) {
            return Err(TallyError::NotOpen(context_id));
        }
        if ctx.contributors.contains(contributor) {
            warn!(
                context_id = %context_id,
                contributor = %contributor,
                operation = operations::CONTRIBUTE,
                "Duplicate contribution rejected"
            );
            return Err(TallyError::DuplicateContribution {
                context_id,
                contributor: contributor.clone(),
            });
        }
        if weight.is_zero() {
            return Err(TallyError::ZeroWeight);
        }

        // Compute everything first so a failure leaves the context untouched
        let public_totals = ctx.public_totals.checked_add(category, weight.public)?;
        if public_totals.get(category) > MAX_PUBLIC_TOTAL {
            return Err(TallyError::Overflow("public total"));
        }
        let ciphertext = match weight.confidential {
            None | Some(ConfidentialWeight::Plain(0)) => None,
            Some(ConfidentialWeight::Plain(amount)) => Some(self.accumulator.encrypt_plain(amount)?),
            Some(ConfidentialWeight::Encrypted(ciphertext)) => Some(ciphertext),
        };
        let handle = match &ciphertext {
            Some(value) => Some(
                self.accumulator
                    .add_encrypted(&ctx.confidential_totals[category.index()], value)?,
            ),
            None => None,
        };

        ctx.public_totals = public_totals;
        let confidential = handle.is_some();
        if let Some(handle) = handle {
            ctx.confidential_totals[category.index()] = handle;
        }
        ctx.contributors.insert(contributor.clone());

        debug!(
            context_id = %context_id,
            contributor = %contributor,
            operation = operations::CONTRIBUTE,
            category = %category,
            public = %weight.public,
            confidential,
            "Contribution accepted"
        );
        Ok(())
    }

    /// Query every registered source at the context's start block and
    /// contribute the blended weight
    pub async fn contribute_from_sources(
        &self,
        context_id: ContextId,
        contributor: &Identity,
        category: Category,
        aux: &[u8],
    ) -> TallyResult<()> {
        let ctx = self
            .context(context_id)
            .await
            .ok_or(TallyError::NotOpen(context_id))?;
        let start_block = ctx.lock().await.start_block;

        let sources = self.sources.read().await.clone();
        let mut quotes = Vec::with_capacity(sources.len());
        for source in &sources {
            let quote = source
                .weight_of(contributor, start_block, aux)
                .await
                .map_err(|e| TallyError::WeightSource(format!("{}: {}", source.name(), e)))?;
            quotes.push((source.is_private(), quote));
        }

        let weight = blend(&quotes)?;
        self.contribute(context_id, contributor, category, weight)
            .await
    }

    /// Close the context and request decryption of its confidential totals
    pub async fn request_close(&self, context_id: ContextId) -> TallyResult<RequestId> {
        let ctx = self
            .context(context_id)
            .await
            .ok_or(TallyError::NotOpen(context_id))?;

        let (handles, deadline, now) = {
            let mut ctx = ctx.lock().await;
            if ctx.state != ContextState::Open {
                return Err(TallyError::AlreadyRequested(context_id));
            }
            let now = self.clock.now();
            if now <= ctx.close_timestamp {
                return Err(TallyError::TooEarly(context_id));
            }
            ctx.state = ContextState::AwaitingDecryption;
            ctx.closed_at = Some(now);

            info!(
                context_id = %context_id,
                operation = operations::REQUEST_CLOSE,
                count = ctx.contributors.len(),
                "Context closed"
            );
            (
                ctx.confidential_totals.to_vec(),
                self.coordinator.deadline_for(ctx.close_timestamp),
                now,
            )
        };

        self.coordinator
            .request_decryption(context_id, &handles, deadline, now)
            .await
    }

    async fn pending_decryption(
        &self,
        context_id: ContextId,
    ) -> TallyResult<(Vec<AccumulatorHandle>, DateTime<Utc>)> {
        let ctx = self
            .context(context_id)
            .await
            .ok_or(TallyError::UnknownContext(context_id))?;
        let ctx = ctx.lock().await;
        if ctx.state != ContextState::AwaitingDecryption {
            return Err(TallyError::ContextNotClosed(context_id));
        }
        Ok((
            ctx.confidential_totals.to_vec(),
            self.coordinator.deadline_for(ctx.close_timestamp),
        ))
    }

    /// Re-issue decryption for a closed context with no outstanding request
    /// (e.g. after a transient gateway failure)
    pub async fn request_decryption(&self, context_id: ContextId) -> TallyResult<RequestId> {
        let (handles, deadline) = self.pending_decryption(context_id).await?;
        self.coordinator
            .request_decryption(context_id, &handles, deadline, self.clock.now())
            .await
    }

    /// Admin: replace a request whose deadline passed without a callback
    pub async fn retry_decryption(
        &self,
        caller: &Identity,
        context_id: ContextId,
    ) -> TallyResult<RequestId> {
        self.ensure_admin(caller).await?;
        let (handles, _) = self.pending_decryption(context_id).await?;
        let now = self.clock.now();
        // The fresh request gets a full deadline window from now
        let deadline = now + chrono::Duration::seconds(self.coordinator.config().deadline_secs);

        info!(
            context_id = %context_id,
            operation = operations::RETRY_DECRYPTION,
            "Retrying decryption"
        );
        self.coordinator
            .retry_decryption(context_id, &handles, deadline, now)
            .await
    }

    /// Inbound gateway callback
    ///
    /// The outcome is computed before the request is consumed, so a callback
    /// that fails here leaves the request outstanding.
    pub async fn on_decryption_callback(
        &self,
        caller: &Identity,
        request_id: RequestId,
        plaintexts: Vec<u64>,
        proof: Option<CallbackProof>,
    ) -> TallyResult<Outcome> {
        let request = self
            .coordinator
            .check_callback(caller, request_id, &plaintexts, proof.as_ref())
            .await?;

        let ctx = self
            .context(request.context_id)
            .await
            .ok_or(TallyError::UnknownContext(request.context_id))?;
        let mut ctx = ctx.lock().await;
        self.finalize(&mut ctx, request_id, &plaintexts).await
    }

    async fn finalize(
        &self,
        ctx: &mut TallyContext,
        request_id: RequestId,
        plaintexts: &[u64],
    ) -> TallyResult<Outcome> {
        let decrypted = CategoryTotals::from_plaintexts(plaintexts)?;
        let totals = ctx.public_totals.combine(&decrypted)?;
        let outcome = if evaluate(&totals, &ctx.policy) {
            Outcome::Passed
        } else {
            Outcome::Failed
        };

        // Losers of a concurrent race stop here with UnknownRequest
        self.coordinator.consume(request_id).await?;

        if ctx.state != ContextState::AwaitingDecryption {
            error!(
                context_id = %ctx.context_id,
                request_id = %request_id,
                operation = operations::FINALIZE,
                state = ?ctx.state,
                "Finalize attempted outside AwaitingDecryption"
            );
            return Err(TallyError::ContextNotClosed(ctx.context_id));
        }

        ctx.decrypted_totals = Some(decrypted);
        ctx.outcome = outcome;
        ctx.state = ContextState::Finalized;
        ctx.finalized_at = Some(self.clock.now());

        info!(
            context_id = %ctx.context_id,
            request_id = %request_id,
            operation = operations::FINALIZE,
            yes = %totals.yes,
            no = %totals.no,
            abstain = %totals.abstain,
            outcome = ?outcome,
            "Context finalized"
        );
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// False unless finalized and passed
    pub async fn is_passed(&self, context_id: ContextId) -> bool {
        match self.context(context_id).await {
            Some(ctx) => {
                let ctx = ctx.lock().await;
                ctx.state == ContextState::Finalized && ctx.outcome == Outcome::Passed
            }
            None => false,
        }
    }

    /// Public totals before finalization, public + decrypted after
    pub async fn total_votes(&self, context_id: ContextId) -> TallyResult<CategoryTotals> {
        let ctx = self
            .context(context_id)
            .await
            .ok_or(TallyError::UnknownContext(context_id))?;
        let ctx = ctx.lock().await;
        ctx.total_votes()
    }

    pub async fn context_state(&self, context_id: ContextId) -> ContextState {
        let Some(ctx) = self.context(context_id).await else {
            return ContextState::Uninitialized;
        };
        let state = ctx.lock().await.state;
        state
    }

    pub async fn context_snapshot(&self, context_id: ContextId) -> TallyResult<ContextSnapshot> {
        let ctx = self
            .context(context_id)
            .await
            .ok_or(TallyError::UnknownContext(context_id))?;
        let snapshot = ctx.lock().await.snapshot();
        Ok(snapshot)
    }

    pub async fn outstanding_request(&self, context_id: ContextId) -> Option<DecryptionRequest> {
        self.coordinator.outstanding(context_id).await
    }

    pub async fn decryption_attempts(&self, context_id: ContextId) -> u32 {
        self.coordinator.attempts(context_id).await
    }

    pub async fn context_ids(&self) -> Vec<ContextId> {
        let mut ids: Vec<ContextId> = self.contexts.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Admin: drop contexts finalized before `before`; their ids stay retired
    pub async fn prune_finalized(
        &self,
        caller: &Identity,
        before: DateTime<Utc>,
    ) -> TallyResult<usize> {
        self.ensure_admin(caller).await?;

        let mut contexts = self.contexts.write().await;
        let mut pruned = Vec::new();
        for (id, ctx) in contexts.iter() {
            let ctx = ctx.lock().await;
            let old_enough = ctx.finalized_at.map(|t| t < before).unwrap_or(false);
            if ctx.state == ContextState::Finalized && old_enough {
                pruned.push(*id);
            }
        }

        let mut retired = self.retired.write().await;
        for id in &pruned {
            contexts.remove(id);
            self.coordinator.forget(*id).await;
            retired.insert(*id);
        }

        info!(count = pruned.len(), "Pruned finalized contexts");
        Ok(pruned.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elgamal::{ElGamalBackend, ElGamalSecretKey};
    use crate::gateway::LocalDecryptionGateway;
    use crate::weight::StaticWeightSource;
    use chrono::Duration;
    use veil_core::{DecryptionConfig, ManualClock};

    struct Fixture {
        engine: TallyEngine,
        gateway: Arc<LocalDecryptionGateway>,
        clock: Arc<ManualClock>,
        admin: Identity,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let gateway = Arc::new(LocalDecryptionGateway::with_bound(
            Identity::from("gateway"),
            ElGamalSecretKey::generate(),
            1 << 16,
        ));
        let accumulator = Arc::new(
            ConfidentialAccumulator::new(Arc::new(ElGamalBackend::new(gateway.encryption_key())))
                .unwrap(),
        );
        let coordinator = DecryptionCoordinator::with_authenticator(
            gateway.clone(),
            gateway.authenticator(),
            DecryptionConfig::default(),
        );
        let admin = Identity::from("admin");
        let engine = TallyEngine::new(
            admin.clone(),
            TallyConfig {
                quorum_threshold: 10,
                basis_numerator: 500_000,
            },
            accumulator,
            coordinator,
            clock.clone(),
        )
        .unwrap();
        Fixture {
            engine,
            gateway,
            clock,
            admin,
        }
    }

    async fn open(f: &Fixture, id: u64) -> ContextId {
        let ctx = ContextId(id);
        f.engine
            .open(&f.admin, ctx, 100, f.clock.now() + Duration::hours(1))
            .await
            .unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_open_requires_admin_and_future_close() {
        let f = fixture();
        let mallory = Identity::from("mallory");
        let close = f.clock.now() + Duration::hours(1);

        assert!(matches!(
            f.engine.open(&mallory, ContextId(1), 0, close).await,
            Err(TallyError::Unauthorized { .. })
        ));
        assert!(matches!(
            f.engine.open(&f.admin, ContextId(1), 0, f.clock.now()).await,
            Err(TallyError::InvalidWindow)
        ));

        f.engine.open(&f.admin, ContextId(1), 0, close).await.unwrap();
        assert!(matches!(
            f.engine.open(&f.admin, ContextId(1), 0, close).await,
            Err(TallyError::AlreadyOpen(_))
        ));
        assert_eq!(f.engine.context_state(ContextId(1)).await, ContextState::Open);
        assert_eq!(
            f.engine.context_state(ContextId(2)).await,
            ContextState::Uninitialized
        );
    }

    #[tokio::test]
    async fn test_contribution_window() {
        let f = fixture();
        let ctx = open(&f, 1).await;
        let alice = Identity::from("alice");

        assert!(matches!(
            f.engine
                .contribute(ContextId(9), &alice, Category::Yes, Weight::public(1))
                .await,
            Err(TallyError::NotOpen(_))
        ));

        f.clock.advance(Duration::hours(2));
        assert!(matches!(
            f.engine
                .contribute(ctx, &alice, Category::Yes, Weight::public(1))
                .await,
            Err(TallyError::NotOpen(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_weight_rejected() {
        let f = fixture();
        let ctx = open(&f, 1).await;
        let alice = Identity::from("alice");

        assert!(matches!(
            f.engine
                .contribute(ctx, &alice, Category::Yes, Weight::default())
                .await,
            Err(TallyError::ZeroWeight)
        ));
        // Rejection does not count as a contribution
        f.engine
            .contribute(ctx, &alice, Category::Yes, Weight::public(3))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_timing() {
        let f = fixture();
        let ctx = open(&f, 1).await;

        assert!(matches!(
            f.engine.request_close(ctx).await,
            Err(TallyError::TooEarly(_))
        ));
        // Exactly at close is still too early
        f.clock.advance(Duration::hours(1));
        assert!(matches!(
            f.engine.request_close(ctx).await,
            Err(TallyError::TooEarly(_))
        ));

        f.clock.advance(Duration::seconds(1));
        f.engine.request_close(ctx).await.unwrap();
        assert!(matches!(
            f.engine.request_close(ctx).await,
            Err(TallyError::AlreadyRequested(_))
        ));
        assert_eq!(
            f.engine.context_state(ctx).await,
            ContextState::AwaitingDecryption
        );
    }

    #[tokio::test]
    async fn test_request_decryption_requires_closed_context() {
        let f = fixture();
        let ctx = open(&f, 1).await;
        assert!(matches!(
            f.engine.request_decryption(ctx).await,
            Err(TallyError::ContextNotClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_policy_snapshot_at_open() {
        let f = fixture();
        let ctx = open(&f, 1).await;
        f.engine
            .set_policy(
                &f.admin,
                TallyConfig {
                    quorum_threshold: 1_000,
                    basis_numerator: 900_000,
                },
            )
            .await
            .unwrap();

        let snapshot = f.engine.context_snapshot(ctx).await.unwrap();
        assert_eq!(snapshot.policy.quorum_threshold, 10);

        let later = open(&f, 2).await;
        let snapshot = f.engine.context_snapshot(later).await.unwrap();
        assert_eq!(snapshot.policy.quorum_threshold, 1_000);
    }

    #[tokio::test]
    async fn test_contribute_from_sources_blends() {
        let f = fixture();
        let token = Arc::new(StaticWeightSource::new("token", false));
        let shielded = Arc::new(StaticWeightSource::new("shielded", true));
        let alice = Identity::from("alice");
        token.set_balance(alice.clone(), 90, 7).await;
        shielded.set_balance(alice.clone(), 100, 5).await;
        // After the snapshot block: ignored
        token.set_balance(alice.clone(), 101, 1_000).await;

        f.engine
            .register_weight_source(&f.admin, token)
            .await
            .unwrap();
        f.engine
            .register_weight_source(&f.admin, shielded)
            .await
            .unwrap();

        let ctx = open(&f, 1).await;
        f.engine
            .contribute_from_sources(ctx, &alice, Category::Yes, &[])
            .await
            .unwrap();

        assert_eq!(f.engine.total_votes(ctx).await.unwrap().yes, 7);

        f.clock.advance(Duration::hours(2));
        let id = f.engine.request_close(ctx).await.unwrap();
        let cb = f.gateway.fulfill(id).await.unwrap();
        f.engine
            .on_decryption_callback(&cb.caller, cb.request_id, cb.plaintexts, cb.proof)
            .await
            .unwrap();

        assert_eq!(f.engine.total_votes(ctx).await.unwrap().yes, 12);
        assert!(f.engine.is_passed(ctx).await);
    }

    #[tokio::test]
    async fn test_prune_finalized_retires_ids() {
        let f = fixture();
        let ctx = open(&f, 1).await;
        f.engine
            .contribute(ctx, &Identity::from("alice"), Category::No, Weight::public(1))
            .await
            .unwrap();
        f.clock.advance(Duration::hours(2));
        let id = f.engine.request_close(ctx).await.unwrap();
        let cb = f.gateway.fulfill(id).await.unwrap();
        f.engine
            .on_decryption_callback(&cb.caller, cb.request_id, cb.plaintexts, cb.proof)
            .await
            .unwrap();

        let open_ctx = open(&f, 2).await;

        f.clock.advance(Duration::seconds(1));
        let pruned = f.engine.prune_finalized(&f.admin, f.clock.now()).await.unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(f.engine.context_ids().await, vec![open_ctx]);

        let close = f.clock.now() + Duration::hours(1);
        assert!(matches!(
            f.engine.open(&f.admin, ctx, 0, close).await,
            Err(TallyError::AlreadyOpen(_))
        ));
    }

    #[tokio::test]
    async fn test_admin_handover() {
        let f = fixture();
        let next = Identity::from("council");
        f.engine.propose_admin(&f.admin, next.clone()).await.unwrap();
        f.engine.accept_admin(&next).await.unwrap();
        assert_eq!(f.engine.admin().await, next);

        let close = f.clock.now() + Duration::hours(1);
        assert!(f.engine.open(&f.admin, ContextId(1), 0, close).await.is_err());
        f.engine.open(&next, ContextId(1), 0, close).await.unwrap();
    }
}
