//! Integration tests for the tally engine
//!
//! End-to-end flows: open, contribute, close, asynchronous decryption and
//! finalization, driven with a manual clock and the in-process gateway.

use chrono::Duration;
use std::sync::Arc;

use veil_core::{
    Clock, ContextId, DecryptionConfig, Identity, ManualClock, TallyConfig, VeilConfig,
};
use veil_tally::{
    Category, ConfidentialAccumulator, ContextState, DecryptionCoordinator, ElGamalBackend,
    ElGamalSecretKey, LocalDecryptionGateway, Outcome, StaticWeightSource, TallyEngine,
    TallyError, Weight, MAX_PUBLIC_TOTAL,
};

struct Harness {
    engine: Arc<TallyEngine>,
    gateway: Arc<LocalDecryptionGateway>,
    clock: Arc<ManualClock>,
    admin: Identity,
}

fn harness_with(policy: TallyConfig, decryption: DecryptionConfig) -> Harness {
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
    let coordinator =
        DecryptionCoordinator::with_authenticator(gateway.clone(), gateway.authenticator(), decryption);
    let admin = Identity::from("admin");
    let engine = TallyEngine::new(admin.clone(), policy, accumulator, coordinator, clock.clone())
        .unwrap();
    Harness {
        engine: Arc::new(engine),
        gateway,
        clock,
        admin,
    }
}

fn harness() -> Harness {
    harness_with(
        TallyConfig {
            quorum_threshold: 100,
            basis_numerator: 500_000,
        },
        DecryptionConfig::default(),
    )
}

impl Harness {
    async fn open(&self, id: u64) -> ContextId {
        let ctx = ContextId(id);
        self.engine
            .open(&self.admin, ctx, 1_000, self.clock.now() + Duration::hours(1))
            .await
            .unwrap();
        ctx
    }

    async fn contribute(&self, ctx: ContextId, who: &str, category: Category, weight: Weight) {
        self.engine
            .contribute(ctx, &Identity::from(who), category, weight)
            .await
            .unwrap();
    }

    async fn close(&self, ctx: ContextId) -> veil_core::RequestId {
        self.clock.advance(Duration::hours(1) + Duration::seconds(1));
        self.engine.request_close(ctx).await.unwrap()
    }
}

// ============ Outcome Scenarios ============

#[tokio::test]
async fn test_quorum_not_met_fails() {
    let h = harness();
    let ctx = h.open(1).await;

    h.contribute(ctx, "alice", Category::Yes, Weight::public(60)).await;
    h.contribute(ctx, "bob", Category::No, Weight::public(30)).await;
    let sealed = h.gateway.encryption_key().encrypt(20);
    h.contribute(ctx, "carol", Category::Yes, Weight::encrypted(sealed)).await;

    let request_id = h.close(ctx).await;
    let callback = h.gateway.fulfill(request_id).await.unwrap();
    assert_eq!(callback.plaintexts, vec![20, 0, 0]);

    let outcome = h
        .engine
        .on_decryption_callback(
            &callback.caller,
            callback.request_id,
            callback.plaintexts,
            callback.proof,
        )
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Failed);
    assert!(!h.engine.is_passed(ctx).await);
    let totals = h.engine.total_votes(ctx).await.unwrap();
    assert_eq!((totals.yes, totals.no, totals.abstain), (80, 30, 0));
    assert_eq!(h.engine.context_state(ctx).await, ContextState::Finalized);
}

#[tokio::test]
async fn test_quorum_and_ratio_met_passes() {
    let h = harness();
    let ctx = h.open(1).await;

    h.contribute(ctx, "alice", Category::Yes, Weight::public(90)).await;
    h.contribute(ctx, "bob", Category::No, Weight::public(5)).await;
    h.contribute(ctx, "carol", Category::Yes, Weight::confidential(10)).await;

    let request_id = h.close(ctx).await;
    let callback = h.gateway.fulfill(request_id).await.unwrap();
    let outcome = h
        .engine
        .on_decryption_callback(
            &callback.caller,
            callback.request_id,
            callback.plaintexts,
            callback.proof,
        )
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Passed);
    assert!(h.engine.is_passed(ctx).await);
    let totals = h.engine.total_votes(ctx).await.unwrap();
    assert_eq!((totals.yes, totals.no, totals.abstain), (100, 5, 0));
}

#[tokio::test]
async fn test_split_weight_lands_in_both_totals() {
    let h = harness();
    let ctx = h.open(1).await;

    h.contribute(
        ctx,
        "alice",
        Category::Abstain,
        Weight::split(40, veil_tally::ConfidentialWeight::Plain(70)),
    )
    .await;
    h.contribute(ctx, "bob", Category::Yes, Weight::public(1)).await;

    let request_id = h.close(ctx).await;
    let callback = h.gateway.fulfill(request_id).await.unwrap();
    assert_eq!(callback.plaintexts, vec![0, 0, 70]);
    h.engine
        .on_decryption_callback(
            &callback.caller,
            callback.request_id,
            callback.plaintexts,
            callback.proof,
        )
        .await
        .unwrap();

    // Quorum met through abstentions, ratio 1:0
    assert!(h.engine.is_passed(ctx).await);
    assert_eq!(h.engine.total_votes(ctx).await.unwrap().abstain, 110);
}

#[tokio::test]
async fn test_huge_public_weight_finalizes() {
    let h = harness();
    let ctx = h.open(1).await;
    let whale = u128::MAX / 1_000_000 + 1;

    h.contribute(ctx, "alice", Category::Yes, Weight::public(whale)).await;
    h.contribute(ctx, "bob", Category::Yes, Weight::confidential(10)).await;

    let request_id = h.close(ctx).await;
    let callback = h.gateway.fulfill(request_id).await.unwrap();
    let outcome = h
        .engine
        .on_decryption_callback(
            &callback.caller,
            callback.request_id,
            callback.plaintexts,
            callback.proof,
        )
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Passed);
    assert!(h.engine.is_passed(ctx).await);
    assert_eq!(h.engine.context_state(ctx).await, ContextState::Finalized);
    assert!(h.engine.outstanding_request(ctx).await.is_none());
    assert_eq!(h.engine.total_votes(ctx).await.unwrap().yes, whale + 10);
}

#[tokio::test]
async fn test_public_total_ceiling() {
    let h = harness();
    let ctx = h.open(1).await;

    h.contribute(ctx, "alice", Category::Yes, Weight::public(MAX_PUBLIC_TOTAL)).await;
    assert!(matches!(
        h.engine
            .contribute(ctx, &Identity::from("bob"), Category::Yes, Weight::public(1))
            .await,
        Err(TallyError::Overflow(_))
    ));
    assert!(matches!(
        h.engine
            .contribute(ctx, &Identity::from("dave"), Category::No, Weight::public(u128::MAX))
            .await,
        Err(TallyError::Overflow(_))
    ));
    // Rejected contributors were not recorded
    h.contribute(ctx, "bob", Category::No, Weight::public(1)).await;
    h.contribute(ctx, "carol", Category::Yes, Weight::confidential(60_000)).await;

    let request_id = h.close(ctx).await;
    let callback = h.gateway.fulfill(request_id).await.unwrap();
    h.engine
        .on_decryption_callback(
            &callback.caller,
            callback.request_id,
            callback.plaintexts,
            callback.proof,
        )
        .await
        .unwrap();

    let totals = h.engine.total_votes(ctx).await.unwrap();
    assert_eq!(totals.yes, MAX_PUBLIC_TOTAL + 60_000);
    assert_eq!(totals.no, 1);
    assert!(h.engine.is_passed(ctx).await);
}

// ============ Confidentiality ============

#[tokio::test]
async fn test_no_reveal_before_finalize() {
    let h = harness();
    let ctx = h.open(1).await;

    h.contribute(ctx, "alice", Category::Yes, Weight::public(5)).await;
    h.contribute(ctx, "whale", Category::Yes, Weight::confidential(60_000)).await;

    assert!(!h.engine.is_passed(ctx).await);
    assert_eq!(h.engine.total_votes(ctx).await.unwrap().yes, 5);

    let request_id = h.close(ctx).await;
    assert!(!h.engine.is_passed(ctx).await);
    assert_eq!(h.engine.total_votes(ctx).await.unwrap().yes, 5);

    let snapshot = h.engine.context_snapshot(ctx).await.unwrap();
    assert_eq!(snapshot.decrypted_totals, None);
    assert_eq!(snapshot.confidential_handles.len(), 3);

    let callback = h.gateway.fulfill(request_id).await.unwrap();
    h.engine
        .on_decryption_callback(
            &callback.caller,
            callback.request_id,
            callback.plaintexts,
            callback.proof,
        )
        .await
        .unwrap();
    assert_eq!(h.engine.total_votes(ctx).await.unwrap().yes, 60_005);
}

#[tokio::test]
async fn test_duplicate_contribution_rejected() {
    let h = harness();
    let ctx = h.open(1).await;

    h.contribute(ctx, "alice", Category::Yes, Weight::public(10)).await;
    let second = h
        .engine
        .contribute(ctx, &Identity::from("alice"), Category::No, Weight::public(99))
        .await;
    assert!(matches!(
        second,
        Err(TallyError::DuplicateContribution { .. })
    ));

    let totals = h.engine.total_votes(ctx).await.unwrap();
    assert_eq!((totals.yes, totals.no), (10, 0));
    assert_eq!(
        h.engine.context_snapshot(ctx).await.unwrap().contribution_count,
        1
    );
}

// ============ Callback Handling ============

#[tokio::test]
async fn test_replayed_callback_finalizes_once() {
    let h = harness();
    let ctx = h.open(1).await;
    h.contribute(ctx, "alice", Category::Yes, Weight::public(200)).await;

    let request_id = h.close(ctx).await;
    let callback = h.gateway.fulfill(request_id).await.unwrap();

    let first = h
        .engine
        .on_decryption_callback(
            &callback.caller,
            callback.request_id,
            callback.plaintexts.clone(),
            callback.proof.clone(),
        )
        .await;
    assert_eq!(first.unwrap(), Outcome::Passed);
    let finalized_at = h.engine.context_snapshot(ctx).await.unwrap().finalized_at;

    h.clock.advance(Duration::minutes(5));
    let replay = h
        .engine
        .on_decryption_callback(
            &callback.caller,
            callback.request_id,
            callback.plaintexts,
            callback.proof,
        )
        .await;
    assert!(matches!(replay, Err(TallyError::UnknownRequest(_))));
    assert_eq!(
        h.engine.context_snapshot(ctx).await.unwrap().finalized_at,
        finalized_at
    );
}

#[tokio::test]
async fn test_concurrent_callbacks_finalize_once() {
    let h = harness();
    let ctx = h.open(1).await;
    h.contribute(ctx, "alice", Category::Yes, Weight::confidential(150)).await;

    let request_id = h.close(ctx).await;
    let callback = h.gateway.fulfill(request_id).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let engine = h.engine.clone();
        let callback = callback.clone();
        tasks.push(tokio::spawn(async move {
            engine
                .on_decryption_callback(
                    &callback.caller,
                    callback.request_id,
                    callback.plaintexts,
                    callback.proof,
                )
                .await
        }));
    }

    let mut finalized = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(outcome) => {
                assert_eq!(outcome, Outcome::Passed);
                finalized += 1;
            }
            Err(e) => assert!(matches!(e, TallyError::UnknownRequest(_))),
        }
    }
    assert_eq!(finalized, 1);
    assert_eq!(h.engine.total_votes(ctx).await.unwrap().yes, 150);
}

#[tokio::test]
async fn test_forged_callbacks_rejected() {
    let h = harness();
    let ctx = h.open(1).await;
    h.contribute(ctx, "alice", Category::No, Weight::confidential(3)).await;

    let request_id = h.close(ctx).await;
    let genuine = h.gateway.fulfill(request_id).await.unwrap();

    // Wrong caller
    let result = h
        .engine
        .on_decryption_callback(
            &Identity::from("mallory"),
            request_id,
            vec![500, 0, 0],
            genuine.proof.clone(),
        )
        .await;
    assert!(matches!(result, Err(TallyError::Unauthorized { .. })));

    // Right caller, plaintexts not covered by the proof
    let result = h
        .engine
        .on_decryption_callback(&genuine.caller, request_id, vec![500, 0, 0], genuine.proof.clone())
        .await;
    assert!(matches!(result, Err(TallyError::Unauthorized { .. })));

    // Signed, but the wrong number of plaintexts
    let short = h.gateway.sign_callback(request_id, &[0, 3]);
    let result = h
        .engine
        .on_decryption_callback(&genuine.caller, request_id, vec![0, 3], Some(short))
        .await;
    assert!(matches!(
        result,
        Err(TallyError::PlaintextCountMismatch {
            expected: 3,
            actual: 2
        })
    ));

    // Nothing was consumed; the genuine callback still finalizes
    assert!(h.engine.outstanding_request(ctx).await.is_some());
    let outcome = h
        .engine
        .on_decryption_callback(&genuine.caller, request_id, genuine.plaintexts, genuine.proof)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Failed);
}

// ============ Gateway Failures and Retries ============

#[tokio::test]
async fn test_gateway_offline_then_rerequest() {
    let h = harness();
    let ctx = h.open(1).await;
    h.contribute(ctx, "alice", Category::Yes, Weight::public(120)).await;

    h.gateway.set_offline(true);
    h.clock.advance(Duration::hours(2));
    let err = h.engine.request_close(ctx).await.unwrap_err();
    assert!(err.is_retriable());

    // Closed regardless; contributions stay shut
    assert_eq!(
        h.engine.context_state(ctx).await,
        ContextState::AwaitingDecryption
    );
    assert!(h.engine.outstanding_request(ctx).await.is_none());
    assert!(matches!(
        h.engine.request_close(ctx).await,
        Err(TallyError::AlreadyRequested(_))
    ));

    h.gateway.set_offline(false);
    let request_id = h.engine.request_decryption(ctx).await.unwrap();
    assert_eq!(h.engine.decryption_attempts(ctx).await, 1);
    assert!(matches!(
        h.engine.request_decryption(ctx).await,
        Err(TallyError::AlreadyRequested(_))
    ));

    let callback = h.gateway.fulfill(request_id).await.unwrap();
    h.engine
        .on_decryption_callback(
            &callback.caller,
            callback.request_id,
            callback.plaintexts,
            callback.proof,
        )
        .await
        .unwrap();
    assert!(h.engine.is_passed(ctx).await);
}

#[tokio::test]
async fn test_retry_after_deadline_orphans_stale_request() {
    let h = harness();
    let ctx = h.open(1).await;
    h.contribute(ctx, "alice", Category::Yes, Weight::confidential(100)).await;

    let stale = h.close(ctx).await;

    assert!(matches!(
        h.engine.retry_decryption(&h.admin, ctx).await,
        Err(TallyError::DeadlineNotReached(_))
    ));
    assert!(matches!(
        h.engine.retry_decryption(&Identity::from("alice"), ctx).await,
        Err(TallyError::Unauthorized { .. })
    ));

    h.clock.advance(Duration::days(2));
    let fresh = h.engine.retry_decryption(&h.admin, ctx).await.unwrap();
    assert_ne!(fresh, stale);
    assert_eq!(h.engine.decryption_attempts(ctx).await, 2);
    assert_eq!(
        h.engine.outstanding_request(ctx).await.unwrap().request_id,
        fresh
    );

    // The gateway answers the stale request late
    let late = h.gateway.fulfill(stale).await.unwrap();
    let result = h
        .engine
        .on_decryption_callback(&late.caller, late.request_id, late.plaintexts, late.proof)
        .await;
    assert!(matches!(result, Err(TallyError::UnknownRequest(_))));
    assert_eq!(
        h.engine.context_state(ctx).await,
        ContextState::AwaitingDecryption
    );

    let callback = h.gateway.fulfill(fresh).await.unwrap();
    h.engine
        .on_decryption_callback(
            &callback.caller,
            callback.request_id,
            callback.plaintexts,
            callback.proof,
        )
        .await
        .unwrap();
    assert!(h.engine.is_passed(ctx).await);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let h = harness_with(
        TallyConfig {
            quorum_threshold: 1,
            basis_numerator: 0,
        },
        DecryptionConfig {
            deadline_secs: 60,
            max_attempts: 2,
        },
    );
    let ctx = h.open(1).await;
    h.contribute(ctx, "alice", Category::Yes, Weight::public(1)).await;
    let first = h.close(ctx).await;

    h.clock.advance(Duration::minutes(2));
    let second = h.engine.retry_decryption(&h.admin, ctx).await.unwrap();

    h.clock.advance(Duration::minutes(2));
    assert!(matches!(
        h.engine.retry_decryption(&h.admin, ctx).await,
        Err(TallyError::DecryptionExhausted { attempts: 2, .. })
    ));

    // The last request is kept and can still be answered
    assert_eq!(
        h.engine.outstanding_request(ctx).await.unwrap().request_id,
        second
    );
    assert_ne!(first, second);
    let callback = h.gateway.fulfill(second).await.unwrap();
    h.engine
        .on_decryption_callback(
            &callback.caller,
            callback.request_id,
            callback.plaintexts,
            callback.proof,
        )
        .await
        .unwrap();
    assert!(h.engine.is_passed(ctx).await);
}

// ============ Weight Sources ============

#[tokio::test]
async fn test_weight_sources_read_at_start_block() {
    let h = harness();
    let token = Arc::new(StaticWeightSource::new("token", false));
    let shielded = Arc::new(StaticWeightSource::new("shielded-pool", true));

    let alice = Identity::from("alice");
    let bob = Identity::from("bob");
    token.set_balance(alice.clone(), 900, 70).await;
    token.set_balance(alice.clone(), 1_001, 1).await;
    shielded.set_balance(alice.clone(), 1_000, 35).await;
    token.set_balance(bob.clone(), 10, 20).await;

    h.engine
        .register_weight_source(&h.admin, token.clone())
        .await
        .unwrap();
    h.engine
        .register_weight_source(&h.admin, shielded)
        .await
        .unwrap();
    assert!(matches!(
        h.engine.register_weight_source(&bob, token).await,
        Err(TallyError::Unauthorized { .. })
    ));

    let ctx = h.open(1).await;
    h.engine
        .contribute_from_sources(ctx, &alice, Category::Yes, b"")
        .await
        .unwrap();
    h.engine
        .contribute_from_sources(ctx, &bob, Category::No, b"")
        .await
        .unwrap();
    // No weight anywhere
    assert!(matches!(
        h.engine
            .contribute_from_sources(ctx, &Identity::from("nobody"), Category::Yes, b"")
            .await,
        Err(TallyError::ZeroWeight)
    ));

    let public = h.engine.total_votes(ctx).await.unwrap();
    assert_eq!((public.yes, public.no), (70, 20));

    let request_id = h.close(ctx).await;
    let callback = h.gateway.fulfill(request_id).await.unwrap();
    h.engine
        .on_decryption_callback(
            &callback.caller,
            callback.request_id,
            callback.plaintexts,
            callback.proof,
        )
        .await
        .unwrap();

    let totals = h.engine.total_votes(ctx).await.unwrap();
    assert_eq!((totals.yes, totals.no), (105, 20));
    assert!(h.engine.is_passed(ctx).await);
}

// ============ Lifecycle ============

#[tokio::test]
async fn test_contexts_are_independent() {
    let h = harness();
    let a = h.open(1).await;
    let b = h.open(2).await;

    h.contribute(a, "alice", Category::Yes, Weight::public(150)).await;
    h.contribute(b, "alice", Category::No, Weight::public(150)).await;

    h.clock.advance(Duration::hours(2));
    let id_a = h.engine.request_close(a).await.unwrap();
    let id_b = h.engine.request_close(b).await.unwrap();

    // Answer out of order
    for id in [id_b, id_a] {
        let cb = h.gateway.fulfill(id).await.unwrap();
        h.engine
            .on_decryption_callback(&cb.caller, cb.request_id, cb.plaintexts, cb.proof)
            .await
            .unwrap();
    }

    assert!(h.engine.is_passed(a).await);
    assert!(!h.engine.is_passed(b).await);
    assert!(matches!(
        h.engine.request_decryption(a).await,
        Err(TallyError::ContextNotClosed(_))
    ));
}

#[tokio::test]
async fn test_engine_from_config_and_snapshot_json() {
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
    let mut config = VeilConfig::default();
    config.tally = TallyConfig {
        quorum_threshold: 1,
        basis_numerator: 500_000,
    };
    let admin = Identity::from("admin");
    let engine = TallyEngine::from_config(
        admin.clone(),
        &config,
        accumulator,
        gateway.clone(),
        clock.clone(),
    )
    .unwrap();

    let ctx = ContextId(7);
    engine
        .open(&admin, ctx, 0, clock.now() + Duration::minutes(10))
        .await
        .unwrap();
    engine
        .contribute(ctx, &Identity::from("alice"), Category::Yes, Weight::confidential(2))
        .await
        .unwrap();
    clock.advance(Duration::minutes(11));
    let request_id = engine.request_close(ctx).await.unwrap();

    // Identity-only authentication: no proof needed
    let cb = gateway.fulfill(request_id).await.unwrap();
    engine
        .on_decryption_callback(&cb.caller, cb.request_id, cb.plaintexts, None)
        .await
        .unwrap();

    let snapshot = engine.context_snapshot(ctx).await.unwrap();
    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["state"], "finalized");
    assert_eq!(json["outcome"], "passed");
    assert_eq!(json["decrypted_totals"]["yes"], 2);
}
