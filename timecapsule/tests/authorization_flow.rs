// End-to-end authorization pipeline tests.
//
// Exercises the engine state machine against mock collaborators, covering
// the decision scenarios, degraded time evidence, deadline containment, and
// the concurrent double-release race.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use timecapsule::{
    AttemptPhase, AuthorizationDecision, AuthorizationEngine, CapsuleError, ChainState,
    DenialReason, EngineConfig, LedgerGateway, Outcome, PhaseObserver, ReleaseCondition,
    ReleaseOutcome, ReleaseReceipt, Result, TimeCapsule, TimeOracle,
};

const RECIPIENT: &str = "0x52908400098527886E0F7030069857D2E4169EE7";
const CHAIN_TIME: u64 = 1_900_000_000;

fn sample_capsule(released: bool) -> TimeCapsule {
    TimeCapsule {
        id: "capsule-1".to_string(),
        title: "letter to the future".to_string(),
        content_locator: "bafy-content-cid".to_string(),
        content_byte_length: 4_096,
        content_mime_type: "text/plain".to_string(),
        creator: "0x8617E340B3D01FA5F11F306F4090FD50E238070D".to_string(),
        recipient: RECIPIENT.to_string(),
        release_condition: ReleaseCondition::Timestamp(CHAIN_TIME - 60),
        released,
    }
}

#[derive(Default)]
struct LedgerState {
    capsule: Option<TimeCapsule>,
    can_release: bool,
    fail_reads: bool,
    stall_reads: bool,
    duplicate_release_errors: bool,
    release_delay: Option<Duration>,
    release_calls: u64,
}

struct MockLedger {
    state: Mutex<LedgerState>,
}

impl MockLedger {
    fn new(capsule: Option<TimeCapsule>, can_release: bool) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LedgerState {
                capsule,
                can_release,
                ..LedgerState::default()
            }),
        })
    }

    fn with<R>(&self, f: impl FnOnce(&mut LedgerState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    fn release_calls(&self) -> u64 {
        self.with(|s| s.release_calls)
    }

    async fn gate(&self) -> Result<()> {
        let (fail, stall) = self.with(|s| (s.fail_reads, s.stall_reads));
        if stall {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if fail {
            return Err(CapsuleError::ledger("rpc unreachable", None::<Infallible>));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerGateway for MockLedger {
    async fn get_capsule(&self, id: &str) -> Result<Option<TimeCapsule>> {
        self.gate().await?;
        Ok(self.with(|s| s.capsule.clone().filter(|c| c.id == id)))
    }

    async fn can_release(&self, _id: &str) -> Result<bool> {
        self.gate().await?;
        Ok(self.with(|s| s.can_release))
    }

    async fn release(&self, id: &str) -> Result<ReleaseReceipt> {
        let delay = self.with(|s| {
            s.release_calls += 1;
            s.release_delay
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.with(|s| {
            let duplicate_errors = s.duplicate_release_errors;
            match &mut s.capsule {
                Some(capsule) if capsule.id == id => {
                    if capsule.released {
                        if duplicate_errors {
                            return Err(CapsuleError::release(
                                "capsule already released",
                                None::<Infallible>,
                            ));
                        }
                        return Ok(ReleaseReceipt {
                            tx_ref: "tx-noop".to_string(),
                            success: true,
                        });
                    }
                    capsule.released = true;
                    Ok(ReleaseReceipt {
                        tx_ref: format!("tx-{}", s.release_calls),
                        success: true,
                    })
                }
                _ => Err(CapsuleError::release("unknown capsule", None::<Infallible>)),
            }
        })
    }

    async fn chain_state(&self) -> Result<ChainState> {
        self.gate().await?;
        Ok(ChainState {
            height: 4_200_000,
            hash: "9f86d081884c7d659a2feaa0c55ad015".to_string(),
            timestamp: CHAIN_TIME,
        })
    }
}

struct FixedOracle {
    id: String,
    timestamp: u64,
    anchored: bool,
}

impl FixedOracle {
    fn new(id: &str, timestamp: u64, anchored: bool) -> Arc<dyn TimeOracle> {
        Arc::new(Self {
            id: id.to_string(),
            timestamp,
            anchored,
        })
    }
}

#[async_trait]
impl TimeOracle for FixedOracle {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn ledger_anchored(&self) -> bool {
        self.anchored
    }

    async fn now(&self) -> Result<u64> {
        Ok(self.timestamp)
    }
}

struct UnresponsiveOracle;

#[async_trait]
impl TimeOracle for UnresponsiveOracle {
    fn source_id(&self) -> &str {
        "unresponsive"
    }

    async fn now(&self) -> Result<u64> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(0)
    }
}

struct FailingOracle;

#[async_trait]
impl TimeOracle for FailingOracle {
    fn source_id(&self) -> &str {
        "failing-ntp"
    }

    async fn now(&self) -> Result<u64> {
        Err(CapsuleError::time_source("failing-ntp", "connection refused"))
    }
}

#[derive(Default)]
struct RecordingObserver {
    phases: Mutex<Vec<AttemptPhase>>,
}

impl PhaseObserver for RecordingObserver {
    fn phase_changed(&self, _capsule_id: &str, phase: AttemptPhase) {
        self.phases.lock().unwrap().push(phase);
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        tolerance_window: Duration::from_secs(120),
        minimum_quorum: 1,
        source_timeout: Duration::from_millis(100),
        ledger_timeout: Duration::from_millis(500),
        global_timeout: Duration::from_secs(2),
    }
}

fn assert_denied(decision: &AuthorizationDecision, reason: DenialReason) {
    assert_eq!(decision.outcome, Outcome::Deny);
    assert_eq!(decision.phase, AttemptPhase::Denied);
    assert_eq!(decision.reasons, vec![reason]);
    assert!(decision.release.is_none());
}

#[tokio::test]
async fn happy_path_allows_releases_and_verifies() {
    let ledger = MockLedger::new(Some(sample_capsule(false)), true);
    let observer = Arc::new(RecordingObserver::default());
    let engine = AuthorizationEngine::new(
        ledger.clone(),
        vec![FixedOracle::new("ntp-pool", CHAIN_TIME + 15, false)],
        fast_config(),
    )
    .with_observer(observer.clone());

    // Requester differs from the recorded recipient only by case.
    let decision = engine
        .authorize("capsule-1", &RECIPIENT.to_lowercase())
        .await;

    assert_eq!(decision.outcome, Outcome::Allow);
    assert!(decision.reasons.is_empty());
    assert_eq!(decision.phase, AttemptPhase::Verified);
    assert_eq!(
        decision.release,
        Some(ReleaseOutcome::Verified {
            tx_ref: Some("tx-1".to_string())
        })
    );
    assert_eq!(ledger.release_calls(), 1);

    let proof = decision.proof.expect("allow carries a proof");
    assert!(proof.verify());
    assert!(proof.consensus.valid);
    assert_eq!(proof.consensus.reference_timestamp, Some(CHAIN_TIME));
    assert_eq!(proof.consensus.agreement_count, 2);
    assert!(proof.identity.matched);
    assert_eq!(proof.chain_snapshot.timestamp, CHAIN_TIME);

    let phases = observer.phases.lock().unwrap().clone();
    assert_eq!(
        phases,
        vec![
            AttemptPhase::Pending,
            AttemptPhase::Analyzing,
            AttemptPhase::Evaluating,
            AttemptPhase::Allowed,
            AttemptPhase::Releasing,
            AttemptPhase::Verified,
        ]
    );
}

#[tokio::test]
async fn early_unlock_attempt_is_denied_without_release_call() {
    let ledger = MockLedger::new(Some(sample_capsule(false)), false);
    let engine = AuthorizationEngine::new(ledger.clone(), Vec::new(), fast_config());

    let decision = engine.authorize("capsule-1", RECIPIENT).await;

    assert_denied(&decision, DenialReason::ConditionNotMet);
    assert_eq!(ledger.release_calls(), 0);
    // A full evaluation still yields an auditable proof.
    assert!(decision.proof.expect("denial carries evidence").verify());
}

#[tokio::test]
async fn wrong_requester_is_denied() {
    let ledger = MockLedger::new(Some(sample_capsule(false)), true);
    let engine = AuthorizationEngine::new(ledger.clone(), Vec::new(), fast_config());

    let decision = engine
        .authorize("capsule-1", "0x0000000000000000000000000000000000000bad")
        .await;

    assert_denied(&decision, DenialReason::IdentityMismatch);
    assert_eq!(ledger.release_calls(), 0);
    let proof = decision.proof.unwrap();
    assert!(!proof.identity.matched);
}

#[tokio::test]
async fn already_released_capsule_always_denies() {
    let ledger = MockLedger::new(Some(sample_capsule(true)), true);
    let engine = AuthorizationEngine::new(ledger.clone(), Vec::new(), fast_config());

    for requester in [RECIPIENT, "0x0000000000000000000000000000000000000bad"] {
        let decision = engine.authorize("capsule-1", requester).await;
        assert_denied(&decision, DenialReason::AlreadyReleased);
        assert!(decision.proof.is_none());
    }
    assert_eq!(ledger.release_calls(), 0);
}

#[tokio::test]
async fn unknown_capsule_is_denied_as_not_found() {
    let ledger = MockLedger::new(None, true);
    let engine = AuthorizationEngine::new(ledger, Vec::new(), fast_config());

    let decision = engine.authorize("capsule-404", RECIPIENT).await;

    assert_denied(&decision, DenialReason::NotFound);
}

#[tokio::test]
async fn dead_ledger_read_is_a_retryable_denial() {
    let ledger = MockLedger::new(Some(sample_capsule(false)), true);
    ledger.with(|s| s.fail_reads = true);
    let engine = AuthorizationEngine::new(ledger, Vec::new(), fast_config());

    let decision = engine.authorize("capsule-1", RECIPIENT).await;

    assert_denied(&decision, DenialReason::LedgerUnreachable);
    assert!(decision.reasons[0].is_retryable());
}

#[tokio::test]
async fn ledger_clock_alone_satisfies_quorum_when_externals_are_down() {
    let ledger = MockLedger::new(Some(sample_capsule(false)), true);
    // No injected source is ledger-anchored, so the engine adds its own
    // ledger clock; both externals are down.
    let engine = AuthorizationEngine::new(
        ledger.clone(),
        vec![
            Arc::new(FailingOracle) as Arc<dyn TimeOracle>,
            Arc::new(UnresponsiveOracle) as Arc<dyn TimeOracle>,
        ],
        fast_config(),
    );

    let decision = engine.authorize("capsule-1", RECIPIENT).await;

    assert_eq!(decision.outcome, Outcome::Allow);
    assert_eq!(decision.phase, AttemptPhase::Verified);
    let proof = decision.proof.unwrap();
    assert_eq!(proof.consensus.agreement_count, 1);
    assert_eq!(proof.time_evidence.len(), 3);
    assert_eq!(
        proof
            .time_evidence
            .iter()
            .filter(|e| !e.succeeded)
            .count(),
        2
    );
}

#[tokio::test]
async fn unresponsive_source_does_not_stall_the_attempt() {
    let ledger = MockLedger::new(Some(sample_capsule(false)), true);
    let engine = AuthorizationEngine::new(
        ledger,
        vec![
            FixedOracle::new("ledger-rpc", CHAIN_TIME, true),
            Arc::new(UnresponsiveOracle) as Arc<dyn TimeOracle>,
        ],
        fast_config(),
    );

    let started = Instant::now();
    let decision = engine.authorize("capsule-1", RECIPIENT).await;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(decision.outcome, Outcome::Allow);
    let proof = decision.proof.unwrap();
    let stalled = proof
        .time_evidence
        .iter()
        .find(|e| e.source_id == "unresponsive")
        .unwrap();
    assert!(!stalled.succeeded);
    assert!(stalled.failure_reason.is_some());
}

#[tokio::test]
async fn global_deadline_abandons_the_attempt_as_denial() {
    let ledger = MockLedger::new(Some(sample_capsule(false)), true);
    ledger.with(|s| s.stall_reads = true);
    let config = EngineConfig {
        ledger_timeout: Duration::from_secs(60),
        global_timeout: Duration::from_millis(200),
        ..fast_config()
    };
    let engine = AuthorizationEngine::new(ledger.clone(), Vec::new(), config);

    let started = Instant::now();
    let decision = engine.authorize("capsule-1", RECIPIENT).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_denied(&decision, DenialReason::EvaluationTimeout);
    assert_eq!(ledger.release_calls(), 0);
}

#[tokio::test]
async fn denial_lists_every_failing_reason() {
    let ledger = MockLedger::new(Some(sample_capsule(false)), false);
    // Quorum of 3 with only the ledger clock answering invalidates the
    // time verdict too.
    let config = EngineConfig {
        minimum_quorum: 3,
        ..fast_config()
    };
    let engine = AuthorizationEngine::new(
        ledger,
        vec![Arc::new(FailingOracle) as Arc<dyn TimeOracle>],
        config,
    );

    let decision = engine
        .authorize("capsule-1", "0x0000000000000000000000000000000000000bad")
        .await;

    assert_eq!(decision.outcome, Outcome::Deny);
    assert_eq!(
        decision.reasons,
        vec![
            DenialReason::ConditionNotMet,
            DenialReason::TimeConsensusInvalid,
            DenialReason::IdentityMismatch,
        ]
    );
    assert!(decision.proof.is_some());
}

#[tokio::test]
async fn concurrent_double_release_both_end_verified() {
    let ledger = MockLedger::new(Some(sample_capsule(false)), true);
    ledger.with(|s| {
        s.duplicate_release_errors = true;
        // Hold the unlock long enough that both attempts finish evaluating
        // before either commits.
        s.release_delay = Some(Duration::from_millis(100));
    });
    let engine = Arc::new(AuthorizationEngine::new(
        ledger.clone(),
        Vec::new(),
        fast_config(),
    ));

    let (first, second) = tokio::join!(
        engine.authorize("capsule-1", RECIPIENT),
        engine.authorize("capsule-1", RECIPIENT),
    );

    for decision in [&first, &second] {
        assert_eq!(decision.outcome, Outcome::Allow);
        assert_eq!(decision.phase, AttemptPhase::Verified);
        assert!(matches!(
            decision.release,
            Some(ReleaseOutcome::Verified { .. })
        ));
    }
    assert_eq!(ledger.release_calls(), 2);
    // Exactly one of the two carried the executing transaction reference;
    // the rejected duplicate verified through the post-check.
    let tx_refs: Vec<_> = [&first, &second]
        .iter()
        .filter_map(|d| match &d.release {
            Some(ReleaseOutcome::Verified { tx_ref }) => tx_ref.clone(),
            _ => None,
        })
        .collect();
    assert_eq!(tx_refs.len(), 1);
}

#[tokio::test]
async fn decision_serializes_verbatim_for_audit_logs() {
    let ledger = MockLedger::new(Some(sample_capsule(false)), true);
    let engine = AuthorizationEngine::new(
        ledger,
        vec![FixedOracle::new("ntp-pool", CHAIN_TIME + 5, false)],
        fast_config(),
    );

    let decision = engine.authorize("capsule-1", RECIPIENT).await;
    assert_eq!(decision.outcome, Outcome::Allow);

    let json = serde_json::to_string_pretty(&decision).unwrap();
    let restored: AuthorizationDecision = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, decision);
    let proof = restored.proof.unwrap();
    assert_eq!(
        proof.aggregate_hash,
        decision.proof.as_ref().unwrap().aggregate_hash
    );
    assert!(proof.verify());
}
