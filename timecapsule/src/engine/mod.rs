//! Authorization engine.
//!
//! Orchestrates the individual checks into a single terminal decision for
//! one capsule and one requester, and performs the unlock action when the
//! decision allows it. The attempt moves through a fixed set of phases:
//!
//! ```text
//! Pending -> Analyzing -> Evaluating -> Allowed  -> Releasing -> Verified
//!                                    \-> Denied              \-> ReleaseFailed
//! ```
//!
//! Every state except `Releasing` is read-only; the unlock invocation is
//! the only external mutation, issued at most once per decision and never
//! speculatively. Attempts on distinct capsules (or retries of the same
//! capsule) may run concurrently; the only shared state is the ledger
//! collaborator itself, and the only safety property relied upon is that
//! the ledger makes `release` idempotent for an already-released capsule.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::identity;
use crate::interfaces::{LedgerGateway, TimeOracle};
use crate::proof::{ProofBuilder, ProofRecord};
use crate::time::{self, ConsensusParams, LedgerClock};
use crate::types::{CapsuleError, Result, TimeCapsule};

/// Tunables for one engine instance, injected by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum tolerated skew among time sources.
    pub tolerance_window: Duration,

    /// Minimum number of agreeing time sources. 1 lets the ledger clock
    /// satisfy quorum alone.
    pub minimum_quorum: usize,

    /// Per-time-source query deadline.
    pub source_timeout: Duration,

    /// Deadline for each individual ledger operation.
    pub ledger_timeout: Duration,

    /// Overall deadline for the Analyzing and Evaluating states. Exceeding
    /// it abandons the attempt as a denial; it never falls through to
    /// Releasing.
    pub global_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tolerance_window: Duration::from_secs(30 * 60),
            minimum_quorum: 1,
            source_timeout: Duration::from_secs(5),
            ledger_timeout: Duration::from_secs(10),
            global_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    fn consensus_params(&self) -> ConsensusParams {
        ConsensusParams {
            tolerance_window: self.tolerance_window,
            minimum_quorum: self.minimum_quorum,
            source_timeout: self.source_timeout,
        }
    }
}

/// Phase of an authorization attempt. `Denied`, `Verified`, and
/// `ReleaseFailed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AttemptPhase {
    Pending,
    Analyzing,
    Evaluating,
    Allowed,
    Denied,
    Releasing,
    Verified,
    ReleaseFailed,
}

/// Stable denial reason codes, suitable for display and for automated
/// retry policies. Serialized in kebab-case; `code()` returns the same
/// strings for log formatting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DenialReason {
    /// The capsule is already released; repeated attempts always deny and
    /// never re-release.
    AlreadyReleased,
    /// No capsule exists under the requested id.
    NotFound,
    /// The ledger's own release predicate reports the condition unmet.
    ConditionNotMet,
    /// The requester is not the recorded recipient.
    IdentityMismatch,
    /// Time sources failed quorum or tolerance.
    TimeConsensusInvalid,
    /// The global deadline elapsed during analysis or evaluation.
    EvaluationTimeout,
    /// A ledger read failed. Infrastructure fault, not a security denial;
    /// callers should treat this class as retryable.
    LedgerUnreachable,
    /// Proof construction failed. Never surfaced as an allow.
    InternalProofError,
}

impl DenialReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::AlreadyReleased => "already-released",
            DenialReason::NotFound => "not-found",
            DenialReason::ConditionNotMet => "condition-not-met",
            DenialReason::IdentityMismatch => "identity-mismatch",
            DenialReason::TimeConsensusInvalid => "time-consensus-invalid",
            DenialReason::EvaluationTimeout => "evaluation-timeout",
            DenialReason::LedgerUnreachable => "ledger-unreachable",
            DenialReason::InternalProofError => "internal-proof-error",
        }
    }

    /// Whether the reason signals an infrastructure fault worth retrying
    /// rather than a security denial.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DenialReason::LedgerUnreachable | DenialReason::EvaluationTimeout
        )
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// ALLOW or DENY.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Allow,
    Deny,
}

/// What happened after an allow decision triggered the unlock action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", tag = "status")]
pub enum ReleaseOutcome {
    /// The post-check confirmed `released=true`. `tx_ref` is absent when
    /// the ledger rejected a concurrent duplicate unlock but the capsule
    /// still ended up released (a benign race, not an error).
    Verified { tx_ref: Option<String> },

    /// The unlock action errored, or the post-check still showed the
    /// capsule locked. Reported, never retried automatically; re-invoking
    /// `authorize` is the caller's decision.
    Failed { error: String },
}

/// Terminal result of one authorization attempt. Immutable; a new attempt
/// produces a new decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationDecision {
    pub capsule_id: String,

    pub outcome: Outcome,

    /// Every failing reason when denied, in check order; empty on allow.
    pub reasons: Vec<DenialReason>,

    /// The attestation bundle justifying the outcome. Absent only for
    /// short-circuit denials made before any evidence existed.
    pub proof: Option<ProofRecord>,

    /// Populated when the attempt reached Releasing.
    pub release: Option<ReleaseOutcome>,

    /// Terminal phase the attempt ended in.
    pub phase: AttemptPhase,
}

impl AuthorizationDecision {
    fn denied(capsule_id: &str, reasons: Vec<DenialReason>, proof: Option<ProofRecord>) -> Self {
        Self {
            capsule_id: capsule_id.to_string(),
            outcome: Outcome::Deny,
            reasons,
            proof,
            release: None,
            phase: AttemptPhase::Denied,
        }
    }
}

/// Side channel for progress reporting, decoupled from correctness. The
/// engine works identically with no observer installed.
pub trait PhaseObserver: Send + Sync {
    fn phase_changed(&self, capsule_id: &str, phase: AttemptPhase);
}

enum Evaluated {
    Allowed { proof: ProofRecord },
    Denied {
        reasons: Vec<DenialReason>,
        proof: Option<ProofRecord>,
    },
}

/// The release authorization pipeline root.
///
/// Holds the injected collaborators and configuration; each `authorize`
/// call is an independent attempt with no state shared between calls.
pub struct AuthorizationEngine {
    ledger: Arc<dyn LedgerGateway>,
    time_sources: Vec<Arc<dyn TimeOracle>>,
    config: EngineConfig,
    observer: Option<Arc<dyn PhaseObserver>>,
}

impl AuthorizationEngine {
    /// Build an engine over the given ledger and time sources.
    ///
    /// The chain's own clock must always be among the queried sources; if
    /// none of the injected oracles is ledger-anchored, a [`LedgerClock`]
    /// over the gateway is prepended.
    pub fn new(
        ledger: Arc<dyn LedgerGateway>,
        time_sources: Vec<Arc<dyn TimeOracle>>,
        config: EngineConfig,
    ) -> Self {
        let mut time_sources = time_sources;
        if !time_sources.iter().any(|s| s.ledger_anchored()) {
            time_sources.insert(0, Arc::new(LedgerClock::new(ledger.clone())));
        }
        Self {
            ledger,
            time_sources,
            config,
            observer: None,
        }
    }

    /// Install a progress observer.
    pub fn with_observer(mut self, observer: Arc<dyn PhaseObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Decide whether `requester` may release `capsule_id`, and perform the
    /// unlock when allowed.
    ///
    /// Never returns an error: input problems and collaborator faults all
    /// resolve to a denial carrying stable reason codes, and release
    /// failures are reported in the decision's [`ReleaseOutcome`].
    pub async fn authorize(&self, capsule_id: &str, requester: &str) -> AuthorizationDecision {
        self.transition(capsule_id, AttemptPhase::Pending);

        let evaluated = match timeout(
            self.config.global_timeout,
            self.evaluate(capsule_id, requester),
        )
        .await
        {
            Ok(evaluated) => evaluated,
            Err(_) => {
                warn!(
                    capsule = capsule_id,
                    timeout_ms = self.config.global_timeout.as_millis() as u64,
                    "attempt abandoned: global deadline exceeded"
                );
                self.transition(capsule_id, AttemptPhase::Denied);
                return AuthorizationDecision::denied(
                    capsule_id,
                    vec![DenialReason::EvaluationTimeout],
                    None,
                );
            }
        };

        match evaluated {
            Evaluated::Denied { reasons, proof } => {
                info!(
                    capsule = capsule_id,
                    reasons = %format_reasons(&reasons),
                    "authorization denied"
                );
                self.transition(capsule_id, AttemptPhase::Denied);
                AuthorizationDecision::denied(capsule_id, reasons, proof)
            }
            Evaluated::Allowed { proof } => {
                info!(capsule = capsule_id, "authorization allowed");
                self.transition(capsule_id, AttemptPhase::Allowed);
                self.transition(capsule_id, AttemptPhase::Releasing);

                let release = self.perform_release(capsule_id).await;
                let phase = match release {
                    ReleaseOutcome::Verified { .. } => AttemptPhase::Verified,
                    ReleaseOutcome::Failed { .. } => AttemptPhase::ReleaseFailed,
                };
                self.transition(capsule_id, phase);

                AuthorizationDecision {
                    capsule_id: capsule_id.to_string(),
                    outcome: Outcome::Allow,
                    reasons: Vec::new(),
                    proof: Some(proof),
                    release: Some(release),
                    phase,
                }
            }
        }
    }

    async fn evaluate(&self, capsule_id: &str, requester: &str) -> Evaluated {
        self.transition(capsule_id, AttemptPhase::Analyzing);

        // Always a fresh read; the released flag is never cached locally.
        let capsule = match self.fetch_capsule(capsule_id).await {
            Ok(Some(capsule)) if capsule.released => {
                return Evaluated::Denied {
                    reasons: vec![DenialReason::AlreadyReleased],
                    proof: None,
                }
            }
            Ok(Some(capsule)) => capsule,
            Ok(None) => {
                return Evaluated::Denied {
                    reasons: vec![DenialReason::NotFound],
                    proof: None,
                }
            }
            Err(err) => {
                warn!(capsule = capsule_id, %err, "capsule read failed");
                return Evaluated::Denied {
                    reasons: vec![DenialReason::LedgerUnreachable],
                    proof: None,
                };
            }
        };

        self.transition(capsule_id, AttemptPhase::Evaluating);

        // The three evidence-gathering checks have no ordering dependency.
        let consensus_params = self.config.consensus_params();
        let ((time_evidence, consensus), snapshot, can_release) = tokio::join!(
            time::consensus::evaluate(&self.time_sources, &consensus_params),
            self.ledger_op("chain_state", self.ledger.chain_state()),
            self.ledger_op("can_release", self.ledger.can_release(capsule_id)),
        );
        let identity = identity::evaluate(&capsule.recipient, requester);

        let snapshot = match snapshot {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(capsule = capsule_id, %err, "chain snapshot failed");
                return Evaluated::Denied {
                    reasons: vec![DenialReason::LedgerUnreachable],
                    proof: None,
                };
            }
        };
        let can_release = match can_release {
            Ok(can_release) => can_release,
            Err(err) => {
                warn!(capsule = capsule_id, %err, "release predicate read failed");
                return Evaluated::Denied {
                    reasons: vec![DenialReason::LedgerUnreachable],
                    proof: None,
                };
            }
        };

        // The proof is stamped from state already in hand, never from a
        // wall clock, so it stays replayable.
        let generated_at = snapshot.timestamp;
        let proof = match ProofBuilder::build(
            capsule_id,
            time_evidence,
            consensus.clone(),
            identity.clone(),
            snapshot,
            generated_at,
        ) {
            Ok(proof) => proof,
            Err(err) => {
                error!(capsule = capsule_id, %err, "proof construction failed");
                return Evaluated::Denied {
                    reasons: vec![DenialReason::InternalProofError],
                    proof: None,
                };
            }
        };

        let mut reasons = Vec::new();
        if !can_release {
            reasons.push(DenialReason::ConditionNotMet);
        }
        if !consensus.valid {
            reasons.push(DenialReason::TimeConsensusInvalid);
        }
        if !identity.matched {
            reasons.push(DenialReason::IdentityMismatch);
        }

        if reasons.is_empty() {
            Evaluated::Allowed { proof }
        } else {
            Evaluated::Denied {
                reasons,
                proof: Some(proof),
            }
        }
    }

    /// Invoke the unlock action exactly once, then confirm its outcome by
    /// re-reading the capsule.
    async fn perform_release(&self, capsule_id: &str) -> ReleaseOutcome {
        let receipt = self
            .ledger_op("release", self.ledger.release(capsule_id))
            .await;

        let post_state = self.fetch_capsule(capsule_id).await;

        match post_state {
            // The post-check is authoritative: if the capsule ended up
            // released, a rejected duplicate unlock from a concurrent
            // attempt is benign.
            Ok(Some(capsule)) if capsule.released => {
                let tx_ref = match receipt {
                    Ok(receipt) => Some(receipt.tx_ref),
                    Err(err) => {
                        info!(
                            capsule = capsule_id,
                            %err,
                            "unlock call failed but capsule is released; treating as verified"
                        );
                        None
                    }
                };
                ReleaseOutcome::Verified { tx_ref }
            }
            Ok(Some(_)) => {
                let error = match receipt {
                    Ok(receipt) => format!(
                        "capsule still locked after unlock (tx {})",
                        receipt.tx_ref
                    ),
                    Err(err) => err.to_string(),
                };
                warn!(capsule = capsule_id, %error, "release failed");
                ReleaseOutcome::Failed { error }
            }
            Ok(None) => ReleaseOutcome::Failed {
                error: "capsule disappeared during release post-check".to_string(),
            },
            Err(err) => {
                warn!(capsule = capsule_id, %err, "release post-check read failed");
                ReleaseOutcome::Failed {
                    error: format!("release outcome unconfirmed: {}", err),
                }
            }
        }
    }

    async fn fetch_capsule(&self, capsule_id: &str) -> Result<Option<TimeCapsule>> {
        self.ledger_op("get_capsule", self.ledger.get_capsule(capsule_id))
            .await
    }

    /// Bound a single ledger operation by the configured per-operation
    /// deadline.
    async fn ledger_op<T>(
        &self,
        op: &str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match timeout(self.config.ledger_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CapsuleError::ledger(
                format!("{} timed out after {:?}", op, self.config.ledger_timeout),
                None::<Infallible>,
            )),
        }
    }

    fn transition(&self, capsule_id: &str, phase: AttemptPhase) {
        info!(capsule = capsule_id, phase = ?phase, "authorization phase");
        if let Some(observer) = &self.observer {
            observer.phase_changed(capsule_id, phase);
        }
    }
}

fn format_reasons(reasons: &[DenialReason]) -> String {
    reasons
        .iter()
        .map(DenialReason::code)
        .collect::<Vec<_>>()
        .join(",")
}
