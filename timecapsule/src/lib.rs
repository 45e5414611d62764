// Timecapsule Library Entry Point
//
// This crate implements the release authorization pipeline for time-locked
// capsules: given a capsule held by a ledger collaborator and a requester's
// identity claim, it decides whether release is permitted and produces a
// deterministic, tamper-evident proof bundle justifying the decision before
// any unlock action is taken.
//
// # Architecture
//
// * **Types**: capsule records, evidence, verdicts, and the unified error
// * **Interfaces**: async collaborator contracts (ledger, time oracles)
// * **Time**: parallel multi-source time consensus with a ledger-anchored
//   fallback clock
// * **Identity**: recipient-vs-requester matching (wallet address or
//   domain claim)
// * **Proof**: hash-chained attestations with one aggregate digest
// * **Engine**: the authorization state machine orchestrating everything
//   and invoking the unlock action on an allow decision

pub mod engine;
pub mod identity;
pub mod interfaces;
pub mod proof;
pub mod time;
pub mod types;

// Re-export key components for easier access
pub use engine::{
    AttemptPhase, AuthorizationDecision, AuthorizationEngine, DenialReason, EngineConfig,
    Outcome, PhaseObserver, ReleaseOutcome,
};
pub use interfaces::{LedgerGateway, TimeOracle};
pub use proof::{Attestation, ProofBuilder, ProofRecord};
pub use time::{ConsensusParams, LedgerClock};
pub use types::{
    CapsuleError, ChainState, ConsensusVerdict, IdentityVerdict, MatchMethod, ReleaseCondition,
    ReleaseReceipt, Result, TimeCapsule, TimeEvidence,
};

/// Returns the version of the crate.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
