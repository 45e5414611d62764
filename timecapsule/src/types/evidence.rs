//! Evidence and verdict types produced by the individual checks.
//!
//! Every authorization attempt produces these fresh; they are never persisted
//! standalone, only embedded in a proof record.

use serde::{Deserialize, Serialize};

/// One time source's report for a single authorization attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeEvidence {
    /// Identifier of the queried source.
    pub source_id: String,

    /// Reported timestamp, unix seconds. `None` when the query failed.
    pub reported_timestamp: Option<u64>,

    /// Wall time spent on the query, milliseconds.
    pub query_latency_ms: u64,

    /// Whether the query produced a usable timestamp.
    pub succeeded: bool,

    /// Failure description when `succeeded` is false.
    pub failure_reason: Option<String>,

    /// Whether this source is the ledger's own clock. The ledger-anchored
    /// report is the only value the unlock action can actually enforce;
    /// external sources are corroborating evidence.
    pub ledger_anchored: bool,
}

/// Aggregated, tolerance-checked result of querying all time sources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsensusVerdict {
    /// The authoritative timestamp the pipeline acts on: the ledger clock
    /// when it answered, otherwise the median of the succeeded sources.
    /// `None` when every source failed; a timestamp is never fabricated.
    pub reference_timestamp: Option<u64>,

    /// Number of sources that reported successfully.
    pub agreement_count: usize,

    /// Number of sources queried.
    pub total_sources: usize,

    /// Maximum pairwise absolute difference among succeeded reports,
    /// seconds. Zero when at most one source succeeded.
    pub max_skew: u64,

    /// True iff `agreement_count >= minimum_quorum` and
    /// `max_skew <= tolerance_window` and at least one source succeeded.
    pub valid: bool,
}

/// How the requester identity was compared against the recorded recipient.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMethod {
    /// Exact case-insensitive wallet address equality.
    AddressEquality,

    /// Exact equality of the domain portion of an email/domain claim. This
    /// is a coarse, non-cryptographic check: it proves the claim strings
    /// line up, not that the requester controls the domain.
    DomainClaim,

    /// The recorded recipient was in no recognizable form; never a match.
    Unrecognized,
}

/// Result of the identity check for a single attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityVerdict {
    /// Identity presented by the requester.
    pub claimed: String,

    /// Recipient recorded on the capsule.
    pub expected: String,

    /// Whether the claim matches the recorded recipient.
    pub matched: bool,

    /// Comparison method that produced `matched`.
    pub method: MatchMethod,
}
