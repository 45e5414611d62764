//! Deterministic attestation bundles.
//!
//! A proof record is the tamper-evident justification for an authorization
//! decision: every check's output, a hash-chained attestation per check, and
//! one aggregate digest over the whole bundle. It is an auditable
//! attestation, not a zero-knowledge proof; the only guarantee is that any
//! mutation of the recorded evidence is detectable by replaying the hashes.
//!
//! Canonical encoding is bincode over structs with fixed field order
//! (strings UTF-8), hashed with blake3, digests rendered as lowercase hex.
//! Building is pure: no randomness and no clock reads, so byte-identical
//! inputs always yield the identical aggregate hash and any auditor can
//! replay the construction offline.

use serde::{Deserialize, Serialize};

use crate::types::{
    CapsuleError, ChainState, ConsensusVerdict, IdentityVerdict, Result, TimeEvidence,
};

/// Labels for the per-check attestation links, in chain order.
const LINK_TIME_CONSENSUS: &str = "time-consensus";
const LINK_IDENTITY: &str = "identity";
const LINK_CHAIN_STATE: &str = "chain-state";

/// One link in the attestation chain: a named digest bound to its
/// predecessor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attestation {
    /// Which check this link attests to.
    pub label: String,

    /// blake3 of `previous_digest || canonical(check output)`, lowercase hex.
    pub digest: String,

    /// Digest of the preceding link (the genesis digest for the first).
    pub previous_digest: String,
}

/// The aggregate attestation for one authorization attempt.
///
/// Immutable once built; a new attempt produces a new record. Serializes
/// verbatim (every field plus the aggregate hash) for audit logs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProofRecord {
    /// Capsule this attempt concerned.
    pub capsule_id: String,

    /// Every time source's report, including failures.
    pub time_evidence: Vec<TimeEvidence>,

    /// Reduced time verdict.
    pub consensus: ConsensusVerdict,

    /// Identity verdict.
    pub identity: IdentityVerdict,

    /// Ledger anchor at evaluation time.
    pub chain_snapshot: ChainState,

    /// Per-check attestation chain.
    pub attestations: Vec<Attestation>,

    /// blake3 over the canonical serialization of every field above,
    /// lowercase hex. The tamper-evidence anchor.
    pub aggregate_hash: String,

    /// Timestamp stamped by the engine from the chain snapshot it already
    /// held, unix seconds. Never read from a wall clock here.
    pub generated_at: u64,
}

/// Everything the aggregate hash covers, in fixed order.
#[derive(Serialize)]
struct ProofBody<'a> {
    capsule_id: &'a str,
    time_evidence: &'a [TimeEvidence],
    consensus: &'a ConsensusVerdict,
    identity: &'a IdentityVerdict,
    chain_snapshot: &'a ChainState,
    attestations: &'a [Attestation],
    generated_at: u64,
}

/// Builds proof records from check outputs.
pub struct ProofBuilder;

impl ProofBuilder {
    /// Assemble the attestation chain and aggregate digest.
    pub fn build(
        capsule_id: &str,
        time_evidence: Vec<TimeEvidence>,
        consensus: ConsensusVerdict,
        identity: IdentityVerdict,
        chain_snapshot: ChainState,
        generated_at: u64,
    ) -> Result<ProofRecord> {
        let genesis = genesis_digest(capsule_id, generated_at);

        let time_link = chain_link(
            LINK_TIME_CONSENSUS,
            &genesis,
            &(&time_evidence, &consensus),
        )?;
        let identity_link = chain_link(LINK_IDENTITY, &time_link.digest, &identity)?;
        let chain_link_att = chain_link(LINK_CHAIN_STATE, &identity_link.digest, &chain_snapshot)?;
        let attestations = vec![time_link, identity_link, chain_link_att];

        let aggregate_hash = aggregate_digest(&ProofBody {
            capsule_id,
            time_evidence: &time_evidence,
            consensus: &consensus,
            identity: &identity,
            chain_snapshot: &chain_snapshot,
            attestations: &attestations,
            generated_at,
        })?;

        Ok(ProofRecord {
            capsule_id: capsule_id.to_string(),
            time_evidence,
            consensus,
            identity,
            chain_snapshot,
            attestations,
            aggregate_hash,
            generated_at,
        })
    }
}

impl ProofRecord {
    /// Replay the attestation chain and aggregate digest against the
    /// recorded evidence. Returns false if any field has been altered since
    /// the record was built.
    pub fn verify(&self) -> bool {
        let rebuilt = ProofBuilder::build(
            &self.capsule_id,
            self.time_evidence.clone(),
            self.consensus.clone(),
            self.identity.clone(),
            self.chain_snapshot.clone(),
            self.generated_at,
        );
        match rebuilt {
            Ok(record) => {
                record.attestations == self.attestations
                    && record.aggregate_hash == self.aggregate_hash
            }
            Err(_) => false,
        }
    }
}

fn genesis_digest(capsule_id: &str, generated_at: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(capsule_id.as_bytes());
    hasher.update(&generated_at.to_le_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

fn chain_link<T: Serialize>(label: &str, previous: &str, payload: &T) -> Result<Attestation> {
    let encoded = bincode::serialize(payload)
        .map_err(|e| CapsuleError::serialization("failed to encode attestation payload", Some(e)))?;

    let mut hasher = blake3::Hasher::new();
    hasher.update(previous.as_bytes());
    hasher.update(label.as_bytes());
    hasher.update(&encoded);

    Ok(Attestation {
        label: label.to_string(),
        digest: hex::encode(hasher.finalize().as_bytes()),
        previous_digest: previous.to_string(),
    })
}

fn aggregate_digest(body: &ProofBody<'_>) -> Result<String> {
    let encoded = bincode::serialize(body)
        .map_err(|e| CapsuleError::serialization("failed to encode proof body", Some(e)))?;
    Ok(hex::encode(blake3::hash(&encoded).as_bytes()))
}
