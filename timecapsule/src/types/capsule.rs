//! Core capsule data types.
//!
//! A time capsule is a content record held by the ledger collaborator and
//! release-gated by a condition. This core never owns capsule state: every
//! authorization attempt re-reads it fresh, and the `released` flag is
//! flipped only by the ledger as a consequence of the unlock action.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The predicate that must hold before a capsule may be released.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReleaseCondition {
    /// Absolute unlock time, unix seconds.
    Timestamp(u64),

    /// Opaque condition blob understood by the time-lock encryption
    /// collaborator. This core treats it as a black box and defers to the
    /// ledger's own `can_release` predicate.
    Opaque(Vec<u8>),
}

impl fmt::Display for ReleaseCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseCondition::Timestamp(at) => write!(f, "releasable at {}", at),
            ReleaseCondition::Opaque(blob) => write!(f, "opaque condition ({} bytes)", blob.len()),
        }
    }
}

/// A locked content record as stored by the ledger collaborator.
///
/// Read-only to this core except for `released`, which the core causes to
/// flip (through the external unlock call) but does not itself own. The
/// ledger guarantees `released` is monotonic: once true, it never reverts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeCapsule {
    /// Ledger-assigned identifier.
    pub id: String,

    /// Human-readable title.
    pub title: String,

    /// Opaque reference into the storage collaborator. Never dereferenced by
    /// the authorization pipeline.
    pub content_locator: String,

    /// Size of the encrypted payload in bytes.
    pub content_byte_length: u64,

    /// MIME type of the decrypted payload.
    pub content_mime_type: String,

    /// Identity of the creating party.
    pub creator: String,

    /// Identity claim authorized to request release: a wallet address or an
    /// email/domain-style claim. Parsed by the identity check, never here.
    pub recipient: String,

    /// The release-gating predicate.
    pub release_condition: ReleaseCondition,

    /// Whether the capsule has been released. Set exactly once by the ledger.
    pub released: bool,
}

/// Anchor read from the ledger, embedded in proofs as tamper evidence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainState {
    /// Current ledger height.
    pub height: u64,

    /// Hash of the block at `height`, lowercase hex.
    pub hash: String,

    /// Timestamp of the block at `height`, unix seconds.
    pub timestamp: u64,
}

/// Result of the ledger's unlock action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseReceipt {
    /// Transaction reference for the unlock, suitable for audit records.
    pub tx_ref: String,

    /// Whether the ledger reports the unlock as executed. An already-released
    /// capsule yields `success=true` without re-executing.
    pub success: bool,
}
