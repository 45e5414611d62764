//! Collaborator contracts consumed by the pipeline.
//!
//! The concrete ledger, time services, and storage backends live outside
//! this crate and are injected into the engine through these traits. There
//! are no ambient handles or process-wide singletons: everything the
//! pipeline talks to arrives through its constructor.

use async_trait::async_trait;

use crate::types::{ChainState, ReleaseReceipt, Result, TimeCapsule};

/// The system of record holding capsule state and executing release.
///
/// `release` must be idempotent for an already-released id: the ledger
/// returns success without re-executing the unlock. That atomicity is the
/// only protection against concurrent double-release; this core does not
/// reimplement it.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Fetch the current capsule record, or `None` when no capsule exists
    /// under `id`.
    async fn get_capsule(&self, id: &str) -> Result<Option<TimeCapsule>>;

    /// The ledger's own release predicate: whether the capsule's condition
    /// is satisfied as of the current chain state.
    async fn can_release(&self, id: &str) -> Result<bool>;

    /// Execute the unlock action. The only chain-mutating call this
    /// pipeline ever issues.
    async fn release(&self, id: &str) -> Result<ReleaseReceipt>;

    /// Read the current ledger height, block hash, and block timestamp.
    async fn chain_state(&self) -> Result<ChainState>;
}

/// One external or on-chain time oracle.
#[async_trait]
pub trait TimeOracle: Send + Sync {
    /// Stable identifier recorded in time evidence.
    fn source_id(&self) -> &str;

    /// Whether this oracle reports the ledger's own clock.
    fn ledger_anchored(&self) -> bool {
        false
    }

    /// Current time as reported by this source, unix seconds.
    async fn now(&self) -> Result<u64>;
}
