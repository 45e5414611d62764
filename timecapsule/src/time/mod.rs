//! Time sources and multi-source time consensus.

pub mod consensus;
pub mod sources;

pub use consensus::{evaluate, ConsensusParams};
pub use sources::LedgerClock;
