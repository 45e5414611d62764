//! Shared data types for the release authorization pipeline.

pub mod capsule;
pub mod error;
pub mod evidence;

pub use capsule::{ChainState, ReleaseCondition, ReleaseReceipt, TimeCapsule};
pub use error::{CapsuleError, Result};
pub use evidence::{ConsensusVerdict, IdentityVerdict, MatchMethod, TimeEvidence};
