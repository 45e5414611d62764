use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CapsuleError>;

/// Unified error type for the release authorization pipeline.
///
/// Collaborator faults (ledger reads, time oracles, the release action) carry
/// a context string and an optional source error so callers can distinguish
/// infrastructure failures from security denials. Input problems never become
/// errors at the `authorize` boundary; they resolve to a denial with a stable
/// reason code instead.
#[derive(Debug, Error)]
pub enum CapsuleError {
    /// The ledger collaborator failed or returned an unusable response.
    #[error("ledger error: {context}")]
    Ledger {
        context: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// A time oracle failed to report a timestamp.
    #[error("time source '{source_id}' failed: {context}")]
    TimeSource { source_id: String, context: String },

    /// Canonical encoding of a proof component failed.
    #[error("serialization error: {context}")]
    Serialization {
        context: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// Input or state validation failed.
    #[error("validation error: {0}")]
    Validation(String),

    /// The external unlock action failed.
    #[error("release action failed: {context}")]
    Release {
        context: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// An operation exceeded its configured deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Internal invariant violation.
    #[error("internal error: {context}")]
    Internal {
        context: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
}

impl CapsuleError {
    /// Creates a new ledger error.
    pub fn ledger<E>(context: impl Into<String>, source: Option<E>) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        CapsuleError::Ledger {
            context: context.into(),
            source: source.map(|e| Box::new(e) as Box<dyn StdError + Send + Sync>),
        }
    }

    /// Creates a new time-source error.
    pub fn time_source(source_id: impl Into<String>, context: impl Into<String>) -> Self {
        CapsuleError::TimeSource {
            source_id: source_id.into(),
            context: context.into(),
        }
    }

    /// Creates a new serialization error.
    pub fn serialization<E>(context: impl Into<String>, source: Option<E>) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        CapsuleError::Serialization {
            context: context.into(),
            source: source.map(|e| Box::new(e) as Box<dyn StdError + Send + Sync>),
        }
    }

    /// Creates a new validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        CapsuleError::Validation(message.into())
    }

    /// Creates a new release-action error.
    pub fn release<E>(context: impl Into<String>, source: Option<E>) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        CapsuleError::Release {
            context: context.into(),
            source: source.map(|e| Box::new(e) as Box<dyn StdError + Send + Sync>),
        }
    }

    /// Creates a new internal error.
    pub fn internal<E>(context: impl Into<String>, source: Option<E>) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        CapsuleError::Internal {
            context: context.into(),
            source: source.map(|e| Box::new(e) as Box<dyn StdError + Send + Sync>),
        }
    }

    /// True when the fault class is worth retrying (infrastructure, not
    /// security).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CapsuleError::Ledger { .. }
                | CapsuleError::TimeSource { .. }
                | CapsuleError::Timeout(_)
        )
    }
}
