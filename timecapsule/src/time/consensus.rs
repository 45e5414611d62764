//! Multi-source time consensus.
//!
//! Fans out to every configured time oracle in parallel, records each
//! source's report (or failure) as evidence, and reduces the succeeded
//! reports to a single tolerance-checked verdict. Failed sources are kept in
//! the evidence set but excluded from agreement counting; they are never
//! treated as silent successes, and a timestamp is never fabricated when
//! every source fails.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{debug, warn};

use crate::interfaces::TimeOracle;
use crate::types::{ConsensusVerdict, TimeEvidence};

/// Knobs for a single consensus evaluation.
#[derive(Debug, Clone, Copy)]
pub struct ConsensusParams {
    /// Maximum tolerated pairwise skew among succeeded sources, seconds.
    pub tolerance_window: Duration,

    /// Minimum number of succeeded sources. The default of 1 lets the
    /// ledger clock satisfy quorum alone; callers wanting stronger
    /// corroboration raise it.
    pub minimum_quorum: usize,

    /// Per-source query deadline.
    pub source_timeout: Duration,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            // Generous by default, to absorb clock drift among public time
            // services.
            tolerance_window: Duration::from_secs(30 * 60),
            minimum_quorum: 1,
            source_timeout: Duration::from_secs(5),
        }
    }
}

/// Query every source concurrently and reduce to a verdict.
pub async fn evaluate(
    sources: &[Arc<dyn TimeOracle>],
    params: &ConsensusParams,
) -> (Vec<TimeEvidence>, ConsensusVerdict) {
    let queries = sources
        .iter()
        .map(|source| query_source(source.as_ref(), params.source_timeout));
    let evidence: Vec<TimeEvidence> = join_all(queries).await;

    let verdict = reduce(&evidence, params);
    debug!(
        agreement = verdict.agreement_count,
        total = verdict.total_sources,
        max_skew = verdict.max_skew,
        valid = verdict.valid,
        "time consensus evaluated"
    );
    (evidence, verdict)
}

async fn query_source(source: &dyn TimeOracle, deadline: Duration) -> TimeEvidence {
    let started = Instant::now();
    let outcome = tokio::time::timeout(deadline, source.now()).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(timestamp)) => TimeEvidence {
            source_id: source.source_id().to_string(),
            reported_timestamp: Some(timestamp),
            query_latency_ms: latency_ms,
            succeeded: true,
            failure_reason: None,
            ledger_anchored: source.ledger_anchored(),
        },
        Ok(Err(err)) => {
            warn!(source = source.source_id(), %err, "time source failed");
            TimeEvidence {
                source_id: source.source_id().to_string(),
                reported_timestamp: None,
                query_latency_ms: latency_ms,
                succeeded: false,
                failure_reason: Some(err.to_string()),
                ledger_anchored: source.ledger_anchored(),
            }
        }
        Err(_) => {
            warn!(
                source = source.source_id(),
                timeout_ms = deadline.as_millis() as u64,
                "time source timed out"
            );
            TimeEvidence {
                source_id: source.source_id().to_string(),
                reported_timestamp: None,
                query_latency_ms: latency_ms,
                succeeded: false,
                failure_reason: Some(format!("timed out after {:?}", deadline)),
                ledger_anchored: source.ledger_anchored(),
            }
        }
    }
}

fn reduce(evidence: &[TimeEvidence], params: &ConsensusParams) -> ConsensusVerdict {
    let mut succeeded: Vec<u64> = evidence
        .iter()
        .filter(|e| e.succeeded)
        .filter_map(|e| e.reported_timestamp)
        .collect();
    succeeded.sort_unstable();

    let agreement_count = succeeded.len();
    let max_skew = match (succeeded.first(), succeeded.last()) {
        (Some(min), Some(max)) => max - min,
        _ => 0,
    };

    // The ledger clock is the value the unlock action can enforce; external
    // reports only corroborate it. Fall back to the median of succeeded
    // sources when the ledger clock itself did not answer.
    let ledger_report = evidence
        .iter()
        .find(|e| e.ledger_anchored && e.succeeded)
        .and_then(|e| e.reported_timestamp);
    let reference_timestamp = ledger_report.or_else(|| median(&succeeded));

    let valid = agreement_count >= params.minimum_quorum
        && agreement_count > 0
        && max_skew <= params.tolerance_window.as_secs();

    ConsensusVerdict {
        reference_timestamp,
        agreement_count,
        total_sources: evidence.len(),
        max_skew,
        valid,
    }
}

fn median(sorted: &[u64]) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    Some(sorted[sorted.len() / 2])
}
