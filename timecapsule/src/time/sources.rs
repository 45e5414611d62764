//! Built-in time oracle adapters.

use std::sync::Arc;

use async_trait::async_trait;

use crate::interfaces::{LedgerGateway, TimeOracle};
use crate::types::Result;

/// Chain-anchored time oracle backed by the ledger collaborator.
///
/// Reports the timestamp of the latest block. This is the fallback of last
/// resort for time consensus: it is the one clock the unlock action can
/// actually enforce, so the engine guarantees one of these is always among
/// the queried sources.
pub struct LedgerClock {
    ledger: Arc<dyn LedgerGateway>,
    id: String,
}

impl LedgerClock {
    pub fn new(ledger: Arc<dyn LedgerGateway>) -> Self {
        Self {
            ledger,
            id: "ledger-clock".to_string(),
        }
    }
}

#[async_trait]
impl TimeOracle for LedgerClock {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn ledger_anchored(&self) -> bool {
        true
    }

    async fn now(&self) -> Result<u64> {
        Ok(self.ledger.chain_state().await?.timestamp)
    }
}
