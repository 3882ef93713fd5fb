//! Value transfer strategies
//!
//! A strategy moves one key, value and TTL, from the source to the
//! destination. Ordinary per-key failures come back as `Ok(false)`; only
//! transport failures are returned as errors, and they end the run.

mod classic;
mod snapshot;

pub use classic::Classic;
pub use snapshot::Snapshot;

use std::sync::Arc;

use bytes::Bytes;

use crate::capability::StrategyKind;
use crate::config::RunConfig;
use crate::error::Result;
use crate::notifier::Notifier;
use crate::store::{StoreClient, StoreError};

/// Strategy selected for a run
#[derive(Clone)]
pub enum TransferStrategy {
    /// Type-specific reads and writes
    Classic(Classic),
    /// `DUMP` / `RESTORE`
    Snapshot(Snapshot),
}

impl TransferStrategy {
    /// Build the strategy selected by negotiation
    pub fn new(
        kind: StrategyKind,
        source: Arc<dyn StoreClient>,
        destination: Arc<dyn StoreClient>,
        config: &RunConfig,
    ) -> Self {
        match kind {
            StrategyKind::Classic => {
                TransferStrategy::Classic(Classic::new(source, destination, config.pipeline))
            }
            StrategyKind::Snapshot => {
                TransferStrategy::Snapshot(Snapshot::new(source, destination))
            }
        }
    }

    /// Which variant this is
    pub fn kind(&self) -> StrategyKind {
        match self {
            TransferStrategy::Classic(_) => StrategyKind::Classic,
            TransferStrategy::Snapshot(_) => StrategyKind::Snapshot,
        }
    }

    /// Copy `key`; `Ok(false)` if this key could not be copied
    pub async fn copy(&self, key: &Bytes, notifier: &dyn Notifier) -> Result<bool> {
        match self {
            TransferStrategy::Classic(s) => s.copy(key, notifier).await,
            TransferStrategy::Snapshot(s) => s.copy(key, notifier).await,
        }
    }
}

impl std::fmt::Debug for TransferStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TransferStrategy({})", self.kind())
    }
}

/// Turn a command error into `Ok(false)`, keep transport errors fatal.
pub(crate) fn recover(key: &[u8], err: StoreError, notifier: &dyn Notifier) -> Result<bool> {
    if err.is_transport() {
        return Err(err.into());
    }
    tracing::debug!(key = %crate::store::quoted(key), error = %err, "copy failed");
    notifier.debug(&format!("ERROR: {}", err));
    Ok(false)
}
