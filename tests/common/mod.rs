//! Shared test utilities for ferrite-copy integration tests.
//!
//! Import via `mod common;` in integration test files:
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use ferrite_copy::{MemoryStore, MigrationDriver, RecordingNotifier, RunConfig, StoreClient, WriteOp};

// ============================================================================
// Store helpers
// ============================================================================

/// Source and destination stores with distinct identities.
#[allow(dead_code)]
pub fn store_pair() -> (Arc<MemoryStore>, Arc<MemoryStore>) {
    (
        Arc::new(MemoryStore::new("memory://source/0")),
        Arc::new(MemoryStore::new("memory://destination/0")),
    )
}

/// `SET key value`
#[allow(dead_code)]
pub async fn set(store: &MemoryStore, key: &str, value: &str) {
    store
        .execute(WriteOp::Set {
            key: Bytes::from(key.to_string()),
            value: Bytes::from(value.to_string()),
        })
        .await
        .expect("SET should succeed");
}

/// `RPUSH key elements...`
#[allow(dead_code)]
pub async fn rpush(store: &MemoryStore, key: &str, elements: &[&str]) {
    store
        .execute(WriteOp::RPush {
            key: Bytes::from(key.to_string()),
            elements: elements.iter().map(|e| Bytes::from(e.to_string())).collect(),
        })
        .await
        .expect("RPUSH should succeed");
}

/// `EXPIRE key secs`
#[allow(dead_code)]
pub async fn expire(store: &MemoryStore, key: &str, secs: u64) {
    store
        .execute(WriteOp::Expire {
            key: Bytes::from(key.to_string()),
            ttl: Duration::from_secs(secs),
        })
        .await
        .expect("EXPIRE should succeed");
}

// ============================================================================
// Driver helpers
// ============================================================================

/// Configuration for unattended runs.
#[allow(dead_code)]
pub fn unattended() -> RunConfig {
    RunConfig {
        prompt: false,
        ..Default::default()
    }
}

/// Build a seeded driver over two memory stores.
#[allow(dead_code)]
pub fn driver(
    source: &Arc<MemoryStore>,
    destination: &Arc<MemoryStore>,
    config: RunConfig,
    notifier: &Arc<RecordingNotifier>,
) -> MigrationDriver {
    MigrationDriver::new(source.clone(), destination.clone(), config, notifier.clone()).with_seed(42)
}
