//! Property-based tests for the copy -> verify round trip
//!
//! Every supported value type, with and without a TTL, must verify as equal
//! after being copied by either transfer strategy.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use proptest::prelude::*;

use ferrite_copy::{
    MemoryStore, RecordingNotifier, RunConfig, StoreClient, StrategyKind, TransferStrategy,
    Verifier, WriteOp,
};

// ============================================================================
// Test Strategies
// ============================================================================

#[derive(Debug, Clone)]
enum Sample {
    String(Vec<u8>),
    List(Vec<Vec<u8>>),
    Set(HashSet<Vec<u8>>),
    Hash(HashMap<Vec<u8>, Vec<u8>>),
    SortedSet(HashMap<Vec<u8>, i32>),
}

fn bytes_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..32)
}

fn sample_strategy() -> impl Strategy<Value = Sample> {
    prop_oneof![
        bytes_strategy().prop_map(Sample::String),
        prop::collection::vec(bytes_strategy(), 0..16).prop_map(Sample::List),
        prop::collection::hash_set(bytes_strategy(), 0..16).prop_map(Sample::Set),
        prop::collection::hash_map(bytes_strategy(), bytes_strategy(), 1..16)
            .prop_map(Sample::Hash),
        prop::collection::hash_map(bytes_strategy(), any::<i32>(), 1..16)
            .prop_map(Sample::SortedSet),
    ]
}

fn ttl_strategy() -> impl Strategy<Value = Option<u64>> {
    prop_oneof![Just(None), (1u64..100_000).prop_map(Some)]
}

fn kind_strategy() -> impl Strategy<Value = StrategyKind> {
    prop_oneof![Just(StrategyKind::Classic), Just(StrategyKind::Snapshot)]
}

fn to_bytes(items: impl IntoIterator<Item = Vec<u8>>) -> Vec<Bytes> {
    items.into_iter().map(Bytes::from).collect()
}

async fn load(store: &MemoryStore, key: &Bytes, sample: Sample, ttl: Option<u64>) {
    let key = key.clone();
    match sample {
        Sample::String(value) => {
            let op = WriteOp::Set {
                key: key.clone(),
                value: Bytes::from(value),
            };
            store.execute(op).await.unwrap();
        }
        Sample::List(items) if items.is_empty() => store.insert_empty_list(key.clone()),
        Sample::List(items) => {
            let op = WriteOp::RPush {
                key: key.clone(),
                elements: to_bytes(items),
            };
            store.execute(op).await.unwrap();
        }
        Sample::Set(members) if members.is_empty() => store.insert_empty_set(key.clone()),
        Sample::Set(members) => {
            let op = WriteOp::SAdd {
                key: key.clone(),
                members: to_bytes(members),
            };
            store.execute(op).await.unwrap();
        }
        Sample::Hash(fields) => {
            let op = WriteOp::HSet {
                key: key.clone(),
                fields: fields
                    .into_iter()
                    .map(|(f, v)| (Bytes::from(f), Bytes::from(v)))
                    .collect(),
            };
            store.execute(op).await.unwrap();
        }
        Sample::SortedSet(entries) => {
            let op = WriteOp::ZAdd {
                key: key.clone(),
                entries: entries
                    .into_iter()
                    .map(|(member, score)| (score as f64 / 8.0, Bytes::from(member)))
                    .collect(),
            };
            store.execute(op).await.unwrap();
        }
    }
    if let Some(secs) = ttl {
        let op = WriteOp::Expire {
            key,
            ttl: Duration::from_secs(secs),
        };
        store.execute(op).await.unwrap();
    }
}

// ============================================================================
// Round-trip Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Property: a copied key always verifies
    #[test]
    fn prop_copy_then_verify(
        key in bytes_strategy().prop_filter("non-empty key", |k| !k.is_empty()),
        sample in sample_strategy(),
        ttl in ttl_strategy(),
        kind in kind_strategy(),
        pipeline in any::<bool>(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (copied, verified, dst_ttl) = runtime.block_on(async {
            let src = Arc::new(MemoryStore::new("memory://source"));
            let dst = Arc::new(MemoryStore::new("memory://destination"));
            let key = Bytes::from(key);
            load(&src, &key, sample, ttl).await;

            let config = RunConfig { pipeline, ..Default::default() };
            let strategy = TransferStrategy::new(kind, src.clone(), dst.clone(), &config);
            let verifier = Verifier::new(src.clone(), dst.clone(), Duration::from_secs(1));
            let notifier = RecordingNotifier::new();

            let copied = strategy.copy(&key, &notifier).await.unwrap();
            let verified = verifier.verify(&key).await.unwrap();
            let dst_ttl = dst.ttl(&key).await.unwrap().as_secs();
            (copied, verified, dst_ttl)
        });

        prop_assert!(copied);
        prop_assert!(verified);
        match ttl {
            None => prop_assert_eq!(dst_ttl, None),
            Some(secs) => {
                let got = dst_ttl.unwrap_or(0);
                prop_assert!(got.abs_diff(secs) <= 1, "ttl {} became {}", secs, got);
            }
        }
    }
}
