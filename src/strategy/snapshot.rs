//! Opaque copy with `DUMP` and `RESTORE`

use std::sync::Arc;

use bytes::Bytes;
use tracing::warn;

use super::recover;
use crate::error::Result;
use crate::notifier::Notifier;
use crate::store::{quoted, StoreClient, WriteOp};

/// Moves the store-native serialization of each value verbatim
#[derive(Clone)]
pub struct Snapshot {
    source: Arc<dyn StoreClient>,
    destination: Arc<dyn StoreClient>,
}

impl Snapshot {
    /// Create a snapshot strategy
    pub fn new(source: Arc<dyn StoreClient>, destination: Arc<dyn StoreClient>) -> Self {
        Self {
            source,
            destination,
        }
    }

    pub(super) async fn copy(&self, key: &Bytes, notifier: &dyn Notifier) -> Result<bool> {
        notifier.debug(&format!("COPY: {}", quoted(key)));

        let ttl = match self.source.ttl(key).await {
            Ok(ttl) => ttl,
            Err(err) => return recover(key, err, notifier),
        };
        let payload = match self.source.dump(key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                warn!(key = %quoted(key), "key disappeared before it could be copied");
                notifier.debug(&format!("GONE: {}", quoted(key)));
                return Ok(false);
            }
            Err(err) => return recover(key, err, notifier),
        };

        let restore = WriteOp::Restore {
            key: key.clone(),
            ttl_ms: ttl.as_restore_millis(),
            payload,
        };
        match self.destination.execute(restore).await {
            Ok(()) => Ok(true),
            Err(err) => recover(key, err, notifier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::notifier::RecordingNotifier;
    use crate::store::{KeyType, MemoryStore, Ttl};

    fn pair() -> (Arc<MemoryStore>, Arc<MemoryStore>) {
        (
            Arc::new(MemoryStore::new("memory://src")),
            Arc::new(MemoryStore::new("memory://dst")),
        )
    }

    #[tokio::test]
    async fn test_restores_value_and_ttl() {
        let (src, dst) = pair();
        src.execute(WriteOp::HSet {
            key: Bytes::from("h"),
            fields: vec![(Bytes::from("f"), Bytes::from("v"))],
        })
        .await
        .unwrap();
        src.execute(WriteOp::Expire {
            key: Bytes::from("h"),
            ttl: Duration::from_secs(30),
        })
        .await
        .unwrap();

        let notifier = RecordingNotifier::new();
        let strategy = Snapshot::new(src.clone(), dst.clone());
        assert!(strategy.copy(&Bytes::from("h"), &notifier).await.unwrap());

        assert_eq!(
            dst.hgetall(b"h").await.unwrap(),
            vec![(Bytes::from("f"), Bytes::from("v"))]
        );
        assert!(dst
            .ttl(b"h")
            .await
            .unwrap()
            .within(&Ttl::Remaining(Duration::from_secs(30)), Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_moves_foreign_types() {
        let (src, dst) = pair();
        src.insert_foreign("s", "stream", "entries");
        let notifier = RecordingNotifier::new();
        let strategy = Snapshot::new(src.clone(), dst.clone());
        assert!(strategy.copy(&Bytes::from("s"), &notifier).await.unwrap());
        assert_eq!(
            dst.key_type(b"s").await.unwrap(),
            KeyType::Other("stream".to_string())
        );
        assert_eq!(dst.ttl(b"s").await.unwrap(), Ttl::None);
    }

    #[tokio::test]
    async fn test_existing_destination_key_is_a_failure() {
        let (src, dst) = pair();
        for store in [&src, &dst] {
            store
                .execute(WriteOp::Set {
                    key: Bytes::from("k"),
                    value: Bytes::from("v"),
                })
                .await
                .unwrap();
        }
        let notifier = RecordingNotifier::new().with_debug();
        let strategy = Snapshot::new(src.clone(), dst.clone());
        assert!(!strategy.copy(&Bytes::from("k"), &notifier).await.unwrap());
        assert!(notifier
            .debug_lines()
            .iter()
            .any(|l| l.starts_with("ERROR: ") && l.contains("BUSYKEY")));
    }

    #[tokio::test]
    async fn test_missing_key_is_a_failure() {
        let (src, dst) = pair();
        let notifier = RecordingNotifier::new();
        let strategy = Snapshot::new(src.clone(), dst.clone());
        assert!(!strategy.copy(&Bytes::from("nope"), &notifier).await.unwrap());
        assert!(dst.is_empty());
    }
}
