//! Type-aware copy using each type's own read and write commands

use std::sync::Arc;

use bytes::Bytes;
use tracing::warn;

use super::recover;
use crate::error::Result;
use crate::notifier::Notifier;
use crate::store::{quoted, read_value, KeyType, StoreClient, StoreResult, Ttl, Value, WriteOp};

/// Pushed and immediately removed to leave an empty collection behind
const SENTINEL: Bytes = Bytes::from_static(b"");

/// Reads the value by type and rewrites it element by element
#[derive(Clone)]
pub struct Classic {
    source: Arc<dyn StoreClient>,
    destination: Arc<dyn StoreClient>,
    pipeline: bool,
}

enum Outcome {
    Copied,
    Gone,
    Unknown(String),
}

impl Classic {
    /// Create a classic strategy. Writes for one key are pipelined when
    /// `pipeline` is set and the destination client supports it.
    pub fn new(
        source: Arc<dyn StoreClient>,
        destination: Arc<dyn StoreClient>,
        pipeline: bool,
    ) -> Self {
        let pipeline = pipeline && destination.supports_pipelining();
        Self {
            source,
            destination,
            pipeline,
        }
    }

    /// Whether writes are grouped into one round trip per key
    pub fn pipelined(&self) -> bool {
        self.pipeline
    }

    pub(super) async fn copy(&self, key: &Bytes, notifier: &dyn Notifier) -> Result<bool> {
        notifier.debug(&format!("COPY: {}", quoted(key)));
        match self.transfer(key).await {
            Ok(Outcome::Copied) => Ok(true),
            Ok(Outcome::Gone) => {
                warn!(key = %quoted(key), "key disappeared before it could be copied");
                notifier.debug(&format!("GONE: {}", quoted(key)));
                Ok(false)
            }
            Ok(Outcome::Unknown(type_name)) => {
                warn!(key = %quoted(key), key_type = %type_name, "unsupported key type");
                notifier.debug(&format!("UNKNOWN({}): {}", type_name, quoted(key)));
                Ok(false)
            }
            Err(err) => recover(key, err, notifier),
        }
    }

    async fn transfer(&self, key: &Bytes) -> StoreResult<Outcome> {
        let key_type = self.source.key_type(key).await?;
        // TTL first so a key expiring mid-copy never outlives its source
        let ttl = self.source.ttl(key).await?;

        let value = match read_value(self.source.as_ref(), &key_type, key).await? {
            Some(value) => value,
            None => {
                return Ok(match key_type {
                    KeyType::Other(name) => Outcome::Unknown(name),
                    _ => Outcome::Gone,
                })
            }
        };

        let Some(ops) = writes_for(key, value) else {
            return Ok(Outcome::Gone);
        };
        self.write(ops).await?;

        if let Ttl::Remaining(ttl) = ttl {
            self.destination
                .execute(WriteOp::Expire {
                    key: key.clone(),
                    ttl,
                })
                .await?;
        }
        Ok(Outcome::Copied)
    }

    async fn write(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        if self.pipeline {
            return self.destination.pipeline(ops).await;
        }
        for op in ops {
            self.destination.execute(op).await?;
        }
        Ok(())
    }
}

/// Destination writes recreating `value`, or `None` if the value is an
/// empty string or map, which only happens when the key vanished mid-read.
fn writes_for(key: &Bytes, value: Value) -> Option<Vec<WriteOp>> {
    let key = key.clone();
    let ops = match value {
        Value::String(None) => return None,
        Value::String(Some(value)) => vec![WriteOp::Set { key, value }],
        Value::List(items) if items.is_empty() => vec![
            WriteOp::LPush {
                key: key.clone(),
                elements: vec![SENTINEL],
            },
            WriteOp::LPop { key },
        ],
        Value::List(items) => items
            .into_iter()
            .map(|item| WriteOp::RPush {
                key: key.clone(),
                elements: vec![item],
            })
            .collect(),
        Value::Set(members) if members.is_empty() => vec![
            WriteOp::SAdd {
                key: key.clone(),
                members: vec![SENTINEL],
            },
            WriteOp::SRem {
                key,
                members: vec![SENTINEL],
            },
        ],
        Value::Set(members) => members
            .into_iter()
            .map(|member| WriteOp::SAdd {
                key: key.clone(),
                members: vec![member],
            })
            .collect(),
        Value::Hash(fields) if fields.is_empty() => return None,
        Value::Hash(fields) => vec![WriteOp::HSet {
            key,
            fields: fields.into_iter().collect(),
        }],
        Value::SortedSet(entries) if entries.is_empty() => return None,
        Value::SortedSet(entries) => vec![WriteOp::ZAdd {
            key,
            entries: entries
                .into_iter()
                .map(|(member, score)| (score, member))
                .collect(),
        }],
        Value::Opaque(_) => return None,
    };
    Some(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::notifier::RecordingNotifier;
    use crate::store::MemoryStore;

    fn pair() -> (Arc<MemoryStore>, Arc<MemoryStore>) {
        (
            Arc::new(MemoryStore::new("memory://src")),
            Arc::new(MemoryStore::new("memory://dst")),
        )
    }

    fn classic(src: &Arc<MemoryStore>, dst: &Arc<MemoryStore>, pipeline: bool) -> Classic {
        Classic::new(src.clone(), dst.clone(), pipeline)
    }

    #[tokio::test]
    async fn test_copies_list_in_order_with_ttl() {
        let (src, dst) = pair();
        src.execute(WriteOp::RPush {
            key: Bytes::from("b"),
            elements: vec![Bytes::from("x"), Bytes::from("y")],
        })
        .await
        .unwrap();
        src.execute(WriteOp::Expire {
            key: Bytes::from("b"),
            ttl: Duration::from_secs(50),
        })
        .await
        .unwrap();

        let notifier = RecordingNotifier::new();
        let strategy = classic(&src, &dst, true);
        assert!(strategy.copy(&Bytes::from("b"), &notifier).await.unwrap());

        assert_eq!(
            dst.lrange_all(b"b").await.unwrap(),
            vec![Bytes::from("x"), Bytes::from("y")]
        );
        let ttl = dst.ttl(b"b").await.unwrap();
        assert!(ttl.within(&Ttl::Remaining(Duration::from_secs(50)), Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_pipelining_uses_one_round_trip_for_values() {
        let (src, dst) = pair();
        src.execute(WriteOp::RPush {
            key: Bytes::from("l"),
            elements: (0..10).map(|i| Bytes::from(i.to_string())).collect(),
        })
        .await
        .unwrap();
        let notifier = RecordingNotifier::new();

        assert!(classic(&src, &dst, true)
            .copy(&Bytes::from("l"), &notifier)
            .await
            .unwrap());
        assert_eq!(dst.round_trips(), 1);

        dst.flush();
        let before = dst.round_trips();
        assert!(classic(&src, &dst, false)
            .copy(&Bytes::from("l"), &notifier)
            .await
            .unwrap());
        assert_eq!(dst.round_trips() - before, 10);
        assert_eq!(dst.lrange_all(b"l").await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_empty_collections_exist_on_destination() {
        let (src, dst) = pair();
        src.insert_empty_list("el");
        src.insert_empty_set("es");
        let notifier = RecordingNotifier::new();
        let strategy = classic(&src, &dst, true);

        assert!(strategy.copy(&Bytes::from("el"), &notifier).await.unwrap());
        assert!(strategy.copy(&Bytes::from("es"), &notifier).await.unwrap());

        assert!(dst.exists(b"el"));
        assert!(dst.exists(b"es"));
        assert_eq!(dst.key_type(b"el").await.unwrap(), KeyType::List);
        assert_eq!(dst.key_type(b"es").await.unwrap(), KeyType::Set);
        assert!(dst.lrange_all(b"el").await.unwrap().is_empty());
        assert!(dst.smembers(b"es").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sorted_set_scores_survive() {
        let (src, dst) = pair();
        src.execute(WriteOp::ZAdd {
            key: Bytes::from("z"),
            entries: vec![(2.5, Bytes::from("b")), (-1.0, Bytes::from("a"))],
        })
        .await
        .unwrap();
        let notifier = RecordingNotifier::new();
        assert!(classic(&src, &dst, true)
            .copy(&Bytes::from("z"), &notifier)
            .await
            .unwrap());
        assert_eq!(
            dst.zrange_with_scores(b"z").await.unwrap(),
            vec![(Bytes::from("a"), -1.0), (Bytes::from("b"), 2.5)]
        );
        assert_eq!(dst.ttl(b"z").await.unwrap(), Ttl::None);
    }

    #[tokio::test]
    async fn test_missing_key_is_gone() {
        let (src, dst) = pair();
        let notifier = RecordingNotifier::new().with_debug();
        assert!(!classic(&src, &dst, true)
            .copy(&Bytes::from("nope"), &notifier)
            .await
            .unwrap());
        assert!(dst.is_empty());
        assert!(notifier
            .debug_lines()
            .iter()
            .any(|l| l.starts_with("GONE:")));
    }

    #[tokio::test]
    async fn test_unknown_type_writes_nothing() {
        let (src, dst) = pair();
        src.insert_foreign("s", "stream", "opaque");
        let notifier = RecordingNotifier::new().with_debug();
        assert!(!classic(&src, &dst, true)
            .copy(&Bytes::from("s"), &notifier)
            .await
            .unwrap());
        assert!(dst.is_empty());
        assert_eq!(dst.round_trips(), 0);
        assert!(notifier
            .debug_lines()
            .iter()
            .any(|l| l.starts_with("UNKNOWN(stream):")));
    }

    #[tokio::test]
    async fn test_wrong_type_on_destination_is_a_failure() {
        let (src, dst) = pair();
        src.execute(WriteOp::SAdd {
            key: Bytes::from("k"),
            members: vec![Bytes::from("m")],
        })
        .await
        .unwrap();
        dst.execute(WriteOp::Set {
            key: Bytes::from("k"),
            value: Bytes::from("v"),
        })
        .await
        .unwrap();
        let notifier = RecordingNotifier::new();
        assert!(!classic(&src, &dst, true)
            .copy(&Bytes::from("k"), &notifier)
            .await
            .unwrap());
    }
}
