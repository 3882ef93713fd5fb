//! Key enumeration
//!
//! A [`KeyEmitter`] turns the source keyspace into a [`KeyStream`] of keys
//! matching the run's pattern. The full scan fetches everything in one
//! blocking call; the cursor scan walks the keyspace in batches.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use crate::capability::EmitterKind;
use crate::config::RunConfig;
use crate::error::{CopyError, Result};
use crate::notifier::Notifier;
use crate::store::StoreClient;

/// Enumerates the keys of a source endpoint
#[derive(Debug, Clone)]
pub enum KeyEmitter {
    /// One `KEYS pattern` call
    FullScan {
        /// Key pattern
        pattern: String,
        /// Source size at which the operator must confirm
        confirm_threshold: u64,
    },
    /// Repeated `SCAN cursor MATCH pattern COUNT batch_size` calls
    CursorScan {
        /// Key pattern
        pattern: String,
        /// Keys requested per call
        batch_size: usize,
    },
}

impl KeyEmitter {
    /// Build the emitter selected by negotiation
    pub fn new(kind: EmitterKind, config: &RunConfig) -> Self {
        match kind {
            EmitterKind::FullScan => KeyEmitter::FullScan {
                pattern: config.pattern.clone(),
                confirm_threshold: config.full_scan_confirm_threshold,
            },
            EmitterKind::CursorScan => KeyEmitter::CursorScan {
                pattern: config.pattern.clone(),
                batch_size: config.scan_batch_size,
            },
        }
    }

    /// Which variant this is
    pub fn kind(&self) -> EmitterKind {
        match self {
            KeyEmitter::FullScan { .. } => EmitterKind::FullScan,
            KeyEmitter::CursorScan { .. } => EmitterKind::CursorScan,
        }
    }

    /// Start enumerating `source`.
    ///
    /// A full scan over a large source blocks the server for the whole
    /// listing, so above the confirmation threshold the operator has to
    /// approve it first. Declining yields [`CopyError::Aborted`].
    pub async fn keys(
        &self,
        source: Arc<dyn StoreClient>,
        notifier: &dyn Notifier,
    ) -> Result<KeyStream> {
        match self {
            KeyEmitter::FullScan {
                pattern,
                confirm_threshold,
            } => {
                let dbsize = source.dbsize().await?;
                if dbsize >= *confirm_threshold {
                    let prompt = format!(
                        "WARNING: the {} key emitter lists every key with one blocking \
                         KEYS call, and you have {} keys in your source DB. KEYS can \
                         stall a large production server for the whole listing.",
                        self.kind(),
                        with_separators(dbsize)
                    );
                    if !notifier.confirm(&prompt).await {
                        return Err(CopyError::Aborted(
                            "full key scan declined".to_string(),
                        ));
                    }
                }
                notifier.debug(&format!("{} KEYS {}", source.identity(), pattern));
                Ok(KeyStream::new(source, pattern.clone(), Paging::Full))
            }
            KeyEmitter::CursorScan {
                pattern,
                batch_size,
            } => Ok(KeyStream::new(
                source,
                pattern.clone(),
                Paging::Cursor {
                    batch_size: *batch_size,
                },
            )),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Paging {
    Full,
    Cursor { batch_size: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Start,
    At(u64),
    Exhausted,
}

/// Lazily fetched sequence of keys
///
/// Keys are requested from the source only when the buffer runs dry. A
/// cursor scan may repeat a key if the keyspace changes mid-walk.
pub struct KeyStream {
    source: Arc<dyn StoreClient>,
    pattern: String,
    paging: Paging,
    position: Position,
    buffer: VecDeque<Bytes>,
    batches: u64,
}

impl KeyStream {
    fn new(source: Arc<dyn StoreClient>, pattern: String, paging: Paging) -> Self {
        Self {
            source,
            pattern,
            paging,
            position: Position::Start,
            buffer: VecDeque::new(),
            batches: 0,
        }
    }

    /// Next key, or `None` once the keyspace is exhausted
    pub async fn next_key(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(key) = self.buffer.pop_front() {
                return Ok(Some(key));
            }
            if !self.fetch().await? {
                return Ok(None);
            }
        }
    }

    /// Number of listing calls issued so far
    pub fn batches(&self) -> u64 {
        self.batches
    }

    /// Fill the buffer; false once there is nothing left to request.
    async fn fetch(&mut self) -> Result<bool> {
        let cursor = match self.position {
            Position::Exhausted => return Ok(false),
            Position::Start => 0,
            Position::At(cursor) => cursor,
        };
        self.batches += 1;

        match self.paging {
            Paging::Full => {
                let keys = self.source.keys(&self.pattern).await?;
                info!(keys = keys.len(), pattern = %self.pattern, "listed source keys");
                self.buffer.extend(keys);
                self.position = Position::Exhausted;
            }
            Paging::Cursor { batch_size } => {
                let (next, keys) = self
                    .source
                    .scan(cursor, &self.pattern, batch_size)
                    .await?;
                debug!(cursor, next, keys = keys.len(), "scanned batch");
                self.buffer.extend(keys);
                self.position = if next == 0 {
                    Position::Exhausted
                } else {
                    Position::At(next)
                };
            }
        }
        Ok(true)
    }
}

impl std::fmt::Debug for KeyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStream")
            .field("source", &self.source.identity())
            .field("pattern", &self.pattern)
            .field("position", &self.position)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

/// `1234567` -> `"1,234,567"`
pub fn with_separators(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::RecordingNotifier;
    use crate::store::{MemoryStore, WriteOp};

    async fn seeded(count: usize) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new("memory://source"));
        let ops = (0..count)
            .map(|i| WriteOp::Set {
                key: Bytes::from(format!("key:{:05}", i)),
                value: Bytes::from_static(b"v"),
            })
            .collect();
        store.pipeline(ops).await.unwrap();
        store
    }

    async fn drain(stream: &mut KeyStream) -> Vec<Bytes> {
        let mut keys = Vec::new();
        while let Some(key) = stream.next_key().await.unwrap() {
            keys.push(key);
        }
        keys
    }

    fn config(pattern: &str) -> RunConfig {
        RunConfig {
            pattern: pattern.to_string(),
            scan_batch_size: 7,
            full_scan_confirm_threshold: 50,
            ..Default::default()
        }
    }

    #[test]
    fn test_with_separators() {
        assert_eq!(with_separators(0), "0");
        assert_eq!(with_separators(999), "999");
        assert_eq!(with_separators(10_000), "10,000");
        assert_eq!(with_separators(1_234_567), "1,234,567");
    }

    #[tokio::test]
    async fn test_full_scan_under_threshold_needs_no_confirmation() {
        let store = seeded(20).await;
        let notifier = RecordingNotifier::with_answers([false]);
        let emitter = KeyEmitter::new(EmitterKind::FullScan, &config("*"));
        let mut stream = emitter.keys(store, &notifier).await.unwrap();
        assert_eq!(drain(&mut stream).await.len(), 20);
        assert_eq!(stream.batches(), 1);
        assert!(notifier.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_full_scan_over_threshold_asks() {
        let store = seeded(50).await;
        let notifier = RecordingNotifier::with_answers([true]);
        let emitter = KeyEmitter::new(EmitterKind::FullScan, &config("*"));
        let mut stream = emitter.keys(store, &notifier).await.unwrap();
        assert_eq!(drain(&mut stream).await.len(), 50);
        let prompts = notifier.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("50 keys"));
    }

    #[tokio::test]
    async fn test_full_scan_declined() {
        let store = seeded(60).await;
        let notifier = RecordingNotifier::with_answers([false]);
        let emitter = KeyEmitter::new(EmitterKind::FullScan, &config("*"));
        let err = emitter.keys(store, &notifier).await.unwrap_err();
        assert!(matches!(err, CopyError::Aborted(_)));
    }

    #[tokio::test]
    async fn test_cursor_scan_walks_every_batch() {
        let store = seeded(30).await;
        let notifier = RecordingNotifier::new();
        let emitter = KeyEmitter::new(EmitterKind::CursorScan, &config("*"));
        let mut stream = emitter.keys(store, &notifier).await.unwrap();
        let keys = drain(&mut stream).await;
        assert_eq!(keys.len(), 30);
        assert_eq!(keys[0], Bytes::from("key:00000"));
        assert_eq!(stream.batches(), 5);
        assert!(stream.next_key().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cursor_scan_filters_by_pattern() {
        let store = seeded(30).await;
        let notifier = RecordingNotifier::new();
        let emitter = KeyEmitter::new(EmitterKind::CursorScan, &config("key:0001?"));
        let mut stream = emitter.keys(store, &notifier).await.unwrap();
        let keys = drain(&mut stream).await;
        assert_eq!(keys.len(), 10);
        assert!(keys.iter().all(|k| k.starts_with(b"key:0001")));
    }

    #[tokio::test]
    async fn test_empty_source() {
        let store = Arc::new(MemoryStore::new("memory://empty"));
        let notifier = RecordingNotifier::new();
        for kind in [EmitterKind::FullScan, EmitterKind::CursorScan] {
            let emitter = KeyEmitter::new(kind, &config("*"));
            let mut stream = emitter.keys(store.clone(), &notifier).await.unwrap();
            assert!(stream.next_key().await.unwrap().is_none());
        }
    }
}
