//! In-memory store client
//!
//! A single keyspace held in process, speaking the same [`StoreClient`]
//! contract as a live server. Keys iterate in byte order so enumeration is
//! deterministic. Unlike a Redis server, emptied collections are kept: an
//! empty list or set is a value in its own right.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use ordered_float::OrderedFloat;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{KeyType, StoreClient, StoreError, StoreResult, Ttl, WriteOp};
use crate::glob::glob_match;

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// Stored value
#[derive(Debug, Clone)]
enum Stored {
    String(Bytes),
    List(VecDeque<Bytes>),
    Set(HashSet<Bytes>),
    Hash(HashMap<Bytes, Bytes>),
    SortedSet(HashMap<Bytes, f64>),
    /// A type only the server understands (stream, module types)
    Foreign { type_name: String, payload: Bytes },
}

impl Stored {
    fn key_type(&self) -> KeyType {
        match self {
            Stored::String(_) => KeyType::String,
            Stored::List(_) => KeyType::List,
            Stored::Set(_) => KeyType::Set,
            Stored::Hash(_) => KeyType::Hash,
            Stored::SortedSet(_) => KeyType::SortedSet,
            Stored::Foreign { type_name, .. } => KeyType::Other(type_name.clone()),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Serialized form produced by `DUMP`
#[derive(Debug, Serialize, Deserialize)]
enum DumpPayload {
    String(Vec<u8>),
    List(Vec<Vec<u8>>),
    Set(Vec<Vec<u8>>),
    Hash(Vec<(Vec<u8>, Vec<u8>)>),
    SortedSet(Vec<(Vec<u8>, f64)>),
    Foreign(String, Vec<u8>),
}

impl DumpPayload {
    fn from_stored(value: &Stored) -> Self {
        match value {
            Stored::String(s) => DumpPayload::String(s.to_vec()),
            Stored::List(l) => DumpPayload::List(l.iter().map(|b| b.to_vec()).collect()),
            Stored::Set(s) => DumpPayload::Set(s.iter().map(|b| b.to_vec()).collect()),
            Stored::Hash(h) => DumpPayload::Hash(
                h.iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect(),
            ),
            Stored::SortedSet(z) => {
                DumpPayload::SortedSet(z.iter().map(|(m, s)| (m.to_vec(), *s)).collect())
            }
            Stored::Foreign { type_name, payload } => {
                DumpPayload::Foreign(type_name.clone(), payload.to_vec())
            }
        }
    }

    fn into_stored(self) -> Stored {
        match self {
            DumpPayload::String(s) => Stored::String(Bytes::from(s)),
            DumpPayload::List(l) => Stored::List(l.into_iter().map(Bytes::from).collect()),
            DumpPayload::Set(s) => Stored::Set(s.into_iter().map(Bytes::from).collect()),
            DumpPayload::Hash(h) => Stored::Hash(
                h.into_iter()
                    .map(|(k, v)| (Bytes::from(k), Bytes::from(v)))
                    .collect(),
            ),
            DumpPayload::SortedSet(z) => {
                Stored::SortedSet(z.into_iter().map(|(m, s)| (Bytes::from(m), s)).collect())
            }
            DumpPayload::Foreign(type_name, payload) => Stored::Foreign {
                type_name,
                payload: Bytes::from(payload),
            },
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<Bytes, Entry>,
    round_trips: u64,
}

impl Inner {
    /// Drop the entry if it has expired, then look it up.
    fn live(&mut self, key: &[u8]) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.entries.retain(|_, e| !e.is_expired(now));
    }

    /// Live entry for `key`, created with `fresh` if absent.
    fn slot(&mut self, key: &Bytes, fresh: impl FnOnce() -> Stored) -> &mut Entry {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
        self.entries.entry(key.clone()).or_insert_with(|| Entry {
            value: fresh(),
            expires_at: None,
        })
    }

    fn apply(&mut self, op: WriteOp) -> StoreResult<()> {
        match op {
            WriteOp::Set { key, value } => {
                self.entries.insert(
                    key,
                    Entry {
                        value: Stored::String(value),
                        expires_at: None,
                    },
                );
            }
            WriteOp::RPush { key, elements } => {
                match &mut self.slot(&key, || Stored::List(VecDeque::new())).value {
                    Stored::List(list) => list.extend(elements),
                    _ => return Err(StoreError::Command(WRONGTYPE.into())),
                }
            }
            WriteOp::LPush { key, elements } => {
                match &mut self.slot(&key, || Stored::List(VecDeque::new())).value {
                    Stored::List(list) => {
                        for e in elements {
                            list.push_front(e);
                        }
                    }
                    _ => return Err(StoreError::Command(WRONGTYPE.into())),
                }
            }
            WriteOp::LPop { key } => {
                if let Some(entry) = self.live(&key) {
                    match &mut entry.value {
                        Stored::List(list) => {
                            list.pop_front();
                        }
                        _ => return Err(StoreError::Command(WRONGTYPE.into())),
                    }
                }
            }
            WriteOp::SAdd { key, members } => {
                match &mut self.slot(&key, || Stored::Set(HashSet::new())).value {
                    Stored::Set(set) => set.extend(members),
                    _ => return Err(StoreError::Command(WRONGTYPE.into())),
                }
            }
            WriteOp::SRem { key, members } => {
                if let Some(entry) = self.live(&key) {
                    match &mut entry.value {
                        Stored::Set(set) => {
                            for m in &members {
                                set.remove(m);
                            }
                        }
                        _ => return Err(StoreError::Command(WRONGTYPE.into())),
                    }
                }
            }
            WriteOp::HSet { key, fields } => {
                match &mut self.slot(&key, || Stored::Hash(HashMap::new())).value {
                    Stored::Hash(hash) => hash.extend(fields),
                    _ => return Err(StoreError::Command(WRONGTYPE.into())),
                }
            }
            WriteOp::ZAdd { key, entries } => {
                match &mut self.slot(&key, || Stored::SortedSet(HashMap::new())).value {
                    Stored::SortedSet(zset) => {
                        for (score, member) in entries {
                            zset.insert(member, score);
                        }
                    }
                    _ => return Err(StoreError::Command(WRONGTYPE.into())),
                }
            }
            WriteOp::Expire { key, ttl } => {
                if let Some(entry) = self.live(&key) {
                    entry.expires_at = Some(Instant::now() + ttl);
                }
            }
            WriteOp::Restore {
                key,
                ttl_ms,
                payload,
            } => {
                if self.live(&key).is_some() {
                    return Err(StoreError::Command(
                        "BUSYKEY Target key name already exists.".into(),
                    ));
                }
                let decoded: DumpPayload = bincode::deserialize(&payload).map_err(|_| {
                    StoreError::Command("ERR DUMP payload version or checksum are wrong".into())
                })?;
                let expires_at =
                    (ttl_ms > 0).then(|| Instant::now() + Duration::from_millis(ttl_ms));
                self.entries.insert(
                    key,
                    Entry {
                        value: decoded.into_stored(),
                        expires_at,
                    },
                );
            }
        }
        Ok(())
    }
}

/// In-process keyspace implementing [`StoreClient`]
#[derive(Debug)]
pub struct MemoryStore {
    identity: String,
    version: String,
    cursor_scan: bool,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store reporting a current server version
    pub fn new(identity: impl Into<String>) -> Self {
        Self::with_version(identity, "7.2.4")
    }

    /// Create an empty store reporting the given server version
    pub fn with_version(identity: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            version: version.into(),
            cursor_scan: true,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Toggle client-side support for the cursor scan primitive
    pub fn set_cursor_scan_support(&mut self, supported: bool) {
        self.cursor_scan = supported;
    }

    /// Insert a value of a type the engine cannot decode
    pub fn insert_foreign(
        &self,
        key: impl Into<Bytes>,
        type_name: &str,
        payload: impl Into<Bytes>,
    ) {
        self.inner.lock().entries.insert(
            key.into(),
            Entry {
                value: Stored::Foreign {
                    type_name: type_name.to_string(),
                    payload: payload.into(),
                },
                expires_at: None,
            },
        );
    }

    /// Insert an empty list
    pub fn insert_empty_list(&self, key: impl Into<Bytes>) {
        self.insert_stored(key.into(), Stored::List(VecDeque::new()));
    }

    /// Insert an empty set
    pub fn insert_empty_set(&self, key: impl Into<Bytes>) {
        self.insert_stored(key.into(), Stored::Set(HashSet::new()));
    }

    fn insert_stored(&self, key: Bytes, value: Stored) {
        self.inner.lock().entries.insert(
            key,
            Entry {
                value,
                expires_at: None,
            },
        );
    }

    /// Whether `key` currently exists
    pub fn exists(&self, key: &[u8]) -> bool {
        self.inner.lock().live(key).is_some()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.purge_expired();
        inner.entries.len()
    }

    /// True if no live keys remain
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of write round trips served so far
    pub fn round_trips(&self) -> u64 {
        self.inner.lock().round_trips
    }

    /// Remove every key
    pub fn flush(&self) {
        self.inner.lock().entries.clear();
    }

    fn sorted_keys(&self, pattern: &str) -> Vec<Bytes> {
        let mut inner = self.inner.lock();
        inner.purge_expired();
        inner
            .entries
            .keys()
            .filter(|k| glob_match(pattern.as_bytes(), k))
            .cloned()
            .collect()
    }

    fn read<T>(
        &self,
        key: &[u8],
        f: impl FnOnce(&Stored) -> StoreResult<T>,
        missing: T,
    ) -> StoreResult<T> {
        let mut inner = self.inner.lock();
        match inner.live(key) {
            Some(entry) => f(&entry.value),
            None => Ok(missing),
        }
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn supports_cursor_scan(&self) -> bool {
        self.cursor_scan
    }

    fn supports_pipelining(&self) -> bool {
        true
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn server_version(&self) -> StoreResult<String> {
        Ok(self.version.clone())
    }

    async fn key_type(&self, key: &[u8]) -> StoreResult<KeyType> {
        self.read(key, |v| Ok(v.key_type()), KeyType::None)
    }

    async fn ttl(&self, key: &[u8]) -> StoreResult<Ttl> {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.live(key) else {
            return Ok(Ttl::None);
        };
        Ok(match entry.expires_at {
            None => Ttl::None,
            Some(at) => {
                let ms = at.saturating_duration_since(Instant::now()).as_millis() as i64;
                Ttl::from_secs_reply((ms + 500) / 1000)
            }
        })
    }

    async fn get(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        self.read(
            key,
            |v| match v {
                Stored::String(s) => Ok(Some(s.clone())),
                _ => Err(StoreError::Command(WRONGTYPE.into())),
            },
            None,
        )
    }

    async fn lrange_all(&self, key: &[u8]) -> StoreResult<Vec<Bytes>> {
        self.read(
            key,
            |v| match v {
                Stored::List(l) => Ok(l.iter().cloned().collect()),
                _ => Err(StoreError::Command(WRONGTYPE.into())),
            },
            Vec::new(),
        )
    }

    async fn smembers(&self, key: &[u8]) -> StoreResult<Vec<Bytes>> {
        self.read(
            key,
            |v| match v {
                Stored::Set(s) => Ok(s.iter().cloned().collect()),
                _ => Err(StoreError::Command(WRONGTYPE.into())),
            },
            Vec::new(),
        )
    }

    async fn hgetall(&self, key: &[u8]) -> StoreResult<Vec<(Bytes, Bytes)>> {
        self.read(
            key,
            |v| match v {
                Stored::Hash(h) => Ok(h.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
                _ => Err(StoreError::Command(WRONGTYPE.into())),
            },
            Vec::new(),
        )
    }

    async fn zrange_with_scores(&self, key: &[u8]) -> StoreResult<Vec<(Bytes, f64)>> {
        self.read(
            key,
            |v| match v {
                Stored::SortedSet(z) => {
                    let mut entries: Vec<(Bytes, f64)> =
                        z.iter().map(|(m, s)| (m.clone(), *s)).collect();
                    entries.sort_by(|a, b| {
                        (OrderedFloat(a.1), &a.0).cmp(&(OrderedFloat(b.1), &b.0))
                    });
                    Ok(entries)
                }
                _ => Err(StoreError::Command(WRONGTYPE.into())),
            },
            Vec::new(),
        )
    }

    async fn dump(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        self.read(
            key,
            |v| {
                bincode::serialize(&DumpPayload::from_stored(v))
                    .map(|b| Some(Bytes::from(b)))
                    .map_err(|e| StoreError::Command(format!("ERR {}", e)))
            },
            None,
        )
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<Bytes>> {
        Ok(self.sorted_keys(pattern))
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<(u64, Vec<Bytes>)> {
        // Cursor is a position in key order; COUNT bounds the keys visited,
        // not the keys returned, as on a real server.
        let all: Vec<Bytes> = {
            let mut inner = self.inner.lock();
            inner.purge_expired();
            inner.entries.keys().cloned().collect()
        };
        let start = (cursor as usize).min(all.len());
        let end = start.saturating_add(count.max(1)).min(all.len());
        let batch = all[start..end]
            .iter()
            .filter(|k| glob_match(pattern.as_bytes(), k))
            .cloned()
            .collect();
        let next = if end >= all.len() { 0 } else { end as u64 };
        trace!(cursor, next, "memory scan");
        Ok((next, batch))
    }

    async fn dbsize(&self) -> StoreResult<u64> {
        Ok(self.len() as u64)
    }

    async fn random_key(&self) -> StoreResult<Option<Bytes>> {
        let mut inner = self.inner.lock();
        inner.purge_expired();
        if inner.entries.is_empty() {
            return Ok(None);
        }
        let idx = rand::thread_rng().gen_range(0..inner.entries.len());
        Ok(inner.entries.keys().nth(idx).cloned())
    }

    async fn execute(&self, op: WriteOp) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.round_trips += 1;
        inner.apply(op)
    }

    async fn pipeline(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.round_trips += 1;
        for op in ops {
            inner.apply(op)?;
        }
        Ok(())
    }
}
