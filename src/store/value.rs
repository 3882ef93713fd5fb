//! Decoded values and the type-dispatched reader

use std::collections::{HashMap, HashSet};

use bytes::Bytes;

use super::{KeyType, StoreClient, StoreResult};

/// A value read from an endpoint.
///
/// Comparison follows each type's natural semantics: sets and hashes are
/// unordered, lists and sorted sets are ordered.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// String value; `None` if the key vanished
    String(Option<Bytes>),
    /// List elements in order
    List(Vec<Bytes>),
    /// Set members
    Set(HashSet<Bytes>),
    /// Hash fields
    Hash(HashMap<Bytes, Bytes>),
    /// Sorted set as (member, score), ascending by score
    SortedSet(Vec<(Bytes, f64)>),
    /// Store-native serialized blob, never interpreted
    Opaque(Bytes),
}

impl Value {
    /// Number of elements (1 for strings and blobs)
    pub fn len(&self) -> usize {
        match self {
            Value::String(Some(_)) | Value::Opaque(_) => 1,
            Value::String(None) => 0,
            Value::List(items) => items.len(),
            Value::Set(members) => members.len(),
            Value::Hash(fields) => fields.len(),
            Value::SortedSet(entries) => entries.len(),
        }
    }

    /// True if the value holds no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read the whole value of `key` with the read primitive matching `key_type`.
///
/// Returns `Ok(None)` for types the engine does not decode.
pub async fn read_value(
    client: &dyn StoreClient,
    key_type: &KeyType,
    key: &[u8],
) -> StoreResult<Option<Value>> {
    let value = match key_type {
        KeyType::String => Value::String(client.get(key).await?),
        KeyType::List => Value::List(client.lrange_all(key).await?),
        KeyType::Set => Value::Set(client.smembers(key).await?.into_iter().collect()),
        KeyType::Hash => Value::Hash(client.hgetall(key).await?.into_iter().collect()),
        KeyType::SortedSet => Value::SortedSet(client.zrange_with_scores(key).await?),
        KeyType::None | KeyType::Other(_) => return Ok(None),
    };
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, WriteOp};

    #[test]
    fn test_set_equality_ignores_order() {
        let a = Value::Set([Bytes::from("x"), Bytes::from("y")].into_iter().collect());
        let b = Value::Set([Bytes::from("y"), Bytes::from("x")].into_iter().collect());
        assert_eq!(a, b);
    }

    #[test]
    fn test_list_equality_respects_order() {
        let a = Value::List(vec![Bytes::from("x"), Bytes::from("y")]);
        let b = Value::List(vec![Bytes::from("y"), Bytes::from("x")]);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_read_value_dispatches_by_type() {
        let store = MemoryStore::new("memory://test");
        store
            .execute(WriteOp::HSet {
                key: Bytes::from("h"),
                fields: vec![(Bytes::from("f"), Bytes::from("v"))],
            })
            .await
            .unwrap();

        let value = read_value(&store, &KeyType::Hash, b"h").await.unwrap();
        let expected: HashMap<Bytes, Bytes> =
            [(Bytes::from("f"), Bytes::from("v"))].into_iter().collect();
        assert_eq!(value, Some(Value::Hash(expected)));

        let unknown = read_value(&store, &KeyType::Other("stream".into()), b"h")
            .await
            .unwrap();
        assert!(unknown.is_none());
    }
}
