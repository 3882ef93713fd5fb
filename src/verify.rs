//! Post-copy verification
//!
//! The verifier re-reads a key from both endpoints with the same
//! type-specific command and compares what came back. An error reply is
//! captured rather than raised, so two endpoints failing the same way still
//! compare equal.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::Result;
use crate::store::{quoted, read_value, KeyType, StoreClient, StoreError, StoreResult, Value};

/// Outcome of one read
#[derive(Debug, Clone, PartialEq)]
pub enum Captured<T> {
    /// The read returned
    Value(T),
    /// The server answered with an error; holds the error kind
    Raised(String),
}

impl<T> Captured<T> {
    /// Capture a read result; transport failures stay errors
    pub fn capture(result: StoreResult<T>) -> Result<Self> {
        match result {
            Ok(value) => Ok(Captured::Value(value)),
            Err(StoreError::Command(msg)) => Ok(Captured::Raised(error_kind(&msg))),
            Err(err) => Err(err.into()),
        }
    }
}

/// `"WRONGTYPE Operation against..."` -> `"WRONGTYPE"`
fn error_kind(message: &str) -> String {
    message
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Compares one key across source and destination
#[derive(Clone)]
pub struct Verifier {
    source: Arc<dyn StoreClient>,
    destination: Arc<dyn StoreClient>,
    ttl_tolerance: Duration,
}

impl Verifier {
    /// Create a verifier allowing `ttl_tolerance` of drift between the TTL reads
    pub fn new(
        source: Arc<dyn StoreClient>,
        destination: Arc<dyn StoreClient>,
        ttl_tolerance: Duration,
    ) -> Self {
        Self {
            source,
            destination,
            ttl_tolerance,
        }
    }

    /// True if `key` holds the same value, and TTL within tolerance, on both
    /// endpoints.
    pub async fn verify(&self, key: &[u8]) -> Result<bool> {
        let key_type = match Captured::capture(self.source.key_type(key).await)? {
            Captured::Value(t @ (KeyType::String
            | KeyType::List
            | KeyType::Set
            | KeyType::Hash
            | KeyType::SortedSet)) => t,
            other => {
                debug!(key = %quoted(key), source_type = ?other, "cannot verify key type");
                return Ok(false);
            }
        };

        let source_ttl = Captured::capture(self.source.ttl(key).await)?;
        let dest_ttl = Captured::capture(self.destination.ttl(key).await)?;
        let source_value = self.read(self.source.as_ref(), &key_type, key).await?;
        let dest_value = self.read(self.destination.as_ref(), &key_type, key).await?;

        let ttl_ok = match (&source_ttl, &dest_ttl) {
            (Captured::Value(a), Captured::Value(b)) => a.within(b, self.ttl_tolerance),
            (a, b) => a == b,
        };
        let value_ok = source_value == dest_value;

        if !(ttl_ok && value_ok) {
            debug!(
                key = %quoted(key),
                key_type = %key_type,
                ttl_ok,
                value_ok,
                ?source_ttl,
                ?dest_ttl,
                "verification mismatch"
            );
        }
        Ok(ttl_ok && value_ok)
    }

    async fn read(
        &self,
        client: &dyn StoreClient,
        key_type: &KeyType,
        key: &[u8],
    ) -> Result<Captured<Option<Value>>> {
        Captured::capture(read_value(client, key_type, key).await)
    }
}

/// Decide whether to verify one key.
///
/// `0` never verifies, `100` and above always does, anything between
/// verifies with probability `percent / 100`.
pub fn sample<R: Rng + ?Sized>(percent: u8, rng: &mut R) -> bool {
    match percent {
        0 => false,
        p if p >= 100 => true,
        p => rng.gen_range(0..100u8) < p,
    }
}
