//! Capability profiles and negotiation
//!
//! Each endpoint is probed once at startup. The resulting
//! [`CapabilityProfile`] decides which key emitter and transfer strategy a
//! run may use; nothing re-queries the server afterwards.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{EmitterChoice, StrategyChoice};
use crate::error::{CopyError, Result};
use crate::store::{StoreClient, StoreResult};

/// First server version exposing `SCAN` (2.8 release candidates)
pub const CURSOR_SCAN_MIN_VERSION: ServerVersion = ServerVersion::new(2, 7, 105);

/// First server version exposing `DUMP` and `RESTORE`
pub const SNAPSHOT_MIN_VERSION: ServerVersion = ServerVersion::new(2, 6, 0);

/// Dotted server version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServerVersion {
    /// Major component
    pub major: u32,
    /// Minor component
    pub minor: u32,
    /// Patch component
    pub patch: u32,
}

impl ServerVersion {
    /// Build a version from its components
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse `"7.2.4"`, `"2.8"`, `"7.0.0-rc1"`. Missing components are zero,
    /// trailing non-digits in a component are ignored.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.trim().split('.').map(|part| {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u32>().ok()
        });
        let major = parts.next().flatten()?;
        let minor = parts.next().flatten().unwrap_or(0);
        let patch = parts.next().flatten().unwrap_or(0);
        Some(Self::new(major, minor, patch))
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Facts about one endpoint, gathered once per run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityProfile {
    /// Connection identity of the endpoint
    pub identity: String,
    /// Server version, if it could be parsed
    pub version: Option<ServerVersion>,
    /// `SCAN` is usable
    pub cursor_scan: bool,
    /// `DUMP` / `RESTORE` are usable
    pub snapshot: bool,
}

impl CapabilityProfile {
    /// Derive a profile from a version string and client support flags
    pub fn from_version(identity: impl Into<String>, version: &str, client_scan: bool) -> Self {
        let version = ServerVersion::parse(version);
        let at_least = |min: ServerVersion| version.is_some_and(|v| v >= min);
        Self {
            identity: identity.into(),
            version,
            cursor_scan: client_scan && at_least(CURSOR_SCAN_MIN_VERSION),
            snapshot: at_least(SNAPSHOT_MIN_VERSION),
        }
    }

    /// Probe a live endpoint
    pub async fn probe(client: &dyn StoreClient) -> StoreResult<Self> {
        client.ping().await?;
        let version = client.server_version().await?;
        let profile =
            Self::from_version(client.identity(), &version, client.supports_cursor_scan());
        debug!(
            endpoint = %profile.identity,
            version = %version,
            cursor_scan = profile.cursor_scan,
            snapshot = profile.snapshot,
            "probed endpoint"
        );
        Ok(profile)
    }
}

/// Key emitter selected for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmitterKind {
    /// Single blocking `KEYS pattern`
    FullScan,
    /// Incremental `SCAN`
    CursorScan,
}

impl fmt::Display for EmitterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EmitterKind::FullScan => "Full scan (KEYS)",
            EmitterKind::CursorScan => "Cursor scan (SCAN)",
        })
    }
}

/// Transfer strategy selected for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Type-specific reads and writes
    Classic,
    /// `DUMP` / `RESTORE`
    Snapshot,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StrategyKind::Classic => "Classic",
            StrategyKind::Snapshot => "Snapshot (DUMP/RESTORE)",
        })
    }
}

/// Pick the key emitter for `source`.
///
/// `auto` prefers the cursor scan; asking for it explicitly on an endpoint
/// that lacks it is a configuration error.
pub fn negotiate_emitter(
    choice: EmitterChoice,
    source: &CapabilityProfile,
) -> Result<EmitterKind> {
    match choice {
        EmitterChoice::Auto if source.cursor_scan => Ok(EmitterKind::CursorScan),
        EmitterChoice::Auto | EmitterChoice::FullScan => Ok(EmitterKind::FullScan),
        EmitterChoice::CursorScan if source.cursor_scan => Ok(EmitterKind::CursorScan),
        EmitterChoice::CursorScan => Err(CopyError::Config(format!(
            "cursor-scan key emitter is not supported by {} (version {})",
            source.identity,
            describe(source.version)
        ))),
    }
}

/// Pick the transfer strategy for a source/destination pair.
///
/// Snapshot transfer needs both endpoints to qualify. `auto` prefers it and
/// falls back to classic; asking for it explicitly when either endpoint
/// lacks it is a configuration error.
pub fn negotiate_strategy(
    choice: StrategyChoice,
    source: &CapabilityProfile,
    destination: &CapabilityProfile,
) -> Result<StrategyKind> {
    let snapshot = source.snapshot && destination.snapshot;
    match choice {
        StrategyChoice::Auto if snapshot => Ok(StrategyKind::Snapshot),
        StrategyChoice::Auto | StrategyChoice::Classic => Ok(StrategyKind::Classic),
        StrategyChoice::Snapshot if snapshot => Ok(StrategyKind::Snapshot),
        StrategyChoice::Snapshot => {
            let lacking = if source.snapshot { destination } else { source };
            Err(CopyError::Config(format!(
                "snapshot strategy is not supported by {} (version {})",
                lacking.identity,
                describe(lacking.version)
            )))
        }
    }
}

fn describe(version: Option<ServerVersion>) -> String {
    version.map_or_else(|| "unknown".to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn profile(version: &str) -> CapabilityProfile {
        CapabilityProfile::from_version("memory://x", version, true)
    }

    #[test]
    fn test_version_parse() {
        assert_eq!(ServerVersion::parse("7.2.4"), Some(ServerVersion::new(7, 2, 4)));
        assert_eq!(ServerVersion::parse("2.8"), Some(ServerVersion::new(2, 8, 0)));
        assert_eq!(
            ServerVersion::parse("7.0.0-rc1"),
            Some(ServerVersion::new(7, 0, 0))
        );
        assert_eq!(ServerVersion::parse("unknown"), None);
    }

    #[test]
    fn test_version_thresholds() {
        assert!(!profile("2.4.18").snapshot);
        assert!(profile("2.6.0").snapshot);
        assert!(!profile("2.6.17").cursor_scan);
        assert!(profile("2.7.105").cursor_scan);
        assert!(profile("2.8.0").cursor_scan);
        assert!(!profile("garbage").snapshot);
    }

    #[test]
    fn test_client_scan_support_is_required() {
        let p = CapabilityProfile::from_version("memory://x", "7.2.4", false);
        assert!(!p.cursor_scan);
        assert!(p.snapshot);
    }

    #[test]
    fn test_emitter_negotiation() {
        let modern = profile("7.2.4");
        let old = profile("2.6.0");
        assert_eq!(
            negotiate_emitter(EmitterChoice::Auto, &modern).unwrap(),
            EmitterKind::CursorScan
        );
        assert_eq!(
            negotiate_emitter(EmitterChoice::Auto, &old).unwrap(),
            EmitterKind::FullScan
        );
        assert_eq!(
            negotiate_emitter(EmitterChoice::FullScan, &modern).unwrap(),
            EmitterKind::FullScan
        );
        assert!(matches!(
            negotiate_emitter(EmitterChoice::CursorScan, &old),
            Err(CopyError::Config(_))
        ));
    }

    #[test]
    fn test_strategy_negotiation() {
        let modern = profile("7.2.4");
        let old = profile("2.4.0");
        assert_eq!(
            negotiate_strategy(StrategyChoice::Auto, &modern, &modern).unwrap(),
            StrategyKind::Snapshot
        );
        assert_eq!(
            negotiate_strategy(StrategyChoice::Auto, &modern, &old).unwrap(),
            StrategyKind::Classic
        );
        assert_eq!(
            negotiate_strategy(StrategyChoice::Auto, &old, &modern).unwrap(),
            StrategyKind::Classic
        );
        assert_eq!(
            negotiate_strategy(StrategyChoice::Classic, &modern, &modern).unwrap(),
            StrategyKind::Classic
        );
        assert!(matches!(
            negotiate_strategy(StrategyChoice::Snapshot, &modern, &old),
            Err(CopyError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_probe_memory_store() {
        let store = MemoryStore::with_version("memory://old", "2.6.17");
        let p = CapabilityProfile::probe(&store).await.unwrap();
        assert_eq!(p.identity, "memory://old");
        assert!(p.snapshot);
        assert!(!p.cursor_scan);
    }
}
