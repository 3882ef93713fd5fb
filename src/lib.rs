//! # ferrite-copy
//!
//! Copies the keyspace of one Redis-compatible server, or the keys matching
//! a glob pattern, into another. Values keep their type and expiration, and
//! copied keys can optionally be verified against the source.
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`store`] | `StoreClient` capability, RESP2 client, in-memory store |
//! | [`capability`] | Endpoint probing and emitter/strategy negotiation |
//! | [`emitter`] | Key enumeration (`KEYS` or `SCAN`) |
//! | [`strategy`] | Value transfer (classic or `DUMP`/`RESTORE`) |
//! | [`verify`] | Post-copy comparison and sampling |
//! | [`driver`] | Run orchestration and statistics |
//! | [`notifier`] | Operator output and confirmation |
//! | [`config`] | Run configuration |
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ferrite_copy::{ConnectionSpec, ConsoleNotifier, MigrationDriver, RespClient, RunConfig};
//!
//! # async fn example() -> ferrite_copy::Result<()> {
//! let source = RespClient::connect(ConnectionSpec::parse("redis://old-cache:6379/0")?).await?;
//! let destination = RespClient::connect(ConnectionSpec::parse("redis://new-cache:6379/0")?).await?;
//!
//! let config = RunConfig {
//!     verify_percent: 10,
//!     ..Default::default()
//! };
//! let notifier = Arc::new(ConsoleNotifier::new(config.prompt, config.debug));
//!
//! let mut driver = MigrationDriver::new(Arc::new(source), Arc::new(destination), config, notifier);
//! let stats = driver.run().await?;
//! println!("{}", stats);
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod config;
pub mod driver;
pub mod emitter;
pub mod error;
pub mod glob;
pub mod notifier;
pub mod store;
pub mod strategy;
pub mod telemetry;
pub mod uri;
pub mod verify;

pub use capability::{CapabilityProfile, EmitterKind, ServerVersion, StrategyKind};
pub use config::{EmitterChoice, LogFormat, LoggingConfig, RunConfig, StrategyChoice};
pub use driver::{MigrationDriver, Phase, Stats};
pub use emitter::{KeyEmitter, KeyStream};
pub use error::{CopyError, Result};
pub use notifier::{ConsoleNotifier, Notifier, RecordingNotifier};
pub use store::{KeyType, MemoryStore, RespClient, StoreClient, StoreError, Ttl, Value, WriteOp};
pub use strategy::TransferStrategy;
pub use uri::ConnectionSpec;
pub use verify::Verifier;
