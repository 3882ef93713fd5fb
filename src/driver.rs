//! Migration driver
//!
//! Runs one migration from start to finish:
//!
//! ```text
//! Init -> Preflight -> Confirm -> Copying -> Done
//! ```
//!
//! Keys are processed one at a time. A failed copy or verification is
//! counted and reported, never retried. Fail-fast, cancellation and
//! transport errors end the run early. Cancellation is observed between
//! keys and between copy and verify, never inside a key's writes.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::capability::{negotiate_emitter, negotiate_strategy, CapabilityProfile};
use crate::config::RunConfig;
use crate::emitter::KeyEmitter;
use crate::error::{CopyError, Result};
use crate::notifier::Notifier;
use crate::store::{quoted, StoreClient};
use crate::strategy::TransferStrategy;
use crate::verify::{sample, Verifier};

/// Outcome counters for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Keys attempted
    pub attempt: u64,
    /// Keys copied
    pub success: u64,
    /// Keys that failed to copy
    pub failure: u64,
    /// Copied keys that passed verification
    pub verified: u64,
    /// Copied keys that failed verification
    pub mismatched: u64,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{attempt: {}, success: {}, failure: {}, verified: {}, mismatched: {}}}",
            self.attempt, self.success, self.failure, self.verified, self.mismatched
        )
    }
}

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    /// Not started
    Init,
    /// Checking endpoints and negotiating capabilities
    Preflight,
    /// Waiting for operator approval
    Confirm,
    /// Copying keys
    Copying,
    /// Finished, successfully or not
    Done,
}

/// Drives one migration from source to destination
pub struct MigrationDriver {
    source: Arc<dyn StoreClient>,
    destination: Arc<dyn StoreClient>,
    config: RunConfig,
    notifier: Arc<dyn Notifier>,
    cancel: CancellationToken,
    rng: StdRng,
    stats: Stats,
    phase: Phase,
}

impl MigrationDriver {
    /// Create a driver
    pub fn new(
        source: Arc<dyn StoreClient>,
        destination: Arc<dyn StoreClient>,
        config: RunConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            source,
            destination,
            config,
            notifier,
            cancel: CancellationToken::new(),
            rng: StdRng::from_entropy(),
            stats: Stats::default(),
            phase: Phase::Init,
        }
    }

    /// Make verification sampling reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels this run
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Counters so far; final once `run` has returned
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run the migration.
    ///
    /// Returns the final counters when every key was attempted, even if some
    /// failed. Any early stop is an error; the counters up to that point stay
    /// available through [`stats`](Self::stats).
    pub async fn run(&mut self) -> Result<Stats> {
        let started = Instant::now();
        let result = self.execute().await;
        let copying = self.phase == Phase::Copying;
        self.phase = Phase::Done;

        match result {
            Ok(()) => {
                info!(stats = %self.stats, elapsed = ?started.elapsed(), "migration finished");
                self.notifier.notify(&format!("DONE: {}", self.stats));
                Ok(self.stats)
            }
            Err(err) => {
                info!(error = %err, stats = %self.stats, "migration aborted");
                let message = if copying {
                    format!("{}; {}", err, self.stats)
                } else {
                    err.to_string()
                };
                self.notifier.abort(Some(&message));
                Err(err)
            }
        }
    }

    async fn execute(&mut self) -> Result<()> {
        self.config.validate()?;
        self.phase = Phase::Preflight;

        let source_id = self.source.identity();
        let destination_id = self.destination.identity();
        if source_id == destination_id {
            return Err(CopyError::SameEndpoint(source_id));
        }

        let source_profile =
            cancellable(&self.cancel, CapabilityProfile::probe(self.source.as_ref())).await?;
        let destination_profile =
            cancellable(&self.cancel, CapabilityProfile::probe(self.destination.as_ref()))
                .await?;

        let emitter_kind = negotiate_emitter(self.config.key_emitter, &source_profile)?;
        let strategy_kind = negotiate_strategy(
            self.config.strategy,
            &source_profile,
            &destination_profile,
        )?;
        info!(emitter = %emitter_kind, strategy = %strategy_kind, "negotiated");

        let emitter = KeyEmitter::new(emitter_kind, &self.config);
        let strategy = TransferStrategy::new(
            strategy_kind,
            self.source.clone(),
            self.destination.clone(),
            &self.config,
        );
        let verifier = Verifier::new(
            self.source.clone(),
            self.destination.clone(),
            Duration::from_secs(self.config.ttl_tolerance_secs),
        );

        let destination_empty =
            cancellable(&self.cancel, self.destination.random_key()).await?.is_none();

        self.phase = Phase::Confirm;
        let summary = format!(
            "Source:      {}\nDestination: {} ({}empty)\nKey Emitter: {}\nStrategy:    {}",
            source_id,
            destination_id,
            if destination_empty { "" } else { "NOT " },
            emitter_kind,
            strategy_kind,
        );
        let approved = cancellable(&self.cancel, async {
            Ok::<_, CopyError>(self.notifier.confirm(&summary).await)
        })
        .await?;
        if !approved {
            return Err(CopyError::Declined);
        }
        if !destination_empty && !self.config.allow_nonempty {
            return Err(CopyError::DestinationNotEmpty);
        }

        let mut keys = cancellable(
            &self.cancel,
            emitter.keys(self.source.clone(), self.notifier.as_ref()),
        )
        .await?;

        self.phase = Phase::Copying;
        info!(pattern = %self.config.pattern, "copying keys");

        loop {
            if self.cancel.is_cancelled() {
                return Err(CopyError::Cancelled);
            }
            let Some(key) = cancellable(&self.cancel, keys.next_key()).await? else {
                break;
            };

            // Not raced against cancellation: a started key gets both its value and its TTL.
            let copied = strategy.copy(&key, self.notifier.as_ref()).await?;
            self.stats.attempt += 1;

            if copied {
                self.stats.success += 1;
            } else {
                self.stats.failure += 1;
                self.notifier.notify(&format!("FAIL: {}", quoted(&key)));
                if self.config.fail_fast {
                    return Err(CopyError::FailFast { key: quoted(&key) });
                }
            }

            if copied && sample(self.config.verify_percent, &mut self.rng) {
                if self.cancel.is_cancelled() {
                    return Err(CopyError::Cancelled);
                }
                if verifier.verify(&key).await? {
                    self.stats.verified += 1;
                } else {
                    self.stats.mismatched += 1;
                    self.notifier.notify(&format!("BORK: {}", quoted(&key)));
                    if self.config.fail_fast {
                        return Err(CopyError::FailFast { key: quoted(&key) });
                    }
                }
            }

            if self.stats.attempt % self.config.progress_interval == 0 {
                debug!(stats = %self.stats, "progress");
                self.notifier.notify(&format!("PROGRESS: {}", self.stats));
            }
        }

        Ok(())
    }
}

impl fmt::Debug for MigrationDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationDriver")
            .field("source", &self.source.identity())
            .field("destination", &self.destination.identity())
            .field("phase", &self.phase)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Race `fut` against cancellation
async fn cancellable<T, E, F>(token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<CopyError>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(CopyError::Cancelled),
        result = fut => result.map_err(Into::into),
    }
}
