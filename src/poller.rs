//! The poll → extract → dedup → emit loop.
//!
//! ```text
//!   Seeding ──(first successful fetch)──► Polling ──(signal)──► ShuttingDown
//!      │                                     ▲ │
//!      │ non-2xx / empty seed: Auth error    └─┘ every `interval`
//!      ▼
//!   exit 2
//! ```
//!
//! One cycle runs at a time. The next sleep only starts once the current
//! cycle has finished emitting, however long the fetch took. Cancellation is
//! raced against the fetch and the sleep but never against emission, so an
//! item is either written completely or not at all.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::cache::DedupCache;
use crate::config::Config;
use crate::feed::{Extractor, FeedItem, FetchError, Transport};
use crate::sink::{DeliveryError, Sink};

/// Errors that end the loop.
#[derive(Debug, Error)]
pub enum PollError {
    /// The first fetch was refused or came back without any announcements.
    /// Almost always stale session cookies.
    #[error("Expired credentials: {0}")]
    Auth(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Waiting for the first successful fetch to fill the cache.
    Seeding,
    /// Emitting whatever the cache has not seen.
    Polling,
    ShuttingDown,
}

/// Result of the fetch-and-extract half of a cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    Items(Vec<FeedItem>),
    /// Transient failure; nothing to process this cycle.
    Empty,
    Fatal(PollError),
}

/// How a run that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// Cancellation was requested.
    Interrupted,
    /// The line-protocol reader went away.
    SinkClosed,
}

/// Counts from processing one cycle's candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub emitted: usize,
    pub seen: usize,
    pub invalid: usize,
    pub failed: usize,
}

pub struct Poller<T, S> {
    transport: T,
    extractor: Extractor,
    sink: S,
    cache: DedupCache,
    interval: Duration,
    allow_empty_seed: bool,
    state: PollState,
}

impl<T: Transport, S: Sink> Poller<T, S> {
    pub fn new(config: &Config, transport: T, extractor: Extractor, sink: S) -> Self {
        Self {
            transport,
            extractor,
            sink,
            cache: DedupCache::new(config.cache_limit),
            interval: config.parser.interval,
            allow_empty_seed: config.parser.allow_empty_seed,
            state: PollState::Seeding,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Fetch the feed and extract candidates, classifying failures.
    pub async fn fetch_and_extract(&self) -> CycleOutcome {
        let page = match self.transport.fetch().await {
            Ok(page) => page,
            Err(FetchError::HttpStatus(status)) if self.state == PollState::Seeding => {
                return CycleOutcome::Fatal(PollError::Auth(format!(
                    "tracker answered HTTP {status} on first fetch"
                )));
            }
            Err(e) => {
                if e.is_connection_reset() {
                    tracing::debug!(error = %e, "Connection reset, skipping cycle");
                } else {
                    tracing::warn!(error = %e, "Fetch failed, skipping cycle");
                }
                return CycleOutcome::Empty;
            }
        };

        let items = self.extractor.extract(&page);

        if self.state == PollState::Seeding
            && !self.allow_empty_seed
            && !items.iter().any(FeedItem::is_emittable)
        {
            return CycleOutcome::Fatal(PollError::Auth(
                "first fetch contained no announcements".to_string(),
            ));
        }

        CycleOutcome::Items(items)
    }

    /// Seed or filter-and-emit one cycle's candidates, in order.
    ///
    /// Invalid items never touch the cache. Only a closed line-protocol reader
    /// is returned as an error; other delivery failures are logged per item.
    pub async fn process(&mut self, items: Vec<FeedItem>) -> Result<CycleReport, DeliveryError> {
        let mut report = CycleReport::default();

        match self.state {
            PollState::Seeding => {
                for item in &items {
                    if item.is_emittable() {
                        self.cache.insert(&item.id);
                        report.seen += 1;
                    } else {
                        report.invalid += 1;
                    }
                }
                self.state = PollState::Polling;
                tracing::info!(
                    seeded = report.seen,
                    skipped = report.invalid,
                    "Seeded cache from first fetch"
                );
            }
            PollState::Polling | PollState::ShuttingDown => {
                for item in &items {
                    let Some((title, url)) = item.emittable() else {
                        tracing::debug!(id = %item.id, "Skipping invalid entry");
                        report.invalid += 1;
                        continue;
                    };
                    if self.cache.contains(&item.id) {
                        report.seen += 1;
                        continue;
                    }

                    match self.sink.emit(title, url).await {
                        Ok(()) => report.emitted += 1,
                        Err(e) if e.is_closed() => return Err(e),
                        Err(e) => {
                            tracing::error!(id = %item.id, title = %title, error = %e, "Delivery failed");
                            report.failed += 1;
                        }
                    }
                }
                if report.emitted > 0 || report.failed > 0 {
                    tracing::info!(
                        emitted = report.emitted,
                        failed = report.failed,
                        cached = self.cache.len(),
                        "Cycle complete"
                    );
                }
            }
        }

        Ok(report)
    }

    /// Run cycles until `shutdown` resolves or a fatal error occurs.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<RunExit, PollError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let outcome = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                outcome = self.fetch_and_extract() => outcome,
            };

            match outcome {
                CycleOutcome::Fatal(e) => return Err(e),
                CycleOutcome::Empty => {}
                CycleOutcome::Items(items) => {
                    if let Err(e) = self.process(items).await {
                        tracing::info!(error = %e, "Output closed, stopping");
                        return Ok(RunExit::SinkClosed);
                    }
                }
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        self.state = PollState::ShuttingDown;
        tracing::info!("Shutdown requested, stopping poller");
        Ok(RunExit::Interrupted)
    }
}
