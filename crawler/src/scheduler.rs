//! Decides which addresses to crawl and when.

use crate::address::{AddressSource, KnownAddress};
use crate::book::AddressBook;
use crate::connection::{DnsResolver, SeedResolver};
use crate::pool::{CrawlJob, DialWorkerPool, EnqueueError};
use cosmos_peers_connection::{unix_timestamp, NetAddress, SeedAddress};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

/// How long to leave an address alone after crawling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Wait after a success before crawling again.
    pub recrawl_interval: Duration,
    /// Wait after the first failure, doubling with each further one.
    pub base: Duration,
    /// Cap on the failure wait.
    pub max: Duration,
}

impl BackoffPolicy {
    /// Wait before the next attempt given `failures` consecutive failures.
    pub fn window(&self, failures: u32) -> Duration {
        if failures == 0 {
            return self.recrawl_interval;
        }
        let exponent = (failures - 1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |wait| wait.min(self.max))
    }

    /// Whether `entry` may be crawled at `now` (unix seconds).
    pub fn is_due(&self, entry: &KnownAddress, now: u64) -> bool {
        match entry.last_attempt {
            None => true,
            Some(last) => now.saturating_sub(last) >= self.window(entry.failures).as_secs(),
        }
    }
}

/// Pick up to `limit` due addresses, never-tried first, then the longest idle.
pub fn select_due(
    entries: &[KnownAddress],
    now: u64,
    policy: &BackoffPolicy,
    limit: usize,
) -> Vec<NetAddress> {
    let mut due: Vec<&KnownAddress> = entries
        .iter()
        .filter(|entry| policy.is_due(entry, now))
        .collect();
    due.sort_by(|a, b| {
        a.last_attempt
            .is_some()
            .cmp(&b.last_attempt.is_some())
            .then_with(|| a.last_attempt.cmp(&b.last_attempt))
            .then_with(|| a.addr.cmp(&b.addr))
    });
    due.into_iter()
        .take(limit)
        .map(|entry| entry.addr.clone())
        .collect()
}

/// Scheduler timing.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub seeds: Vec<SeedAddress>,
    pub tick_interval: Duration,
    pub bootstrap_tick_interval: Duration,
    /// Validity of a queued job.
    pub job_ttl: Duration,
    pub backoff: BackoffPolicy,
    /// Book size at which bootstrapping is over.
    pub min_viable_size: usize,
    /// Give up on reaching `min_viable_size` after this long.
    pub max_bootstrap_time: Duration,
    /// Bound on resolving a single seed.
    pub resolve_timeout: Duration,
}

/// Phase of the crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Building the book up from seeds, ticking fast.
    Bootstrapping { started: Instant },
    /// Book is viable, recrawling at the regular pace.
    Steady,
}

/// Feeds due addresses from the book into the dial pool.
#[derive(Debug)]
pub struct CrawlScheduler<R: SeedResolver = DnsResolver> {
    config: SchedulerConfig,
    book: Arc<AddressBook>,
    pool: Arc<DialWorkerPool>,
    resolver: R,
    state: SchedulerState,
}

impl CrawlScheduler {
    /// A scheduler resolving seeds through DNS.
    pub fn new(config: SchedulerConfig, book: Arc<AddressBook>, pool: Arc<DialWorkerPool>) -> Self {
        CrawlScheduler::with_resolver(config, book, pool, DnsResolver)
    }
}

impl<R: SeedResolver> CrawlScheduler<R> {
    pub fn with_resolver(
        config: SchedulerConfig,
        book: Arc<AddressBook>,
        pool: Arc<DialWorkerPool>,
        resolver: R,
    ) -> Self {
        CrawlScheduler {
            config,
            book,
            pool,
            resolver,
            state: SchedulerState::Bootstrapping {
                started: Instant::now(),
            },
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Queue `addr`, stamping the attempt if accepted.
    async fn enqueue(&self, addr: NetAddress) -> Result<(), EnqueueError> {
        self.pool
            .try_enqueue(CrawlJob::new(addr.clone(), self.config.job_ttl))?;
        self.book.mark_attempt(&addr).await;
        Ok(())
    }

    /// Resolve the seeds, record them and queue a crawl of each.
    ///
    /// # Returns
    ///
    /// Number of jobs queued.
    pub async fn bootstrap(&mut self) -> usize {
        self.state = SchedulerState::Bootstrapping {
            started: Instant::now(),
        };
        info!("Bootstrapping from {} seeds", self.config.seeds.len());

        let mut enqueued = 0;
        for seed in &self.config.seeds {
            let lookup = timeout(self.config.resolve_timeout, self.resolver.resolve(seed));
            let resolved = match lookup.await {
                Ok(Ok(resolved)) if !resolved.is_empty() => resolved,
                Ok(Ok(_)) => {
                    warn!("Seed {seed} resolved to no addresses");
                    continue;
                }
                Ok(Err(e)) => {
                    warn!("Failed to resolve seed {seed}: {e}");
                    continue;
                }
                Err(_) => {
                    warn!("Timed out resolving seed {seed}");
                    continue;
                }
            };
            for addr in resolved {
                if !self.book.add_or_update(&addr, AddressSource::Seed).await {
                    warn!("Seed {addr} rejected by the address book");
                    continue;
                }
                match self.enqueue(addr).await {
                    Ok(()) => enqueued += 1,
                    Err(e) => debug!("Seed not queued: {e}"),
                }
            }
        }
        info!("Queued {enqueued} seed crawls");
        enqueued
    }

    /// Queue whatever is due, up to the pool's free capacity.
    ///
    /// # Returns
    ///
    /// Number of jobs queued.
    pub async fn tick(&mut self) -> usize {
        let capacity = self.pool.remaining_capacity();
        let mut enqueued = 0;
        if capacity == 0 {
            debug!("Dial queue full, skipping tick");
        } else {
            let snapshot = self.book.snapshot().await;
            let due = select_due(&snapshot, unix_timestamp(), &self.config.backoff, capacity);
            for addr in due {
                match self.enqueue(addr).await {
                    Ok(()) => enqueued += 1,
                    Err(e) => {
                        debug!("Stopping tick: {e}");
                        break;
                    }
                }
            }
            debug!("Queued {enqueued} crawls");
        }
        self.update_state().await;
        enqueued
    }

    async fn update_state(&mut self) {
        let SchedulerState::Bootstrapping { started } = self.state else {
            return;
        };
        let size = self.book.size().await;
        if size >= self.config.min_viable_size {
            info!("Address book reached {size} addresses, switching to steady crawling");
            self.state = SchedulerState::Steady;
        } else if started.elapsed() >= self.config.max_bootstrap_time {
            info!("Bootstrap time exhausted with {size} addresses, switching to steady crawling");
            self.state = SchedulerState::Steady;
        }
    }

    fn interval(&self) -> Duration {
        match self.state {
            SchedulerState::Bootstrapping { .. } => self.config.bootstrap_tick_interval,
            SchedulerState::Steady => self.config.tick_interval,
        }
    }

    /// Bootstrap, then tick until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Scheduler stopped during bootstrap");
                return;
            }
            _ = self.bootstrap() => {}
        }
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval()) => {
                    self.tick().await;
                }
            }
        }
        info!("Scheduler stopped");
    }
}
