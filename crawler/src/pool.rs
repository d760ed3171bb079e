//! Bounded pool of dial workers.
//!
//! A fixed set of long-lived tasks pull [`CrawlJob`]s from one bounded queue.
//! Each job dials a peer, asks it for addresses, records the outcome in the
//! [`AddressBook`] and hangs up.

use crate::address::AddressSource;
use crate::book::AddressBook;
use crate::connection::{Connector, PeerConnection};
use crate::pex::request_addresses;
use cosmos_peers_connection::NetAddress;
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

/// A request to crawl one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlJob {
    pub addr: NetAddress,
    /// Workers drop the job unstarted past this point.
    pub deadline: Instant,
}

impl CrawlJob {
    /// A job that stays valid for `ttl`.
    pub fn new(addr: NetAddress, ttl: Duration) -> Self {
        CrawlJob {
            addr,
            deadline: Instant::now() + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Why a job was not queued. The job is handed back.
#[derive(Debug)]
pub enum EnqueueError {
    /// Queue is at capacity, try again later.
    Full(CrawlJob),
    /// Pool has shut down.
    Closed(CrawlJob),
}

impl fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnqueueError::Full(job) => write!(f, "queue full, dropped job for {}", job.addr),
            EnqueueError::Closed(job) => write!(f, "pool closed, dropped job for {}", job.addr),
        }
    }
}

impl std::error::Error for EnqueueError {}

/// Result of processing a single job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Exchanged with the peer, `learned` addresses accepted by the book.
    Crawled { learned: usize },
    /// Address failed admission, never dialed.
    Rejected,
    /// Claimed after its deadline, never dialed.
    Expired,
    /// Could not connect or handshake.
    DialFailed,
    /// Connected, but the exchange failed.
    ExchangeFailed,
    /// Shutdown interrupted the job.
    Cancelled,
}

/// A finished job, reported to an attached listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    pub addr: NetAddress,
    pub outcome: JobOutcome,
}

impl fmt::Display for CrawlReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            JobOutcome::Crawled { learned } => {
                write!(f, "Crawled {} ({learned} addresses)", self.addr)
            }
            JobOutcome::Rejected => write!(f, "Rejected {}", self.addr),
            JobOutcome::Expired => write!(f, "Expired {}", self.addr),
            JobOutcome::DialFailed => write!(f, "Unreachable {}", self.addr),
            JobOutcome::ExchangeFailed => write!(f, "Exchange failed with {}", self.addr),
            JobOutcome::Cancelled => write!(f, "Cancelled {}", self.addr),
        }
    }
}

/// Pool sizing and per-job limits.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker tasks.
    pub dial_workers: usize,
    /// Jobs the queue holds.
    pub queue_capacity: usize,
    /// Bound on connect plus handshake.
    pub dial_timeout: Duration,
    /// Bound on the address exchange once connected.
    pub exchange_timeout: Duration,
}

/// State shared by every worker.
struct Worker<C: Connector> {
    config: PoolConfig,
    book: Arc<AddressBook>,
    connector: C,
    cancel: CancellationToken,
    reports: Option<mpsc::UnboundedSender<CrawlReport>>,
}

impl<C: Connector> Worker<C> {
    /// Crawl one address: dial, exchange, record, hang up.
    async fn process(&self, job: CrawlJob) -> JobOutcome {
        if job.is_expired() {
            debug!("Dropping expired job for {}", job.addr);
            return JobOutcome::Expired;
        }
        if let Err(e) = self.book.admits(&job.addr) {
            debug!("Not dialing: {e}");
            return JobOutcome::Rejected;
        }

        debug!("Dialing {}", job.addr);
        let dialed = tokio::select! {
            _ = self.cancel.cancelled() => return JobOutcome::Cancelled,
            dialed = timeout(self.config.dial_timeout, self.connector.connect(&job.addr)) => dialed,
        };
        let mut conn = match dialed {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                debug!("Failed to connect to {}: {e}", job.addr);
                self.book.mark_failed(&job.addr).await;
                return JobOutcome::DialFailed;
            }
            Err(_) => {
                debug!("Timed out connecting to {}", job.addr);
                self.book.mark_failed(&job.addr).await;
                return JobOutcome::DialFailed;
            }
        };

        let exchanged = tokio::select! {
            _ = self.cancel.cancelled() => None,
            result = request_addresses(&mut conn, self.config.exchange_timeout) => Some(result),
        };
        if let Err(e) = conn.close().await {
            debug!("Failed to close connection to {}: {e}", job.addr);
        }

        match exchanged {
            None => JobOutcome::Cancelled,
            Some(Ok(advertised)) => {
                let learned = self
                    .book
                    .add_advertised(&advertised, AddressSource::Peer(job.addr.ip))
                    .await;
                self.book.mark_good(&job.addr).await;
                JobOutcome::Crawled { learned }
            }
            Some(Err(e)) => {
                debug!("Exchange with {} failed: {e}", job.addr);
                self.book.mark_failed(&job.addr).await;
                JobOutcome::ExchangeFailed
            }
        }
    }

    /// Claim and process jobs until cancelled or the queue closes.
    async fn run(self: Arc<Self>, id: usize, queue: Arc<Mutex<mpsc::Receiver<CrawlJob>>>) {
        loop {
            let job = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                job = async { queue.lock().await.recv().await } => job,
            };
            let Some(job) = job else {
                break;
            };

            let addr = job.addr.clone();
            let outcome = self.process(job).await;
            debug!("Worker {id} finished {addr}: {outcome:?}");

            if let Some(reports) = &self.reports {
                // Listener hung up, keep crawling regardless.
                let _ = reports.send(CrawlReport { addr, outcome });
            }
        }
        debug!("Worker {id} stopped");
    }
}

/// A fixed number of dial workers behind a bounded job queue.
///
/// # Architecture
///
/// * **Queue** - Bounded, filled with [`DialWorkerPool::try_enqueue`], which
///   never waits.
/// * **Workers** - Each claims one job at a time. Cancelling the pool's token
///   aborts in-flight dials and exchanges and leaves queued jobs unstarted.
pub struct DialWorkerPool {
    queue: mpsc::Sender<CrawlJob>,
    cancel: CancellationToken,
    workers: Mutex<JoinSet<()>>,
}

impl fmt::Debug for DialWorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialWorkerPool")
            .field("remaining_capacity", &self.queue.capacity())
            .field("max_capacity", &self.queue.max_capacity())
            .finish_non_exhaustive()
    }
}

impl DialWorkerPool {
    /// Start the workers.
    ///
    /// # Arguments
    ///
    /// * `config` - Worker count, queue size and timeouts.
    /// * `book` - Where outcomes are recorded.
    /// * `connector` - How peers are dialed.
    /// * `cancel` - Stops the pool when cancelled.
    /// * `reports` - Optional listener for every finished job.
    pub fn spawn<C: Connector>(
        config: PoolConfig,
        book: Arc<AddressBook>,
        connector: C,
        cancel: CancellationToken,
        reports: Option<mpsc::UnboundedSender<CrawlReport>>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let dial_workers = config.dial_workers.max(1);
        info!(
            "Starting {dial_workers} dial workers, queue capacity {}",
            config.queue_capacity
        );

        let worker = Arc::new(Worker {
            config,
            book,
            connector,
            cancel: cancel.clone(),
            reports,
        });
        let mut workers = JoinSet::new();
        for id in 0..dial_workers {
            workers.spawn(worker.clone().run(id, queue_rx.clone()));
        }

        DialWorkerPool {
            queue: queue_tx,
            cancel,
            workers: Mutex::new(workers),
        }
    }

    /// Queue a job without waiting.
    pub fn try_enqueue(&self, job: CrawlJob) -> Result<(), EnqueueError> {
        if self.cancel.is_cancelled() {
            return Err(EnqueueError::Closed(job));
        }
        self.queue.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => EnqueueError::Full(job),
            mpsc::error::TrySendError::Closed(job) => EnqueueError::Closed(job),
        })
    }

    /// Free slots in the queue.
    pub fn remaining_capacity(&self) -> usize {
        if self.cancel.is_cancelled() {
            return 0;
        }
        self.queue.capacity()
    }

    /// Stop every worker and wait for them to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut workers = self.workers.lock().await;
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                warn!("Dial worker ended abnormally: {e}");
            }
        }
        info!("Dial workers stopped");
    }
}
