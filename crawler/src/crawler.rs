//! Seed crawler.
//!
//! A [`Crawler`] ties the address book, dial pool and scheduler together,
//! keeps the book flushed to disk and optionally answers inbound address
//! requests.

use crate::address::AddressSource;
use crate::book::AddressBook;
use crate::connection::{Connector, PeerConnector};
use crate::error::CrawlerError;
use crate::pex::serve_addresses;
use crate::pool::{CrawlReport, DialWorkerPool, PoolConfig};
use crate::scheduler::{CrawlScheduler, SchedulerConfig};
use cosmos_peers_connection::{
    Connection, ConnectionConfiguration, NetAddress, NodeId, PEX_CHANNEL,
};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Everything a [`Crawler`] runs with, assembled by
/// [`CrawlerBuilder`](crate::CrawlerBuilder).
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub node_id: NodeId,
    /// Refuse addresses that are not publicly routable.
    pub strict_routing: bool,
    /// Snapshot file of the address book, in-memory if unset.
    pub address_book: Option<PathBuf>,
    pub persist_interval: Duration,
    /// Where to accept inbound peers, if anywhere.
    pub listen_addr: Option<SocketAddr>,
    pub max_inbound: usize,
    /// Addresses handed to each inbound requester.
    pub serve_sample_size: usize,
    pub connection: ConnectionConfiguration,
    pub pool: PoolConfig,
    pub scheduler: SchedulerConfig,
}

/// Main crawler implementation.
///
/// The crawler owns a shared [`AddressBook`] that status consumers can read
/// through [`Crawler::book`] while it runs.
#[derive(Debug)]
pub struct Crawler<C: Connector = PeerConnector> {
    config: CrawlerConfig,
    connector: C,
    book: Arc<AddressBook>,
    reports: Option<mpsc::UnboundedSender<CrawlReport>>,
}

impl<C: Connector> Crawler<C> {
    pub(crate) fn new(
        config: CrawlerConfig,
        connector: C,
        reports: Option<mpsc::UnboundedSender<CrawlReport>>,
    ) -> Self {
        let mut book = AddressBook::new(config.node_id.clone(), config.strict_routing);
        if let Some(path) = &config.address_book {
            book = book.with_path(path);
        }
        Crawler {
            config,
            connector,
            book: Arc::new(book),
            reports,
        }
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    pub fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    /// Where peers can reach this crawler, preferring the external address.
    ///
    /// `None` when nothing is advertised or the listener is bound to an
    /// unspecified address.
    pub fn full_address(&self) -> Option<NetAddress> {
        let addr = self.config.connection.external_address.or(self.config.listen_addr)?;
        if addr.ip().is_unspecified() {
            return None;
        }
        Some(NetAddress::new(self.config.node_id.clone(), addr.ip(), addr.port()))
    }

    /// Shared handle to the address book.
    pub fn book(&self) -> Arc<AddressBook> {
        self.book.clone()
    }

    /// Crawl until `cancel` fires.
    ///
    /// Loads the address book, bootstraps from the seeds and keeps crawling,
    /// flushing the book every persist interval. On cancellation the
    /// scheduler stops, in-flight crawls are aborted and the book is saved one
    /// last time.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - After a clean shutdown.
    /// * `Err(CrawlerError)` - If the listener could not be bound or the
    ///   final save failed.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), CrawlerError> {
        if let Err(e) = self.book.load_from_disk().await {
            warn!("Starting with an empty address book: {e}");
        }
        let listener = match self.config.listen_addr {
            Some(addr) => Some(TcpListener::bind(addr).await.map_err(CrawlerError::Listen)?),
            None => None,
        };
        if self.config.scheduler.seeds.is_empty() && self.book.size().await == 0 {
            warn!("No seeds configured and the address book is empty, nothing to crawl");
        }
        info!("Crawling {} as {}", self.config.connection.network, self.config.node_id);
        if let Some(addr) = self.full_address() {
            info!("Advertising {addr}");
        }

        let pool = Arc::new(DialWorkerPool::spawn(
            self.config.pool.clone(),
            self.book.clone(),
            self.connector.clone(),
            cancel.child_token(),
            self.reports.clone(),
        ));
        let scheduler = CrawlScheduler::new(
            self.config.scheduler.clone(),
            self.book.clone(),
            pool.clone(),
        );

        let mut tasks = JoinSet::new();
        tasks.spawn(scheduler.run(cancel.clone()));
        tasks.spawn(flush_periodically(
            self.book.clone(),
            self.config.persist_interval,
            cancel.clone(),
        ));
        if let Some(listener) = listener {
            tasks.spawn(serve_inbound(
                listener,
                InboundSettings {
                    connection: self.config.connection.clone(),
                    max_inbound: self.config.max_inbound,
                    sample_size: self.config.serve_sample_size,
                    request_timeout: self.config.pool.exchange_timeout,
                },
                self.book.clone(),
                cancel.clone(),
            ));
        }

        cancel.cancelled().await;
        info!("Shutting down");
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!("Crawler task ended abnormally: {e}");
            }
        }
        pool.shutdown().await;

        self.book.persist().await?;
        info!("Saved address book: {}", self.book.stats().await);
        Ok(())
    }
}

/// Save the book every `interval`, logging progress along the way.
async fn flush_periodically(book: Arc<AddressBook>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                // Failures are retried on the next tick.
                if let Err(e) = book.persist().await {
                    warn!("Failed to persist address book: {e}");
                }
                info!("Address book: {}", book.stats().await);
            }
        }
    }
}

struct InboundSettings {
    connection: ConnectionConfiguration,
    max_inbound: usize,
    sample_size: usize,
    request_timeout: Duration,
}

/// Accept inbound peers and answer their address requests.
async fn serve_inbound(
    listener: TcpListener,
    settings: InboundSettings,
    book: Arc<AddressBook>,
    cancel: CancellationToken,
) {
    match listener.local_addr() {
        Ok(addr) => info!("Serving addresses on {addr}"),
        Err(e) => debug!("Serving addresses on unknown address: {e}"),
    }
    let permits = Arc::new(Semaphore::new(settings.max_inbound));
    let settings = Arc::new(settings);
    let mut sessions = JoinSet::new();

    loop {
        let (stream, remote) = tokio::select! {
            _ = cancel.cancelled() => break,
            Some(_) = sessions.join_next(), if !sessions.is_empty() => continue,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    debug!("Failed to accept connection: {e}");
                    continue;
                }
            },
        };

        let Ok(permit) = permits.clone().try_acquire_owned() else {
            debug!("Inbound limit reached, dropping {remote}");
            continue;
        };
        let settings = settings.clone();
        let book = book.clone();
        sessions.spawn(async move {
            let _permit = permit;
            match serve_peer(stream, &settings, &book).await {
                Ok(served) => debug!("Served {served} addresses to {remote}"),
                Err(e) => debug!("Inbound session with {remote} failed: {e}"),
            }
        });
    }

    sessions.shutdown().await;
    info!("Stopped serving addresses");
}

async fn serve_peer(
    stream: TcpStream,
    settings: &InboundSettings,
    book: &AddressBook,
) -> Result<usize, CrawlerError> {
    let connection = Connection::tcp_accept(stream, &settings.connection).await?;
    // Peers that listen are worth crawling too.
    if connection.node_info().is_listening() {
        let peer = connection.peer().clone();
        book.add_or_update(&peer, AddressSource::Peer(peer.ip)).await;
    }
    let mut channel = connection.open_channel(PEX_CHANNEL)?;
    serve_addresses(
        &mut channel,
        book,
        settings.sample_size,
        settings.request_timeout,
    )
    .await
}
