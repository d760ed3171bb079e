//! Builder pattern for configuring and creating crawler instances.

use crate::connection::{Connector, PeerConnector};
use crate::crawler::{Crawler, CrawlerConfig};
use crate::pex::DEFAULT_SERVE_SAMPLE_SIZE;
use crate::pool::{CrawlReport, PoolConfig};
use crate::scheduler::{BackoffPolicy, SchedulerConfig};
use cosmos_peers_connection::{
    AddressError, ConnectionConfiguration, NodeId, SeedAddress, DEFAULT_MAX_FRAME_SIZE,
    DEFAULT_MONIKER,
};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default number of dial workers.
pub const DEFAULT_DIAL_WORKERS: usize = 16;
/// Default capacity of the dial queue.
pub const DEFAULT_PEER_QUEUE_SIZE: usize = 1000;
/// Default bound on connect plus handshake.
const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(3);
/// Default bound on the address exchange.
const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_BOOTSTRAP_TICK_INTERVAL: Duration = Duration::from_secs(5);
/// Default validity of a queued job.
const DEFAULT_JOB_TTL: Duration = Duration::from_secs(60);
const DEFAULT_BACKOFF: BackoffPolicy = BackoffPolicy {
    recrawl_interval: Duration::from_secs(30 * 60),
    base: Duration::from_secs(60),
    max: Duration::from_secs(4 * 60 * 60),
};
const DEFAULT_MIN_VIABLE_SIZE: usize = 64;
const DEFAULT_MAX_BOOTSTRAP_TIME: Duration = Duration::from_secs(2 * 60);
const DEFAULT_PERSIST_INTERVAL: Duration = Duration::from_secs(2 * 60);
/// Default bound on resolving one seed.
const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default limit on concurrently served inbound peers.
const DEFAULT_MAX_INBOUND: usize = 64;

/// Errors that can occur during crawler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlerBuilderError {
    /// A seed is not of the form `id@host:port`.
    InvalidSeed(AddressError),
    /// At least one dial worker is required.
    ZeroDialWorkers,
    /// The dial queue must hold at least one job.
    ZeroQueueSize,
    /// Frames must be allowed to carry something.
    ZeroFrameSize,
    /// A timeout or interval that must be positive is zero.
    ZeroDuration(&'static str),
}

impl fmt::Display for CrawlerBuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlerBuilderError::InvalidSeed(err) => write!(f, "Invalid seed: {err}"),
            CrawlerBuilderError::ZeroDialWorkers => write!(f, "Dial workers must be at least 1"),
            CrawlerBuilderError::ZeroQueueSize => write!(f, "Peer queue size must be at least 1"),
            CrawlerBuilderError::ZeroFrameSize => write!(f, "Max frame size must be at least 1"),
            CrawlerBuilderError::ZeroDuration(name) => write!(f, "{name} must be positive"),
        }
    }
}

impl std::error::Error for CrawlerBuilderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CrawlerBuilderError::InvalidSeed(err) => Some(err),
            _ => None,
        }
    }
}

/// Parse a comma separated seed list, ignoring blank entries.
pub fn parse_seeds(seeds: &str) -> Result<Vec<SeedAddress>, AddressError> {
    seeds
        .split(',')
        .map(str::trim)
        .filter(|seed| !seed.is_empty())
        .map(str::parse)
        .collect()
}

/// Builder for creating a customized [`Crawler`] instance.
///
/// # Example
///
/// ```
/// # fn main() -> Result<(), cosmos_peers_crawler::CrawlerBuilderError> {
/// use cosmos_peers_crawler::{CrawlerBuilder, NodeKey};
///
/// let key = NodeKey::generate();
///
/// // Create a basic crawler for the hub
/// let basic_crawler = CrawlerBuilder::new(key.id(), "cosmoshub-4").build()?;
///
/// // Create a crawler with custom settings
/// let custom_crawler = CrawlerBuilder::new(key.id(), "cosmoshub-4")
///     .with_seeds(
///         "ba3bacc714817218562f743178228f23678b2873@seed.example.com:26656, \
///          f4a4d5c6a1f2e3b4c5d6e7f8091a2b3c4d5e6f70@203.0.113.7:26656",
///     )?
///     .with_dial_workers(32)
///     .with_peer_queue_size(5000)
///     .with_address_book("/var/lib/seeder/addrbook.json")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CrawlerBuilder {
    /// Our identity.
    node_id: NodeId,
    /// Chain the crawler operates on, peers on other chains are refused.
    network: String,
    moniker: String,
    seeds: Vec<SeedAddress>,
    dial_workers: usize,
    peer_queue_size: usize,
    allow_non_routable: bool,
    dial_timeout: Duration,
    exchange_timeout: Duration,
    tick_interval: Duration,
    bootstrap_tick_interval: Duration,
    job_ttl: Duration,
    backoff: BackoffPolicy,
    min_viable_size: usize,
    max_bootstrap_time: Duration,
    resolve_timeout: Duration,
    persist_interval: Duration,
    address_book: Option<PathBuf>,
    listen_addr: Option<SocketAddr>,
    external_address: Option<SocketAddr>,
    max_frame_size: usize,
    max_inbound: usize,
    serve_sample_size: usize,
    reports: Option<mpsc::UnboundedSender<CrawlReport>>,
}

impl CrawlerBuilder {
    /// Create a new crawler builder.
    ///
    /// # Arguments
    ///
    /// * `node_id` - Identity presented to peers.
    /// * `network` - Chain id of the network to crawl.
    pub fn new(node_id: NodeId, network: impl Into<String>) -> Self {
        CrawlerBuilder {
            node_id,
            network: network.into(),
            moniker: DEFAULT_MONIKER.to_string(),
            seeds: Vec::new(),
            dial_workers: DEFAULT_DIAL_WORKERS,
            peer_queue_size: DEFAULT_PEER_QUEUE_SIZE,
            allow_non_routable: false,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
            tick_interval: DEFAULT_TICK_INTERVAL,
            bootstrap_tick_interval: DEFAULT_BOOTSTRAP_TICK_INTERVAL,
            job_ttl: DEFAULT_JOB_TTL,
            backoff: DEFAULT_BACKOFF,
            min_viable_size: DEFAULT_MIN_VIABLE_SIZE,
            max_bootstrap_time: DEFAULT_MAX_BOOTSTRAP_TIME,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            persist_interval: DEFAULT_PERSIST_INTERVAL,
            address_book: None,
            listen_addr: None,
            external_address: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_inbound: DEFAULT_MAX_INBOUND,
            serve_sample_size: DEFAULT_SERVE_SAMPLE_SIZE,
            reports: None,
        }
    }

    /// Add seeds from a comma separated `id@host:port` list.
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - The builder for method chaining if every seed parsed.
    /// * `Err(CrawlerBuilderError)` - If a seed is malformed.
    pub fn with_seeds(mut self, seeds: &str) -> Result<Self, CrawlerBuilderError> {
        let parsed = parse_seeds(seeds).map_err(CrawlerBuilderError::InvalidSeed)?;
        self.seeds.extend(parsed);
        Ok(self)
    }

    /// Add already parsed seeds.
    pub fn with_seed_addresses(mut self, seeds: impl IntoIterator<Item = SeedAddress>) -> Self {
        self.seeds.extend(seeds);
        self
    }

    /// Name advertised to peers during the handshake.
    pub fn with_moniker(mut self, moniker: impl Into<String>) -> Self {
        self.moniker = moniker.into();
        self
    }

    /// Set the number of dial workers.
    ///
    /// Controls how many peers are crawled simultaneously.
    pub fn with_dial_workers(mut self, workers: usize) -> Self {
        self.dial_workers = workers;
        self
    }

    /// Set the capacity of the dial queue.
    ///
    /// Due addresses beyond this wait for a later tick.
    pub fn with_peer_queue_size(mut self, size: usize) -> Self {
        self.peer_queue_size = size;
        self
    }

    /// Accept private, loopback and other non-public addresses.
    ///
    /// Off by default. Useful for local test networks.
    pub fn with_allow_non_routable(mut self, allow: bool) -> Self {
        self.allow_non_routable = allow;
        self
    }

    /// Set the bound on connect plus handshake (defaults to 3 seconds).
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Set the bound on the address exchange (defaults to 10 seconds).
    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    /// Set how often the scheduler looks for due addresses once steady.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set how often the scheduler ticks while bootstrapping.
    pub fn with_bootstrap_tick_interval(mut self, interval: Duration) -> Self {
        self.bootstrap_tick_interval = interval;
        self
    }

    /// Set how long a queued job stays valid.
    pub fn with_job_ttl(mut self, ttl: Duration) -> Self {
        self.job_ttl = ttl;
        self
    }

    /// Set the recrawl and failure backoff windows.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Leave bootstrapping once the book holds `size` addresses, or after
    /// `max_time`, whichever comes first.
    pub fn with_bootstrap_target(mut self, size: usize, max_time: Duration) -> Self {
        self.min_viable_size = size;
        self.max_bootstrap_time = max_time;
        self
    }

    /// Set the bound on resolving a single seed (defaults to 10 seconds).
    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    /// Set how often the address book is flushed to disk.
    pub fn with_persist_interval(mut self, interval: Duration) -> Self {
        self.persist_interval = interval;
        self
    }

    /// Persist the address book at `path`, loading it on start.
    pub fn with_address_book(mut self, path: impl Into<PathBuf>) -> Self {
        self.address_book = Some(path.into());
        self
    }

    /// Accept inbound connections on `addr` and serve address samples.
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = Some(addr);
        self
    }

    /// Advertise `addr` to peers as where to reach us, for crawlers behind
    /// NAT or a load balancer.
    pub fn with_external_address(mut self, addr: SocketAddr) -> Self {
        self.external_address = Some(addr);
        self
    }

    /// Set the largest frame accepted from peers (defaults to 64 KiB).
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the limit on concurrently served inbound peers.
    pub fn with_max_inbound(mut self, max: usize) -> Self {
        self.max_inbound = max;
        self
    }

    /// Set how many addresses an inbound request is answered with.
    pub fn with_serve_sample_size(mut self, size: usize) -> Self {
        self.serve_sample_size = size;
        self
    }

    /// Report every finished crawl job on `reports`.
    pub fn with_reports(mut self, reports: mpsc::UnboundedSender<CrawlReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    fn validate(&self) -> Result<(), CrawlerBuilderError> {
        if self.dial_workers == 0 {
            return Err(CrawlerBuilderError::ZeroDialWorkers);
        }
        if self.peer_queue_size == 0 {
            return Err(CrawlerBuilderError::ZeroQueueSize);
        }
        if self.max_frame_size == 0 {
            return Err(CrawlerBuilderError::ZeroFrameSize);
        }
        for (name, duration) in [
            ("dial timeout", self.dial_timeout),
            ("exchange timeout", self.exchange_timeout),
            ("tick interval", self.tick_interval),
            ("bootstrap tick interval", self.bootstrap_tick_interval),
            ("persist interval", self.persist_interval),
            ("resolve timeout", self.resolve_timeout),
        ] {
            if duration.is_zero() {
                return Err(CrawlerBuilderError::ZeroDuration(name));
            }
        }
        Ok(())
    }

    /// Build the crawler, dialing peers over TCP.
    pub fn build(self) -> Result<Crawler<PeerConnector>, CrawlerBuilderError> {
        self.validate()?;
        let connector = PeerConnector::new(self.connection_configuration());
        self.build_with_connector(connector)
    }

    /// Build the crawler with a custom [`Connector`].
    pub fn build_with_connector<C: Connector>(
        self,
        connector: C,
    ) -> Result<Crawler<C>, CrawlerBuilderError> {
        self.validate()?;
        let connection = self.connection_configuration();
        let config = CrawlerConfig {
            node_id: self.node_id,
            strict_routing: !self.allow_non_routable,
            address_book: self.address_book,
            persist_interval: self.persist_interval,
            listen_addr: self.listen_addr,
            max_inbound: self.max_inbound,
            serve_sample_size: self.serve_sample_size,
            connection,
            pool: PoolConfig {
                dial_workers: self.dial_workers,
                queue_capacity: self.peer_queue_size,
                dial_timeout: self.dial_timeout,
                exchange_timeout: self.exchange_timeout,
            },
            scheduler: SchedulerConfig {
                seeds: self.seeds,
                tick_interval: self.tick_interval,
                bootstrap_tick_interval: self.bootstrap_tick_interval,
                job_ttl: self.job_ttl,
                backoff: self.backoff,
                min_viable_size: self.min_viable_size,
                max_bootstrap_time: self.max_bootstrap_time,
                resolve_timeout: self.resolve_timeout,
            },
        };
        Ok(Crawler::new(config, connector, self.reports))
    }

    fn connection_configuration(&self) -> ConnectionConfiguration {
        let config = ConnectionConfiguration::new(self.node_id.clone(), self.network.clone())
            .with_moniker(self.moniker.clone())
            .with_connection_timeout(self.dial_timeout)
            .with_listen_port(self.listen_addr.map_or(0, |addr| addr.port()))
            .with_max_frame_size(self.max_frame_size);
        match self.external_address {
            Some(addr) => config.with_external_address(addr),
            None => config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosmos_peers_connection::{NetAddress, NodeKey};

    const SEED: &str = "ba3bacc714817218562f743178228f23678b2873@seed.example.com:26656";

    #[test]
    fn test_parse_seeds() {
        let seeds = parse_seeds(&format!(
            " {SEED}, ,f4a4d5c6a1f2e3b4c5d6e7f8091a2b3c4d5e6f70@203.0.113.7:26656,"
        ))
        .unwrap();
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0].host, "seed.example.com");
        assert_eq!(seeds[1].port, 26656);

        assert!(parse_seeds("").unwrap().is_empty());
        assert!(parse_seeds("203.0.113.7:26656").is_err());
    }

    #[test]
    fn test_builder_validation() {
        let id = NodeKey::generate().id();

        assert!(CrawlerBuilder::new(id.clone(), "testnet").build().is_ok());
        assert!(matches!(
            CrawlerBuilder::new(id.clone(), "testnet").with_seeds("not-a-seed"),
            Err(CrawlerBuilderError::InvalidSeed(_))
        ));
        assert!(matches!(
            CrawlerBuilder::new(id.clone(), "testnet")
                .with_dial_workers(0)
                .build(),
            Err(CrawlerBuilderError::ZeroDialWorkers)
        ));
        assert!(matches!(
            CrawlerBuilder::new(id.clone(), "testnet")
                .with_peer_queue_size(0)
                .build(),
            Err(CrawlerBuilderError::ZeroQueueSize)
        ));
        assert!(matches!(
            CrawlerBuilder::new(id, "testnet")
                .with_exchange_timeout(Duration::ZERO)
                .build(),
            Err(CrawlerBuilderError::ZeroDuration("exchange timeout"))
        ));
    }

    #[test]
    fn test_builder_wires_configuration() {
        let id = NodeKey::generate().id();
        let crawler = CrawlerBuilder::new(id.clone(), "testnet")
            .with_seeds(SEED)
            .unwrap()
            .with_dial_workers(4)
            .with_allow_non_routable(true)
            .with_listen_addr("0.0.0.0:26656".parse().unwrap())
            .build()
            .unwrap();

        let config = crawler.config();
        assert_eq!(config.pool.dial_workers, 4);
        assert_eq!(config.pool.queue_capacity, DEFAULT_PEER_QUEUE_SIZE);
        assert!(!config.strict_routing);
        assert_eq!(config.scheduler.seeds.len(), 1);
        assert_eq!(config.connection.node_id, id);
        assert_eq!(config.connection.listen_port, 26656);
        assert_eq!(config.connection.connection_timeout, DEFAULT_DIAL_TIMEOUT);
        assert_eq!(config.connection.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(config.connection.external_address, None);
        assert_eq!(config.scheduler.resolve_timeout, DEFAULT_RESOLVE_TIMEOUT);
        assert_eq!(crawler.full_address(), None);
    }

    #[test]
    fn test_builder_wires_nat_settings() {
        let external: SocketAddr = "203.0.113.7:26656".parse().unwrap();
        let crawler = CrawlerBuilder::new(NodeKey::generate().id(), "testnet")
            .with_listen_addr("0.0.0.0:36656".parse().unwrap())
            .with_external_address(external)
            .with_max_frame_size(1 << 20)
            .build()
            .unwrap();

        let config = crawler.config();
        assert_eq!(config.connection.external_address, Some(external));
        assert_eq!(config.connection.listen_port, 36656);
        assert_eq!(config.connection.max_frame_size, 1 << 20);
        assert_eq!(
            crawler.full_address(),
            Some(NetAddress::new(config.node_id.clone(), external.ip(), 26656))
        );

        assert_eq!(
            CrawlerBuilder::new(NodeKey::generate().id(), "testnet")
                .with_max_frame_size(0)
                .build()
                .unwrap_err(),
            CrawlerBuilderError::ZeroFrameSize
        );
    }
}
