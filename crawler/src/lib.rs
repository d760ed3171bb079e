mod address;
mod book;
mod builder;
mod connection;
mod crawler;
mod error;
mod pex;
mod pool;
mod scheduler;

pub use address::{is_routable, AddressSource, KnownAddress, Tier, DEMOTION_THRESHOLD};
pub use book::{
    AddressBook, BookStats, BUCKET_SIZE, MAX_PICKS_PER_BUCKET, NEW_BUCKET_COUNT,
    TRIED_BUCKET_COUNT,
};
pub use builder::{
    parse_seeds, CrawlerBuilder, CrawlerBuilderError, DEFAULT_DIAL_WORKERS,
    DEFAULT_PEER_QUEUE_SIZE,
};
pub use connection::{Connector, DnsResolver, PeerConnection, PeerConnector, SeedResolver};
pub use crawler::{Crawler, CrawlerConfig};
pub use error::CrawlerError;
pub use pex::{
    request_addresses, serve_addresses, Direction, PexAction, PexEvent, PexState,
    DEFAULT_SERVE_SAMPLE_SIZE, MAX_ADDRESSES_PER_RESPONSE,
};
pub use pool::{
    CrawlJob, CrawlReport, DialWorkerPool, EnqueueError, JobOutcome, PoolConfig,
};
pub use scheduler::{select_due, BackoffPolicy, CrawlScheduler, SchedulerConfig, SchedulerState};

// Re-exports.
pub use cosmos_peers_connection::{
    AddressError, ConnectionConfiguration, ConnectionError, NetAddress, NodeId, NodeKey,
    PexAddress, PexMessage, SeedAddress, DEFAULT_MAX_FRAME_SIZE,
};
pub use tokio_util::sync::CancellationToken;
