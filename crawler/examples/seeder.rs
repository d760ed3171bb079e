//! Run a seed crawler against a CometBFT-style network.
//!
//! The node key lives at `<home>/config/node_key.json` and the address book at
//! `<home>/data/addrbook.json`, both created on first run.

use clap::Parser;
use cosmos_peers_crawler::{
    CancellationToken, CrawlerBuilder, NodeKey, DEFAULT_DIAL_WORKERS, DEFAULT_MAX_FRAME_SIZE,
    DEFAULT_PEER_QUEUE_SIZE,
};
use log::LevelFilter;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Comma separated seeds in id@host:port form.
    #[arg(short, long, env = "SEEDS", default_value = "")]
    seeds: String,

    /// Network identifier peers must match.
    #[arg(short, long, env = "CHAIN_ID", default_value = "cosmoshub-4")]
    chain_id: String,

    /// Directory holding the node key and address book.
    #[arg(long, env = "HOME_DIR", default_value = ".seeder")]
    home_dir: PathBuf,

    /// Number of concurrent dials.
    #[arg(long, env = "DIAL_WORKERS", default_value_t = DEFAULT_DIAL_WORKERS)]
    dial_workers: usize,

    /// Capacity of the crawl queue.
    #[arg(long, env = "PEER_QUEUE_SIZE", default_value_t = DEFAULT_PEER_QUEUE_SIZE)]
    peer_queue_size: usize,

    /// Accept private, loopback and other non-routable addresses.
    #[arg(long, env = "ALLOW_NON_ROUTABLE")]
    allow_non_routable: bool,

    /// Serve addresses to inbound peers on this address.
    #[arg(long, env = "LISTEN_ADDR")]
    listen_addr: Option<SocketAddr>,

    /// Address advertised to peers when behind NAT, in ip:port form.
    #[arg(long, env = "EXTERNAL_ADDRESS")]
    external_address: Option<SocketAddr>,

    /// Largest frame accepted from a peer, in bytes.
    #[arg(long, env = "MAX_FRAME_SIZE", default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,

    /// Print the node id and exit.
    #[arg(long)]
    show_node_id: bool,

    /// Log level.
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] {} - {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log_level)
        .chain(std::io::stderr())
        .apply()?;

    let key = NodeKey::load_or_generate(&args.home_dir.join("config").join("node_key.json"))?;
    if args.show_node_id {
        println!("{}", key.id());
        return Ok(());
    }

    log::info!("CRAWLING {}", args.chain_id);

    let (reports_tx, mut reports_rx) = mpsc::unbounded_channel();
    let mut builder = CrawlerBuilder::new(key.id(), args.chain_id)
        .with_seeds(&args.seeds)?
        .with_dial_workers(args.dial_workers)
        .with_peer_queue_size(args.peer_queue_size)
        .with_allow_non_routable(args.allow_non_routable)
        .with_max_frame_size(args.max_frame_size)
        .with_address_book(args.home_dir.join("data").join("addrbook.json"))
        .with_reports(reports_tx);
    if let Some(addr) = args.listen_addr {
        log::debug!("Listening for inbound peers on {addr}");
        builder = builder.with_listen_addr(addr);
    }
    if let Some(addr) = args.external_address {
        builder = builder.with_external_address(addr);
    }
    let crawler = builder.build()?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for ctrl-c: {e}");
            }
            cancel.cancel();
        }
    });
    tokio::spawn(async move {
        while let Some(report) = reports_rx.recv().await {
            log::info!("{report}");
        }
    });

    crawler
        .run(cancel)
        .await
        .map_err(|e| format!("Crawler error: {e}"))?;

    Ok(())
}
