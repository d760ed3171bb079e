//! Peer exchange protocol handler.
//!
//! The protocol logic is a pure transition function, [`PexState::handle`],
//! which turns connection events into actions. The async drivers
//! [`request_addresses`] and [`serve_addresses`] feed it events from a
//! [`PeerConnection`] and carry out what it asks for.

use crate::book::AddressBook;
use crate::connection::PeerConnection;
use crate::error::CrawlerError;
use cosmos_peers_connection::{PexAddress, PexMessage};
use log::debug;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

/// Most addresses a response may carry before it counts as abuse.
pub const MAX_ADDRESSES_PER_RESPONSE: usize = 250;

/// Addresses returned to an inbound request by default.
pub const DEFAULT_SERVE_SAMPLE_SIZE: usize = 30;

/// Who opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We dialed, and ask for addresses.
    Outbound,
    /// The peer dialed, and may ask us for addresses.
    Inbound,
}

/// Something that happened on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PexEvent {
    Connected(Direction),
    MessageReceived(PexMessage),
    TimedOut,
    Disconnected,
}

/// What the driver should do in response to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PexAction {
    Send(PexMessage),
    /// Reply with a sample from the address book.
    ServeSample,
    /// Record these addresses as learned from the peer.
    Learn(Vec<PexAddress>),
    MarkGood,
    MarkFailed(String),
    Disconnect,
}

/// Exchange progress on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PexState {
    /// Connection not yet established.
    Idle,
    /// Sent a request, waiting for the one response.
    AwaitingResponse,
    /// Waiting for the peer's request.
    AwaitingRequest,
    /// Exchange over, nothing more happens on this connection.
    Done,
}

impl PexState {
    /// Advance the exchange.
    pub fn handle(self, event: PexEvent) -> (PexState, Vec<PexAction>) {
        match (self, event) {
            (PexState::Done, _) => (PexState::Done, vec![]),
            (_, PexEvent::Disconnected) if self != PexState::AwaitingResponse => {
                (PexState::Done, vec![])
            }

            (PexState::Idle, PexEvent::Connected(Direction::Outbound)) => (
                PexState::AwaitingResponse,
                vec![PexAction::Send(PexMessage::AddressRequest)],
            ),
            (PexState::Idle, PexEvent::Connected(Direction::Inbound)) => {
                (PexState::AwaitingRequest, vec![])
            }

            (PexState::AwaitingResponse, PexEvent::MessageReceived(message)) => match message {
                PexMessage::AddressResponse(addrs) if addrs.len() > MAX_ADDRESSES_PER_RESPONSE => (
                    PexState::Done,
                    vec![
                        PexAction::MarkFailed(format!(
                            "response carried {} addresses, limit is {MAX_ADDRESSES_PER_RESPONSE}",
                            addrs.len()
                        )),
                        PexAction::Disconnect,
                    ],
                ),
                PexMessage::AddressResponse(addrs) => (
                    PexState::Done,
                    vec![
                        PexAction::Learn(addrs),
                        PexAction::MarkGood,
                        PexAction::Disconnect,
                    ],
                ),
                other => (
                    PexState::Done,
                    vec![
                        PexAction::MarkFailed(format!("expected AddressResponse, got {other}")),
                        PexAction::Disconnect,
                    ],
                ),
            },
            (PexState::AwaitingResponse, PexEvent::TimedOut) => (
                PexState::Done,
                vec![
                    PexAction::MarkFailed("no response in time".to_string()),
                    PexAction::Disconnect,
                ],
            ),
            (PexState::AwaitingResponse, PexEvent::Disconnected) => (
                PexState::Done,
                vec![PexAction::MarkFailed("disconnected before responding".to_string())],
            ),

            // Serve once, then hang up.
            (PexState::AwaitingRequest, PexEvent::MessageReceived(PexMessage::AddressRequest)) => (
                PexState::Done,
                vec![PexAction::ServeSample, PexAction::Disconnect],
            ),

            // Unsolicited messages, repeated connects and timeouts while serving.
            (_, _) => (PexState::Done, vec![PexAction::Disconnect]),
        }
    }

    pub fn is_done(&self) -> bool {
        *self == PexState::Done
    }
}

/// Ask a freshly dialed peer for addresses.
///
/// The whole exchange is bounded by `exchange_timeout`. The caller is
/// responsible for closing the connection afterward.
///
/// # Returns
///
/// * `Ok(Vec<PexAddress>)` - The addresses the peer advertised.
/// * `Err(CrawlerError)` - If the peer misbehaved, went silent or the
///   connection broke.
pub async fn request_addresses<C: PeerConnection>(
    conn: &mut C,
    exchange_timeout: Duration,
) -> Result<Vec<PexAddress>, CrawlerError> {
    let deadline = Instant::now() + exchange_timeout;
    let mut state = PexState::Idle;
    let mut event = PexEvent::Connected(Direction::Outbound);
    let mut learned = Vec::new();
    let mut failure = None;

    loop {
        let (next, actions) = state.handle(event);
        state = next;

        for action in actions {
            match action {
                PexAction::Send(message) => {
                    conn.send(&message).await?;
                    debug!("Sent {message} to {}", conn.peer());
                }
                PexAction::Learn(addrs) => learned = addrs,
                PexAction::MarkGood => failure = None,
                PexAction::MarkFailed(reason) => failure = Some(reason),
                // Crawl-and-drop, the caller closes.
                PexAction::Disconnect | PexAction::ServeSample => {}
            }
        }

        if state.is_done() {
            return match failure {
                Some(reason) => Err(CrawlerError::ProtocolViolation(reason)),
                None => {
                    debug!("Learned {} addresses from {}", learned.len(), conn.peer());
                    Ok(learned)
                }
            };
        }

        event = match timeout_at(deadline, conn.receive()).await {
            Ok(Ok(message)) => PexEvent::MessageReceived(message),
            Ok(Err(e)) => {
                debug!("Connection to {} broke: {e}", conn.peer());
                PexEvent::Disconnected
            }
            Err(_) => PexEvent::TimedOut,
        };
    }
}

/// Answer an inbound peer's address request.
///
/// Replies once with up to `sample_size` addresses, never including the
/// requester's own, then closes the connection.
///
/// # Returns
///
/// Number of addresses sent.
pub async fn serve_addresses<C: PeerConnection>(
    conn: &mut C,
    book: &AddressBook,
    sample_size: usize,
    request_timeout: Duration,
) -> Result<usize, CrawlerError> {
    let deadline = Instant::now() + request_timeout;
    let mut state = PexState::Idle;
    let mut event = PexEvent::Connected(Direction::Inbound);
    let mut served = 0;

    loop {
        let (next, actions) = state.handle(event);
        state = next;

        for action in actions {
            match action {
                PexAction::ServeSample => {
                    let requester = conn.peer().id.clone();
                    let sample: Vec<PexAddress> = book
                        .pick_known(sample_size, Some(&requester))
                        .await
                        .into_iter()
                        .map(|entry| PexAddress::new(entry.addr, entry.last_seen))
                        .collect();
                    served = sample.len();
                    conn.send(&PexMessage::AddressResponse(sample)).await?;
                    debug!("Served {served} addresses to {}", conn.peer());
                }
                PexAction::Send(message) => conn.send(&message).await?,
                PexAction::Disconnect => {
                    if let Err(e) = conn.close().await {
                        debug!("Failed to close connection to {}: {e}", conn.peer());
                    }
                }
                PexAction::Learn(_) | PexAction::MarkGood | PexAction::MarkFailed(_) => {}
            }
        }

        if state.is_done() {
            return Ok(served);
        }

        event = match timeout_at(deadline, conn.receive()).await {
            Ok(Ok(message)) => PexEvent::MessageReceived(message),
            Ok(Err(_)) => PexEvent::Disconnected,
            Err(_) => PexEvent::TimedOut,
        };
    }
}
