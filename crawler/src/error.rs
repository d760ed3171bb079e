//! Errors raised while crawling.

use crate::builder::CrawlerBuilderError;
use cosmos_peers_connection::{ConnectionError, NetAddress};
use std::fmt;
use std::io;

/// Failures of crawler operations.
///
/// Only [`CrawlerError::Configuration`] is fatal, everything else concerns a
/// single address or flush and is recovered where it happens.
#[derive(Debug)]
pub enum CrawlerError {
    /// The address book refused an address.
    AddressRejected {
        addr: NetAddress,
        reason: &'static str,
    },
    /// Could not reach or handshake with a peer.
    DialFailure(ConnectionError),
    /// Peer broke the exchange protocol.
    ProtocolViolation(String),
    /// Address book snapshot could not be read or written.
    PersistenceFailure(io::Error),
    /// Invalid settings.
    Configuration(CrawlerBuilderError),
    /// Could not bind the inbound listener.
    Listen(io::Error),
}

impl fmt::Display for CrawlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlerError::AddressRejected { addr, reason } => {
                write!(f, "address {addr} rejected: {reason}")
            }
            CrawlerError::DialFailure(e) => write!(f, "dial failed: {e}"),
            CrawlerError::ProtocolViolation(reason) => write!(f, "protocol violation: {reason}"),
            CrawlerError::PersistenceFailure(e) => write!(f, "address book persistence: {e}"),
            CrawlerError::Configuration(e) => write!(f, "configuration error: {e}"),
            CrawlerError::Listen(e) => write!(f, "failed to listen: {e}"),
        }
    }
}

impl std::error::Error for CrawlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CrawlerError::DialFailure(e) => Some(e),
            CrawlerError::PersistenceFailure(e) => Some(e),
            CrawlerError::Configuration(e) => Some(e),
            CrawlerError::Listen(e) => Some(e),
            CrawlerError::AddressRejected { .. } | CrawlerError::ProtocolViolation(_) => None,
        }
    }
}

impl From<ConnectionError> for CrawlerError {
    fn from(e: ConnectionError) -> Self {
        CrawlerError::DialFailure(e)
    }
}

impl From<CrawlerBuilderError> for CrawlerError {
    fn from(e: CrawlerBuilderError) -> Self {
        CrawlerError::Configuration(e)
    }
}

impl From<serde_json::Error> for CrawlerError {
    fn from(e: serde_json::Error) -> Self {
        CrawlerError::PersistenceFailure(io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
