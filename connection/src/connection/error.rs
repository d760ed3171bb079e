//! Error types for connection handling.

use crate::message::ChannelId;
use crate::peer::NodeId;
use crate::transport::TransportError;
use std::error::Error;
use std::fmt;
use std::io;

/// Errors that can occur during peer connection establishment and communication.
#[derive(Debug)]
pub enum ConnectionError {
    /// An I/O error occurred during network operations.
    Io(io::Error),
    /// The transport layer (framing and serialization) failed.
    TransportFailed(TransportError),
    /// Remote sent something other than its node info during the handshake.
    HandshakeFailed(String),
    /// Remote is on a different network (chain id).
    NetworkMismatch { ours: String, theirs: String },
    /// Remote presented a different identity than the one dialed.
    UnexpectedNodeId { expected: NodeId, actual: NodeId },
    /// Detected a connection loop (attempting to connect to ourselves).
    ///
    /// Possible causes:
    ///
    /// * Our own address was gossiped back to us by a peer.
    /// * Port forwarding issues cause external connections to loopback.
    ConnectionLoop,
    /// Remote did not advertise the requested channel.
    UnsupportedChannel(ChannelId),
    /// Connect or handshake did not finish in time.
    Timeout,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Io(err) => write!(f, "Connection error: {err}"),
            ConnectionError::TransportFailed(err) => {
                write!(f, "Transport layer failed in peer connection: {err}")
            }
            ConnectionError::HandshakeFailed(reason) => write!(f, "Handshake failed: {reason}"),
            ConnectionError::NetworkMismatch { ours, theirs } => {
                write!(f, "Peer is on network {theirs:?}, expected {ours:?}")
            }
            ConnectionError::UnexpectedNodeId { expected, actual } => {
                write!(f, "Dialed {expected} but peer identified as {actual}")
            }
            ConnectionError::ConnectionLoop => {
                write!(f, "Detected connection to self (matching node id)")
            }
            ConnectionError::UnsupportedChannel(channel) => {
                write!(f, "Peer does not support channel {channel:#04x}")
            }
            ConnectionError::Timeout => write!(f, "Connection attempt timed out"),
        }
    }
}

impl Error for ConnectionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConnectionError::Io(err) => Some(err),
            ConnectionError::TransportFailed(err) => Some(err),
            ConnectionError::HandshakeFailed(_) => None,
            ConnectionError::NetworkMismatch { .. } => None,
            ConnectionError::UnexpectedNodeId { .. } => None,
            ConnectionError::ConnectionLoop => None,
            ConnectionError::UnsupportedChannel(_) => None,
            ConnectionError::Timeout => None,
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        ConnectionError::Io(err)
    }
}

impl From<TransportError> for ConnectionError {
    fn from(err: TransportError) -> Self {
        ConnectionError::TransportFailed(err)
    }
}
