//! Peer connections.
//!
//! A [`Connection`] is a TCP stream that has completed the node info
//! handshake. Protocol traffic flows over a [`Channel`] opened on it.
//!
//! # Examples
//!
//! Dialing a peer and asking for addresses.
//!
//! ```no_run
//! use cosmos_peers_connection::{
//!     Connection, ConnectionConfiguration, NetAddress, NodeKey, PexMessage, PEX_CHANNEL,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let peer: NetAddress =
//!     "f4a4d5c6a1f2e3b4c5d6e7f8091a2b3c4d5e6f70@127.0.0.1:26656".parse()?;
//! let config = ConnectionConfiguration::new(NodeKey::generate().id(), "cosmoshub-4");
//!
//! let connection = Connection::tcp(peer, &config).await?;
//! let mut channel = connection.open_channel(PEX_CHANNEL)?;
//! channel.send(&PexMessage::AddressRequest).await?;
//! let response = channel.receive().await?;
//! println!("Received: {response}");
//! channel.close().await?;
//! # Ok(())
//! # }
//! ```

mod configuration;
mod error;
mod handshake;
mod io;
mod tcp;

pub use configuration::{ConnectionConfiguration, DEFAULT_CONNECTION_TIMEOUT, DEFAULT_MONIKER};
pub use error::ConnectionError;
pub use handshake::{unix_timestamp, NodeInfo};
pub use io::{AsyncChannel, AsyncConnection};
pub use tcp::{TcpChannel, TcpConnection};

use crate::message::{ChannelId, PexMessage};
use crate::peer::NetAddress;

/// Provides a unified interface over connection transports.
///
/// Note that `Connection` does *not* implement `Clone` as it owns I/O resources.
#[derive(Debug)]
pub enum Connection {
    Tcp(TcpConnection),
}

impl Connection {
    /// Address of the peer this connection is established with.
    pub fn peer(&self) -> &NetAddress {
        match self {
            Connection::Tcp(conn) => conn.peer(),
        }
    }

    /// Node info the peer presented during the handshake.
    pub fn node_info(&self) -> &NodeInfo {
        match self {
            Connection::Tcp(conn) => conn.node_info(),
        }
    }

    /// Open a typed message stream on `channel`, consuming the connection.
    pub fn open_channel(self, channel: ChannelId) -> Result<Channel, ConnectionError> {
        match self {
            Connection::Tcp(conn) => Ok(Channel::Tcp(conn.open_channel(channel)?)),
        }
    }

    /// Dial a peer over TCP and perform the handshake.
    ///
    /// # Returns
    ///
    /// * `Ok(`[`Self`]`)` - A successfully established and handshaked connection
    /// * `Err(`[`ConnectionError`]`)` - If the connection attempt or handshake failed
    pub async fn tcp(
        peer: NetAddress,
        configuration: &ConnectionConfiguration,
    ) -> Result<Self, ConnectionError> {
        Ok(Connection::Tcp(tcp::connect(peer, configuration).await?))
    }

    /// Accept an incoming TCP connection and perform the handshake.
    ///
    /// Unlike [`Connection::tcp`] the peer identity is learned during the
    /// handshake rather than checked against a dialed address.
    pub async fn tcp_accept(
        stream: tokio::net::TcpStream,
        configuration: &ConnectionConfiguration,
    ) -> Result<Self, ConnectionError> {
        Ok(Connection::Tcp(tcp::accept(stream, configuration).await?))
    }
}

impl std::fmt::Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connection::Tcp(tcp) => tcp.fmt(f),
        }
    }
}

/// A message stream opened on a [`Connection`].
#[derive(Debug)]
pub enum Channel {
    Tcp(TcpChannel),
}

impl Channel {
    /// Address of the remote end.
    pub fn peer(&self) -> &NetAddress {
        match self {
            Channel::Tcp(channel) => channel.peer(),
        }
    }

    /// Send a message to the peer.
    pub async fn send(&mut self, message: &PexMessage) -> Result<(), ConnectionError> {
        match self {
            Channel::Tcp(channel) => channel.send(message).await,
        }
    }

    /// Receive a message from the peer.
    pub async fn receive(&mut self) -> Result<PexMessage, ConnectionError> {
        match self {
            Channel::Tcp(channel) => channel.receive().await,
        }
    }

    /// Close the channel's write side.
    pub async fn close(&mut self) -> Result<(), ConnectionError> {
        match self {
            Channel::Tcp(channel) => channel.close().await,
        }
    }
}
