//! Connection configuration types and constants.

use super::handshake::NodeInfo;
use crate::message::{ChannelId, PEX_CHANNEL};
use crate::peer::NodeId;
use crate::transport::DEFAULT_MAX_FRAME_SIZE;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Default timeout for TCP connect plus handshake.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(3);

/// Moniker advertised when none is configured.
pub const DEFAULT_MONIKER: &str = "cosmos-peers";

/// Configuration used to build a connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfiguration {
    /// Our own identity, advertised in the handshake.
    pub node_id: NodeId,
    /// Network (chain id) both sides must agree on.
    pub network: String,
    /// Human readable name advertised to peers.
    pub moniker: String,
    /// Channels we are willing to open.
    pub channels: Vec<ChannelId>,
    /// Port we accept connections on, zero when not listening.
    pub listen_port: u16,
    /// Endpoint peers should dial us on, when it differs from the socket we
    /// listen on (behind NAT).
    pub external_address: Option<SocketAddr>,
    /// Timeout for connection establishment and handshake.
    pub connection_timeout: Duration,
    /// Largest frame body accepted from the remote.
    pub max_frame_size: usize,
}

impl ConnectionConfiguration {
    /// Creates a configuration that only speaks the peer-exchange channel.
    ///
    /// # Arguments
    ///
    /// * `node_id` - Our identity.
    /// * `network` - Chain id peers must match.
    pub fn new(node_id: NodeId, network: impl Into<String>) -> Self {
        Self {
            node_id,
            network: network.into(),
            moniker: DEFAULT_MONIKER.to_string(),
            channels: vec![PEX_CHANNEL],
            listen_port: 0,
            external_address: None,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Set the timeout for connection establishment.
    ///
    /// Applies to the TCP connect and the handshake separately.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use cosmos_peers_connection::{ConnectionConfiguration, NodeKey};
    ///
    /// let config = ConnectionConfiguration::new(NodeKey::generate().id(), "cosmoshub-4")
    ///     .with_connection_timeout(Duration::from_secs(5));
    /// assert_eq!(config.connection_timeout, Duration::from_secs(5));
    /// ```
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the moniker advertised to peers.
    pub fn with_moniker(mut self, moniker: impl Into<String>) -> Self {
        self.moniker = moniker.into();
        self
    }

    /// Set the port advertised as our listening port.
    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    /// Advertise `addr` as the endpoint peers should dial.
    pub fn with_external_address(mut self, addr: SocketAddr) -> Self {
        self.external_address = Some(addr);
        self
    }

    /// Set the largest frame body accepted from peers.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub(crate) fn node_info(&self) -> NodeInfo {
        NodeInfo {
            id: self.node_id.clone(),
            network: self.network.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            moniker: self.moniker.clone(),
            channels: self.channels.clone(),
            listen_port: self.listen_port,
            external_address: self.external_address,
        }
    }
}

impl fmt::Display for ConnectionConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConnectionConfiguration {{ id: {}, network: {:?}, moniker: {:?}, channels: {:?}, listen_port: {} }}",
            self.node_id, self.network, self.moniker, self.channels, self.listen_port
        )
    }
}
