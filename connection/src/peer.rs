//! Node identifiers and network addresses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// Number of raw bytes in a node identifier.
///
/// Identifiers travel as lowercase hex, so the textual form is twice as long.
pub const NODE_ID_BYTES: usize = 20;

/// Errors produced when parsing identifiers or addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Address has no `id@` prefix.
    MissingNodeId(String),
    /// Node identifier is not 40 hex characters.
    InvalidNodeId(String),
    /// Host part is empty or not a valid IP when one is required.
    InvalidHost(String),
    /// Port is missing, not a number, or zero.
    InvalidPort(String),
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::MissingNodeId(s) => write!(f, "address {s:?} is missing a node id"),
            AddressError::InvalidNodeId(s) => write!(f, "invalid node id {s:?}"),
            AddressError::InvalidHost(s) => write!(f, "invalid host in {s:?}"),
            AddressError::InvalidPort(s) => write!(f, "invalid port in {s:?}"),
        }
    }
}

impl std::error::Error for AddressError {}

/// Identity of a node on the network.
///
/// Always stored as 40 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Build an identifier from its raw bytes.
    pub fn from_bytes(bytes: [u8; NODE_ID_BYTES]) -> Self {
        NodeId(hex::encode(bytes))
    }

    /// The hex form of the identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for NodeId {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match hex::decode(&lower) {
            Ok(bytes) if bytes.len() == NODE_ID_BYTES => Ok(NodeId(lower)),
            _ => Err(AddressError::InvalidNodeId(s.to_string())),
        }
    }
}

impl TryFrom<String> for NodeId {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A dialable peer address: node identity plus IP and port.
///
/// The textual form is `id@ip:port` (IPv6 hosts are bracketed). Two addresses
/// are the same entry if and only if all three parts match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetAddress {
    /// Identity the remote is expected to present during the handshake.
    pub id: NodeId,
    /// The peer's IP address.
    pub ip: IpAddr,
    /// The port the peer is listening on.
    pub port: u16,
}

impl NetAddress {
    /// Create a new address.
    pub fn new(id: NodeId, ip: IpAddr, port: u16) -> Self {
        NetAddress { id, ip, port }
    }

    /// Socket address to dial.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl FromStr for NetAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (id, rest) = s
            .split_once('@')
            .ok_or_else(|| AddressError::MissingNodeId(s.to_string()))?;
        let id = id.parse()?;
        let socket: SocketAddr = rest
            .parse()
            .map_err(|_| AddressError::InvalidHost(s.to_string()))?;
        if socket.port() == 0 {
            return Err(AddressError::InvalidPort(s.to_string()));
        }
        Ok(NetAddress::new(id, socket.ip(), socket.port()))
    }
}

impl TryFrom<String> for NetAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NetAddress> for String {
    fn from(addr: NetAddress) -> Self {
        addr.to_string()
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.socket_addr())
    }
}

/// A configured seed: like [`NetAddress`] but the host may be a DNS name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeedAddress {
    /// Identity the seed must present.
    pub id: NodeId,
    /// IP literal or DNS name.
    pub host: String,
    /// Port to dial.
    pub port: u16,
}

impl SeedAddress {
    /// Resolve the host into dialable addresses.
    ///
    /// IP literals resolve to themselves without touching DNS.
    pub async fn resolve(&self) -> io::Result<Vec<NetAddress>> {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(vec![NetAddress::new(self.id.clone(), ip, self.port)]);
        }

        let resolved = tokio::net::lookup_host((self.host.as_str(), self.port)).await?;
        let mut addrs: Vec<NetAddress> = resolved
            .map(|socket| NetAddress::new(self.id.clone(), socket.ip(), socket.port()))
            .collect();
        addrs.sort();
        addrs.dedup();
        Ok(addrs)
    }
}

impl FromStr for SeedAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (id, rest) = s
            .split_once('@')
            .ok_or_else(|| AddressError::MissingNodeId(s.to_string()))?;
        let id = id.parse()?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| AddressError::InvalidPort(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(AddressError::InvalidHost(s.to_string()));
        }
        let port = match port.parse::<u16>() {
            Ok(port) if port != 0 => port,
            _ => return Err(AddressError::InvalidPort(s.to_string())),
        };
        Ok(SeedAddress {
            id,
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for SeedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}@[{}]:{}", self.id, self.host, self.port)
        } else {
            write!(f, "{}@{}:{}", self.id, self.host, self.port)
        }
    }
}
