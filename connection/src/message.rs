//! Peer-exchange wire messages.

use crate::peer::{NetAddress, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Identifies a logical stream multiplexed over one connection.
pub type ChannelId = u8;

/// Channel carrying [`PexMessage`]s.
pub const PEX_CHANNEL: ChannelId = 0x00;

/// An address as advertised by a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PexAddress {
    pub id: NodeId,
    pub ip: IpAddr,
    pub port: u16,
    /// Unix seconds the advertising peer last heard from this address.
    pub last_seen: u64,
}

impl PexAddress {
    pub fn new(addr: NetAddress, last_seen: u64) -> Self {
        PexAddress {
            id: addr.id,
            ip: addr.ip,
            port: addr.port,
            last_seen,
        }
    }

    /// The dialable part of the advertisement.
    pub fn net_address(&self) -> NetAddress {
        NetAddress::new(self.id.clone(), self.ip, self.port)
    }
}

/// Messages exchanged on [`PEX_CHANNEL`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PexMessage {
    /// Ask the remote for a sample of the addresses it knows.
    AddressRequest,
    /// Reply to an [`PexMessage::AddressRequest`].
    AddressResponse(Vec<PexAddress>),
}

impl fmt::Display for PexMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PexMessage::AddressRequest => write!(f, "AddressRequest"),
            PexMessage::AddressResponse(addrs) => {
                write!(f, "AddressResponse({} addresses)", addrs.len())
            }
        }
    }
}
