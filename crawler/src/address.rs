//! Address book entries and the network rules applied to them.

use cosmos_peers_connection::NetAddress;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Consecutive failures after which a tried entry falls back to new.
pub const DEMOTION_THRESHOLD: u32 = 3;

/// Seconds of eviction score charged per consecutive failure.
const FAILURE_PENALTY_SECS: u64 = 3600;

/// Which table of the address book an entry lives in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Heard about, never successfully crawled (or demoted).
    #[default]
    New,
    /// Successfully crawled at least once.
    Tried,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::New => write!(f, "new"),
            Tier::Tried => write!(f, "tried"),
        }
    }
}

/// Where the book first heard of an address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressSource {
    /// Configured seed, treated as self-sourced for bucketing.
    #[default]
    Seed,
    /// Learned in an address response from the peer at this IP.
    Peer(IpAddr),
}

impl fmt::Display for AddressSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressSource::Seed => write!(f, "seed"),
            AddressSource::Peer(ip) => write!(f, "peer {ip}"),
        }
    }
}

/// An address book entry.
///
/// This is also the persisted form, so every field other than the address
/// itself tolerates being absent from an older snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownAddress {
    pub addr: NetAddress,
    #[serde(rename = "src", default)]
    pub source: AddressSource,
    #[serde(default)]
    pub tier: Tier,
    /// Unix seconds we last heard of the address from anyone.
    #[serde(default)]
    pub last_seen: u64,
    /// Unix seconds of the last dial scheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<u64>,
    /// Unix seconds of the last successful exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<u64>,
    #[serde(default)]
    pub attempts: u32,
    /// Consecutive failures, reset by a success.
    #[serde(default)]
    pub failures: u32,
}

impl KnownAddress {
    /// A fresh entry in the new table.
    pub fn new(addr: NetAddress, source: AddressSource, last_seen: u64) -> Self {
        KnownAddress {
            addr,
            source,
            tier: Tier::New,
            last_seen,
            last_attempt: None,
            last_success: None,
            attempts: 0,
            failures: 0,
        }
    }

    /// How strongly this entry should be evicted from a full bucket.
    ///
    /// Stale and failing entries score highest.
    pub fn eviction_score(&self, now: u64) -> u64 {
        (self.failures as u64)
            .saturating_mul(FAILURE_PENALTY_SECS)
            .saturating_add(now.saturating_sub(self.last_seen))
    }

    /// Group of the network the entry was learned from.
    pub(crate) fn source_group(&self) -> Vec<u8> {
        match self.source {
            AddressSource::Seed => group(&self.addr.ip),
            AddressSource::Peer(ip) => group(&ip),
        }
    }
}

impl fmt::Display for KnownAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {} failures, from {})",
            self.addr, self.tier, self.failures, self.source
        )
    }
}

/// Whether an IP is reachable on the public internet.
///
/// Strict-routing mode refuses anything this rejects.
pub fn is_routable(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ip) => is_routable_v4(ip),
        IpAddr::V6(ip) => match ip.to_ipv4_mapped() {
            Some(mapped) => is_routable_v4(&mapped),
            None => is_routable_v6(ip),
        },
    }
}

fn is_routable_v4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    !(ip.is_unspecified()
        || ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        // 0.0.0.0/8
        || octets[0] == 0
        // Shared address space, 100.64.0.0/10.
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
        // Reserved, 240.0.0.0/4.
        || octets[0] >= 240)
}

fn is_routable_v6(ip: &Ipv6Addr) -> bool {
    let segments = ip.segments();
    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_multicast()
        // Unique local, fc00::/7.
        || (segments[0] & 0xfe00) == 0xfc00
        // Link local, fe80::/10.
        || (segments[0] & 0xffc0) == 0xfe80
        // Documentation, 2001:db8::/32.
        || (segments[0] == 0x2001 && segments[1] == 0x0db8))
}

/// The network group an IP belongs to: `/16` for IPv4, `/32` for IPv6.
///
/// Addresses in one group are assumed to be under a single operator's control.
pub fn group(ip: &IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(ip) => {
            let octets = ip.octets();
            vec![4, octets[0], octets[1]]
        }
        IpAddr::V6(ip) => match ip.to_ipv4_mapped() {
            Some(mapped) => group(&IpAddr::V4(mapped)),
            None => {
                let mut key = vec![6];
                key.extend_from_slice(&ip.octets()[..4]);
                key
            }
        },
    }
}
