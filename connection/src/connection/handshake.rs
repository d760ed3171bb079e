//! Node info handshake.
//!
//! Both sides write their [`NodeInfo`] as the first frame and read the
//! remote's. The exchange is symmetric so neither side waits on the other
//! before writing.

use super::configuration::ConnectionConfiguration;
use super::error::ConnectionError;
use crate::message::ChannelId;
use crate::peer::NodeId;
use crate::transport::{FrameReader, FrameWriter};
use log::debug;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncWrite};

/// Channel reserved for the handshake frame.
pub(crate) const HANDSHAKE_CHANNEL: ChannelId = 0xff;

/// Gets the current Unix timestamp in seconds.
///
/// Returns zero if the system clock is set before the Unix epoch.
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// What a node tells its peer about itself during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    /// Chain id.
    pub network: String,
    pub version: String,
    pub moniker: String,
    /// Channels the node will accept.
    pub channels: Vec<ChannelId>,
    /// Port the node listens on, zero when it does not accept connections.
    pub listen_port: u16,
    /// Endpoint the node asks to be dialed on, overriding the socket address.
    pub external_address: Option<SocketAddr>,
}

impl NodeInfo {
    /// Whether the node accepts connections at all.
    pub fn is_listening(&self) -> bool {
        self.listen_port != 0 || self.external_address.is_some()
    }

    /// Whether the node advertised `channel`.
    pub fn supports(&self, channel: ChannelId) -> bool {
        self.channels.contains(&channel)
    }
}

/// Exchange node info and validate the remote.
///
/// # Arguments
///
/// * `expected` - Identity the remote must present, known when dialing.
pub(crate) async fn perform_handshake<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    configuration: &ConnectionConfiguration,
    expected: Option<&NodeId>,
) -> Result<NodeInfo, ConnectionError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    writer
        .write_message(HANDSHAKE_CHANNEL, &configuration.node_info())
        .await?;
    debug!("Sent node info");

    let (channel, payload) = reader.read_frame().await?;
    if channel != HANDSHAKE_CHANNEL {
        return Err(ConnectionError::HandshakeFailed(format!(
            "expected node info, got frame on channel {channel:#04x}"
        )));
    }
    let remote: NodeInfo = bincode::deserialize(&payload)
        .map_err(|e| ConnectionError::HandshakeFailed(format!("malformed node info: {e}")))?;

    validate(&remote, configuration, expected)?;
    debug!(
        "Handshake complete with {} ({}, {})",
        remote.id, remote.moniker, remote.version
    );
    Ok(remote)
}

fn validate(
    remote: &NodeInfo,
    configuration: &ConnectionConfiguration,
    expected: Option<&NodeId>,
) -> Result<(), ConnectionError> {
    if remote.id == configuration.node_id {
        return Err(ConnectionError::ConnectionLoop);
    }
    if remote.network != configuration.network {
        return Err(ConnectionError::NetworkMismatch {
            ours: configuration.network.clone(),
            theirs: remote.network.clone(),
        });
    }
    if let Some(expected) = expected {
        if &remote.id != expected {
            return Err(ConnectionError::UnexpectedNodeId {
                expected: expected.clone(),
                actual: remote.id.clone(),
            });
        }
    }
    Ok(())
}
