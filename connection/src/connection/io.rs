//! I/O layer for connection handling.
//!
//! These types work with AsyncRead/AsyncWrite halves to manage the byte-level
//! communication, delegating framing and serialization to the transport layer.

use super::error::ConnectionError;
use super::handshake::NodeInfo;
use crate::message::{ChannelId, PexMessage};
use crate::peer::NetAddress;
use crate::transport::{FrameReader, FrameWriter, TransportError};
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};

/// An established, handshaked connection to a peer.
///
/// # Trait Bounds
///
/// * [`AsyncRead`]/[`AsyncWrite`] - Required for async I/O operations.
/// * [`Unpin`] - Required because uses `&mut self` with `.await`.
/// * [`Send`] - Allows the connection to be sent between tasks.
#[derive(Debug)]
pub struct AsyncConnection<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Address of the remote, with its handshaked identity.
    peer: NetAddress,
    /// What the remote told us about itself.
    remote: NodeInfo,
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
}

impl<R, W> std::fmt::Display for AsyncConnection<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TCP connection to {} ({})", self.peer, self.remote.moniker)
    }
}

impl<R, W> AsyncConnection<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Creates a new connection from handshaked components.
    pub(crate) fn new(
        peer: NetAddress,
        remote: NodeInfo,
        reader: FrameReader<R>,
        writer: FrameWriter<W>,
    ) -> Self {
        Self {
            peer,
            remote,
            reader,
            writer,
        }
    }

    /// Address of the peer this connection is established with.
    pub fn peer(&self) -> &NetAddress {
        &self.peer
    }

    /// Node info the peer presented during the handshake.
    pub fn node_info(&self) -> &NodeInfo {
        &self.remote
    }

    /// Open a typed message stream on `channel`.
    ///
    /// Fails if the remote did not advertise the channel.
    pub fn open_channel(self, channel: ChannelId) -> Result<AsyncChannel<R, W>, ConnectionError> {
        if !self.remote.supports(channel) {
            return Err(ConnectionError::UnsupportedChannel(channel));
        }
        Ok(AsyncChannel {
            channel,
            peer: self.peer,
            reader: self.reader,
            writer: self.writer,
        })
    }
}

/// A peer-exchange message stream bound to one channel of a connection.
#[derive(Debug)]
pub struct AsyncChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    channel: ChannelId,
    peer: NetAddress,
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
}

impl<R, W> AsyncChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Address of the remote end.
    pub fn peer(&self) -> &NetAddress {
        &self.peer
    }

    /// Send a message on this channel.
    pub async fn send(&mut self, message: &PexMessage) -> Result<(), ConnectionError> {
        self.writer
            .write_message(self.channel, message)
            .await
            .map_err(ConnectionError::TransportFailed)
    }

    /// Receive the next message on this channel.
    ///
    /// Frames addressed to other channels are skipped.
    pub async fn receive(&mut self) -> Result<PexMessage, ConnectionError> {
        loop {
            let (channel, payload) = self.reader.read_frame().await?;
            if channel != self.channel {
                debug!(
                    "Skipping frame on channel {channel:#04x} from {}",
                    self.peer
                );
                continue;
            }
            return bincode::deserialize(&payload)
                .map_err(|e| ConnectionError::TransportFailed(TransportError::Codec(e)));
        }
    }

    /// Close the write side, signalling the remote we are done.
    pub async fn close(&mut self) -> Result<(), ConnectionError> {
        self.writer
            .shutdown()
            .await
            .map_err(ConnectionError::TransportFailed)
    }
}
