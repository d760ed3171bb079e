//! TCP-specific connections.

use super::handshake::perform_handshake;
use super::io::{AsyncChannel, AsyncConnection};
use super::{ConnectionConfiguration, ConnectionError};
use crate::peer::NetAddress;
use crate::transport::{FrameReader, FrameWriter};
use std::net::SocketAddr;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// A TCP-based connection to a peer.
///
/// This is a convenience type alias for [`AsyncConnection`] with Tokio's TCP stream halves.
pub type TcpConnection = AsyncConnection<OwnedReadHalf, OwnedWriteHalf>;

/// A TCP-based message channel.
pub type TcpChannel = AsyncChannel<OwnedReadHalf, OwnedWriteHalf>;

/// Helper function to establish TCP connection with timeout and nodelay.
async fn establish_tcp_connection(
    socket_addr: SocketAddr,
    configuration: &ConnectionConfiguration,
) -> Result<TcpStream, ConnectionError> {
    match timeout(
        configuration.connection_timeout,
        TcpStream::connect(socket_addr),
    )
    .await
    {
        Ok(Ok(stream)) => {
            // Peer exchange messages are small, don't let Nagle hold them back.
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Ok(Err(e)) => Err(ConnectionError::Io(e)),
        Err(_) => Err(ConnectionError::Timeout),
    }
}

/// Run the handshake over a fresh stream, bounded by the connection timeout.
async fn handshake_stream(
    stream: TcpStream,
    configuration: &ConnectionConfiguration,
    expected: Option<&NetAddress>,
) -> Result<TcpConnection, ConnectionError> {
    let remote_socket = stream.peer_addr()?;
    let (reader, writer) = stream.into_split();
    let mut reader = FrameReader::new(reader, configuration.max_frame_size);
    let mut writer = FrameWriter::new(writer);

    let remote = match timeout(
        configuration.connection_timeout,
        perform_handshake(
            &mut reader,
            &mut writer,
            configuration,
            expected.map(|addr| &addr.id),
        ),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => return Err(ConnectionError::Timeout),
    };

    let peer = match (expected, remote.external_address) {
        (Some(addr), _) => addr.clone(),
        (None, Some(external)) => {
            NetAddress::new(remote.id.clone(), external.ip(), external.port())
        }
        // Inbound peers are reachable on their advertised listen port, if any.
        (None, None) => NetAddress::new(
            remote.id.clone(),
            remote_socket.ip(),
            match remote.listen_port {
                0 => remote_socket.port(),
                port => port,
            },
        ),
    };

    Ok(AsyncConnection::new(peer, remote, reader, writer))
}

/// Establish a TCP connection to a peer and perform the handshake.
///
/// This function handles:
/// 1. TCP connection establishment with timeout
/// 2. TCP socket configuration (nodelay)
/// 3. Node info handshake, checking the remote is who we dialed
///
/// # Returns
///
/// A fully established and handshaked connection ready for use.
pub async fn connect(
    addr: NetAddress,
    configuration: &ConnectionConfiguration,
) -> Result<TcpConnection, ConnectionError> {
    let stream = establish_tcp_connection(addr.socket_addr(), configuration).await?;
    handshake_stream(stream, configuration, Some(&addr)).await
}

/// Perform the handshake on an accepted inbound stream.
pub async fn accept(
    stream: TcpStream,
    configuration: &ConnectionConfiguration,
) -> Result<TcpConnection, ConnectionError> {
    stream.set_nodelay(true)?;
    handshake_stream(stream, configuration, None).await
}
