//! Integration tests for connections over real loopback TCP sockets.
//!
//! One side runs an accept loop on an ephemeral port and plays the serving
//! role, the other dials it like the crawler does.

use cosmos_peers_connection::{
    Connection, ConnectionConfiguration, ConnectionError, NetAddress, NodeId, NodeKey, PexAddress,
    PexMessage, PEX_CHANNEL,
};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const NETWORK: &str = "integration-1";

/// Bind an ephemeral listener and answer one address request with `reply`.
async fn serving_node(
    reply: Vec<PexAddress>,
) -> (NetAddress, JoinHandle<Result<NetAddress, ConnectionError>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let local = listener.local_addr().unwrap();
    let key = NodeKey::generate();
    let config = ConnectionConfiguration::new(key.id(), NETWORK).with_listen_port(local.port());
    let addr = NetAddress::new(key.id(), local.ip(), local.port());

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let connection = Connection::tcp_accept(stream, &config).await?;
        let remote = connection.peer().clone();
        let mut channel = connection.open_channel(PEX_CHANNEL)?;
        match channel.receive().await? {
            PexMessage::AddressRequest => {
                channel.send(&PexMessage::AddressResponse(reply)).await?;
            }
            other => panic!("Expected AddressRequest, got {other}"),
        }
        Ok(remote)
    });

    (addr, handle)
}

fn learned(n: u8) -> Vec<PexAddress> {
    (0..n)
        .map(|i| {
            let id: NodeId = format!("{:040x}", i as u64 + 1).parse().unwrap();
            PexAddress::new(
                NetAddress::new(id, format!("45.{i}.0.1").parse().unwrap(), 26656),
                1_700_000_000,
            )
        })
        .collect()
}

#[tokio::test]
async fn test_dial_and_exchange() {
    let (server_addr, server) = serving_node(learned(5)).await;
    let key = NodeKey::generate();
    let config = ConnectionConfiguration::new(key.id(), NETWORK);

    let connection = Connection::tcp(server_addr.clone(), &config)
        .await
        .expect("Failed to establish connection");
    assert_eq!(connection.peer(), &server_addr);
    assert_eq!(connection.node_info().network, NETWORK);

    let mut channel = connection
        .open_channel(PEX_CHANNEL)
        .expect("Peer should advertise the pex channel");
    channel
        .send(&PexMessage::AddressRequest)
        .await
        .expect("Failed to send request");

    let response = timeout(Duration::from_secs(5), channel.receive())
        .await
        .expect("Timeout waiting for response")
        .expect("Failed to receive message");
    assert_eq!(response, PexMessage::AddressResponse(learned(5)));
    channel.close().await.expect("Failed to close");

    let seen_by_server = server.await.unwrap().unwrap();
    assert_eq!(seen_by_server.id, key.id());
}

#[tokio::test]
async fn test_inbound_peer_uses_external_address() {
    let (server_addr, server) = serving_node(vec![]).await;
    let key = NodeKey::generate();
    let external: std::net::SocketAddr = "203.0.113.7:26656".parse().unwrap();
    let config = ConnectionConfiguration::new(key.id(), NETWORK).with_external_address(external);

    let connection = Connection::tcp(server_addr, &config)
        .await
        .expect("Failed to establish connection");
    let mut channel = connection.open_channel(PEX_CHANNEL).unwrap();
    channel.send(&PexMessage::AddressRequest).await.unwrap();
    timeout(Duration::from_secs(5), channel.receive())
        .await
        .expect("Timeout waiting for response")
        .unwrap();

    let seen_by_server = server.await.unwrap().unwrap();
    assert_eq!(seen_by_server, NetAddress::new(key.id(), external.ip(), 26656));
}

#[tokio::test]
async fn test_dial_wrong_identity() {
    let (server_addr, _server) = serving_node(vec![]).await;
    let config = ConnectionConfiguration::new(NodeKey::generate().id(), NETWORK);
    let imposter = NetAddress::new(NodeKey::generate().id(), server_addr.ip, server_addr.port);

    match Connection::tcp(imposter, &config).await {
        Err(ConnectionError::UnexpectedNodeId { actual, .. }) => {
            assert_eq!(actual, server_addr.id)
        }
        other => panic!("Expected UnexpectedNodeId, got {other:?}"),
    }
}

#[tokio::test]
async fn test_dial_refused() {
    // Grab a free port then release it so nothing is listening there.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let target = NetAddress::new(NodeKey::generate().id(), "127.0.0.1".parse().unwrap(), port);
    let config = ConnectionConfiguration::new(NodeKey::generate().id(), NETWORK)
        .with_connection_timeout(Duration::from_secs(1));

    assert!(Connection::tcp(target, &config).await.is_err());
}
