//! Peer connection abstractions for testing and mocking.
//!
//! This module provides the [`PeerConnection`] and [`Connector`] traits that
//! abstract the peer-exchange channel, enabling dependency injection for
//! testing without modifying the core crawler logic.

use cosmos_peers_connection::{
    Channel, Connection, ConnectionConfiguration, ConnectionError, NetAddress, PexMessage,
    SeedAddress, PEX_CHANNEL,
};
use std::future::Future;
use std::io;

/// A peer-exchange message stream to one peer.
pub trait PeerConnection: Send {
    fn send(
        &mut self,
        message: &PexMessage,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;
    fn receive(&mut self) -> impl Future<Output = Result<PexMessage, ConnectionError>> + Send;
    /// Address of the remote, as dialed or as learned during the handshake.
    fn peer(&self) -> &NetAddress;
    /// Signal the remote we are done.
    fn close(&mut self) -> impl Future<Output = Result<(), ConnectionError>> + Send;
}

impl PeerConnection for Channel {
    fn send(
        &mut self,
        message: &PexMessage,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send {
        Channel::send(self, message)
    }

    fn receive(&mut self) -> impl Future<Output = Result<PexMessage, ConnectionError>> + Send {
        Channel::receive(self)
    }

    fn peer(&self) -> &NetAddress {
        Channel::peer(self)
    }

    fn close(&mut self) -> impl Future<Output = Result<(), ConnectionError>> + Send {
        Channel::close(self)
    }
}

/// Factory trait for creating peer connections.
///
/// This trait enables dependency injection for connection creation,
/// allowing different implementations for production and testing.
pub trait Connector: Clone + Send + Sync + 'static {
    type Connection: PeerConnection + 'static;

    /// Dial `addr` and open its peer-exchange channel.
    fn connect(
        &self,
        addr: &NetAddress,
    ) -> impl Future<Output = Result<Self::Connection, ConnectionError>> + Send;
}

/// Standard connector that creates real TCP connections.
#[derive(Debug, Clone)]
pub struct PeerConnector {
    config: ConnectionConfiguration,
}

impl PeerConnector {
    pub fn new(config: ConnectionConfiguration) -> Self {
        Self { config }
    }

    pub fn configuration(&self) -> &ConnectionConfiguration {
        &self.config
    }
}

impl Connector for PeerConnector {
    type Connection = Channel;

    fn connect(
        &self,
        addr: &NetAddress,
    ) -> impl Future<Output = Result<Self::Connection, ConnectionError>> + Send {
        let addr = addr.clone();
        let config = self.config.clone();
        async move {
            Connection::tcp(addr, &config)
                .await?
                .open_channel(PEX_CHANNEL)
        }
    }
}

/// Turns configured seeds into dialable addresses.
pub trait SeedResolver: Send + Sync + 'static {
    fn resolve(
        &self,
        seed: &SeedAddress,
    ) -> impl Future<Output = io::Result<Vec<NetAddress>>> + Send;
}

/// Resolves seed hosts through the system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

impl SeedResolver for DnsResolver {
    fn resolve(
        &self,
        seed: &SeedAddress,
    ) -> impl Future<Output = io::Result<Vec<NetAddress>>> + Send {
        seed.resolve()
    }
}

#[cfg(test)]
pub mod test_utils {
    //! Scriptable connections for exercising the crawler without sockets.

    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Mock implementation of PeerConnection for testing.
    #[derive(Debug)]
    pub struct MockPeerConnection {
        /// Queue of messages that will be returned by receive().
        pub incoming_messages: VecDeque<Result<PexMessage, ConnectionError>>,
        /// Messages that were sent via send().
        pub sent_messages: Vec<PexMessage>,
        /// The address to report as the remote.
        pub peer_addr: NetAddress,
        /// Whether the connection should simulate being closed.
        pub is_closed: bool,
        /// Shared with the connector that handed this out.
        closed_count: Option<Arc<AtomicUsize>>,
    }

    impl MockPeerConnection {
        pub fn new(peer_addr: NetAddress) -> Self {
            MockPeerConnection {
                incoming_messages: VecDeque::new(),
                sent_messages: Vec::new(),
                peer_addr,
                is_closed: false,
                closed_count: None,
            }
        }

        /// Add a message that will be returned by the next receive() call.
        pub fn add_incoming_message(&mut self, message: PexMessage) {
            self.incoming_messages.push_back(Ok(message));
        }

        /// Add an error that will be returned by the next receive() call.
        pub fn add_incoming_error(&mut self, error: ConnectionError) {
            self.incoming_messages.push_back(Err(error));
        }
    }

    fn broken_pipe() -> ConnectionError {
        ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "Connection closed",
        ))
    }

    impl PeerConnection for MockPeerConnection {
        async fn send(&mut self, message: &PexMessage) -> Result<(), ConnectionError> {
            if self.is_closed {
                return Err(broken_pipe());
            }
            self.sent_messages.push(message.clone());
            Ok(())
        }

        async fn receive(&mut self) -> Result<PexMessage, ConnectionError> {
            if self.is_closed {
                return Err(broken_pipe());
            }

            // If we have a message queued, return it immediately
            if let Some(result) = self.incoming_messages.pop_front() {
                return result;
            }

            // Otherwise, wait indefinitely (let the caller's timeout handle it)
            std::future::pending().await
        }

        fn peer(&self) -> &NetAddress {
            &self.peer_addr
        }

        async fn close(&mut self) -> Result<(), ConnectionError> {
            if !self.is_closed {
                self.is_closed = true;
                if let Some(count) = &self.closed_count {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            }
            Ok(())
        }
    }

    /// How a [`MockConnector`] treats dials to one address.
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Dial fails immediately.
        Refuse,
        /// Dial never completes.
        Hang,
        /// Dial succeeds after `delay`, the remote then plays back `script`.
        Respond {
            delay: Duration,
            script: Vec<PexMessage>,
        },
    }

    impl MockBehavior {
        /// Answer the address request with `response`.
        pub fn respond(response: PexMessage) -> Self {
            MockBehavior::Respond {
                delay: Duration::ZERO,
                script: vec![response],
            }
        }
    }

    /// Mock connector for testing.
    ///
    /// Addresses without a configured behavior are refused.
    #[derive(Debug, Clone, Default)]
    pub struct MockConnector {
        behaviors: Arc<Mutex<HashMap<NetAddress, MockBehavior>>>,
        dialed: Arc<Mutex<Vec<NetAddress>>>,
        closed: Arc<AtomicUsize>,
    }

    impl MockConnector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_behavior(&self, addr: NetAddress, behavior: MockBehavior) {
            self.behaviors.lock().unwrap().insert(addr, behavior);
        }

        /// Every address dialed so far, in order.
        pub fn dialed(&self) -> Vec<NetAddress> {
            self.dialed.lock().unwrap().clone()
        }

        /// Connections the crawler closed.
        pub fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl Connector for MockConnector {
        type Connection = MockPeerConnection;

        fn connect(
            &self,
            addr: &NetAddress,
        ) -> impl Future<Output = Result<Self::Connection, ConnectionError>> + Send {
            let addr = addr.clone();
            self.dialed.lock().unwrap().push(addr.clone());
            let behavior = self
                .behaviors
                .lock()
                .unwrap()
                .get(&addr)
                .cloned()
                .unwrap_or(MockBehavior::Refuse);
            let closed = self.closed.clone();
            async move {
                match behavior {
                    MockBehavior::Refuse => Err(ConnectionError::Io(std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "Connection refused",
                    ))),
                    MockBehavior::Hang => std::future::pending().await,
                    MockBehavior::Respond { delay, script } => {
                        tokio::time::sleep(delay).await;
                        let mut conn = MockPeerConnection::new(addr);
                        conn.closed_count = Some(closed);
                        for message in script {
                            conn.add_incoming_message(message);
                        }
                        Ok(conn)
                    }
                }
            }
        }
    }

    /// Resolver whose lookups never finish.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct HangingResolver;

    impl SeedResolver for HangingResolver {
        fn resolve(
            &self,
            _seed: &SeedAddress,
        ) -> impl Future<Output = io::Result<Vec<NetAddress>>> + Send {
            std::future::pending()
        }
    }
}
