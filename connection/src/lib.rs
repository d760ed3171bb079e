mod connection;
mod key;
mod message;
mod peer;
mod transport;

pub use connection::{
    unix_timestamp, AsyncChannel, AsyncConnection, Channel, Connection, ConnectionConfiguration,
    ConnectionError, NodeInfo, TcpChannel, TcpConnection, DEFAULT_CONNECTION_TIMEOUT,
    DEFAULT_MONIKER,
};
pub use key::NodeKey;
pub use message::{ChannelId, PexAddress, PexMessage, PEX_CHANNEL};
pub use peer::{AddressError, NetAddress, NodeId, SeedAddress, NODE_ID_BYTES};
pub use transport::{FrameReader, FrameWriter, TransportError, DEFAULT_MAX_FRAME_SIZE};
