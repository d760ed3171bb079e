//! Framed transport over any async byte stream.
//!
//! Every frame is `[u32 big-endian body length][channel id][payload]`, where the
//! body is the channel byte plus payload. Payloads are bincode encoded. The
//! reader refuses frames larger than its configured maximum before allocating
//! for them.
//!
//! # Example
//!
//! ```
//! use cosmos_peers_connection::{FrameReader, FrameWriter, PexMessage, PEX_CHANNEL};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (client, server) = tokio::io::duplex(1024);
//! let mut writer = FrameWriter::new(client);
//! let mut reader = FrameReader::new(server, 1024);
//!
//! writer.write_message(PEX_CHANNEL, &PexMessage::AddressRequest).await?;
//! let (channel, payload) = reader.read_frame().await?;
//! assert_eq!(channel, PEX_CHANNEL);
//! let message: PexMessage = bincode::deserialize(&payload)?;
//! assert_eq!(message, PexMessage::AddressRequest);
//! # Ok(())
//! # }
//! ```

mod framed;

pub use framed::{FrameReader, FrameWriter, DEFAULT_MAX_FRAME_SIZE};

use std::fmt;
use std::io;

/// Error types specific to the transport layer.
#[derive(Debug)]
pub enum TransportError {
    /// IO error during read/write operations.
    Io(io::Error),
    /// Failed to encode or decode a payload.
    Codec(bincode::Error),
    /// Frame announced a body larger than allowed.
    FrameTooLarge { size: usize, max: usize },
    /// Frame carried no channel byte.
    EmptyFrame,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Io(e) => write!(f, "IO error: {e}"),
            TransportError::Codec(e) => write!(f, "Message codec error: {e}"),
            TransportError::FrameTooLarge { size, max } => {
                write!(f, "Frame of {size} bytes exceeds maximum of {max} bytes")
            }
            TransportError::EmptyFrame => write!(f, "Frame without channel id"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            TransportError::Codec(e) => Some(e),
            TransportError::FrameTooLarge { .. } => None,
            TransportError::EmptyFrame => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(e)
    }
}

impl From<bincode::Error> for TransportError {
    fn from(e: bincode::Error) -> Self {
        TransportError::Codec(e)
    }
}
