//! Length-prefixed frame reader and writer.

use super::TransportError;
use crate::message::ChannelId;
use serde::Serialize;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix in bytes.
const LENGTH_PREFIX_SIZE: usize = 4;

/// Default upper bound on a frame body.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// State machine for [`FrameReader::read_frame`].
///
/// Tracks progress across interruptions so a read dropped by `tokio::select!`
/// resumes where it left off without losing partially read bytes.
#[derive(Debug)]
enum ReceiveState {
    /// Reading the length prefix.
    ReadingLength {
        prefix: [u8; LENGTH_PREFIX_SIZE],
        bytes_read: usize,
    },
    /// Reading the channel byte and payload.
    ReadingBody { buffer: Vec<u8>, bytes_read: usize },
}

impl ReceiveState {
    fn reading_length() -> Self {
        ReceiveState::ReadingLength {
            prefix: [0u8; LENGTH_PREFIX_SIZE],
            bytes_read: 0,
        }
    }

    fn reading_body(body_len: usize) -> Self {
        ReceiveState::ReadingBody {
            buffer: vec![0u8; body_len],
            bytes_read: 0,
        }
    }
}

/// Writes frames to an async writer.
#[derive(Debug)]
pub struct FrameWriter<W> {
    writer: W,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one raw frame and flush.
    pub async fn write_frame(
        &mut self,
        channel: ChannelId,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let body_len = payload.len() + 1;
        let prefix = u32::try_from(body_len)
            .map_err(|_| TransportError::FrameTooLarge {
                size: body_len,
                max: u32::MAX as usize,
            })?
            .to_be_bytes();

        let mut data = Vec::with_capacity(LENGTH_PREFIX_SIZE + body_len);
        data.extend_from_slice(&prefix);
        data.push(channel);
        data.extend_from_slice(payload);

        self.writer.write_all(&data).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Encode `message` and write it as one frame.
    pub async fn write_message<T: Serialize>(
        &mut self,
        channel: ChannelId,
        message: &T,
    ) -> Result<(), TransportError> {
        let payload = bincode::serialize(message)?;
        self.write_frame(channel, &payload).await
    }

    /// Shut down the write side.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.writer.shutdown().await.map_err(TransportError::Io)
    }

    /// Give back the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Reads frames from an async reader.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    max_frame_size: usize,
    receive_state: ReceiveState,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R, max_frame_size: usize) -> Self {
        Self {
            reader,
            max_frame_size,
            receive_state: ReceiveState::reading_length(),
        }
    }

    /// Read the next frame, returning its channel and payload.
    ///
    /// This function is cancellation safe.
    pub async fn read_frame(&mut self) -> Result<(ChannelId, Vec<u8>), TransportError> {
        loop {
            match &mut self.receive_state {
                ReceiveState::ReadingLength { prefix, bytes_read } => {
                    while *bytes_read < LENGTH_PREFIX_SIZE {
                        let n = self.reader.read(&mut prefix[*bytes_read..]).await?;
                        if n == 0 {
                            return Err(TransportError::Io(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "connection closed while reading frame length",
                            )));
                        }
                        *bytes_read += n;
                    }

                    let body_len = u32::from_be_bytes(*prefix) as usize;
                    if body_len == 0 {
                        self.receive_state = ReceiveState::reading_length();
                        return Err(TransportError::EmptyFrame);
                    }
                    if body_len > self.max_frame_size {
                        self.receive_state = ReceiveState::reading_length();
                        return Err(TransportError::FrameTooLarge {
                            size: body_len,
                            max: self.max_frame_size,
                        });
                    }
                    self.receive_state = ReceiveState::reading_body(body_len);
                }

                ReceiveState::ReadingBody { buffer, bytes_read } => {
                    while *bytes_read < buffer.len() {
                        let n = self.reader.read(&mut buffer[*bytes_read..]).await?;
                        if n == 0 {
                            return Err(TransportError::Io(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "connection closed while reading frame body",
                            )));
                        }
                        *bytes_read += n;
                    }

                    let mut body = std::mem::take(buffer);
                    self.receive_state = ReceiveState::reading_length();
                    let channel = body.remove(0);
                    return Ok((channel, body));
                }
            }
        }
    }
}
