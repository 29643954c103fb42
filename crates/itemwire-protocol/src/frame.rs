// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Length-prefixed framing for QUIC streams.
//!
//! A frame is a 4-byte big-endian payload length, a 2-byte message type
//! code, and then the protobuf payload itself.
//!
//! A request/response call takes one bidirectional stream; a server push
//! event takes one unidirectional stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame (16 MB). Item payloads are small; the cap
/// only guards against malformed length headers.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Bytes in the frame header (4 length + 2 type)
pub const HEADER_SIZE: usize = 6;

/// Discriminates what kind of payload a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    Request = 1,
    Response = 2,
    /// Server-push event
    Event = 3,
    /// Structured error reply
    Error = 4,
}

impl TryFrom<u16> for MessageType {
    type Error = FrameError;

    fn try_from(value: u16) -> Result<Self, FrameError> {
        match value {
            1 => Ok(MessageType::Request),
            2 => Ok(MessageType::Response),
            3 => Ok(MessageType::Event),
            4 => Ok(MessageType::Error),
            _ => Err(FrameError::InvalidMessageType(value)),
        }
    }
}

/// Failures while encoding, decoding, or transporting frames.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_SIZE} byte limit")]
    FrameTooLarge(usize),

    #[error("unknown message type code {0}")]
    InvalidMessageType(u16),

    #[error("stream io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot decode protobuf payload: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("stream closed by peer")]
    ConnectionClosed,
}

/// One typed message plus its payload bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub message_type: MessageType,
    pub payload: Bytes,
}

impl Frame {
    /// Frame up a request message.
    pub fn request<M: Message>(msg: &M) -> Result<Self, FrameError> {
        Self::new(MessageType::Request, msg)
    }

    /// Frame up a response message.
    pub fn response<M: Message>(msg: &M) -> Result<Self, FrameError> {
        Self::new(MessageType::Response, msg)
    }

    /// Frame up a server-push event.
    pub fn event<M: Message>(msg: &M) -> Result<Self, FrameError> {
        Self::new(MessageType::Event, msg)
    }

    /// Frame up a structured error reply.
    pub fn error<M: Message>(msg: &M) -> Result<Self, FrameError> {
        Self::new(MessageType::Error, msg)
    }

    /// Encode `msg` into a frame of the given type.
    pub fn new<M: Message>(message_type: MessageType, msg: &M) -> Result<Self, FrameError> {
        let payload = msg.encode_to_vec();
        if payload.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(payload.len()));
        }
        Ok(Self {
            message_type,
            payload: Bytes::from(payload),
        })
    }

    /// Decode the payload as protobuf message `M`.
    pub fn decode<M: Message + Default>(&self) -> Result<M, FrameError> {
        Ok(M::decode(self.payload.as_ref())?)
    }

    /// Serialize header plus payload into a single buffer.
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        out.put_u32(self.payload.len() as u32);
        out.put_u16(self.message_type as u16);
        out.extend_from_slice(&self.payload);
        out.freeze()
    }

    /// Parse a frame out of an in-memory buffer. Trailing bytes are left
    /// untouched.
    pub fn decode_from_bytes(mut buf: Bytes) -> Result<Self, FrameError> {
        if buf.len() < HEADER_SIZE {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "truncated frame header",
            )));
        }

        let length = buf.get_u32() as usize;
        let message_type = MessageType::try_from(buf.get_u16())?;

        if length > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(length));
        }
        if buf.len() < length {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "truncated frame payload",
            )));
        }

        Ok(Self {
            message_type,
            payload: buf.split_to(length),
        })
    }
}

/// Write one frame to `writer`.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), FrameError> {
    writer.write_all(&frame.encode()).await?;
    Ok(())
}

/// Read one frame from `reader`.
///
/// A clean EOF anywhere inside the header reads as
/// [`FrameError::ConnectionClosed`], the normal way a peer ends a stream.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, FrameError> {
    let length = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    };
    let message_type = match reader.read_u16().await {
        Ok(raw) => MessageType::try_from(raw)?,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    };

    if length > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge(length));
    }

    // EOF below here means a truncated payload, which is an IO error
    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;

    Ok(Frame {
        message_type,
        payload: Bytes::from(payload),
    })
}
