//! Frame encoding and decoding for the Tether wire protocol.
//!
//! Every message on a relay connection is one frame: a fixed 21-byte header
//! followed by a length-prefixed body. All multi-byte fields are big-endian
//! (network byte order). The codec never splits or coalesces frames: one
//! [`write_frame`] call emits exactly one frame with a single `write_all`,
//! and one successful [`read_frame`] yields exactly one frame.

use crate::error::FrameError;
use crate::peer_id::PeerId;
use crate::{FRAME_HEADER_SIZE, MAX_BODY_SIZE, PEER_ID_LEN};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frame types as carried in the first header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Relay tells a freshly connected client its assigned id (no body)
    PeerIdAnnounce = 0x00,
    /// Opaque payload addressed to (client → relay) or from (relay → client) a peer
    Data = 0x01,
    /// Liveness refresh (no body)
    KeepAlive = 0x02,
}

impl FrameType {
    /// Whether frames of this type may carry a non-empty body
    pub const fn carries_body(self) -> bool {
        matches!(self, FrameType::Data)
    }
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::PeerIdAnnounce),
            0x01 => Ok(Self::Data),
            0x02 => Ok(Self::KeepAlive),
            _ => Err(FrameError::UnknownType(value)),
        }
    }
}

/// Decoded and validated frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame type
    pub frame_type: FrameType,
    /// Peer id field (destination or source, depending on direction)
    pub peer_id: PeerId,
    /// Declared body length
    pub body_len: usize,
}

impl FrameHeader {
    /// Parse and validate a header.
    ///
    /// Rejects unknown types, bodies over [`MAX_BODY_SIZE`], and non-zero
    /// lengths on body-less frame types.
    pub fn parse(buf: &[u8; FRAME_HEADER_SIZE]) -> Result<Self, FrameError> {
        let frame_type = FrameType::try_from(buf[0])?;

        let mut id = [0u8; PEER_ID_LEN];
        id.copy_from_slice(&buf[1..1 + PEER_ID_LEN]);

        let len_offset = 1 + PEER_ID_LEN;
        let body_len = u32::from_be_bytes([
            buf[len_offset],
            buf[len_offset + 1],
            buf[len_offset + 2],
            buf[len_offset + 3],
        ]) as usize;

        validate_body(frame_type, body_len)?;

        Ok(Self {
            frame_type,
            peer_id: PeerId::from_bytes(id),
            body_len,
        })
    }

    /// Serialize the header.
    ///
    /// The fields are written as given, so a header that [`parse`](Self::parse)
    /// would reject can still be produced. Only a length that does not fit
    /// the 32-bit wire field fails.
    pub fn to_bytes(&self) -> Result<[u8; FRAME_HEADER_SIZE], FrameError> {
        let len = u32::try_from(self.body_len).map_err(|_| FrameError::BodyTooLarge {
            len: self.body_len,
            max: u32::MAX as usize,
        })?;

        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0] = self.frame_type as u8;
        buf[1..1 + PEER_ID_LEN].copy_from_slice(self.peer_id.as_bytes());
        buf[1 + PEER_ID_LEN..].copy_from_slice(&len.to_be_bytes());
        Ok(buf)
    }
}

fn validate_body(frame_type: FrameType, len: usize) -> Result<(), FrameError> {
    if len > MAX_BODY_SIZE {
        return Err(FrameError::BodyTooLarge {
            len,
            max: MAX_BODY_SIZE,
        });
    }
    if !frame_type.carries_body() && len != 0 {
        return Err(FrameError::UnexpectedBody { frame_type, len });
    }
    Ok(())
}

/// One complete protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    frame_type: FrameType,
    peer_id: PeerId,
    body: Vec<u8>,
}

impl Frame {
    /// Build a frame, validating the body against the frame type.
    pub fn new(frame_type: FrameType, peer_id: PeerId, body: Vec<u8>) -> Result<Self, FrameError> {
        validate_body(frame_type, body.len())?;
        Ok(Self {
            frame_type,
            peer_id,
            body,
        })
    }

    /// Handshake frame carrying the id the relay assigned to the receiver
    pub fn announce(assigned: PeerId) -> Self {
        Self {
            frame_type: FrameType::PeerIdAnnounce,
            peer_id: assigned,
            body: Vec::new(),
        }
    }

    /// Data frame. The body length is checked when the frame is encoded.
    pub fn data(peer_id: PeerId, body: impl Into<Vec<u8>>) -> Self {
        Self {
            frame_type: FrameType::Data,
            peer_id,
            body: body.into(),
        }
    }

    /// Keep-alive frame
    pub fn keepalive(peer_id: PeerId) -> Self {
        Self {
            frame_type: FrameType::KeepAlive,
            peer_id,
            body: Vec::new(),
        }
    }

    /// Get the frame type
    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    /// Get the peer id field
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Get the body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Take the body out of the frame
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Header describing this frame
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            frame_type: self.frame_type,
            peer_id: self.peer_id,
            body_len: self.body.len(),
        }
    }

    /// Size of this frame on the wire
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.body.len()
    }

    /// Encode the whole frame into one contiguous buffer.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        validate_body(self.frame_type, self.body.len())?;

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.header().to_bytes()?);
        buf.extend_from_slice(&self.body);
        Ok(buf)
    }

    /// Decode exactly one frame from a complete buffer.
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(FrameError::Truncated {
                expected: FRAME_HEADER_SIZE,
                actual: data.len(),
            });
        }

        let mut raw = [0u8; FRAME_HEADER_SIZE];
        raw.copy_from_slice(&data[..FRAME_HEADER_SIZE]);
        let header = FrameHeader::parse(&raw)?;

        let total = FRAME_HEADER_SIZE + header.body_len;
        if data.len() < total {
            return Err(FrameError::Truncated {
                expected: total,
                actual: data.len(),
            });
        }
        if data.len() > total {
            return Err(FrameError::TrailingBytes(data.len() - total));
        }

        Ok(Self {
            frame_type: header.frame_type,
            peer_id: header.peer_id,
            body: data[FRAME_HEADER_SIZE..].to_vec(),
        })
    }
}

/// Write one frame to an async stream and flush it.
///
/// Callers sharing a stream must serialize calls; the relay session does this
/// with its write guard.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let bytes = frame.encode()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame from an async stream.
///
/// Returns [`FrameError::Closed`] if the stream ends cleanly before the first
/// header byte, and [`FrameError::Truncated`] if it ends anywhere inside a
/// frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut raw = [0u8; FRAME_HEADER_SIZE];
    let mut filled = 0;
    while filled < FRAME_HEADER_SIZE {
        let n = reader.read(&mut raw[filled..]).await?;
        if n == 0 {
            return Err(if filled == 0 {
                FrameError::Closed
            } else {
                FrameError::Truncated {
                    expected: FRAME_HEADER_SIZE,
                    actual: filled,
                }
            });
        }
        filled += n;
    }

    let header = FrameHeader::parse(&raw)?;

    let mut body = vec![0u8; header.body_len];
    let mut filled = 0;
    while filled < body.len() {
        let n = reader.read(&mut body[filled..]).await?;
        if n == 0 {
            return Err(FrameError::Truncated {
                expected: FRAME_HEADER_SIZE + header.body_len,
                actual: FRAME_HEADER_SIZE + filled,
            });
        }
        filled += n;
    }

    Ok(Frame {
        frame_type: header.frame_type,
        peer_id: header.peer_id,
        body,
    })
}
