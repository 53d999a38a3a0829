use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, TetherStreamError};

/// Frame type identifiers carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// A whole logical message that fits in one packet.
    Complete = 0x01,
    /// One piece of a logical message larger than the max packet size.
    Chunk = 0x02,
}

impl TryFrom<u8> for FrameType {
    type Error = TetherStreamError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(FrameType::Complete),
            0x02 => Ok(FrameType::Chunk),
            other => Err(TetherStreamError::UnknownFrameType(other)),
        }
    }
}

/// Header length of a COMPLETE frame: type(1) + message_id(4) + len(4).
pub const COMPLETE_HEADER_LEN: usize = 1 + 4 + 4;

/// Header length of a CHUNK frame: type(1) + message_id(4) + index(2) +
/// total(2) + len(4).
pub const CHUNK_HEADER_LEN: usize = 1 + 4 + 2 + 2 + 4;

/// TetherStream wire frame.
///
/// Binary layout (all fields big-endian):
///
/// ```text
/// COMPLETE: 0x01 | message_id(4) | len(4) | payload(len)
/// CHUNK:    0x02 | message_id(4) | index(2) | total(2) | len(4) | payload(len)
/// ```
///
/// The `len` field lets a receiver find frame boundaries on byte-stream
/// transports (RFCOMM) where one read may hold several frames or a partial
/// one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Complete {
        message_id: u32,
        payload: Bytes,
    },
    Chunk {
        message_id: u32,
        index: u16,
        total: u16,
        payload: Bytes,
    },
}

impl Frame {
    /// Return the frame type discriminant.
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Complete { .. } => FrameType::Complete,
            Frame::Chunk { .. } => FrameType::Chunk,
        }
    }

    /// The id of the logical message this frame belongs to.
    pub fn message_id(&self) -> u32 {
        match self {
            Frame::Complete { message_id, .. } | Frame::Chunk { message_id, .. } => *message_id,
        }
    }

    pub fn payload(&self) -> &Bytes {
        match self {
            Frame::Complete { payload, .. } | Frame::Chunk { payload, .. } => payload,
        }
    }

    /// Encode this frame into a byte buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Encode into a pre-allocated `BytesMut`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Frame::Complete {
                message_id,
                payload,
            } => {
                buf.put_u8(FrameType::Complete as u8);
                buf.put_u32(*message_id);
                buf.put_u32(payload.len() as u32);
                buf.put_slice(payload);
            }
            Frame::Chunk {
                message_id,
                index,
                total,
                payload,
            } => {
                buf.put_u8(FrameType::Chunk as u8);
                buf.put_u32(*message_id);
                buf.put_u16(*index);
                buf.put_u16(*total);
                buf.put_u32(payload.len() as u32);
                buf.put_slice(payload);
            }
        }
    }

    /// The total number of bytes this frame will occupy when encoded.
    pub fn encoded_len(&self) -> usize {
        match self {
            Frame::Complete { payload, .. } => COMPLETE_HEADER_LEN + payload.len(),
            Frame::Chunk { payload, .. } => CHUNK_HEADER_LEN + payload.len(),
        }
    }

    /// Decode exactly one frame from `data`. Trailing bytes are an error.
    pub fn decode(data: &[u8]) -> Result<Self> {
        match Self::parse(data, usize::MAX)? {
            Some((frame, used)) if used == data.len() => Ok(frame),
            Some((_, used)) => Err(TetherStreamError::BrokenChunkSequence(format!(
                "{} trailing bytes after frame",
                data.len() - used
            ))),
            None => Err(TetherStreamError::FrameTooShort {
                expected: Self::header_len_hint(data),
                actual: data.len(),
            }),
        }
    }

    /// Try to parse one frame from the front of `data`.
    ///
    /// Returns `Ok(None)` when more bytes are needed, or the frame together
    /// with the number of bytes it consumed. A declared payload longer than
    /// `max_payload` is rejected as soon as the header is readable, before
    /// any payload is buffered.
    pub fn parse(data: &[u8], max_payload: usize) -> Result<Option<(Self, usize)>> {
        if data.is_empty() {
            return Ok(None);
        }

        let frame_type = FrameType::try_from(data[0])?;
        let header_len = match frame_type {
            FrameType::Complete => COMPLETE_HEADER_LEN,
            FrameType::Chunk => CHUNK_HEADER_LEN,
        };
        if data.len() < header_len {
            return Ok(None);
        }

        let mut header = &data[1..header_len];
        let message_id = header.get_u32();
        let (index, total) = match frame_type {
            FrameType::Complete => (0, 1),
            FrameType::Chunk => (header.get_u16(), header.get_u16()),
        };
        let payload_len = header.get_u32() as usize;
        if payload_len > max_payload {
            return Err(TetherStreamError::MessageTooLarge {
                size: payload_len,
                max: max_payload,
            });
        }

        let end = header_len + payload_len;
        if data.len() < end {
            return Ok(None);
        }
        let payload = Bytes::copy_from_slice(&data[header_len..end]);

        let frame = match frame_type {
            FrameType::Complete => Frame::Complete {
                message_id,
                payload,
            },
            FrameType::Chunk => Frame::Chunk {
                message_id,
                index,
                total,
                payload,
            },
        };
        Ok(Some((frame, end)))
    }

    fn header_len_hint(data: &[u8]) -> usize {
        match data.first().map(|b| FrameType::try_from(*b)) {
            Some(Ok(FrameType::Chunk)) => CHUNK_HEADER_LEN,
            _ => COMPLETE_HEADER_LEN,
        }
    }
}
