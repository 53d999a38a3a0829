//! Chunk reassembly.
//!
//! Chunks of one logical message must arrive as an unbroken run
//! `0, 1, ..., total-1` with a constant `message_id` and `total`. Anything
//! else (a gap, a duplicate, a complete frame in the middle of a run) is a
//! framing error: the transports underneath are ordered and reliable, so a
//! broken run means lost or injected data and the message cannot be
//! trusted.

use bytes::{Bytes, BytesMut};

use crate::error::{Result, TetherStreamError};
use crate::frame::Frame;

/// A chunk run in progress.
#[derive(Debug)]
struct PartialMessage {
    message_id: u32,
    total: u16,
    next_index: u16,
    buf: BytesMut,
}

/// Rebuilds logical messages from frames.
#[derive(Debug)]
pub struct Reassembler {
    max_message_size: usize,
    partial: Option<PartialMessage>,
}

impl Reassembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            partial: None,
        }
    }

    /// `true` while a chunk run is incomplete.
    pub fn in_progress(&self) -> bool {
        self.partial.is_some()
    }

    /// Feed one frame. Returns the whole message once its last frame is in.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Bytes>> {
        match frame {
            Frame::Complete {
                message_id,
                payload,
            } => {
                if let Some(partial) = &self.partial {
                    return Err(TetherStreamError::BrokenChunkSequence(format!(
                        "complete message {message_id} interleaved with chunk run {} at index {}",
                        partial.message_id, partial.next_index
                    )));
                }
                self.check_size(payload.len())?;
                Ok(Some(payload))
            }
            Frame::Chunk {
                message_id,
                index,
                total,
                payload,
            } => self.push_chunk(message_id, index, total, payload),
        }
    }

    fn push_chunk(
        &mut self,
        message_id: u32,
        index: u16,
        total: u16,
        payload: Bytes,
    ) -> Result<Option<Bytes>> {
        if total < 2 || index >= total {
            return Err(TetherStreamError::BrokenChunkSequence(format!(
                "chunk {index} of {total} is out of range"
            )));
        }

        let mut partial = match self.partial.take() {
            None if index == 0 => PartialMessage {
                message_id,
                total,
                next_index: 0,
                buf: BytesMut::new(),
            },
            None => {
                return Err(TetherStreamError::BrokenChunkSequence(format!(
                    "message {message_id} starts at chunk {index}, expected 0"
                )));
            }
            Some(partial) => partial,
        };

        if partial.message_id != message_id {
            return Err(TetherStreamError::BrokenChunkSequence(format!(
                "chunk for message {message_id} while message {} is incomplete",
                partial.message_id
            )));
        }
        if partial.total != total {
            return Err(TetherStreamError::BrokenChunkSequence(format!(
                "message {message_id} changed chunk count from {} to {total}",
                partial.total
            )));
        }
        if partial.next_index != index {
            return Err(TetherStreamError::BrokenChunkSequence(format!(
                "message {message_id} expected chunk {}, got {index}",
                partial.next_index
            )));
        }

        self.check_size(partial.buf.len() + payload.len())?;
        partial.buf.extend_from_slice(&payload);
        partial.next_index += 1;

        if partial.next_index == partial.total {
            tracing::debug!(
                message_id,
                chunks = total,
                len = partial.buf.len(),
                "chunked message reassembled"
            );
            return Ok(Some(partial.buf.freeze()));
        }

        self.partial = Some(partial);
        Ok(None)
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_message_size {
            return Err(TetherStreamError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}
