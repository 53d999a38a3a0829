//! Message stream: framing, chunking and reassembly over one transport.
//!
//! `max_packet_size` bounds every encoded frame, header included, so each
//! frame fits one transport packet. Outbound, a logical message whose
//! COMPLETE frame fits goes out as one frame; a larger one is cut into CHUNK
//! frames of at most `max_packet_size - CHUNK_HEADER_LEN` payload bytes each.
//! Inbound, arbitrary byte slices are
//! buffered until whole frames are available, and chunk runs are stitched
//! back together before anything is returned.
//!
//! Any framing error poisons the stream. Once poisoned, every call fails
//! with `StreamFailed`; the owner is expected to tear the link down.

use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TetherStreamError};
use crate::frame::{Frame, CHUNK_HEADER_LEN, COMPLETE_HEADER_LEN};
use crate::message::StreamMessage;
use crate::reassembly::Reassembler;
use crate::transport::Transport;

/// Smallest packet the stream accepts: the default 23-byte ATT MTU minus the
/// ATT header. Leaves 7 payload bytes per chunk.
pub const MIN_PACKET_SIZE: usize = 20;

const _: () = assert!(MIN_PACKET_SIZE > CHUNK_HEADER_LEN);

/// Stream configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Bytes one transport packet can carry, frame header included (link
    /// MTU minus link headers).
    pub max_packet_size: usize,
    /// Largest logical message either side will buffer.
    pub max_message_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            // 185-byte ATT MTU minus the 3-byte ATT header.
            max_packet_size: 182,
            max_message_size: 1024 * 1024,
        }
    }
}

impl StreamConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_packet_size < MIN_PACKET_SIZE {
            return Err(TetherStreamError::InvalidPacketSize {
                size: self.max_packet_size,
                min: MIN_PACKET_SIZE,
            });
        }
        Ok(())
    }
}

/// Lifecycle of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    /// A framing or transport error occurred.
    Failed,
    /// Closed by the owner.
    Closed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamState::Open => write!(f, "Open"),
            StreamState::Failed => write!(f, "Failed"),
            StreamState::Closed => write!(f, "Closed"),
        }
    }
}

/// Frames outbound messages onto a [`Transport`] and rebuilds inbound ones.
pub struct MessageStream {
    transport: Arc<dyn Transport>,
    max_packet_size: usize,
    max_message_size: usize,
    next_message_id: u32,
    /// Bytes received but not yet forming a whole frame.
    inbound: BytesMut,
    reassembler: Reassembler,
    state: StreamState,
}

impl MessageStream {
    /// Create a stream. A packet size advertised by the transport wins over
    /// the configured one.
    pub fn new(transport: Arc<dyn Transport>, config: StreamConfig) -> Result<Self> {
        config.validate()?;
        let mut stream = Self {
            max_packet_size: config.max_packet_size,
            max_message_size: config.max_message_size,
            next_message_id: 0,
            inbound: BytesMut::new(),
            reassembler: Reassembler::new(config.max_message_size),
            state: StreamState::Open,
            transport,
        };
        if let Some(advertised) = stream.transport.max_packet_size() {
            stream.set_max_packet_size(advertised)?;
        }
        Ok(stream)
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Accept a newly negotiated packet size (e.g. after a BLE MTU change).
    /// Applies to messages sent from now on.
    pub fn set_max_packet_size(&mut self, size: usize) -> Result<()> {
        if size < MIN_PACKET_SIZE {
            return Err(TetherStreamError::InvalidPacketSize {
                size,
                min: MIN_PACKET_SIZE,
            });
        }
        tracing::debug!(
            old = self.max_packet_size,
            new = size,
            "max packet size updated"
        );
        self.max_packet_size = size;
        Ok(())
    }

    /// Split `message` into wire frames and assign it a message id.
    pub fn frames_for(&mut self, message: &StreamMessage) -> Result<Vec<Frame>> {
        self.ensure_open()?;
        let encoded = message.encode();
        if encoded.len() > self.max_message_size {
            return Err(TetherStreamError::MessageTooLarge {
                size: encoded.len(),
                max: self.max_message_size,
            });
        }

        let message_id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);

        if COMPLETE_HEADER_LEN + encoded.len() <= self.max_packet_size {
            return Ok(vec![Frame::Complete {
                message_id,
                payload: encoded,
            }]);
        }

        let chunk_payload = self.max_packet_size - CHUNK_HEADER_LEN;
        let total = encoded.len().div_ceil(chunk_payload);
        let total = u16::try_from(total).map_err(|_| TetherStreamError::MessageTooLarge {
            size: encoded.len(),
            max: chunk_payload * usize::from(u16::MAX),
        })?;

        let frames = (0..total)
            .map(|index| {
                let start = usize::from(index) * chunk_payload;
                let end = (start + chunk_payload).min(encoded.len());
                Frame::Chunk {
                    message_id,
                    index,
                    total,
                    payload: encoded.slice(start..end),
                }
            })
            .collect();
        Ok(frames)
    }

    /// Frame `message` and write every packet to the transport.
    pub fn send(&mut self, message: &StreamMessage) -> Result<()> {
        let frames = self.frames_for(message)?;
        tracing::debug!(
            kind = %message.kind,
            len = message.body.len(),
            packets = frames.len(),
            "sending message"
        );
        for frame in frames {
            if let Err(e) = self.transport.write(frame.encode()) {
                tracing::warn!(error = %e, "transport write failed");
                self.state = StreamState::Failed;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Feed bytes read from the transport. Returns every logical message
    /// completed by them, in order.
    pub fn on_data_received(&mut self, data: &[u8]) -> Result<Vec<StreamMessage>> {
        self.ensure_open()?;
        self.inbound.extend_from_slice(data);
        match self.drain_inbound() {
            Ok(messages) => Ok(messages),
            Err(e) => {
                tracing::warn!(error = %e, "framing error, stream poisoned");
                self.state = StreamState::Failed;
                self.inbound.clear();
                Err(e)
            }
        }
    }

    /// Stop accepting input and output.
    pub fn close(&mut self) {
        if self.state == StreamState::Open {
            self.state = StreamState::Closed;
        }
        self.inbound.clear();
    }

    fn drain_inbound(&mut self) -> Result<Vec<StreamMessage>> {
        let mut messages = Vec::new();
        while let Some((frame, used)) = Frame::parse(&self.inbound, self.max_message_size)? {
            self.inbound.advance(used);
            if let Some(whole) = self.reassembler.push(frame)? {
                messages.push(StreamMessage::decode(whole)?);
            }
        }
        Ok(messages)
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            StreamState::Open => Ok(()),
            StreamState::Failed => Err(TetherStreamError::StreamFailed),
            StreamState::Closed => Err(TetherStreamError::TransportClosed),
        }
    }
}
