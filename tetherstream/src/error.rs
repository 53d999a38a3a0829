use thiserror::Error;

/// All errors produced by the TetherStream framing layer.
#[derive(Debug, Error)]
pub enum TetherStreamError {
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    #[error("unknown frame type: 0x{0:02x}")]
    UnknownFrameType(u8),

    #[error("unknown message kind: 0x{0:02x}")]
    UnknownMessageKind(u8),

    #[error("broken chunk sequence: {0}")]
    BrokenChunkSequence(String),

    #[error("message too large: {size} bytes exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("invalid max packet size {size}: must be at least {min}")]
    InvalidPacketSize { size: usize, min: usize },

    #[error("malformed version exchange: {0}")]
    MalformedVersion(String),

    #[error("stream failed after a previous framing error")]
    StreamFailed,

    #[error("transport write failed: {0}")]
    Transport(String),

    #[error("transport is closed")]
    TransportClosed,

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl TetherStreamError {
    /// `true` for errors caused by bytes the peer sent (as opposed to the
    /// local link failing).
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            TetherStreamError::FrameTooShort { .. }
                | TetherStreamError::UnknownFrameType(_)
                | TetherStreamError::UnknownMessageKind(_)
                | TetherStreamError::BrokenChunkSequence(_)
                | TetherStreamError::MessageTooLarge { .. }
                | TetherStreamError::MalformedVersion(_)
                | TetherStreamError::StreamFailed
        )
    }
}

pub type Result<T> = std::result::Result<T, TetherStreamError>;
