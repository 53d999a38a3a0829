//! Logical messages carried by the stream.
//!
//! A logical message is `kind(1) | body`. The stream frames and chunks the
//! encoded message; it never looks inside the body.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, TetherStreamError};

/// What a logical message carries. The secure channel routes on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Supported protocol versions, sent in the clear before the handshake.
    VersionExchange = 0x01,
    /// A key-exchange or reconnection-proof message.
    Handshake = 0x02,
    /// Encrypted acknowledgement that the local side accepted verification.
    VerificationConfirm = 0x03,
    /// Verification code encrypted with the out-of-band key.
    OobVerification = 0x04,
    /// Plaintext notice that the sender rejected verification.
    VerificationRejected = 0x05,
    /// Encrypted application payload.
    Client = 0x10,
}

impl TryFrom<u8> for MessageKind {
    type Error = TetherStreamError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(MessageKind::VersionExchange),
            0x02 => Ok(MessageKind::Handshake),
            0x03 => Ok(MessageKind::VerificationConfirm),
            0x04 => Ok(MessageKind::OobVerification),
            0x05 => Ok(MessageKind::VerificationRejected),
            0x10 => Ok(MessageKind::Client),
            other => Err(TetherStreamError::UnknownMessageKind(other)),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::VersionExchange => write!(f, "VersionExchange"),
            MessageKind::Handshake => write!(f, "Handshake"),
            MessageKind::VerificationConfirm => write!(f, "VerificationConfirm"),
            MessageKind::OobVerification => write!(f, "OobVerification"),
            MessageKind::VerificationRejected => write!(f, "VerificationRejected"),
            MessageKind::Client => write!(f, "Client"),
        }
    }
}

/// One whole logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    pub kind: MessageKind,
    pub body: Bytes,
}

impl StreamMessage {
    pub fn new(kind: MessageKind, body: impl Into<Bytes>) -> Self {
        Self {
            kind,
            body: body.into(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        1 + self.body.len()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.kind as u8);
        buf.put_slice(&self.body);
        buf.freeze()
    }

    pub fn decode(data: Bytes) -> Result<Self> {
        let Some(&tag) = data.first() else {
            return Err(TetherStreamError::FrameTooShort {
                expected: 1,
                actual: 0,
            });
        };
        let kind = MessageKind::try_from(tag)?;
        Ok(Self {
            kind,
            body: data.slice(1..),
        })
    }
}
