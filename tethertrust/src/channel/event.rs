// Caller-facing channel events and failure reasons.

use std::fmt;

use bytes::Bytes;

use crate::device::DeviceId;
use crate::error::TetherTrustError;

/// Code the caller must act on before the channel can be secured.
#[derive(Clone, PartialEq, Eq)]
pub enum VerificationCode {
    /// Short decimal code to show to the user on both devices.
    Visual(String),
    /// Binary code corroborated over the out-of-band channel.
    OutOfBand(Vec<u8>),
}

impl fmt::Debug for VerificationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationCode::Visual(_) => f.write_str("Visual(..)"),
            VerificationCode::OutOfBand(code) => write!(f, "OutOfBand({} bytes)", code.len()),
        }
    }
}

/// Why a channel failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The link failed or closed.
    Transport,
    /// The peer sent bytes that do not frame.
    Framing,
    /// Protocol violation or failed key exchange.
    Handshake,
    /// Verification was rejected locally or by the peer.
    VerificationRejected { by_peer: bool },
    /// A message failed authentication.
    Decryption,
    /// The local caller broke the API contract.
    Misuse,
    /// Key storage failed or had no entry for the peer.
    Storage,
    /// No common protocol version.
    VersionMismatch,
}

impl FailureReason {
    /// Stable numeric code for logs and telemetry.
    pub fn code(self) -> u16 {
        match self {
            FailureReason::Transport => 1,
            FailureReason::Framing => 2,
            FailureReason::Handshake => 3,
            FailureReason::VerificationRejected { by_peer: false } => 4,
            FailureReason::VerificationRejected { by_peer: true } => 5,
            FailureReason::Decryption => 6,
            FailureReason::Misuse => 7,
            FailureReason::Storage => 8,
            FailureReason::VersionMismatch => 9,
        }
    }

    /// Whether a fresh connection attempt could succeed without anything
    /// changing on either device.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureReason::Transport | FailureReason::Framing | FailureReason::Handshake
        )
    }

    /// Classify an error that ended a channel.
    pub fn from_error(err: &TetherTrustError) -> Self {
        match err {
            TetherTrustError::Stream(e) if e.is_framing() => FailureReason::Framing,
            TetherTrustError::Stream(_) => FailureReason::Transport,
            TetherTrustError::Decryption(_) => FailureReason::Decryption,
            TetherTrustError::InvalidStateTransition { .. }
            | TetherTrustError::NotAwaitingVerification(_)
            | TetherTrustError::ChannelNotSecured(_) => FailureReason::Misuse,
            TetherTrustError::Storage(_) => FailureReason::Storage,
            _ => FailureReason::Handshake,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Transport => write!(f, "transport"),
            FailureReason::Framing => write!(f, "framing"),
            FailureReason::Handshake => write!(f, "handshake"),
            FailureReason::VerificationRejected { by_peer: true } => {
                write!(f, "verification rejected by peer")
            }
            FailureReason::VerificationRejected { by_peer: false } => {
                write!(f, "verification rejected")
            }
            FailureReason::Decryption => write!(f, "decryption"),
            FailureReason::Misuse => write!(f, "misuse"),
            FailureReason::Storage => write!(f, "storage"),
            FailureReason::VersionMismatch => write!(f, "version mismatch"),
        }
    }
}

/// Notifications from a [`SecureChannel`](super::SecureChannel).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Compare this code; answer with `accept_verification` or
    /// `reject_verification`. Out-of-band codes are checked by the channel.
    VerificationCodeAvailable(VerificationCode),
    SecureChannelEstablished { peer: DeviceId },
    /// The channel failed before it was secured.
    EstablishFailed(FailureReason),
    /// Decrypted application payload.
    MessageReceived(Bytes),
    /// The channel failed after it was secured.
    ChannelError(FailureReason),
    /// The transport closed after the channel was secured.
    Disconnected,
}
