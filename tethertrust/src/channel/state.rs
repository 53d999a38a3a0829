// Secure channel lifecycle.

use std::fmt;

use crate::channel::event::FailureReason;

/// Channel state.
///
/// ```text
/// Connecting -> Handshaking -> Verifying -> Secured
///                           -> Secured            (reconnection)
/// any        -> Failed | Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Waiting for `start` and the peer's version announcement.
    Connecting,
    /// Key exchange or reconnection proofs in flight.
    Handshaking,
    /// A verification code is out; waiting for both sides to confirm.
    Verifying,
    /// Application messages flow.
    Secured,
    /// Terminal. The channel is unusable.
    Failed(FailureReason),
    /// Terminal. Closed by the owner or the transport.
    Disconnected,
}

impl ChannelState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChannelState::Failed(_) | ChannelState::Disconnected)
    }

    pub fn can_transition_to(self, next: ChannelState) -> bool {
        use ChannelState::*;
        match (self, next) {
            (Failed(_) | Disconnected, _) => false,
            (_, Failed(_) | Disconnected) => true,
            (Connecting, Handshaking) => true,
            (Handshaking, Verifying | Secured) => true,
            (Verifying, Secured) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Connecting => write!(f, "Connecting"),
            ChannelState::Handshaking => write!(f, "Handshaking"),
            ChannelState::Verifying => write!(f, "Verifying"),
            ChannelState::Secured => write!(f, "Secured"),
            ChannelState::Failed(reason) => write!(f, "Failed({reason})"),
            ChannelState::Disconnected => write!(f, "Disconnected"),
        }
    }
}
