// Handshake state machine states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The current state of a handshake runner.
///
/// Legal transitions:
///
/// ```text
/// Unknown -> InProgress -> VerificationNeeded    -> Finished
///                       -> OobVerificationNeeded -> Finished
///                       -> ResumingSession       -> Finished
/// any     -> Invalid
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    /// Nothing sent or received yet.
    Unknown,
    /// Key exchange messages are flowing.
    InProgress,
    /// A short visual code awaits a human decision.
    VerificationNeeded,
    /// A binary code awaits out-of-band corroboration.
    OobVerificationNeeded,
    /// Reconnection proofs are being exchanged.
    ResumingSession,
    /// A key was produced. Terminal.
    Finished,
    /// The attempt failed or was rejected. Terminal.
    Invalid,
}

impl HandshakeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeState::Finished | HandshakeState::Invalid)
    }

    /// Whether the transition table allows `self -> next`.
    pub fn can_transition_to(self, next: HandshakeState) -> bool {
        use HandshakeState::*;
        match (self, next) {
            (Finished | Invalid, _) => false,
            (_, Invalid) => true,
            (Unknown, InProgress) => true,
            (InProgress, VerificationNeeded | OobVerificationNeeded | ResumingSession) => true,
            // The reconnection responder verifies the initiator's proof and
            // finishes in one step.
            (InProgress, Finished) => true,
            (VerificationNeeded | OobVerificationNeeded | ResumingSession, Finished) => true,
            _ => false,
        }
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeState::Unknown => write!(f, "Unknown"),
            HandshakeState::InProgress => write!(f, "InProgress"),
            HandshakeState::VerificationNeeded => write!(f, "VerificationNeeded"),
            HandshakeState::OobVerificationNeeded => write!(f, "OobVerificationNeeded"),
            HandshakeState::ResumingSession => write!(f, "ResumingSession"),
            HandshakeState::Finished => write!(f, "Finished"),
            HandshakeState::Invalid => write!(f, "Invalid"),
        }
    }
}

/// Which end of the handshake this runner plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    pub fn peer(self) -> Role {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }

    /// One-byte label mixed into proofs and AEAD associated data so a
    /// message can never be reflected back to its sender.
    pub fn label(self) -> u8 {
        match self {
            Role::Initiator => 0x49,
            Role::Responder => 0x52,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "Initiator"),
            Role::Responder => write!(f, "Responder"),
        }
    }
}

/// Trust bootstrap path, carried in the first handshake message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeMode {
    /// First-time pairing with a visual or out-of-band code.
    Association,
    /// Resumption with a previously stored key.
    Reconnection,
}

impl HandshakeMode {
    pub fn wire_id(self) -> u8 {
        match self {
            HandshakeMode::Association => 0x01,
            HandshakeMode::Reconnection => 0x02,
        }
    }

    pub fn from_wire_id(id: u8) -> Option<Self> {
        match id {
            0x01 => Some(HandshakeMode::Association),
            0x02 => Some(HandshakeMode::Reconnection),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_final() {
        for next in [HandshakeState::InProgress, HandshakeState::Finished, HandshakeState::Invalid] {
            assert!(!HandshakeState::Finished.can_transition_to(next));
            assert!(!HandshakeState::Invalid.can_transition_to(next));
        }
    }

    #[test]
    fn verification_cannot_be_skipped_from_unknown() {
        assert!(!HandshakeState::Unknown.can_transition_to(HandshakeState::Finished));
        assert!(!HandshakeState::Unknown.can_transition_to(HandshakeState::VerificationNeeded));
        assert!(HandshakeState::Unknown.can_transition_to(HandshakeState::Invalid));
    }

    #[test]
    fn role_labels_differ() {
        assert_ne!(Role::Initiator.label(), Role::Responder.label());
        assert_eq!(Role::Initiator.peer(), Role::Responder);
    }
}
