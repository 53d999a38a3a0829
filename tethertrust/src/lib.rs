//! TetherTrust -- pairing handshake and secure channel for Tether.
//!
//! Pairs a companion device with a host over an untrusted transport:
//! - **Handshake**: X25519 key exchange with a commitment, confirmed by a
//!   visual or out-of-band code (association) or by proofs over a stored
//!   key (reconnection)
//! - **OOB**: AES-256-GCM corroboration of the code over a side channel
//! - **Secure channel**: the handshake over a `tetherstream` message stream,
//!   then AEAD for every application message
//! - **Storage**: the seam where keys and challenge secrets are persisted

pub mod channel;
pub mod crypto;
pub mod device;
pub mod error;
pub mod handshake;
pub mod key;
pub mod oob;
pub mod storage;

// Re-export key public types at crate root.
pub use channel::{
    ChannelConfig, ChannelEvent, ChannelSetup, ChannelState, FailureReason, SecureChannel,
    VerificationCode, VerificationMethod,
};
pub use crypto::aead::CipherSuite;
pub use device::DeviceId;
pub use error::{Result, TetherTrustError};
pub use handshake::{HandshakeMessage, HandshakeMode, HandshakeRunner, HandshakeState, Role};
pub use key::Key;
pub use oob::{connect_oob, CancelHandle, OobChannel, OobConnector, OobVerifier};
pub use storage::{ChallengeSecret, InMemoryStorage, KeyStorage};
