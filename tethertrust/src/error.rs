// TetherTrust error types

use thiserror::Error;

use tetherstream::TetherStreamError;

/// Top-level error type for the TetherTrust crate.
#[derive(Debug, Error)]
pub enum TetherTrustError {
    // ── Crypto errors ───────────────────────────────────────────────────
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("AEAD encryption failed: {0}")]
    Encryption(String),

    /// Wrong key, tampered ciphertext or wrong nonce. Never partial output.
    #[error("AEAD authentication failed: {0}")]
    Decryption(String),

    #[error("unsupported cipher suite 0x{0:04x}")]
    UnsupportedCipherSuite(u16),

    // ── Handshake errors ────────────────────────────────────────────────
    #[error("handshake error: {0}")]
    Handshake(String),

    #[error("invalid handshake state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("reconnection proof rejected")]
    ReconnectionRejected,

    // ── Out-of-band errors ──────────────────────────────────────────────
    #[error("out-of-band channel error: {0}")]
    OobChannel(String),

    #[error("out-of-band nonce already used")]
    NonceExhausted,

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("operation cancelled")]
    Cancelled,

    // ── Channel errors ──────────────────────────────────────────────────
    #[error("channel is not secured (state: {0})")]
    ChannelNotSecured(String),

    #[error("channel is not awaiting verification (state: {0})")]
    NotAwaitingVerification(String),

    #[error("channel is closed")]
    ChannelClosed,

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Stream(#[from] TetherStreamError),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, TetherTrustError>;
