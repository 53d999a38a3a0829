// Handshake variants.
//
// A runner is built with exactly one strategy and keeps it for its lifetime.
// The key exchange itself is shared; a strategy decides what happens once the
// exchange completes and how the session key is derived.

use zeroize::Zeroizing;

use crate::crypto::aead::{CipherSuite, KEY_LEN};
use crate::crypto::hash::keyed_mac;
use crate::crypto::kdf;
use crate::error::{Result, TetherTrustError};
use crate::handshake::state::{HandshakeMode, HandshakeState, Role};
use crate::key::Key;
use crate::storage::ChallengeSecret;

const AUTH_STRING_INFO: &[u8] = b"tether auth string";
const SESSION_KEY_INFO: &[u8] = b"tether session key";
const RESUMED_KEY_INFO: &[u8] = b"tether resumed session key";
const RECONNECT_AUTH_INFO: &[u8] = b"tether reconnect auth";

/// Default number of digits in a visual verification code.
pub const DEFAULT_CODE_DIGITS: u32 = 6;

/// Largest supported visual code length (10^9 still fits a u32).
pub const MAX_CODE_DIGITS: u32 = 9;

/// Result of a completed X25519 exchange, bound to its transcript.
pub struct Exchange {
    shared_secret: Zeroizing<[u8; 32]>,
    transcript_hash: [u8; 32],
    suite: CipherSuite,
}

impl Exchange {
    pub(crate) fn new(
        shared_secret: Zeroizing<[u8; 32]>,
        transcript_hash: [u8; 32],
        suite: CipherSuite,
    ) -> Self {
        Self {
            shared_secret,
            transcript_hash,
            suite,
        }
    }

    /// `SHA-256(Init || Response)`.
    pub fn transcript_hash(&self) -> &[u8; 32] {
        &self.transcript_hash
    }

    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// 32-byte value both sides compare to rule out a machine in the middle.
    /// Derived from the exchange and transcript, never from the session key.
    pub fn auth_string(&self) -> Result<Zeroizing<[u8; 32]>> {
        kdf::derive(&self.shared_secret[..], &self.transcript_hash, AUTH_STRING_INFO)
    }

    fn session_key(&self) -> Result<Key> {
        let material =
            kdf::derive::<KEY_LEN>(&self.shared_secret[..], &self.transcript_hash, SESSION_KEY_INFO)?;
        Ok(Key::new(self.suite, *material))
    }

    fn resumed_session_key(&self, previous: &Key) -> Result<Key> {
        let mut ikm = Zeroizing::new([0u8; 64]);
        ikm[..32].copy_from_slice(&self.shared_secret[..]);
        ikm[32..].copy_from_slice(previous.material());
        let material = kdf::derive::<KEY_LEN>(&ikm[..], &self.transcript_hash, RESUMED_KEY_INFO)?;
        Ok(Key::new(self.suite, *material))
    }
}

/// What the runner does once the key exchange completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Move to `state` and surface the code to the caller.
    Verify {
        state: HandshakeState,
        visual_code: Option<String>,
        oob_code: Option<Vec<u8>>,
    },
    /// Stay `InProgress`; reconnection proofs follow.
    Resume,
}

/// One handshake variant.
pub trait HandshakeStrategy: Send + Sync {
    fn mode(&self) -> HandshakeMode;

    fn on_exchange_complete(&self, exchange: &Exchange) -> Result<ExchangeOutcome>;

    /// Final key. `previous` is the stored key for reconnection and `None`
    /// for association.
    fn session_key(&self, exchange: &Exchange, previous: Option<&Key>) -> Result<Key>;

    /// Proof that `prover` holds the previous key.
    fn reconnect_proof(&self, _exchange: &Exchange, _previous: &Key, _prover: Role) -> Result<[u8; 32]> {
        Err(TetherTrustError::Handshake(format!(
            "{:?} handshake has no reconnection proof",
            self.mode()
        )))
    }
}

/// First-time pairing confirmed by a human comparing a short decimal code.
#[derive(Debug, Clone)]
pub struct Association {
    digits: u32,
}

impl Association {
    pub fn new(digits: u32) -> Result<Self> {
        if digits == 0 || digits > MAX_CODE_DIGITS {
            return Err(TetherTrustError::Handshake(format!(
                "verification code length {digits} outside 1..={MAX_CODE_DIGITS}"
            )));
        }
        Ok(Self { digits })
    }
}

impl Default for Association {
    fn default() -> Self {
        Self {
            digits: DEFAULT_CODE_DIGITS,
        }
    }
}

/// `first 4 bytes (big-endian) mod 10^digits`, zero padded.
pub fn visual_code(auth_string: &[u8; 32], digits: u32) -> String {
    let value = u32::from_be_bytes([auth_string[0], auth_string[1], auth_string[2], auth_string[3]]);
    let code = value % 10u32.pow(digits);
    format!("{code:0width$}", width = digits as usize)
}

impl HandshakeStrategy for Association {
    fn mode(&self) -> HandshakeMode {
        HandshakeMode::Association
    }

    fn on_exchange_complete(&self, exchange: &Exchange) -> Result<ExchangeOutcome> {
        let auth = exchange.auth_string()?;
        Ok(ExchangeOutcome::Verify {
            state: HandshakeState::VerificationNeeded,
            visual_code: Some(visual_code(&auth, self.digits)),
            oob_code: None,
        })
    }

    fn session_key(&self, exchange: &Exchange, _previous: Option<&Key>) -> Result<Key> {
        exchange.session_key()
    }
}

/// First-time pairing corroborated over an out-of-band channel with the full
/// 32-byte auth string.
#[derive(Debug, Clone, Default)]
pub struct OobAssociation;

impl HandshakeStrategy for OobAssociation {
    fn mode(&self) -> HandshakeMode {
        HandshakeMode::Association
    }

    fn on_exchange_complete(&self, exchange: &Exchange) -> Result<ExchangeOutcome> {
        let auth = exchange.auth_string()?;
        Ok(ExchangeOutcome::Verify {
            state: HandshakeState::OobVerificationNeeded,
            visual_code: None,
            oob_code: Some(auth.to_vec()),
        })
    }

    fn session_key(&self, exchange: &Exchange, _previous: Option<&Key>) -> Result<Key> {
        exchange.session_key()
    }
}

/// Re-establishing trust with a stored key. No human step; each side proves
/// possession of the previous key and challenge secret.
#[derive(Debug, Clone)]
pub struct Reconnection {
    challenge_secret: ChallengeSecret,
}

impl Reconnection {
    pub fn new(challenge_secret: ChallengeSecret) -> Self {
        Self { challenge_secret }
    }
}

impl HandshakeStrategy for Reconnection {
    fn mode(&self) -> HandshakeMode {
        HandshakeMode::Reconnection
    }

    fn on_exchange_complete(&self, _exchange: &Exchange) -> Result<ExchangeOutcome> {
        Ok(ExchangeOutcome::Resume)
    }

    fn session_key(&self, exchange: &Exchange, previous: Option<&Key>) -> Result<Key> {
        let previous = previous.ok_or_else(|| {
            TetherTrustError::Handshake("reconnection requires the previous key".into())
        })?;
        exchange.resumed_session_key(previous)
    }

    fn reconnect_proof(&self, exchange: &Exchange, previous: &Key, prover: Role) -> Result<[u8; 32]> {
        let auth_key = kdf::derive::<32>(
            previous.material(),
            self.challenge_secret.as_bytes(),
            RECONNECT_AUTH_INFO,
        )?;
        let mut data = [0u8; 33];
        data[0] = prover.label();
        data[1..].copy_from_slice(exchange.transcript_hash());
        Ok(keyed_mac(&auth_key, &data))
    }
}
