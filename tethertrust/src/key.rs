//! Session key produced by a finished handshake.
//!
//! A [`Key`] is deliberately not `Clone`: one channel owns it until it is
//! handed to storage as bytes. Storage rebuilds a fresh object with
//! [`Key::from_bytes`] when a reconnection needs the previous key.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::crypto::aead::{AeadKey, CipherSuite, KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::crypto::hash::derive_key;
use crate::error::{Result, TetherTrustError};

/// Length of a session fingerprint.
pub const FINGERPRINT_LEN: usize = 32;

/// Serialized length: suite id (2) + key material (32).
pub const SERIALIZED_KEY_LEN: usize = 2 + KEY_LEN;

const FINGERPRINT_CONTEXT: &str = "tether 2024-06 session fingerprint";

/// Symmetric session key with its fingerprint.
pub struct Key {
    aead: AeadKey,
    fingerprint: [u8; FINGERPRINT_LEN],
}

impl Key {
    pub(crate) fn new(suite: CipherSuite, material: [u8; KEY_LEN]) -> Self {
        let fingerprint = derive_key(FINGERPRINT_CONTEXT, &material);
        Self {
            aead: AeadKey::new(suite, material),
            fingerprint,
        }
    }

    pub fn suite(&self) -> CipherSuite {
        self.aead.suite()
    }

    /// Stable one-way fingerprint. Equal on both ends of a channel; reveals
    /// nothing about the key.
    pub fn fingerprint(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.fingerprint
    }

    /// First four fingerprint bytes in hex, for logs.
    pub fn short_fingerprint(&self) -> String {
        self.fingerprint[..4].iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Encrypt with no associated data. Output is `nonce || ciphertext || tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.seal(plaintext, &[])
    }

    /// Decrypt the output of [`Key::encrypt`].
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        self.open(sealed, &[])
    }

    /// Encrypt under a fresh random nonce, binding `aad`.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ct = self.aead.encrypt(&nonce, plaintext, aad)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    /// Decrypt `nonce || ciphertext || tag` with the same `aad` used to seal.
    pub fn open(&self, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(TetherTrustError::Decryption(format!(
                "sealed message is {} bytes, shorter than nonce and tag",
                sealed.len()
            )));
        }
        let (nonce, ct) = sealed.split_at(NONCE_LEN);
        let mut n = [0u8; NONCE_LEN];
        n.copy_from_slice(nonce);
        self.aead.decrypt(&n, ct, aad)
    }

    /// Serialize for storage: suite id (big-endian u16) || key material.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(SERIALIZED_KEY_LEN));
        out.extend_from_slice(&self.suite().wire_id().to_be_bytes());
        out.extend_from_slice(self.aead.key_bytes());
        out
    }

    /// Rebuild a key saved with [`Key::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SERIALIZED_KEY_LEN {
            return Err(TetherTrustError::InvalidKey(format!(
                "expected {SERIALIZED_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let id = u16::from_be_bytes([bytes[0], bytes[1]]);
        let suite =
            CipherSuite::from_wire_id(id).ok_or(TetherTrustError::UnsupportedCipherSuite(id))?;
        let mut material = Zeroizing::new([0u8; KEY_LEN]);
        material.copy_from_slice(&bytes[2..]);
        Ok(Self::new(suite, *material))
    }

    pub(crate) fn material(&self) -> &[u8; KEY_LEN] {
        self.aead.key_bytes()
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("suite", &self.suite())
            .field("fingerprint", &self.short_fingerprint())
            .finish()
    }
}
