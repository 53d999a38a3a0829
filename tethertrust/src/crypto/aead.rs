// AEAD cipher suites: ChaCha20-Poly1305 (RFC 8439) and AES-256-GCM.
//
// Suite IDs are the values offered and chosen during the handshake:
//   0x0001 TETHER_X25519_AES256GCM_SHA256
//   0x0002 TETHER_X25519_CHACHA20POLY1305_SHA256

// Both aes-gcm and chacha20poly1305 re-export the same `aead` traits.
// Import once from aes_gcm to avoid redundant imports.
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce as AesNonce};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{Result, TetherTrustError};

/// AEAD nonce length for both suites.
pub const NONCE_LEN: usize = 12;

/// AEAD tag length for both suites.
pub const TAG_LEN: usize = 16;

/// Symmetric key length for both suites.
pub const KEY_LEN: usize = 32;

/// Cipher suite identifier (wire value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherSuite {
    /// AES-256-GCM, suite id 0x0001.
    Aes256Gcm,
    /// ChaCha20-Poly1305, suite id 0x0002.
    ChaCha20Poly1305,
}

impl CipherSuite {
    /// Every suite this build supports, in default preference order.
    pub const ALL: [CipherSuite; 2] = [CipherSuite::ChaCha20Poly1305, CipherSuite::Aes256Gcm];

    /// Wire ID used during handshake negotiation.
    pub fn wire_id(self) -> u16 {
        match self {
            CipherSuite::Aes256Gcm => 0x0001,
            CipherSuite::ChaCha20Poly1305 => 0x0002,
        }
    }

    /// Resolve from a wire ID.
    pub fn from_wire_id(id: u16) -> Option<Self> {
        match id {
            0x0001 => Some(CipherSuite::Aes256Gcm),
            0x0002 => Some(CipherSuite::ChaCha20Poly1305),
            _ => None,
        }
    }
}

/// A 256-bit AEAD key bound to one cipher suite.
///
/// Key bytes are wiped on drop. The caller owns nonce uniqueness.
pub struct AeadKey {
    suite: CipherSuite,
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl AeadKey {
    pub fn new(suite: CipherSuite, key: [u8; KEY_LEN]) -> Self {
        Self {
            suite,
            key: Zeroizing::new(key),
        }
    }

    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Raw key bytes (for export to storage).
    pub fn key_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    /// Encrypt `plaintext` under `nonce` with associated data `aad`.
    ///
    /// Returns ciphertext || 16-byte tag.
    pub fn encrypt(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let payload = Payload { msg: plaintext, aad };
        let sealed = match self.suite {
            CipherSuite::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(&self.key[..])
                .map_err(|e| TetherTrustError::Encryption(format!("chacha init: {e}")))?
                .encrypt(Nonce::from_slice(nonce), payload),
            CipherSuite::Aes256Gcm => Aes256Gcm::new_from_slice(&self.key[..])
                .map_err(|e| TetherTrustError::Encryption(format!("aes-gcm init: {e}")))?
                .encrypt(AesNonce::from_slice(nonce), payload),
        };
        sealed.map_err(|e| TetherTrustError::Encryption(format!("{e}")))
    }

    /// Decrypt `ciphertext` (tag appended) under `nonce` and `aad`.
    pub fn decrypt(&self, nonce: &[u8; NONCE_LEN], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        let opened = match self.suite {
            CipherSuite::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(&self.key[..])
                .map_err(|e| TetherTrustError::Decryption(format!("chacha init: {e}")))?
                .decrypt(Nonce::from_slice(nonce), payload),
            CipherSuite::Aes256Gcm => Aes256Gcm::new_from_slice(&self.key[..])
                .map_err(|e| TetherTrustError::Decryption(format!("aes-gcm init: {e}")))?
                .decrypt(AesNonce::from_slice(nonce), payload),
        };
        opened.map_err(|e| TetherTrustError::Decryption(format!("{e}")))
    }
}
