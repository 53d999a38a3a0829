// Out-of-band code corroboration.
//
// Side A generates an AES-256-GCM key and one nonce per direction and sends
//
//     key(32) | nonce_a(12) | nonce_b(12)
//
// over the side channel. A encrypts with nonce_a and decrypts with nonce_b;
// B installs the bundle with the directions swapped. Each side encrypts
// exactly once, so a nonce is never reused under the key, and a payload
// reflected back to its sender fails authentication.

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::crypto::aead::{AeadKey, CipherSuite, KEY_LEN, NONCE_LEN};
use crate::error::{Result, TetherTrustError};

/// Length of the key and nonce bundle sent over the side channel.
pub const OOB_BUNDLE_LEN: usize = KEY_LEN + 2 * NONCE_LEN;

const OOB_AAD: &[u8] = b"tether oob verification";

/// Side channel carrying the bundle. Never used for application data.
pub trait OobChannel: Send + Sync {
    fn send(&self, data: &[u8]) -> Result<()>;
}

struct OobKeys {
    key: AeadKey,
    encrypt_nonce: [u8; NONCE_LEN],
    decrypt_nonce: [u8; NONCE_LEN],
}

/// Single-exchange OOB cipher. Build a new one per handshake attempt.
#[derive(Default)]
pub struct OobVerifier {
    keys: Option<OobKeys>,
    encrypted: bool,
}

impl OobVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a key has been generated or installed.
    pub fn is_ready(&self) -> bool {
        self.keys.is_some()
    }

    /// Side A: generate the bundle and send it over `channel`. On error the
    /// verifier stays empty and must not be used for this attempt.
    pub fn begin_exchange(&mut self, channel: &dyn OobChannel) -> Result<()> {
        if self.keys.is_some() {
            return Err(TetherTrustError::OobChannel("exchange already started".into()));
        }
        let mut bundle = Zeroizing::new([0u8; OOB_BUNDLE_LEN]);
        OsRng
            .try_fill_bytes(&mut bundle[..])
            .map_err(|e| TetherTrustError::KeyGeneration(format!("OS RNG: {e}")))?;
        channel.send(&bundle[..])?;
        self.keys = Some(split_bundle(&bundle, false));
        tracing::debug!("oob bundle sent");
        Ok(())
    }

    /// Side B: install a bundle received over the side channel.
    pub fn install(&mut self, bundle: &[u8]) -> Result<()> {
        if self.keys.is_some() {
            return Err(TetherTrustError::OobChannel("key already installed".into()));
        }
        let bundle: &[u8; OOB_BUNDLE_LEN] = bundle.try_into().map_err(|_| {
            TetherTrustError::InvalidKey(format!(
                "oob bundle must be {OOB_BUNDLE_LEN} bytes, got {}",
                bundle.len()
            ))
        })?;
        self.keys = Some(split_bundle(bundle, true));
        tracing::debug!("oob bundle installed");
        Ok(())
    }

    /// Encrypt this side's code. Allowed once per exchange.
    pub fn encrypt(&mut self, code: &[u8]) -> Result<Vec<u8>> {
        let keys = self.keys.as_ref().ok_or_else(no_key)?;
        if self.encrypted {
            return Err(TetherTrustError::NonceExhausted);
        }
        let out = keys.key.encrypt(&keys.encrypt_nonce, code, OOB_AAD)?;
        self.encrypted = true;
        Ok(out)
    }

    /// Decrypt the peer's code.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let keys = self.keys.as_ref().ok_or_else(no_key)?;
        keys.key.decrypt(&keys.decrypt_nonce, data, OOB_AAD)
    }
}

fn split_bundle(bundle: &[u8; OOB_BUNDLE_LEN], swap: bool) -> OobKeys {
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&bundle[..KEY_LEN]);
    let mut a = [0u8; NONCE_LEN];
    a.copy_from_slice(&bundle[KEY_LEN..KEY_LEN + NONCE_LEN]);
    let mut b = [0u8; NONCE_LEN];
    b.copy_from_slice(&bundle[KEY_LEN + NONCE_LEN..]);
    let (encrypt_nonce, decrypt_nonce) = if swap { (b, a) } else { (a, b) };
    let keys = OobKeys {
        key: AeadKey::new(CipherSuite::Aes256Gcm, key),
        encrypt_nonce,
        decrypt_nonce,
    };
    zeroize::Zeroize::zeroize(&mut key);
    keys
}

fn no_key() -> TetherTrustError {
    TetherTrustError::InvalidKey("no out-of-band key installed".into())
}
