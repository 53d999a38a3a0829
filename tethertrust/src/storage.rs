//! Key persistence seam.
//!
//! The channel saves the session key and the challenge secret when a channel
//! becomes secured, and loads them when a reconnection starts. Nothing is
//! cached beyond one channel's lifetime.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::device::DeviceId;
use crate::error::{Result, TetherTrustError};
use crate::key::Key;

/// Length of a challenge secret.
pub const CHALLENGE_SECRET_LEN: usize = 16;

/// Device-pair secret mixed with the stored key to authenticate
/// reconnection proofs.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ChallengeSecret([u8; CHALLENGE_SECRET_LEN]);

impl ChallengeSecret {
    pub fn random() -> Self {
        let mut bytes = [0u8; CHALLENGE_SECRET_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; CHALLENGE_SECRET_LEN] = bytes.try_into().map_err(|_| {
            TetherTrustError::InvalidKey(format!(
                "challenge secret must be {CHALLENGE_SECRET_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; CHALLENGE_SECRET_LEN] {
        &self.0
    }
}

impl fmt::Debug for ChallengeSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChallengeSecret(..)")
    }
}

/// Persistent store for per-device secrets.
///
/// Implementations must be callable from any thread. The channel calls them
/// while holding its own lock, so they must not call back into the channel.
pub trait KeyStorage: Send + Sync {
    fn save_key(&self, device: &DeviceId, key: &Key) -> Result<()>;

    fn load_key(&self, device: &DeviceId) -> Result<Option<Key>>;

    fn save_challenge_secret(&self, device: &DeviceId, secret: &ChallengeSecret) -> Result<()>;

    fn load_challenge_secret(&self, device: &DeviceId) -> Result<Option<ChallengeSecret>>;
}

/// Process-local [`KeyStorage`]. Keys are held in serialized form and
/// rebuilt on load, so every load yields an independent [`Key`].
#[derive(Default)]
pub struct InMemoryStorage {
    keys: Mutex<HashMap<DeviceId, zeroize::Zeroizing<Vec<u8>>>>,
    secrets: Mutex<HashMap<DeviceId, ChallengeSecret>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything stored for `device`.
    pub fn remove(&self, device: &DeviceId) {
        self.keys.lock().remove(device);
        self.secrets.lock().remove(device);
    }

    pub fn contains_key(&self, device: &DeviceId) -> bool {
        self.keys.lock().contains_key(device)
    }
}

impl KeyStorage for InMemoryStorage {
    fn save_key(&self, device: &DeviceId, key: &Key) -> Result<()> {
        tracing::debug!(%device, fingerprint = %key.short_fingerprint(), "key saved");
        self.keys.lock().insert(*device, key.to_bytes());
        Ok(())
    }

    fn load_key(&self, device: &DeviceId) -> Result<Option<Key>> {
        self.keys
            .lock()
            .get(device)
            .map(|bytes| Key::from_bytes(bytes))
            .transpose()
    }

    fn save_challenge_secret(&self, device: &DeviceId, secret: &ChallengeSecret) -> Result<()> {
        self.secrets.lock().insert(*device, secret.clone());
        Ok(())
    }

    fn load_challenge_secret(&self, device: &DeviceId) -> Result<Option<ChallengeSecret>> {
        Ok(self.secrets.lock().get(device).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::aead::{CipherSuite, KEY_LEN};

    #[test]
    fn stored_key_reloads_with_same_fingerprint() {
        let storage = InMemoryStorage::new();
        let device = DeviceId([7; 16]);
        let key = Key::new(CipherSuite::ChaCha20Poly1305, [4; KEY_LEN]);
        storage.save_key(&device, &key).unwrap();
        let loaded = storage.load_key(&device).unwrap().unwrap();
        assert_eq!(loaded.fingerprint(), key.fingerprint());
        assert!(storage.load_key(&DeviceId([8; 16])).unwrap().is_none());
    }

    #[test]
    fn secrets_are_per_device() {
        let storage = InMemoryStorage::new();
        let a = DeviceId([1; 16]);
        let secret = ChallengeSecret::random();
        storage.save_challenge_secret(&a, &secret).unwrap();
        assert_eq!(storage.load_challenge_secret(&a).unwrap(), Some(secret));
        storage.remove(&a);
        assert!(storage.load_challenge_secret(&a).unwrap().is_none());
    }

    #[test]
    fn challenge_secret_length_checked() {
        assert!(ChallengeSecret::from_bytes(&[0; 15]).is_err());
        assert!(ChallengeSecret::from_bytes(&[0; CHALLENGE_SECRET_LEN]).is_ok());
        assert_eq!(format!("{:?}", ChallengeSecret::random()), "ChallengeSecret(..)");
    }
}
