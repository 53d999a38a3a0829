// HKDF-SHA256 helpers.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{Result, TetherTrustError};

/// `HKDF-Expand(HKDF-Extract(salt, ikm), info, N)`.
pub fn derive<const N: usize>(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<Zeroizing<[u8; N]>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut out = Zeroizing::new([0u8; N]);
    hk.expand(info, &mut out[..])
        .map_err(|e| TetherTrustError::KeyGeneration(format!("HKDF expand error: {e}")))?;
    Ok(out)
}
