// Channel configuration.

use std::fmt;

use serde::{Deserialize, Serialize};
use tetherstream::{StreamConfig, VersionRange};

use crate::crypto::aead::CipherSuite;
use crate::device::DeviceId;
use crate::error::{Result, TetherTrustError};
use crate::handshake::messages::check_suite_offer;
use crate::handshake::strategy::{DEFAULT_CODE_DIGITS, MAX_CODE_DIGITS};
use crate::handshake::{HandshakeMode, Role};
use crate::oob::OobVerifier;

/// Messaging protocol versions this build speaks.
pub const MESSAGING_VERSIONS: VersionRange = VersionRange::new(1, 1);

/// Security protocol versions this build speaks.
pub const SECURITY_VERSIONS: VersionRange = VersionRange::new(1, 1);

/// How association codes are confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    /// The user compares a short code on both screens.
    Visual,
    /// The channel compares a long code over an out-of-band link.
    OutOfBand,
}

/// Settings shared by every channel of one process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub stream: StreamConfig,
    /// Cipher suites in preference order.
    pub cipher_suites: Vec<CipherSuite>,
    pub verification_code_digits: u32,
    pub verification: VerificationMethod,
    pub messaging_versions: VersionRange,
    pub security_versions: VersionRange,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            cipher_suites: CipherSuite::ALL.to_vec(),
            verification_code_digits: DEFAULT_CODE_DIGITS,
            verification: VerificationMethod::Visual,
            messaging_versions: MESSAGING_VERSIONS,
            security_versions: SECURITY_VERSIONS,
        }
    }
}

impl ChannelConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.stream.validate()?;
        check_suite_offer(&self.cipher_suites)?;
        if self.verification_code_digits == 0 || self.verification_code_digits > MAX_CODE_DIGITS {
            return Err(TetherTrustError::Handshake(format!(
                "verification code length {} outside 1..={MAX_CODE_DIGITS}",
                self.verification_code_digits
            )));
        }
        for range in [self.messaging_versions, self.security_versions] {
            if range.min > range.max {
                return Err(TetherTrustError::Handshake(format!(
                    "version range {}..={} is empty",
                    range.min, range.max
                )));
            }
        }
        Ok(())
    }
}

/// Per-connection parameters.
pub struct ChannelSetup {
    pub role: Role,
    pub mode: HandshakeMode,
    pub local_device_id: DeviceId,
    /// Who the peer must be. Required for a reconnecting initiator; when
    /// set on any other side, a different claimed identity fails the channel.
    pub peer_device_id: Option<DeviceId>,
    /// Keyed verifier for out-of-band association.
    pub oob_verifier: Option<OobVerifier>,
}

impl ChannelSetup {
    /// First-time pairing.
    pub fn association(role: Role, local_device_id: DeviceId) -> Self {
        Self {
            role,
            mode: HandshakeMode::Association,
            local_device_id,
            peer_device_id: None,
            oob_verifier: None,
        }
    }

    /// Resumption with the key stored for the peer. The responder may pass
    /// `None` and learn the peer from its first handshake message.
    pub fn reconnection(role: Role, local_device_id: DeviceId, peer: Option<DeviceId>) -> Self {
        Self {
            role,
            mode: HandshakeMode::Reconnection,
            local_device_id,
            peer_device_id: peer,
            oob_verifier: None,
        }
    }

    /// Attach the verifier used for out-of-band association.
    pub fn with_oob_verifier(mut self, verifier: OobVerifier) -> Self {
        self.oob_verifier = Some(verifier);
        self
    }

    pub fn expect_peer(mut self, peer: DeviceId) -> Self {
        self.peer_device_id = Some(peer);
        self
    }
}

impl fmt::Debug for ChannelSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSetup")
            .field("role", &self.role)
            .field("mode", &self.mode)
            .field("local_device_id", &self.local_device_id)
            .field("peer_device_id", &self.peer_device_id)
            .field("oob_verifier", &self.oob_verifier.is_some())
            .finish()
    }
}
