//! Protocol version exchange.
//!
//! Before any handshake byte is sent, each side announces the messaging and
//! security version ranges it speaks. Both sides then independently pick the
//! highest version in the overlap, so they agree without another round trip.

use std::ops::RangeInclusive;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TetherStreamError};

/// Encoded length: four big-endian u16 fields.
pub const VERSION_EXCHANGE_LEN: usize = 8;

/// Inclusive range of supported versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRange {
    pub min: u16,
    pub max: u16,
}

impl VersionRange {
    pub const fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    fn as_range(self) -> RangeInclusive<u16> {
        self.min..=self.max
    }

    /// Highest version both ranges contain.
    pub fn highest_common(self, other: VersionRange) -> Option<u16> {
        let top = self.max.min(other.max);
        (self.as_range().contains(&top) && other.as_range().contains(&top)).then_some(top)
    }
}

/// Versions announced by one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionExchange {
    pub messaging: VersionRange,
    pub security: VersionRange,
}

/// The versions both sides settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedVersion {
    pub messaging: u16,
    pub security: u16,
}

impl VersionExchange {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(VERSION_EXCHANGE_LEN);
        buf.put_u16(self.messaging.min);
        buf.put_u16(self.messaging.max);
        buf.put_u16(self.security.min);
        buf.put_u16(self.security.max);
        buf.freeze()
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() != VERSION_EXCHANGE_LEN {
            return Err(TetherStreamError::MalformedVersion(format!(
                "expected {VERSION_EXCHANGE_LEN} bytes, got {}",
                data.len()
            )));
        }
        let messaging = VersionRange::new(data.get_u16(), data.get_u16());
        let security = VersionRange::new(data.get_u16(), data.get_u16());
        if messaging.min > messaging.max || security.min > security.max {
            return Err(TetherStreamError::MalformedVersion(
                "range minimum above maximum".into(),
            ));
        }
        Ok(Self {
            messaging,
            security,
        })
    }

    /// Pick the highest common messaging and security versions, or `None`
    /// when either range does not overlap.
    pub fn negotiate(&self, peer: &VersionExchange) -> Option<NegotiatedVersion> {
        Some(NegotiatedVersion {
            messaging: self.messaging.highest_common(peer.messaging)?,
            security: self.security.highest_common(peer.security)?,
        })
    }
}
