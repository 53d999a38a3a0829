// Handshake messages exchanged during the Tether pairing protocol.
//
//   Initiator                               Responder
//     |--- Init (commitment) ---------------->|
//     |<-- Response (ephemeral pub) ----------|
//     |--- Finish (ephemeral pub) ----------->|
//     |        ... verification code / reconnection proofs ...
//
// Every message starts with the preamble `"TTHS" | version(1) | type(1)`.
// Integers are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::crypto::aead::CipherSuite;
use crate::device::DeviceId;
use crate::error::{Result, TetherTrustError};
use crate::handshake::state::HandshakeMode;

/// Protocol magic.
pub const MAGIC: &[u8; 4] = b"TTHS";

/// Handshake protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

const PREAMBLE_LEN: usize = MAGIC.len() + 2;

/// Most suites an `Init` may offer.
pub const MAX_SUITES: usize = 8;

/// Check a local suite preference list before it is offered: non-empty, no
/// repeats, and short enough for one `Init`.
pub fn check_suite_offer(suites: &[CipherSuite]) -> Result<()> {
    if suites.is_empty() {
        return Err(TetherTrustError::Handshake("no cipher suites configured".into()));
    }
    if suites.len() > MAX_SUITES {
        return Err(TetherTrustError::Handshake(format!(
            "{} cipher suites configured, at most {MAX_SUITES} fit an offer",
            suites.len()
        )));
    }
    for (i, suite) in suites.iter().enumerate() {
        if suites[..i].contains(suite) {
            return Err(TetherTrustError::Handshake(format!(
                "cipher suite {suite:?} listed twice"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Init = 0x01,
    Response = 0x02,
    Finish = 0x03,
    ReconnectProof = 0x04,
}

impl MessageType {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0x01 => Ok(MessageType::Init),
            0x02 => Ok(MessageType::Response),
            0x03 => Ok(MessageType::Finish),
            0x04 => Ok(MessageType::ReconnectProof),
            other => Err(TetherTrustError::Handshake(format!(
                "unknown handshake message type 0x{other:02x}"
            ))),
        }
    }
}

/// Message 1: Initiator -> Responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInit {
    pub mode: HandshakeMode,
    pub device_id: DeviceId,
    pub random: [u8; 32],
    /// Offered suites, most preferred first.
    pub cipher_suites: Vec<CipherSuite>,
    /// SHA-256 of the initiator's ephemeral public key, revealed in `Finish`.
    /// Committing first stops a machine in the middle from grinding its own
    /// key until the short verification code collides.
    pub commitment: [u8; 32],
}

/// Message 2: Responder -> Initiator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub device_id: DeviceId,
    pub random: [u8; 32],
    pub cipher_suite: CipherSuite,
    pub ephemeral_pub: [u8; 32],
}

/// Message 3: Initiator -> Responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeFinish {
    pub ephemeral_pub: [u8; 32],
}

/// Reconnection proof, one in each direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectProof {
    pub proof: [u8; 32],
}

impl HandshakeInit {
    pub fn encode(&self) -> Bytes {
        let mut buf = preamble(MessageType::Init, 1 + 16 + 32 + 1 + 2 * self.cipher_suites.len() + 32);
        buf.put_u8(self.mode.wire_id());
        buf.put_slice(self.device_id.as_bytes());
        buf.put_slice(&self.random);
        buf.put_u8(self.cipher_suites.len() as u8);
        for suite in &self.cipher_suites {
            buf.put_u16(suite.wire_id());
        }
        buf.put_slice(&self.commitment);
        buf.freeze()
    }

    /// Parse and validate the preamble and body. Suites this build does not
    /// know are skipped; an offer with no known suite is rejected.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::open(data, MessageType::Init)?;
        let mode_id = r.u8()?;
        let mode = HandshakeMode::from_wire_id(mode_id).ok_or_else(|| {
            TetherTrustError::Handshake(format!("unknown handshake mode 0x{mode_id:02x}"))
        })?;
        let device_id = DeviceId(r.array()?);
        let random = r.array()?;
        let count = usize::from(r.u8()?);
        if count == 0 || count > MAX_SUITES {
            return Err(TetherTrustError::Handshake(format!(
                "cipher suite offer of {count} entries"
            )));
        }
        let mut cipher_suites = Vec::with_capacity(count);
        for _ in 0..count {
            if let Some(suite) = CipherSuite::from_wire_id(r.u16()?) {
                cipher_suites.push(suite);
            }
        }
        if cipher_suites.is_empty() {
            return Err(TetherTrustError::Handshake("no known cipher suite offered".into()));
        }
        let commitment = r.array()?;
        r.finish()?;
        Ok(Self {
            mode,
            device_id,
            random,
            cipher_suites,
            commitment,
        })
    }
}

impl HandshakeResponse {
    pub fn encode(&self) -> Bytes {
        let mut buf = preamble(MessageType::Response, 16 + 32 + 2 + 32);
        buf.put_slice(self.device_id.as_bytes());
        buf.put_slice(&self.random);
        buf.put_u16(self.cipher_suite.wire_id());
        buf.put_slice(&self.ephemeral_pub);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::open(data, MessageType::Response)?;
        let device_id = DeviceId(r.array()?);
        let random = r.array()?;
        let id = r.u16()?;
        let cipher_suite =
            CipherSuite::from_wire_id(id).ok_or(TetherTrustError::UnsupportedCipherSuite(id))?;
        let ephemeral_pub = r.array()?;
        r.finish()?;
        Ok(Self {
            device_id,
            random,
            cipher_suite,
            ephemeral_pub,
        })
    }
}

impl HandshakeFinish {
    pub fn encode(&self) -> Bytes {
        let mut buf = preamble(MessageType::Finish, 32);
        buf.put_slice(&self.ephemeral_pub);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::open(data, MessageType::Finish)?;
        let ephemeral_pub = r.array()?;
        r.finish()?;
        Ok(Self { ephemeral_pub })
    }
}

impl ReconnectProof {
    pub fn encode(&self) -> Bytes {
        let mut buf = preamble(MessageType::ReconnectProof, 32);
        buf.put_slice(&self.proof);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::open(data, MessageType::ReconnectProof)?;
        let proof = r.array()?;
        r.finish()?;
        Ok(Self { proof })
    }
}

fn preamble(kind: MessageType, body_len: usize) -> BytesMut {
    let mut buf = BytesMut::with_capacity(PREAMBLE_LEN + body_len);
    buf.put_slice(MAGIC);
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u8(kind as u8);
    buf
}

/// Bounds-checked cursor over a handshake message body.
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    /// Check the preamble and position the cursor at the body.
    fn open(data: &'a [u8], expected: MessageType) -> Result<Self> {
        if data.len() < PREAMBLE_LEN {
            return Err(TetherTrustError::Handshake(format!(
                "message of {} bytes is shorter than the preamble",
                data.len()
            )));
        }
        if &data[..MAGIC.len()] != MAGIC {
            return Err(TetherTrustError::Handshake("bad protocol magic".into()));
        }
        let version = data[MAGIC.len()];
        if version != PROTOCOL_VERSION {
            return Err(TetherTrustError::Handshake(format!(
                "unsupported handshake version {version}"
            )));
        }
        let kind = MessageType::from_u8(data[MAGIC.len() + 1])?;
        if kind != expected {
            return Err(TetherTrustError::Handshake(format!(
                "expected {expected:?} message, got {kind:?}"
            )));
        }
        Ok(Self {
            data: &data[PREAMBLE_LEN..],
        })
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.data.len() < n {
            return Err(TetherTrustError::Handshake(format!(
                "truncated message: need {n} more bytes, have {}",
                self.data.len()
            )));
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.data.get_u8())
    }

    fn u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.data.get_u16())
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.need(N)?;
        let mut out = [0u8; N];
        self.data.copy_to_slice(&mut out);
        Ok(out)
    }

    fn finish(self) -> Result<()> {
        if !self.data.is_empty() {
            return Err(TetherTrustError::Handshake(format!(
                "{} trailing bytes",
                self.data.len()
            )));
        }
        Ok(())
    }
}
