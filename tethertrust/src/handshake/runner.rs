// Handshake state machine driver.
//
// The runner owns the handshake state, the ephemeral key pair and the
// transcript. Every public operation checks the current state first; calling
// one out of order is a contract violation and poisons the runner to
// `Invalid`. Any protocol error does the same. A runner is single use.

use bytes::Bytes;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::crypto::aead::CipherSuite;
use crate::crypto::hash::{ct_eq, sha256};
use crate::crypto::x25519::X25519KeyPair;
use crate::device::DeviceId;
use crate::error::{Result, TetherTrustError};
use crate::handshake::messages::{
    check_suite_offer, HandshakeFinish, HandshakeInit, HandshakeResponse, ReconnectProof,
};
use crate::handshake::state::{HandshakeMode, HandshakeState, Role};
use crate::handshake::strategy::{Exchange, ExchangeOutcome, HandshakeStrategy};
use crate::key::Key;

/// Output of one runner step.
#[derive(Debug)]
pub struct HandshakeMessage {
    /// Bytes to send to the peer, if any.
    pub next_message: Option<Bytes>,
    /// Short decimal code for visual comparison.
    pub verification_code: Option<String>,
    /// 32-byte code for out-of-band corroboration.
    pub oob_verification_code: Option<Vec<u8>>,
    /// Set once the runner reaches `Finished`.
    pub resulting_key: Option<Key>,
    pub state: HandshakeState,
}

impl HandshakeMessage {
    fn new(state: HandshakeState) -> Self {
        Self {
            next_message: None,
            verification_code: None,
            oob_verification_code: None,
            resulting_key: None,
            state,
        }
    }

    fn with_message(mut self, bytes: Bytes) -> Self {
        self.next_message = Some(bytes);
        self
    }
}

/// Drives one handshake attempt for one role.
pub struct HandshakeRunner {
    role: Role,
    state: HandshakeState,
    strategy: Box<dyn HandshakeStrategy>,
    local_device_id: DeviceId,
    cipher_suites: Vec<CipherSuite>,
    peer_device_id: Option<DeviceId>,
    ephemeral: Option<X25519KeyPair>,
    /// Encoded `Init`, kept for the transcript hash.
    init_bytes: Option<Bytes>,
    /// Responder side: the initiator's commitment from `Init`.
    commitment: Option<[u8; 32]>,
    /// Responder side: transcript hash fixed when `Response` is sent.
    transcript_hash: Option<[u8; 32]>,
    suite: Option<CipherSuite>,
    exchange: Option<Exchange>,
}

impl HandshakeRunner {
    /// Build a runner. `cipher_suites` is the local preference list; it must
    /// not be empty.
    pub fn new(
        role: Role,
        strategy: Box<dyn HandshakeStrategy>,
        local_device_id: DeviceId,
        cipher_suites: Vec<CipherSuite>,
    ) -> Result<Self> {
        check_suite_offer(&cipher_suites)?;
        Ok(Self {
            role,
            state: HandshakeState::Unknown,
            strategy,
            local_device_id,
            cipher_suites,
            peer_device_id: None,
            ephemeral: None,
            init_bytes: None,
            commitment: None,
            transcript_hash: None,
            suite: None,
            exchange: None,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn mode(&self) -> HandshakeMode {
        self.strategy.mode()
    }

    /// Peer identity claimed in the exchange, once known.
    pub fn peer_device_id(&self) -> Option<DeviceId> {
        self.peer_device_id
    }

    /// Whether both ephemeral keys have been exchanged.
    pub fn is_exchange_complete(&self) -> bool {
        self.exchange.is_some()
    }

    /// Negotiated cipher suite, once known.
    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.suite
    }

    /// Initiator: produce `Init`.
    pub fn init_handshake(&mut self) -> Result<HandshakeMessage> {
        self.expect_role(Role::Initiator, "init_handshake")?;
        self.expect_state(&[HandshakeState::Unknown], HandshakeState::InProgress)?;

        let ephemeral = X25519KeyPair::generate();
        let init = HandshakeInit {
            mode: self.strategy.mode(),
            device_id: self.local_device_id,
            random: random32(),
            cipher_suites: self.cipher_suites.clone(),
            commitment: sha256(&[&ephemeral.public_key_bytes()[..]]),
        };
        let bytes = init.encode();
        self.ephemeral = Some(ephemeral);
        self.init_bytes = Some(bytes.clone());
        self.transition(HandshakeState::InProgress)?;
        tracing::debug!(mode = ?init.mode, suites = init.cipher_suites.len(), "handshake init sent");
        Ok(HandshakeMessage::new(self.state).with_message(bytes))
    }

    /// Responder: validate `Init` and produce `Response`.
    pub fn respond_to_init(&mut self, bytes: &[u8]) -> Result<HandshakeMessage> {
        self.expect_role(Role::Responder, "respond_to_init")?;
        self.expect_state(&[HandshakeState::Unknown], HandshakeState::InProgress)?;
        self.poison_on_error(|this| this.respond_to_init_inner(bytes))
    }

    fn respond_to_init_inner(&mut self, bytes: &[u8]) -> Result<HandshakeMessage> {
        let init = HandshakeInit::decode(bytes)?;
        if init.mode != self.strategy.mode() {
            return Err(TetherTrustError::Handshake(format!(
                "peer requested {:?}, expected {:?}",
                init.mode,
                self.strategy.mode()
            )));
        }
        let suite = init
            .cipher_suites
            .iter()
            .copied()
            .find(|s| self.cipher_suites.contains(s))
            .ok_or_else(|| TetherTrustError::Handshake("no common cipher suite".into()))?;

        let ephemeral = X25519KeyPair::generate();
        let response = HandshakeResponse {
            device_id: self.local_device_id,
            random: random32(),
            cipher_suite: suite,
            ephemeral_pub: ephemeral.public_key_bytes(),
        };
        let response_bytes = response.encode();

        self.transcript_hash = Some(sha256(&[bytes, &response_bytes[..]]));
        self.commitment = Some(init.commitment);
        self.peer_device_id = Some(init.device_id);
        self.suite = Some(suite);
        self.ephemeral = Some(ephemeral);
        self.transition(HandshakeState::InProgress)?;
        tracing::debug!(peer = %init.device_id, ?suite, "handshake response sent");
        Ok(HandshakeMessage::new(self.state).with_message(response_bytes))
    }

    /// Advance the exchange. Initiator consumes `Response` and emits
    /// `Finish`; responder consumes `Finish`. On completion the strategy
    /// picks the next state and code.
    pub fn continue_handshake(&mut self, bytes: &[u8]) -> Result<HandshakeMessage> {
        self.expect_state(&[HandshakeState::InProgress], HandshakeState::InProgress)?;
        if self.exchange.is_some() {
            return self.misuse("continue_handshake after the exchange completed");
        }
        self.poison_on_error(|this| match this.role {
            Role::Initiator => this.consume_response(bytes),
            Role::Responder => this.consume_finish(bytes),
        })
    }

    fn consume_response(&mut self, bytes: &[u8]) -> Result<HandshakeMessage> {
        let response = HandshakeResponse::decode(bytes)?;
        if !self.cipher_suites.contains(&response.cipher_suite) {
            return Err(TetherTrustError::Handshake(format!(
                "peer chose {:?}, which was not offered",
                response.cipher_suite
            )));
        }
        let init_bytes = self.init_bytes.as_ref().ok_or_else(missing("init bytes"))?;
        let transcript_hash = sha256(&[&init_bytes[..], bytes]);
        let ephemeral = self.ephemeral.take().ok_or_else(missing("ephemeral key"))?;
        let shared = ephemeral.diffie_hellman(&response.ephemeral_pub)?;
        let finish = HandshakeFinish {
            ephemeral_pub: ephemeral.public_key_bytes(),
        }
        .encode();

        self.peer_device_id = Some(response.device_id);
        self.suite = Some(response.cipher_suite);
        self.exchange = Some(Exchange::new(shared, transcript_hash, response.cipher_suite));
        tracing::debug!(peer = %response.device_id, suite = ?response.cipher_suite, "handshake finish sent");
        let mut out = self.exchange_complete()?;
        out.next_message = Some(finish);
        Ok(out)
    }

    fn consume_finish(&mut self, bytes: &[u8]) -> Result<HandshakeMessage> {
        let finish = HandshakeFinish::decode(bytes)?;
        let commitment = self.commitment.ok_or_else(missing("commitment"))?;
        if !ct_eq(&sha256(&[&finish.ephemeral_pub[..]]), &commitment) {
            return Err(TetherTrustError::Handshake(
                "initiator key does not match its commitment".into(),
            ));
        }
        let ephemeral = self.ephemeral.take().ok_or_else(missing("ephemeral key"))?;
        let shared = ephemeral.diffie_hellman(&finish.ephemeral_pub)?;
        let transcript_hash = self.transcript_hash.ok_or_else(missing("transcript"))?;
        let suite = self.suite.ok_or_else(missing("cipher suite"))?;
        self.exchange = Some(Exchange::new(shared, transcript_hash, suite));
        self.exchange_complete()
    }

    fn exchange_complete(&mut self) -> Result<HandshakeMessage> {
        let exchange = self.exchange.as_ref().ok_or_else(missing("exchange"))?;
        match self.strategy.on_exchange_complete(exchange)? {
            ExchangeOutcome::Verify {
                state,
                visual_code,
                oob_code,
            } => {
                self.transition(state)?;
                tracing::info!(role = ?self.role, %state, "key exchange complete, verification needed");
                let mut out = HandshakeMessage::new(state);
                out.verification_code = visual_code;
                out.oob_verification_code = oob_code;
                Ok(out)
            }
            ExchangeOutcome::Resume => {
                tracing::debug!(role = ?self.role, "key exchange complete, awaiting reconnection proofs");
                Ok(HandshakeMessage::new(self.state))
            }
        }
    }

    /// The caller confirmed the verification code. Produces the key.
    pub fn notify_pin_verified(&mut self) -> Result<HandshakeMessage> {
        self.expect_state(
            &[
                HandshakeState::VerificationNeeded,
                HandshakeState::OobVerificationNeeded,
            ],
            HandshakeState::Finished,
        )?;
        self.poison_on_error(|this| {
            let exchange = this.exchange.as_ref().ok_or_else(missing("exchange"))?;
            let key = this.strategy.session_key(exchange, None)?;
            this.finish(key)
        })
    }

    /// The code did not match or was rejected. Always ends `Invalid`.
    pub fn notify_pin_not_validated(&mut self) -> HandshakeMessage {
        if self.state != HandshakeState::Invalid {
            tracing::info!(role = ?self.role, from = %self.state, "verification not validated");
        }
        self.invalidate();
        HandshakeMessage::new(self.state)
    }

    /// Initiator, reconnection: emit the proof of possession of
    /// `previous_key`.
    pub fn init_reconnect_authentication(&mut self, previous_key: &Key) -> Result<HandshakeMessage> {
        self.expect_role(Role::Initiator, "init_reconnect_authentication")?;
        self.expect_state(&[HandshakeState::InProgress], HandshakeState::ResumingSession)?;
        self.expect_reconnection_ready()?;
        self.poison_on_error(|this| {
            let exchange = this.exchange.as_ref().ok_or_else(missing("exchange"))?;
            let proof = this
                .strategy
                .reconnect_proof(exchange, previous_key, Role::Initiator)?;
            this.transition(HandshakeState::ResumingSession)?;
            Ok(HandshakeMessage::new(this.state).with_message(ReconnectProof { proof }.encode()))
        })
    }

    /// Verify the peer's reconnection proof.
    ///
    /// Responder: checks the initiator's proof, answers with its own and
    /// finishes. Initiator (after [`init_reconnect_authentication`]): checks
    /// the responder's proof and finishes. A bad proof ends `Invalid`.
    ///
    /// [`init_reconnect_authentication`]: Self::init_reconnect_authentication
    pub fn authenticate_reconnection(
        &mut self,
        bytes: &[u8],
        previous_key: &Key,
    ) -> Result<HandshakeMessage> {
        match self.role {
            Role::Responder => {
                self.expect_state(&[HandshakeState::InProgress], HandshakeState::Finished)?;
                self.expect_reconnection_ready()?;
            }
            Role::Initiator => {
                self.expect_state(&[HandshakeState::ResumingSession], HandshakeState::Finished)?;
            }
        }
        self.poison_on_error(|this| {
            let exchange = this.exchange.as_ref().ok_or_else(missing("exchange"))?;
            let received = ReconnectProof::decode(bytes)?;
            let expected = this
                .strategy
                .reconnect_proof(exchange, previous_key, this.role.peer())?;
            if !ct_eq(&received.proof, &expected) {
                tracing::warn!(role = ?this.role, "reconnection proof mismatch");
                return Err(TetherTrustError::ReconnectionRejected);
            }
            let reply = match this.role {
                Role::Responder => Some(
                    ReconnectProof {
                        proof: this
                            .strategy
                            .reconnect_proof(exchange, previous_key, Role::Responder)?,
                    }
                    .encode(),
                ),
                Role::Initiator => None,
            };
            let key = this.strategy.session_key(exchange, Some(previous_key))?;
            let mut out = this.finish(key)?;
            out.next_message = reply;
            Ok(out)
        })
    }

    fn finish(&mut self, key: Key) -> Result<HandshakeMessage> {
        self.transition(HandshakeState::Finished)?;
        // Secrets are no longer needed once the key exists.
        self.exchange = None;
        self.ephemeral = None;
        tracing::info!(
            role = ?self.role,
            suite = ?key.suite(),
            fingerprint = %key.short_fingerprint(),
            "handshake finished"
        );
        let mut out = HandshakeMessage::new(self.state);
        out.resulting_key = Some(key);
        Ok(out)
    }

    fn expect_reconnection_ready(&mut self) -> Result<()> {
        if self.strategy.mode() != HandshakeMode::Reconnection || self.exchange.is_none() {
            return self.misuse("reconnection authentication before a completed reconnection exchange");
        }
        Ok(())
    }

    fn expect_role(&mut self, role: Role, op: &str) -> Result<()> {
        if self.role != role {
            return self.misuse(&format!("{op} called on the {:?}", self.role));
        }
        Ok(())
    }

    /// Check `self.state` is one of `allowed`; otherwise report the
    /// attempted move to `target` as an illegal transition.
    fn expect_state(&mut self, allowed: &[HandshakeState], target: HandshakeState) -> Result<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        let from = self.state;
        self.invalidate();
        tracing::warn!(%from, to = %target, "illegal handshake transition");
        Err(TetherTrustError::InvalidStateTransition {
            from: from.to_string(),
            to: target.to_string(),
        })
    }

    fn transition(&mut self, next: HandshakeState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            let from = self.state;
            self.invalidate();
            return Err(TetherTrustError::InvalidStateTransition {
                from: from.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    fn misuse<T>(&mut self, what: &str) -> Result<T> {
        let from = self.state;
        self.invalidate();
        tracing::warn!(%from, what, "handshake misuse");
        Err(TetherTrustError::InvalidStateTransition {
            from: from.to_string(),
            to: format!("({what})"),
        })
    }

    fn poison_on_error<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = f(self);
        if let Err(e) = &result {
            if self.state != HandshakeState::Invalid {
                tracing::warn!(role = ?self.role, error = %e, "handshake failed");
            }
            self.invalidate();
        }
        result
    }

    fn invalidate(&mut self) {
        self.state = HandshakeState::Invalid;
        self.exchange = None;
        self.ephemeral = None;
    }
}

fn random32() -> [u8; 32] {
    let mut out = [0u8; 32];
    OsRng.fill_bytes(&mut out);
    out
}

fn missing(what: &'static str) -> impl FnOnce() -> TetherTrustError {
    move || TetherTrustError::Handshake(format!("internal state missing: {what}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::strategy::{Association, OobAssociation, Reconnection};
    use crate::storage::ChallengeSecret;

    fn pair(
        a: Box<dyn HandshakeStrategy>,
        b: Box<dyn HandshakeStrategy>,
    ) -> (HandshakeRunner, HandshakeRunner) {
        let suites = CipherSuite::ALL.to_vec();
        (
            HandshakeRunner::new(Role::Initiator, a, DeviceId([1; 16]), suites.clone()).unwrap(),
            HandshakeRunner::new(Role::Responder, b, DeviceId([2; 16]), suites).unwrap(),
        )
    }

    fn exchange(i: &mut HandshakeRunner, r: &mut HandshakeRunner) -> (HandshakeMessage, HandshakeMessage) {
        let m1 = i.init_handshake().unwrap();
        let m2 = r.respond_to_init(&m1.next_message.unwrap()).unwrap();
        let m3 = i.continue_handshake(&m2.next_message.unwrap()).unwrap();
        let finish = m3.next_message.clone().unwrap();
        let m4 = r.continue_handshake(&finish).unwrap();
        (m3, m4)
    }

    #[test]
    fn association_codes_match_and_keys_agree() {
        let (mut i, mut r) = pair(Box::new(Association::default()), Box::new(Association::default()));
        let (a, b) = exchange(&mut i, &mut r);
        assert_eq!(a.state, HandshakeState::VerificationNeeded);
        assert_eq!(b.state, HandshakeState::VerificationNeeded);
        assert_eq!(a.verification_code, b.verification_code);
        assert_eq!(i.peer_device_id(), Some(DeviceId([2; 16])));
        assert_eq!(r.peer_device_id(), Some(DeviceId([1; 16])));

        let ki = i.notify_pin_verified().unwrap().resulting_key.unwrap();
        let kr = r.notify_pin_verified().unwrap().resulting_key.unwrap();
        assert_eq!(ki.fingerprint(), kr.fingerprint());
        assert_eq!(ki.suite(), CipherSuite::ChaCha20Poly1305);
        assert_eq!(i.state(), HandshakeState::Finished);
    }

    #[test]
    fn oob_codes_are_full_auth_strings() {
        let (mut i, mut r) = pair(Box::new(OobAssociation), Box::new(OobAssociation));
        let (a, b) = exchange(&mut i, &mut r);
        assert_eq!(a.state, HandshakeState::OobVerificationNeeded);
        assert!(a.verification_code.is_none());
        assert_eq!(a.oob_verification_code.as_ref().map(Vec::len), Some(32));
        assert_eq!(a.oob_verification_code, b.oob_verification_code);
    }

    #[test]
    fn suite_follows_initiator_preference() {
        let (mut i, mut r) = pair(Box::new(Association::default()), Box::new(Association::default()));
        r.cipher_suites = vec![CipherSuite::Aes256Gcm];
        exchange(&mut i, &mut r);
        assert_eq!(i.cipher_suite(), Some(CipherSuite::Aes256Gcm));
        assert_eq!(r.cipher_suite(), Some(CipherSuite::Aes256Gcm));
    }

    #[test]
    fn suite_list_is_checked_at_construction() {
        let build = |suites: Vec<CipherSuite>| {
            HandshakeRunner::new(
                Role::Initiator,
                Box::new(Association::default()),
                DeviceId([1; 16]),
                suites,
            )
        };
        assert!(build(Vec::new()).is_err());
        assert!(build(vec![CipherSuite::Aes256Gcm; 2]).is_err());
        assert!(build([CipherSuite::ALL; 5].concat()).is_err());
        assert!(build(CipherSuite::ALL.to_vec()).is_ok());
    }

    #[test]
    fn pin_verified_before_code_is_misuse() {
        let (mut i, _) = pair(Box::new(Association::default()), Box::new(Association::default()));
        i.init_handshake().unwrap();
        assert!(matches!(
            i.notify_pin_verified(),
            Err(TetherTrustError::InvalidStateTransition { .. })
        ));
        assert_eq!(i.state(), HandshakeState::Invalid);
    }

    #[test]
    fn init_twice_is_misuse() {
        let (mut i, _) = pair(Box::new(Association::default()), Box::new(Association::default()));
        i.init_handshake().unwrap();
        assert!(i.init_handshake().is_err());
        assert_eq!(i.state(), HandshakeState::Invalid);
    }

    #[test]
    fn wrong_role_is_misuse() {
        let (mut i, mut r) = pair(Box::new(Association::default()), Box::new(Association::default()));
        assert!(r.init_handshake().is_err());
        assert_eq!(r.state(), HandshakeState::Invalid);
        assert!(i.respond_to_init(b"TTHS").is_err());
        assert_eq!(i.state(), HandshakeState::Invalid);
    }

    #[test]
    fn malformed_init_invalidates_responder() {
        let (_, mut r) = pair(Box::new(Association::default()), Box::new(Association::default()));
        assert!(matches!(
            r.respond_to_init(b"garbage"),
            Err(TetherTrustError::Handshake(_))
        ));
        assert_eq!(r.state(), HandshakeState::Invalid);
    }

    #[test]
    fn mode_mismatch_rejected() {
        let secret = ChallengeSecret::random();
        let (mut i, mut r) = pair(Box::new(Reconnection::new(secret)), Box::new(Association::default()));
        let m1 = i.init_handshake().unwrap();
        assert!(r.respond_to_init(&m1.next_message.unwrap()).is_err());
    }

    #[test]
    fn broken_commitment_rejected() {
        let (mut i, mut r) = pair(Box::new(Association::default()), Box::new(Association::default()));
        let m1 = i.init_handshake().unwrap();
        let m2 = r.respond_to_init(&m1.next_message.unwrap()).unwrap();
        i.continue_handshake(&m2.next_message.unwrap()).unwrap();
        let forged = HandshakeFinish {
            ephemeral_pub: X25519KeyPair::generate().public_key_bytes(),
        }
        .encode();
        assert!(r.continue_handshake(&forged).is_err());
        assert_eq!(r.state(), HandshakeState::Invalid);
    }

    #[test]
    fn not_validated_is_terminal() {
        let (mut i, mut r) = pair(Box::new(Association::default()), Box::new(Association::default()));
        exchange(&mut i, &mut r);
        assert_eq!(i.notify_pin_not_validated().state, HandshakeState::Invalid);
        assert!(i.notify_pin_verified().is_err());
        assert_eq!(i.state(), HandshakeState::Invalid);
    }

    #[test]
    fn reconnection_round_trip() {
        let secret = ChallengeSecret::random();
        let previous = || Key::new(CipherSuite::Aes256Gcm, [6; 32]);
        let (mut i, mut r) = pair(
            Box::new(Reconnection::new(secret.clone())),
            Box::new(Reconnection::new(secret)),
        );
        let (a, b) = exchange(&mut i, &mut r);
        assert_eq!(a.state, HandshakeState::InProgress);
        assert_eq!(b.state, HandshakeState::InProgress);
        assert!(a.verification_code.is_none() && b.verification_code.is_none());

        let proof = i.init_reconnect_authentication(&previous()).unwrap();
        assert_eq!(proof.state, HandshakeState::ResumingSession);
        let answer = r
            .authenticate_reconnection(&proof.next_message.unwrap(), &previous())
            .unwrap();
        assert_eq!(answer.state, HandshakeState::Finished);
        let done = i
            .authenticate_reconnection(&answer.next_message.unwrap(), &previous())
            .unwrap();
        assert_eq!(
            done.resulting_key.unwrap().fingerprint(),
            answer.resulting_key.unwrap().fingerprint()
        );
    }

    #[test]
    fn reconnection_with_wrong_key_fails() {
        let secret = ChallengeSecret::random();
        let (mut i, mut r) = pair(
            Box::new(Reconnection::new(secret.clone())),
            Box::new(Reconnection::new(secret)),
        );
        exchange(&mut i, &mut r);
        let proof = i
            .init_reconnect_authentication(&Key::new(CipherSuite::Aes256Gcm, [1; 32]))
            .unwrap();
        let result = r.authenticate_reconnection(
            &proof.next_message.unwrap(),
            &Key::new(CipherSuite::Aes256Gcm, [2; 32]),
        );
        assert!(matches!(result, Err(TetherTrustError::ReconnectionRejected)));
        assert_eq!(r.state(), HandshakeState::Invalid);
    }

    #[test]
    fn reconnection_calls_on_association_are_misuse() {
        let (mut i, mut r) = pair(Box::new(Association::default()), Box::new(Association::default()));
        let m1 = i.init_handshake().unwrap();
        r.respond_to_init(&m1.next_message.unwrap()).unwrap();
        let key = Key::new(CipherSuite::Aes256Gcm, [1; 32]);
        assert!(i.init_reconnect_authentication(&key).is_err());
        assert_eq!(i.state(), HandshakeState::Invalid);
    }
}
