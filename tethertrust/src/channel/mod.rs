//! Secure channel: a handshake runner over a message stream, then AEAD for
//! every application message.
//!
//! ```text
//!  transport bytes -> MessageStream -> route by kind
//!                                        VersionExchange -> negotiate
//!                                        Handshake       -> HandshakeRunner
//!                                        Confirm / OOB   -> verification gate
//!                                        Client          -> Key::open -> app
//! ```
//!
//! All state sits behind one mutex, so the transport callback and the
//! application's calls serialize. Events go out on an unbounded channel and
//! stop for good once [`SecureChannel::close`] is called.
//!
//! Verification is an explicit gate. A visual code waits for
//! [`SecureChannel::accept_verification`]; an out-of-band code is compared by
//! the channel. After local acceptance each side sends an encrypted confirm,
//! and the channel is secured only when the peer's confirm has arrived too.
//! Reconnection skips the gate: both sides prove they hold the stored key.

pub mod config;
pub mod event;
pub mod state;

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use zeroize::Zeroizing;

use tetherstream::{
    MessageKind, MessageStream, NegotiatedVersion, StreamMessage, Transport, VersionExchange,
};

use crate::crypto::hash::ct_eq;
use crate::device::DeviceId;
use crate::error::{Result, TetherTrustError};
use crate::handshake::messages::HandshakeInit;
use crate::handshake::{
    Association, HandshakeMessage, HandshakeMode, HandshakeRunner, HandshakeState,
    HandshakeStrategy, OobAssociation, Reconnection, Role,
};
use crate::key::Key;
use crate::oob::OobVerifier;
use crate::storage::{ChallengeSecret, KeyStorage};

pub use config::{ChannelConfig, ChannelSetup, VerificationMethod};
pub use event::{ChannelEvent, FailureReason, VerificationCode};
pub use state::ChannelState;

const CONFIRM_LABEL: &[u8] = b"tether confirm";
const APP_LABEL: &[u8] = b"tether app";

/// Handle to one secure channel. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct SecureChannel {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    role: Role,
    mode: HandshakeMode,
    local_device_id: DeviceId,
    expected_peer: Option<DeviceId>,
    config: ChannelConfig,
    stream: MessageStream,
    storage: Arc<dyn KeyStorage>,
    state: ChannelState,
    started: bool,
    /// Peer versions that arrived before `start`.
    peer_versions: Option<VersionExchange>,
    negotiated: Option<NegotiatedVersion>,
    runner: Option<HandshakeRunner>,
    peer: Option<DeviceId>,
    previous_key: Option<Key>,
    challenge_secret: Option<ChallengeSecret>,
    oob: Option<OobVerifier>,
    /// Our OOB code, once issued.
    oob_code: Option<Zeroizing<Vec<u8>>>,
    local_accepted: bool,
    peer_confirmed: bool,
    /// Peer confirm received before local acceptance.
    pending_confirm: Option<Bytes>,
    key: Option<Key>,
    send_seq: u64,
    recv_seq: u64,
    events: Option<UnboundedSender<ChannelEvent>>,
}

impl SecureChannel {
    /// Build a channel over `transport`. Nothing is sent until
    /// [`start`](Self::start).
    pub fn new(
        config: ChannelConfig,
        setup: ChannelSetup,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn KeyStorage>,
    ) -> Result<(Self, UnboundedReceiver<ChannelEvent>)> {
        config.validate()?;
        let oob_needed = setup.mode == HandshakeMode::Association
            && config.verification == VerificationMethod::OutOfBand;
        if oob_needed && !setup.oob_verifier.as_ref().is_some_and(OobVerifier::is_ready) {
            return Err(TetherTrustError::OobChannel(
                "out-of-band verification needs a keyed verifier".into(),
            ));
        }
        if setup.mode == HandshakeMode::Reconnection
            && setup.role == Role::Initiator
            && setup.peer_device_id.is_none()
        {
            return Err(TetherTrustError::Handshake(
                "reconnecting initiator must name its peer".into(),
            ));
        }

        let stream = MessageStream::new(transport, config.stream.clone())?;
        let (tx, rx) = unbounded_channel();
        let inner = Inner {
            role: setup.role,
            mode: setup.mode,
            local_device_id: setup.local_device_id,
            expected_peer: setup.peer_device_id,
            config,
            stream,
            storage,
            state: ChannelState::Connecting,
            started: false,
            peer_versions: None,
            negotiated: None,
            runner: None,
            peer: None,
            previous_key: None,
            challenge_secret: None,
            oob: if oob_needed { setup.oob_verifier } else { None },
            oob_code: None,
            local_accepted: false,
            peer_confirmed: false,
            pending_confirm: None,
            key: None,
            send_seq: 0,
            recv_seq: 0,
            events: Some(tx),
        };
        Ok((
            Self {
                inner: Arc::new(Mutex::new(inner)),
            },
            rx,
        ))
    }

    /// Announce versions and, as initiator, begin the handshake once the
    /// peer's versions are known.
    pub fn start(&self) -> Result<()> {
        self.inner.lock().start()
    }

    /// Feed bytes read from the transport. Errors end the channel and are
    /// reported as events.
    pub fn on_bytes_received(&self, data: &[u8]) {
        self.inner.lock().on_bytes_received(data);
    }

    /// The transport closed.
    pub fn on_transport_closed(&self) {
        self.inner.lock().on_transport_closed();
    }

    /// Apply a renegotiated packet size (e.g. a BLE MTU change).
    pub fn set_max_packet_size(&self, size: usize) -> Result<()> {
        Ok(self.inner.lock().stream.set_max_packet_size(size)?)
    }

    /// The user confirmed the visual code matches.
    pub fn accept_verification(&self) -> Result<()> {
        self.inner.lock().accept_verification()
    }

    /// The user says the codes differ.
    pub fn reject_verification(&self) -> Result<()> {
        self.inner.lock().reject_verification()
    }

    /// Encrypt and send an application payload.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        self.inner.lock().send(payload)
    }

    /// Tear down without further events.
    pub fn close(&self) {
        self.inner.lock().close();
    }

    pub fn state(&self) -> ChannelState {
        self.inner.lock().state
    }

    pub fn role(&self) -> Role {
        self.inner.lock().role
    }

    pub fn peer_device_id(&self) -> Option<DeviceId> {
        self.inner.lock().peer
    }

    pub fn negotiated_version(&self) -> Option<NegotiatedVersion> {
        self.inner.lock().negotiated
    }

    /// Fingerprint of the session key once secured.
    pub fn key_fingerprint(&self) -> Option<[u8; 32]> {
        let inner = self.inner.lock();
        match inner.state {
            ChannelState::Secured => inner.key.as_ref().map(|k| *k.fingerprint()),
            _ => None,
        }
    }
}

impl Inner {
    fn start(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(TetherTrustError::ChannelClosed);
        }
        if self.started {
            return Err(TetherTrustError::InvalidStateTransition {
                from: self.state.to_string(),
                to: "started twice".into(),
            });
        }
        self.started = true;
        tracing::debug!(role = %self.role, mode = ?self.mode, local = %self.local_device_id, "channel starting");
        let result = self.start_inner();
        self.fail_on_error(result)
    }

    fn start_inner(&mut self) -> Result<()> {
        if self.role == Role::Initiator && self.mode == HandshakeMode::Reconnection {
            let peer = self.expected_peer.ok_or_else(|| {
                TetherTrustError::Handshake("reconnecting initiator must name its peer".into())
            })?;
            self.load_previous(peer)?;
        }
        let ours = self.local_versions();
        self.send_message(MessageKind::VersionExchange, ours.encode())?;
        match self.peer_versions.take() {
            Some(peer) => self.on_peer_versions(peer),
            None => Ok(()),
        }
    }

    fn on_bytes_received(&mut self, data: &[u8]) {
        if self.state.is_terminal() {
            return;
        }
        let messages = match self.stream.on_data_received(data) {
            Ok(messages) => messages,
            Err(e) => {
                self.fail(FailureReason::from_error(&TetherTrustError::from(e)));
                return;
            }
        };
        for message in messages {
            if self.state.is_terminal() {
                break;
            }
            let result = self.handle_message(message);
            if self.fail_on_error(result).is_err() {
                break;
            }
        }
    }

    fn handle_message(&mut self, message: StreamMessage) -> Result<()> {
        tracing::debug!(kind = %message.kind, len = message.body.len(), state = %self.state, "message received");
        match message.kind {
            MessageKind::VersionExchange => self.on_version_exchange(&message.body),
            MessageKind::Handshake => self.on_handshake(&message.body),
            MessageKind::VerificationConfirm => self.on_peer_confirm(message.body),
            MessageKind::OobVerification => self.on_oob_payload(&message.body),
            MessageKind::VerificationRejected => self.on_peer_rejected(),
            MessageKind::Client => self.on_client(&message.body),
        }
    }

    // ── Version exchange ────────────────────────────────────────────────

    fn local_versions(&self) -> VersionExchange {
        VersionExchange {
            messaging: self.config.messaging_versions,
            security: self.config.security_versions,
        }
    }

    fn on_version_exchange(&mut self, body: &[u8]) -> Result<()> {
        if self.negotiated.is_some() || self.peer_versions.is_some() {
            return Err(TetherTrustError::Handshake("duplicate version exchange".into()));
        }
        let peer = VersionExchange::decode(body)?;
        if !self.started {
            self.peer_versions = Some(peer);
            return Ok(());
        }
        self.on_peer_versions(peer)
    }

    fn on_peer_versions(&mut self, peer: VersionExchange) -> Result<()> {
        let Some(negotiated) = self.local_versions().negotiate(&peer) else {
            tracing::warn!(?peer, "no common protocol version");
            self.fail(FailureReason::VersionMismatch);
            return Ok(());
        };
        self.negotiated = Some(negotiated);
        self.transition(ChannelState::Handshaking)?;
        tracing::debug!(
            messaging = negotiated.messaging,
            security = negotiated.security,
            "versions negotiated"
        );
        if self.role == Role::Initiator {
            let mut runner = self.build_runner()?;
            let out = runner.init_handshake()?;
            self.runner = Some(runner);
            self.send_handshake(&out)?;
        }
        Ok(())
    }

    // ── Handshake ───────────────────────────────────────────────────────

    fn build_runner(&self) -> Result<HandshakeRunner> {
        let strategy: Box<dyn HandshakeStrategy> = match self.mode {
            HandshakeMode::Association => match self.config.verification {
                VerificationMethod::Visual => {
                    Box::new(Association::new(self.config.verification_code_digits)?)
                }
                VerificationMethod::OutOfBand => Box::new(OobAssociation),
            },
            HandshakeMode::Reconnection => {
                let secret = self.challenge_secret.clone().ok_or_else(|| {
                    TetherTrustError::Storage("no challenge secret loaded".into())
                })?;
                Box::new(Reconnection::new(secret))
            }
        };
        HandshakeRunner::new(
            self.role,
            strategy,
            self.local_device_id,
            self.config.cipher_suites.clone(),
        )
    }

    fn on_handshake(&mut self, body: &[u8]) -> Result<()> {
        match self.state {
            ChannelState::Handshaking => {}
            ChannelState::Connecting => {
                return Err(TetherTrustError::Handshake(
                    "handshake message before version exchange".into(),
                ))
            }
            _ => {
                return Err(TetherTrustError::Handshake(format!(
                    "handshake message while {}; identity is already bound",
                    self.state
                )))
            }
        }

        if self.runner.is_none() {
            return match self.role {
                Role::Responder => self.on_init(body),
                Role::Initiator => Err(TetherTrustError::Handshake("no handshake running".into())),
            };
        }
        let Some(runner) = self.runner.as_mut() else {
            return Err(TetherTrustError::Handshake("no handshake running".into()));
        };

        match (self.role, runner.state(), runner.is_exchange_complete()) {
            (_, HandshakeState::InProgress, false) => {
                let out = runner.continue_handshake(body)?;
                self.bind_runner_peer()?;
                self.send_handshake(&out)?;
                match self.mode {
                    HandshakeMode::Association => self.enter_verification(out),
                    HandshakeMode::Reconnection if self.role == Role::Initiator => {
                        let (Some(runner), Some(previous)) =
                            (self.runner.as_mut(), self.previous_key.as_ref())
                        else {
                            return Err(TetherTrustError::Storage("no previous key loaded".into()));
                        };
                        let proof = runner.init_reconnect_authentication(previous)?;
                        self.send_handshake(&proof)
                    }
                    // Responder waits for the initiator's proof.
                    HandshakeMode::Reconnection => Ok(()),
                }
            }
            (Role::Responder, HandshakeState::InProgress, true)
            | (Role::Initiator, HandshakeState::ResumingSession, _) => {
                let Some(previous) = self.previous_key.as_ref() else {
                    return Err(TetherTrustError::Storage("no previous key loaded".into()));
                };
                let out = runner.authenticate_reconnection(body, previous)?;
                self.send_handshake(&out)?;
                let key = out.resulting_key.ok_or_else(|| {
                    TetherTrustError::Handshake("reconnection finished without a key".into())
                })?;
                self.key = Some(key);
                self.secure()
            }
            (role, state, _) => Err(TetherTrustError::Handshake(format!(
                "unexpected handshake message for {role} in {state}"
            ))),
        }
    }

    /// Responder: first message of the attempt.
    fn on_init(&mut self, body: &[u8]) -> Result<()> {
        let init = HandshakeInit::decode(body)?;
        if init.mode != self.mode {
            return Err(TetherTrustError::Handshake(format!(
                "peer requested {:?}, this channel expects {:?}",
                init.mode, self.mode
            )));
        }
        self.bind_peer(init.device_id)?;
        if self.mode == HandshakeMode::Reconnection {
            self.load_previous(init.device_id)?;
        }
        let mut runner = self.build_runner()?;
        let out = runner.respond_to_init(body)?;
        self.runner = Some(runner);
        self.send_handshake(&out)
    }

    fn bind_runner_peer(&mut self) -> Result<()> {
        match self.runner.as_ref().and_then(HandshakeRunner::peer_device_id) {
            Some(peer) => self.bind_peer(peer),
            None => Err(TetherTrustError::Handshake("peer identity unknown".into())),
        }
    }

    /// Fix the peer identity. A second, different claim is an error.
    fn bind_peer(&mut self, claimed: DeviceId) -> Result<()> {
        if let Some(expected) = self.expected_peer {
            if expected != claimed {
                return Err(TetherTrustError::Handshake(format!(
                    "peer claimed {claimed}, expected {expected}"
                )));
            }
        }
        match self.peer {
            Some(bound) if bound != claimed => Err(TetherTrustError::Handshake(format!(
                "second identity claim {claimed} after {bound}"
            ))),
            _ => {
                self.peer = Some(claimed);
                Ok(())
            }
        }
    }

    fn load_previous(&mut self, peer: DeviceId) -> Result<()> {
        let key = self
            .storage
            .load_key(&peer)
            .map_err(storage_error)?
            .ok_or_else(|| TetherTrustError::Storage(format!("no stored key for {peer}")))?;
        let secret = self
            .storage
            .load_challenge_secret(&peer)
            .map_err(storage_error)?
            .ok_or_else(|| TetherTrustError::Storage(format!("no challenge secret for {peer}")))?;
        tracing::debug!(%peer, fingerprint = %key.short_fingerprint(), "previous key loaded");
        self.previous_key = Some(key);
        self.challenge_secret = Some(secret);
        Ok(())
    }

    fn send_handshake(&mut self, out: &HandshakeMessage) -> Result<()> {
        match &out.next_message {
            Some(bytes) => self.send_message(MessageKind::Handshake, bytes.clone()),
            None => Ok(()),
        }
    }

    // ── Verification gate ───────────────────────────────────────────────

    fn enter_verification(&mut self, out: HandshakeMessage) -> Result<()> {
        self.transition(ChannelState::Verifying)?;
        if let Some(code) = out.verification_code {
            tracing::info!(role = %self.role, "verification code issued");
            self.emit(ChannelEvent::VerificationCodeAvailable(VerificationCode::Visual(code)));
            return Ok(());
        }
        let code = out
            .oob_verification_code
            .ok_or_else(|| TetherTrustError::Handshake("no verification code issued".into()))?;
        let oob = self.oob.as_mut().ok_or_else(|| {
            TetherTrustError::InvalidKey("no out-of-band verifier installed".into())
        })?;
        let sealed = oob.encrypt(&code)?;
        self.emit(ChannelEvent::VerificationCodeAvailable(VerificationCode::OutOfBand(
            code.clone(),
        )));
        self.oob_code = Some(Zeroizing::new(code));
        tracing::info!(role = %self.role, "out-of-band code issued");
        self.send_message(MessageKind::OobVerification, sealed)
    }

    fn on_oob_payload(&mut self, body: &[u8]) -> Result<()> {
        if self.state != ChannelState::Verifying || self.local_accepted {
            return Err(TetherTrustError::Handshake(format!(
                "unexpected out-of-band code while {}",
                self.state
            )));
        }
        let (Some(oob), Some(own)) = (self.oob.as_ref(), self.oob_code.as_ref()) else {
            return Err(TetherTrustError::Handshake(
                "out-of-band code on a visual channel".into(),
            ));
        };
        let matches = match oob.decrypt(body) {
            Ok(theirs) => codes_match(own, &theirs),
            Err(e) => {
                tracing::warn!(error = %e, "out-of-band code failed authentication");
                false
            }
        };
        if matches {
            tracing::info!(role = %self.role, "out-of-band code matched");
            self.accept()
        } else {
            tracing::warn!(role = %self.role, "out-of-band code mismatch");
            self.reject_local();
            Ok(())
        }
    }

    fn accept_verification(&mut self) -> Result<()> {
        if self.state != ChannelState::Verifying || self.local_accepted || self.oob_code.is_some() {
            return Err(TetherTrustError::NotAwaitingVerification(self.state.to_string()));
        }
        let result = self.accept();
        self.fail_on_error(result)
    }

    fn accept(&mut self) -> Result<()> {
        let runner = self
            .runner
            .as_mut()
            .ok_or_else(|| TetherTrustError::Handshake("no handshake running".into()))?;
        let out = runner.notify_pin_verified()?;
        let key = out
            .resulting_key
            .ok_or_else(|| TetherTrustError::Handshake("verification produced no key".into()))?;

        let body: Zeroizing<Vec<u8>> = match self.role {
            Role::Responder => {
                let secret = ChallengeSecret::random();
                let body = Zeroizing::new(secret.as_bytes().to_vec());
                self.challenge_secret = Some(secret);
                body
            }
            Role::Initiator => Zeroizing::new(Vec::new()),
        };
        let sealed = key.seal(&body, &confirm_aad(self.role))?;
        self.key = Some(key);
        self.local_accepted = true;
        self.send_message(MessageKind::VerificationConfirm, sealed)?;
        tracing::debug!(role = %self.role, "verification accepted locally");

        if let Some(pending) = self.pending_confirm.take() {
            self.verify_peer_confirm(&pending)?;
        }
        self.try_secure()
    }

    fn on_peer_confirm(&mut self, body: Bytes) -> Result<()> {
        if self.state != ChannelState::Verifying
            || self.peer_confirmed
            || self.pending_confirm.is_some()
        {
            return Err(TetherTrustError::Handshake(format!(
                "unexpected verification confirm while {}",
                self.state
            )));
        }
        if !self.local_accepted {
            self.pending_confirm = Some(body);
            return Ok(());
        }
        self.verify_peer_confirm(&body)?;
        self.try_secure()
    }

    fn verify_peer_confirm(&mut self, body: &[u8]) -> Result<()> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| TetherTrustError::Handshake("confirm before key".into()))?;
        let plain = Zeroizing::new(key.open(body, &confirm_aad(self.role.peer()))?);
        match self.role {
            Role::Initiator => {
                let secret = ChallengeSecret::from_bytes(&plain).map_err(|_| {
                    TetherTrustError::Handshake("confirm carries no challenge secret".into())
                })?;
                self.challenge_secret = Some(secret);
            }
            Role::Responder if !plain.is_empty() => {
                return Err(TetherTrustError::Handshake("unexpected confirm payload".into()));
            }
            Role::Responder => {}
        }
        self.peer_confirmed = true;
        tracing::debug!(role = %self.role, "peer confirmed verification");
        Ok(())
    }

    fn try_secure(&mut self) -> Result<()> {
        if self.local_accepted && self.peer_confirmed {
            self.secure()
        } else {
            Ok(())
        }
    }

    fn reject_verification(&mut self) -> Result<()> {
        if self.state != ChannelState::Verifying {
            return Err(TetherTrustError::NotAwaitingVerification(self.state.to_string()));
        }
        self.reject_local();
        Ok(())
    }

    fn reject_local(&mut self) {
        if let Some(runner) = self.runner.as_mut() {
            runner.notify_pin_not_validated();
        }
        if let Err(e) = self.send_message(MessageKind::VerificationRejected, Bytes::new()) {
            tracing::debug!(error = %e, "could not deliver rejection notice");
        }
        self.fail(FailureReason::VerificationRejected { by_peer: false });
    }

    fn on_peer_rejected(&mut self) -> Result<()> {
        if self.state == ChannelState::Secured {
            return Err(TetherTrustError::Handshake("rejection after channel secured".into()));
        }
        if let Some(runner) = self.runner.as_mut() {
            runner.notify_pin_not_validated();
        }
        self.fail(FailureReason::VerificationRejected { by_peer: true });
        Ok(())
    }

    // ── Secured ─────────────────────────────────────────────────────────

    fn secure(&mut self) -> Result<()> {
        let peer = self
            .peer
            .ok_or_else(|| TetherTrustError::Handshake("peer identity unknown".into()))?;
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| TetherTrustError::Handshake("no session key".into()))?;
        // Only the association key is stored. A resumed key lives for this
        // session alone.
        if self.mode == HandshakeMode::Association {
            self.storage.save_key(&peer, key).map_err(storage_error)?;
            if let Some(secret) = &self.challenge_secret {
                self.storage
                    .save_challenge_secret(&peer, secret)
                    .map_err(storage_error)?;
            }
        }
        let fingerprint = key.short_fingerprint();
        self.transition(ChannelState::Secured)?;
        tracing::info!(
            role = %self.role,
            %peer,
            %fingerprint,
            "secure channel established"
        );
        self.runner = None;
        self.previous_key = None;
        self.oob = None;
        self.oob_code = None;
        self.emit(ChannelEvent::SecureChannelEstablished { peer });
        Ok(())
    }

    fn send(&mut self, payload: &[u8]) -> Result<()> {
        if self.state != ChannelState::Secured {
            return Err(TetherTrustError::ChannelNotSecured(self.state.to_string()));
        }
        let result = self.send_secured(payload);
        self.fail_on_error(result)
    }

    fn send_secured(&mut self, payload: &[u8]) -> Result<()> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| TetherTrustError::ChannelNotSecured(self.state.to_string()))?;
        let sealed = key.seal(payload, &app_aad(self.role, self.send_seq))?;
        self.send_seq += 1;
        self.send_message(MessageKind::Client, sealed)
    }

    fn on_client(&mut self, body: &[u8]) -> Result<()> {
        if self.state != ChannelState::Secured {
            return Err(TetherTrustError::Handshake(format!(
                "application data while {}",
                self.state
            )));
        }
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| TetherTrustError::ChannelNotSecured(self.state.to_string()))?;
        let plain = key.open(body, &app_aad(self.role.peer(), self.recv_seq))?;
        self.recv_seq += 1;
        self.emit(ChannelEvent::MessageReceived(Bytes::from(plain)));
        Ok(())
    }

    // ── Teardown ────────────────────────────────────────────────────────

    fn on_transport_closed(&mut self) {
        match self.state {
            ChannelState::Secured => {
                tracing::info!(role = %self.role, "transport closed");
                self.state = ChannelState::Disconnected;
                self.teardown();
                self.emit(ChannelEvent::Disconnected);
            }
            state if state.is_terminal() => {}
            _ => self.fail(FailureReason::Transport),
        }
    }

    fn close(&mut self) {
        self.events = None;
        if !self.state.is_terminal() {
            tracing::debug!(role = %self.role, state = %self.state, "channel closed by owner");
            self.state = ChannelState::Disconnected;
        }
        self.teardown();
    }

    /// Enter `Failed` and report it once.
    fn fail(&mut self, reason: FailureReason) {
        if self.state.is_terminal() {
            return;
        }
        let secured = self.state == ChannelState::Secured;
        tracing::warn!(role = %self.role, from = %self.state, %reason, code = reason.code(), "channel failed");
        self.state = ChannelState::Failed(reason);
        self.teardown();
        self.emit(if secured {
            ChannelEvent::ChannelError(reason)
        } else {
            ChannelEvent::EstablishFailed(reason)
        });
    }

    fn fail_on_error(&mut self, result: Result<()>) -> Result<()> {
        if let Err(e) = &result {
            tracing::debug!(error = %e, "channel operation failed");
            self.fail(FailureReason::from_error(e));
        }
        result
    }

    fn teardown(&mut self) {
        self.stream.close();
        self.runner = None;
        self.key = None;
        self.previous_key = None;
        self.oob = None;
        self.oob_code = None;
        self.pending_confirm = None;
    }

    fn transition(&mut self, next: ChannelState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(TetherTrustError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        tracing::debug!(role = %self.role, from = %self.state, to = %next, "channel state");
        self.state = next;
        Ok(())
    }

    fn send_message(&mut self, kind: MessageKind, body: impl Into<Bytes>) -> Result<()> {
        Ok(self.stream.send(&StreamMessage::new(kind, body))?)
    }

    fn emit(&self, event: ChannelEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                tracing::debug!("event receiver dropped");
            }
        }
    }
}

fn confirm_aad(sender: Role) -> Vec<u8> {
    let mut aad = Vec::with_capacity(CONFIRM_LABEL.len() + 1);
    aad.extend_from_slice(CONFIRM_LABEL);
    aad.push(sender.label());
    aad
}

fn app_aad(sender: Role, seq: u64) -> Vec<u8> {
    let mut aad = Vec::with_capacity(APP_LABEL.len() + 9);
    aad.extend_from_slice(APP_LABEL);
    aad.push(sender.label());
    aad.extend_from_slice(&seq.to_be_bytes());
    aad
}

fn storage_error(e: TetherTrustError) -> TetherTrustError {
    match e {
        TetherTrustError::Storage(_) => e,
        other => TetherTrustError::Storage(other.to_string()),
    }
}

/// Constant-time comparison of two 32-byte codes.
fn codes_match(own: &[u8], theirs: &[u8]) -> bool {
    match (<&[u8; 32]>::try_from(own), <&[u8; 32]>::try_from(theirs)) {
        (Ok(a), Ok(b)) => ct_eq(a, b),
        _ => false,
    }
}
