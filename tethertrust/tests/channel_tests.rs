// End-to-end tests for SecureChannel over in-process queue transports.

use std::sync::Arc;

use bytes::Bytes;
use tetherstream::{QueueTransport, StreamConfig, VersionRange};
use tokio::sync::mpsc::UnboundedReceiver;

use tethertrust::{
    ChannelConfig, ChannelEvent, ChannelSetup, ChannelState, DeviceId, FailureReason,
    InMemoryStorage, KeyStorage, OobChannel, OobVerifier, Result, Role, SecureChannel,
    TetherTrustError, VerificationCode, VerificationMethod,
};

const PHONE: DeviceId = DeviceId([0x01; 16]);
const HOST: DeviceId = DeviceId([0x02; 16]);

struct Side {
    channel: SecureChannel,
    wire: QueueTransport,
    events: UnboundedReceiver<ChannelEvent>,
    storage: Arc<InMemoryStorage>,
}

impl Side {
    fn new(config: ChannelConfig, setup: ChannelSetup, storage: Arc<InMemoryStorage>) -> Self {
        let wire = QueueTransport::new();
        let (channel, events) = SecureChannel::new(
            config,
            setup,
            Arc::new(wire.clone()),
            Arc::clone(&storage) as Arc<dyn KeyStorage>,
        )
        .unwrap();
        Self {
            channel,
            wire,
            events,
            storage,
        }
    }

    fn events(&mut self) -> Vec<ChannelEvent> {
        std::iter::from_fn(|| self.events.try_recv().ok()).collect()
    }

    fn visual_code(&mut self) -> String {
        let codes: Vec<String> = self
            .events()
            .into_iter()
            .filter_map(|e| match e {
                ChannelEvent::VerificationCodeAvailable(VerificationCode::Visual(code)) => {
                    Some(code)
                }
                _ => None,
            })
            .collect();
        assert_eq!(codes.len(), 1, "exactly one visual code per attempt");
        codes.into_iter().next().unwrap()
    }
}

/// Deliver queued packets both ways until both queues stay empty.
fn pump(a: &Side, b: &Side) {
    loop {
        let mut moved = false;
        for packet in a.wire.drain() {
            b.channel.on_bytes_received(&packet);
            moved = true;
        }
        for packet in b.wire.drain() {
            a.channel.on_bytes_received(&packet);
            moved = true;
        }
        if !moved {
            break;
        }
    }
}

fn small_packets() -> ChannelConfig {
    ChannelConfig {
        stream: StreamConfig {
            max_packet_size: 20,
            ..StreamConfig::default()
        },
        ..ChannelConfig::default()
    }
}

fn associate(config: ChannelConfig) -> (Side, Side) {
    let mut phone = Side::new(
        config.clone(),
        ChannelSetup::association(Role::Initiator, PHONE),
        Arc::new(InMemoryStorage::new()),
    );
    let mut host = Side::new(
        config,
        ChannelSetup::association(Role::Responder, HOST),
        Arc::new(InMemoryStorage::new()),
    );
    phone.channel.start().unwrap();
    host.channel.start().unwrap();
    pump(&phone, &host);
    assert_eq!(phone.channel.state(), ChannelState::Verifying);
    assert_eq!(host.channel.state(), ChannelState::Verifying);
    assert_eq!(phone.visual_code(), host.visual_code());
    (phone, host)
}

fn secured_pair() -> (Side, Side) {
    let (mut phone, mut host) = associate(small_packets());
    phone.channel.accept_verification().unwrap();
    host.channel.accept_verification().unwrap();
    pump(&phone, &host);
    assert!(phone.events().contains(&ChannelEvent::SecureChannelEstablished { peer: HOST }));
    assert!(host.events().contains(&ChannelEvent::SecureChannelEstablished { peer: PHONE }));
    (phone, host)
}

// ── Association ─────────────────────────────────────────────────────────

#[test]
fn association_secures_after_both_accept() {
    let (phone, host) = secured_pair();
    assert_eq!(phone.channel.state(), ChannelState::Secured);
    assert_eq!(host.channel.state(), ChannelState::Secured);
    assert_eq!(phone.channel.peer_device_id(), Some(HOST));
    assert_eq!(host.channel.peer_device_id(), Some(PHONE));
    assert!(phone.channel.key_fingerprint().is_some());
    assert_eq!(phone.channel.key_fingerprint(), host.channel.key_fingerprint());
    assert!(phone.channel.negotiated_version().is_some());
}

#[test]
fn one_sided_acceptance_never_secures() {
    let (mut phone, mut host) = associate(ChannelConfig::default());
    phone.channel.accept_verification().unwrap();
    pump(&phone, &host);
    assert_eq!(phone.channel.state(), ChannelState::Verifying);
    assert_eq!(host.channel.state(), ChannelState::Verifying);
    assert!(phone.events().is_empty());
    assert!(host.events().is_empty());

    // The early confirm is held until the host accepts.
    host.channel.accept_verification().unwrap();
    pump(&phone, &host);
    assert_eq!(phone.channel.state(), ChannelState::Secured);
    assert_eq!(host.channel.state(), ChannelState::Secured);
}

#[test]
fn without_verification_nothing_is_secured() {
    let (phone, host) = associate(ChannelConfig::default());
    assert!(matches!(
        phone.channel.send(b"too early"),
        Err(TetherTrustError::ChannelNotSecured(_))
    ));
    pump(&phone, &host);
    assert_eq!(phone.channel.state(), ChannelState::Verifying);
    assert!(phone.storage.load_key(&HOST).unwrap().is_none());
}

#[test]
fn accept_outside_verification_is_refused() {
    let phone = Side::new(
        ChannelConfig::default(),
        ChannelSetup::association(Role::Initiator, PHONE),
        Arc::new(InMemoryStorage::new()),
    );
    assert!(matches!(
        phone.channel.accept_verification(),
        Err(TetherTrustError::NotAwaitingVerification(_))
    ));
    assert_eq!(phone.channel.state(), ChannelState::Connecting);
}

#[test]
fn messages_flow_both_ways_in_order() {
    let (mut phone, mut host) = secured_pair();
    let large = vec![0xC3; 5000];
    phone.channel.send(b"first").unwrap();
    phone.channel.send(&large).unwrap();
    host.channel.send(b"").unwrap();
    pump(&phone, &host);

    assert_eq!(
        host.events(),
        vec![
            ChannelEvent::MessageReceived(Bytes::from_static(b"first")),
            ChannelEvent::MessageReceived(Bytes::from(large)),
        ]
    );
    assert_eq!(phone.events(), vec![ChannelEvent::MessageReceived(Bytes::new())]);
}

#[test]
fn key_and_challenge_secret_are_stored_on_both_sides() {
    let (phone, host) = secured_pair();
    let phone_key = phone.storage.load_key(&HOST).unwrap().unwrap();
    let host_key = host.storage.load_key(&PHONE).unwrap().unwrap();
    assert_eq!(phone_key.fingerprint(), host_key.fingerprint());
    assert_eq!(
        phone.storage.load_challenge_secret(&HOST).unwrap(),
        host.storage.load_challenge_secret(&PHONE).unwrap()
    );
    assert!(phone.storage.load_challenge_secret(&HOST).unwrap().is_some());
}

// ── Rejection and failure ───────────────────────────────────────────────

#[test]
fn rejection_fails_both_sides() {
    let (mut phone, mut host) = associate(ChannelConfig::default());
    host.channel.reject_verification().unwrap();
    pump(&phone, &host);

    assert_eq!(
        host.channel.state(),
        ChannelState::Failed(FailureReason::VerificationRejected { by_peer: false })
    );
    assert_eq!(
        phone.channel.state(),
        ChannelState::Failed(FailureReason::VerificationRejected { by_peer: true })
    );
    assert_eq!(
        host.events(),
        vec![ChannelEvent::EstablishFailed(FailureReason::VerificationRejected {
            by_peer: false
        })]
    );
    assert_eq!(
        phone.events(),
        vec![ChannelEvent::EstablishFailed(FailureReason::VerificationRejected {
            by_peer: true
        })]
    );
    assert!(matches!(
        phone.channel.send(b"hello"),
        Err(TetherTrustError::ChannelNotSecured(_))
    ));
    assert!(phone.channel.accept_verification().is_err());
}

#[test]
fn failure_is_reported_once() {
    let (mut phone, host) = secured_pair();
    phone.channel.on_bytes_received(&[0xEE; 8]);
    assert_eq!(phone.channel.state(), ChannelState::Failed(FailureReason::Framing));

    // More garbage, sends and valid traffic change nothing.
    phone.channel.on_bytes_received(&[0xEE; 8]);
    assert!(phone.channel.send(b"x").is_err());
    host.channel.send(b"late").unwrap();
    pump(&phone, &host);
    phone.channel.on_transport_closed();

    assert_eq!(phone.events(), vec![ChannelEvent::ChannelError(FailureReason::Framing)]);
    assert_eq!(phone.channel.state(), ChannelState::Failed(FailureReason::Framing));
}

#[test]
fn corrupted_ciphertext_is_fatal() {
    let (mut phone, host) = secured_pair();
    host.channel.send(b"payload").unwrap();
    let mut packets: Vec<Vec<u8>> = host.wire.drain().into_iter().map(|p| p.to_vec()).collect();
    // Last byte of the last packet is part of the AEAD tag.
    let last = packets.last_mut().unwrap();
    let end = last.len() - 1;
    last[end] ^= 0x01;
    for packet in &packets {
        phone.channel.on_bytes_received(packet);
    }

    assert_eq!(phone.channel.state(), ChannelState::Failed(FailureReason::Decryption));
    assert_eq!(phone.events(), vec![ChannelEvent::ChannelError(FailureReason::Decryption)]);
}

#[test]
fn replayed_message_is_fatal() {
    let (mut phone, host) = secured_pair();
    host.channel.send(b"once").unwrap();
    let packets = host.wire.drain();
    for packet in &packets {
        phone.channel.on_bytes_received(packet);
    }
    for packet in &packets {
        phone.channel.on_bytes_received(packet);
    }
    assert_eq!(
        phone.events(),
        vec![
            ChannelEvent::MessageReceived(Bytes::from_static(b"once")),
            ChannelEvent::ChannelError(FailureReason::Decryption),
        ]
    );
}

#[test]
fn late_handshake_message_is_a_second_identity_claim() {
    let (phone, mut host) = associate(ChannelConfig::default());
    phone.channel.accept_verification().unwrap();
    host.channel.accept_verification().unwrap();
    pump(&phone, &host);
    host.events();

    // A fresh attempt from another device, replayed at the secured host.
    let intruder = Side::new(
        ChannelConfig::default(),
        ChannelSetup::association(Role::Initiator, DeviceId([0x66; 16])),
        Arc::new(InMemoryStorage::new()),
    );
    let decoy = Side::new(
        ChannelConfig::default(),
        ChannelSetup::association(Role::Responder, DeviceId([0x67; 16])),
        Arc::new(InMemoryStorage::new()),
    );
    intruder.channel.start().unwrap();
    decoy.channel.start().unwrap();
    for packet in decoy.wire.drain() {
        intruder.channel.on_bytes_received(&packet);
    }
    // Versions first, then the Init.
    for packet in intruder.wire.drain().into_iter().skip(1) {
        host.channel.on_bytes_received(&packet);
    }

    assert_eq!(host.channel.state(), ChannelState::Failed(FailureReason::Handshake));
    assert_eq!(host.events(), vec![ChannelEvent::ChannelError(FailureReason::Handshake)]);
}

#[test]
fn expected_peer_mismatch_fails() {
    let config = ChannelConfig::default();
    let mut phone = Side::new(
        config.clone(),
        ChannelSetup::association(Role::Initiator, PHONE).expect_peer(DeviceId([0x99; 16])),
        Arc::new(InMemoryStorage::new()),
    );
    let host = Side::new(
        config,
        ChannelSetup::association(Role::Responder, HOST),
        Arc::new(InMemoryStorage::new()),
    );
    phone.channel.start().unwrap();
    host.channel.start().unwrap();
    pump(&phone, &host);
    assert_eq!(phone.channel.state(), ChannelState::Failed(FailureReason::Handshake));
    assert_eq!(phone.events(), vec![ChannelEvent::EstablishFailed(FailureReason::Handshake)]);
}

#[test]
fn version_mismatch_fails_establishment() {
    let newer = ChannelConfig {
        messaging_versions: VersionRange::new(2, 3),
        ..ChannelConfig::default()
    };
    let mut phone = Side::new(
        newer,
        ChannelSetup::association(Role::Initiator, PHONE),
        Arc::new(InMemoryStorage::new()),
    );
    let mut host = Side::new(
        ChannelConfig::default(),
        ChannelSetup::association(Role::Responder, HOST),
        Arc::new(InMemoryStorage::new()),
    );
    phone.channel.start().unwrap();
    host.channel.start().unwrap();
    pump(&phone, &host);
    for side in [&mut phone, &mut host] {
        assert_eq!(side.channel.state(), ChannelState::Failed(FailureReason::VersionMismatch));
        assert_eq!(
            side.events(),
            vec![ChannelEvent::EstablishFailed(FailureReason::VersionMismatch)]
        );
    }
}

#[test]
fn transport_close_before_secured_is_a_transport_failure() {
    let (mut phone, _host) = associate(ChannelConfig::default());
    phone.channel.on_transport_closed();
    assert_eq!(phone.channel.state(), ChannelState::Failed(FailureReason::Transport));
    assert_eq!(phone.events(), vec![ChannelEvent::EstablishFailed(FailureReason::Transport)]);
}

#[test]
fn transport_close_after_secured_disconnects() {
    let (mut phone, _host) = secured_pair();
    phone.channel.on_transport_closed();
    assert_eq!(phone.channel.state(), ChannelState::Disconnected);
    assert_eq!(phone.events(), vec![ChannelEvent::Disconnected]);
}

#[test]
fn write_failure_is_a_transport_failure() {
    let (mut phone, _host) = secured_pair();
    phone.wire.close();
    assert!(phone.channel.send(b"x").is_err());
    assert_eq!(phone.channel.state(), ChannelState::Failed(FailureReason::Transport));
    assert_eq!(phone.events(), vec![ChannelEvent::ChannelError(FailureReason::Transport)]);
}

#[test]
fn close_silences_the_channel() {
    let (mut phone, host) = secured_pair();
    phone.channel.close();
    host.channel.send(b"after close").unwrap();
    pump(&phone, &host);
    phone.channel.on_transport_closed();
    assert_eq!(phone.channel.state(), ChannelState::Disconnected);
    assert!(phone.events().is_empty());
}

// ── Reconnection ────────────────────────────────────────────────────────

fn reconnect(phone_storage: Arc<InMemoryStorage>, host_storage: Arc<InMemoryStorage>) -> (Side, Side) {
    let phone = Side::new(
        small_packets(),
        ChannelSetup::reconnection(Role::Initiator, PHONE, Some(HOST)),
        phone_storage,
    );
    let host = Side::new(
        small_packets(),
        ChannelSetup::reconnection(Role::Responder, HOST, None),
        host_storage,
    );
    phone.channel.start().unwrap();
    host.channel.start().unwrap();
    pump(&phone, &host);
    (phone, host)
}

#[test]
fn reconnection_secures_without_a_verification_code() {
    let (phone, host) = secured_pair();
    let first = phone.channel.key_fingerprint();
    let (phone_storage, host_storage) = (Arc::clone(&phone.storage), Arc::clone(&host.storage));
    phone.channel.close();
    host.channel.close();

    let (mut phone, mut host) = reconnect(phone_storage, host_storage);
    assert_eq!(phone.channel.state(), ChannelState::Secured);
    assert_eq!(host.channel.state(), ChannelState::Secured);
    for side in [&mut phone, &mut host] {
        let events = side.events();
        assert!(!events
            .iter()
            .any(|e| matches!(e, ChannelEvent::VerificationCodeAvailable(_))));
        assert_eq!(events.len(), 1);
    }
    assert_eq!(host.channel.peer_device_id(), Some(PHONE));

    // Fresh session key; the stored key is still the paired one.
    assert_ne!(phone.channel.key_fingerprint(), first);
    assert_eq!(phone.channel.key_fingerprint(), host.channel.key_fingerprint());
    assert_eq!(Some(*phone.storage.load_key(&HOST).unwrap().unwrap().fingerprint()), first);
    assert_eq!(Some(*host.storage.load_key(&PHONE).unwrap().unwrap().fingerprint()), first);

    phone.channel.send(b"welcome back").unwrap();
    pump(&phone, &host);
    assert_eq!(
        host.events(),
        vec![ChannelEvent::MessageReceived(Bytes::from_static(b"welcome back"))]
    );
}

#[test]
fn reconnection_twice_in_a_row() {
    let (phone, host) = secured_pair();
    let (ps, hs) = (Arc::clone(&phone.storage), Arc::clone(&host.storage));
    let (phone, host) = reconnect(Arc::clone(&ps), Arc::clone(&hs));
    assert_eq!(phone.channel.state(), ChannelState::Secured);
    assert_eq!(host.channel.state(), ChannelState::Secured);
    let (phone, host) = reconnect(ps, hs);
    assert_eq!(phone.channel.state(), ChannelState::Secured);
    assert_eq!(host.channel.state(), ChannelState::Secured);
}

#[test]
fn lost_responder_proof_does_not_break_the_next_reconnection() {
    let (phone, host) = secured_pair();
    let (ps, hs) = (Arc::clone(&phone.storage), Arc::clone(&host.storage));
    phone.channel.close();
    host.channel.close();

    let phone = Side::new(
        small_packets(),
        ChannelSetup::reconnection(Role::Initiator, PHONE, Some(HOST)),
        Arc::clone(&ps),
    );
    let host = Side::new(
        small_packets(),
        ChannelSetup::reconnection(Role::Responder, HOST, None),
        Arc::clone(&hs),
    );
    phone.channel.start().unwrap();
    host.channel.start().unwrap();

    // Deliver until the host is secured, then lose everything it sent last.
    while host.channel.state() != ChannelState::Secured {
        let outbound = phone.wire.drain();
        assert!(!outbound.is_empty(), "phone stalled before host secured");
        for packet in outbound {
            host.channel.on_bytes_received(&packet);
        }
        if host.channel.state() == ChannelState::Secured {
            host.wire.drain();
            break;
        }
        for packet in host.wire.drain() {
            phone.channel.on_bytes_received(&packet);
        }
    }
    assert_eq!(phone.channel.state(), ChannelState::Handshaking);
    phone.channel.on_transport_closed();
    host.channel.on_transport_closed();

    let (phone, host) = reconnect(ps, hs);
    assert_eq!(phone.channel.state(), ChannelState::Secured);
    assert_eq!(host.channel.state(), ChannelState::Secured);
    assert_eq!(phone.channel.key_fingerprint(), host.channel.key_fingerprint());
}

#[test]
fn reconnection_with_diverged_keys_fails() {
    let (phone, host) = secured_pair();
    let (ps, hs) = (Arc::clone(&phone.storage), Arc::clone(&host.storage));
    // The host forgets and re-pairs with someone else under the same id.
    let (other_phone, _other_host) = secured_pair();
    let stale = other_phone.storage.load_key(&HOST).unwrap().unwrap();
    ps.save_key(&HOST, &stale).unwrap();

    let (mut phone, mut host) = reconnect(ps, hs);
    assert_eq!(host.channel.state(), ChannelState::Failed(FailureReason::Handshake));
    assert_eq!(host.events(), vec![ChannelEvent::EstablishFailed(FailureReason::Handshake)]);
    assert_ne!(phone.channel.state(), ChannelState::Secured);
    assert!(!phone
        .events()
        .iter()
        .any(|e| matches!(e, ChannelEvent::SecureChannelEstablished { .. })));
}

#[test]
fn reconnection_without_stored_key_is_a_storage_failure() {
    let mut phone = Side::new(
        ChannelConfig::default(),
        ChannelSetup::reconnection(Role::Initiator, PHONE, Some(HOST)),
        Arc::new(InMemoryStorage::new()),
    );
    assert!(phone.channel.start().is_err());
    assert_eq!(phone.channel.state(), ChannelState::Failed(FailureReason::Storage));
    assert_eq!(phone.events(), vec![ChannelEvent::EstablishFailed(FailureReason::Storage)]);
}

#[test]
fn reconnecting_initiator_must_name_peer() {
    let result = SecureChannel::new(
        ChannelConfig::default(),
        ChannelSetup::reconnection(Role::Initiator, PHONE, None),
        Arc::new(QueueTransport::new()),
        Arc::new(InMemoryStorage::new()),
    );
    assert!(result.is_err());
}

// ── Out-of-band association ─────────────────────────────────────────────

#[derive(Default)]
struct Courier(parking_lot::Mutex<Vec<Vec<u8>>>);

impl OobChannel for Courier {
    fn send(&self, data: &[u8]) -> Result<()> {
        self.0.lock().push(data.to_vec());
        Ok(())
    }
}

fn oob_verifiers() -> (OobVerifier, OobVerifier) {
    let courier = Courier::default();
    let mut a = OobVerifier::new();
    a.begin_exchange(&courier).unwrap();
    let mut b = OobVerifier::new();
    b.install(&courier.0.lock()[0]).unwrap();
    (a, b)
}

fn oob_config() -> ChannelConfig {
    ChannelConfig {
        verification: VerificationMethod::OutOfBand,
        ..ChannelConfig::default()
    }
}

#[test]
fn oob_association_secures_without_user_input() {
    let (va, vb) = oob_verifiers();
    let mut phone = Side::new(
        oob_config(),
        ChannelSetup::association(Role::Initiator, PHONE).with_oob_verifier(va),
        Arc::new(InMemoryStorage::new()),
    );
    let mut host = Side::new(
        oob_config(),
        ChannelSetup::association(Role::Responder, HOST).with_oob_verifier(vb),
        Arc::new(InMemoryStorage::new()),
    );
    phone.channel.start().unwrap();
    host.channel.start().unwrap();
    pump(&phone, &host);

    assert_eq!(phone.channel.state(), ChannelState::Secured);
    assert_eq!(host.channel.state(), ChannelState::Secured);
    let events = phone.events();
    assert!(matches!(
        events[0],
        ChannelEvent::VerificationCodeAvailable(VerificationCode::OutOfBand(ref code)) if code.len() == 32
    ));
    assert_eq!(events[1], ChannelEvent::SecureChannelEstablished { peer: HOST });
    assert!(host.events().contains(&ChannelEvent::SecureChannelEstablished { peer: PHONE }));
}

#[test]
fn oob_with_mismatched_keys_is_rejected() {
    let (va, _) = oob_verifiers();
    let (_, vb) = oob_verifiers();
    let mut phone = Side::new(
        oob_config(),
        ChannelSetup::association(Role::Initiator, PHONE).with_oob_verifier(va),
        Arc::new(InMemoryStorage::new()),
    );
    let mut host = Side::new(
        oob_config(),
        ChannelSetup::association(Role::Responder, HOST).with_oob_verifier(vb),
        Arc::new(InMemoryStorage::new()),
    );
    phone.channel.start().unwrap();
    host.channel.start().unwrap();
    pump(&phone, &host);

    assert!(matches!(
        phone.channel.state(),
        ChannelState::Failed(FailureReason::VerificationRejected { .. })
    ));
    assert!(matches!(
        host.channel.state(),
        ChannelState::Failed(FailureReason::VerificationRejected { .. })
    ));
    for side in [&mut phone, &mut host] {
        let failures = side
            .events()
            .into_iter()
            .filter(|e| matches!(e, ChannelEvent::EstablishFailed(_)))
            .count();
        assert_eq!(failures, 1);
    }
}

#[test]
fn oob_config_without_verifier_is_refused() {
    let result = SecureChannel::new(
        oob_config(),
        ChannelSetup::association(Role::Initiator, PHONE),
        Arc::new(QueueTransport::new()),
        Arc::new(InMemoryStorage::new()),
    );
    assert!(matches!(result, Err(TetherTrustError::OobChannel(_))));
}
