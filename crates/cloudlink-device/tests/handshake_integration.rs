//! Integration tests for the session orchestrator.
//!
//! # Purpose
//!
//! These tests exercise `Protocol::begin` through its public API over the
//! mock stack, the same way the outer system loop uses it.  They verify:
//!
//! - The resume fast path: a resumed transport session with matching cached
//!   state re-keys the session, skips HELLO entirely, and pings instead.
//! - The full handshake: HELLO with the right capability flags, transport
//!   notification, and protocol-flag persistence.
//! - The hello-response requirement: success when the cloud answers, a hard
//!   handshake failure when it does not.
//! - Device-initiated describe: a forced system describe follows the
//!   handshake.
//!
//! # The resume decision
//!
//! ```text
//! establish() ─► Resumed?
//!    │ yes            │ no
//!    ▼                ▼
//! MOVE_SESSION     HELLO ──► (hello response?) ──► notify_established
//!    │                                              persist flags
//! cached state == current state (masked)?           forced describe?
//!    │ yes                   │ no
//!    ▼                       ▼
//! ping, done (Resumed)    HELLO path above (Established)
//! ```

use cloudlink_core::protocol::messages::code;
use cloudlink_core::{codec, HelloFlags, MessageType, ProtocolFlags, WireType};
use cloudlink_device::application::channel::{ProtocolError, SessionCommand, SessionOutcome};
use cloudlink_device::application::descriptor::AppStateSelector;
use cloudlink_device::application::engine::{Protocol, ProtocolConfig};
use cloudlink_device::application::platform::Platform;
use cloudlink_device::infrastructure::channel::mock::MockChannel;
use cloudlink_device::infrastructure::descriptor::mock::{MockDescriptor, SharedAppState};
use cloudlink_device::infrastructure::platform::mock::MockPlatform;

const SYSTEM_CRC: u32 = 0x1111_1111;
const APP_CRC: u32 = 0x2222_2222;

/// Builds an engine whose descriptor computes the given CRCs and whose
/// channel caches whatever was persisted into `state`.
fn make_engine(
    state: SharedAppState,
    flags: u8,
) -> Protocol<MockChannel, MockPlatform, MockDescriptor> {
    let descriptor = MockDescriptor::new()
        .with_function("led", 1)
        .with_system_info("\"p\":12")
        .with_state(state.clone(), SYSTEM_CRC, APP_CRC);
    let channel = MockChannel::with_shared_state(state);
    let config = ProtocolConfig {
        product_id: 1449,
        firmware_version: 17,
        platform_id: 12,
        device_id: *b"cloudlink-01",
        protocol_flags: ProtocolFlags(flags),
        ..ProtocolConfig::default()
    };
    Protocol::new(channel, MockPlatform::new(), descriptor, config)
}

/// Persists a cache that matches the descriptor's current state for the
/// given protocol flags.
fn persist_matching_state(state: &SharedAppState, flags: u8) {
    state.persist(AppStateSelector::DescribeSystem, SYSTEM_CRC);
    state.persist(AppStateSelector::DescribeApp, APP_CRC);
    // No subscriptions registered: the checksum of an empty filter table.
    let empty_crc = MockPlatform::new().calculate_crc(&[]);
    state.persist(AppStateSelector::Subscriptions, empty_crc);
    state.persist(AppStateSelector::ProtocolFlags, u32::from(flags));
}

fn is_hello(frame: &[u8]) -> bool {
    codec::message_type(frame) == MessageType::Hello
}

// ── Resume fast path ──────────────────────────────────────────────────────────

/// Session resume with unchanged state: one MOVE_SESSION, no HELLO, one
/// ping, and the resumed outcome reported to the caller.
#[test]
fn test_resume_with_matching_state_skips_hello_and_pings() {
    // Arrange
    let state = SharedAppState::new();
    persist_matching_state(&state, 0);
    let mut protocol = make_engine(state, 0);
    protocol
        .channel_mut()
        .set_establish(Ok(SessionOutcome::Resumed));

    // Act
    let outcome = protocol.begin().expect("begin");

    // Assert
    assert_eq!(outcome, SessionOutcome::Resumed);
    assert_eq!(protocol.channel().commands(), &[SessionCommand::MoveSession]);
    let sent = protocol.channel().sent();
    assert_eq!(sent.len(), 1, "exactly one frame: the keepalive ping");
    assert_eq!(codec::message_type(&sent[0]), MessageType::Ping);
    assert!(!protocol.channel().established_notified());
}

/// A resumed session whose cached state differs falls back to the full
/// HELLO handshake.
#[test]
fn test_resume_with_stale_state_sends_hello() {
    // Arrange – cache holds an outdated application CRC.
    let state = SharedAppState::new();
    persist_matching_state(&state, 0);
    state.persist(AppStateSelector::DescribeApp, 0xDEAD);
    let mut protocol = make_engine(state, 0);
    protocol
        .channel_mut()
        .set_establish(Ok(SessionOutcome::Resumed));

    // Act
    let outcome = protocol.begin().expect("begin");

    // Assert
    assert_eq!(outcome, SessionOutcome::Established);
    assert!(protocol.channel().sent().iter().any(|f| is_hello(f)));
    assert!(protocol.channel().established_notified());
}

/// An empty cache (first connection on this session store) never matches.
#[test]
fn test_resume_with_empty_cache_sends_hello() {
    let state = SharedAppState::new();
    let mut protocol = make_engine(state, 0);
    protocol
        .channel_mut()
        .set_establish(Ok(SessionOutcome::Resumed));

    let outcome = protocol.begin().expect("begin");

    assert_eq!(outcome, SessionOutcome::Established);
    assert!(protocol.channel().sent().iter().any(|f| is_hello(f)));
}

/// With device-initiated describe, only the system CRC and protocol flags
/// gate the fast path; a stale application CRC is ignored.
#[test]
fn test_resume_mask_narrows_under_device_initiated_describe() {
    // Arrange – app CRC differs, but the narrowed mask does not select it.
    let flags = ProtocolFlags::DEVICE_INITIATED_DESCRIBE;
    let state = SharedAppState::new();
    persist_matching_state(&state, flags);
    state.persist(AppStateSelector::DescribeApp, 0xDEAD);
    let mut protocol = make_engine(state, flags);
    protocol
        .channel_mut()
        .set_establish(Ok(SessionOutcome::Resumed));

    // Act
    let outcome = protocol.begin().expect("begin");

    // Assert – fast path taken despite the stale application CRC.
    assert_eq!(outcome, SessionOutcome::Resumed);
    assert!(!protocol.channel().sent().iter().any(|f| is_hello(f)));
}

// ── Full handshake ────────────────────────────────────────────────────────────

#[test]
fn test_full_handshake_sends_hello_and_notifies_channel() {
    let state = SharedAppState::new();
    let mut protocol = make_engine(state.clone(), 0);

    let outcome = protocol.begin().expect("begin");

    assert_eq!(outcome, SessionOutcome::Established);
    let sent = protocol.channel().sent();
    assert_eq!(sent.len(), 1);
    assert!(is_hello(&sent[0]));
    assert!(protocol.channel().established_notified());
    // Protocol flags persisted through the save/load envelope.
    assert_eq!(state.get(AppStateSelector::ProtocolFlags), Some(0));
    assert_eq!(
        protocol.channel().commands(),
        &[SessionCommand::SaveSession, SessionCommand::LoadSession]
    );
}

#[test]
fn test_hello_carries_capability_and_ota_flags() {
    // Arrange – descriptor reports a successful OTA.
    let state = SharedAppState::new();
    let descriptor = MockDescriptor::new()
        .with_state(state.clone(), SYSTEM_CRC, APP_CRC)
        .with_ota_successful(true);
    let mut protocol = Protocol::new(
        MockChannel::with_shared_state(state),
        MockPlatform::new(),
        descriptor,
        ProtocolConfig {
            protocol_flags: ProtocolFlags(ProtocolFlags::DEVICE_INITIATED_DESCRIBE),
            ..ProtocolConfig::default()
        },
    );

    // Act
    protocol.begin().expect("begin");

    // Assert – flags byte sits behind product id and firmware version.
    let hello = protocol
        .channel()
        .sent()
        .iter()
        .find(|f| is_hello(f))
        .expect("hello frame")
        .clone();
    let flags = codec::payload(&hello)[5];
    assert_ne!(flags & HelloFlags::DIAGNOSTICS_SUPPORT, 0);
    assert_ne!(flags & HelloFlags::IMMEDIATE_UPDATES_SUPPORT, 0);
    assert_ne!(flags & HelloFlags::OTA_UPGRADE_SUCCESSFUL, 0);
    assert_ne!(flags & HelloFlags::DEVICE_INITIATED_DESCRIBE, 0);
}

#[test]
fn test_establish_failure_propagates() {
    let mut protocol = make_engine(SharedAppState::new(), 0);
    protocol
        .channel_mut()
        .set_establish(Err(ProtocolError::Handshake("bad certificate".into())));

    let result = protocol.begin();

    assert_eq!(
        result,
        Err(ProtocolError::Handshake("bad certificate".into()))
    );
    assert!(protocol.channel().sent().is_empty());
}

// ── Hello response requirement ────────────────────────────────────────────────

#[test]
fn test_required_hello_response_consumed_from_cloud() {
    // Arrange – the cloud's HELLO is already queued when we connect.
    let mut protocol = make_engine(SharedAppState::new(), ProtocolFlags::REQUIRE_HELLO_RESPONSE);
    protocol
        .channel_mut()
        .push_incoming(&[0x40, 0x02, 0x00, 0x21, 0xB1, b'h']);

    // Act
    let outcome = protocol.begin().expect("begin");

    // Assert – handshake completed and the cloud HELLO was acknowledged.
    assert_eq!(outcome, SessionOutcome::Established);
    let sent = protocol.channel().sent();
    assert!(is_hello(&sent[0]));
    assert!(sent
        .iter()
        .any(|f| f.as_slice() == [0x60, 0x00, 0x00, 0x21]));
    assert!(protocol.descriptor().ota_status_sent());
}

#[test]
fn test_required_hello_response_timeout_fails_handshake() {
    // Arrange – nothing queued; the clock must advance for the wait bound
    // to expire, so each idle turn costs 500 simulated milliseconds.
    let mut protocol = make_engine(SharedAppState::new(), ProtocolFlags::REQUIRE_HELLO_RESPONSE);
    protocol.platform_mut().set_auto_advance(500);

    // Act
    let result = protocol.begin();

    // Assert
    assert_eq!(result, Err(ProtocolError::MessageTimeout));
    assert!(!protocol.channel().established_notified());
}

// ── Device-initiated describe ─────────────────────────────────────────────────

#[test]
fn test_device_initiated_describe_posts_forced_system_describe() {
    let flags = ProtocolFlags::DEVICE_INITIATED_DESCRIBE;
    let state = SharedAppState::new();
    // Even a matching cache must not elide the forced describe.
    state.persist(AppStateSelector::DescribeSystem, SYSTEM_CRC);
    let mut protocol = make_engine(state, flags);

    protocol.begin().expect("begin");

    let sent = protocol.channel().sent();
    let describe = sent
        .iter()
        .find(|f| codec::message_type(f) == MessageType::Describe)
        .expect("forced system describe");
    assert_eq!(codec::wire_type(describe), WireType::Con);
    assert_eq!(codec::code(describe), code::POST);
    assert_eq!(
        codec::uri_query_byte(describe),
        Some(cloudlink_core::DescribeFlags::SYSTEM)
    );
    assert!(protocol.pending_system_describe().is_some());
}

// ── Session reset hygiene ─────────────────────────────────────────────────────

/// `begin` clears state left over from a previous session: pending acks and
/// outstanding describe ids.
#[test]
fn test_begin_clears_previous_session_state() {
    let mut protocol = make_engine(SharedAppState::new(), 0);
    protocol.begin().expect("first begin");
    protocol
        .post_description(cloudlink_core::DescribeFlags::SYSTEM, true)
        .expect("post describe");
    protocol
        .publish_event("boot", b"", true, || {}, |_| {})
        .expect("publish");
    assert!(protocol.pending_system_describe().is_some());
    assert_eq!(protocol.pending_acks(), 1);

    protocol.begin().expect("second begin");

    assert!(protocol.pending_system_describe().is_none());
    assert_eq!(protocol.pending_acks(), 0);
}
