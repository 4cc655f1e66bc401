//! Command/response exchange tests against the simulated secure element.

mod common;

use std::time::Duration;

use common::{ready_session, simulator};
use nanos_apdu::{FrameError, OutboundFrame, FRAME_SIZE, MAX_PAYLOAD_SIZE};
use nanos_link::{
    Command, DeviceEvent, DeviceSession, HardwareSigner, LinkError, LinkState, SignerError,
    StatusCode,
};
use nanos_sim::{Faults, PermissionPolicy};

fn signer() -> (nanos_sim::Simulator, HardwareSigner) {
    let sim = simulator(PermissionPolicy::Grant);
    let session = ready_session(&sim);
    (sim, HardwareSigner::new(session))
}

// ============================================================================
// Typed Commands
// ============================================================================

#[test]
fn test_get_version() {
    let (_sim, signer) = signer();
    let version = signer.get_version().unwrap();
    assert_eq!(version.to_string(), "1.0.3");
}

#[test]
fn test_raw_exchange() {
    let (_sim, signer) = signer();
    let result = signer.exchange(Command::GetVersion, &[]).unwrap();
    assert_eq!(result.status, StatusCode::Ok);
    assert_eq!(result.data, vec![1, 0, 3]);
}

#[test]
fn test_get_address_variants() {
    let (sim, signer) = signer();

    let address = signer.get_address_at(7, true).unwrap();
    assert_eq!(address, sim.firmware.address(7));
    let last = sim.firmware.received().pop().unwrap();
    assert_eq!(last.command(), Some(Command::GetAddressSilent));
    assert_eq!(last.payload, vec![0, 0, 0, 7]);

    let address = signer.get_address().unwrap();
    assert_eq!(address, sim.firmware.address(0));
    let last = sim.firmware.received().pop().unwrap();
    assert_eq!(last.command(), Some(Command::GetAddress));

    let text = address.to_string();
    assert!(text.starts_with("Mx"));
    assert_eq!(text.len(), 42);
}

#[test]
fn test_sign_multi_frame_response() {
    let (sim, signer) = signer();
    let hash = [0x5Au8; 32];

    let signature = signer.sign_tx_hash_at(3, &hash).unwrap();
    assert_eq!(signature, sim.firmware.signature(3, &hash));

    let last = sim.firmware.received().pop().unwrap();
    assert_eq!(&last.payload[..4], &[0, 0, 0, 3]);
    assert_eq!(&last.payload[4..], &hash);

    let default_index = signer.sign_tx_hash(&hash).unwrap();
    assert_eq!(default_index, sim.firmware.signature(0, &hash));
}

#[test]
fn test_hash_length_checked_before_io() {
    let (sim, signer) = signer();

    for len in [31usize, 33] {
        match signer.sign_tx_hash(&vec![0u8; len]) {
            Err(SignerError::InvalidHashLength(n)) => assert_eq!(n, len),
            other => panic!("unexpected result {other:?}"),
        }
    }
    assert!(sim.firmware.received().is_empty());
}

#[test]
fn test_user_rejection() {
    let (sim, signer) = signer();
    sim.firmware.set_faults(Faults {
        reject_signing: true,
        ..Default::default()
    });

    let err = signer.sign_tx_hash(&[0u8; 32]).unwrap_err();
    assert!(matches!(err, SignerError::Response { .. }));
    assert_eq!(err.status(), StatusCode::UserRejected);
    assert!(err.data().is_empty());
}

#[test]
fn test_invalid_parameter_status() {
    let (_sim, signer) = signer();
    let result = signer.exchange(Command::GetAddress, &[0x01, 0x02]).unwrap();
    assert_eq!(result.status, StatusCode::InvalidParameter);
    assert!(result.data.is_empty());
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_payload_ceiling() {
    let (sim, signer) = signer();
    let err = signer
        .exchange(Command::GetAddress, &[0u8; MAX_PAYLOAD_SIZE + 1])
        .unwrap_err();
    assert!(matches!(
        err,
        LinkError::Frame(FrameError::PayloadTooLarge { max: 52, actual: 53 })
    ));
    assert!(sim.firmware.received().is_empty());
}

#[test]
fn test_channel_mismatch_is_invalid_response() {
    let (sim, signer) = signer();
    sim.firmware.set_faults(Faults {
        corrupt_channel: true,
        ..Default::default()
    });

    let err = signer.exchange(Command::GetVersion, &[]).unwrap_err();
    assert!(matches!(err, LinkError::Frame(FrameError::InvalidChannel(_))));
    assert_eq!(err.status(), StatusCode::InvalidResponse);

    let err = signer.get_version().unwrap_err();
    assert_eq!(err.status(), StatusCode::InvalidResponse);
}

#[test]
fn test_silent_device_times_out() {
    let (sim, signer) = signer();
    sim.firmware.set_faults(Faults {
        silent: true,
        ..Default::default()
    });

    let err = signer.exchange(Command::GetVersion, &[]).unwrap_err();
    assert!(matches!(err, LinkError::ReadTimeout { cycles: 3 }));
    assert_eq!(err.status(), StatusCode::ReadTimeout);

    let err = signer
        .exchange_with_wait(Command::GetVersion, &[], 1)
        .unwrap_err();
    assert!(matches!(err, LinkError::ReadTimeout { cycles: 1 }));

    // The session survives a timeout
    sim.firmware.set_faults(Faults::default());
    assert_eq!(signer.get_version().unwrap().to_string(), "1.0.3");
}

#[test]
fn test_bad_multi_frame_response_is_drained() {
    let (sim, signer) = signer();
    sim.firmware.set_faults(Faults {
        corrupt_channel: true,
        ..Default::default()
    });

    let err = signer.sign_tx_hash(&[0x11; 32]).unwrap_err();
    assert!(matches!(
        err,
        SignerError::Link(LinkError::Frame(FrameError::InvalidChannel(_)))
    ));

    sim.firmware.set_faults(Faults::default());
    assert_eq!(signer.get_version().unwrap().to_string(), "1.0.3");
    assert_eq!(signer.get_address().unwrap(), sim.firmware.address(0));
    assert_eq!(signer.get_version().unwrap().to_string(), "1.0.3");
}

#[test]
fn test_late_reply_after_timeout_is_discarded() {
    let (sim, signer) = signer();
    sim.firmware.set_faults(Faults {
        response_delay_ms: 60,
        ..Default::default()
    });

    let hash = [0x22u8; 32];
    let err = signer.sign_tx_hash(&hash).unwrap_err();
    assert!(matches!(
        err,
        SignerError::Link(LinkError::ReadTimeout { cycles: 3 })
    ));
    let transport = signer.session().transport().unwrap();
    assert!(!transport.is_synced());

    // Let the two-frame signature land on the IN endpoint
    sim.firmware.set_faults(Faults::default());
    std::thread::sleep(Duration::from_millis(150));

    assert_eq!(signer.get_address_at(1, true).unwrap(), sim.firmware.address(1));
    assert!(transport.is_synced());
    assert_eq!(signer.get_version().unwrap().to_string(), "1.0.3");
}

#[test]
fn test_failed_write_disconnects() {
    let (sim, signer) = signer();
    let events = signer.session().subscribe();
    sim.firmware.set_faults(Faults {
        fail_writes: true,
        ..Default::default()
    });

    let err = signer.get_version().unwrap_err();
    assert!(matches!(err, SignerError::Link(LinkError::ConnectionLost)));
    assert_eq!(err.status(), StatusCode::ConnectionLost);
    assert_eq!(signer.session().state(), LinkState::Disconnected);
    assert_eq!(
        events.recv_timeout(Duration::from_secs(1)).unwrap(),
        DeviceEvent::Disconnected
    );
    assert!(sim.firmware.received().is_empty());
}

#[test]
fn test_exchange_requires_ready_session() {
    let sim = simulator(PermissionPolicy::Manual);
    let session = DeviceSession::new(sim.host.clone(), common::fast_config()).unwrap();
    let signer = HardwareSigner::new(session);

    let err = signer.get_version().unwrap_err();
    assert!(matches!(err, SignerError::Link(LinkError::NotConnected)));
}

#[test]
fn test_detach_mid_session() {
    let (sim, signer) = signer();
    assert!(signer.get_version().is_ok());

    sim.host.detach(sim.device);
    assert!(common::wait_for(|| !signer.session().is_ready()));
    let err = signer.get_version().unwrap_err();
    assert!(matches!(err, SignerError::Link(LinkError::NotConnected)));
}

#[test]
fn test_raw_passthroughs() {
    let (_sim, signer) = signer();
    let session = signer.session();

    let frame = OutboundFrame::encode(Command::GetVersion, &[]).unwrap();
    assert_eq!(session.write(frame.as_bytes()).unwrap(), FRAME_SIZE);

    let response = session.read().unwrap();
    assert_eq!(response.len(), FRAME_SIZE);
    assert_eq!(&response[5..12], &[0x00, 0x03, 0x01, 0x00, 0x03, 0x90, 0x00]);
}
