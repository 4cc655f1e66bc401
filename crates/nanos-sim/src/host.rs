//! Simulated USB host.

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use nanos_apdu::FRAME_SIZE;
use nanos_link::{
    DeviceDescriptor, DeviceId, Direction, EndpointDescriptor, InterfaceDescriptor, PlatformEvent,
    RegistrationId, UsbConnection, UsbHost, HID_CLASS,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::firmware::SecureElement;

/// How the host answers permission requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionPolicy {
    /// Every device is accessible without asking.
    AlreadyGranted,
    /// Requests are granted right away.
    #[default]
    Grant,
    /// Requests are denied right away.
    Deny,
    /// Requests wait for [`SimHost::grant`] or [`SimHost::deny`].
    Manual,
}

/// USB shape of a simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interfaces: Vec<InterfaceDescriptor>,
    /// `open()` fails.
    pub open_fails: bool,
    /// `claim_interface()` fails.
    pub claim_fails: bool,
}

impl DeviceProfile {
    /// One HID interface with a 64-byte IN and OUT endpoint.
    pub fn nano() -> Self {
        DeviceProfile {
            vendor_id: 0x2c97,
            product_id: 0x0001,
            interfaces: vec![InterfaceDescriptor {
                number: 0,
                class: HID_CLASS,
                endpoints: vec![
                    EndpointDescriptor {
                        address: 0x82,
                        direction: Direction::In,
                        max_packet_size: FRAME_SIZE,
                    },
                    EndpointDescriptor {
                        address: 0x02,
                        direction: Direction::Out,
                        max_packet_size: FRAME_SIZE,
                    },
                ],
            }],
            open_fails: false,
            claim_fails: false,
        }
    }

    pub fn with_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self.product_id = product_id;
        self
    }

    /// Remove every endpoint with the given direction.
    pub fn without_endpoint(mut self, direction: Direction) -> Self {
        for interface in &mut self.interfaces {
            interface.endpoints.retain(|ep| ep.direction != direction);
        }
        self
    }

    pub fn with_interface_class(mut self, class: u8) -> Self {
        for interface in &mut self.interfaces {
            interface.class = class;
        }
        self
    }

    pub fn with_open_failure(mut self) -> Self {
        self.open_fails = true;
        self
    }

    pub fn with_claim_failure(mut self) -> Self {
        self.claim_fails = true;
        self
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::nano()
    }
}

struct AttachedDevice {
    profile: DeviceProfile,
    firmware: Arc<SecureElement>,
    /// Raised on detach; shared with every open connection.
    detached: Arc<AtomicBool>,
}

#[derive(Default)]
struct HostState {
    devices: BTreeMap<DeviceId, AttachedDevice>,
    next_device: DeviceId,
    sinks: Vec<(RegistrationId, Sender<PlatformEvent>)>,
    next_registration: u64,
    policy: PermissionPolicy,
    granted: HashSet<DeviceId>,
    pending: Vec<DeviceId>,
    permission_requests: usize,
}

impl HostState {
    fn broadcast(&self, event: PlatformEvent) {
        trace!(?event, sinks = self.sinks.len(), "platform event");
        for (_, sink) in &self.sinks {
            let _ = sink.send(event.clone());
        }
    }

    fn answer(&mut self, device: DeviceId, granted: bool) {
        if granted {
            self.granted.insert(device);
        }
        self.broadcast(PlatformEvent::PermissionResult { device, granted });
    }
}

/// An in-memory USB host with hot-plug and permission prompts.
pub struct SimHost {
    state: Mutex<HostState>,
}

impl SimHost {
    pub fn new(policy: PermissionPolicy) -> Self {
        SimHost {
            state: Mutex::new(HostState {
                policy,
                next_device: 1,
                ..Default::default()
            }),
        }
    }

    /// Plug in a device running `firmware`.
    pub fn attach(&self, profile: DeviceProfile, firmware: Arc<SecureElement>) -> DeviceId {
        let mut state = self.state.lock();
        let id = state.next_device;
        state.next_device += 1;
        state.devices.insert(
            id,
            AttachedDevice {
                profile,
                firmware,
                detached: Arc::new(AtomicBool::new(false)),
            },
        );
        debug!(device = id, "device attached");
        id
    }

    /// Unplug a device. Open connections start failing.
    pub fn detach(&self, device: DeviceId) -> bool {
        let mut state = self.state.lock();
        let Some(attached) = state.devices.remove(&device) else {
            return false;
        };
        attached.detached.store(true, Ordering::SeqCst);
        state.granted.remove(&device);
        state.pending.retain(|d| *d != device);
        debug!(device, "device detached");
        state.broadcast(PlatformEvent::Detached { device });
        true
    }

    /// Grant a pending request (manual policy).
    pub fn grant(&self, device: DeviceId) -> bool {
        self.resolve(device, true)
    }

    /// Deny a pending request (manual policy).
    pub fn deny(&self, device: DeviceId) -> bool {
        self.resolve(device, false)
    }

    fn resolve(&self, device: DeviceId, granted: bool) -> bool {
        let mut state = self.state.lock();
        let before = state.pending.len();
        state.pending.retain(|d| *d != device);
        if state.pending.len() == before {
            return false;
        }
        state.answer(device, granted);
        true
    }

    pub fn set_policy(&self, policy: PermissionPolicy) {
        self.state.lock().policy = policy;
    }

    /// Number of `request_permission` calls so far.
    pub fn permission_requests(&self) -> usize {
        self.state.lock().permission_requests
    }

    /// Devices with an unanswered permission request.
    pub fn pending_requests(&self) -> Vec<DeviceId> {
        self.state.lock().pending.clone()
    }

    /// Number of active event subscriptions.
    pub fn registrations(&self) -> usize {
        self.state.lock().sinks.len()
    }
}

fn descriptor(id: DeviceId, profile: &DeviceProfile) -> DeviceDescriptor {
    DeviceDescriptor {
        id,
        vendor_id: profile.vendor_id,
        product_id: profile.product_id,
        interfaces: profile.interfaces.clone(),
    }
}

impl UsbHost for SimHost {
    fn devices(&self) -> Vec<DeviceDescriptor> {
        let state = self.state.lock();
        state
            .devices
            .iter()
            .map(|(id, attached)| descriptor(*id, &attached.profile))
            .collect()
    }

    fn has_permission(&self, device: &DeviceDescriptor) -> bool {
        let state = self.state.lock();
        state.policy == PermissionPolicy::AlreadyGranted || state.granted.contains(&device.id)
    }

    fn request_permission(&self, device: &DeviceDescriptor) -> io::Result<()> {
        let mut state = self.state.lock();
        if !state.devices.contains_key(&device.id) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "device not attached"));
        }
        state.permission_requests += 1;
        debug!(device = device.id, policy = ?state.policy, "permission requested");

        match state.policy {
            PermissionPolicy::AlreadyGranted | PermissionPolicy::Grant => state.answer(device.id, true),
            PermissionPolicy::Deny => state.answer(device.id, false),
            PermissionPolicy::Manual => state.pending.push(device.id),
        }
        Ok(())
    }

    fn open(&self, device: &DeviceDescriptor) -> io::Result<Box<dyn UsbConnection>> {
        let state = self.state.lock();
        let attached = state
            .devices
            .get(&device.id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "device not attached"))?;
        if attached.profile.open_fails {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "open refused"));
        }

        Ok(Box::new(SimConnection::new(
            attached.firmware.clone(),
            attached.detached.clone(),
            attached.profile.claim_fails,
        )))
    }

    fn register(&self, events: Sender<PlatformEvent>) -> RegistrationId {
        let mut state = self.state.lock();
        state.next_registration += 1;
        let id = RegistrationId(state.next_registration);
        state.sinks.push((id, events));
        id
    }

    fn unregister(&self, id: RegistrationId) {
        self.state.lock().sinks.retain(|(sink, _)| *sink != id);
    }
}

/// Connection to a simulated device.
///
/// Each written frame is handed to the firmware; its response frames are
/// queued for the IN endpoint.
pub struct SimConnection {
    firmware: Arc<SecureElement>,
    detached: Arc<AtomicBool>,
    claim_fails: bool,
    claimed: Option<u8>,
    closed: bool,
    responses_tx: Sender<[u8; FRAME_SIZE]>,
    responses_rx: Receiver<[u8; FRAME_SIZE]>,
}

impl SimConnection {
    fn new(firmware: Arc<SecureElement>, detached: Arc<AtomicBool>, claim_fails: bool) -> Self {
        let (responses_tx, responses_rx) = crossbeam_channel::unbounded();
        SimConnection {
            firmware,
            detached,
            claim_fails,
            claimed: None,
            closed: false,
            responses_tx,
            responses_rx,
        }
    }

    fn check_alive(&self) -> io::Result<()> {
        if self.closed || self.detached.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
        }
        Ok(())
    }
}

impl UsbConnection for SimConnection {
    fn claim_interface(&mut self, interface: u8, _force: bool) -> io::Result<()> {
        self.check_alive()?;
        if self.claim_fails {
            return Err(io::Error::other("interface busy"));
        }
        self.claimed = Some(interface);
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> io::Result<()> {
        if self.claimed != Some(interface) {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "interface not claimed"));
        }
        self.claimed = None;
        Ok(())
    }

    fn bulk_out(&mut self, _endpoint: u8, data: &[u8], _timeout: Duration) -> io::Result<usize> {
        self.check_alive()?;
        if self.claimed.is_none() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "interface not claimed"));
        }
        if self.firmware.faults().fail_writes {
            return Ok(0);
        }

        let frames = self.firmware.handle_frame(data);
        let delay = self.firmware.faults().response_delay_ms;
        if delay == 0 {
            for frame in frames {
                let _ = self.responses_tx.send(frame);
            }
        } else {
            trace!(delay_ms = delay, "delaying response");
            let responses = self.responses_tx.clone();
            thread::Builder::new()
                .name("nanos-sim-late".to_string())
                .spawn(move || {
                    thread::sleep(Duration::from_millis(delay));
                    for frame in frames {
                        let _ = responses.send(frame);
                    }
                })?;
        }
        Ok(data.len())
    }

    fn bulk_in(&mut self, _endpoint: u8, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.check_alive()?;
        match self.responses_rx.recv_timeout(timeout) {
            Ok(frame) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(n)
            }
            Err(RecvTimeoutError::Timeout) => Ok(0),
            Err(RecvTimeoutError::Disconnected) => {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "response queue closed"))
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.claimed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::FirmwareConfig;

    fn firmware() -> Arc<SecureElement> {
        Arc::new(SecureElement::new(FirmwareConfig::default()))
    }

    #[test]
    fn test_attach_and_detach() {
        let host = SimHost::new(PermissionPolicy::Grant);
        let (tx, rx) = crossbeam_channel::unbounded();
        host.register(tx);

        let id = host.attach(DeviceProfile::nano(), firmware());
        assert_eq!(host.devices().len(), 1);
        assert!(host.detach(id));
        assert!(!host.detach(id));
        assert!(host.devices().is_empty());
        assert_eq!(rx.try_recv().unwrap(), PlatformEvent::Detached { device: id });
    }

    #[test]
    fn test_manual_permission() {
        let host = SimHost::new(PermissionPolicy::Manual);
        let (tx, rx) = crossbeam_channel::unbounded();
        host.register(tx);
        let id = host.attach(DeviceProfile::nano(), firmware());
        let device = host.devices().remove(0);

        host.request_permission(&device).unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(host.pending_requests(), vec![id]);

        assert!(host.grant(id));
        assert_eq!(
            rx.try_recv().unwrap(),
            PlatformEvent::PermissionResult {
                device: id,
                granted: true
            }
        );
        assert!(host.has_permission(&device));
        assert!(!host.grant(id));
    }

    #[test]
    fn test_unregister_drops_sink() {
        let host = SimHost::new(PermissionPolicy::Grant);
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = host.register(tx);
        assert_eq!(host.registrations(), 1);
        host.unregister(id);
        assert_eq!(host.registrations(), 0);
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_connection_round_trip() {
        let host = SimHost::new(PermissionPolicy::AlreadyGranted);
        host.attach(DeviceProfile::nano(), firmware());
        let device = host.devices().remove(0);

        let mut connection = host.open(&device).unwrap();
        let frame = nanos_apdu::OutboundFrame::encode(nanos_apdu::Command::GetVersion, &[]).unwrap();
        assert!(connection.bulk_out(0x02, frame.as_bytes(), Duration::from_millis(10)).is_err());

        connection.claim_interface(0, true).unwrap();
        assert_eq!(
            connection.bulk_out(0x02, frame.as_bytes(), Duration::from_millis(10)).unwrap(),
            FRAME_SIZE
        );

        let mut buf = [0u8; FRAME_SIZE];
        let n = connection.bulk_in(0x82, &mut buf, Duration::from_millis(10)).unwrap();
        assert_eq!(n, FRAME_SIZE);
        assert_eq!(&buf[5..12], &[0x00, 0x03, 0x01, 0x00, 0x03, 0x90, 0x00]);

        // Nothing left to read
        assert_eq!(connection.bulk_in(0x82, &mut buf, Duration::from_millis(10)).unwrap(), 0);
    }

    #[test]
    fn test_delayed_response() {
        let host = SimHost::new(PermissionPolicy::AlreadyGranted);
        let element = firmware();
        element.set_faults(crate::firmware::Faults {
            response_delay_ms: 50,
            ..Default::default()
        });
        host.attach(DeviceProfile::nano(), element);
        let device = host.devices().remove(0);

        let mut connection = host.open(&device).unwrap();
        connection.claim_interface(0, true).unwrap();
        let frame = nanos_apdu::OutboundFrame::encode(nanos_apdu::Command::GetVersion, &[]).unwrap();
        connection.bulk_out(0x02, frame.as_bytes(), Duration::from_millis(10)).unwrap();

        let mut buf = [0u8; FRAME_SIZE];
        assert_eq!(connection.bulk_in(0x82, &mut buf, Duration::from_millis(5)).unwrap(), 0);
        assert_eq!(
            connection.bulk_in(0x82, &mut buf, Duration::from_secs(1)).unwrap(),
            FRAME_SIZE
        );
    }

    #[test]
    fn test_open_failure() {
        let host = SimHost::new(PermissionPolicy::AlreadyGranted);
        host.attach(DeviceProfile::nano().with_open_failure(), firmware());
        let device = host.devices().remove(0);
        assert!(host.open(&device).is_err());
    }
}
