//! Connection lifecycle of a device session.
//!
//! ```text
//! Disconnected ─search()─► Discovering ─► PermissionPending ─grant─► PermissionGranted ─► Ready
//!      ▲                                          │ deny                     │ setup failure   │
//!      │                                          ▼                          ▼                 │
//!      └──────────── search() ◄──────────── Error(code) ◄────────────────────┘                 │
//!      └──────────────────────────── detach / disconnect() ◄───────────────────────────────────┘
//! ```
//!
//! All lifecycle data lives behind one lock. Platform events arrive on a
//! dedicated thread that holds only a weak reference to the session.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use nanos_metrics::metric_defs;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::config::LinkConfig;
use crate::error::{LifecycleErrorCode, LinkError, LinkResult};
use crate::platform::{
    DeviceDescriptor, DeviceId, Direction, PlatformEvent, RegistrationId, UsbHost,
};
use crate::transport::ChunkedTransport;

// ============================================================================
// State and Events
// ============================================================================

/// Lifecycle state of a [`DeviceSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Discovering,
    PermissionPending,
    PermissionGranted,
    Ready,
    /// The last attempt failed. Behaves like `Disconnected` for `search()`.
    Error(LifecycleErrorCode),
}

impl LinkState {
    /// Name used in logs and metric labels.
    pub const fn as_str(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Discovering => "discovering",
            LinkState::PermissionPending => "permission_pending",
            LinkState::PermissionGranted => "permission_granted",
            LinkState::Ready => "ready",
            LinkState::Error(_) => "error",
        }
    }
}

/// Result of [`DeviceSession::search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// The session was already ready; nothing was done.
    AlreadyReady,
    /// Permission was already held and the session is now ready.
    Ready,
    /// A permission request is outstanding.
    PermissionPending,
    /// No matching device is attached.
    NotFound,
    /// The last permission request was denied and no new one was made.
    /// Only returned by [`DeviceSession::search_unless_denied`].
    PermissionDenied,
}

/// Lifecycle notifications delivered to the subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    DeviceReady,
    Disconnected,
    Error {
        code: LifecycleErrorCode,
        cause: String,
    },
}

impl DeviceEvent {
    /// Invoke the matching listener callback.
    pub fn dispatch(&self, listener: &mut dyn DeviceListener) {
        match self {
            DeviceEvent::DeviceReady => listener.on_device_ready(),
            DeviceEvent::Disconnected => listener.on_disconnected(),
            DeviceEvent::Error { code, cause } => listener.on_error(*code, cause),
        }
    }
}

/// Callback-style observer of lifecycle events.
pub trait DeviceListener: Send {
    fn on_device_ready(&mut self) {}

    fn on_disconnected(&mut self) {}

    fn on_error(&mut self, code: LifecycleErrorCode, cause: &str) {
        let _ = (code, cause);
    }
}

/// Forward every event from `events` to `listener` on a named thread.
///
/// The thread exits when the sending side is dropped, either by a newer
/// [`DeviceSession::subscribe`] call or by [`DeviceSession::destroy`].
pub fn spawn_listener<L>(events: Receiver<DeviceEvent>, mut listener: L) -> LinkResult<JoinHandle<()>>
where
    L: DeviceListener + 'static,
{
    let handle = thread::Builder::new()
        .name("nanos-events".to_string())
        .spawn(move || {
            for event in events.iter() {
                event.dispatch(&mut listener);
            }
        })?;
    Ok(handle)
}

// ============================================================================
// Device Session
// ============================================================================

struct Lifecycle {
    state: LinkState,
    device: Option<DeviceDescriptor>,
    transport: Option<Arc<ChunkedTransport>>,
    events: Option<Sender<DeviceEvent>>,
    registration: Option<RegistrationId>,
    destroyed: bool,
}

impl Lifecycle {
    fn transition(&mut self, next: LinkState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "state transition");
            metrics::counter!(
                metric_defs::LIFECYCLE_TRANSITIONS.name,
                "state" => next.as_str()
            )
            .increment(1);
        }
        self.state = next;
    }

    fn emit(&self, event: DeviceEvent) {
        match &self.events {
            Some(events) => {
                if events.send(event).is_err() {
                    trace!("event subscriber gone");
                }
            }
            None => trace!(?event, "no event subscriber"),
        }
    }

    fn device_id(&self) -> Option<DeviceId> {
        self.device.as_ref().map(|d| d.id)
    }

    /// Close the transport and return to `Disconnected`. Returns whether the
    /// session was ready.
    fn teardown(&mut self) -> bool {
        let was_ready = self.state == LinkState::Ready;
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.device = None;
        self.transition(LinkState::Disconnected);
        was_ready
    }
}

/// One connection to a signing device.
///
/// Owns the [`ChunkedTransport`] while ready. Create with [`DeviceSession::new`],
/// then drive with [`search`](Self::search).
pub struct DeviceSession {
    host: Arc<dyn UsbHost>,
    config: LinkConfig,
    lifecycle: Mutex<Lifecycle>,
}

impl DeviceSession {
    /// Create a session and subscribe to platform events.
    pub fn new(host: Arc<dyn UsbHost>, config: LinkConfig) -> LinkResult<Arc<Self>> {
        let session = Arc::new(DeviceSession {
            host,
            config,
            lifecycle: Mutex::new(Lifecycle {
                state: LinkState::Disconnected,
                device: None,
                transport: None,
                events: None,
                registration: None,
                destroyed: false,
            }),
        });

        let (platform_tx, platform_rx) = crossbeam_channel::unbounded();
        let registration = session.host.register(platform_tx);
        session.lifecycle.lock().registration = Some(registration);

        let weak = Arc::downgrade(&session);
        let spawned = thread::Builder::new()
            .name("nanos-platform".to_string())
            .spawn(move || platform_pump(weak, platform_rx));
        if let Err(e) = spawned {
            session.destroy();
            return Err(LinkError::Io(e));
        }

        Ok(session)
    }

    /// Look for a matching device and start connecting to it.
    ///
    /// Idempotent while ready. Permission is requested at most once per
    /// attempt; the answer arrives asynchronously and completes the
    /// connection on the platform thread.
    pub fn search(&self) -> LinkResult<SearchOutcome> {
        self.search_inner(true)
    }

    /// Like [`search`](Self::search), but a session whose permission request
    /// was denied stays denied instead of prompting again.
    pub fn search_unless_denied(&self) -> LinkResult<SearchOutcome> {
        self.search_inner(false)
    }

    fn search_inner(&self, retry_denied: bool) -> LinkResult<SearchOutcome> {
        let mut lc = self.lifecycle.lock();
        if lc.destroyed {
            return Err(LinkError::SessionDestroyed);
        }
        match lc.state {
            LinkState::Ready => return Ok(SearchOutcome::AlreadyReady),
            LinkState::PermissionPending => return Ok(SearchOutcome::PermissionPending),
            LinkState::Error(LifecycleErrorCode::PermissionDenied) if !retry_denied => {
                return Ok(SearchOutcome::PermissionDenied)
            }
            _ => {}
        }

        let Some(device) = self.find_device() else {
            trace!("no matching device attached");
            lc.transition(LinkState::Disconnected);
            return Ok(SearchOutcome::NotFound);
        };

        debug!(device = device.id, "found device");
        lc.transition(LinkState::Discovering);
        lc.device = Some(device.clone());

        if self.host.has_permission(&device) {
            lc.transition(LinkState::PermissionGranted);
            self.connect(&mut lc, &device)?;
            return Ok(SearchOutcome::Ready);
        }

        lc.transition(LinkState::PermissionPending);
        if let Err(e) = self.host.request_permission(&device) {
            warn!(device = device.id, error = %e, "permission request failed");
            lc.device = None;
            lc.transition(LinkState::Disconnected);
            return Err(LinkError::Io(e));
        }
        Ok(SearchOutcome::PermissionPending)
    }

    /// Release the device and return to `Disconnected`.
    ///
    /// Fires [`DeviceEvent::Disconnected`] if the session was ready. The session
    /// stays subscribed and may `search()` again.
    pub fn disconnect(&self) {
        let mut lc = self.lifecycle.lock();
        if lc.teardown() {
            info!("device disconnected");
            lc.emit(DeviceEvent::Disconnected);
        }
    }

    /// Tear the session down for good. Idempotent.
    ///
    /// No events are delivered afterwards.
    pub fn destroy(&self) {
        let mut lc = self.lifecycle.lock();
        if lc.destroyed {
            return;
        }
        lc.destroyed = true;
        if lc.teardown() {
            lc.emit(DeviceEvent::Disconnected);
        }
        lc.events = None;
        let registration = lc.registration.take();
        drop(lc);

        if let Some(id) = registration {
            self.host.unregister(id);
        }
        debug!("session destroyed");
    }

    /// Subscribe to lifecycle events, replacing any previous subscriber.
    pub fn subscribe(&self) -> Receiver<DeviceEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut lc = self.lifecycle.lock();
        if !lc.destroyed {
            lc.events = Some(tx);
        }
        rx
    }

    pub fn state(&self) -> LinkState {
        self.lifecycle.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == LinkState::Ready
    }

    pub fn permission_granted(&self) -> bool {
        matches!(
            self.state(),
            LinkState::PermissionGranted | LinkState::Ready
        )
    }

    pub fn permission_request_in_flight(&self) -> bool {
        self.state() == LinkState::PermissionPending
    }

    pub fn is_destroyed(&self) -> bool {
        self.lifecycle.lock().destroyed
    }

    /// Whether a matching device is attached, regardless of session state.
    pub fn is_connected(&self) -> bool {
        self.find_device().is_some()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// The transport of a ready session.
    pub fn transport(&self) -> LinkResult<Arc<ChunkedTransport>> {
        let lc = self.lifecycle.lock();
        if lc.destroyed {
            return Err(LinkError::SessionDestroyed);
        }
        lc.transport.clone().ok_or(LinkError::NotConnected)
    }

    /// One raw read from the device.
    pub fn read(&self) -> LinkResult<Vec<u8>> {
        self.transport()?.read()
    }

    /// One raw write to the device.
    pub fn write(&self, data: &[u8]) -> LinkResult<usize> {
        self.transport()?.write(data)
    }

    fn find_device(&self) -> Option<DeviceDescriptor> {
        self.host.devices().into_iter().find(|d| {
            d.matches(
                self.config.vendor_id,
                self.config.product_id,
                self.config.interface_count,
            )
        })
    }

    fn connect(&self, lc: &mut Lifecycle, device: &DeviceDescriptor) -> LinkResult<()> {
        match self.open_transport(device) {
            Ok(transport) => {
                lc.transport = Some(Arc::new(transport));
                lc.transition(LinkState::Ready);
                info!(device = device.id, "device ready");
                lc.emit(DeviceEvent::DeviceReady);
                Ok(())
            }
            Err((code, cause)) => {
                warn!(device = device.id, %code, %cause, "connection attempt failed");
                lc.device = None;
                lc.transition(LinkState::Error(code));
                lc.emit(DeviceEvent::Error { code, cause });
                Err(LinkError::Lifecycle(code))
            }
        }
    }

    fn open_transport(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<ChunkedTransport, (LifecycleErrorCode, String)> {
        let interface = device.hid_interface().ok_or_else(|| {
            (
                LifecycleErrorCode::NoHidInterface,
                "device exposes no HID interface".to_string(),
            )
        })?;
        let endpoint_out = interface.endpoint(Direction::Out).ok_or_else(|| {
            (
                LifecycleErrorCode::NoOutputs,
                "HID interface has no OUT endpoint".to_string(),
            )
        })?;
        let endpoint_in = interface.endpoint(Direction::In).ok_or_else(|| {
            (
                LifecycleErrorCode::NoInputs,
                "HID interface has no IN endpoint".to_string(),
            )
        })?;

        let mut connection = self
            .host
            .open(device)
            .map_err(|e| (LifecycleErrorCode::CantOpenDevice, e.to_string()))?;
        if let Err(e) = connection.claim_interface(interface.number, true) {
            connection.close();
            return Err((LifecycleErrorCode::NoConnection, e.to_string()));
        }

        debug!(
            interface = interface.number,
            endpoint_in = endpoint_in.address,
            endpoint_out = endpoint_out.address,
            "claimed interface"
        );
        Ok(ChunkedTransport::new(
            connection,
            interface.number,
            endpoint_in,
            endpoint_out,
            self.config.transfer_timeout(),
            self.config.read_buffer_size,
        ))
    }

    fn handle_platform_event(&self, event: PlatformEvent) {
        let mut lc = self.lifecycle.lock();
        if lc.destroyed {
            return;
        }

        match event {
            PlatformEvent::PermissionResult { device, granted } => {
                if lc.state != LinkState::PermissionPending || lc.device_id() != Some(device) {
                    debug!(device, "ignoring unsolicited permission result");
                    return;
                }
                if granted {
                    lc.transition(LinkState::PermissionGranted);
                    if let Some(descriptor) = lc.device.clone() {
                        if let Err(e) = self.connect(&mut lc, &descriptor) {
                            trace!(device, error = %e, "connect after grant failed");
                        }
                    }
                } else {
                    warn!(device, "permission denied");
                    lc.device = None;
                    lc.transition(LinkState::Error(LifecycleErrorCode::PermissionDenied));
                    lc.emit(DeviceEvent::Error {
                        code: LifecycleErrorCode::PermissionDenied,
                        cause: "permission denied".to_string(),
                    });
                }
            }
            PlatformEvent::Detached { device } => {
                if lc.device_id() != Some(device) {
                    return;
                }
                info!(device, "device detached");
                if lc.teardown() {
                    lc.emit(DeviceEvent::Disconnected);
                }
            }
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lc = self.lifecycle.lock();
        f.debug_struct("DeviceSession")
            .field("state", &lc.state)
            .field("device", &lc.device_id())
            .field("destroyed", &lc.destroyed)
            .finish()
    }
}

fn platform_pump(weak: Weak<DeviceSession>, events: Receiver<PlatformEvent>) {
    for event in events.iter() {
        let Some(session) = weak.upgrade() else {
            break;
        };
        trace!(?event, "platform event");
        session.handle_platform_event(event);
    }
    trace!("platform event pump exiting");
}
