//! Shared helpers for the link integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use nanos_link::{DeviceListener, DeviceSession, LifecycleErrorCode, LinkConfig};
use nanos_sim::{PermissionPolicy, Simulator, SimulatorConfig};
use parking_lot::Mutex;

/// Short timeouts so failure paths finish quickly.
pub fn fast_config() -> LinkConfig {
    LinkConfig::default()
        .with_transfer_timeout(Duration::from_millis(10))
        .with_read_wait_cycles(3)
        .with_poll_interval(Duration::from_millis(10))
}

pub fn simulator(permission: PermissionPolicy) -> Simulator {
    Simulator::start(&SimulatorConfig {
        permission,
        ..Default::default()
    })
}

/// Poll `condition` until it holds or two seconds pass.
pub fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// A session on `sim` that has completed the connection handshake.
pub fn ready_session(sim: &Simulator) -> Arc<DeviceSession> {
    let session = DeviceSession::new(sim.host.clone(), fast_config()).expect("session");
    session.search().expect("search");
    assert!(wait_for(|| session.is_ready()), "session never became ready");
    session
}

/// Listener that records every callback as a string.
#[derive(Clone, Default)]
pub struct Recorder(pub Arc<Mutex<Vec<String>>>);

impl Recorder {
    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.0.lock().iter().filter(|e| e.as_str() == name).count()
    }
}

impl DeviceListener for Recorder {
    fn on_device_ready(&mut self) {
        self.0.lock().push("ready".to_string());
    }

    fn on_disconnected(&mut self) {
        self.0.lock().push("disconnected".to_string());
    }

    fn on_error(&mut self, code: LifecycleErrorCode, _cause: &str) {
        self.0.lock().push(format!("error:{}", code.as_str()));
    }
}
