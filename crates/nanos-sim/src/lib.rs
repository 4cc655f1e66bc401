//! Simulated hardware signer.
//!
//! [`SimHost`] implements the link's [`UsbHost`](nanos_link::UsbHost) in memory
//! and [`SecureElement`] answers commands the way the signing application does,
//! so the full stack runs without hardware.
//!
//! # Example
//!
//! ```rust,ignore
//! use nanos_sim::{Simulator, SimulatorConfig};
//!
//! let sim = Simulator::start(&SimulatorConfig::default());
//! let session = nanos_link::DeviceSession::new(sim.host.clone(), Default::default())?;
//! ```

mod firmware;
mod host;

pub use firmware::*;
pub use host::*;

use std::sync::Arc;

use nanos_link::DeviceId;
use serde::{Deserialize, Serialize};

/// Options for a simulated device, as read from the `simulator:` config section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub firmware: FirmwareConfig,
    pub permission: PermissionPolicy,
    pub faults: Faults,
}

/// A host with one attached device.
pub struct Simulator {
    pub host: Arc<SimHost>,
    pub firmware: Arc<SecureElement>,
    pub device: DeviceId,
}

impl Simulator {
    /// Attach a default-shaped device configured by `config`.
    pub fn start(config: &SimulatorConfig) -> Self {
        Self::start_with_profile(config, DeviceProfile::nano())
    }

    pub fn start_with_profile(config: &SimulatorConfig, profile: DeviceProfile) -> Self {
        let host = Arc::new(SimHost::new(config.permission));
        let firmware = Arc::new(SecureElement::new(config.firmware.clone()));
        firmware.set_faults(config.faults);
        let device = host.attach(profile, firmware.clone());
        Simulator {
            host,
            firmware,
            device,
        }
    }
}
