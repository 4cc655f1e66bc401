//! Runner for the `nanos` command-line tool.
//!
//! Loads a YAML configuration, brings up a simulated device, connects to it
//! through the link stack and executes one request.

use std::path::Path;
use std::time::Duration;

use nanos_link::{
    AsyncSigner, DeviceEvent, DeviceSession, LifecycleErrorCode, LinkConfig, LinkError,
    SignerError,
};
use nanos_sim::{Simulator, SimulatorConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// How long to wait for the connection handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur while running a request.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid hash: {0}")]
    InvalidHash(#[from] hex::FromHexError),

    #[error("device setup failed: {code} ({cause})")]
    Setup {
        code: LifecycleErrorCode,
        cause: String,
    },

    #[error("device not ready after {0:?}")]
    NotReady(Duration),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Signer(#[from] SignerError),
}

// ============================================================================
// Configuration
// ============================================================================

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub link: LinkConfig,
    pub simulator: SimulatorConfig,
}

impl RunnerConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, RunnerError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RunnerError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }
}

// ============================================================================
// Requests
// ============================================================================

/// One operation against the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Version,
    Address { index: u32, silent: bool },
    Sign { index: u32, hash: Vec<u8> },
}

impl Request {
    /// Build a signing request from a hex-encoded hash.
    pub fn sign_hex(index: u32, hash: &str) -> Result<Self, RunnerError> {
        let hash = hex::decode(hash.trim_start_matches("0x"))?;
        Ok(Request::Sign { index, hash })
    }
}

/// Result of a request, printable as text or JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Output {
    Version {
        version: String,
    },
    Address {
        index: u32,
        address: String,
    },
    Signature {
        index: u32,
        r: String,
        s: String,
        v: u8,
    },
}

impl std::fmt::Display for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Output::Version { version } => write!(f, "{version}"),
            Output::Address { address, .. } => write!(f, "{address}"),
            Output::Signature { r, s, v, .. } => write!(f, "r={r}\ns={s}\nv={v}"),
        }
    }
}

// ============================================================================
// Execution
// ============================================================================

/// A simulated device with a connected signer.
pub struct Connected {
    pub signer: AsyncSigner,
    pub simulator: Simulator,
}

/// Start the simulator and wait until the link is ready.
pub fn connect(config: &RunnerConfig) -> Result<Connected, RunnerError> {
    let simulator = Simulator::start(&config.simulator);
    let session = DeviceSession::new(simulator.host.clone(), config.link.clone())?;
    let events = session.subscribe();
    let signer = AsyncSigner::new(session)?;
    signer.start_discovery()?;

    let deadline = std::time::Instant::now() + CONNECT_TIMEOUT;
    while !signer.is_ready() {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        match events.recv_timeout(remaining) {
            Ok(DeviceEvent::DeviceReady) => break,
            Ok(DeviceEvent::Error { code, cause }) => {
                signer.stop_discovery();
                return Err(RunnerError::Setup { code, cause });
            }
            Ok(event) => debug!(?event, "ignoring event while connecting"),
            Err(_) => return Err(RunnerError::NotReady(CONNECT_TIMEOUT)),
        }
    }

    info!("device ready");
    Ok(Connected { signer, simulator })
}

/// Run one request to completion.
pub fn execute(signer: &AsyncSigner, request: &Request) -> Result<Output, RunnerError> {
    let output = match request {
        Request::Version => Output::Version {
            version: signer.get_version().wait()?.to_string(),
        },
        Request::Address { index, silent } => Output::Address {
            index: *index,
            address: signer.get_address_at(*index, *silent).wait()?.to_string(),
        },
        Request::Sign { index, hash } => {
            let signature = signer.sign_tx_hash_at(*index, hash.clone()).wait()?;
            Output::Signature {
                index: *index,
                r: hex::encode(signature.r),
                s: hex::encode(signature.s),
                v: signature.v,
            }
        }
    };
    Ok(output)
}
