//! Host-side link to a USB HID signing device.
//!
//! The stack, from the wire up:
//!
//! - [`ChunkedTransport`]: serialized bulk reads and writes on a claimed interface.
//! - [`DeviceSession`]: discovery, permission negotiation, interface claiming and
//!   detach handling, reported as [`DeviceEvent`]s.
//! - [`HardwareSigner`]: command/response exchanges and the typed commands
//!   (version, address, signature).
//! - [`AsyncSigner`]: cancellable background execution plus the discovery poll loop.
//!
//! The host USB stack is reached only through the [`UsbHost`] and
//! [`UsbConnection`] traits.
//!
//! # Example
//!
//! ```rust,ignore
//! use nanos_link::{DeviceSession, HardwareSigner, LinkConfig};
//!
//! let session = DeviceSession::new(host, LinkConfig::default())?;
//! session.search()?;
//! // ... wait for DeviceEvent::DeviceReady ...
//! let signer = HardwareSigner::new(session);
//! println!("app version {}", signer.get_version()?);
//! ```

mod config;
mod error;
mod facade;
mod platform;
mod session;
mod signer;
mod transport;

pub use config::*;
pub use error::*;
pub use facade::*;
pub use platform::*;
pub use session::*;
pub use signer::*;
pub use transport::*;

pub use nanos_apdu::{Address, Command, ExchangeResult, Signature, StatusCode, Version};
