//! Interfaces to the host USB stack.
//!
//! Enumeration, permission prompts and raw bulk transfers belong to the
//! platform. The link only sees these traits, so any USB backend (or the
//! in-memory simulator) can drive it.

use std::io;
use std::time::Duration;

use crossbeam_channel::Sender;

/// USB interface class of a HID interface.
pub const HID_CLASS: u8 = 0x03;

/// Opaque identifier of an attached device, stable while it stays attached.
pub type DeviceId = u64;

/// Identifies an event subscription with the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(pub u64);

/// Transfer direction of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device to host.
    In,
    /// Host to device.
    Out,
}

/// A bulk or interrupt endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub address: u8,
    pub direction: Direction,
    pub max_packet_size: usize,
}

/// One interface of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub class: u8,
    pub endpoints: Vec<EndpointDescriptor>,
}

impl InterfaceDescriptor {
    /// First endpoint with the given direction.
    pub fn endpoint(&self, direction: Direction) -> Option<EndpointDescriptor> {
        self.endpoints
            .iter()
            .copied()
            .find(|ep| ep.direction == direction)
    }
}

/// An attached device as reported by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub vendor_id: u16,
    pub product_id: u16,
    pub interfaces: Vec<InterfaceDescriptor>,
}

impl DeviceDescriptor {
    /// Whether this device has the given ids and exactly `interface_count` interfaces.
    pub fn matches(&self, vendor_id: u16, product_id: u16, interface_count: usize) -> bool {
        self.vendor_id == vendor_id
            && self.product_id == product_id
            && self.interfaces.len() == interface_count
    }

    /// The first interface with the HID class.
    pub fn hid_interface(&self) -> Option<&InterfaceDescriptor> {
        self.interfaces.iter().find(|i| i.class == HID_CLASS)
    }
}

/// Asynchronous notifications from the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    /// Answer to a [`UsbHost::request_permission`] call.
    PermissionResult { device: DeviceId, granted: bool },
    /// The device was unplugged.
    Detached { device: DeviceId },
}

/// Enumeration, permission and connection provider.
pub trait UsbHost: Send + Sync {
    /// Currently attached devices.
    fn devices(&self) -> Vec<DeviceDescriptor>;

    /// Whether the application may already open `device`.
    fn has_permission(&self, device: &DeviceDescriptor) -> bool;

    /// Ask for access to `device`. The answer arrives later as a
    /// [`PlatformEvent::PermissionResult`].
    fn request_permission(&self, device: &DeviceDescriptor) -> io::Result<()>;

    /// Open a connection to `device`.
    fn open(&self, device: &DeviceDescriptor) -> io::Result<Box<dyn UsbConnection>>;

    /// Subscribe to platform events. The platform drops `events` on unregister.
    fn register(&self, events: Sender<PlatformEvent>) -> RegistrationId;

    /// Cancel a subscription.
    fn unregister(&self, id: RegistrationId);
}

/// An open connection to one device.
///
/// Bulk transfers return the number of bytes moved. A read that expires
/// returns `Ok(0)` or an error of kind [`io::ErrorKind::TimedOut`].
pub trait UsbConnection: Send {
    fn claim_interface(&mut self, interface: u8, force: bool) -> io::Result<()>;

    fn release_interface(&mut self, interface: u8) -> io::Result<()>;

    fn bulk_out(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> io::Result<usize>;

    fn bulk_in(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(interfaces: usize) -> DeviceDescriptor {
        DeviceDescriptor {
            id: 1,
            vendor_id: 0x2c97,
            product_id: 0x0001,
            interfaces: (0..interfaces)
                .map(|n| InterfaceDescriptor {
                    number: n as u8,
                    class: HID_CLASS,
                    endpoints: vec![],
                })
                .collect(),
        }
    }

    #[test]
    fn test_matching_requires_exact_interface_count() {
        assert!(device(1).matches(0x2c97, 0x0001, 1));
        assert!(!device(2).matches(0x2c97, 0x0001, 1));
        assert!(!device(1).matches(0x2c97, 0x0002, 1));
    }

    #[test]
    fn test_endpoint_lookup() {
        let iface = InterfaceDescriptor {
            number: 0,
            class: HID_CLASS,
            endpoints: vec![
                EndpointDescriptor {
                    address: 0x82,
                    direction: Direction::In,
                    max_packet_size: 64,
                },
                EndpointDescriptor {
                    address: 0x02,
                    direction: Direction::Out,
                    max_packet_size: 64,
                },
            ],
        };
        assert_eq!(iface.endpoint(Direction::Out).map(|e| e.address), Some(0x02));
        assert_eq!(iface.endpoint(Direction::In).map(|e| e.address), Some(0x82));
    }
}
