//! Error types for the host link.

use nanos_apdu::{FrameError, StatusCode};
use thiserror::Error;

/// Lifecycle failures reported through [`DeviceEvent::Error`](crate::DeviceEvent::Error).
///
/// Each one ends the current connection attempt; the caller retries with
/// [`DeviceSession::search`](crate::DeviceSession::search).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleErrorCode {
    /// The platform refused access to the device.
    PermissionDenied,
    /// The HID interface has no OUT endpoint.
    NoOutputs,
    /// The device could not be opened.
    CantOpenDevice,
    /// The interface could not be claimed on the opened connection.
    NoConnection,
    /// The device exposes no HID interface.
    NoHidInterface,
    /// The HID interface has no IN endpoint.
    NoInputs,
}

impl LifecycleErrorCode {
    /// Numeric code of this error.
    pub const fn code(&self) -> u16 {
        match self {
            LifecycleErrorCode::PermissionDenied => 0x100,
            LifecycleErrorCode::NoOutputs => 0x101,
            LifecycleErrorCode::CantOpenDevice => 0x102,
            LifecycleErrorCode::NoConnection => 0x103,
            LifecycleErrorCode::NoHidInterface => 0x104,
            LifecycleErrorCode::NoInputs => 0x105,
        }
    }

    /// Name used in logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            LifecycleErrorCode::PermissionDenied => "PermissionDenied",
            LifecycleErrorCode::NoOutputs => "NoOutputs",
            LifecycleErrorCode::CantOpenDevice => "CantOpenDevice",
            LifecycleErrorCode::NoConnection => "NoConnection",
            LifecycleErrorCode::NoHidInterface => "NoHidInterface",
            LifecycleErrorCode::NoInputs => "NoInputs",
        }
    }
}

impl std::fmt::Display for LifecycleErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[0x{:04x}] {}", self.code(), self.as_str())
    }
}

/// Errors raised by the transport, lifecycle and exchange layers.
#[derive(Error, Debug)]
pub enum LinkError {
    /// Malformed frame in either direction.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// No device session is ready.
    #[error("device not connected")]
    NotConnected,

    /// A bulk transfer moved no bytes or the connection is gone.
    #[error("connection lost")]
    ConnectionLost,

    /// No response arrived within the read wait limit.
    #[error("no response after {cycles} read cycles")]
    ReadTimeout {
        /// Empty reads performed before giving up.
        cycles: u32,
    },

    /// Any other I/O failure from the platform.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection setup failed.
    #[error("lifecycle error: {0}")]
    Lifecycle(LifecycleErrorCode),

    /// The session was destroyed.
    #[error("session destroyed")]
    SessionDestroyed,
}

impl LinkError {
    /// The host-synthesized status describing this error.
    pub fn status(&self) -> StatusCode {
        match self {
            LinkError::Frame(_) => StatusCode::InvalidResponse,
            LinkError::NotConnected | LinkError::ConnectionLost => StatusCode::ConnectionLost,
            LinkError::ReadTimeout { .. } => StatusCode::ReadTimeout,
            LinkError::Io(_) => StatusCode::CommonIOError,
            LinkError::Lifecycle(_) => StatusCode::DeviceError,
            LinkError::SessionDestroyed => StatusCode::ConnectionLost,
        }
    }
}

/// Result type alias for link operations.
pub type LinkResult<T> = Result<T, LinkError>;

/// Errors raised by the typed signer commands.
#[derive(Error, Debug)]
pub enum SignerError {
    /// The hash to sign is not 32 bytes long. Raised before any I/O.
    #[error("hash must be 32 bytes, got {0}")]
    InvalidHashLength(usize),

    /// The device answered with a non-Ok status or without data.
    #[error("device responded {status} ({} bytes)", data.len())]
    Response {
        /// Reported status.
        status: StatusCode,
        /// Raw response data.
        data: Vec<u8>,
    },

    /// The response is too short for the expected value.
    #[error("malformed response {status} ({} bytes)", data.len())]
    Malformed {
        /// Always [`StatusCode::InvalidResponse`].
        status: StatusCode,
        /// Raw response data.
        data: Vec<u8>,
    },

    /// The exchange itself failed.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// The operation was canceled before a result was delivered.
    #[error("operation canceled")]
    Canceled,
}

impl SignerError {
    /// Status code carried by this error.
    pub fn status(&self) -> StatusCode {
        match self {
            SignerError::InvalidHashLength(_) => StatusCode::InvalidParameter,
            SignerError::Response { status, .. } | SignerError::Malformed { status, .. } => *status,
            SignerError::Link(err) => err.status(),
            SignerError::Canceled => StatusCode::Canceled,
        }
    }

    /// Raw response bytes, empty when none were received.
    pub fn data(&self) -> &[u8] {
        match self {
            SignerError::Response { data, .. } | SignerError::Malformed { data, .. } => data,
            _ => &[],
        }
    }
}

/// Result type alias for typed signer commands.
pub type SignerResult<T> = Result<T, SignerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_codes() {
        assert_eq!(LifecycleErrorCode::PermissionDenied.code(), 0x100);
        assert_eq!(LifecycleErrorCode::NoOutputs.code(), 0x101);
        assert_eq!(LifecycleErrorCode::CantOpenDevice.code(), 0x102);
        assert_eq!(LifecycleErrorCode::NoConnection.code(), 0x103);
        assert_eq!(
            LifecycleErrorCode::PermissionDenied.to_string(),
            "[0x0100] PermissionDenied"
        );
    }

    #[test]
    fn test_link_error_status() {
        assert_eq!(
            LinkError::Frame(FrameError::InvalidChannel(0x0202)).status(),
            StatusCode::InvalidResponse
        );
        assert_eq!(LinkError::ConnectionLost.status(), StatusCode::ConnectionLost);
        assert_eq!(LinkError::NotConnected.status(), StatusCode::ConnectionLost);
        assert_eq!(
            LinkError::ReadTimeout { cycles: 60 }.status(),
            StatusCode::ReadTimeout
        );
        assert_eq!(
            LinkError::Io(std::io::Error::other("boom")).status(),
            StatusCode::CommonIOError
        );
        assert_eq!(
            LinkError::Lifecycle(LifecycleErrorCode::NoOutputs).status(),
            StatusCode::DeviceError
        );
    }

    #[test]
    fn test_signer_error_accessors() {
        let err = SignerError::Response {
            status: StatusCode::UserRejected,
            data: vec![0x01],
        };
        assert_eq!(err.status(), StatusCode::UserRejected);
        assert_eq!(err.data(), &[0x01]);

        let err = SignerError::from(LinkError::ReadTimeout { cycles: 3 });
        assert_eq!(err.status(), StatusCode::ReadTimeout);
        assert!(err.data().is_empty());

        assert_eq!(SignerError::Canceled.status(), StatusCode::Canceled);
    }
}
