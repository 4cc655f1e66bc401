//! Status codes reported by the device or synthesized by the host.

use crate::constants::*;

/// Outcome of an exchange.
///
/// The first three values are status words sent by the device. The rest never
/// appear on the wire: the host uses them to describe transport and protocol
/// failures with the same vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Command completed (`0x9000`).
    Ok,
    /// The user declined on the device (`0x6985`).
    UserRejected,
    /// The device refused a parameter (`0x6B01`).
    InvalidParameter,
    /// Unrecognized status word or undecodable response.
    Unknown,
    /// The USB connection dropped.
    ConnectionLost,
    /// The device answered without data.
    EmptyResponse,
    /// The response framing was malformed.
    InvalidResponse,
    /// No response within the read wait limit.
    ReadTimeout,
    /// Any other I/O failure.
    CommonIOError,
    /// The device could not be set up.
    DeviceError,
    /// The caller gave up on the operation.
    Canceled,
}

impl StatusCode {
    /// Every status, in declaration order.
    pub const ALL: [StatusCode; 11] = [
        StatusCode::Ok,
        StatusCode::UserRejected,
        StatusCode::InvalidParameter,
        StatusCode::Unknown,
        StatusCode::ConnectionLost,
        StatusCode::EmptyResponse,
        StatusCode::InvalidResponse,
        StatusCode::ReadTimeout,
        StatusCode::CommonIOError,
        StatusCode::DeviceError,
        StatusCode::Canceled,
    ];

    /// Numeric code of this status.
    pub const fn code(&self) -> u16 {
        match self {
            StatusCode::Ok => SW_OK,
            StatusCode::UserRejected => SW_USER_REJECTED,
            StatusCode::InvalidParameter => SW_INVALID_PARAMETER,
            StatusCode::Unknown => 0xFF00,
            StatusCode::ConnectionLost => 0xFF01,
            StatusCode::EmptyResponse => 0xFF02,
            StatusCode::InvalidResponse => 0xFF03,
            StatusCode::ReadTimeout => 0xFF04,
            StatusCode::CommonIOError => 0xFF05,
            StatusCode::DeviceError => 0xFF06,
            StatusCode::Canceled => 0xFF07,
        }
    }

    /// Look up a status by its numeric code, falling back to [`StatusCode::Unknown`].
    pub fn from_code(code: u16) -> Self {
        StatusCode::ALL
            .iter()
            .copied()
            .find(|s| s.code() == code)
            .unwrap_or(StatusCode::Unknown)
    }

    /// Whether the device reported success.
    pub const fn is_ok(&self) -> bool {
        matches!(self, StatusCode::Ok)
    }

    /// Name of the status.
    pub const fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Ok => "Ok",
            StatusCode::UserRejected => "UserRejected",
            StatusCode::InvalidParameter => "InvalidParameter",
            StatusCode::Unknown => "Unknown",
            StatusCode::ConnectionLost => "ConnectionLost",
            StatusCode::EmptyResponse => "EmptyResponse",
            StatusCode::InvalidResponse => "InvalidResponse",
            StatusCode::ReadTimeout => "ReadTimeout",
            StatusCode::CommonIOError => "CommonIOError",
            StatusCode::DeviceError => "DeviceError",
            StatusCode::Canceled => "Canceled",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[0x{:04x}] {}", self.code(), self.as_str())
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode::from_code(code)
    }
}

impl From<StatusCode> for u16 {
    fn from(status: StatusCode) -> Self {
        status.code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_status_words() {
        assert_eq!(StatusCode::from_code(0x9000), StatusCode::Ok);
        assert_eq!(StatusCode::from_code(0x6985), StatusCode::UserRejected);
        assert_eq!(StatusCode::from_code(0x6B01), StatusCode::InvalidParameter);
    }

    #[test]
    fn test_unknown_code_falls_back() {
        assert_eq!(StatusCode::from_code(0x6E00), StatusCode::Unknown);
        assert_eq!(StatusCode::from_code(0x0000), StatusCode::Unknown);
    }

    #[test]
    fn test_codes_are_unique() {
        for status in StatusCode::ALL {
            assert_eq!(StatusCode::from_code(status.code()), status);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(StatusCode::UserRejected.to_string(), "[0x6985] UserRejected");
        assert_eq!(StatusCode::ReadTimeout.to_string(), "[0xff04] ReadTimeout");
    }
}
