//! Responses decoded from the device.

use crate::constants::*;
use crate::error::{FrameError, FrameResult};
use crate::status::StatusCode;

/// Outcome of a single command/response exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeResult {
    /// Status reported by the device.
    pub status: StatusCode,
    /// Response data, without length prefix or status word.
    pub data: Vec<u8>,
}

impl ExchangeResult {
    /// Create a result.
    pub fn new(status: StatusCode, data: Vec<u8>) -> Self {
        ExchangeResult { status, data }
    }

    /// Create a result carrying only a status.
    pub fn status_only(status: StatusCode) -> Self {
        ExchangeResult {
            status,
            data: Vec::new(),
        }
    }

    /// Decode a reassembled body `[n:2][data:n][status:2]`.
    pub fn from_body(body: &[u8]) -> FrameResult<Self> {
        if body.len() < 2 {
            return Ok(ExchangeResult::status_only(StatusCode::Unknown));
        }

        let n = u16::from_be_bytes([body[0], body[1]]) as usize;
        if body.len() < n + 4 {
            return Err(FrameError::Truncated {
                expected: n + 4,
                actual: body.len(),
            });
        }

        let status = u16::from_be_bytes([body[n + 2], body[n + 3]]);
        Ok(ExchangeResult {
            status: StatusCode::from_code(status),
            data: body[2..2 + n].to_vec(),
        })
    }

    /// Whether the device reported success.
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

/// Application version reported by `GetVersion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Patch version.
    pub patch: u8,
}

impl Version {
    /// Decode the first three response bytes.
    pub fn decode(data: &[u8]) -> FrameResult<Self> {
        match data {
            [major, minor, patch, ..] => Ok(Version {
                major: *major,
                minor: *minor,
                patch: *patch,
            }),
            _ => Err(FrameError::Truncated {
                expected: 3,
                actual: data.len(),
            }),
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A derived account address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    /// Textual prefix of an address.
    pub const PREFIX: &'static str = "Mx";

    /// Wrap raw address bytes.
    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Address(bytes)
    }

    /// Decode a response body, which must be exactly one address long.
    pub fn decode(data: &[u8]) -> FrameResult<Self> {
        let bytes: [u8; ADDRESS_SIZE] = data.try_into().map_err(|_| FrameError::Truncated {
            expected: ADDRESS_SIZE,
            actual: data.len(),
        })?;
        Ok(Address(bytes))
    }

    /// The raw address bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", Self::PREFIX, hex::encode(self.0))
    }
}

/// A recoverable ECDSA signature over a transaction hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// `r` component.
    pub r: [u8; 32],
    /// `s` component.
    pub s: [u8; 32],
    /// Recovery id.
    pub v: u8,
}

impl Signature {
    /// Decode `r = data[0..32]`, `s = data[32..64]`, `v = data[64]`.
    pub fn decode(data: &[u8]) -> FrameResult<Self> {
        if data.len() < SIGNATURE_SIZE {
            return Err(FrameError::Truncated {
                expected: SIGNATURE_SIZE,
                actual: data.len(),
            });
        }

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&data[0..32]);
        s.copy_from_slice(&data[32..64]);
        Ok(Signature { r, s, v: data[64] })
    }

    /// Serialize as `r || s || v`.
    pub fn to_bytes(&self) -> [u8; SIGNATURE_SIZE] {
        let mut out = [0u8; SIGNATURE_SIZE];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.v;
        out
    }
}
