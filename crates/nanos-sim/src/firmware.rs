//! Simulated secure element application.
//!
//! Answers the four signer commands with outputs derived from a seed, so the
//! same seed always yields the same addresses and signatures.

use nanos_apdu::{
    Address, ApduCommand, Command, OutboundFrame, ResponseFrames, Signature, ADDRESS_SIZE,
    APDU_CLASS, CHANNEL_ID, DERIVE_INDEX_SIZE, FRAME_SIZE, HASH_SIZE, SW_INVALID_PARAMETER,
    SW_OK, SW_USER_REJECTED,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

/// Status word for an unsupported class byte.
const SW_CLASS_NOT_SUPPORTED: u16 = 0x6E00;

/// Identity of the simulated device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareConfig {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    /// Key material for address and signature derivation.
    pub seed: String,
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        FirmwareConfig {
            major: 1,
            minor: 0,
            patch: 3,
            seed: "nanos-sim".to_string(),
        }
    }
}

/// Misbehaviors the device can be told to exhibit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Faults {
    /// Answer every signing request with "user rejected".
    pub reject_signing: bool,
    /// Send responses on a foreign channel id.
    pub corrupt_channel: bool,
    /// Swallow commands without answering.
    pub silent: bool,
    /// Accept no bytes on the OUT endpoint.
    pub fail_writes: bool,
    /// Hold each response back this long before it reaches the IN endpoint.
    pub response_delay_ms: u64,
}

/// The signing application running on a simulated device.
#[derive(Debug)]
pub struct SecureElement {
    config: FirmwareConfig,
    faults: Mutex<Faults>,
    received: Mutex<Vec<ApduCommand>>,
}

impl SecureElement {
    pub fn new(config: FirmwareConfig) -> Self {
        SecureElement {
            config,
            faults: Mutex::new(Faults::default()),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &FirmwareConfig {
        &self.config
    }

    pub fn faults(&self) -> Faults {
        *self.faults.lock()
    }

    pub fn set_faults(&self, faults: Faults) {
        *self.faults.lock() = faults;
    }

    /// Commands decoded so far, oldest first.
    pub fn received(&self) -> Vec<ApduCommand> {
        self.received.lock().clone()
    }

    /// The address this device derives at `index`.
    pub fn address(&self, index: u32) -> Address {
        let digest = self.digest(b"address", index, &[]);
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes.copy_from_slice(&digest[..ADDRESS_SIZE]);
        Address::new(bytes)
    }

    /// The signature this device produces for `hash` at `index`.
    pub fn signature(&self, index: u32, hash: &[u8]) -> Signature {
        let r = self.digest(b"r", index, hash);
        let s = self.digest(b"s", index, hash);
        Signature {
            r,
            s,
            v: 27 + (r[31] & 1),
        }
    }

    fn digest(&self, domain: &[u8], index: u32, extra: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.config.seed.as_bytes());
        hasher.update(domain);
        hasher.update(index.to_be_bytes());
        hasher.update(extra);
        hasher.finalize().into()
    }

    /// Process one command frame and return the response frames, if any.
    pub fn handle_frame(&self, frame: &[u8]) -> Vec<[u8; FRAME_SIZE]> {
        let faults = self.faults();

        let (data, status) = match OutboundFrame::decode(frame) {
            Ok(apdu) => {
                trace!(ins = apdu.instruction, len = apdu.payload.len(), "apdu received");
                let reply = self.respond(&apdu, &faults);
                self.received.lock().push(apdu);
                reply
            }
            Err(e) => {
                debug!(error = %e, "undecodable command frame");
                (Vec::new(), SW_INVALID_PARAMETER)
            }
        };

        if faults.silent {
            debug!("silent fault: dropping response");
            return Vec::new();
        }

        let mut frames = ResponseFrames::encode(&data, status).unwrap_or_default();
        if faults.corrupt_channel {
            let corrupted = (CHANNEL_ID ^ 0x0300).to_be_bytes();
            for frame in &mut frames {
                frame[..2].copy_from_slice(&corrupted);
            }
        }
        frames
    }

    fn respond(&self, apdu: &ApduCommand, faults: &Faults) -> (Vec<u8>, u16) {
        if apdu.class != APDU_CLASS {
            return (Vec::new(), SW_CLASS_NOT_SUPPORTED);
        }

        match apdu.command() {
            Some(Command::GetVersion) => (
                vec![self.config.major, self.config.minor, self.config.patch],
                SW_OK,
            ),
            Some(command @ (Command::GetAddress | Command::GetAddressSilent)) => {
                let Some(index) = derive_index(&apdu.payload, DERIVE_INDEX_SIZE) else {
                    return (Vec::new(), SW_INVALID_PARAMETER);
                };
                debug!(index, silent = command == Command::GetAddressSilent, "deriving address");
                (self.address(index).as_bytes().to_vec(), SW_OK)
            }
            Some(Command::SignHash) => {
                let Some(index) = derive_index(&apdu.payload, DERIVE_INDEX_SIZE + HASH_SIZE) else {
                    return (Vec::new(), SW_INVALID_PARAMETER);
                };
                if faults.reject_signing {
                    debug!(index, "user rejected signature");
                    return (Vec::new(), SW_USER_REJECTED);
                }
                let hash = &apdu.payload[DERIVE_INDEX_SIZE..];
                (self.signature(index, hash).to_bytes().to_vec(), SW_OK)
            }
            None => (Vec::new(), SW_INVALID_PARAMETER),
        }
    }
}

/// Leading big-endian derive index of a payload of exactly `expected_len` bytes.
fn derive_index(payload: &[u8], expected_len: usize) -> Option<u32> {
    if payload.len() != expected_len {
        return None;
    }
    let bytes: [u8; DERIVE_INDEX_SIZE] = payload[..DERIVE_INDEX_SIZE].try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nanos_apdu::{ResponseAssembler, StatusCode};

    fn exchange(element: &SecureElement, command: Command, payload: &[u8]) -> nanos_apdu::ExchangeResult {
        let frame = OutboundFrame::encode(command, payload).unwrap();
        let mut assembler = ResponseAssembler::new();
        let mut result = None;
        for response in element.handle_frame(frame.as_bytes()) {
            result = assembler.push(&response).unwrap();
        }
        result.expect("complete response")
    }

    #[test]
    fn test_version() {
        let element = SecureElement::new(FirmwareConfig::default());
        let result = exchange(&element, Command::GetVersion, &[]);
        assert_eq!(result.status, StatusCode::Ok);
        assert_eq!(result.data, vec![1, 0, 3]);
    }

    #[test]
    fn test_address_is_deterministic() {
        let a = SecureElement::new(FirmwareConfig::default());
        let b = SecureElement::new(FirmwareConfig::default());
        assert_eq!(a.address(5), b.address(5));
        assert_ne!(a.address(5), a.address(6));

        let result = exchange(&a, Command::GetAddressSilent, &5u32.to_be_bytes());
        assert_eq!(result.data, a.address(5).as_bytes().to_vec());
    }

    #[test]
    fn test_signature_spans_two_frames() {
        let element = SecureElement::new(FirmwareConfig::default());
        let mut payload = 0u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&[0x11; HASH_SIZE]);

        let frame = OutboundFrame::encode(Command::SignHash, &payload).unwrap();
        assert_eq!(element.handle_frame(frame.as_bytes()).len(), 2);

        let result = exchange(&element, Command::SignHash, &payload);
        let expected = element.signature(0, &[0x11; HASH_SIZE]);
        assert_eq!(Signature::decode(&result.data).unwrap(), expected);
    }

    #[test]
    fn test_bad_payload_length() {
        let element = SecureElement::new(FirmwareConfig::default());
        let result = exchange(&element, Command::GetAddress, &[0x00, 0x01]);
        assert_eq!(result.status, StatusCode::InvalidParameter);
        assert!(result.data.is_empty());
    }

    #[test]
    fn test_faults() {
        let element = SecureElement::new(FirmwareConfig::default());
        let mut payload = 0u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&[0x22; HASH_SIZE]);

        element.set_faults(Faults {
            reject_signing: true,
            ..Default::default()
        });
        assert_eq!(
            exchange(&element, Command::SignHash, &payload).status,
            StatusCode::UserRejected
        );

        element.set_faults(Faults {
            silent: true,
            ..Default::default()
        });
        let frame = OutboundFrame::encode(Command::GetVersion, &[]).unwrap();
        assert!(element.handle_frame(frame.as_bytes()).is_empty());

        element.set_faults(Faults {
            corrupt_channel: true,
            ..Default::default()
        });
        let frames = element.handle_frame(frame.as_bytes());
        assert_eq!(&frames[0][..2], &[0x02, 0x01]);
        assert_eq!(element.received().len(), 3);
    }
}
