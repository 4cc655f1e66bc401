//! Protocol constants
//!
//! Byte offsets and fixed values of the HID transport framing.

// ============================================================================
// Frame Layout
// ============================================================================

/// Size of every HID packet in both directions.
pub const FRAME_SIZE: usize = 64;
/// Channel identifier carried by every frame.
pub const CHANNEL_ID: u16 = 0x0101;
/// Command tag marking an APDU transport frame.
pub const COMMAND_TAG: u8 = 0x05;
/// Length of the per-frame transport header (channel, tag, sequence).
pub const FRAME_HEADER_SIZE: usize = 5;
/// Payload bytes each inbound frame contributes after its header.
pub const FRAME_CHUNK_SIZE: usize = FRAME_SIZE - FRAME_HEADER_SIZE;

/// Offset of the big-endian channel id.
pub const OFFSET_CHANNEL: usize = 0;
/// Offset of the command tag.
pub const OFFSET_TAG: usize = 2;
/// Offset of the big-endian sequence number.
pub const OFFSET_SEQUENCE: usize = 3;
/// Offset of the big-endian APDU length (outbound) or response length (first inbound frame).
pub const OFFSET_LENGTH: usize = 5;

// ============================================================================
// APDU Header
// ============================================================================

/// Device class byte of every command.
pub const APDU_CLASS: u8 = 0xE0;
/// Length of `CLA INS P1 P2 LC`.
pub const APDU_HEADER_SIZE: usize = 5;
/// Offset of the class byte in an outbound frame.
pub const OFFSET_CLASS: usize = 7;
/// Offset of the first payload byte in an outbound frame.
pub const OFFSET_PAYLOAD: usize = 12;
/// Largest payload that fits a single outbound frame.
pub const MAX_PAYLOAD_SIZE: usize = FRAME_SIZE - OFFSET_PAYLOAD;

// ============================================================================
// Instructions
// ============================================================================

/// Read the application version.
pub const INS_GET_VERSION: u8 = 0x01;
/// Derive the public address for an index.
pub const INS_GET_ADDRESS: u8 = 0x01 << 1;
/// Sign a 32-byte transaction hash.
pub const INS_SIGN_HASH: u8 = 0x01 << 2;

/// P1 value asking the device to skip its on-screen confirmation.
pub const P1_SILENT: u8 = 0x01;

// ============================================================================
// Status Words
// ============================================================================

/// Command completed.
pub const SW_OK: u16 = 0x9000;
/// The user declined on the device.
pub const SW_USER_REJECTED: u16 = 0x6985;
/// The device refused a parameter.
pub const SW_INVALID_PARAMETER: u16 = 0x6B01;

// ============================================================================
// Response Bodies
// ============================================================================

/// Length of a derived address.
pub const ADDRESS_SIZE: usize = 20;
/// Length of the hash accepted by the sign command.
pub const HASH_SIZE: usize = 32;
/// Length of a recoverable signature (`r`, `s`, `v`).
pub const SIGNATURE_SIZE: usize = 65;
/// Length of the big-endian derive index prefix.
pub const DERIVE_INDEX_SIZE: usize = 4;
