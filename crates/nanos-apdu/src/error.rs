//! Frame error types.

use thiserror::Error;

/// Errors that can occur when encoding or decoding HID frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Command payload does not fit a single outbound frame.
    #[error("payload too large: maximum {max} bytes, got {actual}")]
    PayloadTooLarge {
        /// Maximum allowed payload length.
        max: usize,
        /// Actual payload length.
        actual: usize,
    },

    /// Frame is too short to carry its header.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Expected minimum length.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Frame arrived on a foreign channel.
    #[error("unknown channel id 0x{0:04X}")]
    InvalidChannel(u16),

    /// Frame does not carry the APDU command tag.
    #[error("invalid command tag 0x{0:02X}")]
    InvalidCommandTag(u8),

    /// Frames arrived out of order.
    #[error("unexpected sequence number: expected {expected}, got {actual}")]
    UnexpectedSequence {
        /// Sequence number the assembler was waiting for.
        expected: u16,
        /// Sequence number found in the frame.
        actual: u16,
    },

    /// Declared lengths disagree with the bytes present.
    #[error("truncated data: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes the length fields announce.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },
}

/// Result type alias for frame operations.
pub type FrameResult<T> = Result<T, FrameError>;
