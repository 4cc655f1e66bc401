//! APDU framing for a USB HID secure element
//!
//! This crate provides the wire layer for talking to a hardware signing device
//! over its 64-byte HID channel. It performs no I/O: every function maps bytes to
//! bytes, so the whole protocol can be checked with literal byte comparisons.
//!
//! # Protocol Overview
//!
//! Every packet on the wire is exactly [`FRAME_SIZE`] bytes and starts with a
//! 5-byte header:
//!
//! ```text
//! +-----------+-----+----------+
//! | channel:2 | tag | seq:2    |
//! +-----------+-----+----------+
//! ```
//!
//! - **Commands** (host → device): one frame carrying a 2-byte APDU length, the
//!   APDU header (`CLA INS P1 P2 LC`) and at most [`MAX_PAYLOAD_SIZE`] payload bytes.
//! - **Responses** (device → host): one or more frames. The first frame carries a
//!   2-byte length `n`, then `n` data bytes and a 2-byte status word spread across
//!   as many frames as needed, 59 bytes per frame after the header.
//!
//! # Example
//!
//! ```rust,ignore
//! use nanos_apdu::{Command, OutboundFrame, ResponseAssembler};
//!
//! // Build a command frame
//! let frame = OutboundFrame::encode(Command::GetAddress, &0u32.to_be_bytes())?;
//!
//! // Reassemble the reply
//! let mut assembler = ResponseAssembler::new();
//! let result = assembler.push(&received)?;
//! ```

mod assembler;
mod commands;
mod constants;
mod error;
mod frame;
mod responses;
mod status;

pub use assembler::*;
pub use commands::*;
pub use constants::*;
pub use error::*;
pub use frame::*;
pub use responses::*;
pub use status::*;
