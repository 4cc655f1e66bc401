//! Frame encoding/decoding utilities.
//!
//! Outbound command frames always fit a single 64-byte packet:
//!
//! ```text
//! +-----------+-----+-------+--------+-----+-----+----+----+----+-------------+---------+
//! | 01 01     | 05  | 00 00 | len:2  | E0  | INS | P1 | P2 | LC | payload[LC] | 00 ...  |
//! +-----------+-----+-------+--------+-----+-----+----+----+----+-------------+---------+
//!   0          2     3       5        7     8     9    10   11   12
//! ```
//!
//! `len` is `5 + LC`. Inbound responses are split into frames whose header is
//! `channel tag seq`; the concatenated remainders form `[n:2][data:n][status:2]`.

use bytes::BufMut;

use crate::commands::Command;
use crate::constants::*;
use crate::error::{FrameError, FrameResult};

/// Hex dump used by frame traces.
pub fn hex_dump(data: &[u8]) -> String {
    hex::encode(data)
}

/// Read a big-endian `u16` at `offset`. Callers check bounds.
fn be_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

/// The 5-byte transport header present on every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Channel identifier.
    pub channel: u16,
    /// Command tag.
    pub tag: u8,
    /// Position of the frame within its exchange.
    pub sequence: u16,
}

impl FrameHeader {
    /// Parse and validate the header of a frame.
    ///
    /// Fails if the frame is shorter than the header, the channel is not
    /// [`CHANNEL_ID`] or the tag is not [`COMMAND_TAG`].
    pub fn parse(frame: &[u8]) -> FrameResult<FrameHeader> {
        if frame.len() < FRAME_HEADER_SIZE {
            return Err(FrameError::FrameTooShort {
                expected: FRAME_HEADER_SIZE,
                actual: frame.len(),
            });
        }

        let header = FrameHeader {
            channel: be_u16(frame, OFFSET_CHANNEL),
            tag: frame[OFFSET_TAG],
            sequence: be_u16(frame, OFFSET_SEQUENCE),
        };

        if header.channel != CHANNEL_ID {
            return Err(FrameError::InvalidChannel(header.channel));
        }
        if header.tag != COMMAND_TAG {
            return Err(FrameError::InvalidCommandTag(header.tag));
        }

        Ok(header)
    }

    /// Write this header into the first [`FRAME_HEADER_SIZE`] bytes of `out`.
    fn write(&self, mut out: &mut [u8]) {
        out.put_u16(self.channel);
        out.put_u8(self.tag);
        out.put_u16(self.sequence);
    }
}

/// A 64-byte command frame ready to be written to the device.
#[derive(Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    bytes: [u8; FRAME_SIZE],
}

impl OutboundFrame {
    /// Encode a command and its payload.
    ///
    /// Fails with [`FrameError::PayloadTooLarge`] if the payload exceeds
    /// [`MAX_PAYLOAD_SIZE`]; commands are never split across frames.
    pub fn encode(command: Command, payload: &[u8]) -> FrameResult<Self> {
        let (ins, p1, p2) = command.header();
        Self::encode_raw(APDU_CLASS, ins, p1, p2, payload)
    }

    /// Encode an arbitrary APDU header and payload.
    pub fn encode_raw(class: u8, ins: u8, p1: u8, p2: u8, payload: &[u8]) -> FrameResult<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(FrameError::PayloadTooLarge {
                max: MAX_PAYLOAD_SIZE,
                actual: payload.len(),
            });
        }

        let mut bytes = [0u8; FRAME_SIZE];
        FrameHeader {
            channel: CHANNEL_ID,
            tag: COMMAND_TAG,
            sequence: 0,
        }
        .write(&mut bytes[..FRAME_HEADER_SIZE]);

        let mut out = &mut bytes[OFFSET_LENGTH..];
        out.put_u16((APDU_HEADER_SIZE + payload.len()) as u16);
        out.put_u8(class);
        out.put_u8(ins);
        out.put_u8(p1);
        out.put_u8(p2);
        out.put_u8(payload.len() as u8);
        out.put_slice(payload);

        log::trace!("encoded frame: {}", hex_dump(&bytes));
        Ok(OutboundFrame { bytes })
    }

    /// The raw frame bytes.
    pub fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.bytes
    }

    /// Consume the frame and return its bytes.
    pub fn into_bytes(self) -> [u8; FRAME_SIZE] {
        self.bytes
    }

    /// Decode a command frame back into its APDU fields.
    pub fn decode(frame: &[u8]) -> FrameResult<ApduCommand> {
        if frame.len() < OFFSET_PAYLOAD {
            return Err(FrameError::FrameTooShort {
                expected: OFFSET_PAYLOAD,
                actual: frame.len(),
            });
        }

        let header = FrameHeader::parse(frame)?;
        let apdu_len = be_u16(frame, OFFSET_LENGTH) as usize;
        let lc = frame[OFFSET_PAYLOAD - 1] as usize;

        if apdu_len != APDU_HEADER_SIZE + lc {
            return Err(FrameError::Truncated {
                expected: APDU_HEADER_SIZE + lc,
                actual: apdu_len,
            });
        }
        if OFFSET_PAYLOAD + lc > frame.len() {
            return Err(FrameError::Truncated {
                expected: OFFSET_PAYLOAD + lc,
                actual: frame.len(),
            });
        }

        Ok(ApduCommand {
            sequence: header.sequence,
            class: frame[OFFSET_CLASS],
            instruction: frame[OFFSET_CLASS + 1],
            p1: frame[OFFSET_CLASS + 2],
            p2: frame[OFFSET_CLASS + 3],
            payload: frame[OFFSET_PAYLOAD..OFFSET_PAYLOAD + lc].to_vec(),
        })
    }
}

impl std::fmt::Debug for OutboundFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("OutboundFrame")
            .field(&hex_dump(&self.bytes))
            .finish()
    }
}

impl AsRef<[u8]> for OutboundFrame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// An APDU recovered from a command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduCommand {
    /// Sequence number of the frame.
    pub sequence: u16,
    /// Device class byte.
    pub class: u8,
    /// Instruction byte.
    pub instruction: u8,
    /// First parameter.
    pub p1: u8,
    /// Second parameter.
    pub p2: u8,
    /// Command payload.
    pub payload: Vec<u8>,
}

impl ApduCommand {
    /// The known command matching this APDU header, if any.
    pub fn command(&self) -> Option<Command> {
        Command::from_header(self.instruction, self.p1, self.p2)
    }
}

/// Device-side framing of a response.
///
/// Produces the frames a device sends for `data` followed by a status word.
pub struct ResponseFrames;

impl ResponseFrames {
    /// Split `[n:2][data][status:2]` into 64-byte frames with sequence numbers.
    pub fn encode(data: &[u8], status_word: u16) -> FrameResult<Vec<[u8; FRAME_SIZE]>> {
        let len = u16::try_from(data.len()).map_err(|_| FrameError::PayloadTooLarge {
            max: u16::MAX as usize,
            actual: data.len(),
        })?;

        let mut body = Vec::with_capacity(data.len() + 4);
        body.put_u16(len);
        body.extend_from_slice(data);
        body.put_u16(status_word);

        let frames = body
            .chunks(FRAME_CHUNK_SIZE)
            .enumerate()
            .map(|(seq, chunk)| {
                let mut frame = [0u8; FRAME_SIZE];
                FrameHeader {
                    channel: CHANNEL_ID,
                    tag: COMMAND_TAG,
                    sequence: seq as u16,
                }
                .write(&mut frame[..FRAME_HEADER_SIZE]);
                frame[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + chunk.len()].copy_from_slice(chunk);
                frame
            })
            .collect();

        Ok(frames)
    }
}
