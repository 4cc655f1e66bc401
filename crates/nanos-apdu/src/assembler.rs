//! Reassembly of multi-frame responses.
//!
//! A response arrives as one or more 64-byte frames. Each frame's 5-byte
//! header is stripped and the remainders are concatenated:
//!
//! ```text
//! frame 0: | hdr:5 | n:2 | data ...                  |
//! frame 1: | hdr:5 | ... data ...                    |
//! frame k: | hdr:5 | ... data | status:2 | padding   |
//! ```
//!
//! The response is complete once `n + 4` bytes have been collected.

use bytes::{Buf, BytesMut};

use crate::constants::*;
use crate::error::{FrameError, FrameResult};
use crate::frame::FrameHeader;
use crate::responses::ExchangeResult;

/// Accumulates inbound frames until a full response is available.
///
/// Every frame must carry the expected channel, tag and the next sequence
/// number, starting from zero.
#[derive(Debug, Default)]
pub struct ResponseAssembler {
    /// Frame remainders collected so far.
    buffer: BytesMut,
    /// Sequence number the next frame must carry.
    next_sequence: u16,
}

impl ResponseAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        ResponseAssembler {
            buffer: BytesMut::with_capacity(FRAME_SIZE * 2),
            next_sequence: 0,
        }
    }

    /// Add one received frame.
    ///
    /// Returns `Ok(Some(result))` once the response is complete, `Ok(None)` if
    /// more frames are needed, or `Err` if the frame is malformed or out of order.
    pub fn push(&mut self, frame: &[u8]) -> FrameResult<Option<ExchangeResult>> {
        let header = FrameHeader::parse(frame)?;
        if header.sequence != self.next_sequence {
            return Err(FrameError::UnexpectedSequence {
                expected: self.next_sequence,
                actual: header.sequence,
            });
        }
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.buffer.extend_from_slice(&frame[FRAME_HEADER_SIZE..]);

        log::trace!(
            "assembled frame {} ({} bytes buffered, {:?} expected)",
            header.sequence,
            self.buffer.len(),
            self.expected_len()
        );

        // Without a length prefix the response cannot be interpreted
        if self.buffer.len() < 2 {
            self.buffer.clear();
            return Ok(Some(ExchangeResult::status_only(crate::StatusCode::Unknown)));
        }

        match self.expected_len() {
            Some(total) if self.buffer.len() >= total => {
                let body = self.buffer.split_to(total);
                let result = ExchangeResult::from_body(&body)?;
                self.reset();
                Ok(Some(result))
            }
            _ => Ok(None),
        }
    }

    /// Total number of body bytes (`n + 4`) once the length prefix is known.
    pub fn expected_len(&self) -> Option<usize> {
        if self.buffer.len() < 2 {
            return None;
        }
        let n = (&self.buffer[..2]).get_u16() as usize;
        Some(n + 4)
    }

    /// Number of frames accepted since the last reset.
    pub fn frames_received(&self) -> u16 {
        self.next_sequence
    }

    /// Number of body bytes buffered.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Discard any partial response.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.next_sequence = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ResponseFrames;
    use crate::StatusCode;

    fn frame(seq: u16, body: &[u8]) -> [u8; FRAME_SIZE] {
        let mut f = [0u8; FRAME_SIZE];
        f[..5].copy_from_slice(&[0x01, 0x01, 0x05, (seq >> 8) as u8, seq as u8]);
        f[5..5 + body.len()].copy_from_slice(body);
        f
    }

    #[test]
    fn test_single_frame_response() {
        let mut assembler = ResponseAssembler::new();
        let f = frame(0, &[0x00, 0x03, 0x01, 0x02, 0x03, 0x90, 0x00]);

        let result = assembler.push(&f).unwrap().expect("should complete");
        assert_eq!(result.status, StatusCode::Ok);
        assert_eq!(result.data, vec![0x01, 0x02, 0x03]);
        assert_eq!(assembler.buffered_len(), 0);
    }

    #[test]
    fn test_multi_frame_response() {
        let data: Vec<u8> = (0..100u8).collect();
        let frames = ResponseFrames::encode(&data, SW_OK).unwrap();
        assert_eq!(frames.len(), 2);

        let mut assembler = ResponseAssembler::new();
        assert!(assembler.push(&frames[0]).unwrap().is_none());
        assert_eq!(assembler.buffered_len(), FRAME_CHUNK_SIZE);

        let result = assembler.push(&frames[1]).unwrap().expect("should complete");
        assert_eq!(result.status, StatusCode::Ok);
        assert_eq!(result.data, data);
    }

    #[test]
    fn test_three_frame_response_with_rejection() {
        let data = vec![0xEE; 150];
        let frames = ResponseFrames::encode(&data, SW_USER_REJECTED).unwrap();
        assert_eq!(frames.len(), 3);

        let mut assembler = ResponseAssembler::new();
        let mut result = None;
        for f in &frames {
            result = assembler.push(f).unwrap();
        }
        let result = result.expect("should complete");
        assert_eq!(result.status, StatusCode::UserRejected);
        assert_eq!(result.data.len(), 150);
    }

    #[test]
    fn test_channel_mismatch_on_continuation() {
        let frames = ResponseFrames::encode(&[0x42; 80], SW_OK).unwrap();
        let mut second = frames[1];
        second[1] = 0x02;

        let mut assembler = ResponseAssembler::new();
        assert!(assembler.push(&frames[0]).unwrap().is_none());
        assert_eq!(
            assembler.push(&second),
            Err(FrameError::InvalidChannel(0x0102))
        );
    }

    #[test]
    fn test_out_of_order_frame() {
        let frames = ResponseFrames::encode(&[0x42; 80], SW_OK).unwrap();
        let mut assembler = ResponseAssembler::new();
        assert_eq!(
            assembler.push(&frames[1]),
            Err(FrameError::UnexpectedSequence {
                expected: 0,
                actual: 1
            })
        );
    }

    #[test]
    fn test_header_only_frame_is_unknown() {
        let mut assembler = ResponseAssembler::new();
        let result = assembler
            .push(&[0x01, 0x01, 0x05, 0x00, 0x00])
            .unwrap()
            .expect("should complete");
        assert_eq!(result.status, StatusCode::Unknown);
        assert!(result.data.is_empty());
    }
}
