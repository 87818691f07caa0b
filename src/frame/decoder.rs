//! Incremental frame decoder.
//!
//! Accepts arbitrary byte slices split at any position and reassembles
//! flag-delimited frames, undoing escape transparency and verifying the
//! CRC trailer. Corrupt or truncated frames are discarded; the decoder
//! resynchronizes on the next flag.

use crate::crc;
use crate::error::FrameError;
use crate::types::CrcType;

use super::{ESCAPE, ESCAPE_XOR, FLAG};

/// Outcome of a [`FrameDecoder::feed`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// A CRC-valid frame is available through [`FrameDecoder::frame`].
    Frame,
    /// A frame was discarded. The decoder has already resynchronized.
    Discarded(FrameError),
}

/// Streaming decoder with a bounded reassembly buffer.
#[derive(Debug)]
pub struct FrameDecoder {
    crc_type: CrcType,
    buf: Vec<u8>,
    capacity: usize,
    in_frame: bool,
    escape: bool,
    have_frame: bool,
}

impl FrameDecoder {
    /// Create a decoder able to hold one frame of up to `mtu` payload
    /// bytes plus header and CRC trailer.
    pub fn new(crc_type: CrcType, mtu: usize) -> Self {
        let capacity = 2 + mtu + crc_type.width();
        Self {
            crc_type,
            buf: Vec::with_capacity(capacity),
            capacity,
            in_frame: false,
            escape: false,
            have_frame: false,
        }
    }

    /// Exact reassembly capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Consume bytes from `data` until a frame completes, a frame is
    /// discarded, or the input is exhausted.
    ///
    /// Returns the number of bytes consumed and what happened. Callers
    /// loop over the remainder to drain multi-frame inputs.
    pub fn feed(&mut self, data: &[u8]) -> (usize, Option<Decoded>) {
        if self.have_frame {
            self.buf.clear();
            self.have_frame = false;
        }

        for (i, &byte) in data.iter().enumerate() {
            if !self.in_frame {
                if byte == FLAG {
                    self.in_frame = true;
                    self.buf.clear();
                }
                continue;
            }

            match byte {
                FLAG if self.escape => {
                    // An escape must never precede a flag; drop the frame
                    // and treat the flag as the next boundary.
                    self.escape = false;
                    self.buf.clear();
                    return (i + 1, Some(Decoded::Discarded(FrameError::InvalidEscape)));
                }
                FLAG => {
                    if self.buf.is_empty() {
                        // Back-to-back flags delimit nothing
                        continue;
                    }
                    let outcome = self.close_frame();
                    return (i + 1, Some(outcome));
                }
                ESCAPE if self.escape => {
                    self.escape = false;
                    self.in_frame = false;
                    self.buf.clear();
                    return (i + 1, Some(Decoded::Discarded(FrameError::InvalidEscape)));
                }
                ESCAPE => {
                    self.escape = true;
                }
                _ => {
                    let decoded = if self.escape {
                        self.escape = false;
                        byte ^ ESCAPE_XOR
                    } else {
                        byte
                    };
                    if self.buf.len() == self.capacity {
                        // Frame larger than the receive buffer; drop
                        // everything until the next flag.
                        self.in_frame = false;
                        self.escape = false;
                        self.buf.clear();
                        return (i + 1, Some(Decoded::Discarded(FrameError::Overflow)));
                    }
                    self.buf.push(decoded);
                }
            }
        }

        (data.len(), None)
    }

    /// The frame completed by the last `feed` call, as
    /// `(address, control, payload)`.
    pub fn frame(&self) -> (u8, u8, &[u8]) {
        debug_assert!(self.have_frame);
        let end = self.buf.len() - self.crc_type.width();
        (self.buf[0], self.buf[1], &self.buf[2..end])
    }

    /// Drop any partial frame and return to hunting for a flag.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.in_frame = false;
        self.escape = false;
        self.have_frame = false;
    }

    fn close_frame(&mut self) -> Decoded {
        let width = self.crc_type.width();
        if self.buf.len() < 2 + width {
            self.buf.clear();
            return Decoded::Discarded(FrameError::TooShort);
        }

        let body_len = self.buf.len() - width;
        if !crc::verify(self.crc_type, &self.buf[..body_len], &self.buf[body_len..]) {
            self.buf.clear();
            return Decoded::Discarded(FrameError::ChecksumMismatch);
        }

        self.have_frame = true;
        Decoded::Frame
    }
}
