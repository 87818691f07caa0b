//! Resumable frame encoder.
//!
//! A frame is staged once (address, control, payload, CRC trailer) and
//! then drained through [`FrameEncoder::fill`] into caller buffers of
//! any size, byte-stuffing on the way out. The encoder remembers its
//! position between calls, including a half-emitted escape sequence, so
//! a partial write can continue on the next call.

use crate::crc;
use crate::types::CrcType;

use super::{Control, ADDRESS, ESCAPE, ESCAPE_XOR, FLAG};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    OpenFlag,
    Body,
    CloseFlag,
}

/// Streaming encoder for one frame at a time.
#[derive(Debug)]
pub struct FrameEncoder {
    crc_type: CrcType,
    raw: Vec<u8>,
    pos: usize,
    pending: Option<u8>,
    stage: Stage,
}

impl FrameEncoder {
    /// Create an encoder with staging capacity for `mtu`-byte payloads.
    pub fn new(crc_type: CrcType, mtu: usize) -> Self {
        Self {
            crc_type,
            raw: Vec::with_capacity(2 + mtu + crc_type.width()),
            pos: 0,
            pending: None,
            stage: Stage::Idle,
        }
    }

    /// True when no frame is staged and `fill` would produce nothing.
    pub fn is_idle(&self) -> bool {
        self.stage == Stage::Idle
    }

    /// Stage a frame for emission. Must only be called when idle.
    pub fn begin(&mut self, control: Control, payload: &[u8]) {
        debug_assert!(self.is_idle());
        self.raw.clear();
        self.raw.push(ADDRESS);
        self.raw.push(control.encode());
        self.raw.extend_from_slice(payload);
        let value = crc::compute(self.crc_type, &self.raw);
        self.raw
            .extend_from_slice(&value.to_le_bytes()[..self.crc_type.width()]);
        self.pos = 0;
        self.pending = None;
        self.stage = Stage::OpenFlag;
    }

    /// Unstuffed frame contents (address, control, payload, CRC).
    ///
    /// Valid between `begin` and the completing `fill`.
    pub fn staged(&self) -> &[u8] {
        &self.raw
    }

    /// Payload bytes of the staged frame.
    pub fn staged_payload(&self) -> &[u8] {
        &self.raw[2..self.raw.len() - self.crc_type.width()]
    }

    /// Abandon the staged frame.
    pub fn reset(&mut self) {
        self.stage = Stage::Idle;
        self.pending = None;
        self.pos = 0;
    }

    /// Emit as many bytes of the staged frame as fit into `out`.
    ///
    /// Returns the number of bytes written. The encoder becomes idle
    /// once the closing flag has been emitted.
    pub fn fill(&mut self, out: &mut [u8]) -> usize {
        let mut n = 0;
        while n < out.len() {
            match self.stage {
                Stage::Idle => break,
                Stage::OpenFlag => {
                    out[n] = FLAG;
                    n += 1;
                    self.stage = Stage::Body;
                }
                Stage::Body => {
                    if let Some(byte) = self.pending.take() {
                        out[n] = byte;
                        n += 1;
                        continue;
                    }
                    if self.pos == self.raw.len() {
                        self.stage = Stage::CloseFlag;
                        continue;
                    }
                    let byte = self.raw[self.pos];
                    self.pos += 1;
                    if byte == FLAG || byte == ESCAPE {
                        out[n] = ESCAPE;
                        n += 1;
                        self.pending = Some(byte ^ ESCAPE_XOR);
                    } else {
                        out[n] = byte;
                        n += 1;
                    }
                }
                Stage::CloseFlag => {
                    out[n] = FLAG;
                    n += 1;
                    self.stage = Stage::Idle;
                }
            }
        }
        n
    }
}

/// One-shot encoding of a complete frame to a fresh byte vector.
pub fn encode_bytes(crc_type: CrcType, control: Control, payload: &[u8]) -> Vec<u8> {
    let mut encoder = FrameEncoder::new(crc_type, payload.len());
    encoder.begin(control, payload);

    // Worst case doubles every byte plus two flags
    let mut out = vec![0u8; (2 + payload.len() + crc_type.width()) * 2 + 2];
    let n = encoder.fill(&mut out);
    debug_assert!(encoder.is_idle());
    out.truncate(n);
    out
}
