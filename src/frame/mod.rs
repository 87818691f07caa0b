//! Wire protocol for Veza.
//!
//! Defines the HDLC frame layout, the control-octet encodings, and the
//! byte codec.
//!
//! ## Frame Format
//!
//! ```text
//! ┌──────┬─────────────────────────────────────────────────┬──────┐
//! │ FLAG │ stuffed( Address │ Control │ Payload │ CRC (LE) )│ FLAG │
//! └──────┴─────────────────────────────────────────────────┴──────┘
//! ```
//!
//! Between the delimiting flags every `0x7E` or `0x7D` byte is replaced
//! by `0x7D` followed by the original byte XORed with `0x20`. The CRC
//! covers address, control and payload and is appended LSB first.

mod codec;
mod decoder;
mod encoder;

pub use codec::FrameCodec;
pub use decoder::{Decoded, FrameDecoder};
pub use encoder::{encode_bytes, FrameEncoder};

use crate::error::FrameError;
use crate::types::SequenceNumber;

/// Frame boundary flag.
pub const FLAG: u8 = 0x7E;

/// Escape byte introducing a transparency sequence.
pub const ESCAPE: u8 = 0x7D;

/// XOR mask applied to an escaped byte.
pub const ESCAPE_XOR: u8 = 0x20;

/// Point-to-point station address.
pub const ADDRESS: u8 = 0xFF;

/// Poll/Final bit within the control octet.
const PF_BIT: u8 = 0x10;

/// Supervisory frame function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupervisoryKind {
    /// RR: ready to receive, acknowledges up to N(R)
    ReceiveReady,
    /// RNR: acknowledge but stop sending new I-frames
    ReceiveNotReady,
    /// REJ: request retransmission from N(R)
    Reject,
}

/// Unnumbered frame function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnnumberedKind {
    /// Set Asynchronous Balanced Mode (connection request)
    Sabm,
    /// Unnumbered acknowledgement
    Ua,
    /// Disconnect request
    Disc,
    /// Disconnected mode (peer refuses)
    Dm,
    /// Frame reject (peer reports a protocol violation)
    Frmr,
}

impl UnnumberedKind {
    /// Control octet with the P/F bit cleared.
    fn base(self) -> u8 {
        match self {
            Self::Sabm => 0x2F,
            Self::Ua => 0x63,
            Self::Disc => 0x43,
            Self::Dm => 0x0F,
            Self::Frmr => 0x87,
        }
    }

    fn from_base(byte: u8) -> Option<Self> {
        match byte {
            0x2F => Some(Self::Sabm),
            0x63 => Some(Self::Ua),
            0x43 => Some(Self::Disc),
            0x0F => Some(Self::Dm),
            0x87 => Some(Self::Frmr),
            _ => None,
        }
    }
}

/// Decoded control octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    /// Numbered information frame carrying user payload.
    Information {
        ns: SequenceNumber,
        nr: SequenceNumber,
        poll: bool,
    },
    /// Supervisory frame (RR, RNR, REJ).
    Supervisory {
        kind: SupervisoryKind,
        nr: SequenceNumber,
        poll: bool,
    },
    /// Unnumbered command or response.
    Unnumbered { kind: UnnumberedKind, poll: bool },
}

impl Control {
    /// Encode to the wire octet.
    pub fn encode(self) -> u8 {
        match self {
            Self::Information { ns, nr, poll } => {
                (ns.value() << 1) | (nr.value() << 5) | if poll { PF_BIT } else { 0 }
            }
            Self::Supervisory { kind, nr, poll } => {
                let s = match kind {
                    SupervisoryKind::ReceiveReady => 0x00,
                    SupervisoryKind::Reject => 0x04,
                    SupervisoryKind::ReceiveNotReady => 0x08,
                };
                0x01 | s | (nr.value() << 5) | if poll { PF_BIT } else { 0 }
            }
            Self::Unnumbered { kind, poll } => kind.base() | if poll { PF_BIT } else { 0 },
        }
    }

    /// Decode from the wire octet.
    pub fn decode(byte: u8) -> Result<Self, FrameError> {
        let poll = byte & PF_BIT != 0;

        if byte & 0x01 == 0 {
            return Ok(Self::Information {
                ns: SequenceNumber::new((byte >> 1) & 7),
                nr: SequenceNumber::new(byte >> 5),
                poll,
            });
        }

        if byte & 0x03 == 0x01 {
            let kind = match (byte >> 2) & 0x03 {
                0x00 => SupervisoryKind::ReceiveReady,
                0x01 => SupervisoryKind::Reject,
                0x02 => SupervisoryKind::ReceiveNotReady,
                _ => return Err(FrameError::UnknownControl(byte)),
            };
            return Ok(Self::Supervisory {
                kind,
                nr: SequenceNumber::new(byte >> 5),
                poll,
            });
        }

        UnnumberedKind::from_base(byte & !PF_BIT)
            .map(|kind| Self::Unnumbered { kind, poll })
            .ok_or(FrameError::UnknownControl(byte))
    }

    /// The N(R) acknowledgement carried by this frame, if any.
    pub fn nr(self) -> Option<SequenceNumber> {
        match self {
            Self::Information { nr, .. } | Self::Supervisory { nr, .. } => Some(nr),
            Self::Unnumbered { .. } => None,
        }
    }

    /// Poll/Final bit.
    pub fn poll(self) -> bool {
        match self {
            Self::Information { poll, .. }
            | Self::Supervisory { poll, .. }
            | Self::Unnumbered { poll, .. } => poll,
        }
    }
}

/// A complete link frame: control octet plus optional payload.
///
/// Only information frames carry a payload on this link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub control: Control,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create an information frame.
    pub fn information(
        ns: SequenceNumber,
        nr: SequenceNumber,
        poll: bool,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            control: Control::Information { ns, nr, poll },
            payload,
        }
    }

    /// Create a supervisory frame.
    pub fn supervisory(kind: SupervisoryKind, nr: SequenceNumber, poll: bool) -> Self {
        Self {
            control: Control::Supervisory { kind, nr, poll },
            payload: Vec::new(),
        }
    }

    /// Create an unnumbered frame.
    pub fn unnumbered(kind: UnnumberedKind, poll: bool) -> Self {
        Self {
            control: Control::Unnumbered { kind, poll },
            payload: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unnumbered_encodings() {
        // Literal wire values, with and without P/F
        let cases = [
            (UnnumberedKind::Sabm, 0x2F, 0x3F),
            (UnnumberedKind::Ua, 0x63, 0x73),
            (UnnumberedKind::Disc, 0x43, 0x53),
            (UnnumberedKind::Dm, 0x0F, 0x1F),
        ];
        for (kind, plain, polled) in cases {
            assert_eq!(Control::Unnumbered { kind, poll: false }.encode(), plain);
            assert_eq!(Control::Unnumbered { kind, poll: true }.encode(), polled);
            assert_eq!(
                Control::decode(plain).unwrap(),
                Control::Unnumbered { kind, poll: false }
            );
            assert_eq!(
                Control::decode(polled).unwrap(),
                Control::Unnumbered { kind, poll: true }
            );
        }
    }

    #[test]
    fn test_information_round_trip() {
        for ns in 0..8 {
            for nr in 0..8 {
                for poll in [false, true] {
                    let control = Control::Information {
                        ns: SequenceNumber::new(ns),
                        nr: SequenceNumber::new(nr),
                        poll,
                    };
                    let byte = control.encode();
                    assert_eq!(byte & 0x01, 0);
                    assert_eq!(Control::decode(byte).unwrap(), control);
                }
            }
        }
    }

    #[test]
    fn test_information_bit_layout() {
        // N(S)=0, N(R)=0, P=0 encodes to 0x00
        let control = Control::Information {
            ns: SequenceNumber::ZERO,
            nr: SequenceNumber::ZERO,
            poll: false,
        };
        assert_eq!(control.encode(), 0x00);

        // N(S)=3, N(R)=5, P=1
        let control = Control::Information {
            ns: SequenceNumber::new(3),
            nr: SequenceNumber::new(5),
            poll: true,
        };
        assert_eq!(control.encode(), (3 << 1) | 0x10 | (5 << 5));
    }

    #[test]
    fn test_supervisory_round_trip() {
        for kind in [
            SupervisoryKind::ReceiveReady,
            SupervisoryKind::ReceiveNotReady,
            SupervisoryKind::Reject,
        ] {
            for nr in 0..8 {
                for poll in [false, true] {
                    let control = Control::Supervisory {
                        kind,
                        nr: SequenceNumber::new(nr),
                        poll,
                    };
                    assert_eq!(Control::decode(control.encode()).unwrap(), control);
                }
            }
        }
    }

    #[test]
    fn test_unknown_control_rejected() {
        // S-frame with reserved function bits 11
        assert_eq!(
            Control::decode(0x0D),
            Err(FrameError::UnknownControl(0x0D))
        );
        // U-frame with an unassigned modifier
        assert!(matches!(
            Control::decode(0xFF),
            Err(FrameError::UnknownControl(0xFF))
        ));
    }

    #[test]
    fn test_nr_accessor() {
        let control = Control::Supervisory {
            kind: SupervisoryKind::Reject,
            nr: SequenceNumber::new(4),
            poll: false,
        };
        assert_eq!(control.nr(), Some(SequenceNumber::new(4)));
        assert_eq!(
            Control::Unnumbered {
                kind: UnnumberedKind::Sabm,
                poll: true
            }
            .nr(),
            None
        );
    }
}
