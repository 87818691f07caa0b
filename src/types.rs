//! Core types used throughout Veza.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Frame sequence number, mod 8.
///
/// Both send and receive state variables (V(S), V(R), V(A)) and the
/// N(S)/N(R) fields carried in frame control octets use this three-bit
/// sequence space. Distances are always forward modular distances, so
/// wraparound never needs signed arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SequenceNumber(u8);

impl SequenceNumber {
    pub const ZERO: Self = Self(0);

    /// Modulus of the sequence space.
    pub const MODULO: u8 = 8;

    /// Create a sequence number, reducing mod 8.
    pub fn new(n: u8) -> Self {
        Self(n & 7)
    }

    /// Raw three-bit value.
    pub fn value(self) -> u8 {
        self.0
    }

    /// Successor in the sequence space.
    pub fn next(self) -> Self {
        Self((self.0 + 1) & 7)
    }

    /// Forward distance from `self` to `other`, in [0, 8).
    pub fn distance_to(self, other: Self) -> u8 {
        other.0.wrapping_sub(self.0) & 7
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// CRC variant protecting the frame contents.
///
/// Fixed for the lifetime of a connection; both peers must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CrcType {
    /// 8-bit CRC (Maxim/Dallas polynomial), 1-byte trailer
    Crc8,
    /// 16-bit CCITT CRC, 2-byte trailer
    Crc16,
    /// 32-bit IEEE 802.3 CRC, 4-byte trailer
    Crc32,
    /// Library default (resolves to CRC-16)
    #[default]
    Default,
}

impl CrcType {
    /// Resolve `Default` to the concrete variant.
    pub fn resolve(self) -> Self {
        match self {
            Self::Default => Self::Crc16,
            other => other,
        }
    }

    /// Width of the CRC trailer in bytes.
    pub fn width(self) -> usize {
        match self.resolve() {
            Self::Crc8 => 1,
            Self::Crc16 => 2,
            Self::Crc32 => 4,
            Self::Default => unreachable!(),
        }
    }
}

impl fmt::Display for CrcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resolve() {
            Self::Crc8 => write!(f, "crc8"),
            Self::Crc16 => write!(f, "crc16"),
            Self::Crc32 => write!(f, "crc32"),
            Self::Default => unreachable!(),
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No connection; SABM not yet exchanged
    Disconnected,
    /// SABM sent, waiting for UA
    Connecting,
    /// Link established, information transfer allowed
    Connected,
    /// DISC sent, waiting for UA
    Disconnecting,
}

impl ConnectionState {
    pub fn is_established(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// Link status as reported to the application.
///
/// `Failed` is sticky: it is reported from the moment retransmission
/// retries are exhausted (or the peer refuses with DM or FRMR) until a
/// reconnection succeeds or the link is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkStatus {
    /// Link established
    Connected,
    /// Not established (includes connecting and disconnecting)
    Disconnected,
    /// Connection lost; reconnection pending or requires `connect()`
    Failed,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Link traffic statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LinkStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub payloads_delivered: u64,
    pub retransmissions: u64,
    pub crc_errors: u64,
    pub rejects_sent: u64,
    pub rejects_received: u64,
    pub keep_alives_sent: u64,
    pub connection_losses: u64,
}

impl LinkStats {
    pub fn add(&mut self, other: &Self) {
        self.frames_sent += other.frames_sent;
        self.frames_received += other.frames_received;
        self.payloads_delivered += other.payloads_delivered;
        self.retransmissions += other.retransmissions;
        self.crc_errors += other.crc_errors;
        self.rejects_sent += other.rejects_sent;
        self.rejects_received += other.rejects_received;
        self.keep_alives_sent += other.keep_alives_sent;
        self.connection_losses += other.connection_losses;
    }
}
