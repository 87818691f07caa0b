//! # Veza
//!
//! Reliable, connection-oriented, full-duplex frame transport over an
//! unreliable byte-oriented link (serial lines, TCP byte pipes, radio
//! modems).
//!
//! Veza layers an Asynchronous Balanced Mode (ABM) sliding-window state
//! machine on top of HDLC-style framing: flag-delimited frames with
//! escape-byte transparency and a CRC trailer carry numbered information
//! frames, supervisory acknowledgements and unnumbered connection
//! commands between exactly two peers.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Application Layer                        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │     Link handle (send / receive, pumps, status, lifecycle)      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ABM state machine (V(S)/V(R), window, REJ recovery, timers)   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │      HDLC frame codec (flags, byte stuffing, CRC-8/16/32)       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │             Byte transport (user-provided callbacks)            │
//! └─────────────────────────────────────────────────────────────────┘

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]      // Many functions can't be const due to trait bounds
#![allow(clippy::cast_possible_truncation)]  // Intentional for sequence and CRC arithmetic
#![allow(clippy::cognitive_complexity)]      // Complex state machines
#![allow(clippy::too_many_lines)]            // Complete implementations
#![allow(clippy::match_same_arms)]           // Explicit arm per variant is clearer
#![allow(clippy::use_self)]                  // Explicit type names in matches

pub mod config;
pub mod crc;
pub mod error;
pub mod frame;
pub mod link;
pub mod types;
pub mod window;

pub use config::LinkConfig;
pub use error::{Error, FrameError, Result};
pub use link::{buffer_size_by_mtu, buffer_size_by_mtu_ex, Callbacks, Link};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default maximum user payload per information frame
pub const DEFAULT_MTU: usize = 512;

/// Largest permitted sliding window (mod-8 sequence space)
pub const MAX_WINDOW: usize = 7;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::LinkConfig;
    pub use crate::error::{Error, Result};
    pub use crate::frame::{Control, Frame, SupervisoryKind, UnnumberedKind};
    pub use crate::link::{Callbacks, Link};
    pub use crate::types::{ConnectionState, CrcType, LinkStats, LinkStatus, SequenceNumber};
}
