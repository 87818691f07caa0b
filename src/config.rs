//! Configuration management for Veza links.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::link::buffer_size_by_mtu_ex;
use crate::types::CrcType;
use crate::{DEFAULT_MTU, MAX_WINDOW};

/// Link configuration.
///
/// All timeouts are in milliseconds to keep the on-disk format flat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Maximum user payload per I-frame. 0 selects automatically:
    /// derived from `buffer_size` when set, the library default otherwise.
    #[serde(default)]
    pub mtu: usize,

    /// Working-set budget in bytes. 0 means unconstrained; when set, the
    /// effective MTU and window must fit (see `buffer_size_by_mtu_ex`).
    #[serde(default)]
    pub buffer_size: usize,

    /// Sliding window size, 1..=7 outstanding I-frames.
    #[serde(default = "default_window_frames")]
    pub window_frames: usize,

    /// CRC variant protecting every frame.
    #[serde(default)]
    pub crc_type: CrcType,

    /// How long a blocking send waits for window space.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Retransmission timeout per outstanding frame. 0 selects the
    /// automatic value; nonzero values are clamped to at least 100 ms.
    #[serde(default)]
    pub retry_timeout_ms: u64,

    /// Retransmissions of a frame before the connection is declared lost.
    #[serde(default = "default_retries")]
    pub retries: u8,

    /// Idle period before a keep-alive RR is emitted. 0 disables.
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_timeout_ms: u64,

    /// Re-issue SABM after a connection loss or a peer DM.
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
}

fn default_window_frames() -> usize {
    3
}
fn default_send_timeout_ms() -> u64 {
    1000
}
fn default_retries() -> u8 {
    2
}
fn default_keep_alive_ms() -> u64 {
    5000
}
fn default_auto_reconnect() -> bool {
    true
}

/// Automatic retransmission timeout when `retry_timeout_ms` is 0.
const AUTO_RETRY_TIMEOUT_MS: u64 = 200;

/// Lower bound on any configured retransmission timeout.
const MIN_RETRY_TIMEOUT_MS: u64 = 100;

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            mtu: 0,
            buffer_size: 0,
            window_frames: default_window_frames(),
            crc_type: CrcType::default(),
            send_timeout_ms: default_send_timeout_ms(),
            retry_timeout_ms: 0,
            retries: default_retries(),
            keep_alive_timeout_ms: default_keep_alive_ms(),
            auto_reconnect: default_auto_reconnect(),
        }
    }
}

impl LinkConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::InvalidConfig(format!("failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::InvalidConfig(format!("failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::InvalidConfig(format!("failed to serialize config: {e}")))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::InvalidConfig(format!("failed to write config: {e}")))?;

        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.window_frames == 0 || self.window_frames > MAX_WINDOW {
            return Err(Error::InvalidConfig(format!(
                "window_frames must be in 1..={MAX_WINDOW}, got {}",
                self.window_frames
            )));
        }

        if self.retries == 0 {
            return Err(Error::InvalidConfig("retries must be at least 1".into()));
        }

        let mtu = self.effective_mtu()?;
        if self.buffer_size > 0 {
            let required = buffer_size_by_mtu_ex(mtu, self.window_frames, self.crc_type);
            if self.buffer_size < required {
                return Err(Error::InvalidConfig(format!(
                    "buffer_size {} below required {required} for mtu {mtu}",
                    self.buffer_size
                )));
            }
        }

        Ok(())
    }

    /// Effective MTU after auto-selection.
    pub fn effective_mtu(&self) -> Result<usize> {
        if self.mtu > 0 {
            return Ok(self.mtu);
        }
        if self.buffer_size == 0 {
            return Ok(DEFAULT_MTU);
        }

        // Invert the buffer requirement: every extra payload byte costs
        // one byte per window slot plus four bytes of codec scratch.
        let fixed = buffer_size_by_mtu_ex(0, self.window_frames, self.crc_type);
        let per_byte = self.window_frames + 4;
        let mtu = self.buffer_size.saturating_sub(fixed) / per_byte;
        if mtu == 0 {
            return Err(Error::InvalidConfig(format!(
                "buffer_size {} too small for any payload",
                self.buffer_size
            )));
        }
        Ok(mtu)
    }

    /// Effective retransmission timeout.
    pub fn effective_retry_timeout(&self) -> Duration {
        let ms = if self.retry_timeout_ms == 0 {
            AUTO_RETRY_TIMEOUT_MS
        } else {
            self.retry_timeout_ms.max(MIN_RETRY_TIMEOUT_MS)
        };
        Duration::from_millis(ms)
    }

    /// Blocking send timeout.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Keep-alive period; `None` when disabled.
    pub fn keep_alive_timeout(&self) -> Option<Duration> {
        if self.keep_alive_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.keep_alive_timeout_ms))
        }
    }
}
