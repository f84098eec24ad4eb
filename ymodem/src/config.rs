//! Transfer configuration.
//!
//! All timeouts are milliseconds measured on the session's [`crate::Clock`].
//!
//! # Configuration File Format
//!
//! ```toml
//! session_timeout_ms = 3000
//! ack_timeout_ms = 1000
//! use_1k = true
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeouts, retry budgets and packet size policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Receiver: time without a valid packet before a retry is spent.
    pub session_timeout_ms: u64,
    /// Sender: how long to wait for an acknowledgement byte.
    pub ack_timeout_ms: u64,
    /// Sender: per-read timeout inside an acknowledgement wait.
    pub char_timeout_ms: u64,
    /// Sender: how long to wait for the receiver's first 'C'.
    pub start_timeout_ms: u64,
    /// Receiver: timeouts/bad frames tolerated in a row.
    pub recv_retries: u32,
    /// Sender: attempts per packet.
    pub send_retries: u32,
    /// Sender: use 1024 byte packets while at least 1024 bytes remain.
    pub use_1k: bool,
    /// Receiver: largest file size accepted from a header packet.
    pub max_file_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_timeout_ms: 3000,
            ack_timeout_ms: 1000,
            char_timeout_ms: 100,
            start_timeout_ms: 60_000,
            recv_retries: 3,
            send_retries: 10,
            use_1k: true,
            max_file_size: u32::MAX as u64,
        }
    }
}

impl Config {
    /// Per-read timeout as a [`Duration`].
    pub fn char_timeout(&self) -> Duration {
        Duration::from_millis(self.char_timeout_ms)
    }
}
