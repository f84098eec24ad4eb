//! Error types and result definitions.
//!
//! Protocol-level problems on the receive side are absorbed by the state
//! machine and reported through [`crate::Handler::on_finish`]; only link
//! failures escape [`crate::Receiver::poll`]. The sender has no callback
//! channel, so every way a send can fail is a variant here.

use std::io;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the YMODEM engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying link failed.
    #[error("link I/O error: {0}")]
    Io(#[from] io::Error),

    /// No expected byte arrived before the deadline.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// A packet was not acknowledged within the retry budget.
    #[error("{stage} not acknowledged after {retries} attempts")]
    RetriesExhausted {
        /// What was being sent.
        stage: &'static str,
        /// Number of attempts made.
        retries: u32,
    },

    /// The peer sent a cancel sequence.
    #[error("transfer cancelled by peer")]
    Cancelled,

    /// The file name and size do not fit in a header packet.
    #[error("header for `{0}` does not fit in a 1024 byte packet")]
    HeaderTooLong(String),

    /// The payload does not fit in the packet selected by the header byte.
    #[error("payload of {len} bytes does not fit a {capacity} byte packet")]
    PayloadTooLong {
        /// Payload length supplied.
        len: usize,
        /// Payload capacity of the chosen packet.
        capacity: usize,
    },

    /// Not a SOH or STX header byte.
    #[error("invalid packet header byte {0:#04x}")]
    InvalidHeaderByte(u8),

    /// The file source ended before the announced size was sent.
    #[error("file source ended after {sent} of {size} bytes")]
    ShortRead {
        /// Bytes read before EOF.
        sent: u64,
        /// Size announced in the header.
        size: u64,
    },

    /// The file to send has no content. A header with size 0 is refused by
    /// receivers.
    #[error("`{0}` is empty")]
    EmptyFile(String),
}
