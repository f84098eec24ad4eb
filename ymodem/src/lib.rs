//! # ymodem
//!
//! A YMODEM file transfer engine for half-duplex character links such as UARTs.
//!
//! The crate splits the protocol into a polled, non-blocking receiver and a
//! blocking sender. Both talk to the wire through the [`Link`] trait and measure
//! time through the [`Clock`] trait, so they run unchanged on a host serial port,
//! an in-memory pipe in tests, or a bare UART driver.
//!
//! ## Features
//!
//! - CRC16 (XMODEM polynomial `0x1021`) framed 128 and 1024 byte packets
//! - Strict sequence checking with bounded NAK/timeout retries
//! - Header packet carrying file name, size and optional mtime/mode fields
//! - Single-file sessions; a second file in the batch terminates the session
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ymodem::{Config, FileInfo, FinishReason, Handler, IoLink, Receiver, Reject, SystemClock};
//!
//! struct Sink(Vec<u8>);
//!
//! impl Handler for Sink {
//!     fn on_header(&mut self, info: &FileInfo) -> Result<(), Reject> {
//!         println!("receiving {} ({} bytes)", info.name, info.size);
//!         Ok(())
//!     }
//!
//!     fn on_packet(&mut self, data: &[u8]) -> Result<(), Reject> {
//!         self.0.extend_from_slice(data);
//!         Ok(())
//!     }
//!
//!     fn on_finish(&mut self, reason: FinishReason) {
//!         println!("finished: {reason}");
//!     }
//! }
//!
//! # fn example(port: impl std::io::Read + std::io::Write) -> ymodem::Result<()> {
//! let mut rx = Receiver::new(IoLink::new(port), SystemClock::new(), Sink(Vec::new()), Config::default());
//! let reason = rx.run(1)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`crc`] - CRC16/XMODEM checksum
//! - [`packet`] - Frame codec and header packet parsing
//! - [`link`] - Byte link and clock collaborator traits
//! - [`receiver`] - Polled receive state machine
//! - [`sender`] - Blocking send procedure

#[macro_use]
extern crate log;

/// CRC16/XMODEM checksum implementation.
pub mod crc;

/// Library configuration.
pub mod config;

/// Error types and result definitions.
pub mod error;

/// Byte link and clock collaborator traits.
pub mod link;

/// YMODEM frame codec.
pub mod packet;

/// Polled receive state machine.
pub mod receiver;

/// Blocking send procedure.
pub mod sender;

pub use config::Config;
pub use error::{Error, Result};
pub use link::{Clock, IoLink, Link, SystemClock};
pub use packet::{FileInfo, HeaderError, Validation};
pub use receiver::{FinishReason, Handler, Receiver, Reject, State, Step};
pub use sender::Sender;
