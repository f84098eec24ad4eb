//! Blocking YMODEM sender.
//!
//! The whole transfer runs inside [`Sender::send_file`]:
//!
//! 1. wait for the receiver's `C`
//! 2. header packet (sequence 0), then wait for `C` again
//! 3. data packets, STX while a full 1024 bytes remain (if enabled), SOH after
//! 4. EOT, NAK, EOT, ACK, `C`
//! 5. zero filled closing packet (sequence 0)
//!
//! Every packet gets a bounded number of attempts; running out aborts the
//! transfer and the caller starts over from the header.

use std::io::{ErrorKind, Read};

use crate::{
    config::Config,
    error::{Error, Result},
    link::{Clock, Link},
    packet::{
        ACK, CAN, CRC_REQUEST, DATA_FILL, EOT, FileInfo, HEADER_FILL, MAX_FRAME, NAK, SOH,
        SOH_PAYLOAD, STX, STX_PAYLOAD, encode_frame,
    },
};

/// What the peer answered while we waited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    Ack,
    Nak,
    Timeout,
}

/// YMODEM send session.
pub struct Sender<L, C> {
    link: L,
    clock: C,
    config: Config,
    seq: u8,
    frame: [u8; MAX_FRAME],
}

impl<L: Link, C: Clock> Sender<L, C> {
    /// Binds a sender to its link and clock.
    pub fn new(link: L, clock: C, config: Config) -> Self {
        Self {
            link,
            clock,
            config,
            seq: 0,
            frame: [0u8; MAX_FRAME],
        }
    }

    /// Releases the link and clock.
    pub fn into_parts(self) -> (L, C) {
        (self.link, self.clock)
    }

    /// Sends one file.
    ///
    /// # Arguments
    ///
    /// * `file` - Source of exactly `size` bytes
    /// * `name` - File name reported to the receiver
    /// * `size` - File size in bytes
    /// * `on_progress` - Called with `(sent, size)` after each acknowledged packet
    ///
    /// # Errors
    ///
    /// Fails for an empty file, when a wait or a packet's retry budget runs
    /// out, when the peer cancels, when `file` ends early, or when the link
    /// fails.
    pub fn send_file<F: Read>(
        &mut self,
        file: &mut F,
        name: &str,
        size: u64,
        mut on_progress: impl FnMut(u64, u64),
    ) -> Result<()> {
        if size == 0 {
            return Err(Error::EmptyFile(name.to_string()));
        }
        info!("Sending file: {name} ({size} bytes)");

        self.wait_for_start(self.config.start_timeout_ms)?;
        self.send_header(&FileInfo::new(name, size))?;
        self.wait_for_start(self.config.ack_timeout_ms)?;

        self.seq = 1;
        let mut chunk = [0u8; STX_PAYLOAD];
        let mut sent = 0u64;
        while sent < size {
            let remaining = size - sent;
            let (header, len) = if self.config.use_1k && remaining >= STX_PAYLOAD as u64 {
                (STX, STX_PAYLOAD)
            } else {
                (SOH, remaining.min(SOH_PAYLOAD as u64) as usize)
            };
            let n = read_full(file, &mut chunk[..len])?;
            if n < len {
                return Err(Error::ShortRead {
                    sent: sent + n as u64,
                    size,
                });
            }
            self.send_packet(header, self.seq, DATA_FILL, &chunk[..len], "data packet")?;
            self.seq = self.seq.wrapping_add(1);
            sent += len as u64;
            on_progress(sent, size);
        }

        self.send_eot()?;
        self.send_packet(SOH, 0, HEADER_FILL, &[], "closing packet")?;
        info!("Sent {name}");
        Ok(())
    }

    fn send_header(&mut self, info: &FileInfo) -> Result<()> {
        let mut payload = Vec::with_capacity(SOH_PAYLOAD);
        info.encode_into(&mut payload);
        let header = match payload.len() {
            n if n <= SOH_PAYLOAD => SOH,
            n if n <= STX_PAYLOAD => STX,
            _ => return Err(Error::HeaderTooLong(info.name.clone())),
        };
        self.send_packet(header, 0, HEADER_FILL, &payload, "header packet")
    }

    fn send_packet(
        &mut self,
        header: u8,
        seq: u8,
        fill: u8,
        data: &[u8],
        stage: &'static str,
    ) -> Result<()> {
        let len = encode_frame(&mut self.frame, header, seq, fill, data)?;
        for attempt in 1..=self.config.send_retries {
            trace!("{stage} {seq}, attempt {attempt}");
            self.link.put(&self.frame[..len])?;
            self.link.flush()?;
            match self.wait_reply()? {
                Reply::Ack => return Ok(()),
                Reply::Nak => debug!("{stage} {seq} NAKed, retrying..."),
                Reply::Timeout => debug!("{stage} {seq} not acknowledged, retrying..."),
            }
        }
        Err(Error::RetriesExhausted {
            stage,
            retries: self.config.send_retries,
        })
    }

    fn send_eot(&mut self) -> Result<()> {
        for attempt in 1..=self.config.send_retries {
            trace!("EOT, attempt {attempt}");
            self.send_byte(EOT)?;
            match self.wait_reply()? {
                Reply::Nak => {
                    self.send_byte(EOT)?;
                    if self.wait_reply()? == Reply::Ack {
                        break;
                    }
                }
                // Some receivers ACK the first EOT.
                Reply::Ack => break,
                Reply::Timeout => {}
            }
            if attempt == self.config.send_retries {
                return Err(Error::RetriesExhausted {
                    stage: "EOT",
                    retries: self.config.send_retries,
                });
            }
        }
        self.wait_for_start(self.config.ack_timeout_ms)
    }

    fn send_byte(&mut self, byte: u8) -> Result<()> {
        self.link.put(&[byte])?;
        self.link.flush()?;
        Ok(())
    }

    /// Waits up to the acknowledgement timeout for ACK or NAK. Two CAN bytes
    /// in a row abort the transfer; anything else is noise.
    fn wait_reply(&mut self) -> Result<Reply> {
        let deadline = self.clock.now_ms() + self.config.ack_timeout_ms;
        let mut cancels = 0;
        while self.clock.now_ms() < deadline {
            let Some(c) = self.link.get_byte(self.config.char_timeout())? else {
                continue;
            };
            match c {
                ACK => return Ok(Reply::Ack),
                NAK => return Ok(Reply::Nak),
                CAN => {
                    cancels += 1;
                    if cancels >= 2 {
                        return Err(Error::Cancelled);
                    }
                    continue;
                }
                _ => trace!("ignoring {c:#04x}"),
            }
            cancels = 0;
        }
        Ok(Reply::Timeout)
    }

    fn wait_for_start(&mut self, timeout_ms: u64) -> Result<()> {
        debug!("Waiting for 'C' from receiver...");
        let deadline = self.clock.now_ms() + timeout_ms;
        let mut cancels = 0;
        while self.clock.now_ms() < deadline {
            match self.link.get_byte(self.config.char_timeout())? {
                Some(CRC_REQUEST) => return Ok(()),
                Some(CAN) => {
                    cancels += 1;
                    if cancels >= 2 {
                        return Err(Error::Cancelled);
                    }
                }
                Some(c) => {
                    trace!("Received unexpected char: {c:#04x}");
                    cancels = 0;
                }
                None => {}
            }
        }
        Err(Error::Timeout("'C' from receiver"))
    }
}

/// Reads until `buf` is full or the source is exhausted.
fn read_full<F: Read>(file: &mut F, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
