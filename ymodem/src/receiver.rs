//! Polled YMODEM receiver.
//!
//! [`Receiver::poll`] never blocks: it reads whatever the link has ready,
//! performs at most one state action and returns. Waiting is expressed as a
//! state plus the time of the last activity, compared against
//! [`Config::session_timeout_ms`] on every call.
//!
//! ```text
//! Idle -> RecvHeader -> RecvData -> RecvEotConfirm -> RecvFinish -> Idle
//!             |             |              |               |
//!             +-------------+--> RecvErr / RecvTerm <------+
//!                                 (5 x CAN, on_finish, Idle)
//! ```
//!
//! Every reply byte is recorded before it is written. If the link refuses
//! the write, `poll` returns the error with the session already advanced,
//! and the next `poll` writes the owed reply before doing anything else, so
//! a packet is never delivered to the handler twice.
//!
//! Sequence numbers are checked strictly. A retransmission of a packet that
//! was already delivered carries a stale number and is answered with NAK
//! rather than ACK, and is never handed to [`Handler::on_packet`] twice.

use std::fmt;

use thiserror::Error;

use crate::{
    config::Config,
    error::Result,
    link::{Clock, Link},
    packet::{
        ACK, CAN, CRC_REQUEST, EOT, FileInfo, FrameError, MAX_FRAME, NAK, Validation, frame_len,
        is_control, is_end_of_batch, payload, validate,
    },
};

/// Number of CAN bytes sent when the receiver gives up.
const CANCEL_LEN: usize = 5;

const CANCEL: [u8; CANCEL_LEN] = [CAN; CANCEL_LEN];

/// Why a session ended. Reported once per session through
/// [`Handler::on_finish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The file was received and the batch closed.
    Success,
    /// Retry budget spent waiting for data packets.
    Timeout,
    /// The sender cancelled.
    RemoteTerminated,
    /// Repeated bad frames while waiting for the header packet.
    HeaderReceive,
    /// Header packet unparsable or rejected by the handler.
    HeaderParse,
    /// The handler rejected a data packet.
    PacketProcessing,
    /// The EOT handshake or closing packet failed.
    EndSequence,
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::RemoteTerminated => "terminated by remote",
            Self::HeaderReceive => "header receive error",
            Self::HeaderParse => "header parse error",
            Self::PacketProcessing => "packet processing error",
            Self::EndSequence => "end sequence error",
        };
        f.write_str(s)
    }
}

/// A handler refusing a header or packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct Reject(pub String);

impl Reject {
    /// Creates a rejection with a message for the log.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Consumer of a received file.
pub trait Handler {
    /// Called once with the parsed header packet. Returning `Err` aborts the
    /// session with [`FinishReason::HeaderParse`].
    fn on_header(&mut self, info: &FileInfo) -> std::result::Result<(), Reject>;

    /// Called with the full payload of each data packet, padding included.
    /// Returning `Err` aborts with [`FinishReason::PacketProcessing`].
    fn on_packet(&mut self, data: &[u8]) -> std::result::Result<(), Reject>;

    /// Called exactly once when the session ends.
    fn on_finish(&mut self, reason: FinishReason);
}

/// Receiver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Next poll starts a session.
    Idle,
    /// Waiting for the header packet.
    RecvHeader,
    /// Receiving data packets.
    RecvData,
    /// First EOT seen and NAKed, waiting for the second.
    RecvEotConfirm,
    /// Waiting for the closing packet.
    RecvFinish,
    /// Local failure, about to cancel.
    RecvErr,
    /// Remote cancel, about to cancel.
    RecvTerm,
}

/// Result of one [`Receiver::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing finished this call.
    Pending,
    /// The transfer just completed successfully.
    Finished,
    /// The transfer just failed; the reason went to [`Handler::on_finish`].
    Failed,
}

impl Step {
    /// `0`, `1` or `-1`.
    pub fn code(self) -> i8 {
        match self {
            Self::Pending => 0,
            Self::Finished => 1,
            Self::Failed => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assembly {
    AwaitingSync,
    AwaitingBody { len: usize, filled: usize },
}

enum Event {
    Control(u8),
    Packet(usize),
    Invalid(FrameError),
}

/// Non-blocking YMODEM receive session.
pub struct Receiver<L, C, H> {
    link: L,
    clock: C,
    handler: H,
    config: Config,
    state: State,
    assembly: Assembly,
    seq: u8,
    buf: [u8; MAX_FRAME],
    last_activity: u64,
    retries: u32,
    active: bool,
    reason: Option<FinishReason>,
    owed: &'static [u8],
}

impl<L: Link, C: Clock, H: Handler> Receiver<L, C, H> {
    /// Binds a session to its link, clock and handler.
    pub fn new(link: L, clock: C, handler: H, config: Config) -> Self {
        Self {
            link,
            clock,
            handler,
            config,
            state: State::Idle,
            assembly: Assembly::AwaitingSync,
            seq: 0,
            buf: [0u8; MAX_FRAME],
            last_activity: 0,
            retries: 0,
            active: false,
            reason: None,
            owed: &[],
        }
    }

    /// Advances the session by at most one state action.
    ///
    /// # Errors
    ///
    /// Only link failures are returned. A reply that could not be written is
    /// kept and retried first on the next call, so the caller may simply
    /// poll again.
    pub fn poll(&mut self) -> Result<Step> {
        self.flush_owed()?;
        let step = match self.state {
            State::Idle => {
                self.start()?;
                Step::Pending
            }
            State::RecvHeader => self.recv_header()?,
            State::RecvData => self.recv_data()?,
            State::RecvEotConfirm => self.recv_eot_confirm()?,
            State::RecvFinish => self.recv_finish()?,
            State::RecvErr | State::RecvTerm => Step::Pending,
        };
        if matches!(self.state, State::RecvErr | State::RecvTerm) {
            return self.cancel();
        }
        Ok(step)
    }

    /// Polls until a session completes, sleeping `idle_ms` between polls
    /// that report nothing.
    ///
    /// # Errors
    ///
    /// Returns the first link failure.
    pub fn run(&mut self, idle_ms: u64) -> Result<FinishReason> {
        loop {
            match self.poll()? {
                Step::Pending => self.clock.delay_ms(idle_ms),
                Step::Finished => return Ok(FinishReason::Success),
                Step::Failed => return Ok(self.reason.unwrap_or(FinishReason::Timeout)),
            }
        }
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Sequence number the next data packet must carry.
    pub fn expected_seq(&self) -> u8 {
        self.seq
    }

    /// True between an accepted header and the end of the session.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Outcome of the last completed session.
    pub fn reason(&self) -> Option<FinishReason> {
        self.reason
    }

    /// Borrows the handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Mutably borrows the handler.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Mutably borrows the link.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Releases the link, clock and handler.
    pub fn into_parts(self) -> (L, C, H) {
        (self.link, self.clock, self.handler)
    }

    fn start(&mut self) -> Result<()> {
        self.link.clear_input()?;
        self.seq = 0;
        self.retries = 0;
        self.active = false;
        self.reset_assembly();
        self.touch();
        self.state = State::RecvHeader;
        debug!("requesting CRC transfer, waiting for header");
        self.reply(&[CRC_REQUEST])
    }

    fn recv_header(&mut self) -> Result<Step> {
        match self.read_frame()? {
            Some(Event::Packet(len)) => {
                let parsed = FileInfo::parse(payload(&self.buf[..len]), self.config.max_file_size);
                self.reset_assembly();
                let info = match parsed {
                    Ok(info) => info,
                    Err(e) => {
                        warn!("header packet: {e}");
                        self.fail(FinishReason::HeaderParse);
                        return Ok(Step::Pending);
                    }
                };
                if let Err(e) = self.handler.on_header(&info) {
                    warn!("header for `{}` rejected: {e}", info.name);
                    self.fail(FinishReason::HeaderParse);
                    return Ok(Step::Pending);
                }
                self.seq = 1;
                self.retries = 0;
                self.active = true;
                self.touch();
                self.state = State::RecvData;
                debug!("receiving `{}` ({} bytes)", info.name, info.size);
                self.reply(&[ACK, CRC_REQUEST])?;
            }
            Some(Event::Control(CAN)) => self.terminate(),
            Some(Event::Control(c)) => trace!("ignoring {c:#04x} while waiting for header"),
            Some(Event::Invalid(e)) => {
                debug!("bad header frame: {e}");
                self.retry(FinishReason::HeaderReceive)?;
            }
            None => {
                if self.expired() {
                    debug!("no header, restarting session");
                    self.state = State::Idle;
                }
            }
        }
        Ok(Step::Pending)
    }

    fn recv_data(&mut self) -> Result<Step> {
        match self.read_frame()? {
            Some(Event::Packet(len)) => {
                let accepted = self.handler.on_packet(payload(&self.buf[..len]));
                self.reset_assembly();
                if let Err(e) = accepted {
                    warn!("packet {} rejected: {e}", self.seq);
                    self.fail(FinishReason::PacketProcessing);
                    return Ok(Step::Pending);
                }
                trace!("packet {} accepted", self.seq);
                self.seq = self.seq.wrapping_add(1);
                self.retries = 0;
                self.touch();
                self.reply(&[ACK])?;
            }
            Some(Event::Control(EOT)) => {
                self.retries = 0;
                self.touch();
                self.state = State::RecvEotConfirm;
                debug!("EOT, waiting for confirmation");
                self.reply(&[NAK])?;
            }
            Some(Event::Control(CAN)) => self.terminate(),
            Some(Event::Control(c)) => trace!("ignoring {c:#04x} in data phase"),
            Some(Event::Invalid(e)) => {
                debug!("bad data frame: {e}");
                self.retry(FinishReason::Timeout)?;
            }
            None => {
                if self.expired() {
                    debug!("data packet {} timed out", self.seq);
                    self.retry(FinishReason::Timeout)?;
                }
            }
        }
        Ok(Step::Pending)
    }

    fn recv_eot_confirm(&mut self) -> Result<Step> {
        match self.read_frame()? {
            Some(Event::Control(EOT)) => {
                self.seq = 0;
                self.retries = 0;
                self.touch();
                self.state = State::RecvFinish;
                debug!("EOT confirmed, waiting for closing packet");
                self.reply(&[ACK, CRC_REQUEST])?;
            }
            Some(Event::Control(CAN)) => self.terminate(),
            Some(_) => {
                self.reset_assembly();
                self.retry(FinishReason::EndSequence)?;
            }
            None => {
                if self.expired() {
                    self.retry(FinishReason::EndSequence)?;
                }
            }
        }
        Ok(Step::Pending)
    }

    fn recv_finish(&mut self) -> Result<Step> {
        match self.read_frame()? {
            Some(Event::Packet(len)) => {
                let last = is_end_of_batch(payload(&self.buf[..len]));
                self.reset_assembly();
                if !last {
                    warn!("peer offered another file, only single file sessions are supported");
                    self.reason = Some(FinishReason::EndSequence);
                    self.state = State::RecvTerm;
                    return Ok(Step::Pending);
                }
                self.active = false;
                self.state = State::Idle;
                self.reason = Some(FinishReason::Success);
                info!("transfer complete");
                self.handler.on_finish(FinishReason::Success);
                self.reply(&[ACK])?;
                return Ok(Step::Finished);
            }
            Some(Event::Control(CAN)) => self.terminate(),
            Some(Event::Control(EOT)) => {
                // Our ACK to the second EOT was lost.
                if self.count_retry(FinishReason::EndSequence) {
                    self.reply(&[ACK, CRC_REQUEST])?;
                }
            }
            Some(_) => {
                self.reset_assembly();
                self.retry(FinishReason::EndSequence)?;
            }
            None => {
                if self.expired() {
                    self.retry(FinishReason::EndSequence)?;
                }
            }
        }
        Ok(Step::Pending)
    }

    fn cancel(&mut self) -> Result<Step> {
        let reason = self.reason.unwrap_or(FinishReason::RemoteTerminated);
        self.active = false;
        self.state = State::Idle;
        self.reset_assembly();
        warn!("transfer aborted: {reason}");
        self.handler.on_finish(reason);
        self.reply(&CANCEL)?;
        Ok(Step::Failed)
    }

    /// NAKs and spends one retry, failing with `reason` once the budget is gone.
    fn retry(&mut self, reason: FinishReason) -> Result<()> {
        if self.count_retry(reason) {
            self.reset_assembly();
            self.reply(&[NAK])?;
        }
        Ok(())
    }

    fn count_retry(&mut self, reason: FinishReason) -> bool {
        self.retries += 1;
        if self.retries >= self.config.recv_retries {
            self.fail(reason);
            return false;
        }
        self.touch();
        true
    }

    fn fail(&mut self, reason: FinishReason) {
        self.reason = Some(reason);
        self.state = State::RecvErr;
    }

    fn terminate(&mut self) {
        debug!("cancel received");
        self.reason = Some(FinishReason::RemoteTerminated);
        self.state = State::RecvTerm;
    }

    fn read_frame(&mut self) -> Result<Option<Event>> {
        loop {
            match self.assembly {
                Assembly::AwaitingSync => {
                    if self.link.recv(&mut self.buf[..1])? == 0 {
                        return Ok(None);
                    }
                    let sync = self.buf[0];
                    if is_control(sync) {
                        return Ok(Some(Event::Control(sync)));
                    }
                    match frame_len(sync) {
                        Some(len) => {
                            self.assembly = Assembly::AwaitingBody { len, filled: 1 };
                            self.touch();
                        }
                        None => trace!("dropping stray byte {sync:#04x}"),
                    }
                }
                Assembly::AwaitingBody { len, filled } => {
                    let n = self.link.recv(&mut self.buf[filled..len])?;
                    if n == 0 {
                        return Ok(None);
                    }
                    // A frame still arriving keeps the session alive.
                    self.touch();
                    let filled = filled + n;
                    if filled < len {
                        self.assembly = Assembly::AwaitingBody { len, filled };
                        continue;
                    }
                    self.assembly = Assembly::AwaitingSync;
                    return Ok(Some(match validate(&self.buf[..len], self.seq) {
                        Validation::Valid => Event::Packet(len),
                        Validation::Control(c) => Event::Control(c),
                        Validation::Invalid(e) => Event::Invalid(e),
                    }));
                }
            }
        }
    }

    fn reset_assembly(&mut self) {
        self.assembly = Assembly::AwaitingSync;
        self.buf.fill(0);
    }

    fn reply(&mut self, bytes: &'static [u8]) -> Result<()> {
        self.owed = bytes;
        self.flush_owed()
    }

    fn flush_owed(&mut self) -> Result<()> {
        if self.owed.is_empty() {
            return Ok(());
        }
        self.link.put(self.owed)?;
        self.owed = &[];
        self.link.flush()?;
        Ok(())
    }

    fn touch(&mut self) {
        self.last_activity = self.clock.now_ms();
    }

    fn expired(&self) -> bool {
        self.clock.now_ms().saturating_sub(self.last_activity) >= self.config.session_timeout_ms
    }
}
