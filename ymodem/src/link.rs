//! Collaborator traits the engine is driven through.
//!
//! [`Link`] is the character device: single byte writes and reads, a
//! non-blocking bulk read, input purge and output flush. [`Clock`] is the
//! monotonic millisecond source. Both are implemented by the embedding
//! system; [`IoLink`] and [`SystemClock`] cover std streams and host time.

use std::{
    io::{self, ErrorKind, Read, Write},
    thread,
    time::{Duration, Instant},
};

/// Byte-level access to the wire.
///
/// "Nothing available" is never an error: [`Link::get_byte`] returns
/// `Ok(None)` and [`Link::recv`] returns `Ok(0)`. An `Err` means the link
/// itself is broken.
pub trait Link {
    /// Writes bytes to the peer.
    fn put(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Waits up to `timeout` for a single byte.
    fn get_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>>;

    /// Reads whatever is ready into `buf` without waiting.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Discards pending input.
    fn clear_input(&mut self) -> io::Result<()>;

    /// Pushes buffered output onto the wire.
    fn flush(&mut self) -> io::Result<()>;
}

/// Monotonic time source.
pub trait Clock {
    /// Milliseconds since an arbitrary fixed origin.
    fn now_ms(&self) -> u64;

    /// Blocks the calling thread for `ms` milliseconds.
    fn delay_ms(&self, ms: u64);
}

impl<L: Link + ?Sized> Link for &mut L {
    fn put(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).put(bytes)
    }

    fn get_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        (**self).get_byte(timeout)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).recv(buf)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        (**self).clear_input()
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    fn delay_ms(&self, ms: u64) {
        (**self).delay_ms(ms)
    }
}

/// Host clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Creates a clock whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn delay_ms(&self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Pause between attempts while [`IoLink::get_byte`] waits on a stream that
/// reports "nothing ready" without blocking.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

/// Adapts a std stream to [`Link`].
///
/// The stream's own read timeout governs how long reads wait, so it should
/// be short (a serial port opened with a few milliseconds of timeout). Reads
/// that fail with `TimedOut` or `WouldBlock`, or return zero bytes, count as
/// "nothing available". A zero-byte read is end of stream, so
/// [`Link::get_byte`] gives up on it at once.
pub struct IoLink<T> {
    inner: T,
}

impl<T: Read + Write> IoLink<T> {
    /// Wraps a stream.
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Borrows the wrapped stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if is_idle(&e) => Ok(0),
            Err(e) => Err(e),
        }
    }
}

fn is_idle(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}

impl<T: Read + Write> Link for IoLink<T> {
    fn put(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)
    }

    fn get_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        let start = Instant::now();
        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if is_idle(&e) => {}
                Err(e) => return Err(e),
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Ok(None);
            }
            thread::sleep(IDLE_BACKOFF.min(timeout - elapsed));
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_some(buf)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        let mut scratch = [0u8; 256];
        while self.read_some(&mut scratch)? > 0 {}
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
