//! Serial port adapter for the YMODEM engine.

use std::{
    io::{self, ErrorKind, Read, Write},
    time::Duration,
};

use anyhow::Context;
use serialport::{ClearBuffer, SerialPort};
use ymodem::Link;

/// Read timeout used while no specific wait is in progress.
const IDLE_TIMEOUT: Duration = Duration::from_millis(10);

/// A serial port driven as a [`Link`].
pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    /// Opens `path` at `baud`, 8N1.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be opened.
    pub fn open(path: &str, baud: u32) -> anyhow::Result<Self> {
        let port = serialport::new(path, baud)
            .timeout(IDLE_TIMEOUT)
            .open()
            .with_context(|| format!("failed to open serial port {path}"))?;
        info!("opened {path} at {baud} baud");
        Ok(Self { port })
    }
}

impl Link for SerialLink {
    fn put(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)
    }

    fn get_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        self.port.set_timeout(timeout)?;
        let mut buff = [0u8; 1];
        let res = match self.port.read(&mut buff) {
            Ok(1) => Ok(Some(buff[0])),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        };
        self.port.set_timeout(IDLE_TIMEOUT)?;
        res
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let ready = self.port.bytes_to_read()? as usize;
        if ready == 0 {
            return Ok(0);
        }
        let n = ready.min(buf.len());
        match self.port.read(&mut buf[..n]) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}
