#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io,
    sync::mpsc::{self, RecvTimeoutError, TryRecvError},
    time::Duration,
};

use ymodem::{FileInfo, FinishReason, Handler, Link, Reject};

/// One end of an in-memory full duplex byte pipe.
pub struct PipeLink {
    tx: mpsc::Sender<u8>,
    rx: mpsc::Receiver<u8>,
    writes: usize,
    /// Flip a payload byte of the n-th frame written (0 based).
    corrupt_write: Option<usize>,
}

impl PipeLink {
    pub fn pair() -> (PipeLink, PipeLink) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (Self::new(a_tx, a_rx), Self::new(b_tx, b_rx))
    }

    fn new(tx: mpsc::Sender<u8>, rx: mpsc::Receiver<u8>) -> Self {
        Self {
            tx,
            rx,
            writes: 0,
            corrupt_write: None,
        }
    }

    pub fn corrupt_frame(mut self, n: usize) -> Self {
        self.corrupt_write = Some(n);
        self
    }
}

impl Link for PipeLink {
    fn put(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut bytes = bytes.to_vec();
        if bytes.len() > 100 {
            if self.corrupt_write == Some(self.writes) {
                bytes[64] ^= 0x40;
            }
            self.writes += 1;
        }
        for b in bytes {
            self.tx
                .send(b)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"))?;
        }
        Ok(())
    }

    fn get_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        match self.rx.recv_timeout(timeout) {
            Ok(b) => Ok(Some(b)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut n = 0;
        while n < buf.len() {
            match self.rx.try_recv() {
                Ok(b) => {
                    buf[n] = b;
                    n += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        while self.rx.try_recv().is_ok() {}
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Collects a received file in memory.
#[derive(Default)]
pub struct Collector {
    pub info: Option<FileInfo>,
    pub data: Vec<u8>,
    pub packets: usize,
    pub finished: Vec<FinishReason>,
    pub reject_header: bool,
}

impl Collector {
    /// Received bytes with the final packet's padding removed.
    pub fn file(&self) -> &[u8] {
        let size = self.info.as_ref().map_or(0, |i| i.size as usize);
        &self.data[..size.min(self.data.len())]
    }
}

impl Handler for Collector {
    fn on_header(&mut self, info: &FileInfo) -> Result<(), Reject> {
        if self.reject_header {
            return Err(Reject::new("refusing"));
        }
        self.info = Some(info.clone());
        Ok(())
    }

    fn on_packet(&mut self, data: &[u8]) -> Result<(), Reject> {
        self.data.extend_from_slice(data);
        self.packets += 1;
        Ok(())
    }

    fn on_finish(&mut self, reason: FinishReason) {
        self.finished.push(reason);
    }
}

/// Deterministic, non-repeating-looking test content.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + i / 7) as u8).collect()
}
