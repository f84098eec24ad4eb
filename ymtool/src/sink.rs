//! Receive side file writer.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use indicatif::ProgressBar;
use ymodem::{FileInfo, FinishReason, Handler, Reject};

/// Writes the received file into a directory, dropping the padding of the
/// last packet. A file from a failed transfer is removed.
pub struct FileSink {
    dir: PathBuf,
    file: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    remaining: u64,
    progress: ProgressBar,
}

impl FileSink {
    /// Creates a sink writing into `dir`.
    pub fn new(dir: impl Into<PathBuf>, progress: ProgressBar) -> Self {
        Self {
            dir: dir.into(),
            file: None,
            path: None,
            remaining: 0,
            progress,
        }
    }

    /// Path of the file being (or last) written.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Handler for FileSink {
    fn on_header(&mut self, info: &FileInfo) -> Result<(), Reject> {
        // Only the final component; never write outside `dir`.
        let name = Path::new(&info.name)
            .file_name()
            .ok_or_else(|| Reject::new(format!("unusable file name `{}`", info.name)))?;
        let path = self.dir.join(name);
        let file = File::create(&path)
            .map_err(|e| Reject::new(format!("create {}: {e}", path.display())))?;
        info!("receiving {} ({} bytes)", path.display(), info.size);

        self.file = Some(BufWriter::new(file));
        self.path = Some(path);
        self.remaining = info.size;
        self.progress.set_length(info.size);
        self.progress.set_position(0);
        Ok(())
    }

    fn on_packet(&mut self, data: &[u8]) -> Result<(), Reject> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Reject::new("data before header"))?;
        let n = self.remaining.min(data.len() as u64) as usize;
        file.write_all(&data[..n])
            .map_err(|e| Reject::new(format!("write failed: {e}")))?;
        self.remaining -= n as u64;
        self.progress.inc(n as u64);
        Ok(())
    }

    fn on_finish(&mut self, reason: FinishReason) {
        if let Some(mut file) = self.file.take()
            && let Err(e) = file.flush()
        {
            error!("flush failed: {e}");
        }
        if reason == FinishReason::Success {
            self.progress.finish();
            return;
        }
        self.progress.abandon();
        warn!("receive ended: {reason}");
        if let Some(path) = self.path.take() {
            match fs::remove_file(&path) {
                Ok(()) => debug!("removed partial file {}", path.display()),
                Err(e) => error!("failed to remove {}: {e}", path.display()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(dir: &Path) -> FileSink {
        FileSink::new(dir, ProgressBar::hidden())
    }

    #[test]
    fn test_padding_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = sink(dir.path());
        s.on_header(&FileInfo::new("out.bin", 130)).unwrap();
        s.on_packet(&[7u8; 128]).unwrap();
        let mut last = [0x1Au8; 128];
        last[..2].copy_from_slice(&[1, 2]);
        s.on_packet(&last).unwrap();
        s.on_finish(FinishReason::Success);

        let content = fs::read(dir.path().join("out.bin")).unwrap();
        assert_eq!(content.len(), 130);
        assert_eq!(&content[128..], &[1, 2]);
    }

    #[test]
    fn test_failed_transfer_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = sink(dir.path());
        s.on_header(&FileInfo::new("part.bin", 4096)).unwrap();
        s.on_packet(&[9u8; 1024]).unwrap();
        let path = dir.path().join("part.bin");
        assert!(path.exists());

        s.on_finish(FinishReason::Timeout);
        assert!(!path.exists());
        assert!(s.path().is_none());
    }

    #[test]
    fn test_path_components_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = sink(dir.path());
        s.on_header(&FileInfo::new("../../etc/passwd", 1)).unwrap();
        assert_eq!(s.path().unwrap(), dir.path().join("passwd"));
        assert!(s.on_header(&FileInfo::new("..", 1)).is_err());
    }

    #[test]
    fn test_packet_before_header_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = sink(dir.path());
        assert!(s.on_packet(&[0u8; 128]).is_err());
    }
}
