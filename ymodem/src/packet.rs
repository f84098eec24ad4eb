//! YMODEM frame codec.
//!
//! ```text
//! +--------+-----+------+--------------------+--------+--------+
//! | SOH/STX| SEQ | ~SEQ | PAYLOAD (128/1024) | CRC hi | CRC lo |
//! +--------+-----+------+--------------------+--------+--------+
//! ```
//!
//! Control bytes (ACK, NAK, EOT, CAN) travel unframed. The CRC covers the
//! padded payload only.

use std::str;

use thiserror::Error;

use crate::{
    crc::crc16_xmodem,
    error::{Error, Result},
};

/// Start of Header - 128 byte block
pub const SOH: u8 = 0x01;
/// Start of Text - 1024 byte block
pub const STX: u8 = 0x02;
/// End of Transmission
pub const EOT: u8 = 0x04;
/// Acknowledge
pub const ACK: u8 = 0x06;
/// Negative Acknowledge
pub const NAK: u8 = 0x15;
/// Cancel
pub const CAN: u8 = 0x18;
/// CRC mode request character
pub const CRC_REQUEST: u8 = b'C';

/// Pad byte for header packets.
pub const HEADER_FILL: u8 = 0x00;
/// Pad byte for the last, short data packet.
pub const DATA_FILL: u8 = 0x1A;

/// Payload size selected by SOH.
pub const SOH_PAYLOAD: usize = 128;
/// Payload size selected by STX.
pub const STX_PAYLOAD: usize = 1024;
/// Header byte, two sequence bytes and two CRC bytes.
pub const FRAME_OVERHEAD: usize = 5;
/// Largest frame on the wire.
pub const MAX_FRAME: usize = STX_PAYLOAD + FRAME_OVERHEAD;

/// Payload size implied by a header byte.
pub fn payload_size(header: u8) -> Option<usize> {
    match header {
        SOH => Some(SOH_PAYLOAD),
        STX => Some(STX_PAYLOAD),
        _ => None,
    }
}

/// Full frame length implied by a header byte.
pub fn frame_len(header: u8) -> Option<usize> {
    payload_size(header).map(|n| n + FRAME_OVERHEAD)
}

/// Returns true for the bytes that travel without framing.
pub fn is_control(byte: u8) -> bool {
    matches!(byte, ACK | EOT | NAK | CAN)
}

/// Why a candidate frame was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Nothing to validate.
    #[error("empty frame")]
    Empty,
    /// First byte is neither a control byte nor SOH/STX.
    #[error("bad sync byte {0:#04x}")]
    BadSync(u8),
    /// Frame length does not match its header byte.
    #[error("frame is {actual} bytes, expected {expected}")]
    BadLength {
        /// Length implied by the header byte.
        expected: usize,
        /// Length received.
        actual: usize,
    },
    /// Sequence byte and its complement disagree.
    #[error("sequence {seq:#04x} does not match complement {complement:#04x}")]
    SeqComplement {
        /// Sequence byte.
        seq: u8,
        /// Complement byte.
        complement: u8,
    },
    /// Well formed, but not the sequence number the receiver wants.
    #[error("sequence {actual}, expected {expected}")]
    SeqMismatch {
        /// Sequence the receiver expects.
        expected: u8,
        /// Sequence carried by the frame.
        actual: u8,
    },
    /// Payload checksum mismatch.
    #[error("crc {actual:#06x}, computed {expected:#06x}")]
    Crc {
        /// CRC computed over the payload.
        expected: u16,
        /// CRC carried by the frame.
        actual: u16,
    },
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    /// A single unframed control byte.
    Control(u8),
    /// A well formed frame with the expected sequence number.
    Valid,
    /// Anything else.
    Invalid(FrameError),
}

/// Validates a candidate frame against the expected sequence number.
///
/// Checks run in wire order: control byte, header byte, length, sequence
/// complement, sequence value, CRC. The first failing rule is reported.
pub fn validate(frame: &[u8], expected_seq: u8) -> Validation {
    let Some(&header) = frame.first() else {
        return Validation::Invalid(FrameError::Empty);
    };
    if is_control(header) {
        return Validation::Control(header);
    }
    let Some(expected) = frame_len(header) else {
        return Validation::Invalid(FrameError::BadSync(header));
    };
    if frame.len() != expected {
        return Validation::Invalid(FrameError::BadLength {
            expected,
            actual: frame.len(),
        });
    }

    let (seq, complement) = (frame[1], frame[2]);
    if seq != !complement {
        return Validation::Invalid(FrameError::SeqComplement { seq, complement });
    }
    if seq != expected_seq {
        return Validation::Invalid(FrameError::SeqMismatch {
            expected: expected_seq,
            actual: seq,
        });
    }

    let computed = crc16_xmodem(0, payload(frame));
    let carried = u16::from_be_bytes([frame[expected - 2], frame[expected - 1]]);
    if computed != carried {
        return Validation::Invalid(FrameError::Crc {
            expected: computed,
            actual: carried,
        });
    }

    Validation::Valid
}

/// Payload region of a full frame.
///
/// # Panics
///
/// Panics if `frame` is shorter than [`FRAME_OVERHEAD`].
pub fn payload(frame: &[u8]) -> &[u8] {
    &frame[3..frame.len() - 2]
}

/// Frames `payload` into `out` and returns the frame length.
///
/// The payload is padded with `fill` up to the size selected by `header`, and
/// the CRC is computed over the padded payload.
///
/// # Errors
///
/// Returns [`Error::InvalidHeaderByte`] if `header` is not SOH or STX, and
/// [`Error::PayloadTooLong`] if the payload exceeds the packet size.
///
/// # Panics
///
/// Panics if `out` is shorter than the resulting frame.
pub fn encode_frame(out: &mut [u8], header: u8, seq: u8, fill: u8, data: &[u8]) -> Result<usize> {
    let capacity = payload_size(header).ok_or(Error::InvalidHeaderByte(header))?;
    if data.len() > capacity {
        return Err(Error::PayloadTooLong {
            len: data.len(),
            capacity,
        });
    }
    let len = capacity + FRAME_OVERHEAD;
    let frame = &mut out[..len];

    frame[0] = header;
    frame[1] = seq;
    frame[2] = !seq;
    let body = &mut frame[3..3 + capacity];
    body[..data.len()].copy_from_slice(data);
    body[data.len()..].fill(fill);

    let crc = crc16_xmodem(0, body);
    frame[len - 2..].copy_from_slice(&crc.to_be_bytes());
    Ok(len)
}

/// Header packet parse failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    /// No NUL after the file name.
    #[error("file name is not NUL terminated")]
    MissingTerminator,
    /// Zero length file name.
    #[error("empty file name")]
    EmptyName,
    /// File name is not valid UTF-8.
    #[error("file name is not valid UTF-8")]
    NonUtf8Name,
    /// Size field absent or not a decimal number.
    #[error("missing or malformed file size")]
    BadSize,
    /// Size field is zero.
    #[error("file size is zero")]
    ZeroSize,
    /// Size exceeds the configured limit.
    #[error("file size {size} exceeds limit {max}")]
    TooLarge {
        /// Announced size.
        size: u64,
        /// Configured maximum.
        max: u64,
    },
}

/// File metadata carried by the header packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// File name as sent by the peer.
    pub name: String,
    /// File size in bytes.
    pub size: u64,
    /// Modification time, seconds since the epoch.
    pub mtime: Option<u64>,
    /// Unix file mode.
    pub mode: Option<u32>,
}

impl FileInfo {
    /// Creates file info with no optional fields.
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            mtime: None,
            mode: None,
        }
    }

    /// Parses a header packet payload.
    ///
    /// Layout: `name\0size[ mtime[ mode]]\0<pad>`. The size token ends at a
    /// space, a NUL or the end of the payload. `mtime` and `mode` are octal
    /// and skipped when malformed.
    ///
    /// # Errors
    ///
    /// Returns a [`HeaderError`] describing the first problem found.
    pub fn parse(payload: &[u8], max_size: u64) -> std::result::Result<Self, HeaderError> {
        let nul = payload
            .iter()
            .position(|&b| b == 0)
            .ok_or(HeaderError::MissingTerminator)?;
        if nul == 0 {
            return Err(HeaderError::EmptyName);
        }
        let name = str::from_utf8(&payload[..nul]).map_err(|_| HeaderError::NonUtf8Name)?;

        let rest = &payload[nul + 1..];
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let mut fields = rest[..end]
            .split(|&b| b == b' ')
            .filter(|f| !f.is_empty());

        let size = fields
            .next()
            .filter(|f| f.iter().all(u8::is_ascii_digit))
            .and_then(|f| str::from_utf8(f).ok())
            .and_then(|f| f.parse::<u64>().ok())
            .ok_or(HeaderError::BadSize)?;
        if size == 0 {
            return Err(HeaderError::ZeroSize);
        }
        if size > max_size {
            return Err(HeaderError::TooLarge {
                size,
                max: max_size,
            });
        }

        let mtime = fields.next().and_then(parse_octal);
        let mode = fields
            .next()
            .and_then(parse_octal)
            .and_then(|m| u32::try_from(m).ok());

        Ok(Self {
            name: name.to_string(),
            size,
            mtime,
            mode,
        })
    }

    /// Appends the unpadded header payload to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.name.as_bytes());
        buf.push(0);
        buf.extend_from_slice(self.size.to_string().as_bytes());
        if let Some(mtime) = self.mtime {
            buf.extend_from_slice(format!(" {mtime:o}").as_bytes());
            if let Some(mode) = self.mode {
                buf.extend_from_slice(format!(" {mode:o}").as_bytes());
            }
        }
        buf.push(0);
    }
}

fn parse_octal(field: &[u8]) -> Option<u64> {
    str::from_utf8(field)
        .ok()
        .and_then(|s| u64::from_str_radix(s, 8).ok())
}

/// True when a header payload carries no file name, which ends the batch.
pub fn is_end_of_batch(payload: &[u8]) -> bool {
    payload.first().is_none_or(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(header: u8, seq: u8, fill: u8, data: &[u8]) -> Vec<u8> {
        let mut out = [0u8; MAX_FRAME];
        let n = encode_frame(&mut out, header, seq, fill, data).unwrap();
        out[..n].to_vec()
    }

    #[test]
    fn test_encode_soh_layout() {
        let f = frame(SOH, 1, DATA_FILL, b"abcd");
        assert_eq!(f.len(), 133);
        assert_eq!(&f[..3], &[SOH, 1, 0xFE]);
        assert_eq!(&f[3..7], b"abcd");
        assert!(f[7..131].iter().all(|&b| b == DATA_FILL));
        let crc = crc16_xmodem(0, &f[3..131]);
        assert_eq!(f[131], (crc >> 8) as u8);
        assert_eq!(f[132], (crc & 0xff) as u8);
    }

    #[test]
    fn test_encode_stx_full() {
        let data = vec![0xAA; STX_PAYLOAD];
        let f = frame(STX, 5, DATA_FILL, &data);
        assert_eq!(f.len(), MAX_FRAME);
        assert_eq!(&f[..3], &[STX, 5, 0xFA]);
        assert_eq!(validate(&f, 5), Validation::Valid);
    }

    #[test]
    fn test_encode_rejects_oversize() {
        let mut out = [0u8; MAX_FRAME];
        let err = encode_frame(&mut out, SOH, 1, 0, &[0u8; 129]).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLong { len: 129, capacity: 128 }));
        let err = encode_frame(&mut out, EOT, 1, 0, &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidHeaderByte(EOT)));
    }

    #[test]
    fn test_control_byte_wins() {
        // Trailing garbage after a control byte is irrelevant.
        assert_eq!(validate(&[EOT, 1, 2, 3], 9), Validation::Control(EOT));
        assert_eq!(validate(&[CAN], 0), Validation::Control(CAN));
        assert_eq!(validate(&[ACK], 0), Validation::Control(ACK));
        assert_eq!(validate(&[NAK], 0), Validation::Control(NAK));
    }

    #[test]
    fn test_validate_rule_order() {
        assert_eq!(validate(&[], 0), Validation::Invalid(FrameError::Empty));
        assert_eq!(
            validate(&[0x55; 133], 0),
            Validation::Invalid(FrameError::BadSync(0x55))
        );

        let good = frame(SOH, 3, DATA_FILL, b"xyz");
        assert_eq!(
            validate(&good[..132], 3),
            Validation::Invalid(FrameError::BadLength {
                expected: 133,
                actual: 132
            })
        );

        let mut bad = good.clone();
        bad[2] = 0x00;
        assert_eq!(
            validate(&bad, 3),
            Validation::Invalid(FrameError::SeqComplement {
                seq: 3,
                complement: 0
            })
        );

        assert_eq!(
            validate(&good, 2),
            Validation::Invalid(FrameError::SeqMismatch {
                expected: 2,
                actual: 3
            })
        );

        let mut bad = good.clone();
        bad[10] ^= 0x01;
        assert!(matches!(
            validate(&bad, 3),
            Validation::Invalid(FrameError::Crc { .. })
        ));

        assert_eq!(validate(&good, 3), Validation::Valid);
    }

    #[test]
    fn test_sequence_wraps() {
        let f = frame(SOH, 0xFF, DATA_FILL, b"");
        assert_eq!(&f[1..3], &[0xFF, 0x00]);
        assert_eq!(validate(&f, 0xFF), Validation::Valid);
    }

    #[test]
    fn test_header_parse_basic() {
        let f = frame(SOH, 0, HEADER_FILL, b"test.bin\x004\x00");
        let info = FileInfo::parse(payload(&f), u64::MAX).unwrap();
        assert_eq!(info, FileInfo::new("test.bin", 4));
    }

    #[test]
    fn test_header_parse_optional_fields() {
        let info = FileInfo::parse(b"a.txt\x001234 14567201130 100644\x00\x00", u64::MAX).unwrap();
        assert_eq!(info.size, 1234);
        assert_eq!(info.mtime, Some(0o14567201130));
        assert_eq!(info.mode, Some(0o100644));

        // Malformed optional fields are ignored.
        let info = FileInfo::parse(b"a.txt\x0010 zz 9\x00", u64::MAX).unwrap();
        assert_eq!(info.size, 10);
        assert_eq!(info.mtime, None);
        assert_eq!(info.mode, None);
    }

    #[test]
    fn test_header_exactly_fills_payload() {
        let mut p = vec![b'n'; 126];
        p.push(0);
        p.push(b'4');
        assert_eq!(p.len(), SOH_PAYLOAD);
        let f = frame(SOH, 0, HEADER_FILL, &p);
        let info = FileInfo::parse(payload(&f), u64::MAX).unwrap();
        assert_eq!(info.name.len(), 126);
        assert_eq!(info.size, 4);
    }

    #[test]
    fn test_header_parse_errors() {
        assert_eq!(FileInfo::parse(b"f\x000\x00", u64::MAX), Err(HeaderError::ZeroSize));
        assert_eq!(FileInfo::parse(&[0u8; 128], u64::MAX), Err(HeaderError::EmptyName));
        assert_eq!(FileInfo::parse(b"noterm", u64::MAX), Err(HeaderError::MissingTerminator));
        assert_eq!(FileInfo::parse(b"f\x00\x00", u64::MAX), Err(HeaderError::BadSize));
        assert_eq!(FileInfo::parse(b"f\x0012x\x00", u64::MAX), Err(HeaderError::BadSize));
        assert_eq!(FileInfo::parse(b"f\x00-3\x00", u64::MAX), Err(HeaderError::BadSize));
        assert_eq!(
            FileInfo::parse(b"f\x0099999999999999999999999\x00", u64::MAX),
            Err(HeaderError::BadSize)
        );
        assert_eq!(
            FileInfo::parse(b"f\x00100\x00", 99),
            Err(HeaderError::TooLarge { size: 100, max: 99 })
        );
        assert_eq!(FileInfo::parse(b"\xff\xfe\x001\x00", u64::MAX), Err(HeaderError::NonUtf8Name));
    }

    #[test]
    fn test_header_encode() {
        let mut buf = Vec::new();
        FileInfo::new("test.bin", 4).encode_into(&mut buf);
        assert_eq!(buf, b"test.bin\x004\x00");

        let mut buf = Vec::new();
        let info = FileInfo {
            mtime: Some(8),
            mode: Some(0o644),
            ..FileInfo::new("x", 1)
        };
        info.encode_into(&mut buf);
        assert_eq!(buf, b"x\x001 10 644\x00");
        assert_eq!(FileInfo::parse(&buf, u64::MAX).unwrap(), info);
    }

    #[test]
    fn test_end_of_batch() {
        assert!(is_end_of_batch(&[0u8; 128]));
        assert!(is_end_of_batch(&[]));
        assert!(!is_end_of_batch(b"next.bin\x0012\x00"));
    }
}
