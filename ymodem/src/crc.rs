//! CRC16/XMODEM checksum.
//!
//! Polynomial `0x1021`, MSB first, no reflection, no final XOR. Passing a
//! previous result as `seed` continues the checksum across split buffers.

const POLY: u16 = 0x1021;

/// Computes the CRC16/XMODEM of `data`, starting from `seed`.
pub fn crc16_xmodem(seed: u16, data: &[u8]) -> u16 {
    let mut crc = seed;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}
