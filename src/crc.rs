// SPDX-License-Identifier: MIT OR Apache-2.0
//! CRC-16-XMODEM and CRC-32-ISO-HDLC, one-shot and incremental.

use crc::{Crc, Digest, CRC_16_XMODEM, CRC_32_ISO_HDLC};

pub static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);
pub static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// One-shot CRC-16-XMODEM over a buffer.
pub fn checksum16(buf: &[u8]) -> u16 {
    CRC16.checksum(buf)
}

/// One-shot CRC-32-ISO-HDLC over a buffer.
pub fn checksum32(buf: &[u8]) -> u32 {
    CRC32.checksum(buf)
}

/// Incremental CRC-16 accumulator for byte-at-a-time unescape loops.
pub struct Crc16 {
    digest: Option<Digest<'static, u16>>,
}

impl Crc16 {
    pub fn new() -> Self {
        Crc16 {
            digest: Some(CRC16.digest()),
        }
    }

    pub fn reset(&mut self) {
        self.digest = Some(CRC16.digest());
    }

    pub fn update(&mut self, buf: &[u8]) {
        if let Some(digest) = self.digest.as_mut() {
            digest.update(buf);
        }
    }

    pub fn update_byte(&mut self, byte: u8) {
        self.update(&[byte]);
    }

    /// Returns the accumulated value and resets for the next run.
    pub fn finalize(&mut self) -> u16 {
        let digest = self.digest.take().unwrap_or_else(|| CRC16.digest());
        let value = digest.finalize();
        self.reset();
        value
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Crc16::new()
    }
}

/// Incremental CRC-32 accumulator for byte-at-a-time unescape loops.
pub struct Crc32 {
    digest: Option<Digest<'static, u32>>,
}

impl Crc32 {
    pub fn new() -> Self {
        Crc32 {
            digest: Some(CRC32.digest()),
        }
    }

    pub fn reset(&mut self) {
        self.digest = Some(CRC32.digest());
    }

    pub fn update(&mut self, buf: &[u8]) {
        if let Some(digest) = self.digest.as_mut() {
            digest.update(buf);
        }
    }

    pub fn update_byte(&mut self, byte: u8) {
        self.update(&[byte]);
    }

    /// Returns the accumulated value and resets for the next run.
    pub fn finalize(&mut self) -> u32 {
        let digest = self.digest.take().unwrap_or_else(|| CRC32.digest());
        let value = digest.finalize();
        self.reset();
        value
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Crc32::new()
    }
}
