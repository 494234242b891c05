// SPDX-License-Identifier: MIT OR Apache-2.0
//! ZMODEM data subpackets: terminator types, the streaming reader for
//! the data phase and the matching wire writer.

use crate::crc::{Crc16, Crc32, CRC16, CRC32};
use crate::error::{Error, Result};
use crate::frame::Encoding;
use crate::{escape_array, unescape, SUBPACKET_MAX_SIZE, ZDLE};
use core::convert::TryFrom;
use std::fmt::{self, Display};
use tinyvec::ArrayVec;
use zerocopy::AsBytes;

#[repr(u8)]
#[allow(clippy::upper_case_acronyms)]
#[derive(AsBytes, Clone, Copy, Debug, PartialEq, Eq)]
/// The ZMODEM subpacket type
pub enum Type {
    /// CRC next, frame ends, header packet follows
    ZCRCE = b'h',
    /// CRC next, frame continues nonstop
    ZCRCG = b'i',
    /// CRC next, frame continues, ZACK expected
    ZCRCQ = b'j',
    /// CRC next, ZACK expected, end of frame
    ZCRCW = b'k',
}

const TYPES: &[Type] = &[Type::ZCRCE, Type::ZCRCG, Type::ZCRCQ, Type::ZCRCW];

#[derive(Clone, Copy, Debug)]
pub struct InvalidType;

impl TryFrom<u8> for Type {
    type Error = InvalidType;

    fn try_from(value: u8) -> core::result::Result<Self, Self::Error> {
        TYPES
            .iter()
            .find(|e| value == **e as u8)
            .map_or(Err(InvalidType), |e| Ok(*e))
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#02x}", *self as u8)
    }
}

/// Appends one subpacket to `out`: escaped data, the ZDLE terminator
/// sequence, then the escaped CRC over data plus terminator byte.
pub fn write(out: &mut Vec<u8>, encoding: Encoding, kind: Type, data: &[u8]) {
    log::trace!("send subpacket {} len {}", kind, data.len());

    escape_array(data, out);
    out.push(ZDLE);
    out.push(kind as u8);

    match encoding {
        Encoding::ZBIN32 => {
            let mut digest = CRC32.digest();
            digest.update(data);
            digest.update(&[kind as u8]);
            // Assuming little-endian byte order, given that ZMODEM used
            // to work on VAX, which was a little-endian computer
            // architecture:
            escape_array(&digest.finalize().to_le_bytes(), out);
        }
        _ => {
            let mut digest = CRC16.digest();
            digest.update(data);
            digest.update(&[kind as u8]);
            escape_array(&digest.finalize().to_be_bytes(), out);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Not inside a data frame.
    Idle,
    /// Unescaping payload bytes until a terminator appears.
    Reading,
    /// Collecting the CRC trailer bytes.
    Crc,
    /// Payload verified and parked for the caller to drain.
    Writing,
}

/// Streaming subpacket reader. The payload/CRC escape state is tracked
/// separately per phase so a ZDLE sitting exactly on the payload/CRC
/// boundary lands in the right half.
pub struct Reader {
    state: State,
    encoding: Encoding,
    payload: Vec<u8>,
    drained: usize,
    terminator: Option<Type>,
    escape_data: bool,
    escape_crc: bool,
    crc_buf: ArrayVec<[u8; 4]>,
    crc16: Crc16,
    crc32: Crc32,
}

impl Reader {
    pub fn new() -> Self {
        Reader {
            state: State::Idle,
            encoding: Encoding::ZBIN32,
            payload: Vec::with_capacity(SUBPACKET_MAX_SIZE),
            drained: 0,
            terminator: None,
            escape_data: false,
            escape_crc: false,
            crc_buf: ArrayVec::new(),
            crc16: Crc16::new(),
            crc32: Crc32::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Begins a fresh data frame whose CRC width follows `encoding`.
    pub fn start(&mut self, encoding: Encoding) {
        self.encoding = encoding;
        self.clear();
        self.state = State::Reading;
    }

    /// Closes out a verified subpacket: `Reading` to continue within the
    /// same frame, `Idle` when the frame ended.
    pub fn finish(&mut self, frame_continues: bool) {
        self.clear();
        self.state = if frame_continues {
            State::Reading
        } else {
            State::Idle
        };
    }

    fn clear(&mut self) {
        self.payload.clear();
        self.drained = 0;
        self.terminator = None;
        self.escape_data = false;
        self.escape_crc = false;
        self.crc_buf.clear();
        self.crc16.reset();
        self.crc32.reset();
    }

    pub fn terminator(&self) -> Option<Type> {
        self.terminator
    }

    /// Full length of the verified payload, independent of drain progress.
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// The not-yet-drained slice of the verified payload.
    pub fn pending(&self) -> &[u8] {
        &self.payload[self.drained..]
    }

    /// Marks `n` pending bytes as consumed by the caller.
    pub fn advance(&mut self, n: usize) {
        self.drained = (self.drained + n).min(self.payload.len());
    }

    /// Takes all pending bytes at once.
    pub fn take_pending(&mut self) -> Vec<u8> {
        let data = self.payload[self.drained..].to_vec();
        self.drained = self.payload.len();
        data
    }

    /// Consumes bytes from `input` until a subpacket completes, the input
    /// runs out, or the reader is parked (`Idle`/`Writing`). Returns the
    /// number of bytes consumed and the terminator once a subpacket has
    /// been verified; the payload then waits in `pending`.
    pub fn feed(&mut self, input: &[u8]) -> Result<(usize, Option<Type>)> {
        let mut consumed = 0;

        for &byte in input {
            if self.state == State::Idle || self.state == State::Writing {
                break;
            }
            consumed += 1;

            match self.state {
                State::Reading => {
                    if self.escape_data {
                        self.escape_data = false;
                        if let Ok(kind) = Type::try_from(byte) {
                            self.terminator = Some(kind);
                            self.update_crc(byte);
                            self.state = State::Crc;
                        } else {
                            self.push_payload(unescape(byte))?;
                        }
                    } else if byte == ZDLE {
                        self.escape_data = true;
                    } else {
                        self.push_payload(byte)?;
                    }
                }
                State::Crc => {
                    if self.escape_crc {
                        self.escape_crc = false;
                        if Type::try_from(byte).is_ok() {
                            self.state = State::Idle;
                            return Err(Error::MalformedPacket(byte));
                        }
                        self.crc_buf.push(unescape(byte));
                    } else if byte == ZDLE {
                        self.escape_crc = true;
                        continue;
                    } else {
                        self.crc_buf.push(byte);
                    }

                    let crc_len = if self.encoding == Encoding::ZBIN32 { 4 } else { 2 };
                    if self.crc_buf.len() == crc_len {
                        self.verify_crc()?;
                        self.state = State::Writing;
                        log::trace!(
                            "recv subpacket {} len {}",
                            self.terminator.map_or(0, |t| t as u8),
                            self.payload.len()
                        );
                        return Ok((consumed, self.terminator));
                    }
                }
                State::Idle | State::Writing => unreachable!(),
            }
        }

        Ok((consumed, None))
    }

    fn push_payload(&mut self, byte: u8) -> Result<()> {
        if self.payload.len() >= SUBPACKET_MAX_SIZE {
            self.state = State::Idle;
            return Err(Error::OutOfMemory);
        }
        self.payload.push(byte);
        self.update_crc(byte);
        Ok(())
    }

    fn update_crc(&mut self, byte: u8) {
        match self.encoding {
            Encoding::ZBIN32 => self.crc32.update_byte(byte),
            _ => self.crc16.update_byte(byte),
        }
    }

    fn verify_crc(&mut self) -> Result<()> {
        match self.encoding {
            Encoding::ZBIN32 => {
                let received = u32::from_le_bytes([
                    self.crc_buf[0],
                    self.crc_buf[1],
                    self.crc_buf[2],
                    self.crc_buf[3],
                ]);
                let computed = self.crc32.finalize();
                if computed != received {
                    self.state = State::Idle;
                    return Err(Error::UnexpectedCrc32 { computed, received });
                }
            }
            _ => {
                let received = u16::from_be_bytes([self.crc_buf[0], self.crc_buf[1]]);
                let computed = self.crc16.finalize();
                if computed != received {
                    self.state = State::Idle;
                    return Err(Error::UnexpectedCrc16 { computed, received });
                }
            }
        }
        Ok(())
    }
}

impl Default for Reader {
    fn default() -> Self {
        Reader::new()
    }
}
