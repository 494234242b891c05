// SPDX-License-Identifier: MIT OR Apache-2.0
//! ZMODEM header framing: encodings, frame types and the header codec.

use crate::crc::{checksum16, checksum32};
use crate::error::{Error, Result};
use crate::{escape_array, XON, ZDLE, ZPAD};
use bitflags::bitflags;
use core::convert::TryFrom;
use hex::FromHex;
use std::fmt::{self, Display};
use tinyvec::ArrayVec;
use zerocopy::AsBytes;

#[repr(u8)]
#[allow(clippy::upper_case_acronyms)]
#[derive(AsBytes, Clone, Copy, Debug, PartialEq, Eq)]
/// The ZMODEM header encoding
pub enum Encoding {
    ZBIN = 0x41,
    ZHEX = 0x42,
    ZBIN32 = 0x43,
}

const ENCODINGS: &[Encoding] = &[Encoding::ZBIN, Encoding::ZHEX, Encoding::ZBIN32];

#[derive(Clone, Copy, Debug)]
pub struct InvalidEncoding;

impl TryFrom<u8> for Encoding {
    type Error = InvalidEncoding;

    fn try_from(value: u8) -> core::result::Result<Self, Self::Error> {
        ENCODINGS
            .iter()
            .find(|e| value == **e as u8)
            .map_or(Err(InvalidEncoding), |e| Ok(*e))
    }
}

impl Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#02x}", *self as u8)
    }
}

#[repr(u8)]
#[allow(clippy::upper_case_acronyms)]
#[derive(AsBytes, Clone, Copy, Debug, PartialEq, Eq)]
/// The ZMODEM frame type
pub enum Type {
    /// Request receive init
    ZRQINIT = 0,
    /// Receive init
    ZRINIT = 1,
    /// Send init sequence (optional)
    ZSINIT = 2,
    /// ACK to above
    ZACK = 3,
    /// File name from sender
    ZFILE = 4,
    /// To sender: skip this file
    ZSKIP = 5,
    /// Last packet was garbled
    ZNAK = 6,
    /// Abort batch transfers
    ZABORT = 7,
    /// Finish session
    ZFIN = 8,
    /// Resume data trans at this position
    ZRPOS = 9,
    /// Data packet(s) follow
    ZDATA = 10,
    /// End of file
    ZEOF = 11,
    /// Fatal Read or Write error Detected
    ZFERR = 12,
    /// Request for file CRC and response
    ZCRC = 13,
    /// Receiver's Challenge
    ZCHALLENGE = 14,
    /// Request is complete
    ZCOMPL = 15,
    /// Other end canned session with CAN*5
    ZCAN = 16,
    /// Request for free bytes on filesystem
    ZFREECNT = 17,
    /// Command from sending program
    ZCOMMAND = 18,
    /// Output to standard error, data follows
    ZSTDERR = 19,
}

const TYPES: &[Type] = &[
    Type::ZRQINIT,
    Type::ZRINIT,
    Type::ZSINIT,
    Type::ZACK,
    Type::ZFILE,
    Type::ZSKIP,
    Type::ZNAK,
    Type::ZABORT,
    Type::ZFIN,
    Type::ZRPOS,
    Type::ZDATA,
    Type::ZEOF,
    Type::ZFERR,
    Type::ZCRC,
    Type::ZCHALLENGE,
    Type::ZCOMPL,
    Type::ZCAN,
    Type::ZFREECNT,
    Type::ZCOMMAND,
    Type::ZSTDERR,
];

#[derive(Clone, Copy, Debug)]
pub struct InvalidType;

impl TryFrom<u8> for Type {
    type Error = InvalidType;

    fn try_from(value: u8) -> core::result::Result<Self, Self::Error> {
        TYPES
            .iter()
            .find(|t| value == **t as u8)
            .map_or(Err(InvalidType), |t| Ok(*t))
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#02x}", *self as u8)
    }
}

bitflags! {
    /// Flags used as part of ZRINIT to notify the sender about receiver
    /// capabilities.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ReceiverFlags: u8 {
        /// Can send and receive in full-duplex
        const CANFDX = 0x01;
        /// Can receive data in parallel with disk I/O
        const CANOVIO = 0x02;
        /// Can send a break signal
        const CANBRK = 0x04;
        /// Can decrypt
        const CANCRY = 0x08;
        /// Can uncompress
        const CANLZW = 0x10;
        /// Can use 32-bit frame check
        const CANFC32 = 0x20;
        /// Expects control characters to be escaped
        const ESCCTL = 0x40;
        /// Expects 8th bit to be escaped
        const ESC8 = 0x80;
    }
}

#[repr(C)]
#[derive(AsBytes, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    encoding: Encoding,
    frame_type: Type,
    flags: [u8; 4],
}

impl Header {
    pub const fn new(encoding: Encoding, frame_type: Type) -> Header {
        Header {
            encoding,
            frame_type,
            flags: [0; 4],
        }
    }

    pub const fn with_count(&self, count: u32) -> Self {
        Header {
            encoding: self.encoding,
            frame_type: self.frame_type,
            flags: count.to_le_bytes(),
        }
    }

    pub const fn with_flags(&self, flags: &[u8; 4]) -> Self {
        Header {
            encoding: self.encoding,
            frame_type: self.frame_type,
            flags: *flags,
        }
    }

    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub const fn frame_type(&self) -> Type {
        self.frame_type
    }

    pub const fn count(&self) -> u32 {
        u32::from_le_bytes(self.flags)
    }

    /// ZRINIT only: the advertised receive buffer size, 0 for unbounded.
    pub const fn rx_buffer_size(&self) -> u16 {
        u16::from_le_bytes([self.flags[0], self.flags[1]])
    }

    /// ZRINIT only: the advertised capability bits.
    pub const fn receiver_flags(&self) -> ReceiverFlags {
        ReceiverFlags::from_bits_truncate(self.flags[3])
    }

    /// Number of decoded body bytes a reader must collect past the
    /// encoding byte: payload plus CRC trailer, doubled for ZHEX because
    /// the body travels as hex characters.
    pub const fn read_size(encoding: Encoding) -> usize {
        match encoding {
            Encoding::ZBIN => 5 + 2,
            Encoding::ZBIN32 => 5 + 4,
            Encoding::ZHEX => (5 + 2) * 2,
        }
    }

    /// Appends the fully framed wire bytes of the header to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut raw: ArrayVec<[u8; 32]> = ArrayVec::new();

        raw.push(ZPAD);
        if self.encoding == Encoding::ZHEX {
            raw.push(ZPAD);
        }

        raw.push(ZDLE);
        raw.extend_from_slice(self.as_bytes());

        // Skips ZPAD(s), ZDLE and the encoding byte:
        match self.encoding {
            Encoding::ZBIN32 => {
                let crc = checksum32(&raw[3..]);
                raw.extend_from_slice(&crc.to_le_bytes());
            }
            Encoding::ZHEX => {
                let crc = checksum16(&raw[4..]);
                raw.extend_from_slice(&crc.to_be_bytes());
            }
            Encoding::ZBIN => {
                let crc = checksum16(&raw[3..]);
                raw.extend_from_slice(&crc.to_be_bytes());
            }
        }

        if self.encoding == Encoding::ZHEX {
            let hex = hex::encode(&raw[4..]);
            raw.truncate(4);
            raw.extend_from_slice(hex.as_bytes());
        }

        let mut escaped = vec![];
        escape_array(&raw[3..], &mut escaped);
        raw.truncate(3);

        out.extend_from_slice(&raw);
        out.extend_from_slice(&escaped);

        if self.encoding == Encoding::ZHEX {
            // Trailing CRLF for ZHEX transfer:
            out.extend_from_slice(b"\r\n");

            if self.frame_type != Type::ZACK && self.frame_type != Type::ZFIN {
                out.push(XON);
            }
        }
    }

    /// Decodes an unescaped header body of [`Header::read_size`] bytes.
    pub fn decode(encoding: Encoding, body: &[u8]) -> Result<Header> {
        let decoded: Vec<u8>;
        let body = if encoding == Encoding::ZHEX {
            if body.len() % 2 != 0 {
                return Err(Error::MalformedHeader);
            }
            decoded = Vec::from_hex(body).map_err(|_| Error::MalformedHeader)?;
            &decoded[..]
        } else {
            body
        };

        let crc_len = if encoding == Encoding::ZBIN32 { 4 } else { 2 };
        if body.len() < 5 + crc_len {
            return Err(Error::MalformedHeader);
        }

        match encoding {
            Encoding::ZBIN32 => {
                let received = u32::from_le_bytes([body[5], body[6], body[7], body[8]]);
                let computed = checksum32(&body[..5]);
                if computed != received {
                    return Err(Error::UnexpectedCrc32 { computed, received });
                }
            }
            _ => {
                let received = u16::from_be_bytes([body[5], body[6]]);
                let computed = checksum16(&body[..5]);
                if computed != received {
                    return Err(Error::UnexpectedCrc16 { computed, received });
                }
            }
        }

        let frame_type = Type::try_from(body[0]).map_err(|_| Error::MalformedFrame(body[0]))?;
        Ok(Header::new(encoding, frame_type).with_flags(&[body[1], body[2], body[3], body[4]]))
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:8} {}", self.encoding, self.frame_type)
    }
}
