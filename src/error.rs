// SPDX-License-Identifier: MIT OR Apache-2.0
//! Protocol failure kinds.
//!
//! Every failure is fatal to the current session but leaves the process
//! intact: the caller can drop the machine and start a fresh one.

/// A ZMODEM session failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Encoding byte after the ZDLE preamble was not ZBIN, ZHEX or ZBIN32.
    #[error("invalid encoding byte {0:#04x}")]
    MalformedEncoding(u8),

    /// Frame type byte outside the ZMODEM frame table.
    #[error("invalid frame type {0:#04x}")]
    MalformedFrame(u8),

    /// Header body was structurally broken: odd-length or non-hex ZHEX
    /// body, or too few bytes for the payload and its CRC trailer.
    #[error("malformed header")]
    MalformedHeader,

    /// Structural break inside a subpacket, such as a terminator byte
    /// where CRC bytes were expected.
    #[error("invalid byte {0:#04x} in subpacket")]
    MalformedPacket(u8),

    /// ZFILE metadata carried no file name.
    #[error("file name missing from file metadata")]
    MalformedFileName,

    /// ZFILE metadata size field was not a decimal integer.
    #[error("file size is not a decimal integer")]
    MalformedFileSize,

    /// CRC-16 trailer did not match the received bytes.
    #[error("crc16 mismatch: computed {computed:#06x}, received {received:#06x}")]
    UnexpectedCrc16 { computed: u16, received: u16 },

    /// CRC-32 trailer did not match the received bytes.
    #[error("crc32 mismatch: computed {computed:#010x}, received {received:#010x}")]
    UnexpectedCrc32 { computed: u32, received: u32 },

    /// The caller fed an empty or over-long file chunk.
    #[error("unexpected end of file data")]
    UnexpectedEof,

    /// A bounded buffer would overflow.
    #[error("buffer capacity exceeded")]
    OutOfMemory,

    /// Operation is not legal in the machine's current state.
    #[error("operation not legal in the current state")]
    Unsupported,
}

pub type Result<T> = core::result::Result<T, Error>;
