// SPDX-License-Identifier: MIT OR Apache-2.0
//! Sans-I/O state machines for the ZMODEM file transfer protocol.
//!
//! The crate contains no transport: a [`Sender`] and a [`Receiver`] are
//! pure data pumps. Bytes arriving from the remote peer go into
//! `feed_incoming`, bytes owed to the peer come out of `drain_outgoing`,
//! and file contents flow through `feed_file` (sender) or `drain_file`
//! (receiver). Every entry point is synchronous and non-blocking; when a
//! machine cannot make progress it simply stops consuming input until the
//! caller services its buffers.
//!
//! ```
//! use zmodem_core::{Receiver, Sender};
//!
//! let mut sender = Sender::new(true);
//! let mut receiver = Receiver::new();
//!
//! // Each constructor queued its greeting; swap them.
//! let zrqinit = sender.drain_outgoing();
//! let zrinit = receiver.drain_outgoing();
//! receiver.feed_incoming(&zrqinit).unwrap();
//! sender.feed_incoming(&zrinit).unwrap();
//! ```

pub mod crc;
pub mod error;
pub mod frame;
mod reader;
pub mod recv;
pub mod send;
pub mod subpacket;

pub use error::{Error, Result};
pub use recv::Receiver;
pub use send::{FileRequest, Sender};

/// Lifecycle notifications polled from either machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// Receiver accepted file metadata; name and size are available.
    FileStart,
    /// The current file finished transferring.
    FileComplete,
    /// The session closed cleanly.
    SessionComplete,
}

pub const ZPAD: u8 = b'*';
pub const ZDLE: u8 = 0x18;
pub const ZDLEE: u8 = 0x58;

pub const ESC_FF: u8 = b'm';
pub const ESC_7F: u8 = b'l';

pub const XON: u8 = 0x11;

/// Largest subpacket payload either side will produce or accept. Shared
/// by the sender's windowing and the receiver's buffer bound so the two
/// cannot diverge.
pub const SUBPACKET_MAX_SIZE: usize = 1024;

/// Upper cap on subpackets per acknowledged window.
pub const SUBPACKET_PER_ACK: usize = 10;

/// Returns the two-byte ZDLE sequence for bytes that must not appear
/// bare on the wire, `None` for pass-through bytes.
pub fn escape(value: u8) -> Option<[u8; 2]> {
    Some(match value {
        0xFF => [ZDLE, ESC_FF],
        0x7F => [ZDLE, ESC_7F],
        0x0D | 0x8D | 0x10 | 0x90 | 0x11 | 0x91 | 0x13 | 0x93 => [ZDLE, value ^ 0x40],
        ZDLE => [ZDLE, ZDLEE],
        _ => return None,
    })
}

/// Converts the byte following a ZDLE back to the original byte.
pub fn unescape(value: u8) -> u8 {
    match value {
        ESC_FF => 0xFF,
        ESC_7F => 0x7F,
        x => {
            if x & 0x60 != 0 {
                x ^ 0x40
            } else {
                x
            }
        }
    }
}

/// Appends `src` to `dst` with ZDLE escaping applied.
pub fn escape_array(src: &[u8], dst: &mut Vec<u8>) {
    for value in src {
        if let Some(value) = escape(*value) {
            dst.extend_from_slice(&value);
        } else {
            dst.push(*value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_round_trip() {
        for byte in 0..=u8::MAX {
            match escape(byte) {
                Some([zdle, escaped]) => {
                    assert_eq!(zdle, ZDLE);
                    assert_ne!(escaped, byte);
                    assert_eq!(unescape(escaped), byte);
                }
                None => assert_ne!(byte, ZDLE),
            }
        }
    }

    #[rstest::rstest]
    #[case(&[], &[])]
    #[case(&[0x00, 0x41, 0x7E], &[0x00, 0x41, 0x7E])]
    #[case(&[ZDLE], &[ZDLE, ZDLEE])]
    #[case(&[0xFF, 0x7F], &[ZDLE, ESC_FF, ZDLE, ESC_7F])]
    #[case(&[0x11, 0x42, 0x13], &[ZDLE, 0x51, 0x42, ZDLE, 0x53])]
    #[case(&[0x0D, 0x8D], &[ZDLE, 0x4D, ZDLE, 0xCD])]
    fn escape_array_cases(#[case] input: &[u8], #[case] expected: &[u8]) {
        let mut out = vec![];
        escape_array(input, &mut out);
        assert_eq!(&out[..], expected);
    }
}
