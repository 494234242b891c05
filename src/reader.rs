// SPDX-License-Identifier: MIT OR Apache-2.0
//! Streaming header reader: pulls the next valid header out of a noisy
//! byte stream, one `feed` at a time.

use crate::error::{Error, Result};
use crate::frame::{Encoding, Header};
use crate::{unescape, ZDLE, ZPAD};
use core::convert::TryFrom;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scan {
    Idle,
    OneZpad,
    TwoZpads,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Looking for the ZPAD [ZPAD] ZDLE preamble, skipping anything else.
    SeekingZpad(Scan),
    /// Preamble seen, next byte selects the encoding.
    ReadingEncoding,
    /// Collecting the unescaped header body.
    ReadingData(Encoding),
}

#[derive(Debug)]
pub struct HeaderReader {
    state: State,
    buf: Vec<u8>,
    escape_pending: bool,
}

impl HeaderReader {
    pub fn new() -> Self {
        HeaderReader {
            state: State::SeekingZpad(Scan::Idle),
            buf: Vec::with_capacity(Header::read_size(Encoding::ZHEX)),
            escape_pending: false,
        }
    }

    fn reset(&mut self) {
        self.state = State::SeekingZpad(Scan::Idle);
        self.buf.clear();
        self.escape_pending = false;
    }

    /// Consumes bytes from `input` until a header completes or the input
    /// runs out. Returns the number of bytes consumed and the header, if
    /// one became available. State persists across calls, so the input
    /// may be fragmented arbitrarily.
    pub fn feed(&mut self, input: &[u8]) -> Result<(usize, Option<Header>)> {
        let mut consumed = 0;

        for &byte in input {
            consumed += 1;

            match self.state {
                State::SeekingZpad(scan) => match (scan, byte) {
                    (Scan::Idle, ZPAD) => self.state = State::SeekingZpad(Scan::OneZpad),
                    (_, ZPAD) => self.state = State::SeekingZpad(Scan::TwoZpads),
                    (Scan::Idle, _) => (),
                    (_, ZDLE) => self.state = State::ReadingEncoding,
                    (_, _) => self.state = State::SeekingZpad(Scan::Idle),
                },
                State::ReadingEncoding => match Encoding::try_from(byte) {
                    Ok(encoding) => {
                        self.buf.clear();
                        self.escape_pending = false;
                        self.state = State::ReadingData(encoding);
                    }
                    Err(_) => {
                        self.reset();
                        return Err(Error::MalformedEncoding(byte));
                    }
                },
                State::ReadingData(encoding) => {
                    if self.escape_pending {
                        self.escape_pending = false;
                        self.buf.push(unescape(byte));
                    } else if byte == ZDLE {
                        self.escape_pending = true;
                    } else {
                        self.buf.push(byte);
                    }

                    if self.buf.len() == Header::read_size(encoding) {
                        let result = Header::decode(encoding, &self.buf);
                        self.reset();
                        let header = result?;
                        log::trace!("recv header {header}");
                        return Ok((consumed, Some(header)));
                    }
                }
            }
        }

        Ok((consumed, None))
    }
}

impl Default for HeaderReader {
    fn default() -> Self {
        HeaderReader::new()
    }
}
