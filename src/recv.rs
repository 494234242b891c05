// SPDX-License-Identifier: MIT OR Apache-2.0
//! Receiver side of a ZMODEM session.

use crate::error::{Error, Result};
use crate::frame::{Encoding, Header, ReceiverFlags, Type};
use crate::reader::HeaderReader;
use crate::subpacket;
use crate::{Event, SUBPACKET_MAX_SIZE};
use std::collections::VecDeque;

/// Pending lifecycle events the caller has not polled yet.
const EVENT_CAPACITY: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Waiting for the sender to announce itself.
    SessionBegin,
    /// Session is up, waiting for the next ZFILE or ZFIN.
    FileBegin,
    /// Reading the ZFILE metadata subpacket.
    FileReadingMetadata,
    /// Reading data subpackets of the current ZDATA frame.
    FileReadingSubpacket,
    /// Between data frames, waiting for ZDATA, ZEOF or ZFIN.
    FileWaitingSubpacket,
    /// ZFIN exchanged; the machine is inert.
    SessionEnd,
}

pub struct Receiver {
    state: State,
    count: u32,
    file_name: Vec<u8>,
    file_size: u32,
    has_file: bool,
    reader: HeaderReader,
    subpacket: subpacket::Reader,
    outgoing: Vec<u8>,
    events: VecDeque<Event>,
}

impl Receiver {
    /// A new receiver immediately queues its ZRINIT greeting.
    pub fn new() -> Self {
        let mut receiver = Receiver {
            state: State::SessionBegin,
            count: 0,
            file_name: Vec::new(),
            file_size: 0,
            has_file: false,
            reader: HeaderReader::new(),
            subpacket: subpacket::Reader::new(),
            outgoing: Vec::new(),
            events: VecDeque::with_capacity(EVENT_CAPACITY),
        };
        receiver.queue_zrinit();
        receiver
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Name of the file in flight, as raw bytes off the wire.
    pub fn file_name(&self) -> Option<&[u8]> {
        self.has_file.then_some(&self.file_name[..])
    }

    /// Declared size of the file in flight.
    pub fn file_size(&self) -> Option<u32> {
        self.has_file.then_some(self.file_size)
    }

    /// Validated data bytes delivered to the caller for the current file.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Integrates bytes received from the peer and returns how many were
    /// consumed. Stops early while outgoing bytes, undrained file data or
    /// a full event queue await the caller.
    pub fn feed_incoming(&mut self, input: &[u8]) -> Result<usize> {
        let mut consumed = 0;

        while consumed < input.len() {
            if !self.outgoing.is_empty()
                || self.subpacket.state() == subpacket::State::Writing
                || self.events.len() >= EVENT_CAPACITY
                || self.state == State::SessionEnd
            {
                break;
            }

            match self.state {
                State::FileReadingMetadata | State::FileReadingSubpacket => {
                    let (n, kind) = self.subpacket.feed(&input[consumed..])?;
                    consumed += n;
                    if kind.is_some() && self.state == State::FileReadingMetadata {
                        self.on_metadata()?;
                    }
                    if n == 0 {
                        break;
                    }
                }
                _ => {
                    let (n, header) = self.reader.feed(&input[consumed..])?;
                    consumed += n;
                    if let Some(header) = header {
                        self.handle_header(&header);
                    }
                }
            }
        }
        Ok(consumed)
    }

    /// Takes the bytes owed to the peer, leaving the buffer empty.
    pub fn drain_outgoing(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outgoing)
    }

    /// Takes the verified file bytes of the current subpacket and
    /// acknowledges it, so the next `feed_incoming` continues past it.
    pub fn drain_file(&mut self) -> Vec<u8> {
        if self.subpacket.state() != subpacket::State::Writing {
            return Vec::new();
        }
        let data = self.subpacket.take_pending();
        self.finish_subpacket();
        data
    }

    /// Marks `n` bytes of the pending file data as consumed; once the
    /// whole subpacket has been consumed it is acknowledged like
    /// [`Receiver::drain_file`].
    pub fn advance_file(&mut self, n: usize) {
        if self.subpacket.state() != subpacket::State::Writing {
            return;
        }
        self.subpacket.advance(n);
        if self.subpacket.pending().is_empty() {
            self.finish_subpacket();
        }
    }

    /// The not-yet-consumed slice of the pending subpacket.
    pub fn pending_file(&self) -> &[u8] {
        if self.subpacket.state() == subpacket::State::Writing {
            self.subpacket.pending()
        } else {
            &[]
        }
    }

    /// Takes the next lifecycle event, if one fired.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    fn handle_header(&mut self, header: &Header) {
        log::debug!("receiver <- {} in {:?}", header, self.state);

        match (self.state, header.frame_type()) {
            (State::SessionBegin, Type::ZRQINIT) => self.queue_zrinit(),
            (State::SessionBegin | State::FileBegin, Type::ZFILE) => {
                self.subpacket.start(header.encoding());
                self.state = State::FileReadingMetadata;
            }
            (State::FileBegin | State::FileWaitingSubpacket, Type::ZDATA) => {
                if header.count() != self.count {
                    log::debug!(
                        "ZDATA offset mismatch: frame({}) != recv({})",
                        header.count(),
                        self.count
                    );
                    self.queue_header(
                        &Header::new(Encoding::ZHEX, Type::ZRPOS).with_count(self.count),
                    );
                } else {
                    self.subpacket.start(header.encoding());
                    self.state = State::FileReadingSubpacket;
                }
            }
            (State::SessionBegin, Type::ZDATA) => self.queue_zrinit(),
            // ZEOF straight after ZRPOS(0) happens for zero-length files.
            (State::FileBegin | State::FileWaitingSubpacket, Type::ZEOF) => {
                if header.count() == self.count {
                    self.queue_zrinit();
                    self.state = State::FileBegin;
                    self.has_file = false;
                    self.push_event(Event::FileComplete);
                } else {
                    // A fresh ZDATA for the missing range is coming.
                    log::debug!(
                        "ZEOF offset mismatch: frame({}) != recv({})",
                        header.count(),
                        self.count
                    );
                }
            }
            (State::FileBegin | State::FileWaitingSubpacket, Type::ZFIN) => {
                self.queue_header(&Header::new(Encoding::ZHEX, Type::ZFIN));
                self.state = State::SessionEnd;
                self.push_event(Event::SessionComplete);
            }
            (state, other) => log::debug!("receiver ignores {} in {:?}", other, state),
        }
    }

    /// Completion hook for the ZFILE metadata subpacket: null-terminated
    /// file name, then a decimal size ended by space or null.
    fn on_metadata(&mut self) -> Result<()> {
        let payload = self.subpacket.take_pending();

        let name_end = payload
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::MalformedFileName)?;
        if name_end == 0 {
            return Err(Error::MalformedFileName);
        }
        self.file_name = payload[..name_end].to_vec();

        // Some implementations pad the size field with leading spaces.
        let rest = &payload[name_end + 1..];
        let rest = &rest[rest.iter().take_while(|&&b| b == b' ').count()..];
        let size_end = rest
            .iter()
            .position(|&b| b == b' ' || b == 0)
            .unwrap_or(rest.len());
        let digits = &rest[..size_end];
        if digits.is_empty() {
            return Err(Error::MalformedFileSize);
        }
        let mut size: u32 = 0;
        for &digit in digits {
            if !digit.is_ascii_digit() {
                return Err(Error::MalformedFileSize);
            }
            size = size
                .checked_mul(10)
                .and_then(|s| s.checked_add(u32::from(digit - b'0')))
                .ok_or(Error::MalformedFileSize)?;
        }

        self.file_size = size;
        self.has_file = true;
        self.count = 0;
        self.subpacket.finish(false);
        self.state = State::FileBegin;
        self.queue_header(&Header::new(Encoding::ZHEX, Type::ZRPOS).with_count(0));
        self.push_event(Event::FileStart);

        log::debug!(
            "file '{}' size {}",
            String::from_utf8_lossy(&self.file_name),
            self.file_size
        );
        Ok(())
    }

    /// Acknowledges the drained subpacket according to its terminator.
    fn finish_subpacket(&mut self) {
        let Some(kind) = self.subpacket.terminator() else {
            return;
        };
        self.count = self.count.wrapping_add(self.subpacket.payload_len() as u32);

        match kind {
            subpacket::Type::ZCRCW => {
                self.queue_zack();
                self.state = State::FileWaitingSubpacket;
                self.subpacket.finish(false);
            }
            subpacket::Type::ZCRCQ => {
                self.queue_zack();
                self.subpacket.finish(true);
            }
            subpacket::Type::ZCRCG => self.subpacket.finish(true),
            subpacket::Type::ZCRCE => {
                self.state = State::FileWaitingSubpacket;
                self.subpacket.finish(false);
            }
        }
    }

    fn queue_zrinit(&mut self) {
        let size = (SUBPACKET_MAX_SIZE as u16).to_le_bytes();
        let caps = ReceiverFlags::CANFDX | ReceiverFlags::CANFC32;
        self.queue_header(
            &Header::new(Encoding::ZHEX, Type::ZRINIT).with_flags(&[
                size[0],
                size[1],
                0,
                caps.bits(),
            ]),
        );
    }

    fn queue_zack(&mut self) {
        self.queue_header(&Header::new(Encoding::ZHEX, Type::ZACK).with_count(self.count));
    }

    fn queue_header(&mut self, header: &Header) {
        log::trace!("receiver -> {}", header);
        header.encode(&mut self.outgoing);
    }

    fn push_event(&mut self, event: Event) {
        debug_assert!(self.events.len() < EVENT_CAPACITY);
        self.events.push_back(event);
    }
}

impl Default for Receiver {
    fn default() -> Self {
        Receiver::new()
    }
}
