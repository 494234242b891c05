// SPDX-License-Identifier: MIT OR Apache-2.0
//! Sender side of a ZMODEM session.

use crate::error::{Error, Result};
use crate::frame::{Encoding, Header, ReceiverFlags, Type};
use crate::reader::HeaderReader;
use crate::subpacket;
use crate::{Event, SUBPACKET_MAX_SIZE, SUBPACKET_PER_ACK};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Waiting for the receiver's ZRINIT invite.
    WaitReceiverInit,
    /// Session is up, no file in flight.
    ReadyForFile,
    /// ZFILE sent, waiting for ZRPOS.
    WaitFilePos,
    /// A file request is pending; the caller owes `feed_file`.
    NeedFileData,
    /// Window closed with ZCRCW, waiting for ZACK.
    WaitFileAck,
    /// ZEOF sent, waiting for the receiver's ZRINIT.
    WaitFileDone,
    /// ZFIN sent, waiting for the peer's ZFIN.
    WaitFinish,
    /// Session closed, "OO" emitted.
    Done,
}

/// A pull request for file bytes: the caller answers with `feed_file`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileRequest {
    pub offset: u32,
    pub len: usize,
}

pub struct Sender {
    state: State,
    file_name: String,
    file_size: u32,
    has_file: bool,
    pending_request: Option<FileRequest>,
    frame_remaining: usize,
    frame_needs_header: bool,
    max_subpacket_size: usize,
    max_subpackets_per_ack: usize,
    outgoing: Vec<u8>,
    event: Option<Event>,
    finish_requested: bool,
    reader: HeaderReader,
}

impl Sender {
    /// An initiating sender opens with ZRQINIT; a non-initiator stays
    /// silent until the receiver announces itself.
    pub fn new(initiator: bool) -> Self {
        let mut sender = Sender {
            state: State::WaitReceiverInit,
            file_name: String::new(),
            file_size: 0,
            has_file: false,
            pending_request: None,
            frame_remaining: 0,
            frame_needs_header: true,
            max_subpacket_size: SUBPACKET_MAX_SIZE,
            max_subpackets_per_ack: 1,
            outgoing: Vec::new(),
            event: None,
            finish_requested: false,
            reader: HeaderReader::new(),
        };
        if initiator {
            sender.queue_header(&Header::new(Encoding::ZHEX, Type::ZRQINIT));
        }
        sender
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Registers the next file to transfer. Legal before the handshake
    /// completes or between files.
    pub fn start_file(&mut self, name: &str, size: u32) -> Result<()> {
        if !matches!(self.state, State::WaitReceiverInit | State::ReadyForFile) {
            return Err(Error::Unsupported);
        }

        self.file_name = name.to_owned();
        self.file_size = size;
        self.has_file = true;

        if self.state == State::ReadyForFile && self.outgoing.is_empty() {
            self.queue_zfile();
            self.state = State::WaitFilePos;
        }
        Ok(())
    }

    /// Latches the intent to close the session once no file is in flight.
    pub fn finish_session(&mut self) -> Result<()> {
        if self.state == State::Done {
            return Err(Error::Unsupported);
        }

        self.finish_requested = true;
        if self.state == State::ReadyForFile {
            self.queue_header(&Header::new(Encoding::ZHEX, Type::ZFIN));
            self.state = State::WaitFinish;
        }
        Ok(())
    }

    /// The file chunk the machine is waiting for, if any.
    pub fn poll_file(&self) -> Option<FileRequest> {
        self.pending_request
    }

    /// Answers the pending [`FileRequest`] with up to `request.len` bytes
    /// starting at `request.offset`. A short chunk closes the window
    /// early.
    pub fn feed_file(&mut self, data: &[u8]) -> Result<()> {
        let request = match (self.state, self.pending_request) {
            (State::NeedFileData, Some(request)) => request,
            _ => return Err(Error::Unsupported),
        };

        let limit = request.len.min((self.file_size - request.offset) as usize);
        if data.is_empty() || data.len() > limit {
            return Err(Error::UnexpectedEof);
        }

        if self.frame_needs_header {
            self.queue_header(&Header::new(Encoding::ZBIN32, Type::ZDATA).with_count(request.offset));
            self.frame_needs_header = false;
        }

        let next_offset = request.offset + data.len() as u32;
        let last_of_file = next_offset >= self.file_size;
        let last_of_window = self.frame_remaining <= 1;
        let short_chunk = data.len() < limit;

        let kind = if last_of_file || last_of_window || short_chunk {
            subpacket::Type::ZCRCW
        } else {
            subpacket::Type::ZCRCG
        };
        subpacket::write(&mut self.outgoing, Encoding::ZBIN32, kind, data);
        self.frame_remaining = self.frame_remaining.saturating_sub(1);

        if kind == subpacket::Type::ZCRCW {
            self.pending_request = None;
            self.state = State::WaitFileAck;
        } else {
            self.pending_request = Some(FileRequest {
                offset: next_offset,
                len: self
                    .max_subpacket_size
                    .min((self.file_size - next_offset) as usize),
            });
        }
        Ok(())
    }

    /// Integrates bytes received from the peer and returns how many were
    /// consumed. Stops early while outgoing bytes, a file request or an
    /// unpolled event await the caller.
    pub fn feed_incoming(&mut self, input: &[u8]) -> Result<usize> {
        let mut consumed = 0;

        while consumed < input.len() {
            if !self.outgoing.is_empty()
                || self.pending_request.is_some()
                || self.event.is_some()
                || self.state == State::Done
            {
                break;
            }

            let (n, header) = self.reader.feed(&input[consumed..])?;
            consumed += n;
            if let Some(header) = header {
                self.handle_header(&header);
            }
        }
        Ok(consumed)
    }

    /// Takes the bytes owed to the peer, leaving the buffer empty.
    pub fn drain_outgoing(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outgoing)
    }

    /// Takes the next lifecycle event, if one fired.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.event.take()
    }

    fn handle_header(&mut self, header: &Header) {
        log::debug!("sender <- {} in {:?}", header, self.state);

        match header.frame_type() {
            Type::ZRINIT => self.on_zrinit(header),
            Type::ZRPOS | Type::ZACK => self.on_position(header.count()),
            Type::ZFIN => {
                if self.state == State::WaitFinish {
                    self.finish();
                }
            }
            other => {
                if self.state == State::WaitReceiverInit {
                    // Peer is confused; repeat the invitation.
                    self.queue_header(&Header::new(Encoding::ZHEX, Type::ZRQINIT));
                } else {
                    log::debug!("sender ignores {} in {:?}", other, self.state);
                }
            }
        }
    }

    fn on_zrinit(&mut self, header: &Header) {
        let caps = header.receiver_flags();
        let rx_buf = header.rx_buffer_size() as usize;

        self.max_subpacket_size = if rx_buf == 0 {
            SUBPACKET_MAX_SIZE
        } else {
            rx_buf.min(SUBPACKET_MAX_SIZE)
        };
        self.max_subpackets_per_ack = if caps.contains(ReceiverFlags::CANOVIO) {
            if rx_buf == 0 {
                SUBPACKET_PER_ACK
            } else {
                (rx_buf / self.max_subpacket_size).clamp(1, SUBPACKET_PER_ACK)
            }
        } else {
            1
        };
        log::debug!(
            "negotiated subpacket size {} window {}",
            self.max_subpacket_size,
            self.max_subpackets_per_ack
        );

        match self.state {
            State::WaitReceiverInit => {
                if self.has_file {
                    self.queue_zfile();
                    self.state = State::WaitFilePos;
                } else if self.finish_requested {
                    self.queue_header(&Header::new(Encoding::ZHEX, Type::ZFIN));
                    self.state = State::WaitFinish;
                } else {
                    self.state = State::ReadyForFile;
                }
            }
            State::WaitFileDone => {
                self.event = Some(Event::FileComplete);
                self.has_file = false;
                if self.finish_requested {
                    self.queue_header(&Header::new(Encoding::ZHEX, Type::ZFIN));
                    self.state = State::WaitFinish;
                } else {
                    self.state = State::ReadyForFile;
                }
            }
            State::WaitFinish => self.finish(),
            _ => log::debug!("sender ignores ZRINIT in {:?}", self.state),
        }
    }

    fn on_position(&mut self, offset: u32) {
        match self.state {
            State::WaitReceiverInit => {
                self.queue_header(&Header::new(Encoding::ZHEX, Type::ZRQINIT));
            }
            State::WaitFilePos | State::WaitFileAck | State::NeedFileData => {
                if offset >= self.file_size {
                    self.pending_request = None;
                    self.queue_header(&Header::new(Encoding::ZBIN32, Type::ZEOF).with_count(offset));
                    self.state = State::WaitFileDone;
                } else {
                    let remaining = (self.file_size - offset) as usize;
                    self.frame_remaining = self
                        .max_subpackets_per_ack
                        .min(remaining.div_ceil(self.max_subpacket_size));
                    self.frame_needs_header = true;
                    self.pending_request = Some(FileRequest {
                        offset,
                        len: self.max_subpacket_size.min(remaining),
                    });
                    self.state = State::NeedFileData;
                }
            }
            _ => log::debug!("sender ignores position frame in {:?}", self.state),
        }
    }

    fn queue_zfile(&mut self) {
        self.queue_header(&Header::new(Encoding::ZBIN32, Type::ZFILE));

        let mut data = Vec::with_capacity(self.file_name.len() + 16);
        data.extend_from_slice(self.file_name.as_bytes());
        data.push(0);
        data.extend_from_slice(self.file_size.to_string().as_bytes());
        data.push(0);
        subpacket::write(
            &mut self.outgoing,
            Encoding::ZBIN32,
            subpacket::Type::ZCRCW,
            &data,
        );
    }

    fn queue_header(&mut self, header: &Header) {
        log::trace!("sender -> {}", header);
        header.encode(&mut self.outgoing);
    }

    fn finish(&mut self) {
        // Over and out:
        self.outgoing.extend_from_slice(b"OO");
        self.state = State::Done;
        self.event = Some(Event::SessionComplete);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{XON, ZDLE, ZPAD};

    fn hex_frame(header: &Header) -> Vec<u8> {
        let mut out = vec![];
        header.encode(&mut out);
        out
    }

    fn zrinit(rx_buf: u16, caps: ReceiverFlags) -> Vec<u8> {
        let size = rx_buf.to_le_bytes();
        hex_frame(
            &Header::new(Encoding::ZHEX, Type::ZRINIT)
                .with_flags(&[size[0], size[1], 0, caps.bits()]),
        )
    }

    #[test]
    fn initiator_opens_with_zrqinit() {
        let mut sender = Sender::new(true);
        let out = sender.drain_outgoing();
        assert_eq!(&out[..4], &[ZPAD, ZPAD, ZDLE, Encoding::ZHEX as u8]);
        // ZHEX ZRQINIT with zero flags is all-zero hex plus CR LF XON.
        let mut expected = vec![ZPAD, ZPAD, ZDLE, Encoding::ZHEX as u8];
        expected.extend_from_slice(b"00000000000000");
        expected.extend_from_slice(&[b'\r', b'\n', XON]);
        assert_eq!(out, expected);

        // Non-initiator stays silent.
        let mut quiet = Sender::new(false);
        assert!(quiet.drain_outgoing().is_empty());
    }

    #[test]
    fn backpressure_blocks_input() {
        let mut sender = Sender::new(true);
        // ZRQINIT not yet drained: nothing is consumed.
        let consumed = sender
            .feed_incoming(&zrinit(1024, ReceiverFlags::CANFDX))
            .unwrap();
        assert_eq!(consumed, 0);

        sender.drain_outgoing();
        let frame = zrinit(1024, ReceiverFlags::CANFDX);
        let consumed = sender.feed_incoming(&frame).unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(sender.state(), State::ReadyForFile);
    }

    #[test]
    fn zrinit_then_file_flow() {
        let mut sender = Sender::new(true);
        sender.drain_outgoing();
        sender
            .feed_incoming(&zrinit(1024, ReceiverFlags::CANFDX))
            .unwrap();
        assert_eq!(sender.state(), State::ReadyForFile);

        sender.start_file("test.txt", 100).unwrap();
        assert_eq!(sender.state(), State::WaitFilePos);
        let zfile = sender.drain_outgoing();
        assert_eq!(&zfile[..3], &[ZPAD, ZDLE, Encoding::ZBIN32 as u8]);

        let zrpos = hex_frame(&Header::new(Encoding::ZHEX, Type::ZRPOS).with_count(0));
        sender.feed_incoming(&zrpos).unwrap();
        let request = sender.poll_file().unwrap();
        assert_eq!(request.offset, 0);
        assert_eq!(request.len, 100);
        assert_eq!(sender.state(), State::NeedFileData);

        // One full-file chunk closes with ZCRCW and awaits the ack.
        sender.feed_file(&[0x41; 100]).unwrap();
        assert!(sender.poll_file().is_none());
        assert_eq!(sender.state(), State::WaitFileAck);
        assert!(!sender.drain_outgoing().is_empty());

        // The ack at end of file elicits ZEOF.
        let zack = hex_frame(&Header::new(Encoding::ZHEX, Type::ZACK).with_count(100));
        sender.feed_incoming(&zack).unwrap();
        assert_eq!(sender.state(), State::WaitFileDone);
        assert_eq!(
            sender.drain_outgoing()[..3],
            [ZPAD, ZDLE, Encoding::ZBIN32 as u8]
        );
    }

    #[test]
    fn windowing_uses_zcrcg_until_window_closes() {
        let mut sender = Sender::new(true);
        sender.drain_outgoing();
        // 8 KiB buffer with CANOVIO: window of 8 subpackets.
        sender
            .feed_incoming(&zrinit(
                8192,
                ReceiverFlags::CANFDX | ReceiverFlags::CANOVIO | ReceiverFlags::CANFC32,
            ))
            .unwrap();
        sender.start_file("big.bin", 100_000).unwrap();
        sender.drain_outgoing();

        let zrpos = hex_frame(&Header::new(Encoding::ZHEX, Type::ZRPOS).with_count(0));
        sender.feed_incoming(&zrpos).unwrap();

        // Seven ZCRCG subpackets keep the request alive.
        for i in 0..7 {
            let request = sender.poll_file().unwrap();
            assert_eq!(request.offset, i * 1024);
            assert_eq!(request.len, 1024);
            sender.feed_file(&[0u8; 1024]).unwrap();
            assert_eq!(sender.state(), State::NeedFileData);
            sender.drain_outgoing();
        }

        // The eighth closes the window.
        sender.feed_file(&[0u8; 1024]).unwrap();
        assert_eq!(sender.state(), State::WaitFileAck);
        assert!(sender.poll_file().is_none());
    }

    #[test]
    fn short_chunk_closes_window_early() {
        let mut sender = Sender::new(true);
        sender.drain_outgoing();
        sender
            .feed_incoming(&zrinit(
                8192,
                ReceiverFlags::CANFDX | ReceiverFlags::CANOVIO | ReceiverFlags::CANFC32,
            ))
            .unwrap();
        sender.start_file("big.bin", 100_000).unwrap();
        sender.drain_outgoing();
        let zrpos = hex_frame(&Header::new(Encoding::ZHEX, Type::ZRPOS).with_count(0));
        sender.feed_incoming(&zrpos).unwrap();

        sender.feed_file(&[0u8; 10]).unwrap();
        assert_eq!(sender.state(), State::WaitFileAck);
    }

    #[test]
    fn feed_file_validates_caller() {
        let mut sender = Sender::new(true);
        assert_eq!(sender.feed_file(&[0u8; 1]), Err(Error::Unsupported));

        sender.drain_outgoing();
        sender
            .feed_incoming(&zrinit(1024, ReceiverFlags::CANFDX))
            .unwrap();
        sender.start_file("f", 10).unwrap();
        sender.drain_outgoing();
        let zrpos = hex_frame(&Header::new(Encoding::ZHEX, Type::ZRPOS).with_count(0));
        sender.feed_incoming(&zrpos).unwrap();

        assert_eq!(sender.feed_file(&[]), Err(Error::UnexpectedEof));
        assert_eq!(sender.feed_file(&[0u8; 11]), Err(Error::UnexpectedEof));
        sender.feed_file(&[0u8; 10]).unwrap();
    }

    #[test]
    fn start_file_rejected_mid_transfer() {
        let mut sender = Sender::new(true);
        sender.drain_outgoing();
        sender
            .feed_incoming(&zrinit(1024, ReceiverFlags::CANFDX))
            .unwrap();
        sender.start_file("f", 10).unwrap();
        assert_eq!(sender.start_file("g", 20), Err(Error::Unsupported));
    }

    #[test]
    fn session_finishes_with_over_and_out() {
        let mut sender = Sender::new(true);
        sender.drain_outgoing();
        sender
            .feed_incoming(&zrinit(1024, ReceiverFlags::CANFDX))
            .unwrap();
        sender.finish_session().unwrap();
        assert_eq!(sender.state(), State::WaitFinish);
        sender.drain_outgoing();

        let zfin = hex_frame(&Header::new(Encoding::ZHEX, Type::ZFIN));
        sender.feed_incoming(&zfin).unwrap();
        assert_eq!(sender.state(), State::Done);
        assert_eq!(sender.drain_outgoing(), b"OO");
        assert_eq!(sender.poll_event(), Some(Event::SessionComplete));
        assert!(sender.is_done());
    }

    #[test]
    fn stray_frame_repeats_invitation() {
        let mut sender = Sender::new(false);
        let znak = hex_frame(&Header::new(Encoding::ZHEX, Type::ZNAK));
        sender.feed_incoming(&znak).unwrap();
        let out = sender.drain_outgoing();
        assert_eq!(&out[..4], &[ZPAD, ZPAD, ZDLE, Encoding::ZHEX as u8]);
    }
}
