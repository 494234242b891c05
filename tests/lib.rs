//! End-to-end sessions: a Sender and a Receiver wired back to back by
//! pumping each machine's outgoing bytes into the other's input.

use rand::Rng;
use zmodem_core::frame::{Encoding, Header, Type};
use zmodem_core::{recv, send, Event, Receiver, Sender};

fn log_init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Cooperative scheduler for one full session. Transfers `files` in
/// order, then closes; peer bytes move in `chunk`-sized fragments.
fn run_session(files: &[(&str, Vec<u8>)], chunk: usize) -> (Vec<Vec<u8>>, Vec<Event>, Vec<Event>) {
    let mut sender = Sender::new(true);
    let mut receiver = Receiver::new();

    let mut to_receiver: Vec<u8> = Vec::new();
    let mut to_sender: Vec<u8> = Vec::new();
    let mut received: Vec<Vec<u8>> = vec![Vec::new()];
    let mut sender_events = Vec::new();
    let mut receiver_events = Vec::new();

    let mut queue = files.iter();
    let (mut name, mut data) = queue.next().expect("at least one file").clone();
    sender.start_file(name, data.len() as u32).unwrap();

    for _ in 0..100_000 {
        to_receiver.extend(sender.drain_outgoing());

        if let Some(request) = sender.poll_file() {
            let start = request.offset as usize;
            let end = (start + request.len).min(data.len());
            sender.feed_file(&data[start..end]).unwrap();
            continue;
        }

        while let Some(event) = sender.poll_event() {
            sender_events.push(event);
            if event == Event::FileComplete {
                if let Some((next_name, next_data)) = queue.next() {
                    (name, data) = (*next_name, next_data.clone());
                    sender.start_file(name, data.len() as u32).unwrap();
                } else {
                    sender.finish_session().unwrap();
                }
            }
        }

        let file_bytes = receiver.drain_file();
        if !file_bytes.is_empty() {
            received.last_mut().unwrap().extend(file_bytes);
        }
        to_sender.extend(receiver.drain_outgoing());
        while let Some(event) = receiver.poll_event() {
            receiver_events.push(event);
            if event == Event::FileComplete {
                received.push(Vec::new());
            }
        }

        if !to_receiver.is_empty() {
            let end = chunk.min(to_receiver.len());
            let consumed = receiver.feed_incoming(&to_receiver[..end]).unwrap();
            to_receiver.drain(..consumed);
        }
        if !to_sender.is_empty() {
            let end = chunk.min(to_sender.len());
            let consumed = sender.feed_incoming(&to_sender[..end]).unwrap();
            to_sender.drain(..consumed);
        }

        if sender.is_done() && receiver.state() == recv::State::SessionEnd {
            break;
        }
    }

    assert!(sender.is_done(), "sender never finished");
    assert_eq!(receiver.state(), recv::State::SessionEnd);
    // The closing "OO" trails behind the receiver's final ZFIN.
    to_receiver.extend(sender.drain_outgoing());
    assert_eq!(&to_receiver[to_receiver.len() - 2..], b"OO");

    received.pop();
    (received, sender_events, receiver_events)
}

#[test]
fn handshake_is_zhex_framed() {
    log_init();
    let mut sender = Sender::new(true);
    let mut receiver = Receiver::new();

    let zrqinit = sender.drain_outgoing();
    assert_eq!(&zrqinit[..4], &[0x2A, 0x2A, 0x18, 0x42]);

    let zrinit = receiver.drain_outgoing();
    assert_eq!(&zrinit[..4], &[0x2A, 0x2A, 0x18, 0x42]);

    receiver.feed_incoming(&zrqinit).unwrap();
    sender.feed_incoming(&zrinit).unwrap();
    assert_eq!(sender.state(), send::State::ReadyForFile);
}

#[test]
fn single_file_session() {
    log_init();
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let (received, sender_events, receiver_events) =
        run_session(&[("session.bin", payload.clone())], usize::MAX);

    assert_eq!(received, vec![payload]);
    assert_eq!(
        sender_events,
        vec![Event::FileComplete, Event::SessionComplete]
    );
    assert_eq!(
        receiver_events,
        vec![
            Event::FileStart,
            Event::FileComplete,
            Event::SessionComplete
        ]
    );
}

#[test]
fn multi_file_session() {
    log_init();
    let first: Vec<u8> = vec![0x18; 3000]; // all-ZDLE payload stresses escaping
    let second: Vec<u8> = (0u16..2000).flat_map(u16::to_le_bytes).collect();
    let third: Vec<u8> = Vec::from(&b"tiny"[..]);

    let (received, sender_events, _) = run_session(
        &[
            ("first.bin", first.clone()),
            ("second.bin", second.clone()),
            ("third.txt", third.clone()),
        ],
        usize::MAX,
    );

    assert_eq!(received, vec![first, second, third]);
    assert_eq!(
        sender_events,
        vec![
            Event::FileComplete,
            Event::FileComplete,
            Event::FileComplete,
            Event::SessionComplete
        ]
    );
}

#[test]
fn empty_file_session() {
    log_init();
    let (received, sender_events, _) = run_session(&[("empty.bin", Vec::new())], usize::MAX);
    assert_eq!(received, vec![Vec::<u8>::new()]);
    assert_eq!(
        sender_events,
        vec![Event::FileComplete, Event::SessionComplete]
    );
}

#[test]
fn fragmented_transport_transfers_identically() {
    log_init();
    let payload: Vec<u8> = {
        let mut rng = rand::thread_rng();
        (0..10_000).map(|_| rng.gen()).collect()
    };

    for chunk in [1, 7, 999] {
        let (received, _, _) = run_session(&[("frag.bin", payload.clone())], chunk);
        assert_eq!(received, vec![payload.clone()], "chunk size {chunk}");
    }
}

#[test]
fn garbage_produces_no_output_and_no_events() {
    log_init();
    let garbage: Vec<u8> = {
        let mut rng = rand::thread_rng();
        (0..64 * 1024)
            .map(|_| rng.gen())
            // Keep the stream free of header preambles and escapes.
            .filter(|&b| b != 0x2A && b != 0x18)
            .collect()
    };

    let mut whole = Receiver::new();
    let initial = whole.drain_outgoing();
    let consumed_whole = whole.feed_incoming(&garbage).unwrap();
    assert_eq!(consumed_whole, garbage.len());
    assert!(whole.drain_file().is_empty());
    assert!(whole.poll_event().is_none());
    assert!(whole.drain_outgoing().is_empty());

    for chunk in [1usize, 7, 999] {
        let mut fragmented = Receiver::new();
        assert_eq!(fragmented.drain_outgoing(), initial);

        let mut consumed = 0;
        for piece in garbage.chunks(chunk) {
            consumed += fragmented.feed_incoming(piece).unwrap();
        }
        assert_eq!(consumed, consumed_whole);
        assert!(fragmented.drain_file().is_empty());
        assert!(fragmented.poll_event().is_none());
        assert!(fragmented.drain_outgoing().is_empty());
    }
}

#[test]
fn sender_resyncs_after_corrupt_header_error() {
    log_init();
    let mut sender = Sender::new(true);
    sender.drain_outgoing();

    // A ZRINIT whose hex body was damaged in flight.
    let mut frame = vec![];
    Header::new(Encoding::ZHEX, Type::ZRINIT).encode(&mut frame);
    frame[6] = b'f';
    assert!(sender.feed_incoming(&frame).is_err());

    // The stream recovers on the next clean header.
    let mut clean = vec![];
    Header::new(Encoding::ZHEX, Type::ZRINIT).encode(&mut clean);
    sender.feed_incoming(&clean).unwrap();
    assert_eq!(sender.state(), send::State::ReadyForFile);
}
