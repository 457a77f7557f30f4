//! Streaming session lifecycle against the simulated board.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use aiod_acquisition::{
    AcquisitionError, AdcArbiter, StreamSettings, StreamSink, StreamingSession,
};
use aiod_core::registers;
use aiod_core::{ConnectionId, Hardware, HardwareError, NoDma, SimulatedBoard};

struct ChannelSink {
    tx: Sender<Vec<u8>>,
    closed: Arc<AtomicBool>,
}

impl StreamSink for ChannelSink {
    fn send(&mut self, block: &[u8]) -> io::Result<()> {
        self.tx
            .send(block.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "receiver dropped"))
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn channel_sink() -> (Box<dyn StreamSink>, Receiver<Vec<u8>>, Arc<AtomicBool>) {
    let (tx, rx) = mpsc::channel();
    let closed = Arc::new(AtomicBool::new(false));
    let sink = ChannelSink {
        tx,
        closed: Arc::clone(&closed),
    };
    (Box::new(sink), rx, closed)
}

fn settings() -> StreamSettings {
    StreamSettings {
        ring_slots: 8,
        transfer_samples: 4,
        logger_wait: Duration::from_millis(10),
    }
}

fn session_on(board: &Arc<SimulatedBoard>) -> (StreamingSession, Arc<AdcArbiter>) {
    let hardware = Hardware::new(board.clone(), board.clone());
    let arbiter = Arc::new(AdcArbiter::new());
    let session = StreamingSession::new(hardware, Arc::clone(&arbiter), settings());
    (session, arbiter)
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}

fn words(block: &[u8]) -> Vec<u32> {
    block
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect()
}

#[test]
fn streams_blocks_in_dma_order() {
    let board = Arc::new(SimulatedBoard::new());
    board.set_dma_interval(Duration::from_micros(200));
    let (session, _arbiter) = session_on(&board);
    let (sink, rx, closed) = channel_sink();
    let id = ConnectionId(11);

    session.register_endpoint(id, sink);
    session.start(id).unwrap();
    assert_eq!(session.status().active, Some(id));
    assert_eq!(board.dma_transfer_bytes(), 16);

    let mut samples = Vec::new();
    for _ in 0..5 {
        let block = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        samples.extend(words(&block));
    }
    assert_eq!(samples, (0..20).collect::<Vec<u32>>());

    assert!(session.stop());
    wait_until("session end", || session.status().active.is_none());
    session.join();

    assert!(closed.load(Ordering::SeqCst));
    assert!(!board.dma_running());
    assert_eq!(
        board.peek(registers::OFS_ADC_TRIGGER),
        registers::TRIGGER_DISABLED
    );
}

#[test]
fn concurrent_starts_have_one_winner() {
    let board = Arc::new(SimulatedBoard::new());
    let (session, _arbiter) = session_on(&board);
    let session = Arc::new(session);
    let mut receivers = Vec::new();
    for n in 1..=8 {
        let (sink, rx, _) = channel_sink();
        session.register_endpoint(ConnectionId(n), sink);
        receivers.push(rx);
    }

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (1..=8)
        .map(|n| {
            let session = Arc::clone(&session);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (ConnectionId(n), session.start(ConnectionId(n)))
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners: Vec<ConnectionId> = results
        .iter()
        .filter(|(_, r)| r.is_ok())
        .map(|(id, _)| *id)
        .collect();
    assert_eq!(winners.len(), 1);
    let winner = winners[0];

    for (_, result) in &results {
        if let Err(err) = result {
            match err {
                AcquisitionError::StreamBusy { active } => assert_eq!(*active, winner),
                other => panic!("expected busy, got {:?}", other),
            }
        }
    }
    assert_eq!(session.status().active, Some(winner));

    session.stop();
    wait_until("session end", || session.status().active.is_none());
    session.join();
}

#[test]
fn client_failure_tears_session_down() {
    let board = Arc::new(SimulatedBoard::new());
    board.set_dma_interval(Duration::ZERO);
    let (session, arbiter) = session_on(&board);
    let (sink, rx, closed) = channel_sink();
    let id = ConnectionId(3);

    session.register_endpoint(id, sink);
    session.start(id).unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    drop(rx);

    wait_until("teardown", || arbiter.streaming_owner().is_none());
    session.join();

    assert!(closed.load(Ordering::SeqCst));
    assert!(!board.dma_running());
    assert_eq!(
        board.peek(registers::OFS_ADC_TRIGGER),
        registers::TRIGGER_DISABLED
    );
}

#[test]
fn session_can_restart_after_stop() {
    let board = Arc::new(SimulatedBoard::new());
    let (session, _arbiter) = session_on(&board);

    for n in [21, 22] {
        let id = ConnectionId(n);
        let (sink, rx, _) = channel_sink();
        session.register_endpoint(id, sink);
        session.start(id).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        session.stop();
        wait_until("session end", || session.status().active.is_none());
    }
    session.join();
}

#[test]
fn start_without_endpoint_is_rejected() {
    let board = Arc::new(SimulatedBoard::new());
    let (session, arbiter) = session_on(&board);

    assert!(matches!(
        session.start(ConnectionId(5)),
        Err(AcquisitionError::StreamNotConnected { .. })
    ));
    assert_eq!(arbiter.owner(), None);
    assert!(!session.stop());
}

#[test]
fn backend_without_dma_keeps_endpoint() {
    let board = Arc::new(SimulatedBoard::new());
    let hardware = Hardware::new(board, Arc::new(NoDma));
    let arbiter = Arc::new(AdcArbiter::new());
    let session = StreamingSession::new(hardware, Arc::clone(&arbiter), settings());
    let (sink, _rx, _) = channel_sink();
    session.register_endpoint(ConnectionId(1), sink);

    for _ in 0..2 {
        assert!(matches!(
            session.start(ConnectionId(1)),
            Err(AcquisitionError::Hardware(HardwareError::DmaNotSupported))
        ));
        assert_eq!(arbiter.owner(), None);
    }
}

#[test]
fn owner_disconnect_stops_session() {
    let board = Arc::new(SimulatedBoard::new());
    let (session, arbiter) = session_on(&board);
    let (sink, _rx, _) = channel_sink();
    let id = ConnectionId(8);

    session.register_endpoint(id, sink);
    session.start(id).unwrap();
    session.deregister_endpoint(id);

    wait_until("session end", || arbiter.streaming_owner().is_none());
    session.join();
    assert!(!board.dma_running());
}

#[test]
fn stale_cancel_does_not_end_next_session() {
    let board = Arc::new(SimulatedBoard::new());
    board.set_dma_interval(Duration::from_millis(1));
    let (session, arbiter) = session_on(&board);

    let first = ConnectionId(31);
    let (sink, rx, _) = channel_sink();
    session.register_endpoint(first, sink);
    session.start(first).unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(session.stop());
    wait_until("session end", || arbiter.streaming_owner().is_none());

    // A stop while idle leaves a cancel latched on the engine
    assert!(!session.stop());

    let second = ConnectionId(32);
    let (sink, rx, closed) = channel_sink();
    session.register_endpoint(second, sink);
    session.start(second).unwrap();
    for expected in [0u32, 4, 8] {
        let block = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(words(&block)[0], expected);
    }
    assert_eq!(arbiter.streaming_owner(), Some(second));
    assert!(!closed.load(Ordering::SeqCst));

    session.stop();
    wait_until("session end", || arbiter.streaming_owner().is_none());
    session.join();
}
