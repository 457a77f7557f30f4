//! Scan engine against the simulated board.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use aiod_acquisition::{AcquisitionError, AdcArbiter, ScanEngine, ScanSettings};
use aiod_core::registers::{self, sample};
use aiod_core::{ConnectionId, HardwareResult, RegisterPort, SimulatedBoard};

/// FIFO that always reports a pending word and only ever yields invalid ones.
struct StuckFifo;

impl RegisterPort for StuckFifo {
    fn read(&self, offset: u8) -> HardwareResult<u32> {
        Ok(match offset {
            registers::OFS_ADC_FIFO_COUNT => 1,
            registers::OFS_ADC_FIFO_DATA => sample::INVALID,
            _ => 0,
        })
    }

    fn write(&self, _offset: u8, _value: u32) -> HardwareResult<()> {
        Ok(())
    }
}

/// Simulated board whose FIFO yields an invalid word before every real one.
struct InterleavedInvalid {
    board: SimulatedBoard,
    data_reads: AtomicUsize,
}

impl RegisterPort for InterleavedInvalid {
    fn read(&self, offset: u8) -> HardwareResult<u32> {
        if offset == registers::OFS_ADC_FIFO_DATA
            && self.data_reads.fetch_add(1, Ordering::SeqCst) % 2 == 0
        {
            return Ok(sample::INVALID | sample::encode(0, 0, false, 0xBAD));
        }
        self.board.read(offset)
    }

    fn write(&self, offset: u8, value: u32) -> HardwareResult<()> {
        self.board.write(offset, value)
    }
}

fn fast_settings() -> ScanSettings {
    ScanSettings {
        settle: Duration::ZERO,
        poll_interval: Duration::from_micros(100),
        timeout_floor: Duration::from_millis(30),
        ..ScanSettings::default()
    }
}

fn setup(board: &SimulatedBoard, start: u8, end: u8, oversample: u8) {
    board.write(registers::OFS_ADC_START_CHANNEL, u32::from(start)).unwrap();
    board.write(registers::OFS_ADC_END_CHANNEL, u32::from(end)).unwrap();
    board.write(registers::OFS_ADC_OVERSAMPLES, u32::from(oversample)).unwrap();
}

#[test]
fn scan_reads_every_configured_channel() {
    let board = SimulatedBoard::new();
    for channel in 0..4 {
        board.set_analog_input(channel, 1000 * u16::from(channel + 1));
    }
    setup(&board, 0, 3, 0);

    let engine = ScanEngine::new(fast_settings(), Arc::new(AdcArbiter::new()));
    let readings = engine.scan(&board).unwrap();

    assert_eq!(readings.counts(), vec![1000, 2000, 3000, 4000]);
    assert_eq!(sample::channel(readings.raw()[2]), 2);
}

#[test]
fn scan_discards_first_oversample_and_stale_fifo() {
    let board = SimulatedBoard::new();
    board.set_channel_samples(5, vec![60000, 100, 200, 300]);
    board.inject_fifo(&[sample::encode(5, 0, false, 9999); 8]);
    setup(&board, 5, 5, 3);

    let engine = ScanEngine::new(fast_settings(), Arc::new(AdcArbiter::new()));
    let readings = engine.scan(&board).unwrap();

    assert_eq!(readings.counts(), vec![200]);
    assert_eq!(board.fifo_len(), 0);
}

#[test]
fn scan_primes_trigger_before_strobe() {
    let board = SimulatedBoard::new();
    setup(&board, 0, 0, 0);
    board.clear_writes();

    let settings = ScanSettings {
        reduction_factor: 4,
        ..fast_settings()
    };
    ScanEngine::new(settings, Arc::new(AdcArbiter::new()))
        .scan(&board)
        .unwrap();

    assert_eq!(
        board.writes(),
        vec![
            (registers::OFS_ADC_REDUCTION, 4),
            (registers::OFS_ADC_TRIGGER, registers::TRIGGER_DISABLED),
            (registers::OFS_ADC_TRIGGER, registers::TRIGGER_CLEAR),
            (registers::OFS_ADC_TRIGGER, registers::TRIGGER_SOFTWARE),
            (registers::OFS_ADC_SOFTWARE_START, 1),
        ]
    );
}

#[test]
fn scan_times_out_without_partial_result() {
    let board = SimulatedBoard::new();
    board.limit_scan_samples(Some(3));
    setup(&board, 0, 3, 0);

    let engine = ScanEngine::new(fast_settings(), Arc::new(AdcArbiter::new()));
    match engine.scan(&board) {
        Err(AcquisitionError::ScanTimeout {
            expected, received, ..
        }) => {
            assert_eq!(expected, 4);
            assert_eq!(received, 3);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[test]
fn reversed_range_never_triggers() {
    let board = SimulatedBoard::new();
    setup(&board, 6, 2, 0);
    board.clear_writes();

    let engine = ScanEngine::new(fast_settings(), Arc::new(AdcArbiter::new()));
    assert!(matches!(
        engine.scan(&board),
        Err(AcquisitionError::InvalidScanConfig { start: 6, end: 2 })
    ));
    assert!(!board
        .writes()
        .iter()
        .any(|(offset, _)| *offset == registers::OFS_ADC_SOFTWARE_START));
}

#[test]
fn scan_refused_while_streaming() {
    let board = SimulatedBoard::new();
    setup(&board, 0, 0, 0);
    let arbiter = Arc::new(AdcArbiter::new());
    arbiter.claim_stream(ConnectionId(9)).unwrap();

    let engine = ScanEngine::new(fast_settings(), Arc::clone(&arbiter));
    assert!(matches!(
        engine.scan(&board),
        Err(AcquisitionError::AdcBusy { .. })
    ));
    assert_eq!(board.writes().len(), 3);
}

#[test]
fn invalid_fifo_words_are_skipped_and_not_counted() {
    let board = SimulatedBoard::new();
    for channel in 0..4 {
        board.set_analog_input(channel, 100 + u16::from(channel));
    }
    setup(&board, 0, 3, 0);
    let port = InterleavedInvalid {
        board,
        data_reads: AtomicUsize::new(0),
    };

    let engine = ScanEngine::new(fast_settings(), Arc::new(AdcArbiter::new()));
    let readings = engine.scan(&port).unwrap();

    assert_eq!(readings.counts(), vec![100, 101, 102, 103]);
    assert_eq!(port.board.fifo_len(), 0);
    // four real samples, each preceded by an invalid word
    assert_eq!(port.data_reads.load(Ordering::SeqCst), 8);
}

#[test]
fn stuck_fifo_of_invalid_words_times_out() {
    let settings = ScanSettings {
        timeout_floor: Duration::from_millis(20),
        timeout_per_sample: Duration::ZERO,
        ..fast_settings()
    };
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let engine = ScanEngine::new(settings, Arc::new(AdcArbiter::new()));
        let _ = tx.send(engine.scan(&StuckFifo));
    });

    let result = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("scan still running long after its timeout");
    match result {
        Err(AcquisitionError::ScanTimeout {
            expected, received, ..
        }) => {
            assert_eq!(expected, 1);
            assert_eq!(received, 0);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
}
