//! Item execution against the simulated board.

use std::sync::Arc;
use std::time::Duration;

use aiod_acquisition::{AdcArbiter, ScanEngine, ScanSettings, StreamSettings, StreamingSession};
use aiod_core::registers::{self, sample};
use aiod_core::{ConnectionId, ErrorKind, Hardware, RegisterPort, ShutdownSignal, SimulatedBoard};
use aiod_protocol::{construct, frame_message, ExecContext, ItemError, ItemId, Message, MessageType};

struct Rig {
    board: Arc<SimulatedBoard>,
    hardware: Hardware,
    scan: ScanEngine,
    streaming: StreamingSession,
    shutdown: ShutdownSignal,
}

impl Rig {
    fn new() -> Self {
        let board = Arc::new(SimulatedBoard::new());
        let hardware = Hardware::new(board.clone(), board.clone());
        let arbiter = Arc::new(AdcArbiter::new());
        let scan = ScanEngine::new(
            ScanSettings {
                settle: Duration::ZERO,
                timeout_floor: Duration::from_millis(30),
                ..ScanSettings::default()
            },
            Arc::clone(&arbiter),
        );
        let streaming = StreamingSession::new(hardware.clone(), arbiter, StreamSettings::default());
        Self {
            board,
            hardware,
            scan,
            streaming,
            shutdown: ShutdownSignal::new(),
        }
    }

    fn ctx(&self) -> ExecContext<'_> {
        ExecContext {
            connection: ConnectionId(1),
            hardware: &self.hardware,
            scan: &self.scan,
            streaming: &self.streaming,
            shutdown: &self.shutdown,
        }
    }

    fn run(&self, id: ItemId, payload: &[u8]) -> (Vec<u8>, String) {
        let mut item = construct(id.code(), payload).unwrap();
        item.execute(&self.ctx()).unwrap();
        (item.serialize_payload(true), item.describe(true))
    }
}

#[test]
fn range_write_reports_register_write() {
    let rig = Rig::new();
    let (reply, description) = rig.run(ItemId::AdcRange1, &[0x00, 0x30, 0x00, 0x80, 0x30]);

    assert_eq!(rig.board.writes(), vec![(0x60, 0x3080_0030)]);
    assert_eq!(reply, vec![0x00, 0x30, 0x00, 0x80, 0x30]);
    assert_eq!(
        description,
        "ADC_Range1 group 0: wrote 0x30800030 to register 0x60"
    );
}

#[test]
fn dio_input_reports_sampled_bit() {
    let rig = Rig::new();
    rig.board.set_dio_inputs(1 << 5);

    let (reply, description) = rig.run(ItemId::DioInput1, &[5]);
    assert_eq!(reply, vec![5, 1]);
    assert_eq!(description, "DIO_Input1 bit 5 = 1");

    let (reply, _) = rig.run(ItemId::DioInput1, &[4]);
    assert_eq!(reply, vec![4, 0]);
}

#[test]
fn board_identity_and_clock() {
    let rig = Rig::new();
    let (reply, _) = rig.run(ItemId::BrdDeviceId, &[]);
    assert_eq!(reply, aiod_core::sim::SIM_DEVICE_ID.to_le_bytes().to_vec());

    let (reply, _) = rig.run(ItemId::BrdClock, &[]);
    assert_eq!(reply.len(), 8);
}

#[test]
fn calibration_roundtrips_through_registers() {
    let rig = Rig::new();
    let mut payload = vec![2];
    payload.extend_from_slice(&1.5f32.to_le_bytes());
    payload.extend_from_slice(&(-0.25f32).to_le_bytes());

    let (reply, _) = rig.run(ItemId::AdcCalibration1, &payload);
    assert_eq!(reply, payload);
    assert_eq!(rig.board.peek(registers::adc_cal_scale(2)), 1.5f32.to_bits());

    let (reply, _) = rig.run(ItemId::AdcCalibration1, &[2]);
    assert_eq!(reply, payload);
}

#[test]
fn dio_output_bit_read_modify_write() {
    let rig = Rig::new();
    rig.board.write(registers::OFS_DIO_OUTPUT, 0b1000).unwrap();
    rig.run(ItemId::DioOutput1, &[0, 1]);
    rig.run(ItemId::DioOutput1, &[3, 0]);
    assert_eq!(rig.board.peek(registers::OFS_DIO_OUTPUT), 0b0001);
}

#[test]
fn scan_views_serialize_per_channel() {
    let rig = Rig::new();
    rig.board.set_analog_input(0, 0x8000);
    rig.board.set_analog_input(1, 0xC000);
    rig.run(ItemId::AdcScanSetup, &[0, 1, 0]);

    let (counts, _) = rig.run(ItemId::AdcScanCounts, &[]);
    assert_eq!(counts, vec![0x00, 0x80, 0x00, 0xC0]);

    let (raw, _) = rig.run(ItemId::AdcScanRaw, &[]);
    let first = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
    assert_eq!(sample::count(first), 0x8000);
    assert_eq!(raw.len(), 8);

    let (volts, _) = rig.run(ItemId::AdcScanVolts, &[]);
    let second = f32::from_le_bytes([volts[4], volts[5], volts[6], volts[7]]);
    assert_eq!(second, 5.0);
}

#[test]
fn scan_failure_is_recorded_on_item() {
    let rig = Rig::new();
    rig.board.limit_scan_samples(Some(0));
    let mut item = construct(ItemId::AdcScanCounts.code(), &[]).unwrap();

    let err = item.execute(&rig.ctx()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Operational);
    assert!(item.is_failed());
    assert!(item.serialize_payload(true).is_empty());
}

#[test]
fn stream_status_idle_sentinel() {
    let rig = Rig::new();
    let (reply, description) = rig.run(ItemId::AdcStreamStatus, &[]);
    assert_eq!(reply, vec![0xFF; 4]);
    assert_eq!(description, "ADC_StreamStatus idle");
}

#[test]
fn stream_start_without_client_fails() {
    let rig = Rig::new();
    let mut item = construct(ItemId::AdcStreamStart.code(), &ConnectionId(9).hello().to_le_bytes()).unwrap();
    let err = item.execute(&rig.ctx()).unwrap_err();
    assert!(matches!(err, ItemError::Acquisition(_)));
}

#[test]
fn reboot_requests_shutdown() {
    let rig = Rig::new();
    rig.run(ItemId::BrdReboot, &[]);
    assert!(rig.shutdown.is_requested());
}

#[test]
fn request_reparse_preserves_codes_and_payloads() {
    let mut wire = vec![b'C', 0, 0, 0, 0];
    let items: &[(u16, &[u8])] = &[
        (0x0104, &[0xE8, 0x01, 0x02, 0x03, 0x04]),
        (0x2002, &[7]),
        (0x1004, &[]),
    ];
    for (code, data) in items {
        wire.extend_from_slice(&code.to_le_bytes());
        wire.extend_from_slice(&(data.len() as u16).to_le_bytes());
        wire.extend_from_slice(data);
    }
    let len = (wire.len() - 5) as u32;
    wire[1..5].copy_from_slice(&len.to_le_bytes());
    wire.push(0);

    let (message, _) = frame_message(&wire, 1 << 20).unwrap();
    let encoded = message.encode();
    assert_eq!(encoded, wire);

    let (again, _) = frame_message(&encoded, 1 << 20).unwrap();
    assert_eq!(again.kind, MessageType::Config);
    let codes: Vec<u16> = again.items.iter().map(|i| i.code()).collect();
    assert_eq!(codes, vec![0x0104, 0x2002, 0x1004]);
    assert_eq!(again.items[0].payload(), &[0xE8, 0x01, 0x02, 0x03, 0x04]);
}

#[test]
fn reply_type_follows_item_errors() {
    let rig = Rig::new();
    let mut ok = Message::new(MessageType::Query, vec![construct(0x0002, &[]).unwrap()]);
    for item in &mut ok.items {
        item.execute(&rig.ctx()).unwrap();
    }
    assert_eq!(ok.into_reply().kind, MessageType::Response);

    let wire = [b'Q', 4, 0, 0, 0, 0x77, 0x77, 0, 0, 0];
    let (bad, _) = frame_message(&wire, 64).unwrap();
    assert_eq!(bad.into_reply().kind, MessageType::Error);
}
