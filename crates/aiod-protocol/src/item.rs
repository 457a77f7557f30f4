//! The item model.
//!
//! An [`Item`] is one operation inside a message. It is built by the
//! [registry](crate::registry) from length-validated bytes (or directly by the
//! server for greetings and diagnostics), executed exactly once against an
//! [`ExecContext`], and then serialized into the reply. Typed variants of
//! [`ItemKind`] carry the fields decoded from the request plus the values
//! read back during execution; primitive items just run their descriptor's
//! action on the raw payload.

use aiod_acquisition::{ScanReadings, StreamStatus};
use aiod_core::registers;
use aiod_core::{ConnectionId, ErrorKind};
use tracing::debug;

use crate::context::ExecContext;
use crate::error::{ItemError, ItemFault};
use crate::ids::ItemId;
use crate::registry;

/// Longest diagnostic message carried on the wire.
pub const MAX_DIAGNOSTIC_BYTES: usize = 1023;

/// Reply encoding of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanView {
    /// u32 per channel: metadata | count, or the no-data sentinel
    Raw,
    /// u16 per channel
    Counts,
    /// f32 per channel, NaN for no data
    Volts,
}

/// ADC group calibration pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Gain correction
    pub scale: f32,
    /// Offset correction in counts
    pub offset: f32,
}

/// Scan channel range and oversampling as written to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSetup {
    /// First channel
    pub start: u8,
    /// Last channel, inclusive
    pub end: u8,
    /// Extra conversions per channel
    pub oversample: u8,
}

/// Typed state of an item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    /// Placeholder for an item that failed to parse
    Invalid,
    /// Executed by the descriptor's primitive action
    Primitive,
    /// Read one 32-bit register
    Readback { offset: u8, value: Option<u32> },
    /// Read the 64-bit board clock
    Clock { ticks: Option<u64> },
    /// Request daemon shutdown
    Reboot,
    /// Read one register by offset
    RegRead { offset: u8, value: Option<u32> },
    /// Write one DAC range
    DacRange { channel: u8, value: u32 },
    /// Write one ADC group range
    AdcRange { group: u8, value: u32 },
    /// Read or write all ADC group ranges
    AdcRangeAll {
        write: Option<[u32; 8]>,
        current: Option<[u32; 8]>,
    },
    /// Read or write one group calibration
    AdcCalibration {
        group: u8,
        write: Option<Calibration>,
        current: Option<Calibration>,
    },
    /// Read or write the scan setup
    ScanSetup {
        write: Option<ScanSetup>,
        current: Option<ScanSetup>,
    },
    /// Run a scan and reply in `view`
    Scan {
        view: ScanView,
        readings: Option<ScanReadings>,
    },
    /// Start streaming to `target`
    StreamStart { target: ConnectionId },
    /// Stop the streaming session
    StreamStop { was_active: Option<bool> },
    /// Report the streaming session
    StreamStatus { status: Option<StreamStatus> },
    /// Sample one digital input
    DioInput { bit: u8, level: Option<bool> },
    /// Drive one digital output
    DioOutput { bit: u8, level: bool },
    /// Connection id of the caller
    ConnectionId { id: Option<ConnectionId> },
    /// Error kind and message appended to error replies
    Diagnostic {
        kind: Option<ErrorKind>,
        message: String,
    },
}

/// Execution state of an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    /// Not executed yet
    Pending,
    /// Executed successfully
    Done,
    /// Failed to parse or execute
    Failed(ItemFault),
}

/// One operation of a message.
#[derive(Debug, Clone)]
pub struct Item {
    id: Option<ItemId>,
    code: u16,
    payload: Vec<u8>,
    status: ItemStatus,
    kind: ItemKind,
}

impl Item {
    pub(crate) fn new(id: ItemId, payload: &[u8], kind: ItemKind) -> Self {
        Self {
            id: Some(id),
            code: id.code(),
            payload: payload.to_vec(),
            status: ItemStatus::Pending,
            kind,
        }
    }

    /// Placeholder for bytes that could not be turned into an item.
    pub fn invalid(code: u16, payload: &[u8], error: &ItemError) -> Self {
        Self {
            id: ItemId::from_code(code),
            code,
            payload: payload.to_vec(),
            status: ItemStatus::Failed(ItemFault::from(error)),
            kind: ItemKind::Invalid,
        }
    }

    /// Greeting item carrying the id of a new connection.
    pub fn connection_id(id: ConnectionId) -> Self {
        Self {
            id: Some(ItemId::TcpConnectionId),
            code: ItemId::TcpConnectionId.code(),
            payload: Vec::new(),
            status: ItemStatus::Done,
            kind: ItemKind::ConnectionId { id: Some(id) },
        }
    }

    /// Server-built diagnostic. The message is cut to fit the wire limit.
    pub fn diagnostic(kind: ErrorKind, message: &str) -> Self {
        let mut end = message.len().min(MAX_DIAGNOSTIC_BYTES);
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            id: Some(ItemId::Diagnostic),
            code: ItemId::Diagnostic.code(),
            payload: Vec::new(),
            status: ItemStatus::Done,
            kind: ItemKind::Diagnostic {
                kind: Some(kind),
                message: message[..end].to_string(),
            },
        }
    }

    /// Wire type code.
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Known id, `None` for unknown codes.
    pub fn id(&self) -> Option<ItemId> {
        self.id
    }

    /// Request payload as received.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Typed state.
    pub fn kind(&self) -> &ItemKind {
        &self.kind
    }

    /// Execution state.
    pub fn status(&self) -> &ItemStatus {
        &self.status
    }

    /// Whether parsing or execution failed.
    pub fn is_failed(&self) -> bool {
        matches!(self.status, ItemStatus::Failed(_))
    }

    /// The failure, if any.
    pub fn fault(&self) -> Option<&ItemFault> {
        match &self.status {
            ItemStatus::Failed(fault) => Some(fault),
            _ => None,
        }
    }

    /// Execute against the board.
    ///
    /// Items that failed to parse keep their error and return `Ok`; an
    /// execution failure is recorded on the item and returned.
    pub fn execute(&mut self, ctx: &ExecContext<'_>) -> Result<(), ItemError> {
        if self.status != ItemStatus::Pending {
            return Ok(());
        }
        match self.run(ctx) {
            Ok(()) => {
                self.status = ItemStatus::Done;
                debug!(connection = %ctx.connection, item = %self.describe(true), "Item executed");
                Ok(())
            }
            Err(err) => {
                self.status = ItemStatus::Failed(ItemFault::from(&err));
                Err(err)
            }
        }
    }

    fn run(&mut self, ctx: &ExecContext<'_>) -> Result<(), ItemError> {
        let port = ctx.hardware.registers();
        match &mut self.kind {
            ItemKind::Invalid | ItemKind::Diagnostic { .. } => {}
            ItemKind::Primitive => {
                let descriptor = registry::lookup(self.code)
                    .ok_or(ItemError::UnknownItemId { code: self.code })?;
                if let Some(action) = descriptor.action {
                    action(port, &self.payload)?;
                }
            }
            ItemKind::Readback { offset, value } | ItemKind::RegRead { offset, value } => {
                *value = Some(port.read(*offset)?);
            }
            ItemKind::Clock { ticks } => {
                let lo = port.read(registers::OFS_CLOCK_LO)?;
                let hi = port.read(registers::OFS_CLOCK_HI)?;
                *ticks = Some((u64::from(hi) << 32) | u64::from(lo));
            }
            ItemKind::Reboot => ctx.shutdown.request("BRD_Reboot"),
            ItemKind::DacRange { channel, value } => {
                port.write(registers::dac_range(*channel), *value)?;
            }
            ItemKind::AdcRange { group, value } => {
                port.write(registers::adc_range(*group), *value)?;
            }
            ItemKind::AdcRangeAll { write, current } => {
                if let Some(values) = write {
                    for (group, value) in (0u8..).zip(values.iter()) {
                        port.write(registers::adc_range(group), *value)?;
                    }
                }
                let mut values = [0u32; 8];
                for (group, slot) in (0u8..).zip(values.iter_mut()) {
                    *slot = port.read(registers::adc_range(group))?;
                }
                *current = Some(values);
            }
            ItemKind::AdcCalibration {
                group,
                write,
                current,
            } => {
                if let Some(cal) = write {
                    port.write(registers::adc_cal_scale(*group), cal.scale.to_bits())?;
                    port.write(registers::adc_cal_offset(*group), cal.offset.to_bits())?;
                }
                *current = Some(Calibration {
                    scale: f32::from_bits(port.read(registers::adc_cal_scale(*group))?),
                    offset: f32::from_bits(port.read(registers::adc_cal_offset(*group))?),
                });
            }
            ItemKind::ScanSetup { write, current } => {
                if let Some(setup) = write {
                    port.write(registers::OFS_ADC_START_CHANNEL, u32::from(setup.start))?;
                    port.write(registers::OFS_ADC_END_CHANNEL, u32::from(setup.end))?;
                    port.write(registers::OFS_ADC_OVERSAMPLES, u32::from(setup.oversample))?;
                }
                *current = Some(ScanSetup {
                    start: port.read(registers::OFS_ADC_START_CHANNEL)? as u8,
                    end: port.read(registers::OFS_ADC_END_CHANNEL)? as u8,
                    oversample: port.read(registers::OFS_ADC_OVERSAMPLES)? as u8,
                });
            }
            ItemKind::Scan { readings, .. } => {
                *readings = Some(ctx.scan.scan(port)?);
            }
            ItemKind::StreamStart { target } => ctx.streaming.start(*target)?,
            ItemKind::StreamStop { was_active } => *was_active = Some(ctx.streaming.stop()),
            ItemKind::StreamStatus { status } => *status = Some(ctx.streaming.status()),
            ItemKind::DioInput { bit, level } => {
                let inputs = port.read(registers::OFS_DIO_INPUT)?;
                *level = Some((inputs >> *bit) & 1 == 1);
            }
            ItemKind::DioOutput { bit, level } => {
                let outputs = port.read(registers::OFS_DIO_OUTPUT)?;
                let mask = 1u32 << *bit;
                let next = if *level { outputs | mask } else { outputs & !mask };
                port.write(registers::OFS_DIO_OUTPUT, next)?;
            }
            ItemKind::ConnectionId { id } => *id = Some(ctx.connection),
        }
        Ok(())
    }

    /// Payload bytes for the wire.
    ///
    /// Requests (and failed or unexecuted items) carry the received payload;
    /// executed items in a reply carry their results.
    pub fn serialize_payload(&self, as_reply: bool) -> Vec<u8> {
        if !as_reply || self.status != ItemStatus::Done {
            return self.payload.clone();
        }
        let mut out = Vec::new();
        match &self.kind {
            ItemKind::Readback {
                value: Some(value), ..
            } => out.extend_from_slice(&value.to_le_bytes()),
            ItemKind::RegRead {
                offset,
                value: Some(value),
            } => {
                out.push(*offset);
                out.extend_from_slice(&value.to_le_bytes());
            }
            ItemKind::Clock { ticks: Some(ticks) } => out.extend_from_slice(&ticks.to_le_bytes()),
            ItemKind::DacRange { channel, value } => {
                out.push(*channel);
                out.extend_from_slice(&value.to_le_bytes());
            }
            ItemKind::AdcRange { group, value } => {
                out.push(*group);
                out.extend_from_slice(&value.to_le_bytes());
            }
            ItemKind::AdcRangeAll {
                current: Some(values),
                ..
            } => {
                for value in values {
                    out.extend_from_slice(&value.to_le_bytes());
                }
            }
            ItemKind::AdcCalibration {
                group,
                current: Some(cal),
                ..
            } => {
                out.push(*group);
                out.extend_from_slice(&cal.scale.to_le_bytes());
                out.extend_from_slice(&cal.offset.to_le_bytes());
            }
            ItemKind::ScanSetup {
                current: Some(setup),
                ..
            } => out.extend_from_slice(&[setup.start, setup.end, setup.oversample]),
            ItemKind::Scan {
                view,
                readings: Some(readings),
            } => match view {
                ScanView::Raw => {
                    for raw in readings.raw() {
                        out.extend_from_slice(&raw.to_le_bytes());
                    }
                }
                ScanView::Counts => {
                    for count in readings.counts() {
                        out.extend_from_slice(&count.to_le_bytes());
                    }
                }
                ScanView::Volts => {
                    for volts in readings.volts() {
                        out.extend_from_slice(&volts.to_le_bytes());
                    }
                }
            },
            ItemKind::StreamStatus {
                status: Some(status),
            } => {
                let active = status.active.map_or(u32::MAX, ConnectionId::get);
                out.extend_from_slice(&active.to_le_bytes());
            }
            ItemKind::DioInput {
                bit,
                level: Some(level),
            } => out.extend_from_slice(&[*bit, u8::from(*level)]),
            ItemKind::ConnectionId { id: Some(id) } => out.extend_from_slice(&id.get().to_le_bytes()),
            ItemKind::Diagnostic { kind, message } => {
                out.push(kind.map_or(0, ErrorKind::code));
                out.extend_from_slice(message.as_bytes());
            }
            _ => return self.payload.clone(),
        }
        out
    }

    /// Item header plus payload.
    pub fn encode(&self, as_reply: bool, out: &mut Vec<u8>) {
        let payload = self.serialize_payload(as_reply);
        out.extend_from_slice(&self.code.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(&payload);
    }

    /// Human-readable one-liner for logs.
    pub fn describe(&self, as_reply: bool) -> String {
        let name = match self.id {
            Some(id) => id.name().to_string(),
            None => format!("item {:#06x}", self.code),
        };
        if let ItemStatus::Failed(fault) = &self.status {
            return format!("{} ({} bytes) failed: {}", name, self.payload.len(), fault);
        }
        let detail = if as_reply && self.status == ItemStatus::Done {
            self.reply_detail()
        } else {
            self.request_detail()
        };
        if detail.is_empty() {
            name
        } else {
            format!("{} {}", name, detail)
        }
    }

    fn request_detail(&self) -> String {
        match &self.kind {
            ItemKind::Primitive | ItemKind::Invalid => hex(&self.payload),
            ItemKind::Readback { offset, .. } | ItemKind::RegRead { offset, .. } => {
                format!("@{:#04x}", offset)
            }
            ItemKind::DacRange { channel, value } => format!("channel {} <- {:#010x}", channel, value),
            ItemKind::AdcRange { group, value } => format!("group {} <- {:#010x}", group, value),
            ItemKind::AdcRangeAll { write: Some(v), .. } => format!("<- {:x?}", v),
            ItemKind::AdcCalibration {
                group,
                write: Some(cal),
                ..
            } => format!("group {} <- scale {} offset {}", group, cal.scale, cal.offset),
            ItemKind::AdcCalibration { group, .. } => format!("group {}", group),
            ItemKind::ScanSetup { write: Some(s), .. } => {
                format!("<- channels {}..={} oversample {}", s.start, s.end, s.oversample)
            }
            ItemKind::Scan { view, .. } => format!("{:?}", view),
            ItemKind::StreamStart { target } => format!("to {}", target),
            ItemKind::DioInput { bit, .. } => format!("bit {}", bit),
            ItemKind::DioOutput { bit, level } => format!("bit {} <- {}", bit, u8::from(*level)),
            ItemKind::Diagnostic { kind, message } => match kind {
                Some(kind) => format!("{}: {}", kind, message),
                None => message.clone(),
            },
            _ => String::new(),
        }
    }

    fn reply_detail(&self) -> String {
        match &self.kind {
            ItemKind::Readback {
                offset,
                value: Some(value),
            }
            | ItemKind::RegRead {
                offset,
                value: Some(value),
            } => format!("@{:#04x} = {:#010x}", offset, value),
            ItemKind::Clock { ticks: Some(ticks) } => format!("= {} ticks", ticks),
            ItemKind::DacRange { channel, value } => format!(
                "channel {}: wrote {:#010x} to register {:#04x}",
                channel,
                value,
                registers::dac_range(*channel)
            ),
            ItemKind::AdcRange { group, value } => format!(
                "group {}: wrote {:#010x} to register {:#04x}",
                group,
                value,
                registers::adc_range(*group)
            ),
            ItemKind::AdcRangeAll {
                current: Some(v), ..
            } => format!("= {:x?}", v),
            ItemKind::AdcCalibration {
                group,
                current: Some(cal),
                ..
            } => format!("group {} = scale {} offset {}", group, cal.scale, cal.offset),
            ItemKind::ScanSetup {
                current: Some(s), ..
            } => format!("= channels {}..={} oversample {}", s.start, s.end, s.oversample),
            ItemKind::Scan {
                view,
                readings: Some(readings),
            } => match view {
                ScanView::Raw => format!("= {:x?}", readings.raw()),
                ScanView::Counts => format!("= {:?}", readings.counts()),
                ScanView::Volts => format!("= {:?}", readings.volts()),
            },
            ItemKind::StreamStart { target } => format!("streaming to {}", target),
            ItemKind::StreamStop { was_active } => match was_active {
                Some(true) => "stopping".to_string(),
                _ => "no active session".to_string(),
            },
            ItemKind::StreamStatus {
                status: Some(status),
            } => match status.active {
                Some(id) => format!("active {} ({} blocks sent)", id, status.blocks_sent),
                None => "idle".to_string(),
            },
            ItemKind::DioInput {
                bit,
                level: Some(level),
            } => format!("bit {} = {}", bit, u8::from(*level)),
            ItemKind::DioOutput { bit, level } => format!("bit {} set to {}", bit, u8::from(*level)),
            ItemKind::ConnectionId { id: Some(id) } => format!("= {}", id),
            _ => self.request_detail(),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Little-endian value of up to four bytes.
pub(crate) fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    let len = bytes.len().min(4);
    buf[..len].copy_from_slice(&bytes[..len]);
    u32::from_le_bytes(buf)
}

fn exact_len(id: ItemId, payload: &[u8], allowed: &[usize]) -> Result<(), ItemError> {
    if allowed.contains(&payload.len()) {
        Ok(())
    } else {
        let min = allowed.iter().copied().min().unwrap_or(0) as u16;
        let max = allowed.iter().copied().max().unwrap_or(0) as u16;
        Err(ItemError::LengthMismatch {
            code: id.code(),
            len: payload.len(),
            min,
            max,
        })
    }
}

fn check_index(id: ItemId, what: &str, value: u8, limit: u8) -> Result<(), ItemError> {
    if value < limit {
        Ok(())
    } else {
        Err(ItemError::invalid_field(
            id.code(),
            format!("{} {} out of range (0..{})", what, value, limit),
        ))
    }
}

// Decoders referenced by the registry. Payload lengths are already within the
// descriptor bounds when these run.

pub(crate) fn decode_primitive(_payload: &[u8]) -> Result<ItemKind, ItemError> {
    Ok(ItemKind::Primitive)
}

pub(crate) fn decode_dac_output(payload: &[u8]) -> Result<ItemKind, ItemError> {
    check_index(ItemId::DacOutput1, "channel", payload[0], registers::DAC_CHANNELS)?;
    Ok(ItemKind::Primitive)
}

pub(crate) fn decode_device_id(_payload: &[u8]) -> Result<ItemKind, ItemError> {
    Ok(ItemKind::Readback {
        offset: registers::OFS_DEVICE_ID,
        value: None,
    })
}

pub(crate) fn decode_features(_payload: &[u8]) -> Result<ItemKind, ItemError> {
    Ok(ItemKind::Readback {
        offset: registers::OFS_FEATURES,
        value: None,
    })
}

pub(crate) fn decode_firmware_rev(_payload: &[u8]) -> Result<ItemKind, ItemError> {
    Ok(ItemKind::Readback {
        offset: registers::OFS_FIRMWARE_REV,
        value: None,
    })
}

pub(crate) fn decode_dio_input_all(_payload: &[u8]) -> Result<ItemKind, ItemError> {
    Ok(ItemKind::Readback {
        offset: registers::OFS_DIO_INPUT,
        value: None,
    })
}

pub(crate) fn decode_clock(_payload: &[u8]) -> Result<ItemKind, ItemError> {
    Ok(ItemKind::Clock { ticks: None })
}

pub(crate) fn decode_reboot(_payload: &[u8]) -> Result<ItemKind, ItemError> {
    Ok(ItemKind::Reboot)
}

pub(crate) fn decode_reg_read(payload: &[u8]) -> Result<ItemKind, ItemError> {
    Ok(ItemKind::RegRead {
        offset: payload[0],
        value: None,
    })
}

pub(crate) fn decode_dac_range(payload: &[u8]) -> Result<ItemKind, ItemError> {
    check_index(ItemId::DacRange1, "channel", payload[0], registers::DAC_CHANNELS)?;
    Ok(ItemKind::DacRange {
        channel: payload[0],
        value: le_u32(&payload[1..5]),
    })
}

pub(crate) fn decode_adc_range(payload: &[u8]) -> Result<ItemKind, ItemError> {
    check_index(ItemId::AdcRange1, "group", payload[0], registers::ADC_GROUPS)?;
    Ok(ItemKind::AdcRange {
        group: payload[0],
        value: le_u32(&payload[1..5]),
    })
}

pub(crate) fn decode_adc_range_all(payload: &[u8]) -> Result<ItemKind, ItemError> {
    exact_len(ItemId::AdcRangeAll, payload, &[0, 32])?;
    let write = (!payload.is_empty()).then(|| {
        let mut values = [0u32; 8];
        for (value, chunk) in values.iter_mut().zip(payload.chunks_exact(4)) {
            *value = le_u32(chunk);
        }
        values
    });
    Ok(ItemKind::AdcRangeAll {
        write,
        current: None,
    })
}

pub(crate) fn decode_adc_calibration(payload: &[u8]) -> Result<ItemKind, ItemError> {
    exact_len(ItemId::AdcCalibration1, payload, &[1, 9])?;
    check_index(ItemId::AdcCalibration1, "group", payload[0], registers::ADC_GROUPS)?;
    let write = (payload.len() == 9).then(|| Calibration {
        scale: f32::from_bits(le_u32(&payload[1..5])),
        offset: f32::from_bits(le_u32(&payload[5..9])),
    });
    Ok(ItemKind::AdcCalibration {
        group: payload[0],
        write,
        current: None,
    })
}

pub(crate) fn decode_scan_setup(payload: &[u8]) -> Result<ItemKind, ItemError> {
    exact_len(ItemId::AdcScanSetup, payload, &[0, 3])?;
    let write = if payload.is_empty() {
        None
    } else {
        let (start, end) = (payload[0], payload[1]);
        check_index(ItemId::AdcScanSetup, "end channel", end, registers::ADC_CHANNELS)?;
        if end < start {
            return Err(ItemError::invalid_field(
                ItemId::AdcScanSetup.code(),
                format!("end channel {} precedes start channel {}", end, start),
            ));
        }
        Some(ScanSetup {
            start,
            end,
            oversample: payload[2],
        })
    };
    Ok(ItemKind::ScanSetup {
        write,
        current: None,
    })
}

pub(crate) fn decode_scan_raw(_payload: &[u8]) -> Result<ItemKind, ItemError> {
    Ok(ItemKind::Scan {
        view: ScanView::Raw,
        readings: None,
    })
}

pub(crate) fn decode_scan_counts(_payload: &[u8]) -> Result<ItemKind, ItemError> {
    Ok(ItemKind::Scan {
        view: ScanView::Counts,
        readings: None,
    })
}

pub(crate) fn decode_scan_volts(_payload: &[u8]) -> Result<ItemKind, ItemError> {
    Ok(ItemKind::Scan {
        view: ScanView::Volts,
        readings: None,
    })
}

pub(crate) fn decode_stream_start(payload: &[u8]) -> Result<ItemKind, ItemError> {
    Ok(ItemKind::StreamStart {
        target: ConnectionId::from_wire(le_u32(payload)),
    })
}

pub(crate) fn decode_stream_stop(_payload: &[u8]) -> Result<ItemKind, ItemError> {
    Ok(ItemKind::StreamStop { was_active: None })
}

pub(crate) fn decode_stream_status(_payload: &[u8]) -> Result<ItemKind, ItemError> {
    Ok(ItemKind::StreamStatus { status: None })
}

pub(crate) fn decode_dio_input(payload: &[u8]) -> Result<ItemKind, ItemError> {
    check_index(ItemId::DioInput1, "bit", payload[0], registers::DIO_BITS)?;
    Ok(ItemKind::DioInput {
        bit: payload[0],
        level: None,
    })
}

pub(crate) fn decode_dio_output(payload: &[u8]) -> Result<ItemKind, ItemError> {
    check_index(ItemId::DioOutput1, "bit", payload[0], registers::DIO_BITS)?;
    let level = match payload[1] {
        0 => false,
        1 => true,
        other => {
            return Err(ItemError::invalid_field(
                ItemId::DioOutput1.code(),
                format!("level {} is not 0 or 1", other),
            ))
        }
    };
    Ok(ItemKind::DioOutput {
        bit: payload[0],
        level,
    })
}

pub(crate) fn decode_connection_id(_payload: &[u8]) -> Result<ItemKind, ItemError> {
    Ok(ItemKind::ConnectionId { id: None })
}

pub(crate) fn decode_diagnostic(payload: &[u8]) -> Result<ItemKind, ItemError> {
    let Some((&code, text)) = payload.split_first() else {
        return Ok(ItemKind::Diagnostic {
            kind: None,
            message: String::new(),
        });
    };
    Ok(ItemKind::Diagnostic {
        kind: ErrorKind::from_code(code),
        message: String::from_utf8_lossy(text).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_le_u32_short_values() {
        assert_eq!(le_u32(&[0x30]), 0x30);
        assert_eq!(le_u32(&[0x30, 0x00, 0x80, 0x30]), 0x3080_0030);
        assert_eq!(le_u32(&[]), 0);
    }

    #[test]
    fn test_decode_adc_range_validates_group() {
        let kind = decode_adc_range(&[0x00, 0x30, 0x00, 0x80, 0x30]).unwrap();
        assert_eq!(
            kind,
            ItemKind::AdcRange {
                group: 0,
                value: 0x3080_0030
            }
        );
        assert!(matches!(
            decode_adc_range(&[8, 0, 0, 0, 0]),
            Err(ItemError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_decode_either_length_items() {
        assert!(decode_adc_range_all(&[]).is_ok());
        assert!(decode_adc_range_all(&[0; 32]).is_ok());
        assert!(matches!(
            decode_adc_range_all(&[0; 16]),
            Err(ItemError::LengthMismatch { len: 16, min: 0, max: 32, .. })
        ));
        assert!(matches!(
            decode_scan_setup(&[4, 2, 0]),
            Err(ItemError::InvalidField { .. })
        ));
        assert!(decode_adc_calibration(&[3]).is_ok());
        assert!(decode_adc_calibration(&[3, 0, 0]).is_err());
    }

    #[test]
    fn test_decode_dio_output_level() {
        assert!(decode_dio_output(&[31, 1]).is_ok());
        assert!(decode_dio_output(&[32, 1]).is_err());
        assert!(decode_dio_output(&[0, 2]).is_err());
    }

    #[test]
    fn test_diagnostic_truncates_on_char_boundary() {
        let long = "é".repeat(600);
        let item = Item::diagnostic(ErrorKind::Io, &long);
        let payload = item.serialize_payload(true);
        assert!(payload.len() <= MAX_DIAGNOSTIC_BYTES + 1);
        assert_eq!(payload[0], ErrorKind::Io.code());
        assert!(std::str::from_utf8(&payload[1..]).is_ok());
    }

    #[test]
    fn test_greeting_serializes_connection_id() {
        let item = Item::connection_id(ConnectionId(0x1234));
        assert_eq!(item.serialize_payload(true), vec![0x34, 0x12, 0, 0]);
        assert_eq!(item.describe(true), "TCP_ConnectionId = conn-4660");
    }

    #[test]
    fn test_invalid_item_keeps_payload_and_fault() {
        let err = ItemError::UnknownItemId { code: 0x7777 };
        let item = Item::invalid(0x7777, &[1, 2], &err);
        assert!(item.is_failed());
        assert_eq!(item.serialize_payload(true), vec![1, 2]);
        assert!(item.describe(false).starts_with("item 0x7777"));
    }
}
