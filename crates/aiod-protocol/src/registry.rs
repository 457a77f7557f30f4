//! Process-wide item registry.
//!
//! Maps every known type code to an immutable [`ItemDescriptor`]: payload
//! length bounds, the decoder that builds the typed [`ItemKind`], a short
//! description and, for primitive items, the register action applied to the
//! raw payload.

use std::collections::HashMap;

use aiod_core::registers;
use aiod_core::{HardwareResult, RegisterPort};
use once_cell::sync::Lazy;

use crate::error::ItemError;
use crate::ids::ItemId;
use crate::item::{self, le_u32, Item, ItemKind};

/// Builds the typed state of an item from a length-checked payload.
pub type BuildFn = fn(&[u8]) -> Result<ItemKind, ItemError>;

/// Register operation applied to the raw payload of a primitive item.
pub type PrimitiveAction = fn(&dyn RegisterPort, &[u8]) -> HardwareResult<()>;

/// Static description of one item type.
#[derive(Clone, Copy)]
pub struct ItemDescriptor {
    /// Item type
    pub id: ItemId,
    /// Minimum payload length in bytes
    pub min_len: u16,
    /// Maximum payload length in bytes
    pub max_len: u16,
    /// Decodes a length-checked payload
    pub build: BuildFn,
    /// Human-readable summary
    pub description: &'static str,
    /// Register operation of primitive items
    pub action: Option<PrimitiveAction>,
}

impl ItemDescriptor {
    /// Whether `len` lies within the bounds (inclusive).
    pub fn accepts_len(&self, len: usize) -> bool {
        (usize::from(self.min_len)..=usize::from(self.max_len)).contains(&len)
    }
}

impl std::fmt::Debug for ItemDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemDescriptor")
            .field("id", &self.id)
            .field("min_len", &self.min_len)
            .field("max_len", &self.max_len)
            .field("primitive", &self.action.is_some())
            .finish()
    }
}

const fn typed(
    id: ItemId,
    min_len: u16,
    max_len: u16,
    build: BuildFn,
    description: &'static str,
) -> ItemDescriptor {
    ItemDescriptor {
        id,
        min_len,
        max_len,
        build,
        description,
        action: None,
    }
}

const fn primitive(
    id: ItemId,
    min_len: u16,
    max_len: u16,
    build: BuildFn,
    description: &'static str,
    action: PrimitiveAction,
) -> ItemDescriptor {
    ItemDescriptor {
        id,
        min_len,
        max_len,
        build,
        description,
        action: Some(action),
    }
}

static DESCRIPTORS: [ItemDescriptor; 30] = [
    primitive(ItemId::BrdReset, 0, 0, item::decode_primitive, "Reset the whole board", reset_board),
    typed(ItemId::BrdDeviceId, 0, 4, item::decode_device_id, "Read the device id"),
    typed(ItemId::BrdFeatures, 0, 4, item::decode_features, "Read the feature bits"),
    typed(ItemId::BrdFirmwareRev, 0, 4, item::decode_firmware_rev, "Read the firmware revision"),
    typed(ItemId::BrdClock, 0, 8, item::decode_clock, "Read the free-running clock"),
    typed(ItemId::BrdReboot, 0, 0, item::decode_reboot, "Shut the daemon down"),
    typed(ItemId::RegRead1, 1, 1, item::decode_reg_read, "Read one register"),
    primitive(ItemId::RegWrite1, 2, 5, item::decode_primitive, "Write one register", write_register),
    primitive(ItemId::RegClearBits, 2, 5, item::decode_primitive, "Clear register bits", clear_bits),
    primitive(ItemId::RegSetBits, 2, 5, item::decode_primitive, "Set register bits", set_bits),
    primitive(ItemId::RegToggleBits, 2, 5, item::decode_primitive, "Toggle register bits", toggle_bits),
    primitive(ItemId::DacOutput1, 5, 5, item::decode_dac_output, "Set one DAC output", write_dac_output),
    typed(ItemId::DacRange1, 5, 5, item::decode_dac_range, "Set one DAC range"),
    typed(ItemId::AdcRange1, 5, 5, item::decode_adc_range, "Set the range of one ADC channel group"),
    typed(ItemId::AdcRangeAll, 0, 32, item::decode_adc_range_all, "Read or write all ADC ranges"),
    typed(ItemId::AdcCalibration1, 1, 9, item::decode_adc_calibration, "Read or write one ADC group calibration"),
    typed(ItemId::AdcScanSetup, 0, 3, item::decode_scan_setup, "Read or write the scan channel range"),
    typed(ItemId::AdcScanRaw, 0, 0, item::decode_scan_raw, "Scan, raw samples"),
    typed(ItemId::AdcScanCounts, 0, 0, item::decode_scan_counts, "Scan, counts"),
    typed(ItemId::AdcScanVolts, 0, 0, item::decode_scan_volts, "Scan, volts"),
    typed(ItemId::AdcStreamStart, 4, 4, item::decode_stream_start, "Start streaming to a streaming connection"),
    typed(ItemId::AdcStreamStop, 0, 0, item::decode_stream_stop, "Stop streaming"),
    typed(ItemId::AdcStreamStatus, 0, 4, item::decode_stream_status, "Report the streaming session"),
    primitive(ItemId::DioConfigure, 4, 4, item::decode_primitive, "Set digital I/O directions", write_dio_direction),
    typed(ItemId::DioInput1, 1, 1, item::decode_dio_input, "Read one digital input"),
    typed(ItemId::DioOutput1, 2, 2, item::decode_dio_output, "Set one digital output"),
    typed(ItemId::DioInputAll, 0, 4, item::decode_dio_input_all, "Read all digital inputs"),
    primitive(ItemId::DioOutputAll, 4, 4, item::decode_primitive, "Set all digital outputs", write_dio_outputs),
    typed(ItemId::TcpConnectionId, 0, 4, item::decode_connection_id, "Report the connection id"),
    typed(ItemId::Diagnostic, 0, 1024, item::decode_diagnostic, "Error kind and message"),
];

static REGISTRY: Lazy<HashMap<u16, &'static ItemDescriptor>> = Lazy::new(|| {
    DESCRIPTORS
        .iter()
        .map(|descriptor| (descriptor.id.code(), descriptor))
        .collect()
});

/// Descriptor registered for `code`.
pub fn lookup(code: u16) -> Option<&'static ItemDescriptor> {
    REGISTRY.get(&code).copied()
}

/// All descriptors in code order.
pub fn descriptors() -> &'static [ItemDescriptor] {
    &DESCRIPTORS
}

/// Check `len` against the bounds of `code`.
pub fn validate_length(code: u16, len: usize) -> Result<&'static ItemDescriptor, ItemError> {
    let descriptor = lookup(code).ok_or(ItemError::UnknownItemId { code })?;
    if descriptor.accepts_len(len) {
        Ok(descriptor)
    } else {
        Err(ItemError::LengthMismatch {
            code,
            len,
            min: descriptor.min_len,
            max: descriptor.max_len,
        })
    }
}

/// Build an item from its code and payload.
pub fn construct(code: u16, payload: &[u8]) -> Result<Item, ItemError> {
    let descriptor = validate_length(code, payload.len())?;
    let kind = (descriptor.build)(payload)?;
    Ok(Item::new(descriptor.id, payload, kind))
}

fn reset_board(port: &dyn RegisterPort, _payload: &[u8]) -> HardwareResult<()> {
    port.write(registers::OFS_RESET, registers::RESET_ALL)
}

fn write_register(port: &dyn RegisterPort, payload: &[u8]) -> HardwareResult<()> {
    port.write(payload[0], le_u32(&payload[1..]))
}

fn modify_register(
    port: &dyn RegisterPort,
    payload: &[u8],
    op: impl FnOnce(u32, u32) -> u32,
) -> HardwareResult<()> {
    let offset = payload[0];
    let mask = le_u32(&payload[1..]);
    let current = port.read(offset)?;
    port.write(offset, op(current, mask))
}

fn clear_bits(port: &dyn RegisterPort, payload: &[u8]) -> HardwareResult<()> {
    modify_register(port, payload, |current, mask| current & !mask)
}

fn set_bits(port: &dyn RegisterPort, payload: &[u8]) -> HardwareResult<()> {
    modify_register(port, payload, |current, mask| current | mask)
}

fn toggle_bits(port: &dyn RegisterPort, payload: &[u8]) -> HardwareResult<()> {
    modify_register(port, payload, |current, mask| current ^ mask)
}

fn write_dac_output(port: &dyn RegisterPort, payload: &[u8]) -> HardwareResult<()> {
    port.write(registers::dac_output(payload[0]), le_u32(&payload[1..5]))
}

fn write_dio_direction(port: &dyn RegisterPort, payload: &[u8]) -> HardwareResult<()> {
    port.write(registers::OFS_DIO_DIRECTION, le_u32(payload))
}

fn write_dio_outputs(port: &dyn RegisterPort, payload: &[u8]) -> HardwareResult<()> {
    port.write(registers::OFS_DIO_OUTPUT, le_u32(payload))
}
