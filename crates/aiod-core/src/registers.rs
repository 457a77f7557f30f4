//! Register map of the AIO board family.
//!
//! Offsets are byte offsets into the board's register window. The access
//! width is implied by the offset: everything below [`WIDE_REGISTER_BASE`] is
//! an 8-bit register, everything at or above it is a 4-byte aligned 32-bit
//! register.

use crate::error::{HardwareError, HardwareResult};

/// First offset of the 32-bit register bank.
pub const WIDE_REGISTER_BASE: u8 = 0x40;

/// Access width of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterWidth {
    /// 8-bit register
    Byte,
    /// 32-bit register
    Dword,
}

impl RegisterWidth {
    /// Width in bytes.
    pub fn bytes(self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Dword => 4,
        }
    }

    /// Largest value the register can hold.
    pub fn max_value(self) -> u32 {
        match self {
            Self::Byte => 0xFF,
            Self::Dword => u32::MAX,
        }
    }
}

/// Width implied by `offset`, rejecting unaligned 32-bit offsets.
pub fn width_of(offset: u8) -> HardwareResult<RegisterWidth> {
    if offset < WIDE_REGISTER_BASE {
        Ok(RegisterWidth::Byte)
    } else if offset % 4 == 0 {
        Ok(RegisterWidth::Dword)
    } else {
        Err(HardwareError::UnalignedRegister { offset })
    }
}

// 8-bit bank
/// Subsystem reset strobes.
pub const OFS_RESET: u8 = 0x00;
/// ADC trigger mode.
pub const OFS_ADC_TRIGGER: u8 = 0x10;
/// First channel of a scan.
pub const OFS_ADC_START_CHANNEL: u8 = 0x11;
/// Last channel of a scan, inclusive.
pub const OFS_ADC_END_CHANNEL: u8 = 0x12;
/// Extra conversions per channel.
pub const OFS_ADC_OVERSAMPLES: u8 = 0x13;
/// Hardware sample reduction factor.
pub const OFS_ADC_REDUCTION: u8 = 0x14;
/// Software scan start strobe.
pub const OFS_ADC_SOFTWARE_START: u8 = 0x15;

// 32-bit bank
/// Board identifier.
pub const OFS_DEVICE_ID: u8 = 0x40;
/// Feature bits.
pub const OFS_FEATURES: u8 = 0x44;
/// Firmware revision.
pub const OFS_FIRMWARE_REV: u8 = 0x48;
/// Free-running clock, low word.
pub const OFS_CLOCK_LO: u8 = 0x4C;
/// Free-running clock, high word.
pub const OFS_CLOCK_HI: u8 = 0x50;
/// Timer trigger divisor.
pub const OFS_ADC_RATE_DIVISOR: u8 = 0x54;
/// Samples waiting in the ADC FIFO.
pub const OFS_ADC_FIFO_COUNT: u8 = 0x58;
/// Pops one sample from the ADC FIFO.
pub const OFS_ADC_FIFO_DATA: u8 = 0x5C;
/// First ADC range register, see [`adc_range`].
pub const OFS_ADC_RANGE_BASE: u8 = 0x60;
/// First ADC calibration pair, see [`adc_cal_scale`].
pub const OFS_ADC_CAL_BASE: u8 = 0x80;
/// First DAC output register.
pub const OFS_DAC_OUTPUT_BASE: u8 = 0xC0;
/// First DAC range register.
pub const OFS_DAC_RANGE_BASE: u8 = 0xD0;
/// Digital I/O direction, one bit per line.
pub const OFS_DIO_DIRECTION: u8 = 0xE0;
/// Digital input levels.
pub const OFS_DIO_INPUT: u8 = 0xE4;
/// Digital output latch.
pub const OFS_DIO_OUTPUT: u8 = 0xE8;

/// Reset register bits.
pub const RESET_ALL: u32 = 0x01;
/// Reset the ADC.
pub const RESET_ADC: u32 = 0x02;
/// Reset the DACs.
pub const RESET_DAC: u32 = 0x04;
/// Reset digital I/O.
pub const RESET_DIO: u32 = 0x08;

/// ADC trigger register modes.
pub const TRIGGER_DISABLED: u32 = 0x00;
/// Scans start on the software strobe.
pub const TRIGGER_SOFTWARE: u32 = 0x01;
/// Conversions paced by the rate divisor.
pub const TRIGGER_TIMER: u32 = 0x02;
/// Clear latched trigger state.
pub const TRIGGER_CLEAR: u32 = 0x80;

/// Number of ADC channels.
pub const ADC_CHANNELS: u8 = 16;
/// Number of ADC range/calibration groups (two channels per group).
pub const ADC_GROUPS: u8 = 8;
/// Number of DAC channels.
pub const DAC_CHANNELS: u8 = 4;
/// Number of digital I/O bits.
pub const DIO_BITS: u8 = 32;

/// Range register of ADC channel group `group`.
pub fn adc_range(group: u8) -> u8 {
    OFS_ADC_RANGE_BASE + 4 * group
}

/// Calibration scale register of ADC channel group `group`.
pub fn adc_cal_scale(group: u8) -> u8 {
    OFS_ADC_CAL_BASE + 8 * group
}

/// Calibration offset register of ADC channel group `group`.
pub fn adc_cal_offset(group: u8) -> u8 {
    OFS_ADC_CAL_BASE + 8 * group + 4
}

/// Output register of DAC channel `channel`.
pub fn dac_output(channel: u8) -> u8 {
    OFS_DAC_OUTPUT_BASE + 4 * channel
}

/// Range register of DAC channel `channel`.
pub fn dac_range(channel: u8) -> u8 {
    OFS_DAC_RANGE_BASE + 4 * channel
}

/// Registers that reject writes.
pub fn is_read_only(offset: u8) -> bool {
    matches!(
        offset,
        OFS_DEVICE_ID
            | OFS_FEATURES
            | OFS_FIRMWARE_REV
            | OFS_CLOCK_LO
            | OFS_CLOCK_HI
            | OFS_ADC_FIFO_COUNT
            | OFS_ADC_FIFO_DATA
            | OFS_DIO_INPUT
    )
}

/// Layout of one raw 32-bit ADC sample as produced by the FIFO and DMA.
pub mod sample {
    /// Sample count bits.
    pub const COUNT_MASK: u32 = 0x0000_FFFF;
    /// Gain code bits.
    pub const GAIN_SHIFT: u32 = 16;
    /// Gain code mask.
    pub const GAIN_MASK: u32 = 0x3 << GAIN_SHIFT;
    /// Set for unipolar ranges.
    pub const UNIPOLAR: u32 = 1 << 18;
    /// Channel number bits.
    pub const CHANNEL_SHIFT: u32 = 20;
    /// Channel number mask.
    pub const CHANNEL_MASK: u32 = 0x3F << CHANNEL_SHIFT;
    /// Set when the FIFO had nothing valid to return.
    pub const INVALID: u32 = 1 << 31;
    /// Metadata bits echoed by the hardware (everything but count and invalid).
    pub const METADATA_MASK: u32 = 0x7FFF_0000;
    /// Raw-view value of a channel that produced no data.
    pub const NO_DATA: u32 = 0xFFFF_FFFF;

    /// Full-scale spans in volts, indexed by gain code.
    pub const GAIN_SPANS: [f64; 4] = [10.0, 5.0, 2.5, 1.0];

    /// Build a raw sample.
    pub fn encode(channel: u8, gain: u8, unipolar: bool, count: u16) -> u32 {
        let mut raw = u32::from(count)
            | ((u32::from(gain) << GAIN_SHIFT) & GAIN_MASK)
            | ((u32::from(channel) << CHANNEL_SHIFT) & CHANNEL_MASK);
        if unipolar {
            raw |= UNIPOLAR;
        }
        raw
    }

    /// Whether the invalid flag is set.
    pub fn is_invalid(raw: u32) -> bool {
        raw & INVALID != 0
    }

    /// Channel number.
    pub fn channel(raw: u32) -> u8 {
        ((raw & CHANNEL_MASK) >> CHANNEL_SHIFT) as u8
    }

    /// Conversion count.
    pub fn count(raw: u32) -> u16 {
        (raw & COUNT_MASK) as u16
    }

    /// Everything except the count.
    pub fn metadata(raw: u32) -> u32 {
        raw & METADATA_MASK
    }

    /// Gain code, an index into [`GAIN_SPANS`].
    pub fn gain_code(raw: u32) -> u8 {
        ((raw & GAIN_MASK) >> GAIN_SHIFT) as u8
    }

    /// Whether the range was unipolar.
    pub fn is_unipolar(raw: u32) -> bool {
        raw & UNIPOLAR != 0
    }

    /// Convert a raw sample (metadata plus count) to volts.
    ///
    /// Bipolar ranges are offset-binary around mid-scale, unipolar ranges
    /// scale the count directly. [`NO_DATA`] converts to NaN.
    pub fn to_volts(raw: u32) -> f64 {
        if raw == NO_DATA {
            return f64::NAN;
        }
        let span = GAIN_SPANS[usize::from(gain_code(raw))];
        let count = f64::from(count(raw));
        if is_unipolar(raw) {
            count / 65536.0 * span
        } else {
            (count - 32768.0) / 32768.0 * span
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_width_of() {
        assert_eq!(width_of(OFS_RESET).unwrap(), RegisterWidth::Byte);
        assert_eq!(width_of(0x3F).unwrap(), RegisterWidth::Byte);
        assert_eq!(width_of(OFS_DEVICE_ID).unwrap(), RegisterWidth::Dword);
        assert_eq!(width_of(OFS_DIO_OUTPUT).unwrap(), RegisterWidth::Dword);
        assert!(matches!(
            width_of(0x41),
            Err(HardwareError::UnalignedRegister { offset: 0x41 })
        ));
    }

    #[test]
    fn test_group_offsets() {
        assert_eq!(adc_range(0), 0x60);
        assert_eq!(adc_range(7), 0x7C);
        assert_eq!(adc_cal_scale(7), 0xB8);
        assert_eq!(adc_cal_offset(7), 0xBC);
        assert_eq!(dac_output(3), 0xCC);
        assert_eq!(dac_range(3), 0xDC);
    }

    #[test]
    fn test_sample_fields() {
        let raw = sample::encode(13, 2, true, 0xBEEF);
        assert_eq!(sample::channel(raw), 13);
        assert_eq!(sample::count(raw), 0xBEEF);
        assert_eq!(sample::gain_code(raw), 2);
        assert!(sample::is_unipolar(raw));
        assert!(!sample::is_invalid(raw));
        assert_eq!(sample::metadata(raw) | u32::from(sample::count(raw)), raw);
    }

    #[test]
    fn test_to_volts() {
        // Bipolar +/-10 V: mid-scale is 0 V, full scale approaches +10 V
        assert_eq!(sample::to_volts(sample::encode(0, 0, false, 0x8000)), 0.0);
        assert_eq!(sample::to_volts(sample::encode(0, 0, false, 0)), -10.0);
        // Unipolar 0..5 V
        assert_eq!(sample::to_volts(sample::encode(0, 1, true, 0x8000)), 2.5);
        // 1 V span
        assert_eq!(sample::to_volts(sample::encode(0, 3, true, 0)), 0.0);
        assert!(sample::to_volts(sample::NO_DATA).is_nan());
    }
}
