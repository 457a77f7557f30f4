//! Item type codes.

use std::fmt;

/// Every item type the daemon understands.
///
/// Codes are grouped by subsystem in the high byte: `0x00` board, `0x01` raw
/// registers, `0x02` DAC, `0x10` ADC, `0x20` digital I/O, `0x80` connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum ItemId {
    /// Reset every subsystem
    BrdReset = 0x0001,
    /// Board identifier
    BrdDeviceId = 0x0002,
    /// Feature bits
    BrdFeatures = 0x0003,
    /// Firmware revision
    BrdFirmwareRev = 0x0004,
    /// 64-bit board clock
    BrdClock = 0x0005,
    /// Shut the daemon down
    BrdReboot = 0x0006,

    /// Read one register
    RegRead1 = 0x0101,
    /// Write one register
    RegWrite1 = 0x0104,
    /// Clear bits in one register
    RegClearBits = 0x0107,
    /// Set bits in one register
    RegSetBits = 0x0108,
    /// Toggle bits in one register
    RegToggleBits = 0x0109,

    /// Write one DAC output
    DacOutput1 = 0x0201,
    /// Write one DAC range
    DacRange1 = 0x0202,

    /// Write one ADC group range
    AdcRange1 = 0x1001,
    /// Read or write all ADC group ranges
    AdcRangeAll = 0x1002,
    /// Read or write one ADC group calibration
    AdcCalibration1 = 0x1003,
    /// Read or write scan start, end and oversample
    AdcScanSetup = 0x1004,
    /// Scan, raw u32 per channel
    AdcScanRaw = 0x1010,
    /// Scan, u16 count per channel
    AdcScanCounts = 0x1011,
    /// Scan, f32 volts per channel
    AdcScanVolts = 0x1012,
    /// Start streaming to a streaming connection
    AdcStreamStart = 0x1020,
    /// Stop streaming
    AdcStreamStop = 0x1021,
    /// Active streaming connection
    AdcStreamStatus = 0x1022,

    /// Digital I/O directions
    DioConfigure = 0x2001,
    /// Sample one digital input
    DioInput1 = 0x2002,
    /// Drive one digital output
    DioOutput1 = 0x2003,
    /// Sample all digital inputs
    DioInputAll = 0x2004,
    /// Drive all digital outputs
    DioOutputAll = 0x2005,

    /// Connection id, sent in the greeting
    TcpConnectionId = 0x8001,
    /// Error kind and message, server-built
    Diagnostic = 0x8002,
}

impl ItemId {
    /// All ids, in code order.
    pub const ALL: [ItemId; 30] = [
        Self::BrdReset,
        Self::BrdDeviceId,
        Self::BrdFeatures,
        Self::BrdFirmwareRev,
        Self::BrdClock,
        Self::BrdReboot,
        Self::RegRead1,
        Self::RegWrite1,
        Self::RegClearBits,
        Self::RegSetBits,
        Self::RegToggleBits,
        Self::DacOutput1,
        Self::DacRange1,
        Self::AdcRange1,
        Self::AdcRangeAll,
        Self::AdcCalibration1,
        Self::AdcScanSetup,
        Self::AdcScanRaw,
        Self::AdcScanCounts,
        Self::AdcScanVolts,
        Self::AdcStreamStart,
        Self::AdcStreamStop,
        Self::AdcStreamStatus,
        Self::DioConfigure,
        Self::DioInput1,
        Self::DioOutput1,
        Self::DioInputAll,
        Self::DioOutputAll,
        Self::TcpConnectionId,
        Self::Diagnostic,
    ];

    /// Wire type code.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Id for a wire code.
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|id| id.code() == code)
    }

    /// Wire name used in logs and descriptions.
    pub fn name(self) -> &'static str {
        match self {
            Self::BrdReset => "BRD_Reset",
            Self::BrdDeviceId => "BRD_DeviceId",
            Self::BrdFeatures => "BRD_Features",
            Self::BrdFirmwareRev => "BRD_FirmwareRev",
            Self::BrdClock => "BRD_Clock",
            Self::BrdReboot => "BRD_Reboot",
            Self::RegRead1 => "REG_Read1",
            Self::RegWrite1 => "REG_Write1",
            Self::RegClearBits => "REG_ClearBits",
            Self::RegSetBits => "REG_SetBits",
            Self::RegToggleBits => "REG_ToggleBits",
            Self::DacOutput1 => "DAC_Output1",
            Self::DacRange1 => "DAC_Range1",
            Self::AdcRange1 => "ADC_Range1",
            Self::AdcRangeAll => "ADC_RangeAll",
            Self::AdcCalibration1 => "ADC_Calibration1",
            Self::AdcScanSetup => "ADC_ScanSetup",
            Self::AdcScanRaw => "ADC_ScanRaw",
            Self::AdcScanCounts => "ADC_ScanCounts",
            Self::AdcScanVolts => "ADC_ScanVolts",
            Self::AdcStreamStart => "ADC_StreamStart",
            Self::AdcStreamStop => "ADC_StreamStop",
            Self::AdcStreamStatus => "ADC_StreamStatus",
            Self::DioConfigure => "DIO_Configure",
            Self::DioInput1 => "DIO_Input1",
            Self::DioOutput1 => "DIO_Output1",
            Self::DioInputAll => "DIO_InputAll",
            Self::DioOutputAll => "DIO_OutputAll",
            Self::TcpConnectionId => "TCP_ConnectionId",
            Self::Diagnostic => "Diagnostic",
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_roundtrip_and_are_unique() {
        for id in ItemId::ALL {
            assert_eq!(ItemId::from_code(id.code()), Some(id));
        }
        let mut codes: Vec<u16> = ItemId::ALL.iter().map(|id| id.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), ItemId::ALL.len());
        assert_eq!(ItemId::from_code(0xBEEF), None);
    }
}
