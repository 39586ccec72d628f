//! MAX30101 register map.

/// Device registers, addresses per the MAX30101 datasheet.
///
/// Every register the driver touches is named exactly once here, so two names
/// can never drift onto different addresses.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    IntStatus1     = 0x00,
    IntStatus2     = 0x01,
    IntEnable1     = 0x02,
    IntEnable2     = 0x03,
    /// FIFO write pointer, 5 bits.
    FifoWritePtr   = 0x04,
    /// Count of samples lost to FIFO roll-over, 5 bits.
    OverflowCount  = 0x05,
    /// FIFO read pointer, 5 bits.
    FifoReadPtr    = 0x06,
    /// Reading this address repeatedly yields successive FIFO bytes.
    FifoData       = 0x07,
    FifoConfig     = 0x08,
    ModeConfig     = 0x09,
    Spo2Config     = 0x0A,
    Led1Amplitude  = 0x0C,
    Led2Amplitude  = 0x0D,
    Led3Amplitude  = 0x0E,
    Led4Amplitude  = 0x0F,
    MultiLedSlots1 = 0x11,
    MultiLedSlots2 = 0x12,
    DieTempInt     = 0x1F,
    DieTempFrac    = 0x20,
    DieTempConfig  = 0x21,
    PartId         = 0xFF,
}

impl Register {
    /// Returns the 8-bit register address.
    pub const fn addr(self) -> u8 {
        self as u8
    }
}

impl From<Register> for u8 {
    fn from(r: Register) -> Self {
        r as u8
    }
}

/// Default 7-bit bus address of the MAX30101.
pub const DEVICE_ADDRESS: u8 = 0x57;

/// Value of [`Register::PartId`] on a genuine part.
pub const PART_ID: u8 = 0x15;

/// The FIFO pointers and the overflow counter are 5 bits wide.
pub(crate) const POINTER_MASK: u8 = 0x1F;

/// Setting this bit in [`Register::DieTempConfig`] starts a one-shot conversion.
/// The device clears it once the result registers hold a new reading.
pub(crate) const TEMP_EN: u8 = 0x01;
