//! Named operating modes and the register writes that establish them.

use heapless::Vec;

use crate::register::Register;
use crate::sample::Channels;

/// Upper bound on the number of writes any [`Profile`] issues.
pub const MAX_PROFILE_WRITES: usize = 12;

/// Ordered `(register, value)` pairs for one profile.
pub type ProfileWrites = Vec<(Register, u8), MAX_PROFILE_WRITES>;

/// An operating mode of the sensor.
///
/// Activating a profile always clears the FIFO pointers and the overflow counter,
/// so sample accounting starts from an empty buffer. Applying the same profile
/// twice leaves the device in the same state as applying it once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Profile {
    /// Red + IR at maximum LED drive, 400 Hz, 411 µs pulses (widest bit depth).
    HighAccuracy,
    /// Red + IR with 8-sample averaging, reduced LED drive, 50 Hz, 215 µs pulses.
    /// Also starts the die temperature sensor.
    LowPower,
    /// Red + IR + green in multi-LED mode at 100 Hz, every LED driven at `led_power`.
    /// Also starts the die temperature sensor.
    ///
    /// `led_power` is written as-is; the device applies its own limits.
    MuscleOxygenation { led_power: u8 },
}

impl Profile {
    /// Number of channels each FIFO sample carries in this mode.
    pub fn channels(&self) -> Channels {
        match self {
            Profile::HighAccuracy | Profile::LowPower => Channels::Two,
            Profile::MuscleOxygenation { .. } => Channels::Three,
        }
    }

    /// The register writes that activate this profile, in issue order.
    pub fn writes(&self) -> ProfileWrites {
        use Register::*;
        match *self {
            Profile::HighAccuracy => [
                (FifoConfig,    0x10), // no averaging, roll-over enabled
                (ModeConfig,    0x03), // SpO2 mode: red + IR
                (Spo2Config,    0x2F), // 400 Hz, 411 µs
                (FifoReadPtr,   0x00),
                (FifoWritePtr,  0x00),
                (OverflowCount, 0x00),
                (Led1Amplitude, 0x3F),
                (Led2Amplitude, 0x3F),
            ].into_iter().collect(),
            Profile::LowPower => [
                (FifoConfig,    0x4F), // average 8, roll-over enabled
                (ModeConfig,    0x03),
                (Spo2Config,    0x23), // 50 Hz, 215 µs
                (FifoReadPtr,   0x00),
                (FifoWritePtr,  0x00),
                (OverflowCount, 0x00),
                (Led1Amplitude, 0x18),
                (Led2Amplitude, 0x18),
                (DieTempConfig, 0x01),
            ].into_iter().collect(),
            Profile::MuscleOxygenation { led_power } => [
                (FifoConfig,     0x4F),
                (ModeConfig,     0x07), // multi-LED mode
                (Spo2Config,     0x26), // 100 Hz, 215 µs
                (FifoReadPtr,    0x00),
                (FifoWritePtr,   0x00),
                (OverflowCount,  0x00),
                (MultiLedSlots1, 0x21), // slot1 red, slot2 IR
                (MultiLedSlots2, 0x03), // slot3 green
                (Led1Amplitude,  led_power),
                (Led2Amplitude,  led_power),
                (Led3Amplitude,  led_power),
                (DieTempConfig,  0x01),
            ].into_iter().collect(),
        }
    }
}
