//! FIFO accounting and sample conversion.
//!
//! A FIFO sample is a record of big-endian 16-bit words, one per active channel,
//! in the order red, IR, green. Counts convert to photodiode current with a fixed
//! LSB of 7.81 pA.

use crate::register::POINTER_MASK;

/// Depth of the on-chip FIFO, in samples.
pub const FIFO_DEPTH: usize = 32;

/// Most channels a sample can carry.
pub const MAX_CHANNELS: usize = 3;

/// Bytes in the widest FIFO record.
pub const MAX_RECORD_LEN: usize = MAX_CHANNELS * 2;

/// Current represented by one count, in nanoamps.
pub const LSB_NANOAMPS: f32 = 0.007_81;

/// Number of LED channels per FIFO record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channels {
    /// Red + IR.
    #[default]
    Two = 2,
    /// Red + IR + green.
    Three = 3,
}

impl Channels {
    /// Words per FIFO record.
    pub fn count(self) -> usize {
        self as usize
    }

    /// Bytes one FIFO record occupies.
    pub fn record_len(self) -> usize {
        self.count() * 2
    }
}

/// Number of unread samples between the two 5-bit FIFO pointers.
///
/// Both pointers are masked to 5 bits first. The result is `(write - read) mod 32`,
/// so `write == read` means empty.
pub fn pending(write_ptr: u8, read_ptr: u8) -> u8 {
    let write = write_ptr & POINTER_MASK;
    let read = read_ptr & POINTER_MASK;
    if write >= read {
        write - read
    } else {
        (FIFO_DEPTH as u8 - read) + write
    }
}

/// Reinterprets a big-endian byte pair as a count.
pub fn count(msb: u8, lsb: u8) -> u16 {
    u16::from_be_bytes([msb, lsb])
}

/// Scales a count to photodiode current in nanoamps. Never clamps.
pub fn current(count: u16) -> f32 {
    count as f32 * LSB_NANOAMPS
}

/// One FIFO sample, per channel, in red / IR / green order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sample<T> {
    values: [T; MAX_CHANNELS],
    channels: Channels,
}

impl<T: Copy + Default> Sample<T> {
    /// Builds a sample by mapping each big-endian word of `record` through `convert`.
    ///
    /// Only the first `channels.record_len()` bytes of `record` are used.
    pub fn decode(record: &[u8; MAX_RECORD_LEN], channels: Channels, convert: impl Fn(u16) -> T) -> Self {
        let mut values = [T::default(); MAX_CHANNELS];
        for (value, word) in values.iter_mut().zip(record[..channels.record_len()].chunks_exact(2)) {
            *value = convert(count(word[0], word[1]));
        }
        Self { values, channels }
    }

    /// Channels the sample was read with.
    pub fn channels(&self) -> Channels {
        self.channels
    }

    /// The active channel values, in FIFO order.
    pub fn values(&self) -> &[T] {
        &self.values[..self.channels.count()]
    }

    /// The red LED channel.
    pub fn red(&self) -> T {
        self.values[0]
    }

    /// The infrared LED channel.
    pub fn ir(&self) -> T {
        self.values[1]
    }

    /// The green channel, present only in three-channel modes.
    pub fn green(&self) -> Option<T> {
        match self.channels {
            Channels::Three => Some(self.values[2]),
            Channels::Two => None,
        }
    }
}

/// Raw counts per channel.
pub type SampleCounts = Sample<u16>;

/// Photodiode current per channel, in nanoamps.
pub type SampleCurrents = Sample<f32>;
