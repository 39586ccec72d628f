#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

#![doc = include_str!("../README.md")]

#[macro_use]
mod fmt;

pub mod bus;
mod guard;
mod profile;
mod register;
mod sample;

pub use guard::{BusyFlag, BusyGuard};
pub use profile::{Profile, ProfileWrites, MAX_PROFILE_WRITES};
pub use register::{Register, DEVICE_ADDRESS, PART_ID};
pub use sample::{
    count, current, pending, Channels, Sample, SampleCounts, SampleCurrents, FIFO_DEPTH, LSB_NANOAMPS,
    MAX_CHANNELS, MAX_RECORD_LEN,
};

use embedded_hal::i2c::I2c;

use register::{POINTER_MASK, TEMP_EN};

const ADDRESSES: &[u8] = &[DEVICE_ADDRESS];

/// Errors returned by [`MAX30101`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// The bus transaction failed.
    I2c(E),
    /// A drain asked for more samples than the last occupancy check reported,
    /// or more than the output buffer holds, or the sensor has no active profile.
    InvalidArgument,
}

/// A MAX30101 sensor wrapper.
pub struct MAX30101<T: I2c> {
    i2c: T,
    addr: u8,
    /// Record layout of the active profile. `None` until a profile has been fully applied.
    channels: Option<Channels>,
    /// Samples known to be waiting in the FIFO, from the last occupancy check
    /// minus everything drained since.
    ready: u8,
}
impl<T: I2c> MAX30101<T> {
    /// Scans for available devices on the expected set of addresses.
    /// Returns `Some(addr)` with the first found valid address, or `None` if no devices are found.
    ///
    /// Note that a found device is not necessarily a MAX30101 sensor,
    /// as some other device could share the address. See [`MAX30101::part_id`].
    pub fn scan(i2c: &mut T) -> Option<u8> {
        for addr in ADDRESSES.iter().copied() {
            if i2c.write(addr, &[]).is_ok() { return Some(addr) }
        }
        None
    }
    /// Constructs a MAX30101 sensor wrapper targeting the given address,
    /// and activates `profile` on the device.
    pub fn new(addr: u8, i2c: T, profile: Profile) -> Result<Self, Error<T::Error>> {
        let mut sensor = Self { i2c, addr, channels: None, ready: 0 };
        sensor.apply_profile(profile)?;
        Ok(sensor)
    }
    /// Gives back the bus.
    pub fn release(self) -> T {
        self.i2c
    }

    fn read_reg(&mut self, reg: Register) -> Result<u8, Error<T::Error>> {
        let mut res = [0u8];
        self.i2c.write_read(self.addr, &[reg.addr()], &mut res).map_err(Error::I2c)?;
        Ok(res[0])
    }
    fn write_reg(&mut self, reg: Register, value: u8) -> Result<(), Error<T::Error>> {
        self.i2c.write(self.addr, &[reg.addr(), value]).map_err(Error::I2c)
    }
    fn transform_reg(&mut self, reg: Register, trans: fn(u8) -> u8) -> Result<(), Error<T::Error>> {
        let value = self.read_reg(reg)?;
        self.write_reg(reg, trans(value))
    }

    /// Switches the device to another operating mode.
    ///
    /// The FIFO is emptied as part of the switch, so any samples not yet drained are lost.
    /// If a write fails the device is left in an unknown mode and drains are refused
    /// until a profile is applied successfully.
    pub fn apply_profile(&mut self, profile: Profile) -> Result<(), Error<T::Error>> {
        let writes = profile.writes();
        debug!("applying profile: {} register writes", writes.len());
        self.ready = 0;
        self.channels = None;
        for &(reg, value) in writes.iter() {
            self.write_reg(reg, value)?;
        }
        self.channels = Some(profile.channels());
        Ok(())
    }
    /// Channels per sample in the active profile, or `None` if the last profile switch failed.
    pub fn channels(&self) -> Option<Channels> {
        self.channels
    }
    /// Reads the part identifier. A MAX30101 reports [`PART_ID`].
    pub fn part_id(&mut self) -> Result<u8, Error<T::Error>> {
        self.read_reg(Register::PartId)
    }

    /// Returns how many complete samples are waiting in the FIFO, in `0..32`.
    ///
    /// The two pointers are read in separate transactions. The device keeps writing
    /// in between, so the result can undercount by the samples that landed during
    /// the check; they are picked up on the next call.
    pub fn available_samples(&mut self) -> Result<u8, Error<T::Error>> {
        let write = self.read_reg(Register::FifoWritePtr)?;
        let read = self.read_reg(Register::FifoReadPtr)?;
        self.ready = pending(write, read);
        trace!("fifo: write={} read={} pending={}", write & POINTER_MASK, read & POINTER_MASK, self.ready);
        Ok(self.ready)
    }
    /// Samples lost to FIFO roll-over since the counter was last cleared.
    pub fn overflow_count(&mut self) -> Result<u8, Error<T::Error>> {
        Ok(self.read_reg(Register::OverflowCount)? & POINTER_MASK)
    }

    fn drain<V: Copy + Default>(
        &mut self,
        count: usize,
        out: &mut [Sample<V>],
        convert: impl Fn(u16) -> V,
    ) -> Result<(), Error<T::Error>> {
        let Some(channels) = self.channels else {
            warn!("drain refused: no active profile");
            return Err(Error::InvalidArgument);
        };
        if count > out.len() || count > self.ready as usize {
            warn!("drain of {} refused: {} ready, room for {}", count, self.ready, out.len());
            return Err(Error::InvalidArgument);
        }
        let len = channels.record_len();
        let mut record = [0u8; MAX_RECORD_LEN];
        for slot in out[..count].iter_mut() {
            self.i2c
                .write_read(self.addr, &[Register::FifoData.addr()], &mut record[..len])
                .map_err(Error::I2c)?;
            self.ready -= 1;
            *slot = Sample::decode(&record, channels, &convert);
        }
        debug!("drained {} samples", count);
        Ok(())
    }
    /// Reads `count` samples from the FIFO into `out[..count]` as raw counts.
    ///
    /// `count` may not exceed what the last [`MAX30101::available_samples`] reported
    /// (less what was drained since) nor `out.len()`; otherwise
    /// [`Error::InvalidArgument`] is returned and the bus is left untouched.
    /// Each sample is one read of the FIFO data register.
    pub fn drain_counts(&mut self, count: usize, out: &mut [SampleCounts]) -> Result<(), Error<T::Error>> {
        self.drain(count, out, |c| c)
    }
    /// Like [`MAX30101::drain_counts`], but scales each count to nanoamps while reading.
    pub fn drain_currents(&mut self, count: usize, out: &mut [SampleCurrents]) -> Result<(), Error<T::Error>> {
        self.drain(count, out, current)
    }
    /// Checks occupancy and drains as many samples as fit in `out`.
    /// Returns the number of samples written.
    pub fn poll_counts(&mut self, out: &mut [SampleCounts]) -> Result<usize, Error<T::Error>> {
        let count = usize::from(self.available_samples()?).min(out.len());
        self.drain_counts(count, out)?;
        Ok(count)
    }
    /// Like [`MAX30101::poll_counts`], with samples scaled to nanoamps.
    pub fn poll_currents(&mut self, out: &mut [SampleCurrents]) -> Result<usize, Error<T::Error>> {
        let count = usize::from(self.available_samples()?).min(out.len());
        self.drain_currents(count, out)?;
        Ok(count)
    }

    /// Starts a one-shot die temperature conversion.
    /// Use [`MAX30101::temperature_ready`] to find out when it has finished.
    pub fn start_temperature(&mut self) -> Result<(), Error<T::Error>> {
        self.transform_reg(Register::DieTempConfig, |x| x | TEMP_EN)
    }
    /// Returns `true` once the last conversion has completed.
    pub fn temperature_ready(&mut self) -> Result<bool, Error<T::Error>> {
        Ok(self.read_reg(Register::DieTempConfig)? & TEMP_EN == 0)
    }
    /// Gets the last die temperature reading (in Celsius) from the device.
    pub fn read_temperature(&mut self) -> Result<f32, Error<T::Error>> {
        let mut res = [0; 2];
        self.i2c.write_read(self.addr, &[Register::DieTempInt.addr()], &mut res).map_err(Error::I2c)?;
        Ok(res[0] as i8 as f32 + (res[1] & 0x0F) as f32 * 0.0625)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embedded_hal::i2c::{ErrorKind, ErrorType, Operation};
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};

    const ADDR: u8 = DEVICE_ADDRESS;
    const FIFO: u8 = 0x07;

    fn profile_writes(profile: Profile) -> Vec<I2cTransaction> {
        profile.writes().iter().map(|&(reg, value)| I2cTransaction::write(ADDR, vec![reg.addr(), value])).collect()
    }

    fn pointers(write: u8, read: u8) -> [I2cTransaction; 2] {
        [
            I2cTransaction::write_read(ADDR, vec![0x04], vec![write]),
            I2cTransaction::write_read(ADDR, vec![0x06], vec![read]),
        ]
    }

    /// Opens a sensor in `profile`, followed by `rest` on the bus.
    fn sensor(profile: Profile, rest: &[I2cTransaction]) -> MAX30101<I2cMock> {
        let mut expectations = profile_writes(profile);
        expectations.extend_from_slice(rest);
        MAX30101::new(ADDR, I2cMock::new(&expectations), profile).unwrap()
    }

    #[test]
    fn new_applies_profile_in_order() {
        let sensor = sensor(Profile::MuscleOxygenation { led_power: 0x4B }, &[]);
        assert_eq!(sensor.channels(), Some(Channels::Three));
        sensor.release().done();
    }

    #[test]
    fn scan_finds_device() {
        let mut i2c = I2cMock::new(&[I2cTransaction::write(ADDR, vec![])]);
        assert_eq!(MAX30101::scan(&mut i2c), Some(ADDR));
        i2c.done();

        let mut i2c = I2cMock::new(&[I2cTransaction::write(ADDR, vec![]).with_error(ErrorKind::Other)]);
        assert_eq!(MAX30101::scan(&mut i2c), None);
        i2c.done();
    }

    #[test]
    fn available_then_drain_dual_channel() {
        let mut rest = pointers(5, 2).to_vec();
        for n in 1..=3u8 {
            rest.push(I2cTransaction::write_read(ADDR, vec![FIFO], vec![0x00, n, 0x10, n]));
        }
        let mut sensor = sensor(Profile::HighAccuracy, &rest);

        assert_eq!(sensor.available_samples().unwrap(), 3);
        let mut out = [SampleCounts::default(); FIFO_DEPTH];
        sensor.drain_counts(3, &mut out).unwrap();
        for (i, s) in out[..3].iter().enumerate() {
            let n = i as u16 + 1;
            assert_eq!(s.values(), &[n, 0x1000 | n]);
            assert_eq!(s.green(), None);
        }
        sensor.release().done();
    }

    #[test]
    fn available_wraps_around() {
        let mut sensor = sensor(Profile::LowPower, &pointers(2, 30));
        assert_eq!(sensor.available_samples().unwrap(), 4);
        sensor.release().done();
    }

    #[test]
    fn available_edges() {
        let mut rest = Vec::new();
        for (w, r) in [(9, 9), (31, 0), (0, 31), (31, 31)] {
            rest.extend_from_slice(&pointers(w, r));
        }
        let mut sensor = sensor(Profile::LowPower, &rest);
        assert_eq!(sensor.available_samples().unwrap(), 0);
        assert_eq!(sensor.available_samples().unwrap(), 31);
        assert_eq!(sensor.available_samples().unwrap(), 1);
        assert_eq!(sensor.available_samples().unwrap(), 0);
        sensor.release().done();
    }

    #[test]
    fn overdrain_is_rejected_without_bus_traffic() {
        let mut sensor = sensor(Profile::HighAccuracy, &pointers(3, 1));
        let mut out = [SampleCounts::default(); 8];

        // no occupancy check yet
        assert_eq!(sensor.drain_counts(1, &mut out), Err(Error::InvalidArgument));
        assert_eq!(sensor.available_samples().unwrap(), 2);
        assert_eq!(sensor.drain_counts(3, &mut out), Err(Error::InvalidArgument));
        assert_eq!(sensor.drain_counts(2, &mut out[..1]), Err(Error::InvalidArgument));
        sensor.release().done();
    }

    #[test]
    fn drained_samples_are_spent() {
        let mut rest = pointers(2, 0).to_vec();
        rest.push(I2cTransaction::write_read(ADDR, vec![FIFO], vec![0, 1, 0, 2]));
        rest.push(I2cTransaction::write_read(ADDR, vec![FIFO], vec![0, 3, 0, 4]));
        let mut sensor = sensor(Profile::HighAccuracy, &rest);
        let mut out = [SampleCounts::default(); 2];

        sensor.available_samples().unwrap();
        sensor.drain_counts(1, &mut out).unwrap();
        sensor.drain_counts(1, &mut out[1..]).unwrap();
        assert_eq!(sensor.drain_counts(1, &mut out), Err(Error::InvalidArgument));
        assert_eq!((out[0].red(), out[1].ir()), (1, 4));
        sensor.release().done();
    }

    #[test]
    fn drain_currents_three_channels() {
        let profile = Profile::MuscleOxygenation { led_power: 0x20 };
        let mut rest = pointers(1, 0).to_vec();
        rest.push(I2cTransaction::write_read(ADDR, vec![FIFO], vec![0x00, 0x00, 0x00, 0x64, 0xFF, 0xFF]));
        let mut sensor = sensor(profile, &rest);

        let mut out = [SampleCurrents::default(); 4];
        assert_eq!(sensor.poll_currents(&mut out).unwrap(), 1);
        let s = out[0];
        assert_eq!(s.red(), 0.0);
        assert!((s.ir() - 0.781).abs() < 1e-5);
        assert!((s.green().unwrap() - 65535.0 * LSB_NANOAMPS).abs() < 1e-3);
        sensor.release().done();
    }

    #[test]
    fn poll_is_limited_by_buffer() {
        let mut rest = pointers(10, 0).to_vec();
        for _ in 0..2 {
            rest.push(I2cTransaction::write_read(ADDR, vec![FIFO], vec![0x12, 0x34, 0x56, 0x78]));
        }
        let mut sensor = sensor(Profile::HighAccuracy, &rest);

        let mut out = [SampleCounts::default(); 2];
        assert_eq!(sensor.poll_counts(&mut out).unwrap(), 2);
        assert_eq!(out[1].values(), &[0x1234, 0x5678]);
        sensor.release().done();
    }

    #[test]
    fn bus_error_stops_the_drain() {
        let mut rest = pointers(4, 0).to_vec();
        rest.push(I2cTransaction::write_read(ADDR, vec![FIFO], vec![0, 1, 0, 2]));
        rest.push(I2cTransaction::write_read(ADDR, vec![FIFO], vec![0, 0, 0, 0]).with_error(ErrorKind::Other));
        let mut sensor = sensor(Profile::HighAccuracy, &rest);

        let mut out = [SampleCounts::default(); 4];
        sensor.available_samples().unwrap();
        assert_eq!(sensor.drain_counts(4, &mut out), Err(Error::I2c(ErrorKind::Other)));
        assert_eq!(out[0].red(), 1);
        sensor.release().done();
    }

    #[test]
    fn profile_switch_changes_record_width() {
        let mut rest = profile_writes(Profile::MuscleOxygenation { led_power: 1 });
        rest.extend_from_slice(&pointers(1, 0));
        rest.push(I2cTransaction::write_read(ADDR, vec![FIFO], vec![0, 1, 0, 2, 0, 3]));
        let mut sensor = sensor(Profile::LowPower, &rest);

        sensor.apply_profile(Profile::MuscleOxygenation { led_power: 1 }).unwrap();
        let mut out = [SampleCounts::default(); 1];
        assert_eq!(sensor.poll_counts(&mut out).unwrap(), 1);
        assert_eq!(out[0].values(), &[1, 2, 3]);
        sensor.release().done();
    }

    #[test]
    fn failed_profile_switch_refuses_drains() {
        let target = Profile::MuscleOxygenation { led_power: 0x20 };
        let mut rest = profile_writes(target)[..2].to_vec();
        rest.push(I2cTransaction::write(ADDR, vec![0x0A, 0x26]).with_error(ErrorKind::Other));
        rest.extend_from_slice(&pointers(1, 0));
        rest.extend_from_slice(&profile_writes(target));
        rest.extend_from_slice(&pointers(1, 0));
        rest.push(I2cTransaction::write_read(ADDR, vec![FIFO], vec![0, 1, 0, 2, 0, 3]));
        let mut sensor = sensor(Profile::HighAccuracy, &rest);

        // mode register already switched to three channels when the SpO2 write fails
        assert_eq!(sensor.apply_profile(target), Err(Error::I2c(ErrorKind::Other)));
        assert_eq!(sensor.channels(), None);
        let mut out = [SampleCounts::default(); 4];
        assert_eq!(sensor.poll_counts(&mut out), Err(Error::InvalidArgument));

        sensor.apply_profile(target).unwrap();
        assert_eq!(sensor.poll_counts(&mut out).unwrap(), 1);
        assert_eq!(out[0].values(), &[1, 2, 3]);
        sensor.release().done();
    }

    #[test]
    fn die_temperature() {
        let rest = [
            I2cTransaction::write_read(ADDR, vec![0x21], vec![0x00]),
            I2cTransaction::write(ADDR, vec![0x21, 0x01]),
            I2cTransaction::write_read(ADDR, vec![0x21], vec![0x01]),
            I2cTransaction::write_read(ADDR, vec![0x21], vec![0x00]),
            I2cTransaction::write_read(ADDR, vec![0x1F], vec![0xFE, 0x08]),
        ];
        let mut sensor = sensor(Profile::HighAccuracy, &rest);

        sensor.start_temperature().unwrap();
        assert!(!sensor.temperature_ready().unwrap());
        assert!(sensor.temperature_ready().unwrap());
        assert_eq!(sensor.read_temperature().unwrap(), -1.5);
        sensor.release().done();
    }

    #[test]
    fn identification_and_overflow() {
        let rest = [
            I2cTransaction::write_read(ADDR, vec![0xFF], vec![PART_ID]),
            I2cTransaction::write_read(ADDR, vec![0x05], vec![0xE7]),
        ];
        let mut sensor = sensor(Profile::HighAccuracy, &rest);
        assert_eq!(sensor.part_id().unwrap(), 0x15);
        assert_eq!(sensor.overflow_count().unwrap(), 7);
        sensor.release().done();
    }

    /// A register file that behaves like the device's auto-incrementing register pointer.
    struct RegisterFile {
        regs: [u8; 256],
    }

    impl ErrorType for RegisterFile {
        type Error = Infallible;
    }

    impl I2c for RegisterFile {
        fn transaction(&mut self, _address: u8, operations: &mut [Operation<'_>]) -> Result<(), Infallible> {
            let mut pointer = 0usize;
            for op in operations {
                match op {
                    Operation::Write(bytes) => {
                        if let Some((&reg, data)) = bytes.split_first() {
                            pointer = reg as usize;
                            for &b in data {
                                self.regs[pointer] = b;
                                pointer = (pointer + 1) % 256;
                            }
                        }
                    }
                    Operation::Read(buf) => {
                        for b in buf.iter_mut() {
                            *b = self.regs[pointer];
                            pointer = (pointer + 1) % 256;
                        }
                    }
                }
            }
            Ok(())
        }
    }

    #[test]
    fn profiles_are_idempotent() {
        for profile in [Profile::HighAccuracy, Profile::LowPower, Profile::MuscleOxygenation { led_power: 0x4B }] {
            let mut regs = [0xAAu8; 256];
            regs[0x04] = 0x11;
            regs[0x06] = 0x07;

            let mut once = MAX30101::new(ADDR, RegisterFile { regs }, profile).unwrap();
            let mut twice = MAX30101::new(ADDR, RegisterFile { regs }, profile).unwrap();
            twice.apply_profile(profile).unwrap();

            assert_eq!(once.available_samples().unwrap(), 0);
            assert_eq!(twice.available_samples().unwrap(), 0);
            assert_eq!(once.release().regs, twice.release().regs);
        }
    }
}
