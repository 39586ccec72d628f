//! Transaction engine for STM32-style two-wire bus controllers.
//!
//! The engine drives the controller through the [`Peripheral`] trait: a status
//! snapshot, the transfer-control word, the data registers and the flag-clear
//! register. Every wait on a status flag is bounded by [`BusConfig::max_polls`],
//! so a device that never answers produces [`BusError::Timeout`] instead of a hang.
//!
//! [`Bus`] implements [`embedded_hal::i2c::I2c`]. A register write is a single
//! transfer ending in an automatic STOP; a register read writes the register
//! address without STOP, then issues a repeated START in the read direction.

use core::ops::BitOr;

use embedded_hal::i2c::{self, ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};

/// Most bytes the controller moves per programming of the transfer-control word.
/// Longer transfers are continued with RELOAD.
pub const MAX_CHUNK: usize = 255;

/// Snapshot of the controller's interrupt and status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status(pub u32);

impl Status {
    /// Transmit data register empty.
    pub const TXE: Self = Self(1 << 0);
    /// Transmit data register must be written.
    pub const TXIS: Self = Self(1 << 1);
    /// Receive data register holds a byte.
    pub const RXNE: Self = Self(1 << 2);
    /// The addressed device did not acknowledge.
    pub const NACKF: Self = Self(1 << 4);
    /// A STOP condition was sent.
    pub const STOPF: Self = Self(1 << 5);
    /// Transfer complete, waiting for a START or STOP.
    pub const TC: Self = Self(1 << 6);
    /// Chunk complete, waiting for the next byte count.
    pub const TCR: Self = Self(1 << 7);
    /// A transfer is in progress on the bus.
    pub const BUSY: Self = Self(1 << 15);

    /// Returns `true` if every flag in `flags` is set.
    pub const fn contains(self, flags: Self) -> bool {
        self.0 & flags.0 == flags.0
    }
}

impl BitOr for Status {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Transfer direction as seen from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Controller to device.
    Write,
    /// Device to controller.
    Read,
}

/// One programming of the controller's transfer-control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transfer {
    /// 7-bit device address.
    pub address: u8,
    /// Bytes in this chunk.
    pub len: u8,
    /// Read or write.
    pub direction: Direction,
    /// Generate a START (or repeated START) before the chunk.
    pub start: bool,
    /// More chunks follow; the controller raises TCR instead of finishing.
    pub reload: bool,
    /// Generate a STOP once the chunk completes.
    pub autoend: bool,
}

impl Transfer {
    /// The transfer as the controller's CR2 register layout.
    pub fn bits(&self) -> u32 {
        let mut cr2 = ((self.address as u32 & 0x7F) << 1) | ((self.len as u32) << 16);
        if self.direction == Direction::Read { cr2 |= 1 << 10; }
        if self.start   { cr2 |= 1 << 13; }
        if self.reload  { cr2 |= 1 << 24; }
        if self.autoend { cr2 |= 1 << 25; }
        cr2
    }
}

/// Register-level access to a two-wire bus controller.
pub trait Peripheral {
    /// Reads the interrupt and status register.
    fn status(&mut self) -> Status;
    /// Writes the transfer-control word.
    fn program(&mut self, transfer: Transfer);
    /// Writes the transmit data register.
    fn transmit(&mut self, byte: u8);
    /// Reads the receive data register.
    fn receive(&mut self) -> u8;
    /// Clears the given flags through the interrupt clear register.
    fn clear(&mut self, flags: Status);
    /// Aborts whatever the controller is doing and returns it to idle.
    /// On STM32 parts this is clearing and setting the peripheral enable bit.
    fn reset(&mut self);
}

/// Where a transaction was when a wait expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// Waiting for another bus master to release the bus.
    Idle,
    /// START and address sent, waiting for the device to take the first byte.
    StartSent,
    /// Device answered, bytes are being transmitted.
    AddressAcked,
    /// Direction switched without releasing the bus, waiting for the first byte.
    RepeatedStart,
    /// Bytes are being received.
    Reading,
    /// All bytes moved, waiting for the STOP condition.
    StopPending,
}

/// Errors produced by [`Bus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// A status flag did not appear within the poll budget.
    Timeout(Phase),
    /// The device did not acknowledge its address or a data byte.
    Nack,
}

impl i2c::Error for BusError {
    fn kind(&self) -> ErrorKind {
        match self {
            BusError::Nack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown),
            BusError::Timeout(_) => ErrorKind::Other,
        }
    }
}

/// Wait policy for [`Bus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusConfig {
    /// Status reads allowed per flag wait before giving up.
    pub max_polls: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { max_polls: 10_000 }
    }
}

impl BusConfig {
    /// Sets the number of status reads allowed per flag wait.
    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls;
        self
    }
}

/// Bytes left in the current chunk and in the whole segment after it.
struct Chunks {
    current: usize,
    rest: usize,
}

/// A bus controller driven with bounded waits.
///
/// Only one transaction is in flight at a time; `&mut self` enforces it.
pub struct Bus<P> {
    periph: P,
    config: BusConfig,
    phase: Phase,
}

impl<P: Peripheral> Bus<P> {
    /// Wraps a controller that has already been clocked and enabled.
    pub fn new(periph: P, config: BusConfig) -> Self {
        Self { periph, config, phase: Phase::Idle }
    }

    /// Returns the underlying controller.
    pub fn release(self) -> P {
        self.periph
    }

    /// Writes one byte to a device register.
    pub fn write_register(&mut self, address: u8, register: u8, value: u8) -> Result<(), BusError> {
        self.transaction(address, &mut [Operation::Write(&[register, value])])
    }

    /// Reads `buffer.len()` bytes starting at a device register, using a repeated START.
    pub fn read_registers(&mut self, address: u8, register: u8, buffer: &mut [u8]) -> Result<(), BusError> {
        self.transaction(address, &mut [Operation::Write(&[register]), Operation::Read(buffer)])
    }

    fn wait(&mut self, flag: Status) -> Result<(), BusError> {
        for _ in 0..self.config.max_polls {
            let status = self.periph.status();
            if status.contains(Status::NACKF) {
                warn!("bus: device did not acknowledge");
                self.periph.clear(Status::NACKF | Status::STOPF);
                return Err(BusError::Nack);
            }
            if status.contains(flag) {
                return Ok(());
            }
        }
        warn!("bus: timed out after {} polls", self.config.max_polls);
        Err(BusError::Timeout(self.phase))
    }

    fn wait_idle(&mut self) -> Result<(), BusError> {
        for _ in 0..self.config.max_polls {
            if !self.periph.status().contains(Status::BUSY) {
                return Ok(());
            }
        }
        warn!("bus: stuck busy after {} polls", self.config.max_polls);
        Err(BusError::Timeout(Phase::Idle))
    }

    /// Waits for the controller to finish a chunk and programs the next one.
    fn reload(&mut self, address: u8, direction: Direction, last: bool, chunks: &mut Chunks) -> Result<(), BusError> {
        self.wait(Status::TCR)?;
        chunks.current = chunks.rest.min(MAX_CHUNK);
        chunks.rest -= chunks.current;
        self.periph.program(Transfer {
            address,
            len: chunks.current as u8,
            direction,
            start: false,
            reload: chunks.rest > 0,
            autoend: last && chunks.rest == 0,
        });
        Ok(())
    }

    /// Moves one run of same-direction operations as a single transfer.
    fn segment(
        &mut self,
        address: u8,
        direction: Direction,
        operations: &mut [Operation<'_>],
        last: bool,
        restart: bool,
    ) -> Result<(), BusError> {
        let total: usize = operations.iter().map(len_of).sum();
        let current = total.min(MAX_CHUNK);
        let mut chunks = Chunks { current, rest: total - current };

        self.phase = if restart { Phase::RepeatedStart } else { Phase::StartSent };
        trace!("bus: start addr={} len={} last={}", address, total, last);
        self.periph.program(Transfer {
            address,
            len: chunks.current as u8,
            direction,
            start: true,
            reload: chunks.rest > 0,
            autoend: last && chunks.rest == 0,
        });

        for operation in operations.iter_mut() {
            match operation {
                Operation::Write(bytes) => {
                    for &byte in bytes.iter() {
                        if chunks.current == 0 {
                            self.reload(address, direction, last, &mut chunks)?;
                        }
                        self.wait(Status::TXIS)?;
                        self.periph.transmit(byte);
                        self.phase = Phase::AddressAcked;
                        chunks.current -= 1;
                    }
                }
                Operation::Read(buffer) => {
                    for byte in buffer.iter_mut() {
                        if chunks.current == 0 {
                            self.reload(address, direction, last, &mut chunks)?;
                        }
                        self.wait(Status::RXNE)?;
                        *byte = self.periph.receive();
                        self.phase = Phase::Reading;
                        chunks.current -= 1;
                    }
                }
            }
        }

        if last {
            self.phase = Phase::StopPending;
            self.wait(Status::STOPF)?;
            self.periph.clear(Status::STOPF);
        } else {
            self.wait(Status::TC)?;
        }
        Ok(())
    }

    fn run(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), BusError> {
        self.phase = Phase::Idle;
        self.wait_idle()?;

        let mut first = 0;
        while first < operations.len() {
            let direction = direction_of(&operations[first]);
            let end = first
                + operations[first..]
                    .iter()
                    .take_while(|op| direction_of(op) == direction)
                    .count();
            let last = end == operations.len();
            self.segment(address, direction, &mut operations[first..end], last, first > 0)?;
            first = end;
        }
        Ok(())
    }
}

fn direction_of(operation: &Operation<'_>) -> Direction {
    match operation {
        Operation::Write(_) => Direction::Write,
        Operation::Read(_) => Direction::Read,
    }
}

fn len_of(operation: &Operation<'_>) -> usize {
    match operation {
        Operation::Write(bytes) => bytes.len(),
        Operation::Read(buffer) => buffer.len(),
    }
}

impl<P: Peripheral> ErrorType for Bus<P> {
    type Error = BusError;
}

impl<P: Peripheral> I2c for Bus<P> {
    fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
        let result = self.run(address, operations);
        if let Err(BusError::Timeout(_)) = result {
            debug!("bus: resetting controller after stall");
            self.periph.reset();
        }
        self.phase = Phase::Idle;
        result
    }
}
