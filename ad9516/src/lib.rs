#![no_std]

use arbitrary_int::u13;
use bitbybit::{bitenum, bitfield};
use embedded_hal::spi::{self, Operation, SpiDevice};

/// Registers with a fixed meaning used by the driver itself.
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(u16)]
pub enum Addr {
    Serial = 0x000,
    PartId = 0x003,
    PllReadback = 0x01f,
    Sync = 0x230,
    Update = 0x232,
}

/// Part ID of the AD9516-4.
pub const PART_ID: u8 = 0xc3;

#[bitenum(u2, exhaustive = true)]
#[derive(PartialEq, Debug, Default)]
pub enum Size {
    #[default]
    One = 0,
    Two = 1,
    Three = 2,
    Stream = 3,
}

#[bitfield(u16)]
#[derive(Debug, PartialEq)]
pub struct Instruction {
    #[bits(0..=12, rw)]
    addr: u13,
    #[bits(13..=14, rw)]
    size: Size,
    #[bit(15, rw)]
    read: bool,
}

#[bitfield(u8, default = 0x18)]
#[derive(Debug, PartialEq)]
pub struct Serial {
    #[bit(0, rw)]
    sdo_active: bool,
    #[bit(1, rw)]
    lsb_first: bool,
    #[bit(2, rw)]
    soft_reset: bool,
    #[bit(3, rw)]
    long_insn: bool,
}

impl Serial {
    pub fn mirror(self) -> Self {
        let v = self.raw_value();
        Self::new_with_raw_value(
            v & 0x0f
                | ((v & 1) << 7)
                | ((v & 2) << 5)
                | ((v & 4) << 3)
                | ((v & 8) << 1),
        )
    }
}

#[bitfield(u8)]
#[derive(Debug, PartialEq)]
pub struct PllReadback {
    #[bit(0, r)]
    pub locked: bool,
    #[bit(1, r)]
    pub ref1_present: bool,
    #[bit(2, r)]
    pub ref2_present: bool,
    #[bit(3, r)]
    pub vco_present: bool,
    #[bit(4, r)]
    pub ref2_selected: bool,
    #[bit(5, r)]
    pub holdover: bool,
    #[bit(6, r)]
    pub vco_cal_done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Invalid Part ID {0:#04x}")]
    Id(u8),
    #[error("SPI")]
    Bus(spi::ErrorKind),
}

impl<E: spi::Error> From<E> for Error {
    fn from(value: E) -> Self {
        Self::Bus(value.kind())
    }
}

fn instruction(addr: u16, read: bool) -> [u8; 2] {
    Instruction::builder()
        .with_addr(u13::new(addr & 0x1fff))
        .with_size(Size::One)
        .with_read(read)
        .build()
        .raw_value()
        .to_be_bytes()
}

/// AD9516 clock distribution PLL.
///
/// Every access is a single 24 bit frame: a 16 bit instruction followed by one
/// data byte.
#[derive(Clone, Debug)]
pub struct Ad9516<B> {
    bus: B,
}

impl<B: SpiDevice<u8>> Ad9516<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn write(&mut self, addr: u16, value: u8) -> Result<(), Error> {
        Ok(self.bus.transaction(&mut [
            Operation::Write(&instruction(addr, false)),
            Operation::Write(&[value]),
        ])?)
    }

    pub fn read(&mut self, addr: u16) -> Result<u8, Error> {
        let mut value = [0];
        self.bus.transaction(&mut [
            Operation::Write(&instruction(addr, true)),
            Operation::Read(&mut value),
        ])?;
        Ok(value[0])
    }

    /// Configure the serial port and check the part ID.
    pub fn init(&mut self) -> Result<(), Error> {
        self.write(
            Addr::Serial as _,
            Serial::builder()
                .with_sdo_active(true)
                .with_lsb_first(false)
                .with_soft_reset(false)
                .with_long_insn(true)
                .build()
                .mirror()
                .raw_value(),
        )?;
        self.update()?;
        let id = self.read(Addr::PartId as _)?;
        if id != PART_ID {
            return Err(Error::Id(id));
        }
        Ok(())
    }

    /// Transfer the buffered registers into the active register set.
    pub fn update(&mut self) -> Result<(), Error> {
        self.write(Addr::Update as _, 0x01)
    }

    /// Write an ordered register table and latch it.
    pub fn load(&mut self, table: &[(u16, u8)]) -> Result<(), Error> {
        for &(addr, value) in table.iter() {
            self.write(addr, value)?;
        }
        self.update()
    }

    pub fn readback(&mut self) -> Result<PllReadback, Error> {
        Ok(PllReadback::new_with_raw_value(
            self.read(Addr::PllReadback as _)?,
        ))
    }

    /// Align the phases of all clock outputs.
    ///
    /// Needed after every lock: the dividers otherwise start at arbitrary
    /// relative phase.
    pub fn sync_outputs(&mut self) -> Result<(), Error> {
        self.write(Addr::Sync as _, 0x01)?;
        self.update()?;
        self.write(Addr::Sync as _, 0x00)?;
        self.update()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn serial_config() {
        let serial = Serial::builder()
            .with_sdo_active(true)
            .with_lsb_first(false)
            .with_soft_reset(false)
            .with_long_insn(true)
            .build()
            .mirror();
        assert_eq!(serial.raw_value(), 0x99);
    }

    #[test]
    fn instruction_word() {
        assert_eq!(instruction(0x232, false), [0x02, 0x32]);
        assert_eq!(instruction(0x003, true), [0x80, 0x03]);
    }
}
