#![no_std]

use arbitrary_int::u3;
use bitbybit::bitfield;
use embedded_hal::spi::{self, Operation, SpiDevice};

/// Register addresses in the default `IOCON.BANK = 0` map.
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum Register {
    IoDirA = 0x00,
    IoDirB = 0x01,
    IPolA = 0x02,
    IPolB = 0x03,
    GpIntEnA = 0x04,
    GpIntEnB = 0x05,
    DefValA = 0x06,
    DefValB = 0x07,
    IntConA = 0x08,
    IntConB = 0x09,
    IoCon = 0x0a,
    GpPuA = 0x0c,
    GpPuB = 0x0d,
    IntFA = 0x0e,
    IntFB = 0x0f,
    IntCapA = 0x10,
    IntCapB = 0x11,
    GpioA = 0x12,
    GpioB = 0x13,
    OLatA = 0x14,
    OLatB = 0x15,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Port {
    A,
    B,
}

impl Register {
    pub fn iodir(port: Port) -> Self {
        match port {
            Port::A => Self::IoDirA,
            Port::B => Self::IoDirB,
        }
    }

    pub fn olat(port: Port) -> Self {
        match port {
            Port::A => Self::OLatA,
            Port::B => Self::OLatB,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Pin {
    A0,
    A1,
    A2,
    A3,
    A4,
    A5,
    A6,
    A7,
    B0,
    B1,
    B2,
    B3,
    B4,
    B5,
    B6,
    B7,
}

impl Pin {
    pub fn port(self) -> Port {
        if (self as u8) < 8 {
            Port::A
        } else {
            Port::B
        }
    }

    pub fn mask(self) -> u8 {
        1 << (self as u8 & 7)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Output,
    Input,
}

#[bitfield(u8, default = 0x40)]
#[derive(Debug, PartialEq)]
pub struct Opcode {
    #[bit(0, rw)]
    read: bool,
    #[bits(1..=3, rw)]
    address: u3,
}

#[bitfield(u8, default = 0x00)]
#[derive(Debug, PartialEq)]
pub struct IoCon {
    #[bit(1, rw)]
    intpol: bool,
    #[bit(2, rw)]
    odr: bool,
    #[bit(3, rw)]
    haen: bool,
    #[bit(4, rw)]
    disslw: bool,
    #[bit(5, rw)]
    seqop: bool,
    #[bit(6, rw)]
    mirror: bool,
    #[bit(7, rw)]
    bank: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("SPI")]
    Bus(spi::ErrorKind),
}

impl<E: spi::Error> From<E> for Error {
    fn from(value: E) -> Self {
        Self::Bus(value.kind())
    }
}

/// MCP23S17 16 bit I/O expander.
///
/// Pin operations are read-modify-write cycles on the port registers. There is
/// no shadow state: every call goes to the device.
#[derive(Clone, Debug)]
pub struct Mcp23s17<B> {
    bus: B,
    address: u3,
}

impl<B: SpiDevice<u8>> Mcp23s17<B> {
    pub fn new(bus: B, address: u3) -> Self {
        Self { bus, address }
    }

    fn opcode(&self, read: bool) -> u8 {
        Opcode::default()
            .with_address(self.address)
            .with_read(read)
            .raw_value()
    }

    pub fn write_register(
        &mut self,
        reg: Register,
        value: u8,
    ) -> Result<(), Error> {
        Ok(self.bus.write(&[self.opcode(false), reg as u8, value])?)
    }

    pub fn read_register(&mut self, reg: Register) -> Result<u8, Error> {
        let mut value = [0];
        self.bus.transaction(&mut [
            Operation::Write(&[self.opcode(true), reg as u8]),
            Operation::Read(&mut value),
        ])?;
        Ok(value[0])
    }

    /// Put the register map into sequential, bank 0 mode.
    pub fn init(&mut self) -> Result<(), Error> {
        self.write_register(Register::IoCon, IoCon::default().raw_value())
    }

    pub fn set_direction(
        &mut self,
        pin: Pin,
        direction: Direction,
    ) -> Result<(), Error> {
        let reg = Register::iodir(pin.port());
        let mut v = self.read_register(reg)?;
        match direction {
            Direction::Output => v &= !pin.mask(),
            Direction::Input => v |= pin.mask(),
        }
        self.write_register(reg, v)
    }

    pub fn set_level(&mut self, pin: Pin, high: bool) -> Result<(), Error> {
        let reg = Register::olat(pin.port());
        let mut v = self.read_register(reg)?;
        v &= !pin.mask();
        if high {
            v |= pin.mask();
        }
        self.write_register(reg, v)
    }

    /// Set the direction of all eight pins of a port. Set bits are inputs.
    pub fn write_direction(&mut self, port: Port, iodir: u8) -> Result<(), Error> {
        self.write_register(Register::iodir(port), iodir)
    }

    pub fn write_latch(&mut self, port: Port, value: u8) -> Result<(), Error> {
        self.write_register(Register::olat(port), value)
    }
}
