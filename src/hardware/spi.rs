//! SPI controller shared by the AD9516 PLL and the MCP23S17 expander.
//!
//! The controller shifts out one frame of up to 24 bits per transaction and
//! selects exactly one of the two chips for it.

use arbitrary_int::{u24, Number};
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{self, ErrorType, Operation, SpiDevice};

use super::design_parameters::SPI_SETTLE;
use super::regs::{Core, Scr};
use super::RegisterBus;

/// Width of the controller data field.
const FRAME_BITS: u8 = 24;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Pll,
    Gpio,
}

/// One chip select of the SPI controller.
///
/// Holding the exclusive borrow of the register transport keeps a single
/// transaction in flight.
pub struct SpiMux<'a, B, D> {
    bus: &'a mut B,
    delay: &'a mut D,
    target: Target,
}

impl<'a, B: RegisterBus, D: DelayNs> SpiMux<'a, B, D> {
    pub fn new(bus: &'a mut B, delay: &'a mut D, target: Target) -> Self {
        Self { bus, delay, target }
    }

    /// Shift `bits` bits of `word` out to the target and return the bits
    /// shifted in.
    ///
    /// Frames narrower than the data field are MSB aligned. Blocks until the
    /// controller reports ready and then waits [`SPI_SETTLE`].
    pub fn transact(&mut self, bits: u8, word: u32) -> Result<u32, spi::ErrorKind> {
        if bits == 0 || bits > FRAME_BITS {
            return Err(spi::ErrorKind::Other);
        }
        let shift = FRAME_BITS - bits;
        let scr = Scr::default()
            .with_data(u24::new((word << shift) & u24::MAX.value()))
            .with_cpol(true)
            .with_sel_pll(self.target == Target::Pll)
            .with_sel_gpio(self.target == Target::Gpio);
        self.bus.write32(Core::Scr as _, scr.raw_value());
        self.bus
            .write32(Core::Scr as _, scr.with_start(true).raw_value());
        let scr = loop {
            let scr = Scr::new_with_raw_value(self.bus.read32(Core::Scr as _));
            if scr.ready() {
                break scr;
            }
        };
        self.delay.delay_us(SPI_SETTLE.ticks());
        Ok(scr.data().value() >> shift)
    }
}

impl<B, D> ErrorType for SpiMux<'_, B, D> {
    type Error = spi::ErrorKind;
}

impl<B: RegisterBus, D: DelayNs> SpiDevice<u8> for SpiMux<'_, B, D> {
    /// All operations are packed into a single frame. Delay operations run
    /// after the frame.
    fn transaction(
        &mut self,
        operations: &mut [Operation<'_, u8>],
    ) -> Result<(), Self::Error> {
        let mut frame = [0u8; FRAME_BITS as usize / 8];
        let mut len = 0;
        for op in operations.iter() {
            let (n, tx): (usize, &[u8]) = match op {
                Operation::Write(w) => (w.len(), &w[..]),
                Operation::Transfer(r, w) => (r.len().max(w.len()), &w[..]),
                Operation::TransferInPlace(b) => (b.len(), &b[..]),
                Operation::Read(r) => (r.len(), &[][..]),
                Operation::DelayNs(_) => (0, &[][..]),
            };
            if len + n > frame.len() {
                return Err(spi::ErrorKind::Other);
            }
            frame[len..len + tx.len()].copy_from_slice(tx);
            len += n;
        }
        if len > 0 {
            let bits = 8 * len as u8;
            let word = u32::from_be_bytes([0, frame[0], frame[1], frame[2]])
                >> (FRAME_BITS - bits);
            let rx = self.transact(bits, word)?;
            let rx = (rx << (FRAME_BITS - bits)).to_be_bytes();
            let rx = &rx[1..];
            let mut pos = 0;
            for op in operations.iter_mut() {
                match op {
                    Operation::Read(r) | Operation::TransferInPlace(r) => {
                        r.copy_from_slice(&rx[pos..pos + r.len()]);
                        pos += r.len();
                    }
                    Operation::Transfer(r, w) => {
                        r.copy_from_slice(&rx[pos..pos + r.len()]);
                        pos += r.len().max(w.len());
                    }
                    Operation::Write(w) => pos += w.len(),
                    Operation::DelayNs(_) => {}
                }
            }
        }
        for op in operations.iter() {
            if let Operation::DelayNs(ns) = op {
                self.delay.delay_ns(*ns);
            }
        }
        Ok(())
    }
}
