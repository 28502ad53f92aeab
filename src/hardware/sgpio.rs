//! Card control pins on the MCP23S17 port A.
//!
//! Port B of the expander drives the TDC address bus, see [`super::tdc`].

use embedded_hal::delay::DelayNs;
use mcp23s17::{Direction, Pin};
use strum::IntoEnumIterator;

use super::{Channel, Hardware, RegisterBus};
use crate::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SgpioPin {
    /// 50 Ohm trigger input termination.
    TermEn,
    /// Output driver enable, active low.
    DrvOen,
    /// Trigger source select.
    TrigSel,
    /// Output buffer enable of a delay channel.
    OutputEn(Channel),
}

impl From<SgpioPin> for Pin {
    fn from(pin: SgpioPin) -> Self {
        match pin {
            SgpioPin::TermEn => Pin::A0,
            SgpioPin::DrvOen => Pin::A1,
            SgpioPin::TrigSel => Pin::A2,
            SgpioPin::OutputEn(Channel::One) => Pin::A7,
            SgpioPin::OutputEn(Channel::Two) => Pin::A6,
            SgpioPin::OutputEn(Channel::Three) => Pin::A5,
            SgpioPin::OutputEn(Channel::Four) => Pin::A4,
        }
    }
}

impl<B: RegisterBus, D: DelayNs> Hardware<B, D> {
    pub fn sgpio_init(&mut self) -> Result<(), Error> {
        Ok(self.gpio().init()?)
    }

    pub fn set_sgpio(&mut self, pin: SgpioPin, high: bool) -> Result<(), Error> {
        Ok(self.gpio().set_level(pin.into(), high)?)
    }

    pub fn set_sgpio_output(&mut self, pin: SgpioPin) -> Result<(), Error> {
        Ok(self.gpio().set_direction(pin.into(), Direction::Output)?)
    }

    /// Trigger select high, all output buffers and the termination off.
    pub fn sgpio_defaults(&mut self) -> Result<(), Error> {
        self.set_sgpio_output(SgpioPin::TrigSel)?;
        self.set_sgpio(SgpioPin::TrigSel, true)?;
        for ch in Channel::iter() {
            self.set_sgpio(SgpioPin::OutputEn(ch), false)?;
            self.set_sgpio_output(SgpioPin::OutputEn(ch))?;
        }
        self.set_sgpio_output(SgpioPin::TermEn)?;
        self.set_sgpio(SgpioPin::TermEn, false)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{FakeDelay, SimCard};

    #[test]
    fn output_enables() {
        let pins: Vec<Pin> = Channel::iter()
            .map(|ch| SgpioPin::OutputEn(ch).into())
            .collect();
        assert_eq!(pins, [Pin::A7, Pin::A6, Pin::A5, Pin::A4]);
    }

    #[test]
    fn defaults() {
        let mut hw = Hardware::new(SimCard::default(), FakeDelay::default());
        hw.sgpio_init().unwrap();
        hw.sgpio_defaults().unwrap();
        let gpio = &hw.bus.gpio;
        // TERM_EN, TRIG_SEL and the output enables are outputs
        assert_eq!(gpio.iodir[0], !0b1111_0101);
        assert_eq!(gpio.olat[0], 0b0000_0100);
    }
}
