//! Module for all hardware access of the Fine Delay card
//!
//! [`Hardware`] owns the register transport, the delay provider and the TDC
//! address cache. The SPI chips are reached through short lived views
//! borrowing it.
use ad9516::Ad9516;
use embedded_hal::delay::DelayNs;
use fugit::{MicrosDurationU32, MillisDurationU32};
use mcp23s17::Mcp23s17;
use serde::{Deserialize, Serialize};

pub mod delay;
pub mod design_parameters;
pub mod pll;
pub mod regs;
pub mod sgpio;
pub mod spi;
pub mod tdc;

use crate::{Error, Lock};
use design_parameters::GPIO_ADDRESS;
use regs::{ChannelReg, Core, Rstr, RSTR_KEY};
use spi::{SpiMux, Target};

/// Memory mapped access to the card registers.
///
/// Offsets are in bytes relative to the core base.
pub trait RegisterBus {
    fn read32(&mut self, offset: u32) -> u32;
    fn write32(&mut self, offset: u32, value: u32);
}

impl<T: RegisterBus + ?Sized> RegisterBus for &mut T {
    fn read32(&mut self, offset: u32) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&mut self, offset: u32, value: u32) {
        (**self).write32(offset, value)
    }
}

/// A delay output channel.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::EnumIter,
)]
#[repr(u8)]
pub enum Channel {
    One = 1,
    Two = 2,
    Three = 3,
    Four = 4,
}

impl Channel {
    /// Zero based index for per-channel arrays.
    pub fn index(self) -> usize {
        self as usize - 1
    }

    fn offset(self, reg: ChannelReg) -> u32 {
        self as u32 * 0x100 + reg as u32
    }

    /// TDC stop input the channel output is looped back to.
    pub fn tdc_stop(self) -> u8 {
        match self {
            Self::One => 4,
            Self::Two => 3,
            Self::Three => 2,
            Self::Four => 1,
        }
    }

    /// TDC FIFO register collecting the channel hits.
    pub fn tdc_fifo(self) -> tdc_gpx::Addr {
        tdc_gpx::Addr::Fifo0
    }
}

impl TryFrom<u8> for Channel {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::One,
            2 => Self::Two,
            3 => Self::Three,
            4 => Self::Four,
            _ => return Err(Error::Range("channel")),
        })
    }
}

/// Reset targets of [`Hardware::reset`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reset {
    /// The FMC mezzanine, including the PLL and the TDC.
    Fmc,
    /// The delay core in the FPGA.
    Core,
}

pub struct Hardware<B, D> {
    pub(crate) bus: B,
    pub(crate) delay: D,
    pub(crate) tdc: tdc::State,
}

impl<B: RegisterBus, D: DelayNs> Hardware<B, D> {
    pub fn new(bus: B, delay: D) -> Self {
        Self {
            bus,
            delay,
            tdc: tdc::State::default(),
        }
    }

    pub fn read(&mut self, reg: Core) -> u32 {
        self.bus.read32(reg as _)
    }

    pub fn write(&mut self, reg: Core, value: u32) {
        self.bus.write32(reg as _, value)
    }

    pub fn read_channel(&mut self, channel: Channel, reg: ChannelReg) -> u32 {
        self.bus.read32(channel.offset(reg))
    }

    pub fn write_channel(&mut self, channel: Channel, reg: ChannelReg, value: u32) {
        self.bus.write32(channel.offset(reg), value)
    }

    pub fn delay(&mut self) -> &mut D {
        &mut self.delay
    }

    pub fn tdc_state(&self) -> &tdc::State {
        &self.tdc
    }

    pub fn spi(&mut self, target: Target) -> SpiMux<'_, B, D> {
        SpiMux::new(&mut self.bus, &mut self.delay, target)
    }

    pub fn gpio(&mut self) -> Mcp23s17<SpiMux<'_, B, D>> {
        Mcp23s17::new(self.spi(Target::Gpio), GPIO_ADDRESS)
    }

    pub fn pll(&mut self) -> Ad9516<SpiMux<'_, B, D>> {
        Ad9516::new(self.spi(Target::Pll))
    }

    /// Pulse a reset line.
    ///
    /// A FMC reset loses all mezzanine chip state, including the TDC address
    /// bus.
    pub fn reset(&mut self, target: Reset) {
        let rstr = Rstr::default().with_lock(RSTR_KEY);
        let released = rstr.with_fmc_released(true).with_core_released(true);
        match target {
            Reset::Fmc => {
                self.write(Core::Rstr, rstr.with_core_released(true).raw_value());
                self.delay.delay_ms(10);
                self.write(Core::Rstr, released.raw_value());
                self.delay.delay_ms(600);
                self.tdc = tdc::State::default();
            }
            Reset::Core => {
                self.write(Core::Rstr, rstr.with_fmc_released(true).raw_value());
                self.delay.delay_ms(1);
                self.write(Core::Rstr, released.raw_value());
                self.delay.delay_ms(1);
            }
        }
    }

    /// Evaluate `done` every `interval` until it holds or `timeout` worth of
    /// intervals has been waited.
    pub fn poll<F>(
        &mut self,
        lock: Lock,
        timeout: MillisDurationU32,
        interval: MicrosDurationU32,
        mut done: F,
    ) -> Result<(), Error>
    where
        F: FnMut(&mut Self) -> Result<bool, Error>,
    {
        let budget = timeout.ticks() as u64 * 1000;
        let mut waited = 0;
        loop {
            if done(self)? {
                return Ok(());
            }
            if waited >= budget {
                log::warn!("{lock:?} lock timeout after {} ms", timeout.ticks());
                return Err(Error::LockTimeout(lock));
            }
            self.delay.delay_us(interval.ticks());
            waited += interval.ticks().max(1) as u64;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{FakeDelay, SimCard};
    use strum::IntoEnumIterator;

    #[test]
    fn channel_offsets() {
        assert_eq!(Channel::One.offset(ChannelReg::Dcr), 0x100);
        assert_eq!(Channel::Four.offset(ChannelReg::Rcr), 0x434);
        assert_eq!(Channel::try_from(0u8), Err(Error::Range("channel")));
        assert_eq!(Channel::try_from(3u8), Ok(Channel::Three));
        let stops: Vec<u8> = Channel::iter().map(Channel::tdc_stop).collect();
        assert_eq!(stops, [4, 3, 2, 1]);
    }

    #[test]
    fn poll_budget() {
        let mut hw = Hardware::new(SimCard::default(), FakeDelay::default());
        let mut calls = 0;
        let res = hw.poll(
            Lock::Ddr,
            MillisDurationU32::millis(1),
            MicrosDurationU32::micros(100),
            |_| {
                calls += 1;
                Ok(false)
            },
        );
        assert_eq!(res, Err(Error::LockTimeout(Lock::Ddr)));
        assert_eq!(calls, 11);
        assert_eq!(hw.delay.elapsed_ns, 1_000_000);
    }

    #[test]
    fn poll_done() {
        let mut hw = Hardware::new(SimCard::default(), FakeDelay::default());
        let mut calls = 0;
        hw.poll(
            Lock::Ddr,
            MillisDurationU32::millis(1),
            MicrosDurationU32::micros(100),
            |_| {
                calls += 1;
                Ok(calls == 3)
            },
        )
        .unwrap();
        assert_eq!(hw.delay.elapsed_ns, 200_000);
    }

    #[test]
    fn fmc_reset() {
        let mut hw = Hardware::new(SimCard::default(), FakeDelay::default());
        hw.tdc_set_address(5).unwrap();
        hw.reset(Reset::Fmc);
        assert_eq!(hw.bus.rstr_writes, [0xdead_0002, 0xdead_0003]);
        assert_eq!(hw.delay.elapsed_ns - 100_000 * 2, 610_000_000);
        assert_eq!(hw.tdc.addr, None);
    }
}
