//! TDC-GPX register protocol.
//!
//! The TDC data bus is reached through the core (TDR/TDCSR) while its address
//! bus hangs off port B of the GPIO expander. The last driven address is
//! cached so repeated accesses to one register cost no SPI traffic.

use embedded_hal::delay::DelayNs;
use fugit::{MicrosDurationU32, MillisDurationU32};
use mcp23s17::Port;
use tdc_gpx::{Addr, Divider, Mode, Status, BIN_PRESCALE, DATA_MASK};

use super::regs::{Core, Tdcsr};
use super::{Hardware, RegisterBus};
use crate::{Error, Lock};

/// Lock status poll interval.
const LOCK_POLL: MicrosDurationU32 = MicrosDurationU32::micros(10_000);

/// Parameters of a TDC configuration.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TdcConfig {
    /// Target PLL bin width in ps.
    pub target_bin_ps: f64,
    /// TDC reference clock in Hz.
    pub reference_hz: f64,
    /// R-mode start offset in bins.
    pub start_offset: u32,
    pub lock_timeout: MillisDurationU32,
}

/// TDC runtime state owned by the hardware context.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct State {
    pub(crate) addr: Option<u8>,
    pub(crate) mode: Option<Mode>,
    pub(crate) divider: Option<Divider>,
    pub(crate) bin: f64,
}

impl State {
    /// Mode of the last successful configuration.
    pub fn mode(&self) -> Option<Mode> {
        self.mode
    }

    pub fn divider(&self) -> Option<Divider> {
        self.divider
    }

    /// Bin width in ps of one FIFO tag unit before the internal prescaler.
    pub fn bin(&self) -> f64 {
        self.bin
    }
}

impl<B: RegisterBus, D: DelayNs> Hardware<B, D> {
    /// Drive `reg` onto the TDC address bus unless it is already there.
    pub fn tdc_set_address(&mut self, reg: u8) -> Result<(), Error> {
        if self.tdc.addr != Some(reg) {
            let mut gpio = self.gpio();
            gpio.write_direction(Port::B, 0)?;
            gpio.write_latch(Port::B, reg & 0xf)?;
            self.tdc.addr = Some(reg);
        }
        Ok(())
    }

    pub fn tdc_read(&mut self, reg: Addr) -> Result<u32, Error> {
        self.tdc_set_address(reg as _)?;
        self.write(Core::Tdcsr, Tdcsr::default().with_read(true).raw_value());
        Ok(self.read(Core::Tdr) & DATA_MASK)
    }

    pub fn tdc_write(&mut self, reg: Addr, value: u32) -> Result<(), Error> {
        self.tdc_set_address(reg as _)?;
        self.write(Core::Tdr, value & DATA_MASK);
        self.write(Core::Tdcsr, Tdcsr::default().with_write(true).raw_value());
        Ok(())
    }

    /// Configure the TDC for `mode` and wait for its PLL to lock.
    ///
    /// Register 8 stays addressed afterwards for FIFO readout.
    pub fn tdc_configure(&mut self, mode: Mode, config: &TdcConfig) -> Result<(), Error> {
        let (divider, bin) =
            tdc_gpx::search_divider(config.target_bin_ps, config.reference_hz);
        log::debug!(
            "TDC divider hs_div {} ref_clk_div {}: bin {bin:.4} ps",
            divider.hs_div,
            divider.ref_clk_div.value()
        );
        self.tdc.mode = None;
        self.tdc.divider = Some(divider);
        self.tdc.bin = bin / BIN_PRESCALE;

        self.write(
            Core::Tdcsr,
            Tdcsr::default()
                .with_stop_dis(true)
                .with_start_dis(true)
                .raw_value(),
        );
        let normal;
        let calibration;
        let table: &[(Addr, u32)] = match mode {
            Mode::Normal => {
                normal = tdc_gpx::normal_configuration(divider, config.start_offset);
                &normal
            }
            Mode::Calibration => {
                calibration = tdc_gpx::calibration_configuration(divider);
                &calibration
            }
        };
        for &(reg, value) in table {
            self.tdc_write(reg, value)?;
        }
        let (reg, value) = tdc_gpx::master_reset();
        self.tdc_write(reg, value)?;

        self.poll(Lock::Tdc, config.lock_timeout, LOCK_POLL, |hw| {
            Ok(Status::new_with_raw_value(hw.tdc_read(Addr::Status)?).locked())
        })?;
        log::debug!("TDC locked in {mode:?} mode");

        self.tdc_set_address(Addr::Fifo0 as _)?;
        self.tdc.mode = Some(mode);
        Ok(())
    }

    /// Walk a one across the 28 data lines.
    ///
    /// Reading register 0 in between forces the address bus to toggle.
    pub fn tdc_test_bus(&mut self) -> Result<(), Error> {
        for bit in 0..28 {
            let pattern = 1 << bit;
            self.tdc_write(Addr::Config5, pattern)?;
            self.tdc_read(Addr::Config0)?;
            let value = self.tdc_read(Addr::Config5)?;
            if value != pattern {
                log::error!(
                    "TDC data bus fault on bit {bit}: wrote {pattern:#09x}, read {value:#09x}"
                );
                return Err(Error::BusFault { bit });
            }
        }
        log::info!("TDC data bus OK");
        Ok(())
    }
}
