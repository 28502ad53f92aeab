//! Card bring-up and the operational surface.

use arbitrary_int::u5;
use embedded_hal::delay::DelayNs;
use fugit::MicrosDurationU32;
use serde::{Deserialize, Serialize};
use tdc_gpx::Mode;

use crate::calibration::{Calibration, CalibrationData, CalibrationStore, Measurement, TemperatureSensor};
use crate::hardware::design_parameters::NO_FINE_THRESHOLD_PS;
use crate::hardware::regs::{
    ChannelReg, Core, Dcr, Gcr, Rcr, Tcr, Tdcsr, TsbrFid, Tsbcr, CORE_MAGIC,
};
use crate::hardware::sgpio::SgpioPin;
use crate::hardware::{Channel, Hardware, RegisterBus, Reset};
use crate::settings::Settings;
use crate::timestamp::{TaggedTimestamp, Timestamp};
use crate::{Error, Lock};

/// DDR lock poll interval.
const DDR_POLL: MicrosDurationU32 = MicrosDurationU32::micros(10);

/// Bring-up progress.
#[derive(Clone, Debug, PartialEq)]
pub enum State {
    Reset,
    ClockInit,
    BusTest,
    Calibrating,
    ModeSwitch,
    Ready,
    Failed(Error),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Repeat {
    Count(u16),
    Continuous,
}

/// Pulse train of one output.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub enable: bool,
    /// Delay of the first rising edge after the trigger, in ps.
    pub delay: i64,
    /// Pulse width in ps.
    pub width: i64,
    /// Pulse spacing in ps.
    pub period: i64,
    pub repeat: Repeat,
}

/// A Fine Delay card.
pub struct FineDelay<B, D, S> {
    hw: Hardware<B, D>,
    sensor: S,
    settings: Settings,
    calibration: Calibration,
    state: State,
}

impl<B, D, S> FineDelay<B, D, S>
where
    B: RegisterBus,
    D: DelayNs,
    S: TemperatureSensor,
{
    pub fn new(bus: B, delay: D, sensor: S, settings: Settings) -> Self {
        Self {
            hw: Hardware::new(bus, delay),
            sensor,
            settings,
            calibration: Calibration::default(),
            state: State::Reset,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Low level access for diagnostics.
    pub fn hardware(&mut self) -> &mut Hardware<B, D> {
        &mut self.hw
    }

    pub fn release(self) -> (B, D, S) {
        (self.hw.bus, self.hw.delay, self.sensor)
    }

    fn enter(&mut self, state: State) {
        log::debug!("{:?} -> {state:?}", self.state);
        self.state = state;
    }

    fn ready(&self) -> Result<(), Error> {
        match self.state {
            State::Ready => Ok(()),
            _ => Err(Error::NotReady),
        }
    }

    /// Reset, clock, test and calibrate the card.
    ///
    /// A calibration block missing from `store` is replaced by the defaults.
    /// Any other failure leaves the device in [`State::Failed`].
    pub fn init<C: CalibrationStore>(&mut self, store: &mut C) -> Result<(), Error> {
        self.enter(State::Reset);
        self.bring_up(store).inspect_err(|e| {
            log::error!("Bring-up failed in {:?}: {e}", self.state);
            self.enter(State::Failed(e.clone()));
        })
    }

    fn bring_up<C: CalibrationStore>(&mut self, store: &mut C) -> Result<(), Error> {
        let id = self.hw.read(Core::Idr);
        if id != CORE_MAGIC {
            log::error!("Invalid core signature {id:#010x}");
            return Err(Error::ChipNotPresent);
        }

        let data = store.read_calibration_block().unwrap_or_else(|e| {
            log::warn!("{}: {e}, using defaults", Error::from(e));
            CalibrationData::default()
        });
        self.calibration = Calibration::new(data);
        self.hw.reset(Reset::Fmc);

        self.enter(State::ClockInit);
        self.hw.sgpio_init()?;
        self.hw.pll_init(self.settings.pll_lock_timeout())?;
        self.sensor.init()?;
        match self.sensor.read_temperature() {
            Ok(t) => log::info!("Card temperature {}.{} C", t / 10, (t % 10).abs()),
            Err(e) => log::warn!("Card temperature unknown: {e}"),
        }
        self.hw.sgpio_defaults()?;

        // the core needs the PLL clocks before it leaves reset for good
        self.hw.reset(Reset::Core);
        self.hw
            .poll(Lock::Ddr, self.settings.ddr_lock_timeout(), DDR_POLL, |hw| {
                Ok(Gcr::new_with_raw_value(hw.read(Core::Gcr)).ddr_locked())
            })?;
        self.hw.reset(Reset::Core);
        self.hw
            .write(Core::Gcr, Gcr::default().with_bypass(true).raw_value());

        self.enter(State::BusTest);
        self.hw.tdc_test_bus()?;

        self.enter(State::Calibrating);
        self.calibration
            .calibrate_outputs(&mut self.hw, &mut self.sensor, &self.settings)?;

        self.enter(State::ModeSwitch);
        let start_offset = self.calibration.data.tdc_start_offset;
        self.hw
            .tdc_configure(Mode::Normal, &self.settings.tdc(start_offset))?;
        self.hw.write(Core::Gcr, Gcr::default().raw_value());
        self.hw.write(
            Core::Tsbcr,
            Tsbcr::default().with_purge(true).with_rst_seq(true).raw_value(),
        );
        self.hw.write(Core::Adsfr, self.calibration.data.adsfr);
        self.hw.write(Core::Asor, 3 * start_offset);
        self.hw.write(Core::Atmcr, self.calibration.data.atmcr);
        self.write_time(&Timestamp::ZERO);
        self.hw.delay().delay_us(1);
        self.hw
            .write(Core::Gcr, Gcr::default().with_input_en(true).raw_value());

        self.enter(State::Ready);
        log::info!("Fine Delay ready");
        Ok(())
    }

    /// Enable the trigger input and select its termination.
    pub fn configure_trigger(&mut self, enable: bool, termination: bool) -> Result<(), Error> {
        self.ready()?;
        log::debug!(
            "Trigger input {}, {}",
            if enable { "enabled" } else { "disabled" },
            if termination { "50 Ohm" } else { "high impedance" }
        );
        self.hw.set_sgpio(SgpioPin::TermEn, termination)?;
        let gcr = Gcr::new_with_raw_value(self.hw.read(Core::Gcr));
        self.hw.write(
            Core::Gcr,
            Gcr::default()
                .with_bypass(gcr.bypass())
                .with_input_en(enable)
                .raw_value(),
        );
        Ok(())
    }

    /// Program the pulse train of an output relative to the trigger.
    ///
    /// Pulses narrower or closer than 200 ns are generated without the fine
    /// delay, the lines cannot be reloaded in time.
    pub fn configure_output(&mut self, channel: Channel, config: &OutputConfig) -> Result<(), Error> {
        self.ready()?;
        if config.width <= 0 {
            return Err(Error::Range("pulse width"));
        }
        let (width, period) = (config.width as i128, config.period as i128);
        let delay =
            config.delay as i128 - self.calibration.data.zero_offset[channel.index()] as i128;
        let start = Timestamp::from_picoseconds(delay)?;
        let end = Timestamp::from_picoseconds(delay + width)?;
        let delta = Timestamp::from_picoseconds(period)?;

        let tap = self.calibration.channel(channel).frr_current;
        self.hw.write_channel(channel, ChannelReg::Frr, tap);
        for (regs, t) in [
            (
                [ChannelReg::UStartH, ChannelReg::UStartL, ChannelReg::CStart, ChannelReg::FStart],
                start,
            ),
            (
                [ChannelReg::UEndH, ChannelReg::UEndL, ChannelReg::CEnd, ChannelReg::FEnd],
                end,
            ),
        ] {
            self.hw.write_channel(channel, regs[0], (t.utc >> 32) as u32);
            self.hw.write_channel(channel, regs[1], t.utc as u32);
            self.hw.write_channel(channel, regs[2], t.coarse);
            self.hw.write_channel(channel, regs[3], t.frac as u32);
        }
        self.hw
            .write_channel(channel, ChannelReg::UDelta, (delta.utc & 0xf) as u32);
        self.hw.write_channel(channel, ChannelReg::CDelta, delta.coarse);
        self.hw
            .write_channel(channel, ChannelReg::FDelta, delta.frac as u32);

        let rcr = match config.repeat {
            Repeat::Count(n) => Rcr::default().with_rep_cnt(n),
            Repeat::Continuous => Rcr::default().with_cont(true),
        };
        self.hw.write_channel(channel, ChannelReg::Rcr, rcr.raw_value());

        let threshold = NO_FINE_THRESHOLD_PS as i128;
        let no_fine = period - width < threshold || width < threshold;
        let dcr = Dcr::default().with_no_fine(no_fine);
        self.hw
            .write_channel(channel, ChannelReg::Dcr, dcr.with_update(true).raw_value());
        self.hw
            .write_channel(channel, ChannelReg::Dcr, dcr.with_enable(true).raw_value());

        self.hw.set_sgpio(SgpioPin::OutputEn(channel), config.enable)
    }

    /// Clear the input timestamp buffer and enable or disable it.
    pub fn configure_readout(&mut self, enable: bool) -> Result<(), Error> {
        self.ready()?;
        self.hw.write(
            Core::Tsbcr,
            Tsbcr::default().with_purge(true).with_rst_seq(true).raw_value(),
        );
        if enable {
            self.hw.write(
                Core::Tsbcr,
                Tsbcr::default()
                    .with_chan_mask(u5::new(1))
                    .with_enable(true)
                    .raw_value(),
            );
        }
        Ok(())
    }

    /// Drain up to `max` input timestamps, corrected for the TDC zero offset.
    ///
    /// Entries that do not form a valid time after the correction are logged
    /// and skipped.
    pub fn read_timestamps(&mut self, max: usize) -> Result<Vec<TaggedTimestamp>, Error> {
        self.ready()?;
        let offset = Timestamp::from_picoseconds(self.calibration.data.tdc_zero_offset as i128)?;
        let mut timestamps = Vec::new();
        while timestamps.len() < max
            && !Tsbcr::new_with_raw_value(self.hw.read(Core::Tsbcr)).empty()
        {
            let sech = self.hw.read(Core::TsbrSecH) & 0xff;
            let secl = self.hw.read(Core::TsbrSecL);
            let cycles = self.hw.read(Core::TsbrCycles) & 0x0fff_ffff;
            let fid = TsbrFid::new_with_raw_value(self.hw.read(Core::TsbrFid));
            let time = Timestamp::new(
                ((sech as u64) << 32) | secl as u64,
                cycles,
                fid.fine().value(),
            )
            .and_then(|raw| raw.subtract(&offset));
            match time {
                Ok(time) => timestamps.push(TaggedTimestamp {
                    time,
                    seq_id: fid.seq_id(),
                    channel: fid.channel().value(),
                }),
                Err(e) => log::warn!(
                    "Dropping timestamp {sech}:{secl}:{cycles} seq {}: {e}",
                    fid.seq_id()
                ),
            }
        }
        Ok(timestamps)
    }

    /// Load the card time. The fraction of `t` is ignored.
    pub fn set_time(&mut self, t: &Timestamp) -> Result<(), Error> {
        self.ready()?;
        self.write_time(t);
        Ok(())
    }

    fn write_time(&mut self, t: &Timestamp) {
        let gcr = Gcr::new_with_raw_value(self.hw.read(Core::Gcr));
        self.hw.write(Core::Gcr, Gcr::default().raw_value());
        self.hw.write(Core::TmSecH, (t.utc >> 32) as u32);
        self.hw.write(Core::TmSecL, t.utc as u32);
        self.hw.write(Core::TmCycles, t.coarse);
        let tcr = Tcr::new_with_raw_value(self.hw.read(Core::Tcr));
        self.hw.write(Core::Tcr, tcr.with_set_time(true).raw_value());
        self.hw.write(
            Core::Gcr,
            Gcr::default()
                .with_bypass(gcr.bypass())
                .with_input_en(gcr.input_en())
                .raw_value(),
        );
    }

    /// Reprogram the delay lines for the current card temperature.
    pub fn update_calibration(&mut self) -> Result<(), Error> {
        self.ready()?;
        self.calibration
            .refresh_temperature_compensation(&mut self.hw, &mut self.sensor)
    }

    /// Measure the delay of every tap of a channel over tap 0.
    ///
    /// Timestamping is suspended for the duration.
    pub fn transfer_function(&mut self, channel: Channel) -> Result<Vec<Measurement>, Error> {
        self.ready()?;
        let gcr = Gcr::new_with_raw_value(self.hw.read(Core::Gcr));
        let config = self.settings.tdc(self.calibration.data.tdc_start_offset);
        self.hw
            .write(Core::Gcr, Gcr::default().with_bypass(true).raw_value());
        let taps = self
            .hw
            .tdc_configure(Mode::Calibration, &config)
            .and_then(|()| {
                self.hw.write(
                    Core::Tdcsr,
                    Tdcsr::default().with_start_en(true).with_stop_en(true).raw_value(),
                );
                self.hw.delay_line_transfer(channel, self.settings.averages)
            });

        let tap = self.calibration.channel(channel).frr_current;
        self.hw.write_channel(channel, ChannelReg::Frr, tap);
        let normal = self.hw.tdc_configure(Mode::Normal, &config);
        self.hw.write(
            Core::Gcr,
            Gcr::default()
                .with_bypass(gcr.bypass())
                .with_input_en(gcr.input_en())
                .raw_value(),
        );
        // timestamps are meaningless unless the TDC is back in R-mode
        if let Err(e) = normal {
            log::error!("TDC not restored after transfer function: {e}");
            self.enter(State::Failed(e.clone()));
            return Err(e);
        }
        taps
    }
}
