//! Delay line calibration and temperature compensation.
//!
//! Each output delay line is measured against the TDC start in I-mode to find
//! the tap count adding exactly one coarse cycle (8 ns) to the tap 0 delay.
//! The offset between that measurement and a temperature fit is kept per
//! channel and reapplied whenever the temperature is refreshed.

use arbitrary_int::u4;
use embedded_hal::delay::DelayNs;
use strum::IntoEnumIterator;
use tdc_gpx::{Addr, Mode, BIN_PRESCALE, TAG_MASK};

use crate::hardware::design_parameters::{
    CALIBRATION_STEP, CALIBRATION_TARGET_PS, N_TAPS,
};
use crate::hardware::regs::{Calr, ChannelReg, Core, Dcr, Gcr, Tdcsr, CORE_MAGIC};
use crate::hardware::sgpio::SgpioPin;
use crate::hardware::{Channel, Hardware, RegisterBus};
use crate::settings::Settings;
use crate::Error;

/// Size of the persisted calibration block.
pub const BLOCK_SIZE: usize = 64;

/// Calibration constants of one card.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CalibrationData {
    /// Tap count versus temperature (0.1 C), 32 fractional bits.
    pub frr_poly: [i64; 3],
    /// TDC to input zero offset in ps.
    pub tdc_zero_offset: i32,
    /// Timestamp merge control register value.
    pub atmcr: u32,
    /// Timestamp scale factor register value.
    pub adsfr: u32,
    /// R-mode start offset in TDC bins.
    pub tdc_start_offset: u32,
    /// Output zero offsets in ps.
    pub zero_offset: [i32; 4],
}

impl Default for CalibrationData {
    fn default() -> Self {
        Self {
            frr_poly: [-165202, -29825595, 3801939743082],
            tdc_zero_offset: 35600,
            atmcr: 2 | (1000 << 4),
            adsfr: 56648,
            tdc_start_offset: 10000,
            zero_offset: [50000; 4],
        }
    }
}

/// EEPROM image, little endian.
#[derive(Copy, Clone, Debug, Default, bytemuck::Zeroable, bytemuck::Pod)]
#[repr(C)]
struct Block {
    magic: u32,
    zero_offset: [i32; 4],
    tdc_zero_offset: i32,
    frr_poly: [i64; 3],
    atmcr: u32,
    adsfr: u32,
    tdc_start_offset: u32,
    _reserved: u32,
}

impl CalibrationData {
    /// Decode and validate a calibration block.
    pub fn from_block(bytes: &[u8]) -> Result<Self, StoreError> {
        if bytes.len() < BLOCK_SIZE {
            return Err(StoreError::Invalid);
        }
        let block: Block = bytemuck::pod_read_unaligned(&bytes[..BLOCK_SIZE]);
        if u32::from_le(block.magic) != CORE_MAGIC {
            return Err(StoreError::Invalid);
        }
        Ok(Self {
            frr_poly: block.frr_poly.map(i64::from_le),
            tdc_zero_offset: i32::from_le(block.tdc_zero_offset),
            atmcr: u32::from_le(block.atmcr),
            adsfr: u32::from_le(block.adsfr),
            tdc_start_offset: u32::from_le(block.tdc_start_offset),
            zero_offset: block.zero_offset.map(i32::from_le),
        })
    }

    /// Encode as a calibration block.
    pub fn to_block(&self) -> [u8; BLOCK_SIZE] {
        let block = Block {
            magic: CORE_MAGIC.to_le(),
            zero_offset: self.zero_offset.map(i32::to_le),
            tdc_zero_offset: self.tdc_zero_offset.to_le(),
            frr_poly: self.frr_poly.map(i64::to_le),
            atmcr: self.atmcr.to_le(),
            adsfr: self.adsfr.to_le(),
            tdc_start_offset: self.tdc_start_offset.to_le(),
            _reserved: 0,
        };
        bytemuck::cast(block)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("No calibration block found")]
    NotFound,
    #[error("Invalid calibration block")]
    Invalid,
}

/// Persistent storage of the calibration block, usually the FMC EEPROM.
pub trait CalibrationStore {
    fn read_calibration_block(&mut self) -> Result<CalibrationData, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum SensorFault {
    #[error("No sensor present")]
    NotPresent,
    #[error("Sensor read failed")]
    Read,
}

/// Board temperature sensor.
pub trait TemperatureSensor {
    fn init(&mut self) -> Result<(), SensorFault>;

    /// Temperature in units of 0.1 C.
    fn read_temperature(&mut self) -> Result<i32, SensorFault>;
}

/// Evaluate the quadratic fit `(c0 t^2 + c1 t + c2) >> 32`.
pub fn evaluate_fit_polynomial(c: &[i64; 3], t: i32) -> i64 {
    let t = t as i128;
    ((c[0] as i128 * t * t + c[1] as i128 * t + c[2] as i128) >> 32) as i64
}

/// Binary search for the last tap whose delay over tap 0 stays below 8 ns.
///
/// `delay_at` returns the absolute delay at a tap. The line is assumed
/// monotonic.
pub fn search_8ns_tap<F>(mut delay_at: F) -> Result<u32, Error>
where
    F: FnMut(u32) -> Result<f64, Error>,
{
    let bias = delay_at(0)?;
    let mut low = 0;
    let mut high = N_TAPS - 1;
    while high - low > 1 {
        let mid = (low + high) / 2;
        if delay_at(mid)? - bias < CALIBRATION_TARGET_PS {
            low = mid;
        } else {
            high = mid;
        }
    }
    Ok(low)
}

/// Mean and standard deviation of a delay measurement in ps.
#[derive(Copy, Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct Measurement {
    pub mean: f64,
    pub std: f64,
}

impl<B: RegisterBus, D: DelayNs> Hardware<B, D> {
    /// Average `n` calibration pulse round trips of a channel with the delay
    /// line at `tap`.
    ///
    /// The TDC must be in calibration mode with start and stop enabled.
    pub fn measure_channel_delay(
        &mut self,
        channel: Channel,
        tap: u32,
        n: u32,
    ) -> Result<Measurement, Error> {
        if n == 0 {
            return Err(Error::Range("averages"));
        }
        self.set_sgpio(SgpioPin::OutputEn(channel), false)?;
        self.tdc_write(Addr::Config0, tdc_gpx::calibration_stop(channel.tdc_stop()))?;

        let samples = self.with_forced_tap(channel, tap, |hw| {
            // pulse only the channel under test
            let calr = Calr::default().with_psel(u4::new(1 << channel.index()));
            hw.write(Core::Calr, calr.raw_value());
            hw.delay.delay_us(CALIBRATION_STEP.ticks());

            let scale = hw.tdc.bin * BIN_PRESCALE;
            let mut samples = Vec::with_capacity(n as usize);
            for _ in 0..n {
                hw.write(Core::Tdcsr, Tdcsr::default().with_alutrig(true).raw_value());
                hw.delay.delay_us(CALIBRATION_STEP.ticks());
                hw.write(Core::Calr, calr.with_cal_pulse(true).raw_value());
                hw.delay.delay_us(CALIBRATION_STEP.ticks());
                let tag = hw.tdc_read(channel.tdc_fifo())? & TAG_MASK;
                samples.push(tag as f64 * scale);
            }
            Ok(samples)
        })?;

        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n as f64;
        Ok(Measurement {
            mean,
            std: var.sqrt(),
        })
    }

    /// Run `f` with the delay line of `channel` forced to `tap`.
    ///
    /// The channel is disabled afterwards whether `f` succeeds or not.
    pub fn with_forced_tap<T, F>(&mut self, channel: Channel, tap: u32, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Self) -> Result<T, Error>,
    {
        self.write_channel(channel, ChannelReg::Frr, tap);
        let dcr = Dcr::default().with_enable(true);
        self.write_channel(
            channel,
            ChannelReg::Dcr,
            dcr.with_mode(true).with_update(true).raw_value(),
        );
        self.write_channel(channel, ChannelReg::Dcr, dcr.with_force_dly(true).raw_value());
        let result = f(self);
        self.write_channel(channel, ChannelReg::Dcr, 0);
        result
    }

    /// The tap of `channel` adding 8 ns to its tap 0 delay.
    pub fn find_8ns_tap(&mut self, channel: Channel, averages: u32) -> Result<u32, Error> {
        log::debug!("Searching 8 ns tap of channel {channel:?}");
        search_8ns_tap(|tap| Ok(self.measure_channel_delay(channel, tap, averages)?.mean))
    }

    /// Delay over tap 0 of every tap of a channel, highest tap first.
    ///
    /// The returned vector is indexed by tap.
    pub fn delay_line_transfer(
        &mut self,
        channel: Channel,
        averages: u32,
    ) -> Result<Vec<Measurement>, Error> {
        let bias = self.measure_channel_delay(channel, 0, averages)?;
        let mut taps = vec![Measurement::default(); N_TAPS as usize];
        taps[0].std = bias.std;
        for tap in (1..N_TAPS).rev() {
            let m = self.measure_channel_delay(channel, tap, averages)?;
            taps[tap as usize] = Measurement {
                mean: m.mean - bias.mean,
                std: m.std,
            };
        }
        Ok(taps)
    }
}

/// Calibration state of one output channel.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct ChannelCalibration {
    /// Measured minus fitted 8 ns tap at calibration time.
    pub frr_offset: i64,
    /// Tap count currently programmed.
    pub frr_current: u32,
}

/// Calibration engine: constants of the card plus the per channel state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Calibration {
    pub data: CalibrationData,
    channels: [ChannelCalibration; 4],
}

impl Calibration {
    pub fn new(data: CalibrationData) -> Self {
        Self {
            data,
            channels: Default::default(),
        }
    }

    pub fn channel(&self, channel: Channel) -> ChannelCalibration {
        self.channels[channel.index()]
    }

    /// Tap count of the fit at a temperature plus the channel offset,
    /// clamped to the delay line.
    fn fitted_tap(&self, channel: Channel, temperature: i32) -> u32 {
        let tap = evaluate_fit_polynomial(&self.data.frr_poly, temperature)
            + self.channels[channel.index()].frr_offset;
        if !(0..N_TAPS as i64).contains(&tap) {
            log::warn!("Channel {channel:?}: tap {tap} clamped to the delay line");
        }
        tap.clamp(0, N_TAPS as i64 - 1) as u32
    }

    /// Read the temperature, retrying with a pause on failure.
    fn read_temperature<B, D, S>(
        hw: &mut Hardware<B, D>,
        sensor: &mut S,
        settings: &Settings,
    ) -> Result<i32, Error>
    where
        B: RegisterBus,
        D: DelayNs,
        S: TemperatureSensor,
    {
        let mut fault = SensorFault::Read;
        for attempt in 1..=settings.sensor_attempts.max(1) {
            match sensor.read_temperature() {
                Ok(t) => return Ok(t),
                Err(e) => {
                    log::warn!("Temperature read attempt {attempt} failed: {e}");
                    fault = e;
                }
            }
            hw.delay().delay_ms(settings.sensor_retry_interval().ticks());
        }
        Err(Error::Sensor(fault))
    }

    /// Measure the 8 ns tap of all channels and record their offsets to the
    /// temperature fit.
    ///
    /// Leaves the TDC in calibration mode.
    pub fn calibrate_outputs<B, D, S>(
        &mut self,
        hw: &mut Hardware<B, D>,
        sensor: &mut S,
        settings: &Settings,
    ) -> Result<(), Error>
    where
        B: RegisterBus,
        D: DelayNs,
        S: TemperatureSensor,
    {
        hw.write(Core::Gcr, Gcr::default().with_bypass(true).raw_value());
        hw.tdc_configure(Mode::Calibration, &settings.tdc(self.data.tdc_start_offset))?;
        hw.write(
            Core::Tdcsr,
            Tdcsr::default().with_start_en(true).with_stop_en(true).raw_value(),
        );

        for channel in Channel::iter() {
            let temperature = Self::read_temperature(hw, sensor, settings)?;
            let measured = hw.find_8ns_tap(channel, settings.averages)?;
            let fitted = evaluate_fit_polynomial(&self.data.frr_poly, temperature);
            let state = &mut self.channels[channel.index()];
            state.frr_current = measured;
            state.frr_offset = measured as i64 - fitted;
            log::info!(
                "Channel {channel:?}: 8 ns at tap {measured} (fitted {fitted}, offset {}, temperature {}.{})",
                state.frr_offset,
                temperature / 10,
                (temperature % 10).abs()
            );
        }
        Ok(())
    }

    /// Reprogram all delay lines for the current temperature.
    ///
    /// On a sensor failure nothing is changed.
    pub fn refresh_temperature_compensation<B, D, S>(
        &mut self,
        hw: &mut Hardware<B, D>,
        sensor: &mut S,
    ) -> Result<(), Error>
    where
        B: RegisterBus,
        D: DelayNs,
        S: TemperatureSensor,
    {
        let temperature = sensor.read_temperature().map_err(|e| {
            log::warn!("Temperature compensation not refreshed: {e}");
            Error::Sensor(e)
        })?;
        for channel in Channel::iter() {
            let tap = self.fitted_tap(channel, temperature);
            log::debug!("Channel {channel:?}: FRR {tap}");
            self.channels[channel.index()].frr_current = tap;
            hw.write_channel(channel, ChannelReg::Frr, tap);
        }
        Ok(())
    }
}
