//! Simulated Fine Delay card for the unit tests.

use std::collections::VecDeque;

use arbitrary_int::u3;
use embedded_hal::delay::DelayNs;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tdc_gpx::{Divider, DATA_MASK, TAG_MASK};

use crate::calibration::{
    CalibrationData, CalibrationStore, SensorFault, StoreError, TemperatureSensor,
};
use crate::hardware::design_parameters::CALIBRATION_TARGET_PS;
use crate::hardware::regs::{Calr, Core, Gcr, Scr, Tcr, Tdcsr, Tsbcr, CORE_MAGIC};
use crate::hardware::{Channel, RegisterBus};

/// Reference clock the simulated TDC PLL runs from.
const TDC_REFERENCE: f64 = 31.25e6;

/// Records the requested delays instead of waiting.
#[derive(Clone, Debug, Default)]
pub struct FakeDelay {
    pub elapsed_ns: u64,
}

impl DelayNs for FakeDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.elapsed_ns += ns as u64;
    }
}

pub struct FakeSensor {
    readings: VecDeque<Result<i32, SensorFault>>,
    last: Option<i32>,
    pub present: bool,
}

impl FakeSensor {
    /// Returns `readings` in order, then repeats the last good one.
    pub fn new(readings: &[Result<i32, SensorFault>]) -> Self {
        Self {
            readings: readings.iter().copied().collect(),
            last: None,
            present: true,
        }
    }

    pub fn push(&mut self, reading: Result<i32, SensorFault>) {
        self.readings.push_back(reading);
    }
}

impl TemperatureSensor for FakeSensor {
    fn init(&mut self) -> Result<(), SensorFault> {
        if self.present {
            Ok(())
        } else {
            Err(SensorFault::NotPresent)
        }
    }

    fn read_temperature(&mut self) -> Result<i32, SensorFault> {
        let reading = self
            .readings
            .pop_front()
            .unwrap_or(self.last.ok_or(SensorFault::NotPresent));
        if let Ok(t) = reading {
            self.last = Some(t);
        }
        reading
    }
}

pub struct FakeStore(pub Result<CalibrationData, StoreError>);

impl CalibrationStore for FakeStore {
    fn read_calibration_block(&mut self) -> Result<CalibrationData, StoreError> {
        self.0.clone()
    }
}

pub struct SimPll {
    pub regs: [u8; 0x400],
    pub present: bool,
    /// Readback polls before the lock detect asserts, never if `None`.
    pub lock_after: Option<u32>,
    polls: u32,
    pub syncs: u32,
}

impl Default for SimPll {
    fn default() -> Self {
        Self {
            regs: [0; 0x400],
            present: true,
            lock_after: Some(3),
            polls: 0,
            syncs: 0,
        }
    }
}

impl SimPll {
    fn exchange(&mut self, frame: u32) -> u32 {
        if !self.present {
            return 0;
        }
        let read = frame & (1 << 23) != 0;
        let addr = ((frame >> 8) & 0x1fff) as usize;
        if read {
            match addr {
                0x003 => ad9516::PART_ID as u32,
                0x01f => {
                    self.polls += 1;
                    self.lock_after.is_some_and(|n| self.polls > n) as u32
                }
                _ => self.regs[addr] as u32,
            }
        } else {
            let value = frame as u8;
            if addr == 0x230 && value == 1 {
                self.syncs += 1;
            }
            self.regs[addr] = value;
            0
        }
    }
}

pub struct SimGpio {
    pub iodir: [u8; 2],
    pub olat: [u8; 2],
    pub iocon: u8,
}

impl Default for SimGpio {
    fn default() -> Self {
        Self {
            iodir: [0xff; 2],
            olat: [0; 2],
            iocon: 0,
        }
    }
}

impl SimGpio {
    fn exchange(&mut self, frame: u32) -> u32 {
        let opcode = (frame >> 16) as u8;
        let reg = (frame >> 8) as u8;
        if (opcode & !1) != (0x40 | (7 << 1)) {
            return 0;
        }
        // GPIO reads return the latch, all pins of interest are outputs
        let slot = match reg {
            0x00 | 0x01 => &mut self.iodir[reg as usize],
            0x12..=0x15 => &mut self.olat[(reg & 1) as usize],
            0x0a | 0x0b => &mut self.iocon,
            _ => return 0,
        };
        if opcode & 1 != 0 {
            *slot as u32
        } else {
            *slot = frame as u8;
            0
        }
    }

    /// Address driven onto the TDC address bus, all ones while floating.
    fn tdc_address(&self) -> u8 {
        if self.iodir[1] & 0xf == 0 {
            self.olat[1] & 0xf
        } else {
            0xf
        }
    }
}

pub struct SimTdc {
    pub regs: [u32; 16],
    /// Address seen on the bus at the last access.
    pub addr: u8,
    /// Data lines that read back what was written.
    pub echo_mask: u32,
    pub locks: bool,
    /// Report this tag for every calibration pulse.
    pub fixed_tag: Option<u32>,
    /// Gaussian jitter of a calibration pulse round trip.
    pub noise_ps: f64,
    hit: Option<u32>,
}

impl Default for SimTdc {
    fn default() -> Self {
        Self {
            regs: [0; 16],
            addr: 0,
            echo_mask: DATA_MASK,
            locks: true,
            fixed_tag: None,
            noise_ps: 0.0,
            hit: None,
        }
    }
}

impl SimTdc {
    fn read(&mut self, addr: u8) -> u32 {
        self.addr = addr;
        match addr {
            8 | 9 => self.hit.take().unwrap_or(0),
            12 => (!self.locks as u32) << 10,
            _ => self.regs[addr as usize] & self.echo_mask,
        }
    }

    fn write(&mut self, addr: u8, value: u32) {
        self.addr = addr;
        self.regs[addr as usize] = value & DATA_MASK;
    }

    /// Bin width of one tag unit as configured in register 7.
    pub fn bin(&self) -> Option<f64> {
        let hs_div = self.regs[7] as u8;
        (hs_div != 0).then(|| {
            Divider {
                hs_div,
                ref_clk_div: u3::new((self.regs[7] >> 8) as u8 & 7),
            }
            .bin(TDC_REFERENCE)
        })
    }

    fn stop_enabled(&self, stop: u8) -> bool {
        self.regs[0] >> 10 & (1 << stop) != 0
    }
}

#[derive(Clone, Debug, Default)]
pub struct SimChannel {
    pub frr: u32,
    pub dcr: u32,
    pub dcr_writes: Vec<u32>,
    pub regs: [u32; 16],
}

pub struct SimCard {
    pub magic: u32,
    pub rstr_writes: Vec<u32>,
    pub gcr: u32,
    pub gcr_writes: Vec<u32>,
    pub ddr_locks: bool,
    pub tdr: u32,
    pub tdcsr: u32,
    pub calr: u32,
    pub adsfr: u32,
    pub atmcr: u32,
    pub asor: u32,
    time: [u32; 3],
    /// Time loaded by the last SET_TIME and the GCR at that moment.
    pub time_set: Option<([u32; 3], u32)>,
    scr: u32,
    pub spi_frames: usize,
    pub tsbcr: u32,
    pub tsbcr_writes: Vec<u32>,
    /// Buffered input timestamps: SECH, SECL, CYCLES, FID.
    pub timestamps: VecDeque<[u32; 4]>,
    pub pll: SimPll,
    pub gpio: SimGpio,
    pub tdc: SimTdc,
    pub channels: [SimChannel; 4],
    rng: StdRng,
}

impl Default for SimCard {
    fn default() -> Self {
        Self {
            magic: CORE_MAGIC,
            rstr_writes: Vec::new(),
            gcr: 0,
            gcr_writes: Vec::new(),
            ddr_locks: true,
            tdr: 0,
            tdcsr: 0,
            calr: 0,
            adsfr: 0,
            atmcr: 0,
            asor: 0,
            time: [0; 3],
            time_set: None,
            scr: 0,
            spi_frames: 0,
            tsbcr: 0,
            tsbcr_writes: Vec::new(),
            timestamps: VecDeque::new(),
            pll: SimPll::default(),
            gpio: SimGpio::default(),
            tdc: SimTdc::default(),
            channels: Default::default(),
            rng: StdRng::seed_from_u64(0xf19e),
        }
    }
}

impl SimCard {
    /// Delay line slope of a channel.
    pub fn line_ps_per_tap(&self, channel: Channel) -> f64 {
        9.6 + 0.1 * channel.index() as f64
    }

    /// Calibration pulse round trip through a channel at a tap.
    fn line_delay(&self, channel: Channel, tap: u32) -> f64 {
        30_000.0 + 500.0 * channel.index() as f64 + tap as f64 * self.line_ps_per_tap(channel)
    }

    /// The tap a noise free 8 ns search ends on, TDC quantization included.
    pub fn expected_8ns_tap(&self, channel: Channel) -> u32 {
        let Some(bin) = self.tdc.bin() else {
            return 0;
        };
        let tag = |tap| (self.line_delay(channel, tap) / bin).round();
        (0..1024)
            .take_while(|&tap| (tag(tap) - tag(0)) * bin < CALIBRATION_TARGET_PS)
            .last()
            .unwrap_or(0)
    }

    fn calibration_pulse(&mut self, psel: u32) {
        if psel.count_ones() != 1 {
            return;
        }
        let Ok(channel) = Channel::try_from(psel.trailing_zeros() as u8 + 1) else {
            return;
        };
        if !self.tdc.stop_enabled(channel.tdc_stop()) {
            return;
        }
        if let Some(tag) = self.tdc.fixed_tag {
            self.tdc.hit = Some(tag);
            return;
        }
        let Some(bin) = self.tdc.bin() else {
            return;
        };
        // Irwin-Hall approximation of a unit normal
        let gauss: f64 = (0..12).map(|_| self.rng.gen::<f64>()).sum::<f64>() - 6.0;
        let delay = self.line_delay(channel, self.channels[channel.index()].frr)
            + gauss * self.tdc.noise_ps;
        self.tdc.hit = Some((delay / bin).round() as u32 & TAG_MASK);
    }

    fn spi(&mut self, scr: Scr) -> u32 {
        self.spi_frames += 1;
        let frame = scr.data().value();
        let rx = if scr.sel_pll() {
            self.pll.exchange(frame)
        } else if scr.sel_gpio() {
            let rx = self.gpio.exchange(frame);
            self.tdc.addr = self.gpio.tdc_address();
            rx
        } else {
            0
        };
        rx & 0xff_ffff
    }
}

impl RegisterBus for SimCard {
    fn read32(&mut self, offset: u32) -> u32 {
        if offset >= 0x100 {
            let ch = &self.channels[(offset / 0x100) as usize - 1];
            return match offset % 0x100 {
                0x00 => ch.dcr,
                0x04 => ch.frr,
                o => ch.regs[o as usize / 4],
            };
        }
        match offset {
            o if o == Core::Rstr as u32 => self.rstr_writes.last().copied().unwrap_or(0),
            o if o == Core::Idr as u32 => self.magic,
            o if o == Core::Gcr as u32 => {
                self.gcr | ((self.ddr_locks as u32) << 2)
            }
            o if o == Core::Tdr as u32 => self.tdr,
            o if o == Core::Tdcsr as u32 => self.tdcsr,
            o if o == Core::Scr as u32 => self.scr,
            o if o == Core::Tsbcr as u32 => {
                self.tsbcr | ((self.timestamps.is_empty() as u32) << 9)
            }
            o if o == Core::TsbrSecH as u32 => self.timestamps.front().map_or(0, |t| t[0]),
            o if o == Core::TsbrSecL as u32 => self.timestamps.front().map_or(0, |t| t[1]),
            o if o == Core::TsbrCycles as u32 => {
                self.timestamps.front().map_or(0, |t| t[2])
            }
            o if o == Core::TsbrFid as u32 => {
                self.timestamps.pop_front().map_or(0, |t| t[3])
            }
            _ => 0,
        }
    }

    fn write32(&mut self, offset: u32, value: u32) {
        if offset >= 0x100 {
            let ch = &mut self.channels[(offset / 0x100) as usize - 1];
            match offset % 0x100 {
                0x00 => {
                    ch.dcr = value;
                    ch.dcr_writes.push(value);
                }
                0x04 => ch.frr = value,
                o => ch.regs[o as usize / 4] = value,
            }
            return;
        }
        match offset {
            o if o == Core::Rstr as u32 => self.rstr_writes.push(value),
            o if o == Core::Gcr as u32 => {
                self.gcr = value & 0b11;
                self.gcr_writes.push(value);
            }
            o if o == Core::Tcr as u32 => {
                if Tcr::new_with_raw_value(value).set_time() {
                    self.time_set = Some((self.time, self.gcr));
                }
            }
            o if o == Core::TmSecH as u32 => self.time[0] = value,
            o if o == Core::TmSecL as u32 => self.time[1] = value,
            o if o == Core::TmCycles as u32 => self.time[2] = value,
            o if o == Core::Tdr as u32 => self.tdr = value,
            o if o == Core::Tdcsr as u32 => {
                self.tdcsr = value;
                let tdcsr = Tdcsr::new_with_raw_value(value);
                let addr = self.gpio.tdc_address();
                if tdcsr.write() {
                    self.tdc.write(addr, self.tdr);
                }
                if tdcsr.read() {
                    self.tdr = self.tdc.read(addr);
                }
            }
            o if o == Core::Calr as u32 => {
                self.calr = value;
                let calr = Calr::new_with_raw_value(value);
                if calr.cal_pulse() {
                    self.calibration_pulse(calr.psel().value() as u32);
                }
            }
            o if o == Core::Adsfr as u32 => self.adsfr = value,
            o if o == Core::Atmcr as u32 => self.atmcr = value,
            o if o == Core::Asor as u32 => self.asor = value,
            o if o == Core::Scr as u32 => {
                let scr = Scr::new_with_raw_value(value);
                self.scr = if scr.start() {
                    let rx = self.spi(scr);
                    (value & !0xff_ffff) | rx | (1 << 27)
                } else {
                    value
                };
            }
            o if o == Core::Tsbcr as u32 => {
                let tsbcr = Tsbcr::new_with_raw_value(value);
                if tsbcr.purge() {
                    self.timestamps.clear();
                }
                self.tsbcr = value & 0x3f;
                self.tsbcr_writes.push(value);
            }
            _ => {}
        }
    }
}

#[test]
fn gcr_write_masks_status() {
    let mut card = SimCard::default();
    card.write32(Core::Gcr as _, 0xff);
    assert!(Gcr::new_with_raw_value(card.read32(Core::Gcr as _)).ddr_locked());
    assert_eq!(card.gcr, 0b11);
}
