#![no_std]
//! ACAM TDC-GPX register definitions.
//!
//! The chip has 16 registers with a 28 bit data bus. Only the registers and
//! fields used by the Fine Delay card are modelled here, together with the
//! two configuration tables used by the driver:
//!
//! * [`Mode::Normal`]: R-mode, high resolution timestamping of the trigger
//!   input against the start pulse.
//! * [`Mode::Calibration`]: I-mode with the ring oscillator running, used to
//!   measure the output delay lines against the TDC start.

use arbitrary_int::{u18, u3, u4, u9};
use bitbybit::bitfield;
use num_traits::float::FloatCore;

/// Width mask of the TDC data bus.
pub const DATA_MASK: u32 = 0x0fff_ffff;

/// Width mask of a hit tag read from a FIFO register.
pub const TAG_MASK: u32 = 0x1_ffff;

/// Internal prescaler between the PLL bin and the reported bin.
pub const BIN_PRESCALE: f64 = 3.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Addr {
    Config0 = 0,
    Config1 = 1,
    Config2 = 2,
    Config3 = 3,
    Config4 = 4,
    Config5 = 5,
    Config6 = 6,
    Config7 = 7,
    Fifo0 = 8,
    Fifo1 = 9,
    ErrorFlags = 11,
    Status = 12,
    Config14 = 14,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Normal,
    Calibration,
}

#[bitfield(u32, default = 0)]
#[derive(Debug, PartialEq)]
pub struct Reg0 {
    #[bit(0, rw)]
    pub ring_oscillator: bool,
    #[bit(1, rw)]
    pub rise_en0: bool,
    #[bit(2, rw)]
    pub fall_en0: bool,
    #[bit(3, rw)]
    pub rise_en1: bool,
    #[bit(4, rw)]
    pub fall_en1: bool,
    #[bit(5, rw)]
    pub rise_en2: bool,
    #[bit(6, rw)]
    pub fall_en2: bool,
    #[bit(7, rw)]
    pub hq_sel: bool,
    #[bits(10..=18, rw)]
    pub t_rise_en: u9,
    #[bits(19..=27, rw)]
    pub t_fall_en: u9,
}

#[bitfield(u32, default = 0)]
#[derive(Debug, PartialEq)]
pub struct Reg2 {
    #[bit(0, rw)]
    pub g_mode: bool,
    #[bit(1, rw)]
    pub i_mode: bool,
    #[bit(2, rw)]
    pub r_mode: bool,
    #[bits(3..=11, rw)]
    pub disable: u9,
    #[bits(20..=23, rw)]
    pub adj7: u4,
    #[bits(24..=27, rw)]
    pub adj8: u4,
}

#[bitfield(u32, default = 0)]
#[derive(Debug, PartialEq)]
pub struct Reg4 {
    #[bits(0..=7, rw)]
    pub start_timer: u8,
    #[bit(8, rw)]
    pub quiet: bool,
    #[bit(9, rw)]
    pub m_mode: bool,
    #[bit(22, rw)]
    pub master_reset: bool,
    #[bit(23, rw)]
    pub partial_reset: bool,
    #[bit(24, rw)]
    pub alu_trig_soft: bool,
    #[bit(25, rw)]
    pub eflag_hi_z_n: bool,
    #[bit(26, rw)]
    pub m_timer_start: bool,
    #[bit(27, rw)]
    pub m_timer_stop: bool,
}

#[bitfield(u32, default = 0)]
#[derive(Debug, PartialEq)]
pub struct Reg5 {
    #[bits(0..=17, rw)]
    pub start_off1: u18,
    #[bit(21, rw)]
    pub stop_dis_start: bool,
    #[bit(22, rw)]
    pub start_dis_start: bool,
    #[bit(23, rw)]
    pub master_alu_trig: bool,
    #[bit(24, rw)]
    pub partial_alu_trig: bool,
    #[bit(25, rw)]
    pub master_oen_trig: bool,
    #[bit(26, rw)]
    pub partial_oen_trig: bool,
    #[bit(27, rw)]
    pub start_retrig: bool,
}

#[bitfield(u32, default = 0)]
#[derive(Debug, PartialEq)]
pub struct Reg6 {
    #[bits(0..=7, rw)]
    pub fill: u8,
    #[bit(26, rw)]
    pub power_on_ecl: bool,
}

#[bitfield(u32, default = 0)]
#[derive(Debug, PartialEq)]
pub struct Reg7 {
    #[bits(0..=7, rw)]
    pub hs_div: u8,
    #[bits(8..=10, rw)]
    pub ref_clk_div: u3,
    #[bit(11, rw)]
    pub res_adj: bool,
    #[bit(12, rw)]
    pub neg_phase: bool,
}

#[bitfield(u32)]
#[derive(Debug, PartialEq)]
pub struct Status {
    #[bits(0..=7, r)]
    pub hit_fifo_full: u8,
    #[bit(10, r)]
    pub not_locked: bool,
}

impl Status {
    pub fn locked(&self) -> bool {
        !self.not_locked()
    }
}

/// Pack the per-channel adjust nibbles of register 1 (channels 0 to 6).
pub const fn adjust(adj: [u8; 7]) -> u32 {
    let mut v = 0;
    let mut i = 0;
    while i < adj.len() {
        v |= ((adj[i] & 0xf) as u32) << (4 * i);
        i += 1;
    }
    v
}

/// Error flag enables written to register 11.
const ERROR_FLAGS: u32 = 0x07ff_0000;

/// Start offset used while the ring oscillator calibration is running.
const CALIBRATION_START_OFFSET: u32 = 3000;

/// PLL divider setting: `bin = T_ref * 2^ref_clk_div / (216 * hs_div)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Divider {
    pub hs_div: u8,
    pub ref_clk_div: u3,
}

impl Divider {
    /// The bin width in ps achieved with a reference clock `clock` in Hz.
    pub fn bin(&self, clock: f64) -> f64 {
        ((1.0 / clock) * 1e12) * 2f64.powi(self.ref_clk_div.value() as i32)
            / (216.0 * self.hs_div as f64)
    }
}

/// Search the divider pair closest to a target bin width.
///
/// All `hs_div` in `1..=255` and `ref_clk_div` in `0..=7` are tried in that
/// order. The first pair with the smallest error is kept.
///
/// # Args
/// * `bin` - Target bin width in ps.
/// * `clock` - Reference clock frequency in Hz.
///
/// # Returns
/// The chosen divider and the bin width it achieves.
pub fn search_divider(bin: f64, clock: f64) -> (Divider, f64) {
    let first = Divider {
        hs_div: 1,
        ref_clk_div: u3::new(0),
    };
    let mut best = (first, first.bin(clock));
    let mut best_err = (bin - best.1).abs();
    for hs_div in 1..=255u8 {
        for r in 0..=7u8 {
            let divider = Divider {
                hs_div,
                ref_clk_div: u3::new(r),
            };
            let b = divider.bin(clock);
            let err = (bin - b).abs();
            if err < best_err {
                best_err = err;
                best = (divider, b);
            }
        }
    }
    best
}

fn reg7(divider: Divider) -> u32 {
    Reg7::default()
        .with_hs_div(divider.hs_div)
        .with_ref_clk_div(divider.ref_clk_div)
        .with_res_adj(true)
        .with_neg_phase(true)
        .raw_value()
}

/// The [`Mode::Normal`] register table, in write order.
///
/// The master reset that has to follow is not part of the table, see
/// [`master_reset`].
///
/// # Args
/// * `start_offset` - Start offset in R-mode, in bins.
pub fn normal_configuration(divider: Divider, start_offset: u32) -> [(Addr, u32); 11] {
    [
        (
            Addr::Config0,
            Reg0::default()
                .with_ring_oscillator(true)
                .with_rise_en0(true)
                .with_rise_en1(true)
                .with_hq_sel(true)
                .raw_value(),
        ),
        (Addr::Config1, adjust([0, 2, 6, 0, 2, 6, 0])),
        (
            Addr::Config2,
            Reg2::default()
                .with_r_mode(true)
                .with_adj7(u4::new(2))
                .with_adj8(u4::new(6))
                .raw_value(),
        ),
        (Addr::Config3, 0),
        (
            Addr::Config4,
            Reg4::default().with_eflag_hi_z_n(true).raw_value(),
        ),
        (
            Addr::Config5,
            Reg5::default()
                .with_start_retrig(true)
                .with_start_off1(u18::new(start_offset & 0x3_ffff))
                .with_master_alu_trig(true)
                .raw_value(),
        ),
        (
            Addr::Config6,
            Reg6::default()
                .with_fill(200)
                .with_power_on_ecl(true)
                .raw_value(),
        ),
        (Addr::Config7, reg7(divider)),
        (Addr::ErrorFlags, ERROR_FLAGS),
        (Addr::Status, 0),
        (Addr::Config14, 0),
    ]
}

/// The [`Mode::Calibration`] register table, in write order.
pub fn calibration_configuration(divider: Divider) -> [(Addr, u32); 8] {
    [
        (
            Addr::Config0,
            Reg0::default()
                .with_t_rise_en(u9::new(1))
                .with_hq_sel(true)
                .with_ring_oscillator(true)
                .raw_value(),
        ),
        (Addr::Config2, Reg2::default().with_i_mode(true).raw_value()),
        (
            Addr::Config5,
            Reg5::default()
                .with_start_off1(u18::new(CALIBRATION_START_OFFSET))
                .with_master_alu_trig(true)
                .raw_value(),
        ),
        (Addr::Config6, 0),
        (Addr::Config7, reg7(divider)),
        (Addr::ErrorFlags, ERROR_FLAGS),
        (Addr::Status, 0),
        (Addr::Config14, 0),
    ]
}

/// Register 4 value that resets the chip after configuration.
pub fn master_reset() -> (Addr, u32) {
    (
        Addr::Config4,
        Reg4::default()
            .with_eflag_hi_z_n(true)
            .with_master_reset(true)
            .with_start_timer(0)
            .raw_value(),
    )
}

/// Register 0 value enabling the start and one stop input for delay line
/// calibration.
pub fn calibration_stop(stop: u8) -> u32 {
    Reg0::default()
        .with_t_rise_en(u9::new(1 | (1 << (stop & 7))))
        .with_hq_sel(true)
        .with_ring_oscillator(true)
        .raw_value()
}
