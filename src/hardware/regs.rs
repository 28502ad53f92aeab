//! Fine Delay core register map.
//!
//! Global registers live at flat byte offsets, the per-channel blocks at
//! `channel * 0x100 + offset`.

use arbitrary_int::{u12, u24, u4, u5};
use bitbybit::bitfield;

/// Global register offsets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Core {
    Rstr = 0x00,
    Idr = 0x04,
    Gcr = 0x08,
    Tcr = 0x0c,
    TmSecH = 0x10,
    TmSecL = 0x14,
    TmCycles = 0x18,
    Tdr = 0x1c,
    Tdcsr = 0x20,
    Calr = 0x24,
    Adsfr = 0x30,
    Atmcr = 0x34,
    Asor = 0x38,
    Scr = 0x40,
    Tsbcr = 0x48,
    TsbrSecH = 0x50,
    TsbrSecL = 0x54,
    TsbrCycles = 0x58,
    TsbrFid = 0x5c,
}

/// Per-channel register offsets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ChannelReg {
    Dcr = 0x00,
    Frr = 0x04,
    UStartH = 0x08,
    UStartL = 0x0c,
    CStart = 0x10,
    FStart = 0x14,
    UEndH = 0x18,
    UEndL = 0x1c,
    CEnd = 0x20,
    FEnd = 0x24,
    UDelta = 0x28,
    CDelta = 0x2c,
    FDelta = 0x30,
    Rcr = 0x34,
}

/// Value the identification register holds on a Fine Delay core.
pub const CORE_MAGIC: u32 = 0xf19e_de1a;

/// Key that has to accompany every write to [`Rstr`].
pub const RSTR_KEY: u16 = 0xdead;

/// Reset register. The reset lines are active low: a set bit releases.
#[bitfield(u32, default = 0)]
#[derive(Debug, PartialEq)]
pub struct Rstr {
    #[bit(0, rw)]
    pub fmc_released: bool,
    #[bit(1, rw)]
    pub core_released: bool,
    #[bits(16..=31, rw)]
    pub lock: u16,
}

#[bitfield(u32, default = 0)]
#[derive(Debug, PartialEq)]
pub struct Gcr {
    #[bit(0, rw)]
    pub bypass: bool,
    #[bit(1, rw)]
    pub input_en: bool,
    #[bit(2, r)]
    pub ddr_locked: bool,
}

#[bitfield(u32, default = 0)]
#[derive(Debug, PartialEq)]
pub struct Tcr {
    #[bit(6, rw)]
    pub set_time: bool,
}

/// TDC control/status register.
#[bitfield(u32, default = 0)]
#[derive(Debug, PartialEq)]
pub struct Tdcsr {
    #[bit(0, rw)]
    pub write: bool,
    #[bit(1, rw)]
    pub read: bool,
    #[bit(2, r)]
    pub empty: bool,
    #[bit(3, rw)]
    pub stop_en: bool,
    #[bit(4, rw)]
    pub start_dis: bool,
    #[bit(5, rw)]
    pub start_en: bool,
    #[bit(6, rw)]
    pub stop_dis: bool,
    #[bit(7, rw)]
    pub alutrig: bool,
}

/// Calibration pulse register.
#[bitfield(u32, default = 0)]
#[derive(Debug, PartialEq)]
pub struct Calr {
    #[bit(0, rw)]
    pub cal_pulse: bool,
    #[bits(3..=6, rw)]
    pub psel: u4,
}

/// SPI controller register.
#[bitfield(u32, default = 0)]
#[derive(Debug, PartialEq)]
pub struct Scr {
    #[bits(0..=23, rw)]
    pub data: u24,
    #[bit(25, rw)]
    pub sel_pll: bool,
    #[bit(26, rw)]
    pub sel_gpio: bool,
    #[bit(27, r)]
    pub ready: bool,
    #[bit(28, rw)]
    pub cpol: bool,
    #[bit(29, rw)]
    pub start: bool,
}

/// Timestamp buffer control register.
#[bitfield(u32, default = 0)]
#[derive(Debug, PartialEq)]
pub struct Tsbcr {
    #[bits(0..=4, rw)]
    pub chan_mask: u5,
    #[bit(5, rw)]
    pub enable: bool,
    #[bit(6, rw)]
    pub purge: bool,
    #[bit(7, rw)]
    pub rst_seq: bool,
    #[bit(8, r)]
    pub full: bool,
    #[bit(9, r)]
    pub empty: bool,
}

/// Fine part, sequence number and source of a buffered timestamp.
#[bitfield(u32)]
#[derive(Debug, PartialEq)]
pub struct TsbrFid {
    #[bits(0..=3, r)]
    pub channel: u4,
    #[bits(4..=15, r)]
    pub fine: u12,
    #[bits(16..=31, r)]
    pub seq_id: u16,
}

/// Delay channel control register.
#[bitfield(u32, default = 0)]
#[derive(Debug, PartialEq)]
pub struct Dcr {
    #[bit(0, rw)]
    pub enable: bool,
    #[bit(1, rw)]
    pub mode: bool,
    #[bit(2, rw)]
    pub pg_arm: bool,
    #[bit(3, r)]
    pub pg_trig: bool,
    #[bit(4, rw)]
    pub update: bool,
    #[bit(5, r)]
    pub upd_done: bool,
    #[bit(6, rw)]
    pub force_dly: bool,
    #[bit(7, rw)]
    pub no_fine: bool,
    #[bit(8, rw)]
    pub force_hi: bool,
}

/// Repeat count register.
#[bitfield(u32, default = 0)]
#[derive(Debug, PartialEq)]
pub struct Rcr {
    #[bits(0..=15, rw)]
    pub rep_cnt: u16,
    #[bit(16, rw)]
    pub cont: bool,
}
