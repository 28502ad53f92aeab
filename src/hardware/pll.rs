//! Clock distribution PLL bring-up.

use ad9516::Addr;
use embedded_hal::delay::DelayNs;
use fugit::{MicrosDurationU32, MillisDurationU32};

use super::{Hardware, RegisterBus};
use crate::{Error, Lock};

/// Lock detect poll interval.
const LOCK_POLL: MicrosDurationU32 = MicrosDurationU32::micros(100);

/// AD9516-4 register set of the Fine Delay card, in write order.
///
/// 125 MHz reference, VCO at 2.5 GHz, 250 MHz to the TDC reference divider,
/// 125 MHz to the FPGA and the delay lines.
#[rustfmt::skip]
pub const CONFIG: &[(u16, u8)] = &[
    // PLL
    (0x0004, 0x00), (0x0010, 0x7c), (0x0011, 0x05), (0x0012, 0x00),
    (0x0013, 0x0c), (0x0014, 0x12), (0x0015, 0x00), (0x0016, 0x05),
    (0x0017, 0x88), (0x0018, 0x07), (0x0019, 0x00), (0x001a, 0x00),
    (0x001b, 0x00), (0x001c, 0x02), (0x001d, 0x00), (0x001e, 0x00),
    (0x00a0, 0x01), (0x00a1, 0x00), (0x00a2, 0x00), (0x00a3, 0x01),
    (0x00a4, 0x00), (0x00a5, 0x00), (0x00a6, 0x01), (0x00a7, 0x00),
    (0x00a8, 0x00), (0x00a9, 0x01), (0x00aa, 0x00), (0x00ab, 0x00),
    // LVPECL outputs
    (0x00f0, 0x0a), (0x00f1, 0x0a), (0x00f2, 0x0a), (0x00f3, 0x0a),
    (0x00f4, 0x0a), (0x00f5, 0x0a),
    // LVDS/CMOS outputs
    (0x0140, 0x42), (0x0141, 0x5a), (0x0142, 0x43), (0x0143, 0x42),
    // dividers
    (0x0190, 0x00), (0x0191, 0x80), (0x0192, 0x00), (0x0193, 0xbb),
    (0x0194, 0x00), (0x0195, 0x00), (0x0196, 0x00), (0x0197, 0x00),
    (0x0198, 0x00), (0x0199, 0x22), (0x019a, 0x00), (0x019b, 0x11),
    (0x019c, 0x20), (0x019d, 0x00), (0x019e, 0x22), (0x019f, 0x00),
    (0x01a0, 0x11), (0x01a1, 0x20), (0x01a2, 0x00), (0x01a3, 0x00),
    // VCO divider and clock input
    (0x01e0, 0x02), (0x01e1, 0x02),
    // power down and sync
    (0x0230, 0x00), (0x0231, 0x00),
];

impl<B: RegisterBus, D: DelayNs> Hardware<B, D> {
    /// Load [`CONFIG`], wait for the digital lock detect and align the
    /// output phases.
    pub fn pll_init(&mut self, timeout: MillisDurationU32) -> Result<(), Error> {
        let mut pll = self.pll();
        pll.init().map_err(|e| match e {
            ad9516::Error::Id(id) => {
                log::error!("AD9516 not responding, part ID {id:#04x}");
                Error::ChipNotPresent
            }
            e => Error::Pll(e),
        })?;
        pll.load(CONFIG)?;
        self.poll(Lock::Pll, timeout, LOCK_POLL, |hw| {
            Ok(hw.pll().readback()?.locked())
        })?;
        log::info!("AD9516 locked");
        self.pll().sync_outputs()?;
        Ok(())
    }

    /// Raw access for diagnostics.
    pub fn pll_register(&mut self, addr: Addr) -> Result<u8, Error> {
        Ok(self.pll().read(addr as _)?)
    }
}
