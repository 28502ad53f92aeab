use arbitrary_int::u3;
use fugit::MicrosDurationU32;

/// Number of taps of the fine delay lines.
pub const N_TAPS: u32 = 1024;

/// Fractional bits of a coarse cycle.
pub const FRAC_BITS: u32 = 12;

/// Duration of one coarse cycle in ps.
pub const COARSE_PERIOD_PS: i64 = 8000;

/// Coarse cycles per second.
pub const COARSE_PER_SECOND: u32 = 125_000_000;

/// Time the SPI controller needs after a transaction before the next one.
pub const SPI_SETTLE: MicrosDurationU32 = MicrosDurationU32::micros(100);

/// Pulse width or spacing below which the fine delay cannot be reloaded in time.
pub const NO_FINE_THRESHOLD_PS: i64 = 200_000;

/// Hardware address strapping of the GPIO expander.
pub const GPIO_ADDRESS: u3 = u3::new(7);

/// Default averaging count of a delay line measurement.
pub const DEFAULT_AVERAGES: u32 = 1024;

/// Delay difference to tap 0 that [`crate::calibration`] searches for.
pub const CALIBRATION_TARGET_PS: f64 = 8000.0;

/// Delay between two calibration pulse steps.
pub const CALIBRATION_STEP: MicrosDurationU32 = MicrosDurationU32::micros(1);
