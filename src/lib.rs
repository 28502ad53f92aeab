//! User space driver for the FMC Fine Delay card.
//!
//! The card combines four picosecond delay outputs with a TDC timestamping
//! the trigger input. [`FineDelay`] brings the card up (clocking, TDC bus
//! test, delay line calibration) and exposes the operational surface on top
//! of a [`RegisterBus`] supplied by the caller.

pub mod calibration;
pub mod device;
pub mod hardware;
pub mod settings;
pub mod timestamp;

#[cfg(test)]
mod testing;

pub use calibration::{CalibrationData, CalibrationStore, SensorFault, StoreError, TemperatureSensor};
pub use device::{FineDelay, OutputConfig, Repeat, State};
pub use hardware::{Channel, RegisterBus};
pub use settings::Settings;
pub use timestamp::{TaggedTimestamp, Timestamp};

/// Clocks whose lock is awaited during bring-up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Lock {
    /// AD9516 clock distribution PLL.
    Pll,
    /// TDC-GPX internal PLL.
    Tdc,
    /// FPGA DDR clocking of the delay core.
    Ddr,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Chip not present")]
    ChipNotPresent,
    #[error("{0:?} lock timeout")]
    LockTimeout(Lock),
    #[error("TDC data bus fault on bit {bit}")]
    BusFault { bit: u8 },
    #[error("Calibration data unusable")]
    CalibrationDataInvalid(#[from] StoreError),
    #[error("Temperature sensor")]
    Sensor(#[from] SensorFault),
    #[error("Out of range: {0}")]
    Range(&'static str),
    #[error("Device not ready")]
    NotReady,
    #[error("PLL")]
    Pll(#[from] ad9516::Error),
    #[error("GPIO expander")]
    Gpio(#[from] mcp23s17::Error),
    #[error("Settings: {0}")]
    Settings(serde_json_core::de::Error),
}

impl From<serde_json_core::de::Error> for Error {
    fn from(value: serde_json_core::de::Error) -> Self {
        Self::Settings(value)
    }
}
