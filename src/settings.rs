//! Driver settings
//!
//! Timeouts, averaging and TDC parameters of the bring-up and calibration
//! procedures. Every field has a default so partial JSON documents are
//! accepted. Fixed hardware constants are in
//! [`crate::hardware::design_parameters`].
use fugit::MillisDurationU32;
use serde::{Deserialize, Serialize};

use crate::hardware::design_parameters::DEFAULT_AVERAGES;
use crate::hardware::tdc::TdcConfig;
use crate::Error;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// AD9516 lock detect timeout in ms.
    pub pll_lock_timeout: u32,
    /// TDC PLL lock timeout in ms.
    pub tdc_lock_timeout: u32,
    /// Core DDR clock lock timeout in ms.
    pub ddr_lock_timeout: u32,
    /// Samples averaged per delay line measurement.
    pub averages: u32,
    /// TDC PLL bin width target in ps.
    pub tdc_bin: f64,
    /// TDC reference clock in Hz.
    pub tdc_reference: f64,
    /// Pause between temperature sensor attempts in ms.
    pub sensor_retry_interval: u32,
    /// Temperature reads attempted per channel during calibration.
    pub sensor_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pll_lock_timeout: 10_000,
            tdc_lock_timeout: 2_000,
            ddr_lock_timeout: 1_000,
            averages: DEFAULT_AVERAGES,
            tdc_bin: 80.9553,
            tdc_reference: 31.25e6,
            sensor_retry_interval: 100,
            sensor_attempts: 10,
        }
    }
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let (settings, _) = serde_json_core::from_str(json)?;
        Ok(settings)
    }

    pub fn pll_lock_timeout(&self) -> MillisDurationU32 {
        MillisDurationU32::millis(self.pll_lock_timeout)
    }

    pub fn ddr_lock_timeout(&self) -> MillisDurationU32 {
        MillisDurationU32::millis(self.ddr_lock_timeout)
    }

    pub fn sensor_retry_interval(&self) -> MillisDurationU32 {
        MillisDurationU32::millis(self.sensor_retry_interval)
    }

    /// TDC parameters for a given R-mode start offset.
    pub fn tdc(&self, start_offset: u32) -> TdcConfig {
        TdcConfig {
            target_bin_ps: self.tdc_bin,
            reference_hz: self.tdc_reference,
            start_offset,
            lock_timeout: MillisDurationU32::millis(self.tdc_lock_timeout),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial() {
        let s = Settings::from_json(r#"{"averages":16,"sensor_attempts":3}"#).unwrap();
        assert_eq!(s.averages, 16);
        assert_eq!(s.sensor_attempts, 3);
        assert_eq!(s.pll_lock_timeout, 10_000);
        assert_eq!(s.tdc(10000).lock_timeout, MillisDurationU32::millis(2000));
    }

    #[test]
    fn invalid() {
        assert!(matches!(
            Settings::from_json(r#"{"averages":"many"}"#),
            Err(Error::Settings(_))
        ));
    }

    #[test]
    fn serialize() {
        let mut buf = [0u8; 512];
        let len = serde_json_core::to_slice(&Settings::default(), &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(json.contains(r#""averages":1024"#));
    }
}
