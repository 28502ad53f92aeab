//! Basic blocking delay
//!
//! Short waits spin on the monotonic clock, longer ones yield to the
//! scheduler.
use embedded_hal::delay::DelayNs;
use std::time::{Duration, Instant};

/// Waits at or above this are handed to the OS scheduler.
const SLEEP_THRESHOLD: Duration = Duration::from_micros(500);

/// A basic delay implementation.
#[derive(Copy, Clone, Debug, Default)]
pub struct SleepDelay;

impl DelayNs for SleepDelay {
    fn delay_ns(&mut self, ns: u32) {
        let duration = Duration::from_nanos(ns as u64);
        if duration >= SLEEP_THRESHOLD {
            std::thread::sleep(duration);
        } else {
            let start = Instant::now();
            while start.elapsed() < duration {
                std::hint::spin_loop();
            }
        }
    }
}
