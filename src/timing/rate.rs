//! rate.rs
//! Fixed-frequency loop pacing.
//!
//! - Monotonic clock (`Instant`): elapsed time never goes backward
//! - SpinSleeper for sub-millisecond wake-up precision
//! - Overruns are not slept away; the cycle anchor is re-aligned instead

use spin_sleep::{SpinSleeper, SpinStrategy};
use std::time::{Duration, Instant};
use log::warn;

use crate::error::{AffError, Result};
use crate::timing::periodic::TOL;

pub struct Rate {
    frequency: f64,
    period: Duration,
    started: Instant,
    cycle_start: Instant,
    cycle_time: Duration,
    overruns: u64,
    sleeper: SpinSleeper,
}

impl Rate {
    /// Creates a rate and starts its clock.
    pub fn new(frequency: f64) -> Result<Self> {
        if !frequency.is_finite() || frequency <= TOL {
            return Err(AffError::InvalidArgument(
                "given frequency is unacceptable: negative or very close to zero".into(),
            ));
        }
        let now = Instant::now();
        Ok(Self {
            frequency,
            period: Duration::from_secs_f64(1.0 / frequency),
            started: now,
            cycle_start: now,
            cycle_time: Duration::ZERO,
            overruns: 0,
            sleeper: SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread),
        })
    }

    pub fn from_secs(duration: f64) -> Result<Self> {
        if !duration.is_finite() || duration <= TOL {
            return Err(AffError::InvalidArgument(format!(
                "given duration is unacceptable: {duration}"
            )));
        }
        Self::new(1.0 / duration)
    }

    pub fn from_msecs(duration_ms: u64) -> Result<Self> {
        Self::from_secs(duration_ms as f64 * 1e-3)
    }

    #[inline]
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Target cycle time in seconds.
    #[inline]
    pub fn expected_cycle_time(&self) -> f64 {
        1.0 / self.frequency
    }

    /// Measured duration of the last completed cycle, in seconds.
    #[inline]
    pub fn cycle_time(&self) -> f64 {
        self.cycle_time.as_secs_f64()
    }

    #[inline]
    pub fn overrun_count(&self) -> u64 {
        self.overruns
    }

    /// Restarts both the elapsed-time origin and the cycle anchor.
    pub fn start(&mut self) {
        let now = Instant::now();
        self.started = now;
        self.cycle_start = now;
        self.cycle_time = Duration::ZERO;
    }

    /// Seconds since [`Rate::start`] (or construction).
    #[inline]
    pub fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    #[inline]
    pub fn now(&self) -> f64 {
        self.elapsed()
    }

    /// Re-anchors the current cycle to now; elapsed time is untouched.
    pub fn reset(&mut self) {
        self.cycle_start = Instant::now();
    }

    /// Blocks until the current cycle has lasted one period.
    pub fn sleep(&mut self) {
        let expected_end = self.cycle_start + self.period;
        let now = Instant::now();

        if now < expected_end {
            self.sleeper.sleep(expected_end - now);
            self.cycle_time = Instant::now().duration_since(self.cycle_start);
            self.cycle_start = expected_end;
            return;
        }

        // Overrun: do not sleep
        let overshoot = now.duration_since(expected_end);
        self.overruns += 1;
        self.cycle_time = now.duration_since(self.cycle_start);
        warn!(
            "It took longer than specified period at t={:.3}: overshoot {:.3} ms",
            self.elapsed(),
            overshoot.as_secs_f64() * 1e3
        );

        // Stalls longer than a period snap the anchor to now
        self.cycle_start = if overshoot > self.period {
            now
        } else {
            expected_end
        };
    }
}
