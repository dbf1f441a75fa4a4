//! periodic.rs
//! Timing basis (`dt` XOR `freq`) shared by the state estimator and the controller.

use log::warn;

use crate::error::{AffError, Result};

/// Values at or below this are treated as zero.
pub const TOL: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Period {
    dt: f64,
    freq: f64,
}

impl Period {
    pub fn from_dt(dt: f64) -> Result<Self> {
        if !dt.is_finite() || dt <= TOL {
            return Err(AffError::InvalidArgument(format!(
                "given time step is unacceptable: {dt}"
            )));
        }
        Ok(Self { dt, freq: 1.0 / dt })
    }

    pub fn from_freq(freq: f64) -> Result<Self> {
        if !freq.is_finite() || freq <= TOL {
            return Err(AffError::InvalidArgument(format!(
                "given frequency is unacceptable: {freq}"
            )));
        }
        Ok(Self { dt: 1.0 / freq, freq })
    }

    /// At most one of `dt` / `freq` may be given; `Ok(None)` when neither is.
    pub fn from_dt_or_freq(dt: Option<f64>, freq: Option<f64>) -> Result<Option<Self>> {
        match (dt, freq) {
            (Some(_), Some(_)) => Err(AffError::InvalidArgument(
                "Unable to specify DT and FREQ simultaneously".into(),
            )),
            (Some(dt), None) => Self::from_dt(dt).map(Some),
            (None, Some(freq)) => Self::from_freq(freq).map(Some),
            (None, None) => Ok(None),
        }
    }

    /// Like [`Period::from_dt_or_freq`] but falls back to `default_freq` with a warning.
    pub fn resolve(
        dt: Option<f64>,
        freq: Option<f64>,
        default_freq: f64,
        what: &str,
    ) -> Result<Self> {
        match Self::from_dt_or_freq(dt, freq)? {
            Some(p) => Ok(p),
            None => {
                warn!("{what} frequency is not provided, set to default: {default_freq}");
                Self::from_freq(default_freq)
            }
        }
    }

    #[inline]
    pub fn dt(&self) -> f64 {
        self.dt
    }

    #[inline]
    pub fn freq(&self) -> f64 {
        self.freq
    }

    pub fn set_dt(&mut self, dt: f64) -> Result<()> {
        *self = Self::from_dt(dt)?;
        Ok(())
    }

    pub fn set_freq(&mut self, freq: f64) -> Result<()> {
        *self = Self::from_freq(freq)?;
        Ok(())
    }
}
