//! feedback.rs
//! Positional feedback laws producing antagonistic chamber commands.
//!
//! e = kP * (qdes - q) + kD * (dqdes - dq) + kI * sum(qdes - q)
//!
//! PID:  (stiff + e, stiff - e)
//! PIDF: (stiff + e - d, stiff - e + d), d = press_gain * (pa - pb)
//!
//! The integral accumulates on every update and is only cleared by
//! `reset_integral`.

use std::{fmt, str::FromStr};

use crate::config::{Gain, GainTable};
use crate::error::{AffError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedbackScheme {
    #[default]
    Pid,
    Pidf,
}

impl FeedbackScheme {
    /// Key of the gain table in the `ctrl` config section.
    pub fn config_key(&self) -> &'static str {
        match self {
            FeedbackScheme::Pid => "pid",
            FeedbackScheme::Pidf => "pidf",
        }
    }
}

impl FromStr for FeedbackScheme {
    type Err = AffError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "pid" | "PID" => Ok(FeedbackScheme::Pid),
            "pidf" | "PIDF" => Ok(FeedbackScheme::Pidf),
            other => Err(AffError::UnknownScheme(other.to_string())),
        }
    }
}

impl fmt::Display for FeedbackScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}

/// Per-joint gains, always stored at full `dof` length.
#[derive(Debug, Clone, PartialEq)]
pub struct Gains {
    pub kp: Vec<f64>,
    pub kd: Vec<f64>,
    pub ki: Vec<f64>,
    pub stiff: Vec<f64>,
    /// `None` means a unit gain on the pressure difference.
    pub press_gain: Option<Vec<f64>>,
}

impl Gains {
    pub fn zeros(dof: usize) -> Self {
        Self::uniform(dof, 0.0, 0.0, 0.0, 0.0)
    }

    pub fn uniform(dof: usize, kp: f64, kd: f64, ki: f64, stiff: f64) -> Self {
        Self {
            kp: vec![kp; dof],
            kd: vec![kd; dof],
            ki: vec![ki; dof],
            stiff: vec![stiff; dof],
            press_gain: None,
        }
    }

    pub fn from_table(table: &GainTable, dof: usize) -> Result<Self> {
        Ok(Self {
            kp: table.kp.broadcast(dof)?,
            kd: table.kd.broadcast(dof)?,
            ki: table.ki.broadcast(dof)?,
            stiff: table.stiff.broadcast(dof)?,
            press_gain: table.press_gain.as_ref().map(|g| g.broadcast(dof)).transpose()?,
        })
    }

    pub fn with_press_gain(mut self, press_gain: impl Into<Gain>) -> Result<Self> {
        let dof = self.kp.len();
        self.press_gain = Some(press_gain.into().broadcast(dof)?);
        Ok(self)
    }

    pub fn dof(&self) -> usize {
        self.kp.len()
    }

    /// Every gain vector must hold exactly `dof` values.
    pub fn check_shape(&self, dof: usize) -> Result<()> {
        for v in [&self.kp, &self.kd, &self.ki, &self.stiff] {
            check_len(dof, v)?;
        }
        if let Some(pg) = &self.press_gain {
            check_len(dof, pg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Feedback {
    scheme: FeedbackScheme,
    gains: Gains,
    accum_qerr: Vec<f64>,
}

fn check_len(expected: usize, v: &[f64]) -> Result<()> {
    if v.len() != expected {
        return Err(AffError::ShapeMismatch { expected, actual: v.len() });
    }
    Ok(())
}

impl Feedback {
    pub fn new(scheme: FeedbackScheme, gains: Gains) -> Self {
        let dof = gains.dof();
        Self { scheme, gains, accum_qerr: vec![0.0; dof] }
    }

    #[inline]
    pub fn scheme(&self) -> FeedbackScheme {
        self.scheme
    }

    #[inline]
    pub fn gains(&self) -> &Gains {
        &self.gains
    }

    pub fn set_gains(&mut self, gains: Gains) -> Result<()> {
        gains.check_shape(gains.dof())?;
        if gains.dof() != self.accum_qerr.len() {
            self.accum_qerr = vec![0.0; gains.dof()];
        }
        self.gains = gains;
        Ok(())
    }

    pub fn accumulated_error(&self) -> &[f64] {
        &self.accum_qerr
    }

    pub fn reset_integral(&mut self) {
        self.accum_qerr.iter_mut().for_each(|e| *e = 0.0);
    }

    pub fn positional_feedback(
        &mut self,
        q: &[f64],
        dq: &[f64],
        qdes: &[f64],
        dqdes: &[f64],
    ) -> Result<Vec<f64>> {
        let dof = self.accum_qerr.len();
        self.gains.check_shape(dof)?;
        for v in [q, dq, qdes, dqdes] {
            check_len(dof, v)?;
        }
        let g = &self.gains;
        Ok((0..dof)
            .map(|i| {
                let qerr = qdes[i] - q[i];
                self.accum_qerr[i] += qerr;
                g.kp[i] * qerr + g.kd[i] * (dqdes[i] - dq[i]) + g.ki[i] * self.accum_qerr[i]
            })
            .collect())
    }

    /// Chamber commands `(ca, cb)` in physical pressure units.
    pub fn update(
        &mut self,
        q: &[f64],
        dq: &[f64],
        pa: &[f64],
        pb: &[f64],
        qdes: &[f64],
        dqdes: &[f64],
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        let e = self.positional_feedback(q, dq, qdes, dqdes)?;
        let stiff = &self.gains.stiff;

        match self.scheme {
            FeedbackScheme::Pid => Ok((
                stiff.iter().zip(&e).map(|(s, e)| s + e).collect(),
                stiff.iter().zip(&e).map(|(s, e)| s - e).collect(),
            )),
            FeedbackScheme::Pidf => {
                check_len(e.len(), pa)?;
                check_len(e.len(), pb)?;
                let d: Vec<f64> = (0..e.len())
                    .map(|i| {
                        let k = self.gains.press_gain.as_ref().map_or(1.0, |g| g[i]);
                        k * (pa[i] - pb[i])
                    })
                    .collect();
                Ok((
                    (0..e.len()).map(|i| stiff[i] + e[i] - d[i]).collect(),
                    (0..e.len()).map(|i| stiff[i] - e[i] + d[i]).collect(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn scheme_names() {
        for n in ["pid", "PID"] {
            assert_eq!(n.parse::<FeedbackScheme>().unwrap(), FeedbackScheme::Pid);
        }
        for n in ["pidf", "PIDF"] {
            assert_eq!(n.parse::<FeedbackScheme>().unwrap(), FeedbackScheme::Pidf);
        }
        let err = "lqr".parse::<FeedbackScheme>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown feedback scheme: lqr");
    }

    #[test]
    fn proportional_only() {
        let mut fb = Feedback::new(FeedbackScheme::Pid, Gains::uniform(1, 1.0, 0.0, 0.0, 0.0));
        let e = fb.positional_feedback(&[0.0], &[0.0], &[5.0], &[0.0]).unwrap();
        assert_eq!(e, vec![5.0]);

        let mut fb = Feedback::new(FeedbackScheme::Pid, Gains::uniform(1, 1.0, 1.0, 0.0, 0.0));
        let e = fb.positional_feedback(&[0.0], &[2.0], &[5.0], &[0.0]).unwrap();
        assert_eq!(e, vec![3.0]);
    }

    #[test]
    fn integral_accumulates_across_calls() {
        let mut fb = Feedback::new(FeedbackScheme::Pid, Gains::uniform(1, 1.0, 1.0, 1.0, 0.0));
        let q = [0.0, 2.0, 4.0, 6.0, 8.0];
        let dq = [0.0, 4.0, 2.0, -2.0, -4.0];
        let expected = [10.0, 7.0, 8.0, 9.0, 6.0];
        for ((q, dq), e) in q.iter().zip(dq).zip(expected) {
            let out = fb.positional_feedback(&[*q], &[dq], &[5.0], &[0.0]).unwrap();
            assert_relative_eq!(out[0], e);
        }
        assert_eq!(fb.accumulated_error(), &[5.0]);
        fb.reset_integral();
        assert_eq!(fb.accumulated_error(), &[0.0]);
    }

    #[test]
    fn pid_commands_are_antagonistic() {
        let mut fb = Feedback::new(FeedbackScheme::Pid, Gains::uniform(2, 10.0, 0.0, 0.0, 150.0));
        let (ca, cb) = fb
            .update(&[0.0, 1.0], &[0.0; 2], &[9.0; 2], &[1.0; 2], &[1.0, 0.0], &[0.0; 2])
            .unwrap();
        assert_eq!(ca, vec![160.0, 140.0]);
        assert_eq!(cb, vec![140.0, 160.0]);
    }

    #[test]
    fn pidf_subtracts_pressure_difference() {
        let gains = Gains::uniform(2, 10.0, 0.0, 0.0, 150.0);
        let mut fb = Feedback::new(FeedbackScheme::Pidf, gains.clone());
        let (ca, cb) = fb
            .update(&[0.0; 2], &[0.0; 2], &[30.0, 10.0], &[10.0, 30.0], &[1.0; 2], &[0.0; 2])
            .unwrap();
        assert_eq!(ca, vec![140.0, 180.0]);
        assert_eq!(cb, vec![180.0, 120.0]);

        let mut fb = Feedback::new(FeedbackScheme::Pidf, gains.with_press_gain(0.5).unwrap());
        let (ca, cb) = fb
            .update(&[0.0; 2], &[0.0; 2], &[30.0, 10.0], &[10.0, 30.0], &[1.0; 2], &[0.0; 2])
            .unwrap();
        assert_eq!(ca, vec![150.0, 170.0]);
        assert_eq!(cb, vec![150.0, 130.0]);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let mut fb = Feedback::new(FeedbackScheme::Pid, Gains::zeros(3));
        let err = fb.positional_feedback(&[0.0; 2], &[0.0; 3], &[0.0; 3], &[0.0; 3]);
        assert!(matches!(err, Err(AffError::ShapeMismatch { expected: 3, actual: 2 })));
    }

    #[test]
    fn ragged_gains_are_rejected_not_indexed() {
        let ragged = Gains { kd: vec![1.0], ..Gains::uniform(3, 1.0, 1.0, 0.0, 0.0) };
        assert!(matches!(
            ragged.check_shape(3),
            Err(AffError::ShapeMismatch { expected: 3, actual: 1 })
        ));

        let mut fb = Feedback::new(FeedbackScheme::Pid, ragged.clone());
        let z = [0.0; 3];
        assert!(matches!(
            fb.update(&z, &z, &z, &z, &z, &z),
            Err(AffError::ShapeMismatch { expected: 3, actual: 1 })
        ));

        let mut fb = Feedback::new(FeedbackScheme::Pidf, Gains::zeros(3));
        assert!(fb.set_gains(ragged).is_err());
        let short_press = Gains { press_gain: Some(vec![0.5; 2]), ..Gains::zeros(3) };
        assert!(fb.set_gains(short_press).is_err());
        assert_eq!(fb.gains(), &Gains::zeros(3));
    }

    #[test]
    fn gains_from_config_table() {
        let table = GainTable {
            kp: Gain::Scalar(20.0),
            kd: Gain::PerJoint(vec![200.0]),
            ki: Gain::PerJoint(vec![1.0, 2.0, 3.0]),
            stiff: Gain::Scalar(150.0),
            press_gain: Some(Gain::Scalar(1.0)),
        };
        let g = Gains::from_table(&table, 3).unwrap();
        assert_eq!(g.kp, vec![20.0; 3]);
        assert_eq!(g.kd, vec![200.0; 3]);
        assert_eq!(g.ki, vec![1.0, 2.0, 3.0]);
        assert_eq!(g.press_gain, Some(vec![1.0; 3]));
        assert!(Gains::from_table(&table, 4).is_err());
    }
}
