//! ctrl.rs
//! AffCtrl: feedback scheme -> inactive-joint mask -> wire scaling.
//!
//! Masking works in physical pressure units; scaling to the wire range
//! `[0, 255]` is applied last and uniformly, override pressures included.

use log::info;

use crate::config::{AffettoConfig, CtrlConfig, InactiveJointConfig};
use crate::control::feedback::{Feedback, FeedbackScheme, Gains};
use crate::control::joints::{InactiveJoint, InactiveJointTable};
use crate::error::{AffError, Result};
use crate::timing::periodic::Period;

pub const DEFAULT_CTRL_FREQ: f64 = 30.0;
pub const WIRE_MAX: f64 = 255.0;

#[derive(Debug, Clone)]
pub struct AffCtrl {
    dof: usize,
    period: Period,
    input_range: Option<(f64, f64)>,
    feedback: Feedback,
    inactive: InactiveJointTable,
    ctrl_config: CtrlConfig,
}

impl AffCtrl {
    /// Unconfigured controller: zero PID gains, no input range, no inactive joints.
    pub fn new(dof: usize, dt: Option<f64>, freq: Option<f64>) -> Result<Self> {
        Ok(Self {
            dof,
            period: Period::resolve(dt, freq, DEFAULT_CTRL_FREQ, "Control")?,
            input_range: None,
            feedback: Feedback::new(FeedbackScheme::Pid, Gains::zeros(dof)),
            inactive: InactiveJointTable::new(dof),
            ctrl_config: CtrlConfig::default(),
        })
    }

    /// Builds from the `ctrl` section. Explicit `dt`/`freq` take precedence over the file.
    pub fn from_config(cfg: &AffettoConfig, dt: Option<f64>, freq: Option<f64>) -> Result<Self> {
        let ctrl = &cfg.ctrl;
        let (dt, freq) = if dt.is_some() || freq.is_some() {
            (dt, freq)
        } else {
            (ctrl.dt, ctrl.freq)
        };
        let mut this = Self::new(cfg.dof(), dt, freq)?;
        this.ctrl_config = ctrl.clone();

        if let Some([min, max]) = ctrl.input_range {
            this.set_input_range(min, max)?;
        }
        let scheme = ctrl.scheme.as_deref().unwrap_or("pid");
        this.load_feedback_scheme(scheme)?;
        this.inactive.load(&ctrl.inactive_joints);

        info!(
            "controller configured: dof={} freq={} scheme={} inactive={:?}",
            this.dof,
            this.period.freq(),
            this.feedback.scheme(),
            this.inactive.indices()
        );
        Ok(this)
    }

    #[inline]
    pub fn dof(&self) -> usize {
        self.dof
    }

    #[inline]
    pub fn dt(&self) -> f64 {
        self.period.dt()
    }

    #[inline]
    pub fn freq(&self) -> f64 {
        self.period.freq()
    }

    pub fn set_dt(&mut self, dt: f64) -> Result<()> {
        self.period.set_dt(dt)
    }

    pub fn set_freq(&mut self, freq: f64) -> Result<()> {
        self.period.set_freq(freq)
    }

    // ========================================================================
    // Scaling
    // ========================================================================

    pub fn input_range(&self) -> Option<(f64, f64)> {
        self.input_range
    }

    pub fn set_input_range(&mut self, min: f64, max: f64) -> Result<()> {
        if !min.is_finite() || !max.is_finite() || max <= min {
            return Err(AffError::InvalidArgument(format!(
                "input range must be finite with min < max: [{min}, {max}]"
            )));
        }
        self.input_range = Some((min, max));
        Ok(())
    }

    /// `255 / (max - min)`, or `None` when no input range is configured.
    pub fn scale_gain(&self) -> Option<f64> {
        self.input_range.map(|(min, max)| WIRE_MAX / (max - min))
    }

    /// Clips to the input range and maps it onto `[0, 255]`. Identity without a range.
    pub fn scale(&self, ca: &mut [f64], cb: &mut [f64]) {
        let Some((min, max)) = self.input_range else {
            return;
        };
        let gain = WIRE_MAX / (max - min);
        for x in ca.iter_mut().chain(cb.iter_mut()) {
            *x = (x.clamp(min, max) - min) * gain;
        }
    }

    // ========================================================================
    // Feedback scheme
    // ========================================================================

    pub fn feedback(&self) -> &Feedback {
        &self.feedback
    }

    pub fn scheme(&self) -> FeedbackScheme {
        self.feedback.scheme()
    }

    pub fn set_feedback(&mut self, scheme: FeedbackScheme, gains: Gains) -> Result<()> {
        gains.check_shape(self.dof)?;
        self.feedback = Feedback::new(scheme, gains);
        Ok(())
    }

    /// Switches scheme by name, taking gains from the loaded `ctrl` section.
    /// A scheme without a gain table runs with zero gains.
    pub fn load_feedback_scheme(&mut self, name: &str) -> Result<()> {
        let scheme: FeedbackScheme = name.parse()?;
        let gains = match self.ctrl_config.gains(scheme.config_key()) {
            Some(table) => Gains::from_table(table, self.dof)?,
            None => Gains::zeros(self.dof),
        };
        self.feedback = Feedback::new(scheme, gains);
        Ok(())
    }

    pub fn reset_integral(&mut self) {
        self.feedback.reset_integral();
    }

    // ========================================================================
    // Joint activation
    // ========================================================================

    pub fn inactive_joints(&self) -> &[InactiveJoint] {
        self.inactive.rows()
    }

    pub fn inactive_joint_table(&self) -> &InactiveJointTable {
        &self.inactive
    }

    pub fn inactive_joint_indices(&self) -> Vec<usize> {
        self.inactive.indices()
    }

    pub fn active_joints(&self) -> Vec<usize> {
        self.inactive.active_indices()
    }

    pub fn set_inactive_joints(&mut self, pattern: &str, pressure: f64) {
        self.inactive.set(pattern, pressure);
    }

    pub fn add_inactive_joints(&mut self, pattern: &str, pressure: f64) {
        self.inactive.add(pattern, pressure);
    }

    pub fn set_active_joints(&mut self, pattern: &str, pressure: f64) {
        self.inactive.set_active(pattern, pressure);
    }

    pub fn add_active_joints(&mut self, pattern: &str) {
        self.inactive.add_active(pattern);
    }

    pub fn reset_inactive_joints(&mut self) {
        self.inactive.reset();
    }

    pub fn load_inactive_joints(&mut self, entries: &[InactiveJointConfig]) {
        self.inactive.load(entries);
    }

    pub fn mask(&self, ca: &mut [f64], cb: &mut [f64]) {
        self.inactive.mask(ca, cb);
    }

    // ========================================================================
    // Control step
    // ========================================================================

    /// One control step; returns wire-range commands `(ca, cb)`.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        _t: f64,
        q: &[f64],
        dq: &[f64],
        pa: &[f64],
        pb: &[f64],
        qdes: &[f64],
        dqdes: &[f64],
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        let (mut ca, mut cb) = self.feedback.update(q, dq, pa, pb, qdes, dqdes)?;
        self.mask(&mut ca, &mut cb);
        self.scale(&mut ca, &mut cb);
        Ok((ca, cb))
    }

    /// Open-loop path: mask and scale externally supplied commands.
    pub fn apply_open_loop(&self, mut ca: Vec<f64>, mut cb: Vec<f64>) -> Result<(Vec<f64>, Vec<f64>)> {
        for v in [&ca, &cb] {
            if v.len() != self.dof {
                return Err(AffError::ShapeMismatch { expected: self.dof, actual: v.len() });
            }
        }
        self.mask(&mut ca, &mut cb);
        self.scale(&mut ca, &mut cb);
        Ok((ca, cb))
    }
}
