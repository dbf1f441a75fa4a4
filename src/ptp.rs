//! ptp.rs
//! Point-to-point reference trajectories.
//!
//! Every profile is a normalized progress function `s(t)` in `[0, 1]`;
//! joint values are `q0 + (qF - q0) * s(t)`. Before `t0` the trajectory holds
//! `q0`, from `t0 + T` on it holds `qF`. All four families are computed
//! per joint so trapezoidal parameters may differ between joints.

use std::{f64::consts::PI, str::FromStr};
use log::warn;

use crate::error::{AffError, Result};
use crate::timing::periodic::TOL;

const TWO_PI: f64 = 2.0 * PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    Triangular,
    Trapezoidal,
    Sinusoidal,
    Quintic,
}

impl FromStr for ProfileKind {
    type Err = AffError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "triangular velocity" | "triangular" | "tri" => Ok(Self::Triangular),
            "trapezoidal velocity" | "trapezoidal" | "trapez" | "tra" => Ok(Self::Trapezoidal),
            "sinusoidal velocity" | "sinusoidal" | "sin" => Ok(Self::Sinusoidal),
            "5th-degree polynomial" | "5th degree polynomial" | "5th-degree" | "5th degree"
            | "5th-order polynomial" | "5th order polynomial" | "5th-order" | "5th order"
            | "5th" => Ok(Self::Quintic),
            other => Err(AffError::UnknownProfile(other.to_string())),
        }
    }
}

/// Extra parameters for the trapezoidal family. A single element is
/// broadcast to every joint.
#[derive(Debug, Clone, Default)]
pub struct PtpOptions {
    /// Peak joint speed (joint units per second). Zero selects the default.
    pub vmax: Option<Vec<f64>>,
    /// Blend (acceleration) time in seconds. Zero selects the default.
    pub tb: Option<Vec<f64>>,
}

impl PtpOptions {
    pub fn vmax(v: impl Into<Vec<f64>>) -> Self {
        Self { vmax: Some(v.into()), tb: None }
    }

    pub fn tb(tb: impl Into<Vec<f64>>) -> Self {
        Self { vmax: None, tb: Some(tb.into()) }
    }
}

#[derive(Debug, Clone)]
enum Profile {
    Triangular,
    Sinusoidal,
    Quintic,
    /// Normalized peak velocity and blend time per joint.
    Trapezoidal { vm: Vec<f64>, tb: Vec<f64> },
}

#[derive(Debug, Clone)]
pub struct Ptp {
    q0: Vec<f64>,
    qf: Vec<f64>,
    duration: f64,
    t0: f64,
    kind: ProfileKind,
    profile: Profile,
    warnings: Vec<String>,
}

fn broadcast(values: &[f64], n: usize, what: &str) -> Result<Vec<f64>> {
    match values.len() {
        1 => Ok(vec![values[0]; n]),
        len if len == n => Ok(values.to_vec()),
        len => Err(AffError::InvalidArgument(format!(
            "{what} must have 1 or {n} elements, got {len}"
        ))),
    }
}

impl Ptp {
    pub fn new(
        q0: Vec<f64>,
        qf: Vec<f64>,
        duration: f64,
        t0: f64,
        profile_name: &str,
        opts: &PtpOptions,
    ) -> Result<Self> {
        let kind = profile_name.parse()?;
        Self::with_kind(q0, qf, duration, t0, kind, opts)
    }

    pub fn with_kind(
        q0: Vec<f64>,
        qf: Vec<f64>,
        duration: f64,
        t0: f64,
        kind: ProfileKind,
        opts: &PtpOptions,
    ) -> Result<Self> {
        if q0.len() != qf.len() {
            return Err(AffError::ShapeMismatch { expected: q0.len(), actual: qf.len() });
        }
        if duration <= TOL {
            return Err(AffError::InvalidArgument(format!(
                "duration must be positive: {duration}"
            )));
        }

        let mut warnings = Vec::new();
        let profile = match kind {
            ProfileKind::Triangular => Profile::Triangular,
            ProfileKind::Sinusoidal => Profile::Sinusoidal,
            ProfileKind::Quintic => Profile::Quintic,
            ProfileKind::Trapezoidal => {
                let (vm, tb) = trapezoid_params(&q0, &qf, duration, opts, &mut warnings)?;
                Profile::Trapezoidal { vm, tb }
            }
        };

        Ok(Self { q0, qf, duration, t0, kind, profile, warnings })
    }

    #[inline]
    pub fn q0(&self) -> &[f64] {
        &self.q0
    }

    #[inline]
    pub fn qf(&self) -> &[f64] {
        &self.qf
    }

    #[inline]
    pub fn duration(&self) -> f64 {
        self.duration
    }

    #[inline]
    pub fn t0(&self) -> f64 {
        self.t0
    }

    #[inline]
    pub fn end_time(&self) -> f64 {
        self.t0 + self.duration
    }

    #[inline]
    pub fn kind(&self) -> ProfileKind {
        self.kind
    }

    /// Truncation/reduction notices raised while resolving trapezoidal parameters.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Resolved blend times; `None` for non-trapezoidal profiles.
    pub fn tb(&self) -> Option<&[f64]> {
        match &self.profile {
            Profile::Trapezoidal { tb, .. } => Some(tb),
            _ => None,
        }
    }

    /// Resolved peak speeds in joint units; `None` for non-trapezoidal profiles.
    pub fn vmax(&self) -> Option<Vec<f64>> {
        match &self.profile {
            Profile::Trapezoidal { vm, .. } => Some(
                vm.iter()
                    .zip(self.q0.iter().zip(&self.qf))
                    .map(|(v, (a, b))| {
                        let dist = (b - a).abs();
                        if dist > TOL { v * dist } else { *v }
                    })
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn q(&self, t: f64) -> Vec<f64> {
        if t >= self.end_time() {
            return self.qf.clone();
        }
        self.eval(t, |q0, delta, (s, _, _)| q0 + delta * s)
    }

    pub fn dq(&self, t: f64) -> Vec<f64> {
        self.eval(t, |_, delta, (_, ds, _)| delta * ds)
    }

    pub fn ddq(&self, t: f64) -> Vec<f64> {
        self.eval(t, |_, delta, (_, _, dds)| delta * dds)
    }

    fn eval(&self, t: f64, f: impl Fn(f64, f64, (f64, f64, f64)) -> f64) -> Vec<f64> {
        let t_rel = t - self.t0;
        self.q0
            .iter()
            .zip(&self.qf)
            .enumerate()
            .map(|(i, (q0, qf))| f(*q0, qf - q0, self.progress(i, t_rel)))
            .collect()
    }

    /// `(s, ds/dt, d2s/dt2)` for joint `i` at time `t_rel` after `t0`.
    fn progress(&self, i: usize, t_rel: f64) -> (f64, f64, f64) {
        let big_t = self.duration;
        if t_rel < 0.0 {
            return (0.0, 0.0, 0.0);
        }
        if t_rel >= big_t {
            return (1.0, 0.0, 0.0);
        }
        let tau = t_rel / big_t;

        match &self.profile {
            Profile::Triangular => {
                let a = 4.0 / (big_t * big_t);
                if t_rel <= 0.5 * big_t {
                    (0.5 * a * t_rel * t_rel, a * t_rel, a)
                } else {
                    let r = big_t - t_rel;
                    (1.0 - 0.5 * a * r * r, a * r, -a)
                }
            }
            Profile::Sinusoidal => {
                let w = TWO_PI * tau;
                (
                    tau - w.sin() / TWO_PI,
                    (1.0 - w.cos()) / big_t,
                    TWO_PI * w.sin() / (big_t * big_t),
                )
            }
            Profile::Quintic => {
                let tau2 = tau * tau;
                let tau3 = tau2 * tau;
                (
                    tau3 * (6.0 * tau2 - 15.0 * tau + 10.0),
                    30.0 * tau2 * (tau - 1.0) * (tau - 1.0) / big_t,
                    60.0 * tau * (tau - 1.0) * (2.0 * tau - 1.0) / (big_t * big_t),
                )
            }
            Profile::Trapezoidal { vm, tb } => {
                let (vm, tb) = (vm[i], tb[i]);
                let a = vm / tb;
                if t_rel < tb {
                    (0.5 * a * t_rel * t_rel, a * t_rel, a)
                } else if t_rel < big_t - tb {
                    (vm * (t_rel - 0.5 * tb), vm, 0.0)
                } else {
                    let r = big_t - t_rel;
                    (1.0 - 0.5 * a * r * r, a * r, -a)
                }
            }
        }
    }
}

// ============================================================================
// Trapezoidal parameter resolution
// ============================================================================

/// Resolves normalized `(vM, tb)` per joint from either `vmax` or `tb`.
/// `vM` must lie in `(1/T, 2/T]`; equivalently `tb` in `[0, T/2]`.
fn trapezoid_params(
    q0: &[f64],
    qf: &[f64],
    big_t: f64,
    opts: &PtpOptions,
    warnings: &mut Vec<String>,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let n = q0.len();
    let default_vm = 1.5 / big_t;
    let max_vm = 2.0 / big_t;
    let mut note = |msg: String| {
        warn!("{msg}");
        warnings.push(msg);
    };

    if let Some(vmax) = &opts.vmax {
        let vmax = broadcast(vmax, n, "vmax")?;
        let mut vm = Vec::with_capacity(n);
        for (i, v) in vmax.iter().enumerate() {
            let dist = (qf[i] - q0[i]).abs();
            if v.abs() <= TOL || dist <= TOL {
                vm.push(default_vm);
                continue;
            }
            let normalized = v / dist;
            if normalized <= 1.0 / big_t {
                return Err(AffError::InvalidArgument(format!(
                    "Specified Vmax for q[{i}] is too small to reach desired position: {v}"
                )));
            }
            if normalized > max_vm {
                note(format!(
                    "Specified Vmax for q[{i}] is truncated: {v:?} -> {:?}",
                    max_vm * dist
                ));
                vm.push(max_vm);
            } else {
                vm.push(normalized);
            }
        }
        let tb = vm.iter().map(|v| big_t - 1.0 / v).collect();
        return Ok((vm, tb));
    }

    if let Some(tb) = &opts.tb {
        let tb = broadcast(tb, n, "tb")?;
        let mut resolved = Vec::with_capacity(n);
        for (i, t) in tb.iter().enumerate() {
            if t.abs() <= TOL {
                resolved.push(big_t / 3.0);
            } else if *t > 0.5 * big_t {
                note(format!(
                    "Specified Tb for q[{i}] is reduced: {t:?} -> {:?}",
                    0.5 * big_t
                ));
                resolved.push(0.5 * big_t);
            } else {
                resolved.push(*t);
            }
        }
        let vm = resolved.iter().map(|t| 1.0 / (big_t - t)).collect();
        return Ok((vm, resolved));
    }

    Err(AffError::InvalidArgument(
        "Require Vmax or Tb for trapezoidal velocity profile".into(),
    ))
}

// ============================================================================
// Waypoints: chained segments
// ============================================================================

/// A trajectory through successive joint-space waypoints, one PTP segment each.
#[derive(Debug, Clone)]
pub struct Waypoints {
    start: Vec<f64>,
    t0: f64,
    kind: ProfileKind,
    opts: PtpOptions,
    segments: Vec<Ptp>,
}

impl Waypoints {
    pub fn new(start: Vec<f64>, t0: f64, kind: ProfileKind, opts: PtpOptions) -> Self {
        Self { start, t0, kind, opts, segments: Vec::new() }
    }

    /// Appends a segment that reaches `target` `duration` seconds after the previous one ends.
    pub fn push(&mut self, target: Vec<f64>, duration: f64) -> Result<()> {
        let (from, begin) = match self.segments.last() {
            Some(last) => (last.qf().to_vec(), last.end_time()),
            None => (self.start.clone(), self.t0),
        };
        let seg = Ptp::with_kind(from, target, duration, begin, self.kind, &self.opts)?;
        self.segments.push(seg);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn end_time(&self) -> f64 {
        self.segments.last().map_or(self.t0, Ptp::end_time)
    }

    fn segment_at(&self, t: f64) -> Option<&Ptp> {
        self.segments
            .iter()
            .find(|s| t < s.end_time())
            .or(self.segments.last())
    }

    pub fn q(&self, t: f64) -> Vec<f64> {
        self.segment_at(t).map_or_else(|| self.start.clone(), |s| s.q(t))
    }

    pub fn dq(&self, t: f64) -> Vec<f64> {
        self.segment_at(t)
            .map_or_else(|| vec![0.0; self.start.len()], |s| s.dq(t))
    }

    pub fn ddq(&self, t: f64) -> Vec<f64> {
        self.segment_at(t)
            .map_or_else(|| vec![0.0; self.start.len()], |s| s.ddq(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn scalar(kind: &str, t0: f64, opts: PtpOptions) -> Ptp {
        Ptp::new(vec![0.0], vec![1.0], 5.0, t0, kind, &opts).unwrap()
    }

    #[test]
    fn selects_profile_by_name() {
        for name in ["triangular velocity", "triangular", "tri"] {
            assert_eq!(name.parse::<ProfileKind>().unwrap(), ProfileKind::Triangular);
        }
        for name in ["sinusoidal velocity", "sinusoidal", "sin"] {
            assert_eq!(name.parse::<ProfileKind>().unwrap(), ProfileKind::Sinusoidal);
        }
        for name in ["5th-degree polynomial", "5th degree", "5th"] {
            assert_eq!(name.parse::<ProfileKind>().unwrap(), ProfileKind::Quintic);
        }
        for name in ["tra", "trapez", "trapezoidal", "trapezoidal velocity"] {
            assert_eq!(name.parse::<ProfileKind>().unwrap(), ProfileKind::Trapezoidal);
        }
    }

    #[test]
    fn rejects_unknown_profile_name() {
        for name in ["hoge", "poly", "tria", "5th ordre"] {
            let err = Ptp::new(vec![0.0], vec![1.0], 5.0, 0.0, name, &PtpOptions::default())
                .unwrap_err();
            assert_eq!(err.to_string(), format!("Invalid profile name: {name}"));
        }
    }

    #[test]
    fn triangular_matches_reference_table() {
        let ptp = scalar("tri", 0.0, PtpOptions::default());
        let table = [
            (-1.0, 0.0, 0.0),
            (0.0, 0.0, 0.0),
            (1.0, 0.08, 0.16),
            (2.5, 0.5, 0.4),
            (4.0, 0.92, 0.16),
            (5.0, 1.0, 0.0),
            (6.0, 1.0, 0.0),
        ];
        for (t, q, dq) in table {
            assert_abs_diff_eq!(ptp.q(t)[0], q, epsilon = 1e-12);
            assert_abs_diff_eq!(ptp.dq(t)[0], dq, epsilon = 1e-12);
        }
    }

    #[test]
    fn triangular_respects_start_time() {
        let ptp = scalar("tri", 1.0, PtpOptions::default());
        assert_eq!(ptp.q(0.5), vec![0.0]);
        assert_abs_diff_eq!(ptp.q(2.0)[0], 0.08, epsilon = 1e-12);
        assert_abs_diff_eq!(ptp.q(3.5)[0], 0.5, epsilon = 1e-12);
        assert_eq!(ptp.q(6.0), vec![1.0]);
    }

    #[test]
    fn quintic_and_sinusoidal_have_zero_endpoint_velocity() {
        for name in ["5th", "sin", "tri"] {
            let ptp = Ptp::new(vec![0.5, -1.0], vec![2.0, 1.0], 3.0, 1.0, name, &PtpOptions::default())
                .unwrap();
            assert_eq!(ptp.q(1.0), vec![0.5, -1.0]);
            assert_eq!(ptp.q(4.0), vec![2.0, 1.0]);
            for v in ptp.dq(1.0).into_iter().chain(ptp.dq(4.0)) {
                assert_abs_diff_eq!(v, 0.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn quintic_midpoint_and_velocity() {
        let ptp = scalar("5th", 0.0, PtpOptions::default());
        assert_relative_eq!(ptp.q(2.5)[0], 0.5, epsilon = 1e-12);
        // 30 * 0.25 * 0.25 / 5
        assert_relative_eq!(ptp.dq(2.5)[0], 0.375, epsilon = 1e-12);
        assert_abs_diff_eq!(ptp.ddq(2.5)[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn sinusoidal_peak_velocity_at_midpoint() {
        let ptp = scalar("sin", 0.0, PtpOptions::default());
        assert_relative_eq!(ptp.q(2.5)[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(ptp.dq(2.5)[0], 2.0 / 5.0, epsilon = 1e-12);
        assert_relative_eq!(ptp.ddq(1.25)[0], TWO_PI / 25.0, epsilon = 1e-12);
    }

    #[test]
    fn trapezoidal_from_vmax() {
        let ptp = scalar("tra", 0.0, PtpOptions::vmax([0.25]));
        assert_eq!(ptp.vmax().unwrap(), vec![0.25]);
        assert_relative_eq!(ptp.tb().unwrap()[0], 1.0);
        let table = [
            (-1.0, 0.0, 0.0, 0.0),
            (0.0, 0.0, 0.0, 0.25),
            (0.5, 0.03125, 0.125, 0.25),
            (1.0, 0.125, 0.25, 0.0),
            (2.5, 0.5, 0.25, 0.0),
            (4.0, 0.875, 0.25, -0.25),
            (4.5, 0.96875, 0.125, -0.25),
            (5.0, 1.0, 0.0, 0.0),
            (6.0, 1.0, 0.0, 0.0),
        ];
        for (t, q, dq, ddq) in table {
            assert_abs_diff_eq!(ptp.q(t)[0], q, epsilon = 1e-12);
            assert_abs_diff_eq!(ptp.dq(t)[0], dq, epsilon = 1e-12);
            assert_abs_diff_eq!(ptp.ddq(t)[0], ddq, epsilon = 1e-12);
        }
    }

    #[test]
    fn trapezoidal_defaults_on_zero() {
        let ptp = Ptp::new(vec![0.0; 3], vec![1.0; 3], 6.0, 0.0, "tra", &PtpOptions::vmax([0.0]))
            .unwrap();
        assert_eq!(ptp.vmax().unwrap(), vec![0.25; 3]);
        for tb in ptp.tb().unwrap() {
            assert_relative_eq!(*tb, 2.0, epsilon = 1e-12);
        }

        let ptp = Ptp::new(vec![0.0; 2], vec![1.0; 2], 6.0, 0.0, "tra", &PtpOptions::tb([0.0, 8.0 / 3.0]))
            .unwrap();
        let vmax = ptp.vmax().unwrap();
        assert_relative_eq!(vmax[0], 0.25, epsilon = 1e-12);
        assert_relative_eq!(vmax[1], 0.3, epsilon = 1e-12);
    }

    #[test]
    fn trapezoidal_requires_vmax_or_tb() {
        let err = scalar_err("tra", PtpOptions::default());
        assert!(err.contains("Require Vmax or Tb for trapezoidal velocity profile"));
    }

    fn scalar_err(kind: &str, opts: PtpOptions) -> String {
        Ptp::new(vec![0.0], vec![1.0], 5.0, 0.0, kind, &opts)
            .unwrap_err()
            .to_string()
    }

    #[test]
    fn trapezoidal_rejects_too_small_vmax() {
        let err = Ptp::new(vec![0.0; 3], vec![1.0; 3], 5.0, 0.0, "tra", &PtpOptions::vmax([0.25, 0.1, 0.25]))
            .unwrap_err()
            .to_string();
        assert!(err.contains("Specified Vmax for q[1] is too small to reach desired position: 0.1"));
    }

    #[test]
    fn trapezoidal_truncates_large_vmax() {
        let ptp = Ptp::new(
            vec![0.0; 4],
            vec![1.0; 4],
            5.0,
            0.0,
            "tra",
            &PtpOptions::vmax([0.25, 0.5, 0.25, 0.6]),
        )
        .unwrap();
        assert_eq!(ptp.warnings().len(), 2);
        assert!(ptp.warnings()[0].contains("Specified Vmax for q[1] is truncated: 0.5 -> 0.4"));
        assert!(ptp.warnings()[1].contains("Specified Vmax for q[3] is truncated: 0.6 -> 0.4"));
        assert_eq!(ptp.vmax().unwrap(), vec![0.25, 0.4, 0.25, 0.4]);
    }

    #[test]
    fn trapezoidal_reduces_large_tb() {
        let ptp = Ptp::new(vec![0.0; 4], vec![1.0; 4], 5.0, 0.0, "tra", &PtpOptions::tb([4.0, 1.0, 2.0, 5.0]))
            .unwrap();
        assert_eq!(ptp.warnings().len(), 2);
        assert!(ptp.warnings()[0].contains("Specified Tb for q[0] is reduced: 4.0 -> 2.5"));
        assert!(ptp.warnings()[1].contains("Specified Tb for q[3] is reduced: 5.0 -> 2.5"));
        assert_eq!(ptp.tb().unwrap(), &[2.5, 1.0, 2.0, 2.5]);
    }

    #[test]
    fn trapezoidal_scales_with_distance() {
        // 2 units in 5 s at 0.5 units/s: normalized 0.25, blend 1 s
        let ptp = Ptp::new(vec![1.0], vec![3.0], 5.0, 0.0, "tra", &PtpOptions::vmax([0.5])).unwrap();
        assert_relative_eq!(ptp.tb().unwrap()[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(ptp.dq(2.5)[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(ptp.q(2.5)[0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn mismatched_endpoints_are_rejected() {
        let err = Ptp::new(vec![0.0; 2], vec![1.0; 3], 5.0, 0.0, "tri", &PtpOptions::default());
        assert!(matches!(err, Err(AffError::ShapeMismatch { expected: 2, actual: 3 })));
    }

    #[test]
    fn waypoints_chain_segments() {
        let mut wp = Waypoints::new(vec![0.0], 0.0, ProfileKind::Quintic, PtpOptions::default());
        assert_eq!(wp.q(1.0), vec![0.0]);
        wp.push(vec![1.0], 2.0).unwrap();
        wp.push(vec![-1.0], 4.0).unwrap();
        assert_eq!(wp.len(), 2);
        assert_relative_eq!(wp.end_time(), 6.0);
        assert_relative_eq!(wp.q(1.0)[0], 0.5, epsilon = 1e-12);
        assert_eq!(wp.q(2.0), vec![1.0]);
        assert_relative_eq!(wp.q(4.0)[0], 0.0, epsilon = 1e-12);
        assert_eq!(wp.q(10.0), vec![-1.0]);
        assert_eq!(wp.dq(10.0), vec![0.0]);
    }
}
