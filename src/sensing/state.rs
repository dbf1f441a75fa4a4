//! state.rs
//! AffState: raw sensory frame -> filtered joint state.
//!
//! Pipeline per frame: de-interleave (q, pa, pb) -> moving-average filter per
//! channel -> dq = (q - q_prev) / dt on the filtered angle.
//! Unfiltered values and their finite difference are kept alongside.

use std::time::Instant;
use log::{debug, info, warn};

use crate::comm::codec::{parse_strict, unzip_items, DEFAULT_BUFSIZE};
use crate::comm::transport::Transport;
use crate::config::AffettoConfig;
use crate::error::{AffError, Result};
use crate::filter::{Filter, DEFAULT_WINDOW};
use crate::timing::periodic::Period;

pub const DEFAULT_SENSOR_FREQ: f64 = 100.0;

/// Joint-space state vectors, each `dof` long.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JointState {
    pub q: Vec<f64>,
    pub dq: Vec<f64>,
    pub pa: Vec<f64>,
    pub pb: Vec<f64>,
}

impl JointState {
    pub fn zeros(dof: usize) -> Self {
        Self {
            q: vec![0.0; dof],
            dq: vec![0.0; dof],
            pa: vec![0.0; dof],
            pb: vec![0.0; dof],
        }
    }
}

#[derive(Debug, Clone)]
struct ChannelFilters {
    q: Filter<Vec<f64>>,
    pa: Filter<Vec<f64>>,
    pb: Filter<Vec<f64>>,
}

impl ChannelFilters {
    fn new(window: usize) -> Self {
        Self { q: Filter::new(window), pa: Filter::new(window), pb: Filter::new(window) }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IdleOptions {
    pub n_samples: usize,
    /// Allowed |configured - observed| frequency difference in Hz.
    pub freq_tolerance: f64,
    /// Report a mismatch as a warning instead of an error.
    pub no_error: bool,
    pub bufsize: usize,
}

impl Default for IdleOptions {
    fn default() -> Self {
        Self { n_samples: 100, freq_tolerance: 1.0, no_error: false, bufsize: DEFAULT_BUFSIZE }
    }
}

#[derive(Debug, Clone)]
pub struct AffState {
    dof: usize,
    period: Period,
    n_steps: u64,
    filters: Option<ChannelFilters>,
    raw: JointState,
    filtered: JointState,
    raw_q_prev: Option<Vec<f64>>,
    q_prev: Option<Vec<f64>>,
    idled: bool,
}

impl AffState {
    /// Estimator with the default 5-sample filter. Falls back to 100 Hz when
    /// neither `dt` nor `freq` is given.
    pub fn new(dof: usize, dt: Option<f64>, freq: Option<f64>) -> Result<Self> {
        Ok(Self {
            dof,
            period: Period::resolve(dt, freq, DEFAULT_SENSOR_FREQ, "Sensor")?,
            n_steps: 0,
            filters: Some(ChannelFilters::new(DEFAULT_WINDOW)),
            raw: JointState::zeros(dof),
            filtered: JointState::zeros(dof),
            raw_q_prev: None,
            q_prev: None,
            idled: false,
        })
    }

    /// Explicit `dt`/`freq` take precedence over the `state` section.
    pub fn from_config(cfg: &AffettoConfig, dt: Option<f64>, freq: Option<f64>) -> Result<Self> {
        let (dt, freq) = if dt.is_some() || freq.is_some() {
            (dt, freq)
        } else {
            (cfg.state.dt, cfg.state.freq)
        };
        Self::new(cfg.dof(), dt, freq)
    }

    /// `None` disables filtering: filtered values equal raw values.
    pub fn with_filter(mut self, window: Option<usize>) -> Self {
        self.filters = window.map(ChannelFilters::new);
        self
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

    /// Number of frames consumed so far.
    #[inline]
    pub fn n_steps(&self) -> u64 {
        self.n_steps
    }

    #[inline]
    pub fn is_idled(&self) -> bool {
        self.idled
    }

    pub fn q(&self) -> &[f64] {
        &self.filtered.q
    }

    pub fn dq(&self) -> &[f64] {
        &self.filtered.dq
    }

    pub fn pa(&self) -> &[f64] {
        &self.filtered.pa
    }

    pub fn pb(&self) -> &[f64] {
        &self.filtered.pb
    }

    pub fn raw_q(&self) -> &[f64] {
        &self.raw.q
    }

    pub fn raw_dq(&self) -> &[f64] {
        &self.raw.dq
    }

    pub fn raw_pa(&self) -> &[f64] {
        &self.raw.pa
    }

    pub fn raw_pb(&self) -> &[f64] {
        &self.raw.pb
    }

    pub fn states(&self) -> JointState {
        self.filtered.clone()
    }

    pub fn raw_states(&self) -> JointState {
        self.raw.clone()
    }

    /// Consumes one interleaved frame of `3 * dof` values.
    pub fn update(&mut self, frame: &[f64]) -> Result<()> {
        let expected = 3 * self.dof;
        if frame.len() != expected {
            return Err(AffError::ShapeMismatch { expected, actual: frame.len() });
        }
        let mut lines = unzip_items(frame, 3)?.into_iter();
        let (Some(q), Some(pa), Some(pb)) = (lines.next(), lines.next(), lines.next()) else {
            return Err(AffError::ShapeMismatch { expected, actual: frame.len() });
        };

        let (fq, fpa, fpb) = match self.filters.as_mut() {
            Some(f) => (f.q.update(&q), f.pa.update(&pa), f.pb.update(&pb)),
            None => (q.clone(), pa.clone(), pb.clone()),
        };

        let dt = self.period.dt();
        self.raw.dq = finite_difference(&q, self.raw_q_prev.as_deref(), dt);
        self.filtered.dq = finite_difference(&fq, self.q_prev.as_deref(), dt);

        self.raw_q_prev = Some(q.clone());
        self.q_prev = Some(fq.clone());
        self.raw.q = q;
        self.raw.pa = pa;
        self.raw.pb = pb;
        self.filtered.q = fq;
        self.filtered.pa = fpa;
        self.filtered.pb = fpb;
        self.n_steps += 1;
        Ok(())
    }

    /// Parses a wire datagram strictly, then updates.
    pub fn update_bytes(&mut self, data: &[u8]) -> Result<()> {
        let frame = parse_strict(data, self.dof)?;
        self.update(&frame)
    }

    /// Calibration: consumes `n_samples` frames and checks the observed rate.
    /// Returns the observed frequency.
    pub fn idle<T: Transport + ?Sized>(&mut self, transport: &mut T, opts: &IdleOptions) -> Result<f64> {
        self.idle_until(transport, opts, || true)
    }

    /// Like [`AffState::idle`]; receive timeouts are retried while `keep_going()` holds,
    /// otherwise the calibration ends with `Cancelled`.
    pub fn idle_until<T, F>(&mut self, transport: &mut T, opts: &IdleOptions, mut keep_going: F) -> Result<f64>
    where
        T: Transport + ?Sized,
        F: FnMut() -> bool,
    {
        info!("idling: collecting {} frames at {} Hz", opts.n_samples, self.freq());
        let mut arrivals: Vec<Instant> = Vec::with_capacity(opts.n_samples);

        while arrivals.len() < opts.n_samples {
            if !keep_going() {
                return Err(AffError::Cancelled);
            }
            let data = match transport.recv(opts.bufsize) {
                Ok(d) => d,
                Err(AffError::Timeout) => continue,
                Err(e) => return Err(e),
            };
            let now = Instant::now();
            match self.update_bytes(&data) {
                Ok(()) => arrivals.push(now),
                Err(e @ (AffError::Parse(_) | AffError::ShapeMismatch { .. })) => {
                    warn!("idling: skipped malformed frame: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        let observed = observed_frequency(&arrivals).unwrap_or(self.freq());
        debug!("idling: observed {observed:.3} Hz over {} frames", arrivals.len());

        if (self.freq() - observed).abs() > opts.freq_tolerance {
            if !opts.no_error {
                return Err(AffError::Calibration { expected: self.freq(), observed });
            }
            warn!(
                "sensor frequency mismatch: expected {:.2} Hz, observed {observed:.2} Hz",
                self.freq()
            );
        }
        self.idled = true;
        info!("idling finished");
        Ok(observed)
    }
}

fn finite_difference(cur: &[f64], prev: Option<&[f64]>, dt: f64) -> Vec<f64> {
    match prev {
        Some(prev) => cur.iter().zip(prev).map(|(c, p)| (c - p) / dt).collect(),
        None => vec![0.0; cur.len()],
    }
}

/// `(n - 1) / (last - first)` over arrival timestamps.
fn observed_frequency(arrivals: &[Instant]) -> Option<f64> {
    let (first, last) = (arrivals.first()?, arrivals.last()?);
    let span = last.duration_since(*first).as_secs_f64();
    (arrivals.len() > 1 && span > 0.0).then(|| (arrivals.len() - 1) as f64 / span)
}
