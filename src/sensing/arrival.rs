//! arrival.rs
//! Inter-arrival statistics of received frames.

use std::fmt;

use average::Variance;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrivalStats {
    /// Frames received.
    pub count: usize,
    /// Mean inter-arrival period in seconds.
    pub mean_period: f64,
    pub frequency: f64,
    /// Population variance of the period, s^2.
    pub variance: f64,
    pub std: f64,
}

impl ArrivalStats {
    /// `arrivals` are timestamps in seconds, in arrival order.
    /// Needs at least two frames.
    pub fn from_arrivals(arrivals: &[f64]) -> Option<Self> {
        if arrivals.len() < 2 {
            return None;
        }
        let periods: Variance = arrivals.windows(2).map(|w| w[1] - w[0]).collect();
        let mean_period = periods.mean();
        let variance = periods.population_variance();
        Some(Self {
            count: arrivals.len(),
            mean_period,
            frequency: if mean_period > 0.0 { 1.0 / mean_period } else { f64::INFINITY },
            variance,
            std: variance.sqrt(),
        })
    }
}

impl fmt::Display for ArrivalStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "frames:      {}", self.count)?;
        writeln!(f, "mean period: {:.6} s", self.mean_period)?;
        writeln!(f, "frequency:   {:.3} Hz", self.frequency)?;
        writeln!(f, "variance:    {:.3e} s^2", self.variance)?;
        write!(f, "std:         {:.6} s", self.std)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn needs_two_frames() {
        assert!(ArrivalStats::from_arrivals(&[]).is_none());
        assert!(ArrivalStats::from_arrivals(&[0.5]).is_none());
    }

    #[test]
    fn uniform_arrivals_have_no_jitter() {
        let t: Vec<f64> = (0..11).map(|i| i as f64 * 0.01).collect();
        let s = ArrivalStats::from_arrivals(&t).unwrap();
        assert_eq!(s.count, 11);
        assert_relative_eq!(s.mean_period, 0.01, epsilon = 1e-12);
        assert_relative_eq!(s.frequency, 100.0, epsilon = 1e-6);
        assert!(s.std < 1e-9);
    }

    #[test]
    fn alternating_periods() {
        let s = ArrivalStats::from_arrivals(&[0.0, 0.01, 0.04, 0.05, 0.08]).unwrap();
        assert_relative_eq!(s.mean_period, 0.02, epsilon = 1e-12);
        assert_relative_eq!(s.variance, 1e-4, epsilon = 1e-12);
        assert_relative_eq!(s.std, 0.01, epsilon = 1e-9);
    }
}
