//! filter.rs
//! Causal moving-average filter over scalar or per-joint vector samples.
//!
//! Incremental moving sum: each update costs O(1) regardless of window size.
//! The window starts filled with zeros, so the first N outputs ramp up.

use std::collections::VecDeque;

pub const DEFAULT_WINDOW: usize = 5;

/// Sample types the filter can average.
pub trait Sample: Clone {
    /// A zero value with the same shape as `self`.
    fn zeros_like(&self) -> Self;
    /// `self += incoming - outgoing`.
    fn accumulate(&mut self, incoming: &Self, outgoing: &Self);
    fn scaled(&self, factor: f64) -> Self;
}

impl Sample for f64 {
    fn zeros_like(&self) -> Self {
        0.0
    }

    fn accumulate(&mut self, incoming: &Self, outgoing: &Self) {
        *self += incoming - outgoing;
    }

    fn scaled(&self, factor: f64) -> Self {
        self * factor
    }
}

impl Sample for Vec<f64> {
    fn zeros_like(&self) -> Self {
        vec![0.0; self.len()]
    }

    fn accumulate(&mut self, incoming: &Self, outgoing: &Self) {
        for ((y, x), x_old) in self.iter_mut().zip(incoming).zip(outgoing) {
            *y += x - x_old;
        }
    }

    fn scaled(&self, factor: f64) -> Self {
        self.iter().map(|v| v * factor).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Filter<T: Sample> {
    n: usize,
    buffer: VecDeque<T>,
    y_prev: Option<T>,
}

impl<T: Sample> Filter<T> {
    /// A window of zero is bumped to one.
    pub fn new(n: usize) -> Self {
        let n = n.max(1);
        Self {
            n,
            buffer: VecDeque::with_capacity(n + 1),
            y_prev: None,
        }
    }

    #[inline]
    pub fn window(&self) -> usize {
        self.n
    }

    pub fn update(&mut self, x: &T) -> T {
        // Zero buffer takes its shape from the first sample
        let y_prev = self.y_prev.get_or_insert_with(|| {
            let zero = x.zeros_like();
            self.buffer.extend(std::iter::repeat_n(zero.clone(), self.n));
            zero
        });

        self.buffer.push_back(x.clone());
        if let Some(x_old) = self.buffer.pop_front() {
            y_prev.accumulate(x, &x_old);
        }
        y_prev.scaled(1.0 / self.n as f64)
    }
}

impl<T: Sample> Default for Filter<T> {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
