//! timing: loop pacing and dt/freq bookkeeping.

pub mod periodic;
pub mod rate;

pub use periodic::Period;
pub use rate::Rate;
