//! # affctrl
//! Control library for the Affetto pneumatic humanoid.
//!
//! Sensory frames arrive over UDP as interleaved `(q, pa, pb)` triplets per
//! joint. A sensor thread filters them into joint state; a control thread
//! runs a PID/PIDF law against a reference trajectory and sends antagonistic
//! chamber commands `(ca, cb)` back at a fixed rate.
//!
//! ## Layout
//! - `timing`: `Rate` loop pacing and `Period` (dt/freq) bookkeeping
//! - `filter`: incremental moving average
//! - `ptp`: point-to-point profiles and waypoint trajectories
//! - `comm`: wire codec and transports (UDP, in-process channels)
//! - `sensing`: `AffState` estimator with idle calibration
//! - `control`: feedback schemes, inactive joints, `AffCtrl`
//! - `runtime`: `AffStateThread`, `AffCtrlThread`, CSV logger
//! - `mock`: sensor gateway emulator

pub mod comm;
pub mod config;
pub mod control;
pub mod error;
pub mod filter;
pub mod mock;
pub mod ptp;
pub mod runtime;
pub mod sensing;
pub mod timing;

pub use config::AffettoConfig;
pub use control::{AffCtrl, FeedbackScheme, Gains};
pub use error::{AffError, Result};
pub use filter::Filter;
pub use mock::AffMock;
pub use ptp::{ProfileKind, Ptp, PtpOptions, Waypoints};
pub use runtime::{AffCtrlThread, AffStateThread, Logger};
pub use sensing::{AffState, JointState};
pub use timing::{Period, Rate};
