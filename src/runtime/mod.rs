//! runtime: the sensor and control threads, plus per-cycle logging.

pub mod ctrl_thread;
pub mod logger;
pub mod state_thread;

pub use ctrl_thread::{AffCtrlThread, CtrlInputFn, TrajectoryFn};
pub use logger::{Logger, compose_row, header_labels};
pub use state_thread::{AffStateThread, StateSnapshot};
