//! sensing: sensory-state estimation.

pub mod arrival;
pub mod state;

pub use arrival::ArrivalStats;
pub use state::{AffState, IdleOptions, JointState, DEFAULT_SENSOR_FREQ};
