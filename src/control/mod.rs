//! control: feedback laws, joint activation and the command pipeline.

pub mod ctrl;
pub mod feedback;
pub mod joints;

pub use ctrl::{AffCtrl, DEFAULT_CTRL_FREQ};
pub use feedback::{Feedback, FeedbackScheme, Gains};
pub use joints::{parse_lenient, InactiveJoint, InactiveJointTable};
