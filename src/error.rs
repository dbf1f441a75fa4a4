//! error.rs
//! Crate-wide error type.
//!
//! Configuration and profile-selection errors surface at construction time.
//! Hot-loop errors (timeouts, malformed frames) are returned to the owning
//! thread, which decides whether to skip or stop.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AffError>;

#[derive(Error, Debug)]
pub enum AffError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("Unknown feedback scheme: {0}")]
    UnknownScheme(String),

    #[error("Invalid profile name: {0}")]
    UnknownProfile(String),

    /// Observed sensor rate differs from the configured one beyond tolerance.
    #[error("sensor frequency mismatch: expected {expected:.2} Hz, observed {observed:.2} Hz")]
    Calibration { expected: f64, observed: f64 },

    #[error("malformed data: {0}")]
    Parse(String),

    #[error("shape mismatch: expected {expected} items, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("not ready: {0}")]
    NotReady(String),

    #[error("receive timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}
