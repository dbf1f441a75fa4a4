//! config.rs
//! `[affetto]` configuration tree, loaded from TOML.
//!
//! Scalars given for per-joint quantities are broadcast to `dof` when the
//! consumer asks for a vector. `dof` comes from the kinematic chain: the number
//! of revolute or prismatic links.

use serde::Deserialize;
use std::{fs, net::SocketAddr, path::Path};
use log::warn;

use crate::comm::transport::resolve;
use crate::error::{AffError, Result};
use crate::mock::DEFAULT_MOCK_RATE;

pub const DEFAULT_DOF: usize = 13;
pub const DEFAULT_NAME: &str = "affetto";

#[derive(Debug, Deserialize)]
struct ConfigFile {
    affetto: AffettoConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AffettoConfig {
    pub name: Option<String>,
    pub chain: Option<ChainConfig>,
    pub comm: CommConfig,
    pub ctrl: CtrlConfig,
    pub state: StateConfig,
    pub mock: Option<MockConfig>,
    #[serde(skip)]
    dof: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChainConfig {
    #[serde(default)]
    pub link: Vec<LinkConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub jointtype: String,
    #[serde(default)]
    pub parent: Option<String>,
}

impl ChainConfig {
    pub fn dof(&self) -> usize {
        self.link
            .iter()
            .filter(|l| matches!(l.jointtype.as_str(), "revolute" | "prismatic"))
            .count()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddrConfig {
    pub host: String,
    pub port: u16,
}

impl AddrConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        resolve(&self.host, self.port)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommConfig {
    /// Where sensory frames are received.
    pub local: Option<AddrConfig>,
    /// Where commands are sent.
    pub remote: Option<AddrConfig>,
}

/// A gain given either once for all joints or per joint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Gain {
    Scalar(f64),
    PerJoint(Vec<f64>),
}

impl Default for Gain {
    fn default() -> Self {
        Gain::Scalar(0.0)
    }
}

impl Gain {
    pub fn broadcast(&self, dof: usize) -> Result<Vec<f64>> {
        match self {
            Gain::Scalar(v) => Ok(vec![*v; dof]),
            Gain::PerJoint(v) if v.len() == 1 => Ok(vec![v[0]; dof]),
            Gain::PerJoint(v) if v.len() == dof => Ok(v.clone()),
            Gain::PerJoint(v) => Err(AffError::ShapeMismatch { expected: dof, actual: v.len() }),
        }
    }
}

impl From<f64> for Gain {
    fn from(v: f64) -> Self {
        Gain::Scalar(v)
    }
}

impl From<Vec<f64>> for Gain {
    fn from(v: Vec<f64>) -> Self {
        Gain::PerJoint(v)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GainTable {
    #[serde(rename = "kP")]
    pub kp: Gain,
    #[serde(rename = "kD")]
    pub kd: Gain,
    #[serde(rename = "kI")]
    pub ki: Gain,
    pub stiff: Gain,
    pub press_gain: Option<Gain>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum JointIndex {
    Index(i64),
    Pattern(String),
}

impl JointIndex {
    /// Pattern text understood by the joint-selection parser.
    /// `None` for a negative index, which names no joint.
    pub fn as_pattern(&self) -> Option<String> {
        match self {
            JointIndex::Index(i) if *i < 0 => None,
            JointIndex::Index(i) => Some(i.to_string()),
            JointIndex::Pattern(p) => Some(p.clone()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InactiveJointConfig {
    pub index: JointIndex,
    #[serde(default)]
    pub pressure: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CtrlConfig {
    pub dt: Option<f64>,
    pub freq: Option<f64>,
    pub input_range: Option<[f64; 2]>,
    pub scheme: Option<String>,
    pub pid: Option<GainTable>,
    pub pidf: Option<GainTable>,
    pub inactive_joints: Vec<InactiveJointConfig>,
}

impl CtrlConfig {
    /// Gain table stored under `key` (`pid` or `pidf`).
    pub fn gains(&self, key: &str) -> Option<&GainTable> {
        match key {
            "pid" => self.pid.as_ref(),
            "pidf" => self.pidf.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub dt: Option<f64>,
    pub freq: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    /// Where the mock listens for commands.
    pub local: Option<AddrConfig>,
    /// Where the mock sends sensory frames.
    pub remote: Option<AddrConfig>,
    pub sensor: MockSensorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MockSensorConfig {
    pub rate: f64,
}

impl Default for MockSensorConfig {
    fn default() -> Self {
        Self { rate: DEFAULT_MOCK_RATE }
    }
}

impl AffettoConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text)?;
        let mut cfg = file.affetto;
        cfg.resolve_dof();
        Ok(cfg)
    }

    /// An empty configuration with the given number of joints.
    pub fn with_dof(dof: usize) -> Self {
        Self { dof, ..Self::default() }
    }

    fn resolve_dof(&mut self) {
        self.dof = match &self.chain {
            Some(chain) => chain.dof(),
            None => {
                warn!("'chain' field is not defined");
                DEFAULT_DOF
            }
        };
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_NAME)
    }

    pub fn dof(&self) -> usize {
        if self.dof == 0 && self.chain.is_none() {
            DEFAULT_DOF
        } else {
            self.dof
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.comm
            .local
            .as_ref()
            .ok_or_else(|| AffError::Config("comm.local is not defined".into()))?
            .socket_addr()
    }

    pub fn remote_addr(&self) -> Result<SocketAddr> {
        self.comm
            .remote
            .as_ref()
            .ok_or_else(|| AffError::Config("comm.remote is not defined".into()))?
            .socket_addr()
    }
}
