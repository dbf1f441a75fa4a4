//! ctrl_thread.rs
//! Control role: paces the controller, sends commands and logs each cycle.
//!
//! Per cycle:
//! - take one state snapshot from the sensor thread (its own lock)
//! - under the control lock: stamp `current_time`, evaluate the reference
//!   (or open-loop input) and run `AffCtrl::update`
//! - send the commands, push a log row, sleep out the period
//!
//! Reference callbacks run while the control lock is held; they must not block.

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::comm::codec::encode_command;
use crate::comm::transport::{Transport, UdpTransport};
use crate::config::{AffettoConfig, Gain};
use crate::control::ctrl::AffCtrl;
use crate::control::feedback::{FeedbackScheme, Gains};
use crate::error::{AffError, Result};
use crate::runtime::logger::{Logger, compose_row, header_labels};
use crate::runtime::state_thread::AffStateThread;
use crate::sensing::state::JointState;
use crate::timing::rate::Rate;

/// Reference trajectory: time in seconds -> joint vector.
pub type TrajectoryFn = Box<dyn FnMut(f64) -> Vec<f64> + Send>;
/// Open-loop input: time in seconds -> `(ca, cb)` in physical units.
pub type CtrlInputFn = Box<dyn FnMut(f64) -> (Vec<f64>, Vec<f64>) + Send>;

enum CtrlInput {
    Feedback { qdes: TrajectoryFn, dqdes: TrajectoryFn },
    OpenLoop(CtrlInputFn),
}

/// Result of one control step.
struct Cycle {
    ca: Vec<f64>,
    cb: Vec<f64>,
    qdes: Vec<f64>,
    dqdes: Vec<f64>,
}

struct CtrlCore {
    ctrl: AffCtrl,
    input: CtrlInput,
    current_time: f64,
}

impl CtrlCore {
    fn step(&mut self, t: f64, s: &JointState) -> Result<Cycle> {
        self.current_time = t;
        match &mut self.input {
            CtrlInput::Feedback { qdes, dqdes } => {
                let qdes = qdes(t);
                let dqdes = dqdes(t);
                let (ca, cb) = self.ctrl.update(t, &s.q, &s.dq, &s.pa, &s.pb, &qdes, &dqdes)?;
                Ok(Cycle { ca, cb, qdes, dqdes })
            }
            CtrlInput::OpenLoop(input) => {
                let (ca, cb) = input(t);
                let (ca, cb) = self.ctrl.apply_open_loop(ca, cb)?;
                let dof = self.ctrl.dof();
                Ok(Cycle { ca, cb, qdes: vec![0.0; dof], dqdes: vec![0.0; dof] })
            }
        }
    }
}

fn constant_trajectory(q0: Vec<f64>) -> CtrlInput {
    let dof = q0.len();
    CtrlInput::Feedback {
        qdes: Box::new(move |_| q0.clone()),
        dqdes: Box::new(move |_| vec![0.0; dof]),
    }
}

struct CtrlShared {
    core: Mutex<CtrlCore>,
    running: AtomicBool,
    alive: AtomicBool,
    cycles: AtomicU64,
    send_errors: AtomicU64,
}

pub struct AffCtrlThread {
    dof: usize,
    shared: Arc<CtrlShared>,
    state: Arc<AffStateThread>,
    transport: Mutex<Option<Box<dyn Transport>>>,
    logger: Option<Arc<Logger>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AffCtrlThread {
    /// The reference starts as a constant zero trajectory.
    pub fn new(ctrl: AffCtrl, state: Arc<AffStateThread>, transport: impl Transport + 'static) -> Self {
        let dof = ctrl.dof();
        Self {
            dof,
            shared: Arc::new(CtrlShared {
                core: Mutex::new(CtrlCore {
                    ctrl,
                    input: constant_trajectory(vec![0.0; dof]),
                    current_time: 0.0,
                }),
                running: AtomicBool::new(false),
                alive: AtomicBool::new(false),
                cycles: AtomicU64::new(0),
                send_errors: AtomicU64::new(0),
            }),
            state,
            transport: Mutex::new(Some(Box::new(transport))),
            logger: None,
            handle: Mutex::new(None),
        }
    }

    /// Controller and sensor thread from one config; commands go to `comm.remote`.
    pub fn from_config(
        cfg: &AffettoConfig,
        dt: Option<f64>,
        freq: Option<f64>,
        sensor_dt: Option<f64>,
        sensor_freq: Option<f64>,
    ) -> Result<Self> {
        let ctrl = AffCtrl::from_config(cfg, dt, freq)?;
        let state = AffStateThread::from_config(cfg, sensor_dt, sensor_freq)?;
        let transport = UdpTransport::sender(cfg.remote_addr()?)?;
        Ok(Self::new(ctrl, Arc::new(state), transport))
    }

    /// Records every cycle, reference included, to a CSV file at `path`.
    pub fn with_logger(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let logger = Logger::start(path, header_labels(self.dof, true))?;
        self.logger = Some(Arc::new(logger));
        Ok(self)
    }

    pub fn logger(&self) -> Option<&Logger> {
        self.logger.as_deref()
    }

    pub fn state(&self) -> &Arc<AffStateThread> {
        &self.state
    }

    #[inline]
    pub fn dof(&self) -> usize {
        self.dof
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Starts the sensor thread when it is not running yet, then the control loop.
    pub fn start(&self) -> Result<()> {
        let transport = self
            .transport
            .lock()
            .take()
            .ok_or_else(|| AffError::NotReady("control thread already started".into()))?;

        if !self.state.is_started() {
            self.state.start()?;
        }

        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.alive.store(true, Ordering::SeqCst);
        let shared = self.shared.clone();
        let state = self.state.clone();
        let logger = self.logger.clone();

        let spawned = thread::Builder::new()
            .name("affctrl-ctrl".into())
            .spawn_with_priority(ThreadPriority::Max, move |prio| {
                if let Err(e) = prio {
                    debug!("control thread runs at default priority: {e:?}");
                }
                run(&shared, &state, transport, logger.as_deref());
                shared.alive.store(false, Ordering::SeqCst);
            });
        match spawned {
            Ok(handle) => {
                *self.handle.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                self.shared.alive.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }

    /// Stops the control loop, then the sensor thread, then flushes the log.
    pub fn join(&self) {
        self.stop();
        let handle = self.handle.lock().take();
        if let Some(h) = handle {
            if h.join().is_err() {
                error!("control thread panicked");
            }
        }
        self.state.join();
        if let Some(logger) = &self.logger {
            match logger.stop() {
                Ok(0) => {}
                Ok(n) => info!("log written: {} ({n} rows)", logger.path().display()),
                Err(e) => error!("log flush failed: {e}"),
            }
        }
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    pub fn wait_for_idling(&self, timeout: Duration) -> bool {
        self.state.wait_for_idling(timeout)
    }

    pub fn cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::Relaxed)
    }

    pub fn send_errors(&self) -> u64 {
        self.shared.send_errors.load(Ordering::Relaxed)
    }

    // ========================================================================
    // Reference and input
    // ========================================================================

    pub fn set_trajectory<Q, D>(&self, qdes: Q, dqdes: D)
    where
        Q: FnMut(f64) -> Vec<f64> + Send + 'static,
        D: FnMut(f64) -> Vec<f64> + Send + 'static,
    {
        self.shared.core.lock().input = CtrlInput::Feedback {
            qdes: Box::new(qdes),
            dqdes: Box::new(dqdes),
        };
    }

    /// Holds the joints at `q0` with zero velocity. A scalar (or one-element
    /// vector) applies to every joint; otherwise `q0` needs one value per joint.
    pub fn reset_trajectory(&self, q0: impl Into<Gain>) -> Result<()> {
        let q0 = q0.into().broadcast(self.dof)?;
        self.shared.core.lock().input = constant_trajectory(q0);
        Ok(())
    }

    /// Bypasses feedback: commands come straight from `input`, then get masked and scaled.
    pub fn set_ctrl_input<F>(&self, input: F)
    where
        F: FnMut(f64) -> (Vec<f64>, Vec<f64>) + Send + 'static,
    {
        self.shared.core.lock().input = CtrlInput::OpenLoop(Box::new(input));
    }

    // ========================================================================
    // Locked accessors
    // ========================================================================

    pub fn current_time(&self) -> f64 {
        self.shared.core.lock().current_time
    }

    pub fn dt(&self) -> f64 {
        self.shared.core.lock().ctrl.dt()
    }

    pub fn freq(&self) -> f64 {
        self.shared.core.lock().ctrl.freq()
    }

    /// Takes effect on the next `start`.
    pub fn set_freq(&self, freq: f64) -> Result<()> {
        self.shared.core.lock().ctrl.set_freq(freq)
    }

    /// Takes effect on the next `start`.
    pub fn set_dt(&self, dt: f64) -> Result<()> {
        self.shared.core.lock().ctrl.set_dt(dt)
    }

    pub fn q(&self) -> Vec<f64> {
        self.state.q()
    }

    pub fn dq(&self) -> Vec<f64> {
        self.state.dq()
    }

    pub fn pa(&self) -> Vec<f64> {
        self.state.pa()
    }

    pub fn pb(&self) -> Vec<f64> {
        self.state.pb()
    }

    pub fn scheme(&self) -> FeedbackScheme {
        self.shared.core.lock().ctrl.scheme()
    }

    pub fn gains(&self) -> Gains {
        self.shared.core.lock().ctrl.feedback().gains().clone()
    }

    pub fn load_feedback_scheme(&self, name: &str) -> Result<()> {
        self.shared.core.lock().ctrl.load_feedback_scheme(name)
    }

    pub fn set_feedback(&self, scheme: FeedbackScheme, gains: Gains) -> Result<()> {
        self.shared.core.lock().ctrl.set_feedback(scheme, gains)
    }

    pub fn reset_integral(&self) {
        self.shared.core.lock().ctrl.reset_integral();
    }

    pub fn inactive_joints(&self) -> Vec<usize> {
        self.shared.core.lock().ctrl.inactive_joint_indices()
    }

    pub fn active_joints(&self) -> Vec<usize> {
        self.shared.core.lock().ctrl.active_joints()
    }

    pub fn set_inactive_joints(&self, pattern: &str, pressure: f64) {
        self.shared.core.lock().ctrl.set_inactive_joints(pattern, pressure);
    }

    pub fn add_inactive_joints(&self, pattern: &str, pressure: f64) {
        self.shared.core.lock().ctrl.add_inactive_joints(pattern, pressure);
    }

    pub fn set_active_joints(&self, pattern: &str, pressure: f64) {
        self.shared.core.lock().ctrl.set_active_joints(pattern, pressure);
    }

    pub fn add_active_joints(&self, pattern: &str) {
        self.shared.core.lock().ctrl.add_active_joints(pattern);
    }

    pub fn reset_inactive_joints(&self) {
        self.shared.core.lock().ctrl.reset_inactive_joints();
    }
}

impl Drop for AffCtrlThread {
    fn drop(&mut self) {
        self.join();
    }
}

// ============================================================================
// Thread body
// ============================================================================

fn run(
    shared: &CtrlShared,
    state: &AffStateThread,
    mut transport: Box<dyn Transport>,
    logger: Option<&Logger>,
) {
    let freq = shared.core.lock().ctrl.freq();
    let mut rate = match Rate::new(freq) {
        Ok(r) => r,
        Err(e) => {
            error!("control thread: {e}");
            transport.close();
            return;
        }
    };
    info!("control thread running: freq={freq} Hz");

    let mut warned = false;
    rate.start();
    while shared.running.load(Ordering::SeqCst) {
        let t = rate.now();
        if !warned && !state.is_idled() {
            warn!("control started before sensor idling finished; using last known state");
            warned = true;
        }

        let snap = state.snapshot();
        let step = shared.core.lock().step(t, &snap.state);
        let cycle = match step {
            Ok(c) => c,
            Err(e) => {
                error!("control thread: update failed at t={t:.3}: {e}");
                break;
            }
        };

        let sent = encode_command(&cycle.ca, &cycle.cb).and_then(|data| transport.send(&data));
        match sent {
            Ok(_) => {}
            Err(AffError::Cancelled) => {
                debug!("control thread: command peer closed");
                break;
            }
            Err(e) => {
                let n = shared.send_errors.fetch_add(1, Ordering::Relaxed) + 1;
                if n == 1 {
                    warn!("control thread: send failed: {e}");
                }
            }
        }

        if let Some(logger) = logger {
            let row = compose_row(
                t,
                &snap.raw,
                &snap.state,
                &cycle.ca,
                &cycle.cb,
                Some((&cycle.qdes, &cycle.dqdes)),
            );
            if let Err(e) = logger.push(row) {
                debug!("control thread: log row rejected: {e}");
            }
        }

        shared.cycles.fetch_add(1, Ordering::Relaxed);
        rate.sleep();
    }

    transport.close();
    info!(
        "control thread exiting: cycles={} overruns={}",
        shared.cycles.load(Ordering::Relaxed),
        rate.overrun_count()
    );
}
