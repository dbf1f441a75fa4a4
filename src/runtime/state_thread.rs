//! state_thread.rs
//! Sensor role: receives sensory frames and keeps the shared estimator current.
//!
//! Lifecycle: idle (calibration) -> signal readiness -> receive loop.
//! Frames are parsed outside the lock; only the estimator update and the
//! timestamp are done under it. Readers always get copies.
//! A malformed frame is logged, counted and skipped.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::comm::codec::parse_strict;
use crate::comm::transport::{DEFAULT_RECV_TIMEOUT, Transport, UdpTransport};
use crate::config::AffettoConfig;
use crate::error::{AffError, Result};
use crate::sensing::state::{AffState, IdleOptions, JointState};

/// Time-stamped copy of the estimator output, taken under one lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSnapshot {
    /// Seconds since the sensor thread started.
    pub t: f64,
    pub raw: JointState,
    pub state: JointState,
}

struct StateCore {
    state: AffState,
    current_time: f64,
}

enum IdleStatus {
    Pending,
    Idled,
    /// The error is moved out by `take_idle_error`; the status stays failed.
    Failed(Option<AffError>),
}

struct StateShared {
    core: Mutex<StateCore>,
    running: AtomicBool,
    alive: AtomicBool,
    idle: Mutex<IdleStatus>,
    idle_cv: Condvar,
    dropped: AtomicU64,
}

impl StateShared {
    fn is_idled(&self) -> bool {
        matches!(*self.idle.lock(), IdleStatus::Idled)
    }

    fn mark_idled(&self) {
        *self.idle.lock() = IdleStatus::Idled;
        self.idle_cv.notify_all();
    }

    fn mark_failed(&self, error: AffError) {
        *self.idle.lock() = IdleStatus::Failed(Some(error));
        self.idle_cv.notify_all();
    }
}

pub struct AffStateThread {
    dof: usize,
    shared: Arc<StateShared>,
    transport: Mutex<Option<Box<dyn Transport>>>,
    idle_opts: IdleOptions,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AffStateThread {
    pub fn new(state: AffState, transport: impl Transport + 'static) -> Self {
        let idle = if state.is_idled() { IdleStatus::Idled } else { IdleStatus::Pending };
        Self {
            dof: state.dof(),
            shared: Arc::new(StateShared {
                core: Mutex::new(StateCore { state, current_time: 0.0 }),
                running: AtomicBool::new(false),
                alive: AtomicBool::new(false),
                idle: Mutex::new(idle),
                idle_cv: Condvar::new(),
                dropped: AtomicU64::new(0),
            }),
            transport: Mutex::new(Some(Box::new(transport))),
            idle_opts: IdleOptions::default(),
            handle: Mutex::new(None),
        }
    }

    /// Binds a UDP receiver on `comm.local`.
    pub fn from_config(cfg: &AffettoConfig, dt: Option<f64>, freq: Option<f64>) -> Result<Self> {
        let state = AffState::from_config(cfg, dt, freq)?;
        let transport = UdpTransport::bind(cfg.local_addr()?, Some(DEFAULT_RECV_TIMEOUT))?;
        Ok(Self::new(state, transport))
    }

    pub fn with_idle_options(mut self, opts: IdleOptions) -> Self {
        self.idle_opts = opts;
        self
    }

    #[inline]
    pub fn dof(&self) -> usize {
        self.dof
    }

    pub fn freq(&self) -> f64 {
        self.shared.core.lock().state.freq()
    }

    pub fn dt(&self) -> f64 {
        self.shared.core.lock().state.dt()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Runs the calibration on the calling thread. Optional: `start` idles
    /// on its own when this has not been done.
    pub fn prepare(&self) -> Result<f64> {
        let mut guard = self.transport.lock();
        let transport = guard
            .as_mut()
            .ok_or_else(|| AffError::NotReady("state thread already started".into()))?;
        let mut state = self.shared.core.lock().state.clone();
        let observed = state.idle(transport, &self.idle_opts)?;
        self.shared.core.lock().state = state;
        self.shared.mark_idled();
        Ok(observed)
    }

    pub fn start(&self) -> Result<()> {
        let transport = self
            .transport
            .lock()
            .take()
            .ok_or_else(|| AffError::NotReady("state thread already started".into()))?;

        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.alive.store(true, Ordering::SeqCst);
        let shared = self.shared.clone();
        let opts = self.idle_opts;

        let spawned = thread::Builder::new()
            .name("affctrl-state".into())
            .spawn_with_priority(ThreadPriority::Max, move |prio| {
                if let Err(e) = prio {
                    debug!("state thread runs at default priority: {e:?}");
                }
                run(&shared, transport, &opts);
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

    /// Asks the loop to exit after the current receive.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }

    /// Stops and waits for the thread. The transport is closed on exit.
    pub fn join(&self) {
        self.stop();
        let handle = self.handle.lock().take();
        if let Some(h) = handle {
            if h.join().is_err() {
                error!("state thread panicked");
            }
        }
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.transport.lock().is_none()
    }

    pub fn is_idled(&self) -> bool {
        self.shared.is_idled()
    }

    /// Blocks until idling succeeds, fails, or `timeout` passes.
    /// Returns whether it succeeded; see [`AffStateThread::take_idle_error`] on failure.
    pub fn wait_for_idling(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut status = self.shared.idle.lock();
        while matches!(*status, IdleStatus::Pending) {
            if self.shared.idle_cv.wait_until(&mut status, deadline).timed_out() {
                break;
            }
        }
        matches!(*status, IdleStatus::Idled)
    }

    /// Whether the thread gave up during calibration.
    pub fn idle_failed(&self) -> bool {
        matches!(*self.shared.idle.lock(), IdleStatus::Failed(_))
    }

    /// The calibration error that ended the thread, handed out once.
    pub fn take_idle_error(&self) -> Option<AffError> {
        match &mut *self.shared.idle.lock() {
            IdleStatus::Failed(e) => e.take(),
            _ => None,
        }
    }

    /// Malformed frames skipped so far.
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn n_steps(&self) -> u64 {
        self.shared.core.lock().state.n_steps()
    }

    // ========================================================================
    // Snapshot accessors (each takes the lock and returns a copy)
    // ========================================================================

    pub fn snapshot(&self) -> StateSnapshot {
        let core = self.shared.core.lock();
        StateSnapshot {
            t: core.current_time,
            raw: core.state.raw_states(),
            state: core.state.states(),
        }
    }

    pub fn current_time(&self) -> f64 {
        self.shared.core.lock().current_time
    }

    pub fn get_states(&self) -> JointState {
        self.shared.core.lock().state.states()
    }

    pub fn get_raw_states(&self) -> JointState {
        self.shared.core.lock().state.raw_states()
    }

    pub fn q(&self) -> Vec<f64> {
        self.shared.core.lock().state.q().to_vec()
    }

    pub fn dq(&self) -> Vec<f64> {
        self.shared.core.lock().state.dq().to_vec()
    }

    pub fn pa(&self) -> Vec<f64> {
        self.shared.core.lock().state.pa().to_vec()
    }

    pub fn pb(&self) -> Vec<f64> {
        self.shared.core.lock().state.pb().to_vec()
    }

    pub fn raw_q(&self) -> Vec<f64> {
        self.shared.core.lock().state.raw_q().to_vec()
    }

    pub fn raw_dq(&self) -> Vec<f64> {
        self.shared.core.lock().state.raw_dq().to_vec()
    }

    pub fn raw_pa(&self) -> Vec<f64> {
        self.shared.core.lock().state.raw_pa().to_vec()
    }

    pub fn raw_pb(&self) -> Vec<f64> {
        self.shared.core.lock().state.raw_pb().to_vec()
    }
}

impl Drop for AffStateThread {
    fn drop(&mut self) {
        self.join();
    }
}

// ============================================================================
// Thread body
// ============================================================================

fn run(shared: &StateShared, mut transport: Box<dyn Transport>, opts: &IdleOptions) {
    if !shared.is_idled() {
        // Calibrate on a private copy so readers never wait on a receive.
        let mut state = shared.core.lock().state.clone();
        let result = state.idle_until(&mut transport, opts, || {
            shared.running.load(Ordering::SeqCst)
        });
        match result {
            Ok(_) => {
                shared.core.lock().state = state;
                shared.mark_idled();
            }
            Err(AffError::Cancelled) => {
                debug!("state thread: stopped while idling");
                transport.close();
                return;
            }
            Err(e) => {
                error!("state thread: idling failed: {e}");
                shared.mark_failed(e);
                transport.close();
                return;
            }
        }
    }

    let dof = shared.core.lock().state.dof();
    let origin = Instant::now();
    info!("state thread running: dof={dof}");

    while shared.running.load(Ordering::SeqCst) {
        let data = match transport.recv(opts.bufsize) {
            Ok(d) => d,
            Err(AffError::Timeout) => continue,
            Err(AffError::Cancelled) => {
                debug!("state thread: transport closed by peer");
                break;
            }
            Err(e) => {
                error!("state thread: receive failed: {e}");
                break;
            }
        };
        let frame = match parse_strict(&data, dof) {
            Ok(f) => f,
            Err(e) => {
                let n = shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("state thread: skipped malformed frame ({n} so far): {e}");
                continue;
            }
        };

        let mut core = shared.core.lock();
        if let Err(e) = core.state.update(&frame) {
            shared.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("state thread: update rejected: {e}");
            continue;
        }
        core.current_time = origin.elapsed().as_secs_f64();
    }

    transport.close();
    info!(
        "state thread exiting: dropped_frames={}",
        shared.dropped.load(Ordering::Relaxed)
    );
}
