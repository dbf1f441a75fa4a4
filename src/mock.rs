//! mock.rs
//! Stand-in for the robot's sensor gateway.
//!
//! Emits random `3 * dof` integer frames in `[0, 256)` at a fixed rate and
//! drains whatever commands are sent back to it. Useful for exercising the
//! control stack without hardware.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
};

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rand::random_range;

use crate::comm::codec::{DEFAULT_BUFSIZE, Strip, encode_data, split_data};
use crate::comm::transport::{DEFAULT_RECV_TIMEOUT, Transport, UdpTransport};
use crate::config::AffettoConfig;
use crate::error::{AffError, Result};
use crate::timing::rate::Rate;

pub const DEFAULT_MOCK_RATE: f64 = 100.0;

/// One random sensory frame.
pub fn random_frame(dof: usize) -> Vec<f64> {
    (0..3 * dof).map(|_| f64::from(random_range(0u16..256))).collect()
}

struct MockShared {
    running: AtomicBool,
    frames_sent: AtomicU64,
    commands_received: AtomicU64,
    last_command: Mutex<Option<Vec<f64>>>,
}

pub struct AffMock {
    dof: usize,
    rate: f64,
    shared: Arc<MockShared>,
    sensor: Mutex<Option<Box<dyn Transport>>>,
    command: Mutex<Option<Box<dyn Transport>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl AffMock {
    /// `sensor` carries frames out; commands are not read.
    pub fn new(dof: usize, rate: f64, sensor: impl Transport + 'static) -> Self {
        Self {
            dof,
            rate,
            shared: Arc::new(MockShared {
                running: AtomicBool::new(false),
                frames_sent: AtomicU64::new(0),
                commands_received: AtomicU64::new(0),
                last_command: Mutex::new(None),
            }),
            sensor: Mutex::new(Some(Box::new(sensor))),
            command: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Also drains commands arriving on `command`.
    pub fn with_command_transport(self, command: impl Transport + 'static) -> Self {
        *self.command.lock() = Some(Box::new(command));
        self
    }

    /// Sends frames to `mock.remote`, listens for commands on `mock.local`.
    pub fn from_config(cfg: &AffettoConfig) -> Result<Self> {
        let mock = cfg
            .mock
            .as_ref()
            .ok_or_else(|| AffError::Config("mock section is not defined".into()))?;
        let remote = mock
            .remote
            .as_ref()
            .ok_or_else(|| AffError::Config("mock.remote is not defined".into()))?
            .socket_addr()?;
        let this = Self::new(cfg.dof(), mock.sensor.rate, UdpTransport::sender(remote)?);
        match &mock.local {
            Some(local) => {
                let rx = UdpTransport::bind(local.socket_addr()?, Some(DEFAULT_RECV_TIMEOUT))?;
                Ok(this.with_command_transport(rx))
            }
            None => Ok(this),
        }
    }

    pub fn dof(&self) -> usize {
        self.dof
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn frames_sent(&self) -> u64 {
        self.shared.frames_sent.load(Ordering::Relaxed)
    }

    pub fn commands_received(&self) -> u64 {
        self.shared.commands_received.load(Ordering::Relaxed)
    }

    /// Most recent `(ca, cb)`-interleaved command, if any arrived.
    pub fn last_command(&self) -> Option<Vec<f64>> {
        self.shared.last_command.lock().clone()
    }

    pub fn start(&self) -> Result<()> {
        let mut sensor = self
            .sensor
            .lock()
            .take()
            .ok_or_else(|| AffError::NotReady("mock already started".into()))?;
        let mut rate = Rate::new(self.rate)?;
        self.shared.running.store(true, Ordering::SeqCst);

        let mut handles = self.handles.lock();
        let shared = self.shared.clone();
        let dof = self.dof;
        handles.push(
            thread::Builder::new()
                .name("affctrl-mock-sensor".into())
                .spawn(move || {
                    info!("mock sensor: dof={dof} rate={} Hz", rate.frequency());
                    rate.start();
                    while shared.running.load(Ordering::SeqCst) {
                        let frame = encode_data(&random_frame(dof), " ", 0);
                        match sensor.send(&frame) {
                            Ok(_) => {
                                shared.frames_sent.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(AffError::Cancelled) => break,
                            Err(e) => warn!("mock sensor: send failed: {e}"),
                        }
                        rate.sleep();
                    }
                    sensor.close();
                    debug!("mock sensor exiting");
                })?,
        );

        if let Some(mut command) = self.command.lock().take() {
            let shared = self.shared.clone();
            handles.push(
                thread::Builder::new()
                    .name("affctrl-mock-command".into())
                    .spawn(move || {
                        while shared.running.load(Ordering::SeqCst) {
                            let data = match command.recv(DEFAULT_BUFSIZE) {
                                Ok(d) => d,
                                Err(AffError::Timeout) => continue,
                                Err(AffError::Cancelled) => break,
                                Err(e) => {
                                    error!("mock command: receive failed: {e}");
                                    break;
                                }
                            };
                            shared.commands_received.fetch_add(1, Ordering::Relaxed);
                            match parse_command(&data, dof) {
                                Ok(cmd) => *shared.last_command.lock() = Some(cmd),
                                Err(e) => debug!("mock command: {e}"),
                            }
                        }
                        command.close();
                        debug!("mock command exiting");
                    })?,
            );
        }
        Ok(())
    }

    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }

    pub fn join(&self) {
        self.stop();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for h in handles {
            if h.join().is_err() {
                error!("mock thread panicked");
            }
        }
    }
}

impl Drop for AffMock {
    fn drop(&mut self) {
        self.join();
    }
}

/// Command frames carry `ca, cb` pairs: `2 * dof` values.
fn parse_command(data: &[u8], dof: usize) -> Result<Vec<f64>> {
    let values: Vec<f64> = split_data(data, None, Strip::Whitespace)?;
    if values.len() != 2 * dof {
        return Err(AffError::ShapeMismatch { expected: 2 * dof, actual: values.len() });
    }
    Ok(values)
}
