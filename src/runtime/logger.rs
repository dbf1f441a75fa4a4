//! logger.rs
//! Per-cycle CSV logging for the control loop.
//!
//! The control thread pushes one row per cycle into a bounded lock-free queue
//! and never touches the file. A background consumer drains the queue in
//! batches and writes through `csv::Writer`. When the queue is full the row is
//! dropped and counted instead of blocking the producer. A write error ends
//! the consumer and every later `push` fails.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_queue::ArrayQueue;
use csv::Writer;
use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::error::{AffError, Result};
use crate::sensing::state::JointState;

const LOG_CAPACITY: usize = 8192;
const CONSUMER_POLL_MS: u64 = 5;
const FLUSH_BATCHES: usize = 8;
const DRAIN_PER_POLL: usize = 256;

/// Column labels: `t, rq*, rdq*, rpa*, rpb*, q*, dq*, pa*, pb*, ca*, cb*`,
/// followed by `qdes*, dqdes*` when the reference is recorded.
pub fn header_labels(dof: usize, with_reference: bool) -> Vec<String> {
    let mut groups = vec!["rq", "rdq", "rpa", "rpb", "q", "dq", "pa", "pb", "ca", "cb"];
    if with_reference {
        groups.extend(["qdes", "dqdes"]);
    }
    std::iter::once("t".to_string())
        .chain(
            groups
                .into_iter()
                .flat_map(|g| (0..dof).map(move |i| format!("{g}{i}"))),
        )
        .collect()
}

/// Flattens one control cycle into a row matching [`header_labels`].
pub fn compose_row(
    t: f64,
    raw: &JointState,
    state: &JointState,
    ca: &[f64],
    cb: &[f64],
    reference: Option<(&[f64], &[f64])>,
) -> Vec<f64> {
    let mut row = Vec::with_capacity(1 + 12 * raw.q.len());
    row.push(t);
    for v in [&raw.q, &raw.dq, &raw.pa, &raw.pb, &state.q, &state.dq, &state.pa, &state.pb] {
        row.extend_from_slice(v);
    }
    row.extend_from_slice(ca);
    row.extend_from_slice(cb);
    if let Some((qdes, dqdes)) = reference {
        row.extend_from_slice(qdes);
        row.extend_from_slice(dqdes);
    }
    row
}

pub struct Logger {
    path: PathBuf,
    width: usize,
    queue: Arc<ArrayQueue<Vec<f64>>>,
    dropped: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<Result<u64>>>>,
}

impl Logger {
    /// Creates `path`, writes the header and starts the consumer thread.
    pub fn start(path: impl AsRef<Path>, labels: Vec<String>) -> Result<Self> {
        Self::with_capacity(path, labels, LOG_CAPACITY)
    }

    pub fn with_capacity(path: impl AsRef<Path>, labels: Vec<String>, capacity: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut wtr = Writer::from_writer(BufWriter::new(File::create(&path)?));
        wtr.write_record(&labels)?;
        wtr.flush()?;
        Self::spawn(path, wtr, labels.len(), capacity)
    }

    fn spawn<W>(path: PathBuf, wtr: Writer<W>, width: usize, capacity: usize) -> Result<Self>
    where
        W: Write + Send + 'static,
    {
        let queue = Arc::new(ArrayQueue::new(capacity.max(1)));
        let dropped = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let queue = queue.clone();
            let running = running.clone();
            let dropped = dropped.clone();
            thread::Builder::new()
                .name("affctrl-logger".into())
                .spawn(move || consume(wtr, &queue, &running, &dropped))?
        };
        debug!("logger started: {}", path.display());

        Ok(Self {
            path,
            width,
            queue,
            dropped,
            running,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of columns in every row.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Non-blocking. Returns `false` when the row was dropped.
    pub fn push(&self, row: Vec<f64>) -> Result<bool> {
        if row.len() != self.width {
            return Err(AffError::ShapeMismatch { expected: self.width, actual: row.len() });
        }
        if !self.running.load(Ordering::Relaxed) {
            return Err(AffError::NotReady("logger is stopped".into()));
        }
        match self.queue.push(row) {
            Ok(()) => Ok(true),
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(false)
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Stops the consumer after it has written every queued row.
    /// Returns the number of rows written. Calling it again returns 0.
    pub fn stop(&self) -> Result<u64> {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.handle.lock().take();
        match handle {
            Some(h) => h
                .join()
                .map_err(|_| AffError::NotReady("logger thread panicked".into()))?,
            None => Ok(0),
        }
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("logger: {e}");
        }
    }
}

fn consume<W: Write>(
    wtr: Writer<W>,
    queue: &ArrayQueue<Vec<f64>>,
    running: &AtomicBool,
    dropped: &AtomicU64,
) -> Result<u64> {
    let result = drain(wtr, queue, running, dropped);
    if let Err(e) = &result {
        running.store(false, Ordering::SeqCst);
        error!("logger: write failed, logging stopped: {e}");
    }
    result
}

fn drain<W: Write>(
    mut wtr: Writer<W>,
    queue: &ArrayQueue<Vec<f64>>,
    running: &AtomicBool,
    dropped: &AtomicU64,
) -> Result<u64> {
    let mut written = 0u64;
    let mut flush_counter = 0usize;

    while running.load(Ordering::SeqCst) {
        let mut any = false;
        for _ in 0..DRAIN_PER_POLL {
            let Some(row) = queue.pop() else { break };
            any = true;
            wtr.serialize(&row)?;
            written += 1;
        }
        if any {
            flush_counter += 1;
            if flush_counter >= FLUSH_BATCHES {
                wtr.flush()?;
                flush_counter = 0;
            }
        } else {
            thread::sleep(Duration::from_millis(CONSUMER_POLL_MS));
        }
    }

    while let Some(row) = queue.pop() {
        wtr.serialize(&row)?;
        written += 1;
    }
    wtr.flush()?;

    let n_dropped = dropped.load(Ordering::Relaxed);
    if n_dropped > 0 {
        warn!("logger: {n_dropped} rows dropped (queue full)");
    }
    debug!("logger exiting: rows={written}");
    Ok(written)
}
