//! # affctrl command-line tools
//!
//! - `mock`: emulate the sensor gateway (random frames at a fixed rate)
//! - `listen`: receive sensory frames and report inter-arrival statistics
//! - `track`: drive selected joints through PTP waypoints and log every cycle
//!
//! Every subcommand reads the `[affetto]` TOML config given with `-c`.

use std::{
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use log::{error, info, warn};

use affctrl::{
    AffCtrlThread, AffMock, AffettoConfig, ProfileKind, PtpOptions, Result, Waypoints,
    comm::{
        codec::{DEFAULT_BUFSIZE, parse_strict},
        transport::{DEFAULT_RECV_TIMEOUT, Transport, UdpTransport},
    },
    control::joints::parse_lenient,
    error::AffError,
    sensing::ArrivalStats,
};

const DEFAULT_CONFIG_PATH: &str = "config/affetto.toml";
const DEFAULT_IDLE_TIMEOUT_SECS: f64 = 10.0;
const SETTLE_SECS: f64 = 1.0;

#[derive(Parser, Debug)]
#[command(name = "affctrl", version, about = "Affetto pneumatic humanoid control tools")]
struct Cli {
    /// Configuration file.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Spawn a mock sensor gateway.
    Mock {
        /// Frequency to send frames at; overrides `mock.sensor.rate`.
        #[arg(short = 'H', long)]
        hz: Option<f64>,
        /// Seconds to run; runs until killed when omitted.
        #[arg(short, long)]
        duration: Option<f64>,
    },
    /// Receive sensory frames and report arrival statistics.
    Listen {
        #[arg(short, long, default_value_t = 5.0)]
        duration: f64,
        /// Do not print every frame.
        #[arg(short, long)]
        quiet: bool,
    },
    /// Track point-to-point waypoints on selected joints.
    Track {
        /// Joints to move (e.g. "2", "1-5", "0,7-"); the rest hold their start position.
        #[arg(short, long, default_value = "-")]
        joints: String,
        /// Waypoint positions, visited in order; the trajectory returns to the start.
        #[arg(short, long, num_args = 1.., default_values_t = [50.0])]
        targets: Vec<f64>,
        /// Seconds per segment.
        #[arg(short = 'T', long, default_value_t = 3.0)]
        time: f64,
        /// Velocity profile: tri, trapez, sin, 5th.
        #[arg(short, long, default_value = "tri")]
        profile: String,
        /// Peak joint speed for `trapez` (one value, or one per joint).
        #[arg(long, num_args = 1.., conflicts_with = "tb")]
        vmax: Option<Vec<f64>>,
        /// Blend time in seconds for `trapez` (one value, or one per joint).
        #[arg(long, num_args = 1..)]
        tb: Option<Vec<f64>>,
        /// CSV log of every control cycle.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Control frequency; overrides `ctrl.freq`.
        #[arg(short = 'F', long)]
        freq: Option<f64>,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = AffettoConfig::from_path(&cli.config)?;
    info!("config loaded: {} (dof={})", cli.config.display(), config.dof());

    match cli.command {
        Command::Mock { hz, duration } => run_mock(&config, hz, duration),
        Command::Listen { duration, quiet } => run_listen(&config, duration, quiet),
        Command::Track { joints, targets, time, profile, vmax, tb, output, freq } => {
            let opts = PtpOptions { vmax, tb };
            run_track(&config, &joints, &targets, time, &profile, &opts, output, freq)
        }
    }
}

// ============================================================================
// mock
// ============================================================================

fn run_mock(config: &AffettoConfig, hz: Option<f64>, duration: Option<f64>) -> Result<()> {
    let mut config = config.clone();
    if let (Some(hz), Some(mock)) = (hz, config.mock.as_mut()) {
        mock.sensor.rate = hz;
    }
    let mock = AffMock::from_config(&config)?;
    mock.start()?;
    info!("mock running at {} Hz", mock.rate());

    let started = Instant::now();
    loop {
        thread::sleep(Duration::from_secs(1));
        info!(
            "mock: frames_sent={} commands_received={}",
            mock.frames_sent(),
            mock.commands_received()
        );
        if duration.is_some_and(|d| started.elapsed().as_secs_f64() >= d) {
            break;
        }
    }
    mock.join();
    Ok(())
}

// ============================================================================
// listen
// ============================================================================

fn run_listen(config: &AffettoConfig, duration: f64, quiet: bool) -> Result<()> {
    let dof = config.dof();
    let mut rx = UdpTransport::bind(config.local_addr()?, Some(DEFAULT_RECV_TIMEOUT))?;
    info!("listening on {} for {duration} s", config.local_addr()?);

    let started = Instant::now();
    let mut arrivals = Vec::new();
    let mut malformed = 0u64;
    while started.elapsed().as_secs_f64() < duration {
        let data = match rx.recv(DEFAULT_BUFSIZE) {
            Ok(d) => d,
            Err(AffError::Timeout) => continue,
            Err(e) => return Err(e),
        };
        let t = started.elapsed().as_secs_f64();
        match parse_strict(&data, dof) {
            Ok(frame) => {
                arrivals.push(t);
                if !quiet {
                    println!("{t:.6} {frame:?}");
                }
            }
            Err(e) => {
                malformed += 1;
                warn!("malformed frame: {e}");
            }
        }
    }
    rx.close();

    match ArrivalStats::from_arrivals(&arrivals) {
        Some(stats) => println!("{stats}"),
        None => println!("frames:      {}", arrivals.len()),
    }
    if malformed > 0 {
        println!("malformed:   {malformed}");
    }
    Ok(())
}

// ============================================================================
// track
// ============================================================================

#[allow(clippy::too_many_arguments)]
fn run_track(
    config: &AffettoConfig,
    joints: &str,
    targets: &[f64],
    time: f64,
    profile: &str,
    opts: &PtpOptions,
    output: Option<PathBuf>,
    freq: Option<f64>,
) -> Result<()> {
    let kind: ProfileKind = profile.parse()?;
    if kind == ProfileKind::Trapezoidal && opts.vmax.is_none() && opts.tb.is_none() {
        return Err(AffError::InvalidArgument(
            "trapezoidal profile needs --vmax or --tb".into(),
        ));
    }
    let selected = parse_lenient(joints, config.dof());
    if selected.is_empty() {
        return Err(AffError::InvalidArgument(format!("no joints selected by '{joints}'")));
    }

    let mut th = AffCtrlThread::from_config(config, None, freq, None, None)?;
    if let Some(path) = &output {
        th = th.with_logger(path)?;
    }
    th.start()?;

    if !th.wait_for_idling(Duration::from_secs_f64(DEFAULT_IDLE_TIMEOUT_SECS)) {
        th.join();
        return Err(th
            .state()
            .take_idle_error()
            .unwrap_or_else(|| AffError::NotReady("sensor idling did not finish".into())));
    }

    let start = th.q();
    let t0 = th.current_time() + SETTLE_SECS;
    let mut wp = Waypoints::new(start.clone(), t0, kind, opts.clone());
    for &target in targets.iter() {
        let mut q = start.clone();
        for &i in &selected {
            q[i] = target;
        }
        wp.push(q, time)?;
    }
    wp.push(start, time)?;
    let end = wp.end_time();
    info!("tracking {} segments on joints {selected:?} until t={end:.2}", wp.len());

    let wp_dq = wp.clone();
    th.set_trajectory(move |t| wp.q(t), move |t| wp_dq.dq(t));

    while th.is_alive() && th.current_time() < end + SETTLE_SECS {
        thread::sleep(Duration::from_millis(100));
    }
    th.join();
    info!("tracking finished: cycles={}", th.cycles());
    Ok(())
}
