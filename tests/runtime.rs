//! End-to-end runs of the sensor and control threads over in-process transports.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use affctrl::{
    AffCtrl, AffCtrlThread, AffMock, AffState, AffStateThread, FeedbackScheme, Gains,
    comm::{
        codec::{Strip, encode_data, split_data},
        transport::{ChannelTransport, Transport},
    },
    error::AffError,
    sensing::IdleOptions,
};

const DOF: usize = 2;

fn quick_idle() -> IdleOptions {
    IdleOptions { n_samples: 5, no_error: true, ..IdleOptions::default() }
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn recv_command(gateway: &mut ChannelTransport) -> Vec<f64> {
    let data = gateway.recv(4096).unwrap();
    split_data(&data, None, Strip::Whitespace).unwrap()
}

#[test]
fn wait_for_idling_on_never_started_sensor_times_out() {
    let (rx, _tx) = ChannelTransport::pair();
    let st = AffStateThread::new(AffState::new(DOF, None, None).unwrap(), rx);
    let t0 = Instant::now();
    assert!(!st.wait_for_idling(Duration::from_millis(10)));
    assert!(t0.elapsed() < Duration::from_millis(500));
}

#[test]
fn calibration_error_is_reported_through_the_control_thread() {
    let (sensor_rx, mut sensor_tx) = ChannelTransport::pair_with_timeout(Duration::from_millis(10));
    let (cmd_tx, _gateway) = ChannelTransport::pair();

    // Configured for 1 Hz; frames arrive at roughly 50 Hz.
    let opts = IdleOptions { n_samples: 4, freq_tolerance: 0.5, ..IdleOptions::default() };
    let state = AffStateThread::new(AffState::new(DOF, None, Some(1.0)).unwrap(), sensor_rx)
        .with_idle_options(opts);
    let ctrl = AffCtrl::new(DOF, None, Some(100.0)).unwrap();
    let th = AffCtrlThread::new(ctrl, Arc::new(state), cmd_tx);
    th.start().unwrap();

    for _ in 0..4 {
        sensor_tx.send(b"1 2 3 4 5 6").unwrap();
        thread::sleep(Duration::from_millis(20));
    }

    let t0 = Instant::now();
    assert!(!th.wait_for_idling(Duration::from_secs(10)));
    assert!(t0.elapsed() < Duration::from_secs(5));
    assert!(wait_until(Duration::from_secs(2), || !th.state().is_alive()));
    assert!(th.state().idle_failed());
    assert!(matches!(
        th.state().take_idle_error(),
        Some(AffError::Calibration { .. })
    ));
    th.join();
}

#[test]
fn closed_loop_over_channels() {
    let (sensor_rx, mut sensor_tx) = ChannelTransport::pair_with_timeout(Duration::from_millis(10));
    let (cmd_tx, mut gateway) = ChannelTransport::pair_with_timeout(Duration::from_secs(1));

    let state = AffStateThread::new(AffState::new(DOF, Some(0.01), None).unwrap(), sensor_rx)
        .with_idle_options(quick_idle());
    let mut ctrl = AffCtrl::new(DOF, None, Some(100.0)).unwrap();
    ctrl.set_feedback(FeedbackScheme::Pid, Gains::uniform(DOF, 1.0, 0.0, 0.0, 100.0))
        .unwrap();

    let th = AffCtrlThread::new(ctrl, Arc::new(state), cmd_tx);
    th.reset_trajectory(20.0).unwrap();
    th.start().unwrap();

    // q = 10 on both joints; pa = 20, pb = 30.
    let frame = encode_data(&[10.0, 20.0, 30.0, 10.0, 20.0, 30.0], " ", 0);
    let feeder = thread::spawn(move || {
        for _ in 0..60 {
            if sensor_tx.send(&frame).is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
    });

    assert!(th.wait_for_idling(Duration::from_secs(2)));
    assert!(wait_until(Duration::from_secs(2), || th.q() == vec![10.0, 10.0]));

    // e = 20 - 10 = 10 -> ca = 110, cb = 90 once the filter has settled.
    let settled = wait_until(Duration::from_secs(2), || {
        recv_command(&mut gateway) == vec![110.0, 90.0, 110.0, 90.0]
    });
    assert!(settled);

    th.set_inactive_joints("1", 0.0);
    assert!(wait_until(Duration::from_secs(2), || {
        recv_command(&mut gateway) == vec![110.0, 90.0, 0.0, 0.0]
    }));

    th.join();
    feeder.join().unwrap();
    assert!(!th.is_alive());
    assert!(!th.state().is_alive());
    assert!(th.current_time() > 0.0);
}

#[test]
fn control_starts_before_idling_without_deadlock() {
    let (sensor_rx, _sensor_tx) = ChannelTransport::pair_with_timeout(Duration::from_millis(5));
    let (cmd_tx, mut gateway) = ChannelTransport::pair_with_timeout(Duration::from_secs(1));

    let state = AffStateThread::new(AffState::new(DOF, None, None).unwrap(), sensor_rx);
    let ctrl = AffCtrl::new(DOF, None, Some(100.0)).unwrap();
    let th = AffCtrlThread::new(ctrl, Arc::new(state), cmd_tx);
    th.start().unwrap();

    assert_eq!(recv_command(&mut gateway), vec![0.0; 2 * DOF]);
    assert!(!th.wait_for_idling(Duration::from_millis(20)));
    assert_eq!(th.q(), vec![0.0; DOF]);

    let t0 = Instant::now();
    th.join();
    assert!(t0.elapsed() < Duration::from_secs(2));
}

#[test]
fn mock_feeds_the_sensor_thread() {
    let (mock_tx, sensor_rx) = ChannelTransport::pair_with_timeout(Duration::from_millis(20));
    let mock = AffMock::new(DOF, 200.0, mock_tx);
    let state = AffStateThread::new(AffState::new(DOF, None, Some(200.0)).unwrap(), sensor_rx)
        .with_idle_options(quick_idle());

    mock.start().unwrap();
    state.start().unwrap();
    assert!(state.wait_for_idling(Duration::from_secs(2)));
    assert!(wait_until(Duration::from_secs(2), || state.n_steps() > 10));

    let raw = state.get_raw_states();
    assert!(raw.q.iter().all(|v| (0.0..256.0).contains(v)));
    assert_eq!(state.dropped_frames(), 0);

    mock.join();
    state.join();
}

#[test]
fn logger_records_every_cycle() {
    let path = std::env::temp_dir().join(format!("affctrl-runtime-{}.csv", std::process::id()));
    let (sensor_rx, _sensor_tx) = ChannelTransport::pair_with_timeout(Duration::from_millis(5));
    let (cmd_tx, _gateway) = ChannelTransport::pair();

    let state = AffStateThread::new(AffState::new(DOF, None, None).unwrap(), sensor_rx);
    let ctrl = AffCtrl::new(DOF, None, Some(200.0)).unwrap();
    let th = AffCtrlThread::new(ctrl, Arc::new(state), cmd_tx)
        .with_logger(&path)
        .unwrap();
    th.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || th.cycles() >= 10));
    th.join();

    let text = std::fs::read_to_string(&path).unwrap();
    let mut lines = text.lines();
    let header: Vec<&str> = lines.next().unwrap().split(',').collect();
    assert_eq!(header.len(), 1 + 12 * DOF);
    assert_eq!(header[0], "t");
    assert_eq!(header.last(), Some(&"dqdes1"));

    let rows: Vec<&str> = lines.collect();
    assert_eq!(rows.len() as u64, th.cycles());
    for row in &rows {
        let values: Vec<f64> = row.split(',').map(|v| v.parse().unwrap()).collect();
        assert_eq!(values.len(), header.len());
    }
    std::fs::remove_file(path).ok();
}
