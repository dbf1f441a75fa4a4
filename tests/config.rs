//! Configuration loading through the public API, including the shipped config file.

use std::path::PathBuf;

use affctrl::{
    AffCtrl, AffError, AffState, AffettoConfig, FeedbackScheme, mock::AffMock,
};

fn shipped_config() -> AffettoConfig {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/affetto.toml");
    AffettoConfig::from_path(path).unwrap()
}

#[test]
fn shipped_config_describes_thirteen_joints() {
    let cfg = shipped_config();
    assert_eq!(cfg.name(), "affetto");
    assert_eq!(cfg.dof(), 13);
    assert_eq!(cfg.local_addr().unwrap().port(), 50000);
    assert_eq!(cfg.remote_addr().unwrap().port(), 50010);
    assert_eq!(cfg.mock.as_ref().map(|m| m.sensor.rate), Some(100.0));
}

#[test]
fn shipped_config_builds_controller_and_estimator() {
    let cfg = shipped_config();

    let ctrl = AffCtrl::from_config(&cfg, None, None).unwrap();
    assert_eq!(ctrl.freq(), 30.0);
    assert_eq!(ctrl.scheme(), FeedbackScheme::Pid);
    assert_eq!(ctrl.input_range(), Some((0.0, 600.0)));
    assert_eq!(ctrl.inactive_joint_indices(), vec![0, 7, 8, 9, 10, 11, 12]);
    assert_eq!(ctrl.feedback().gains().kd, vec![200.0; 13]);

    let state = AffState::from_config(&cfg, None, None).unwrap();
    assert_eq!(state.freq(), 100.0);
    assert_eq!(state.dof(), 13);
}

#[test]
fn pidf_gains_broadcast_from_scalars() {
    let cfg = shipped_config();
    let mut ctrl = AffCtrl::from_config(&cfg, None, None).unwrap();
    ctrl.load_feedback_scheme("PIDF").unwrap();
    let g = ctrl.feedback().gains();
    assert_eq!(g.kp, vec![10.0; 13]);
    assert_eq!(g.press_gain, Some(vec![0.5; 13]));
}

#[test]
fn conflicting_timing_is_rejected() {
    let cfg = AffettoConfig::from_toml_str("[affetto.ctrl]\ndt = 0.01\nfreq = 100\n").unwrap();
    let err = AffCtrl::from_config(&cfg, None, None).unwrap_err();
    assert!(matches!(err, AffError::InvalidArgument(_)));
}

#[test]
fn unknown_scheme_is_rejected() {
    let cfg = AffettoConfig::from_toml_str("[affetto.ctrl]\nscheme = \"lqr\"\n").unwrap();
    assert!(matches!(
        AffCtrl::from_config(&cfg, None, None),
        Err(AffError::UnknownScheme(name)) if name == "lqr"
    ));
}

#[test]
fn gain_vector_of_wrong_length_is_rejected() {
    let cfg = AffettoConfig::from_toml_str(
        r#"
        [affetto.ctrl.pid]
        kP = [1, 2, 3]
        "#,
    )
    .unwrap();
    assert!(matches!(
        AffCtrl::from_config(&cfg, None, None),
        Err(AffError::ShapeMismatch { expected: 13, actual: 3 })
    ));
}

#[test]
fn malformed_toml_is_an_error() {
    assert!(matches!(
        AffettoConfig::from_toml_str("[affetto\nname = 1"),
        Err(AffError::Toml(_))
    ));
    assert!(AffettoConfig::from_path("/nonexistent/affetto.toml").is_err());
}

#[test]
fn mock_requires_its_section() {
    let cfg = AffettoConfig::from_toml_str("[affetto]\n").unwrap();
    assert!(matches!(AffMock::from_config(&cfg), Err(AffError::Config(_))));
}
