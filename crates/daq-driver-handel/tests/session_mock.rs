//! Session behavior against the in-process mock backend.
//!
//! No vendor library or hardware needed; runs in every `cargo test`.

use std::thread;
use std::time::Duration;

use daq_driver_handel::mock::{
    MOCK_BAD_ARGS, MOCK_BAD_BOARD_OP, MOCK_INVALID_DETCHAN, MOCK_RUN_ACTIVE, MOCK_UNKNOWN_VALUE,
};
use daq_driver_handel::{
    Handel, HandelConfig, HandelError, LogConfig, LogLevel, MockHandel, PresetType, RunPolicy,
    BOARD_INFO_FIELDS, MAX_MCA_CHANNELS,
};
use tempfile::NamedTempFile;

// =============================================================================
// Helpers
// =============================================================================

/// A session that has gone through init + start_system, plus a second handle
/// on the same mock for inspection.
fn started() -> (Handel<MockHandel>, MockHandel, NamedTempFile) {
    let ini = NamedTempFile::new().unwrap();
    let mock = MockHandel::new();
    let mut handel = Handel::with_api(mock.clone()).with_run_policy(fast_policy());
    handel.init(ini.path()).unwrap();
    handel.start_system().unwrap();
    mock.clear_calls();
    (handel, mock, ini)
}

fn fast_policy() -> RunPolicy {
    RunPolicy {
        poll_interval: Duration::from_millis(10),
        grace: Duration::from_millis(50),
        max_wait: Duration::from_secs(5),
    }
}

// =============================================================================
// Bring-up
// =============================================================================

#[test]
fn test_init_missing_ini_file() {
    let mock = MockHandel::new();
    let mut handel = Handel::with_api(mock.clone());
    let err = handel.init("/nonexistent/microdxp.ini").unwrap_err();
    assert!(matches!(
        err,
        HandelError::Status {
            code: 201,
            name: "XIA_OPEN_FILE",
            ..
        }
    ));
    assert!(handel.ini_file().is_none());
    assert!(handel.start_system().is_err());
}

#[test]
fn test_unknown_status_code() {
    let ini = NamedTempFile::new().unwrap();
    let mock = MockHandel::new();
    let mut handel = Handel::with_api(mock.clone());
    handel.init(ini.path()).unwrap();
    mock.fail_on("xiaStartSystem", 9999);

    let err = handel.start_system().unwrap_err();
    assert!(matches!(err, HandelError::UnknownStatus { code: 9999, .. }));
    assert!(!handel.is_system_started());
}

#[test]
fn test_counts() {
    let (mut handel, _mock, _ini) = started();
    assert_eq!(handel.num_detectors().unwrap(), 1);
    assert_eq!(handel.num_modules().unwrap(), 1);
    assert_eq!(handel.num_firmware_sets().unwrap(), 1);
}

#[test]
fn test_set_logging() {
    let mock = MockHandel::new();
    let mut handel = Handel::with_api(mock.clone());
    handel.set_logging(LogLevel::Debug, "/tmp/handel.log").unwrap();

    let (level, output) = mock.log_settings();
    assert_eq!(level, Some(4));
    assert_eq!(output.as_deref(), Some("/tmp/handel.log"));
    assert_eq!(handel.log_settings().unwrap().level, LogLevel::Debug);
}

#[test]
fn test_start_from_config() {
    let ini = NamedTempFile::new().unwrap();
    let mut config = HandelConfig::new(ini.path());
    config.log = Some(LogConfig {
        level: LogLevel::Info,
        output: "/tmp/handel.log".into(),
    });
    config.acquisition.insert("peaking_time".into(), 8.0);
    config.acquisition.insert("number_mca_channels".into(), 1024.0);

    let mock = MockHandel::new();
    let mut handel = Handel::with_api(mock.clone());
    handel.start_from_config(&config).unwrap();

    assert!(handel.is_system_started());
    assert_eq!(mock.value("peaking_time"), Some(8.0));
    assert_eq!(mock.value("number_mca_channels"), Some(1024.0));
    assert_eq!(mock.applied(), vec![0x06]);
    assert_eq!(mock.log_settings().0, Some(3));
}

// =============================================================================
// Acquisition values
// =============================================================================

#[test]
fn test_set_returns_value_written_back() {
    let (mut handel, _mock, _ini) = started();
    let actual = handel.set_acquisition_value("peaking_time", 10.0).unwrap();
    assert_eq!(actual, 8.0);
    assert_eq!(handel.get_acquisition_value("peaking_time").unwrap(), 8.0);
}

#[test]
fn test_unknown_name_never_reaches_library() {
    let (mut handel, mock, _ini) = started();
    let err = handel.set_acquisition_value("peeking_time", 8.0).unwrap_err();
    assert!(matches!(err, HandelError::UnknownAcquisitionValue { .. }));
    assert!(handel.get_acquisition_value("peeking_time").is_err());
    assert!(mock.calls().is_empty());
}

#[test]
fn test_bulk_set_validates_before_setting() {
    let (mut handel, mock, _ini) = started();
    let err = handel
        .set_acquisition_values(&[("peaking_time", 8.0), ("bogus", 1.0)])
        .unwrap_err();
    assert!(matches!(err, HandelError::UnknownAcquisitionValue { .. }));
    assert_eq!(mock.call_count("xiaSetAcquisitionValues"), 0);
    assert!(mock.applied().is_empty());
}

#[test]
fn test_bulk_set_applies() {
    let (mut handel, mock, _ini) = started();
    handel
        .set_acquisition_values(&[("gain", 2.5), ("trigger_threshold", 500.0)])
        .unwrap();
    assert_eq!(mock.call_count("xiaSetAcquisitionValues"), 2);
    assert_eq!(mock.value("gain"), Some(2.5));
    assert_eq!(mock.applied(), vec![0x06]);
}

#[test]
fn test_get_all_skips_failures() {
    let (mut handel, mock, _ini) = started();
    let all = handel.get_all_acquisition_values().unwrap();
    assert_eq!(all.len(), Handel::<MockHandel>::allowed_acquisition_values().len());

    mock.fail_on("xiaGetAcquisitionValues", MOCK_UNKNOWN_VALUE);
    let all = handel.get_all_acquisition_values().unwrap();
    assert!(all.is_empty());
    assert_eq!(
        mock.call_count("xiaGetAcquisitionValues"),
        2 * Handel::<MockHandel>::allowed_acquisition_values().len()
    );
}

#[test]
fn test_wrong_detector_channel() {
    let ini = NamedTempFile::new().unwrap();
    let mut handel = Handel::with_api(MockHandel::new()).with_detector_channel(3);
    handel.init(ini.path()).unwrap();
    handel.start_system().unwrap();
    let err = handel.get_acquisition_value("gain").unwrap_err();
    assert_eq!(err.status_code(), Some(MOCK_INVALID_DETCHAN));
}

#[test]
fn test_get_all_does_not_require_started_system() {
    let ini = NamedTempFile::new().unwrap();
    let mock = MockHandel::new();
    let mut handel = Handel::with_api(mock.clone());
    handel.init(ini.path()).unwrap();

    // The library decides: every read is attempted, and each failure skipped.
    let all = handel.get_all_acquisition_values().unwrap();
    assert!(all.is_empty());
    assert_eq!(
        mock.call_count("xiaGetAcquisitionValues"),
        Handel::<MockHandel>::allowed_acquisition_values().len()
    );
}

// =============================================================================
// Runs
// =============================================================================

#[test]
fn test_start_run_resume_flag() {
    let (mut handel, mock, _ini) = started();
    handel.start_run(true).unwrap();
    handel.stop_run().unwrap();
    handel.start_run(false).unwrap();

    let starts: Vec<String> = mock
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("xiaStartRun("))
        .collect();
    assert_eq!(starts, vec!["xiaStartRun(0, 0)", "xiaStartRun(0, 1)"]);
}

#[test]
fn test_stop_run_only_when_active() {
    let (mut handel, mock, _ini) = started();
    assert!(!handel.stop_run().unwrap());
    assert_eq!(mock.call_count("xiaStopRun"), 0);

    handel.start_run(true).unwrap();
    assert!(handel.run_active().unwrap());
    assert!(handel.stop_run().unwrap());
    assert!(mock.calls().contains(&"xiaStopRun(0)".to_string()));

    assert!(!handel.stop_run().unwrap());
    assert_eq!(mock.call_count("xiaStopRun"), 1);
}

#[test]
fn test_start_while_active_fails() {
    let (mut handel, _mock, _ini) = started();
    handel.start_run(true).unwrap();
    let err = handel.start_run(true).unwrap_err();
    assert_eq!(err.status_code(), Some(MOCK_RUN_ACTIVE));
}

#[test]
fn test_fixed_realtime_run_completes() {
    let (mut handel, mock, _ini) = started();
    let mut samples = 0;
    let summary = handel
        .fixed_realtime_run(0.05, true, |_| samples += 1)
        .unwrap();

    assert!(!summary.timed_out);
    assert!(samples >= 1);
    assert!(!summary.statistics.run_active);
    assert!((summary.statistics.runtime - 0.05).abs() < 1e-9);
    assert_eq!(summary.statistics.events_in_run, 250);
    assert_eq!(mock.value("preset_type"), Some(PresetType::None.as_value()));
    assert_eq!(mock.call_count("xiaStopRun"), 0);
}

#[test]
fn test_fixed_run_times_out_and_stops() {
    let (mut handel, mock, _ini) = started();
    mock.hold_runs(true);

    let summary = handel.fixed_realtime_run(0.05, true, |_| {}).unwrap();

    assert!(summary.timed_out);
    assert!(summary.elapsed >= Duration::from_millis(100));
    assert_eq!(mock.call_count("xiaStopRun"), 1);
    assert!(!handel.run_active().unwrap());
    assert_eq!(mock.value("preset_type"), Some(PresetType::None.as_value()));
}

#[test]
fn test_fixed_run_rejects_bad_arguments() {
    let (mut handel, mock, _ini) = started();
    assert!(handel.fixed_run(PresetType::None, 1.0, true, |_| {}).is_err());
    assert!(handel.fixed_realtime_run(-1.0, true, |_| {}).is_err());
    assert!(handel.fixed_realtime_run(f64::NAN, true, |_| {}).is_err());
    assert!(mock.calls().is_empty());
}

#[test]
fn test_fixed_run_resets_preset_on_start_failure() {
    let (mut handel, mock, _ini) = started();
    mock.fail_on("xiaStartRun", MOCK_RUN_ACTIVE);
    let err = handel.fixed_realtime_run(1.0, true, |_| {}).unwrap_err();
    assert_eq!(err.status_code(), Some(MOCK_RUN_ACTIVE));
    assert_eq!(mock.value("preset_type"), Some(PresetType::None.as_value()));
    assert_eq!(mock.call_count("xiaGetRunData"), 0);
}

#[test]
fn test_fixed_run_resets_preset_when_preset_value_rejected() {
    let (mut handel, mock, _ini) = started();
    mock.reject_value("preset_value", MOCK_BAD_ARGS);

    let err = handel.fixed_realtime_run(1.0, true, |_| {}).unwrap_err();
    assert_eq!(err.status_code(), Some(MOCK_BAD_ARGS));
    assert_eq!(mock.value("preset_type"), Some(PresetType::None.as_value()));
    assert_eq!(mock.call_count("xiaStartRun"), 0);
    assert_eq!(
        mock.calls().last().map(String::as_str),
        Some("xiaSetAcquisitionValues(0, preset_type, 0)")
    );
}

#[test]
fn test_fixed_run_keeps_polling_after_failed_reads() {
    let (mut handel, mock, _ini) = started();
    mock.fail_on("xiaGetRunData", MOCK_BAD_ARGS);

    let remote = mock.clone();
    let clearer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        remote.clear_failures();
    });

    let mut samples = 0;
    let summary = handel
        .fixed_realtime_run(0.1, true, |_| samples += 1)
        .unwrap();
    clearer.join().unwrap();

    assert!(!summary.timed_out);
    assert!(!summary.statistics.run_active);
    assert!(samples >= 1);
    assert_eq!(mock.call_count("xiaStopRun"), 0);
    // Polls made while reads failed never reached the callback.
    assert!(mock.call_count("xiaGetRunData") > samples);
}

#[test]
fn test_fixed_live_run_outlasts_max_wait() {
    let ini = NamedTempFile::new().unwrap();
    let mock = MockHandel::new();
    let mut handel = Handel::with_api(mock.clone()).with_run_policy(RunPolicy {
        max_wait: Duration::from_millis(20),
        ..fast_policy()
    });
    handel.init(ini.path()).unwrap();
    handel.start_system().unwrap();

    // Live time lags real time, so this run needs longer than max_wait.
    let summary = handel
        .fixed_run(PresetType::FixedLive, 0.05, true, |_| {})
        .unwrap();

    assert!(!summary.timed_out);
    assert!(!summary.statistics.run_active);
    assert!((summary.statistics.livetime - 0.05).abs() < 1e-9);
    assert_eq!(mock.call_count("xiaStopRun"), 0);
}

#[test]
fn test_read_mca_length() {
    let (mut handel, _mock, _ini) = started();
    handel
        .set_acquisition_value("number_mca_channels", 1000.0)
        .unwrap();
    handel.fixed_realtime_run(0.02, true, |_| {}).unwrap();

    let mca = handel.read_mca().unwrap();
    assert_eq!(mca.len(), 1024);
    assert!(mca.iter().sum::<u64>() > 0);
}

#[test]
fn test_read_mca_rejects_oversized_length() {
    let (mut handel, mock, _ini) = started();
    mock.force_value("number_mca_channels", 1e9);

    let err = handel.read_mca().unwrap_err();
    assert!(matches!(err, HandelError::InvalidArgument { .. }));
    assert_eq!(mock.call_count("xiaGetRunData"), 0);

    mock.force_value("number_mca_channels", MAX_MCA_CHANNELS as f64);
    assert_eq!(handel.read_mca().unwrap().len(), MAX_MCA_CHANNELS);
}

// =============================================================================
// Board operations
// =============================================================================

#[test]
fn test_board_info_fields() {
    let (mut handel, _mock, _ini) = started();
    let info = handel.board_info().unwrap();
    let names: Vec<&str> = info.fields().map(|(name, _)| name).collect();
    assert_eq!(names, BOARD_INFO_FIELDS.to_vec());
    assert_eq!(info.dsp_clock_mhz(), 40);
    assert_eq!(info.number_of_fippis(), 1);
}

#[test]
fn test_peaking_times() {
    let (mut handel, _mock, _ini) = started();
    assert_eq!(handel.number_of_peaking_times().unwrap(), 4);
    assert_eq!(
        handel.current_peaking_times().unwrap(),
        vec![4.0, 8.0, 16.0, 32.0]
    );
}

#[test]
fn test_apply_mask() {
    let (mut handel, mock, _ini) = started();
    handel.apply().unwrap();
    assert_eq!(mock.applied(), vec![0x06]);
}

#[test]
fn test_unknown_board_operation() {
    let (mut handel, _mock, _ini) = started();
    let err = handel.board_operation("reboot_the_universe", 0.0).unwrap_err();
    assert_eq!(err.status_code(), Some(MOCK_BAD_BOARD_OP));
}

// =============================================================================
// Shutdown
// =============================================================================

#[test]
fn test_drop_calls_exit_once() {
    let (handel, mock, _ini) = started();
    drop(handel);
    assert_eq!(mock.call_count("xiaExit"), 1);
    assert!(!mock.is_initialized());
}

#[test]
fn test_explicit_exit_not_repeated_on_drop() {
    let (mut handel, mock, _ini) = started();
    handel.exit().unwrap();
    drop(handel);
    assert_eq!(mock.call_count("xiaExit"), 1);
}

#[test]
fn test_exit_closes_log() {
    let ini = NamedTempFile::new().unwrap();
    let mock = MockHandel::new();
    let mut handel = Handel::with_api(mock.clone());
    handel.set_logging(LogLevel::Warning, "/tmp/handel.log").unwrap();
    handel.init(ini.path()).unwrap();
    handel.exit().unwrap();
    assert_eq!(mock.call_count("xiaCloseLog"), 1);
    assert!(handel.log_settings().is_none());
}
