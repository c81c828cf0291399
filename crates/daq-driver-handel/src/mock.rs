//! In-process stand-in for a single-channel microDXP.
//!
//! [`MockHandel`] implements [`HandelApi`] without any vendor library: it
//! keeps an acquisition value store, runs timed acquisitions against the
//! wall clock, synthesizes an MCA spectrum and answers the board operations
//! the driver uses. Every call is journaled and any function can be scripted
//! to fail with a given status, which is what the session tests lean on.
//!
//! Clones share state, so a test can keep one handle for inspection while the
//! session owns another.

use std::collections::HashMap;
use std::ffi::CStr;
use std::os::raw::c_ulong;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use crate::acquisition::{PresetType, ACQUISITION_VALUES};
use crate::api::{DataMut, HandelApi};
use crate::board::BOARD_INFO_LEN;

const XIA_SUCCESS: i32 = handel_sys::XIA_SUCCESS;
const XIA_OPEN_FILE: i32 = 201;

// Conditions below have no entry in the status table, so the mock uses its
// own codes and the driver reports them as unknown statuses.

/// A run is already active.
pub const MOCK_RUN_ACTIVE: i32 = 9001;
/// Run data name the mock does not know.
pub const MOCK_BAD_NAME: i32 = 9002;
/// Detector channel other than 0.
pub const MOCK_INVALID_DETCHAN: i32 = 9003;
/// Acquisition value name the mock does not store.
pub const MOCK_UNKNOWN_VALUE: i32 = 9004;
/// Board operation the mock does not implement.
pub const MOCK_BAD_BOARD_OP: i32 = 9005;
/// Known operation or run data name called with the wrong buffer type.
pub const MOCK_BAD_ARGS: i32 = 9006;
/// Called before `xiaStartSystem`.
pub const MOCK_NO_SYSTEM: i32 = 9007;

/// Peaking times (µs) of the simulated parameter sets.
pub const MOCK_PEAKING_TIMES: [f64; 4] = [4.0, 8.0, 16.0, 32.0];

/// Output count rate of the simulated detector.
pub const MOCK_OUTPUT_RATE: f64 = 5000.0;
/// Input count rate of the simulated detector.
pub const MOCK_INPUT_RATE: f64 = 5500.0;

const MOCK_BOARD_INFO: [u8; BOARD_INFO_LEN] = [
    0, 3, 2, // PIC
    1, 4, 7, // DSP
    40, 1, 1, 0, 0x40, 0x1f, 2, 1, 2, 1, 0, 2, 5, 0, // FiPPI et al.
    0, 0, 0, 0, 0, 0,
];

fn default_values() -> HashMap<String, f64> {
    let mut values: HashMap<String, f64> = ACQUISITION_VALUES
        .iter()
        .map(|v| (v.name.to_string(), 0.0))
        .collect();
    for (name, value) in [
        ("parset", 2.0),
        ("clock_speed", 40.0),
        ("peaking_time", 16.0),
        ("gap_time", 0.4),
        ("trigger_peak_time", 0.2),
        ("trigger_threshold", 1000.0),
        ("energy_threshold", 0.0),
        ("baseline_length", 64.0),
        ("max_width", 1.0),
        ("number_mca_channels", 2048.0),
        ("mca_bin_width", 10.0),
        ("dynamic_range", 47200.0),
        ("gain", 5.0),
        ("gain_trim", 1.0),
        ("polarity", 1.0),
        ("reset_interval", 0.0),
    ] {
        values.insert(name.to_string(), value);
    }
    values
}

#[derive(Debug, Clone)]
struct MockRun {
    started: Instant,
    /// Real time carried over from earlier runs when resuming.
    prior_runtime: f64,
    preset: PresetType,
    preset_value: f64,
    /// Frozen runtime once the run ended or was stopped.
    ended_at: Option<f64>,
}

#[derive(Debug)]
struct MockState {
    initialized: bool,
    system_started: bool,
    log_level: Option<i32>,
    log_output: Option<String>,
    values: HashMap<String, f64>,
    run: Option<MockRun>,
    applied: Vec<u16>,
    hold_runs: bool,
    failures: HashMap<&'static str, i32>,
    rejected_values: HashMap<String, i32>,
    calls: Vec<String>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            initialized: false,
            system_started: false,
            log_level: None,
            log_output: None,
            values: default_values(),
            run: None,
            applied: Vec::new(),
            hold_runs: false,
            failures: HashMap::new(),
            rejected_values: HashMap::new(),
            calls: Vec::new(),
        }
    }
}

impl MockState {
    /// Real time of the current (or last) run segment, honoring presets.
    fn segment_runtime(&mut self) -> f64 {
        let hold = self.hold_runs;
        let Some(run) = self.run.as_mut() else {
            return 0.0;
        };
        if let Some(t) = run.ended_at {
            return t;
        }

        let elapsed = run.started.elapsed().as_secs_f64();
        if hold {
            return elapsed;
        }
        let limit = match run.preset {
            PresetType::None => None,
            PresetType::FixedReal => Some(run.preset_value),
            PresetType::FixedLive => Some(run.preset_value / LIVE_FRACTION),
            PresetType::FixedEvents => Some(run.preset_value / MOCK_OUTPUT_RATE),
            PresetType::FixedTriggers => Some(run.preset_value / MOCK_INPUT_RATE),
        };
        match limit {
            Some(limit) if elapsed >= limit => {
                run.ended_at = Some(limit);
                limit
            }
            _ => elapsed,
        }
    }

    fn total_runtime(&mut self) -> f64 {
        let segment = self.segment_runtime();
        segment + self.run.as_ref().map_or(0.0, |r| r.prior_runtime)
    }

    fn run_active(&mut self) -> bool {
        self.segment_runtime();
        self.run.as_ref().is_some_and(|r| r.ended_at.is_none())
    }

    fn spectrum(&mut self, len: usize) -> Vec<c_ulong> {
        let events = MOCK_OUTPUT_RATE * self.total_runtime();
        if len == 0 {
            return Vec::new();
        }
        let centre = len as f64 * 0.3;
        let sigma = (len as f64 * 0.01).max(1.0);
        let weights: Vec<f64> = (0..len)
            .map(|i| {
                let x = (i as f64 - centre) / sigma;
                (-0.5 * x * x).exp() + 0.02
            })
            .collect();
        let total: f64 = weights.iter().sum();
        weights
            .into_iter()
            .map(|w| (events * w / total).round() as c_ulong)
            .collect()
    }
}

const LIVE_FRACTION: f64 = 0.9;

/// Simulated Handel backend.
#[derive(Debug, Clone, Default)]
pub struct MockHandel {
    state: Arc<Mutex<MockState>>,
}

impl MockHandel {
    /// A fresh, uninitialized mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `function` (e.g. `"xiaStartRun"`) return `status` until cleared.
    pub fn fail_on(&self, function: &'static str, status: i32) {
        self.state.lock().failures.insert(function, status);
    }

    /// Make `xiaSetAcquisitionValues` for `name` return `status` until
    /// cleared. Other names are still accepted.
    pub fn reject_value(&self, name: &str, status: i32) {
        self.state
            .lock()
            .rejected_values
            .insert(name.to_string(), status);
    }

    /// Remove all scripted failures, including rejected values.
    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failures.clear();
        state.rejected_values.clear();
    }

    /// Keep runs active regardless of their preset, as a wedged board would.
    pub fn hold_runs(&self, hold: bool) {
        self.state.lock().hold_runs = hold;
    }

    /// Journal of native calls, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Number of journaled calls to `function`.
    pub fn call_count(&self, function: &str) -> usize {
        let prefix = format!("{function}(");
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    /// Forget the journal.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Current value of an acquisition value in the simulated DSP.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.state.lock().values.get(name).copied()
    }

    /// Overwrite a stored value directly, skipping the DSP quantization, as a
    /// misconfigured board would report it.
    pub fn force_value(&self, name: &str, value: f64) {
        self.state.lock().values.insert(name.to_string(), value);
    }

    /// Memory masks passed to `apply`, in order.
    pub fn applied(&self) -> Vec<u16> {
        self.state.lock().applied.clone()
    }

    /// Whether `xiaInit` succeeded and `xiaExit` has not been called since.
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Log level and output last configured.
    pub fn log_settings(&self) -> (Option<i32>, Option<String>) {
        let state = self.state.lock();
        (state.log_level, state.log_output.clone())
    }

    /// Journal the call and return a scripted failure if one is set.
    fn enter(&self, function: &'static str, args: String) -> Option<i32> {
        let mut state = self.state.lock();
        state.calls.push(format!("{function}({args})"));
        let failure = state.failures.get(function).copied();
        if let Some(status) = failure {
            debug!(function, status, "Mock returning scripted failure");
        }
        failure
    }

    fn require_system(&self, det_chan: i32) -> Option<i32> {
        let state = self.state.lock();
        if !state.system_started {
            return Some(MOCK_NO_SYSTEM);
        }
        if det_chan != 0 {
            return Some(MOCK_INVALID_DETCHAN);
        }
        None
    }
}

fn name_str(name: &CStr) -> String {
    name.to_string_lossy().into_owned()
}

impl HandelApi for MockHandel {
    fn set_log_level(&mut self, level: i32) -> i32 {
        if let Some(status) = self.enter("xiaSetLogLevel", level.to_string()) {
            return status;
        }
        self.state.lock().log_level = Some(level);
        XIA_SUCCESS
    }

    fn set_log_output(&mut self, file_name: &CStr) -> i32 {
        let file_name = name_str(file_name);
        if let Some(status) = self.enter("xiaSetLogOutput", file_name.clone()) {
            return status;
        }
        self.state.lock().log_output = Some(file_name);
        XIA_SUCCESS
    }

    fn close_log(&mut self) -> i32 {
        self.enter("xiaCloseLog", String::new())
            .unwrap_or(XIA_SUCCESS)
    }

    fn init(&mut self, ini_file: &CStr) -> i32 {
        let ini = name_str(ini_file);
        if let Some(status) = self.enter("xiaInit", ini.clone()) {
            return status;
        }
        if !Path::new(&ini).is_file() {
            return XIA_OPEN_FILE;
        }
        let mut state = self.state.lock();
        state.initialized = true;
        state.system_started = false;
        XIA_SUCCESS
    }

    fn exit(&mut self) -> i32 {
        if let Some(status) = self.enter("xiaExit", String::new()) {
            return status;
        }
        let mut state = self.state.lock();
        state.initialized = false;
        state.system_started = false;
        state.run = None;
        XIA_SUCCESS
    }

    fn start_system(&mut self) -> i32 {
        if let Some(status) = self.enter("xiaStartSystem", String::new()) {
            return status;
        }
        let mut state = self.state.lock();
        if !state.initialized {
            return MOCK_NO_SYSTEM;
        }
        state.system_started = true;
        XIA_SUCCESS
    }

    fn board_operation(&mut self, det_chan: i32, name: &CStr, value: DataMut<'_>) -> i32 {
        let op = name_str(name);
        if let Some(status) = self.enter("xiaBoardOperation", format!("{det_chan}, {op}")) {
            return status;
        }
        if let Some(status) = self.require_system(det_chan) {
            return status;
        }

        let mut state = self.state.lock();
        match (op.as_str(), value) {
            ("apply", DataMut::UShort(mask)) => {
                state.applied.push(*mask);
                XIA_SUCCESS
            }
            ("get_board_info", DataMut::Bytes(buf)) if buf.len() >= BOARD_INFO_LEN => {
                buf[..BOARD_INFO_LEN].copy_from_slice(&MOCK_BOARD_INFO);
                XIA_SUCCESS
            }
            ("get_number_pt_per_fippi", DataMut::UShort(n)) => {
                *n = MOCK_PEAKING_TIMES.len() as u16;
                XIA_SUCCESS
            }
            ("get_current_peaking_times", DataMut::Doubles(buf)) => {
                let n = buf.len().min(MOCK_PEAKING_TIMES.len());
                buf[..n].copy_from_slice(&MOCK_PEAKING_TIMES[..n]);
                XIA_SUCCESS
            }
            ("apply" | "get_board_info" | "get_number_pt_per_fippi"
            | "get_current_peaking_times", _) => MOCK_BAD_ARGS,
            _ => MOCK_BAD_BOARD_OP,
        }
    }

    fn set_acquisition_values(&mut self, det_chan: i32, name: &CStr, value: &mut f64) -> i32 {
        let name = name_str(name);
        if let Some(status) =
            self.enter("xiaSetAcquisitionValues", format!("{det_chan}, {name}, {value}"))
        {
            return status;
        }
        if let Some(status) = self.require_system(det_chan) {
            return status;
        }

        let mut state = self.state.lock();
        if let Some(status) = state.rejected_values.get(&name).copied() {
            debug!(param = %name, status, "Mock rejecting acquisition value");
            return status;
        }
        if !state.values.contains_key(&name) {
            return MOCK_UNKNOWN_VALUE;
        }
        // The DSP quantizes some values; report back what was really set.
        match name.as_str() {
            "peaking_time" => {
                let (index, nearest) = MOCK_PEAKING_TIMES
                    .iter()
                    .copied()
                    .enumerate()
                    .min_by(|a, b| (a.1 - *value).abs().total_cmp(&(b.1 - *value).abs()))
                    .unwrap_or((0, MOCK_PEAKING_TIMES[0]));
                *value = nearest;
                state.values.insert("parset".to_string(), index as f64);
            }
            "number_mca_channels" => {
                *value = ((*value / 256.0).round() * 256.0).clamp(256.0, 8192.0);
            }
            _ => {}
        }
        state.values.insert(name, *value);
        XIA_SUCCESS
    }

    fn get_acquisition_values(&mut self, det_chan: i32, name: &CStr, value: &mut f64) -> i32 {
        let name = name_str(name);
        if let Some(status) = self.enter("xiaGetAcquisitionValues", format!("{det_chan}, {name}"))
        {
            return status;
        }
        if let Some(status) = self.require_system(det_chan) {
            return status;
        }
        match self.state.lock().values.get(&name) {
            Some(v) => {
                *value = *v;
                XIA_SUCCESS
            }
            None => MOCK_UNKNOWN_VALUE,
        }
    }

    fn start_run(&mut self, det_chan: i32, resume: u16) -> i32 {
        if let Some(status) = self.enter("xiaStartRun", format!("{det_chan}, {resume}")) {
            return status;
        }
        if let Some(status) = self.require_system(det_chan) {
            return status;
        }

        let mut state = self.state.lock();
        if state.run_active() {
            return MOCK_RUN_ACTIVE;
        }
        let prior_runtime = if resume == 0 {
            0.0
        } else {
            state.total_runtime()
        };
        let preset = state
            .values
            .get("preset_type")
            .and_then(|v| PresetType::from_value(*v))
            .unwrap_or(PresetType::None);
        let preset_value = state.values.get("preset_value").copied().unwrap_or(0.0);
        state.run = Some(MockRun {
            started: Instant::now(),
            prior_runtime,
            preset,
            preset_value,
            ended_at: None,
        });
        XIA_SUCCESS
    }

    fn stop_run(&mut self, det_chan: i32) -> i32 {
        if let Some(status) = self.enter("xiaStopRun", det_chan.to_string()) {
            return status;
        }
        if let Some(status) = self.require_system(det_chan) {
            return status;
        }

        let mut state = self.state.lock();
        let segment = state.segment_runtime();
        if let Some(run) = state.run.as_mut() {
            run.ended_at.get_or_insert(segment);
        }
        XIA_SUCCESS
    }

    fn get_run_data(&mut self, det_chan: i32, name: &CStr, value: DataMut<'_>) -> i32 {
        let name = name_str(name);
        if let Some(status) = self.enter("xiaGetRunData", format!("{det_chan}, {name}")) {
            return status;
        }
        if let Some(status) = self.require_system(det_chan) {
            return status;
        }

        let mut state = self.state.lock();
        let runtime = state.total_runtime();
        match (name.as_str(), value) {
            ("run_active", DataMut::ULong(v)) => *v = c_ulong::from(state.run_active()),
            ("events_in_run", DataMut::ULong(v)) => {
                *v = (MOCK_OUTPUT_RATE * runtime).round() as c_ulong
            }
            ("triggers", DataMut::ULong(v)) => {
                *v = (MOCK_INPUT_RATE * runtime).round() as c_ulong
            }
            ("output_count_rate", DataMut::Double(v)) => {
                *v = if runtime > 0.0 { MOCK_OUTPUT_RATE } else { 0.0 }
            }
            ("input_count_rate", DataMut::Double(v)) => {
                *v = if runtime > 0.0 { MOCK_INPUT_RATE } else { 0.0 }
            }
            ("runtime", DataMut::Double(v)) => *v = runtime,
            ("livetime", DataMut::Double(v)) => *v = runtime * LIVE_FRACTION,
            ("mca_length", DataMut::ULong(v)) => {
                *v = state.values.get("number_mca_channels").copied().unwrap_or(0.0) as c_ulong
            }
            ("mca", DataMut::ULongs(buf)) => {
                let spectrum = state.spectrum(buf.len());
                buf.copy_from_slice(&spectrum);
            }
            (
                "run_active" | "events_in_run" | "triggers" | "output_count_rate"
                | "input_count_rate" | "runtime" | "livetime" | "mca_length" | "mca",
                _,
            ) => return MOCK_BAD_ARGS,
            _ => return MOCK_BAD_NAME,
        }
        XIA_SUCCESS
    }

    fn get_num_detectors(&mut self, count: &mut u32) -> i32 {
        if let Some(status) = self.enter("xiaGetNumDetectors", String::new()) {
            return status;
        }
        *count = u32::from(self.state.lock().initialized);
        XIA_SUCCESS
    }

    fn get_num_modules(&mut self, count: &mut u32) -> i32 {
        if let Some(status) = self.enter("xiaGetNumModules", String::new()) {
            return status;
        }
        *count = u32::from(self.state.lock().initialized);
        XIA_SUCCESS
    }

    fn get_num_firmware_sets(&mut self, count: &mut u32) -> i32 {
        if let Some(status) = self.enter("xiaGetNumFirmwareSets", String::new()) {
            return status;
        }
        *count = u32::from(self.state.lock().initialized);
        XIA_SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn started() -> (MockHandel, tempfile::NamedTempFile) {
        let ini = tempfile::NamedTempFile::new().unwrap();
        let mut mock = MockHandel::new();
        let path = CString::new(ini.path().to_str().unwrap()).unwrap();
        assert_eq!(mock.init(&path), XIA_SUCCESS);
        assert_eq!(mock.start_system(), XIA_SUCCESS);
        (mock, ini)
    }

    #[test]
    fn test_init_missing_file() {
        let mut mock = MockHandel::new();
        let path = CString::new("/nonexistent/microdxp.ini").unwrap();
        assert_eq!(mock.init(&path), XIA_OPEN_FILE);
        assert!(!mock.is_initialized());
    }

    #[test]
    fn test_requires_system() {
        let mut mock = MockHandel::new();
        let name = CString::new("peaking_time").unwrap();
        let mut value = 0.0;
        assert_eq!(
            mock.get_acquisition_values(0, &name, &mut value),
            MOCK_NO_SYSTEM
        );
    }

    #[test]
    fn test_peaking_time_snaps() {
        let (mut mock, _ini) = started();
        let name = CString::new("peaking_time").unwrap();
        let mut value = 10.0;
        assert_eq!(mock.set_acquisition_values(0, &name, &mut value), XIA_SUCCESS);
        assert_eq!(value, 8.0);
        assert_eq!(mock.value("parset"), Some(1.0));
    }

    #[test]
    fn test_scripted_failure() {
        let (mut mock, _ini) = started();
        mock.fail_on("xiaStartRun", MOCK_RUN_ACTIVE);
        assert_eq!(mock.start_run(0, 0), MOCK_RUN_ACTIVE);
        mock.clear_failures();
        assert_eq!(mock.start_run(0, 0), XIA_SUCCESS);
        assert_eq!(mock.call_count("xiaStartRun"), 2);
    }

    #[test]
    fn test_rejected_value_leaves_store_untouched() {
        let (mut mock, _ini) = started();
        mock.reject_value("preset_value", MOCK_BAD_ARGS);
        let preset_value = CString::new("preset_value").unwrap();
        let gain = CString::new("gain").unwrap();

        let mut value = 3.0;
        assert_eq!(
            mock.set_acquisition_values(0, &preset_value, &mut value),
            MOCK_BAD_ARGS
        );
        assert_eq!(mock.value("preset_value"), Some(0.0));
        assert_eq!(mock.set_acquisition_values(0, &gain, &mut value), XIA_SUCCESS);

        mock.clear_failures();
        assert_eq!(
            mock.set_acquisition_values(0, &preset_value, &mut value),
            XIA_SUCCESS
        );
        assert_eq!(mock.value("preset_value"), Some(3.0));
    }

    #[test]
    fn test_spectrum_length() {
        let (mut mock, _ini) = started();
        let mut buf = vec![0 as c_ulong; 512];
        let name = CString::new("mca").unwrap();
        assert_eq!(
            mock.get_run_data(0, &name, DataMut::ULongs(&mut buf)),
            XIA_SUCCESS
        );
        // No run yet, so nothing accumulated.
        assert!(buf.iter().all(|&c| c == 0));
    }
}
