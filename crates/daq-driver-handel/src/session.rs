//! The Handel session: one library, one detector channel.
//!
//! [`Handel`] owns a backend and forwards each operation to the matching
//! native function, translating the returned status through
//! [`crate::status`]. The session is single-owner and blocking, matching the
//! process-global nature of Handel itself.

use std::ffi::CString;
use std::os::raw::{c_ulong, c_ushort};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::acquisition::{self, AcquisitionValue, LogLevel, MemoryFlags, PresetType};
use crate::api::{DataMut, HandelApi};
use crate::board::{
    BoardInfo, BOARD_INFO_LEN, OP_APPLY, OP_GET_BOARD_INFO, OP_GET_CURRENT_PEAKING_TIMES,
    OP_GET_NUMBER_PT_PER_FIPPI,
};
use crate::config::HandelConfig;
use crate::error::{HandelError, Result};
use crate::native::NativeHandel;
use crate::run::RunPolicy;
use crate::status::{check, check_quiet};

/// Largest spectrum [`Handel::read_mca`] will allocate for.
pub const MAX_MCA_CHANNELS: usize = 8192;

fn to_cstring(argument: &str, value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| HandelError::InvalidString {
        argument: argument.to_string(),
    })
}

fn path_cstring(argument: &str, path: &Path) -> Result<CString> {
    to_cstring(argument, &path.to_string_lossy())
}

/// Handel log configuration applied through [`Handel::set_logging`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Verbosity.
    pub level: LogLevel,
    /// Log file written by the library.
    pub output: PathBuf,
}

/// A session with the Handel library.
///
/// Dropping an initialized session calls `xiaExit`.
pub struct Handel<A: HandelApi = NativeHandel> {
    pub(crate) api: A,
    pub(crate) det_chan: i32,
    pub(crate) policy: RunPolicy,
    ini_file: Option<PathBuf>,
    log: Option<LogSettings>,
    system_started: bool,
}

impl Handel<NativeHandel> {
    /// Load the vendor library from `library`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use daq_driver_handel::Handel;
    ///
    /// let mut handel = Handel::load("/usr/local/lib/libhandel.so")?;
    /// handel.init("microdxp.ini")?;
    /// handel.start_system()?;
    /// println!("{} detector(s)", handel.num_detectors()?);
    /// # Ok::<(), daq_driver_handel::HandelError>(())
    /// ```
    pub fn load<P: AsRef<Path>>(library: P) -> Result<Self> {
        Ok(Self::with_api(NativeHandel::load(library)?))
    }

    /// Load the library named in `config`, then bring the system up as
    /// [`Handel::start_from_config`] does.
    pub fn open(config: &HandelConfig) -> Result<Self> {
        let mut handel = Self::load(&config.library)?;
        handel.start_from_config(config)?;
        Ok(handel)
    }
}

impl<A: HandelApi> Handel<A> {
    /// Wrap an arbitrary backend (e.g. [`crate::MockHandel`]).
    pub fn with_api(api: A) -> Self {
        Self {
            api,
            det_chan: 0,
            policy: RunPolicy::default(),
            ini_file: None,
            log: None,
            system_started: false,
        }
    }

    /// Use `det_chan` for every channel-addressed call.
    pub fn with_detector_channel(mut self, det_chan: i32) -> Self {
        self.det_chan = det_chan;
        self
    }

    /// Use `policy` for fixed-length runs.
    pub fn with_run_policy(mut self, policy: RunPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Detector channel this session addresses.
    pub fn detector_channel(&self) -> i32 {
        self.det_chan
    }

    /// Polling policy for fixed-length runs.
    pub fn run_policy(&self) -> &RunPolicy {
        &self.policy
    }

    /// `.ini` file loaded by the last successful `init`.
    pub fn ini_file(&self) -> Option<&Path> {
        self.ini_file.as_deref()
    }

    /// Log settings applied by the last successful `set_logging`.
    pub fn log_settings(&self) -> Option<&LogSettings> {
        self.log.as_ref()
    }

    /// Whether `start_system` succeeded since the last `init`.
    pub fn is_system_started(&self) -> bool {
        self.system_started
    }

    /// The acquisition values this driver accepts.
    pub fn allowed_acquisition_values() -> &'static [AcquisitionValue] {
        acquisition::ACQUISITION_VALUES
    }

    /// Apply everything in `config`: logging, `init`, `start_system`,
    /// detector channel, run policy and initial acquisition values.
    pub fn start_from_config(&mut self, config: &HandelConfig) -> Result<()> {
        config.validate()?;
        self.det_chan = config.detector_channel;
        self.policy = config.run.clone();
        if let Some(log) = &config.log {
            self.set_logging(log.level, &log.output)?;
        }
        self.init(&config.ini_file)?;
        self.start_system()?;
        if !config.acquisition.is_empty() {
            let params: Vec<(&str, f64)> = config
                .acquisition
                .iter()
                .map(|(name, value)| (name.as_str(), *value))
                .collect();
            self.set_acquisition_values(&params)?;
        }
        Ok(())
    }

    /// Set Handel's log level and log file.
    pub fn set_logging<P: AsRef<Path>>(&mut self, level: LogLevel, output: P) -> Result<()> {
        let output = output.as_ref();
        let c_output = path_cstring("output", output)?;

        check(
            self.api.set_log_level(level.as_raw()),
            &format!("Log level set to {level:?}"),
        )?;
        check(
            self.api.set_log_output(&c_output),
            &format!("Logfile set to {}", output.display()),
        )?;

        self.log = Some(LogSettings {
            level,
            output: output.to_path_buf(),
        });
        Ok(())
    }

    /// Initialize Handel from an `.ini` file.
    pub fn init<P: AsRef<Path>>(&mut self, ini_file: P) -> Result<()> {
        let ini_file = ini_file.as_ref();
        let c_ini = path_cstring("ini_file", ini_file)?;

        check(self.api.init(&c_ini), "Loading system...")?;

        self.ini_file = Some(ini_file.to_path_buf());
        self.system_started = false;
        Ok(())
    }

    /// Disconnect from the hardware and release Handel's data structures.
    pub fn exit(&mut self) -> Result<()> {
        let result = self.exit_inner();
        self.ini_file = None;
        self.system_started = false;
        result
    }

    fn exit_inner(&mut self) -> Result<()> {
        check(self.api.exit(), "Exiting...")?;
        if self.log.take().is_some() {
            check_quiet(self.api.close_log(), "Closing Handel log")?;
        }
        Ok(())
    }

    /// Start the system defined by the loaded `.ini` file.
    pub fn start_system(&mut self) -> Result<()> {
        if self.ini_file.is_none() {
            return Err(HandelError::NotInitialized {
                operation: "start_system",
            });
        }
        check(self.api.start_system(), "Starting system...")?;
        self.system_started = true;
        Ok(())
    }

    /// Run a board operation that takes a `double`, returning the value the
    /// library left in it.
    pub fn board_operation(&mut self, name: &str, value: f64) -> Result<f64> {
        let mut value = value;
        self.board_operation_raw(name, DataMut::Double(&mut value))?;
        Ok(value)
    }

    /// Run a board operation with a caller-typed argument.
    ///
    /// The buffer must have the type and size the operation expects; the
    /// library does not check.
    pub fn board_operation_raw(&mut self, name: &str, value: DataMut<'_>) -> Result<()> {
        let c_name = to_cstring("name", name)?;
        debug!(op = name, kind = value.kind(), "Board operation");
        check_quiet(
            self.api.board_operation(self.det_chan, &c_name, value),
            &format!("Board operation '{name}'"),
        )
    }

    /// Set an acquisition value, returning the value the hardware accepted.
    pub fn set_acquisition_value(&mut self, name: &str, value: f64) -> Result<f64> {
        acquisition::validate(name)?;
        let c_name = to_cstring("name", name)?;
        let mut actual = value;
        check(
            self.api
                .set_acquisition_values(self.det_chan, &c_name, &mut actual),
            &format!("Setting '{name}' to {value}..."),
        )?;
        if actual != value {
            info!(param = name, requested = value, actual, "Hardware adjusted acquisition value");
        }
        Ok(actual)
    }

    /// Read the current setting of an acquisition value.
    pub fn get_acquisition_value(&mut self, name: &str) -> Result<f64> {
        acquisition::validate(name)?;
        let c_name = to_cstring("name", name)?;
        let mut value = 0.0;
        check_quiet(
            self.api
                .get_acquisition_values(self.det_chan, &c_name, &mut value),
            &format!("Reading '{name}'"),
        )?;
        debug!(param = name, value, "Read acquisition value");
        Ok(value)
    }

    /// Read every acquisition value in the catalog.
    ///
    /// Values the connected product does not support are logged and left out.
    pub fn get_all_acquisition_values(&mut self) -> Result<Vec<(&'static str, f64)>> {
        let mut values = Vec::with_capacity(acquisition::ACQUISITION_VALUES.len());
        for av in acquisition::ACQUISITION_VALUES {
            match self.get_acquisition_value(av.name) {
                Ok(value) => values.push((av.name, value)),
                Err(e) => debug!(param = av.name, error = %e, "Skipping acquisition value"),
            }
        }
        Ok(values)
    }

    /// Set several acquisition values, then `apply` them.
    ///
    /// Every name is checked first; if any is unknown nothing is sent to the
    /// hardware.
    pub fn set_acquisition_values(&mut self, params: &[(&str, f64)]) -> Result<()> {
        for (name, _) in params {
            acquisition::validate(name)?;
        }
        for (name, value) in params {
            self.set_acquisition_value(name, *value)?;
        }
        self.apply()
    }

    /// Commit pending acquisition values (parameter and general sets).
    pub fn apply(&mut self) -> Result<()> {
        let c_name = to_cstring("name", OP_APPLY)?;
        let mut mask: c_ushort = MemoryFlags::APPLY.bits();
        check(
            self.api
                .board_operation(self.det_chan, &c_name, DataMut::UShort(&mut mask)),
            "Applying changes...",
        )
    }

    /// Start a run. With `clear_mca` the spectrum is cleared first, otherwise
    /// the run resumes accumulating into it.
    pub fn start_run(&mut self, clear_mca: bool) -> Result<()> {
        let resume = u16::from(!clear_mca);
        check_quiet(self.api.start_run(self.det_chan, resume), "Starting run")?;

        let run_type = self
            .get_acquisition_value("preset_type")
            .ok()
            .and_then(PresetType::from_value)
            .map_or_else(|| "unknown".to_string(), |p| p.to_string());
        info!("Run type {run_type} started...");
        Ok(())
    }

    /// Stop the active run, if there is one. Returns whether a run was stopped.
    pub fn stop_run(&mut self) -> Result<bool> {
        if !self.run_active()? {
            info!("No run started. Nothing to do...");
            return Ok(false);
        }
        check(self.api.stop_run(self.det_chan), "Stopped...")?;
        Ok(true)
    }

    /// Whether a run is in progress.
    pub fn run_active(&mut self) -> Result<bool> {
        let mut active: c_ulong = 0;
        self.run_data("run_active", DataMut::ULong(&mut active))?;
        Ok(active != 0)
    }

    pub(crate) fn run_data(&mut self, name: &str, value: DataMut<'_>) -> Result<()> {
        let c_name = to_cstring("name", name)?;
        check_quiet(
            self.api.get_run_data(self.det_chan, &c_name, value),
            &format!("Reading run data '{name}'"),
        )
    }

    /// Read the MCA spectrum, one entry per bin.
    ///
    /// The length comes from `number_mca_channels` and must not exceed
    /// [`MAX_MCA_CHANNELS`].
    pub fn read_mca(&mut self) -> Result<Vec<u64>> {
        let bins = self.get_acquisition_value("number_mca_channels")?;
        if !bins.is_finite() || bins < 0.0 || bins > MAX_MCA_CHANNELS as f64 {
            return Err(HandelError::InvalidArgument {
                message: format!(
                    "hardware reported {bins} MCA channels (at most {MAX_MCA_CHANNELS} supported)"
                ),
            });
        }

        let mut mca = vec![0 as c_ulong; bins as usize];
        let c_name = to_cstring("name", "mca")?;
        check(
            self.api
                .get_run_data(self.det_chan, &c_name, DataMut::ULongs(&mut mca)),
            "Pulling MCA...",
        )?;
        Ok(mca.into_iter().map(u64::from).collect())
    }

    /// Read the board identification block.
    pub fn board_info(&mut self) -> Result<BoardInfo> {
        let mut raw = [0u8; BOARD_INFO_LEN];
        self.board_operation_raw(OP_GET_BOARD_INFO, DataMut::Bytes(&mut raw))?;
        Ok(BoardInfo::from_bytes(raw))
    }

    /// Number of peaking times available per FiPPI.
    pub fn number_of_peaking_times(&mut self) -> Result<u16> {
        let mut n: c_ushort = 0;
        self.board_operation_raw(OP_GET_NUMBER_PT_PER_FIPPI, DataMut::UShort(&mut n))?;
        info!("Number of peaking times per FiPPI: {n}");
        Ok(n)
    }

    /// Peaking times (µs) of the current parameter set.
    pub fn current_peaking_times(&mut self) -> Result<Vec<f64>> {
        let n = self.number_of_peaking_times()?;
        let mut times = vec![0.0; usize::from(n)];
        self.board_operation_raw(OP_GET_CURRENT_PEAKING_TIMES, DataMut::Doubles(&mut times))?;
        Ok(times)
    }

    /// Number of detectors defined in the system.
    pub fn num_detectors(&mut self) -> Result<u32> {
        let mut n = 0;
        check_quiet(
            self.api.get_num_detectors(&mut n),
            "Could not read number of defined detectors",
        )?;
        info!("There are currently {n} detectors defined");
        Ok(n)
    }

    /// Number of modules defined in the system.
    pub fn num_modules(&mut self) -> Result<u32> {
        let mut n = 0;
        check_quiet(
            self.api.get_num_modules(&mut n),
            "Could not read number of defined modules",
        )?;
        info!("There are currently {n} modules defined");
        Ok(n)
    }

    /// Number of firmware sets defined in the system.
    pub fn num_firmware_sets(&mut self) -> Result<u32> {
        let mut n = 0;
        check_quiet(
            self.api.get_num_firmware_sets(&mut n),
            "Could not read number of defined firmware sets",
        )?;
        info!("There are currently {n} firmware sets defined");
        Ok(n)
    }
}

impl<A: HandelApi> Drop for Handel<A> {
    fn drop(&mut self) {
        if self.ini_file.is_some() {
            debug!("Closing Handel session");
            if let Err(e) = self.exit_inner() {
                warn!(error = %e, "Error shutting down Handel");
            }
        }
    }
}

impl<A: HandelApi> std::fmt::Debug for Handel<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handel")
            .field("det_chan", &self.det_chan)
            .field("ini_file", &self.ini_file)
            .field("log", &self.log)
            .field("system_started", &self.system_started)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockHandel;

    #[test]
    fn test_nul_in_name_rejected() {
        let mut handel = Handel::with_api(MockHandel::new());
        let err = handel.board_operation("app\0ly", 0.0).unwrap_err();
        assert!(matches!(err, HandelError::InvalidString { .. }));
    }

    #[test]
    fn test_start_system_requires_init() {
        let mock = MockHandel::new();
        let mut handel = Handel::with_api(mock.clone());
        let err = handel.start_system().unwrap_err();
        assert!(matches!(err, HandelError::NotInitialized { .. }));
        assert_eq!(mock.call_count("xiaStartSystem"), 0);
    }

    #[test]
    fn test_unknown_value_never_forwarded() {
        let mock = MockHandel::new();
        let mut handel = Handel::with_api(mock.clone());
        assert!(handel.set_acquisition_value("peeking_time", 4.0).is_err());
        assert!(handel.get_acquisition_value("peeking_time").is_err());
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_drop_without_init_does_not_exit() {
        let mock = MockHandel::new();
        drop(Handel::with_api(mock.clone()));
        assert_eq!(mock.call_count("xiaExit"), 0);
    }
}
