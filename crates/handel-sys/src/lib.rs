//! Low-level bindings for the XIA Handel library.
//!
//! Handel is the vendor-supplied driver library for XIA digital pulse
//! processors (microDXP, Saturn, Mercury and relatives). It is distributed as
//! a closed-source shared library (`handel.dll` / `libhandel.so`), so this
//! crate does not link against it at build time. Instead [`HandelLibrary`]
//! opens the library by path at runtime and resolves the exported `xia*`
//! functions the driver uses.
//!
//! # Safety
//!
//! All call-through methods are `unsafe`: they forward raw pointers straight
//! into the vendor library. For a safe wrapper, use the `daq-driver-handel`
//! crate instead.
//!
//! # Example (unsafe)
//!
//! ```no_run
//! use handel_sys::{HandelLibrary, XIA_SUCCESS};
//! use std::ffi::CString;
//!
//! let lib = HandelLibrary::load("/usr/local/lib/libhandel.so")?;
//! let ini = CString::new("microdxp.ini").unwrap();
//! let status = unsafe { lib.xia_init(ini.as_ptr()) };
//! if status == XIA_SUCCESS {
//!     unsafe { lib.xia_exit() };
//! }
//! # Ok::<(), handel_sys::LoadError>(())
//! ```

#![allow(unsafe_code)]

use libloading::Library;
use std::os::raw::{c_char, c_int, c_uint, c_ushort, c_void};
use std::path::{Path, PathBuf};
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Status returned by every Handel function on success.
pub const XIA_SUCCESS: c_int = 0;

/// `preset_type` values (exchanged as doubles).
pub const XIA_PRESET_NONE: f64 = 0.0;
/// Run ends after a fixed real time (seconds).
pub const XIA_PRESET_FIXED_REAL: f64 = 1.0;
/// Run ends after a fixed live time (seconds).
pub const XIA_PRESET_FIXED_LIVE: f64 = 2.0;
/// Run ends after a fixed number of output events.
pub const XIA_PRESET_FIXED_EVENTS: f64 = 3.0;
/// Run ends after a fixed number of input triggers.
pub const XIA_PRESET_FIXED_TRIGGERS: f64 = 4.0;

/// Memory selectors for the `apply` board operation.
pub const AV_MEM_REQ: c_ushort = 0x01;
/// Parameter set memory.
pub const AV_MEM_PARSET: c_ushort = 0x02;
/// General settings memory.
pub const AV_MEM_GENSET: c_ushort = 0x04;
/// FiPPI parameter memory.
pub const AV_MEM_FIPPI: c_ushort = 0x08;
/// ADC parameter memory.
pub const AV_MEM_ADC: c_ushort = 0x10;
/// Global parameter memory.
pub const AV_MEM_GLOB: c_ushort = 0x20;
/// Custom parameter memory.
pub const AV_MEM_CUST: c_ushort = 0x40;

/// Handel log levels for `xiaSetLogLevel`.
pub const MD_ERROR: c_int = 1;
/// Warnings and errors.
pub const MD_WARNING: c_int = 2;
/// Informational messages.
pub const MD_INFO: c_int = 3;
/// Everything, including debug traces.
pub const MD_DEBUG: c_int = 4;

// =============================================================================
// Function signatures
// =============================================================================

/// `int xiaInit(char *iniFile);`
pub type XiaInitFn = unsafe extern "C" fn(ini_file: *const c_char) -> c_int;
/// `int xiaExit(void);`
pub type XiaExitFn = unsafe extern "C" fn() -> c_int;
/// `int xiaStartSystem(void);`
pub type XiaStartSystemFn = unsafe extern "C" fn() -> c_int;
/// `int xiaSetLogLevel(int level);`
pub type XiaSetLogLevelFn = unsafe extern "C" fn(level: c_int) -> c_int;
/// `int xiaSetLogOutput(char *fileName);`
pub type XiaSetLogOutputFn = unsafe extern "C" fn(file_name: *const c_char) -> c_int;
/// `int xiaCloseLog(void);`
pub type XiaCloseLogFn = unsafe extern "C" fn() -> c_int;
/// `int xiaBoardOperation(int detChan, char *name, void *value);`
pub type XiaBoardOperationFn =
    unsafe extern "C" fn(det_chan: c_int, name: *const c_char, value: *mut c_void) -> c_int;
/// `int xiaSetAcquisitionValues(int detChan, char *name, void *value);`
pub type XiaSetAcquisitionValuesFn =
    unsafe extern "C" fn(det_chan: c_int, name: *const c_char, value: *mut c_void) -> c_int;
/// `int xiaGetAcquisitionValues(int detChan, char *name, void *value);`
pub type XiaGetAcquisitionValuesFn =
    unsafe extern "C" fn(det_chan: c_int, name: *const c_char, value: *mut c_void) -> c_int;
/// `int xiaStartRun(int detChan, unsigned short resume);`
pub type XiaStartRunFn = unsafe extern "C" fn(det_chan: c_int, resume: c_ushort) -> c_int;
/// `int xiaStopRun(int detChan);`
pub type XiaStopRunFn = unsafe extern "C" fn(det_chan: c_int) -> c_int;
/// `int xiaGetRunData(int detChan, char *name, void *value);`
pub type XiaGetRunDataFn =
    unsafe extern "C" fn(det_chan: c_int, name: *const c_char, value: *mut c_void) -> c_int;
/// `int xiaGetNumDetectors(unsigned int *numDet);` and friends.
pub type XiaGetCountFn = unsafe extern "C" fn(count: *mut c_uint) -> c_int;

// =============================================================================
// Loader
// =============================================================================

/// Errors raised while opening the vendor library.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The shared library could not be opened.
    #[error("Failed to load Handel library '{}': {source}", .path.display())]
    Library {
        /// Path that was passed to the loader.
        path: PathBuf,
        /// Error reported by the dynamic loader.
        #[source]
        source: libloading::Error,
    },

    /// A required export is missing from the library.
    #[error("Symbol '{symbol}' not found in Handel library '{}'", .path.display())]
    SymbolNotFound {
        /// Library that was opened.
        path: PathBuf,
        /// Name of the missing export.
        symbol: &'static str,
    },
}

/// Resolved Handel entry points.
#[derive(Clone, Copy)]
struct Functions {
    init: XiaInitFn,
    exit: XiaExitFn,
    start_system: XiaStartSystemFn,
    set_log_level: XiaSetLogLevelFn,
    set_log_output: XiaSetLogOutputFn,
    close_log: Option<XiaCloseLogFn>,
    board_operation: XiaBoardOperationFn,
    set_acquisition_values: XiaSetAcquisitionValuesFn,
    get_acquisition_values: XiaGetAcquisitionValuesFn,
    start_run: XiaStartRunFn,
    stop_run: XiaStopRunFn,
    get_run_data: XiaGetRunDataFn,
    get_num_detectors: XiaGetCountFn,
    get_num_modules: XiaGetCountFn,
    get_num_firmware_sets: XiaGetCountFn,
}

/// A loaded Handel library with its function pointers resolved.
///
/// The function pointers stay valid for as long as this value lives, since it
/// owns the underlying [`Library`].
pub struct HandelLibrary {
    // Keeps the code behind `fns` mapped.
    _library: Library,
    path: PathBuf,
    fns: Functions,
}

/// Resolve a required symbol, copying the function pointer out.
///
/// # Safety
///
/// `T` must match the symbol's real signature.
unsafe fn required<T: Copy>(
    library: &Library,
    path: &Path,
    symbol: &'static str,
) -> Result<T, LoadError> {
    let mut name = Vec::with_capacity(symbol.len() + 1);
    name.extend_from_slice(symbol.as_bytes());
    name.push(0);
    library
        .get::<T>(&name)
        .map(|s| *s)
        .map_err(|_| LoadError::SymbolNotFound {
            path: path.to_path_buf(),
            symbol,
        })
}

impl HandelLibrary {
    /// Open the Handel shared library at `path` and resolve its exports.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be loaded or a required `xia*` export is
    /// missing. `xiaCloseLog` is optional since older releases lack it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();

        // SAFETY: loading runs the library's initializers; Handel has none
        // beyond its own static setup.
        let library = unsafe { Library::new(path) }.map_err(|source| LoadError::Library {
            path: path.to_path_buf(),
            source,
        })?;

        // SAFETY: every type alias above mirrors the prototype in handel.h.
        let fns = unsafe {
            Functions {
                init: required(&library, path, "xiaInit")?,
                exit: required(&library, path, "xiaExit")?,
                start_system: required(&library, path, "xiaStartSystem")?,
                set_log_level: required(&library, path, "xiaSetLogLevel")?,
                set_log_output: required(&library, path, "xiaSetLogOutput")?,
                close_log: library
                    .get::<XiaCloseLogFn>(b"xiaCloseLog\0")
                    .ok()
                    .map(|s| *s),
                board_operation: required(&library, path, "xiaBoardOperation")?,
                set_acquisition_values: required(&library, path, "xiaSetAcquisitionValues")?,
                get_acquisition_values: required(&library, path, "xiaGetAcquisitionValues")?,
                start_run: required(&library, path, "xiaStartRun")?,
                stop_run: required(&library, path, "xiaStopRun")?,
                get_run_data: required(&library, path, "xiaGetRunData")?,
                get_num_detectors: required(&library, path, "xiaGetNumDetectors")?,
                get_num_modules: required(&library, path, "xiaGetNumModules")?,
                get_num_firmware_sets: required(&library, path, "xiaGetNumFirmwareSets")?,
            }
        };

        tracing::info!(
            path = %path.display(),
            has_close_log = fns.close_log.is_some(),
            "Loaded Handel library"
        );

        Ok(Self {
            _library: library,
            path: path.to_path_buf(),
            fns,
        })
    }

    /// Path the library was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this build of Handel exports `xiaCloseLog`.
    pub fn has_close_log(&self) -> bool {
        self.fns.close_log.is_some()
    }

    /// # Safety
    /// `ini_file` must be a valid NUL-terminated string.
    pub unsafe fn xia_init(&self, ini_file: *const c_char) -> c_int {
        (self.fns.init)(ini_file)
    }

    /// # Safety
    /// Calls into the vendor library.
    pub unsafe fn xia_exit(&self) -> c_int {
        (self.fns.exit)()
    }

    /// # Safety
    /// Calls into the vendor library.
    pub unsafe fn xia_start_system(&self) -> c_int {
        (self.fns.start_system)()
    }

    /// # Safety
    /// Calls into the vendor library.
    pub unsafe fn xia_set_log_level(&self, level: c_int) -> c_int {
        (self.fns.set_log_level)(level)
    }

    /// # Safety
    /// `file_name` must be a valid NUL-terminated string.
    pub unsafe fn xia_set_log_output(&self, file_name: *const c_char) -> c_int {
        (self.fns.set_log_output)(file_name)
    }

    /// Returns `None` when the library does not export `xiaCloseLog`.
    ///
    /// # Safety
    /// Calls into the vendor library.
    pub unsafe fn xia_close_log(&self) -> Option<c_int> {
        self.fns.close_log.map(|f| f())
    }

    /// # Safety
    /// `name` must be NUL-terminated and `value` must point to storage of the
    /// type and size the named operation writes.
    pub unsafe fn xia_board_operation(
        &self,
        det_chan: c_int,
        name: *const c_char,
        value: *mut c_void,
    ) -> c_int {
        (self.fns.board_operation)(det_chan, name, value)
    }

    /// # Safety
    /// `name` must be NUL-terminated and `value` must point to a `double`.
    pub unsafe fn xia_set_acquisition_values(
        &self,
        det_chan: c_int,
        name: *const c_char,
        value: *mut c_void,
    ) -> c_int {
        (self.fns.set_acquisition_values)(det_chan, name, value)
    }

    /// # Safety
    /// `name` must be NUL-terminated and `value` must point to a `double`.
    pub unsafe fn xia_get_acquisition_values(
        &self,
        det_chan: c_int,
        name: *const c_char,
        value: *mut c_void,
    ) -> c_int {
        (self.fns.get_acquisition_values)(det_chan, name, value)
    }

    /// # Safety
    /// Calls into the vendor library.
    pub unsafe fn xia_start_run(&self, det_chan: c_int, resume: c_ushort) -> c_int {
        (self.fns.start_run)(det_chan, resume)
    }

    /// # Safety
    /// Calls into the vendor library.
    pub unsafe fn xia_stop_run(&self, det_chan: c_int) -> c_int {
        (self.fns.stop_run)(det_chan)
    }

    /// # Safety
    /// `name` must be NUL-terminated and `value` must point to storage large
    /// enough for the named run data (e.g. `mca_length` words for `"mca"`).
    pub unsafe fn xia_get_run_data(
        &self,
        det_chan: c_int,
        name: *const c_char,
        value: *mut c_void,
    ) -> c_int {
        (self.fns.get_run_data)(det_chan, name, value)
    }

    /// # Safety
    /// `count` must be a valid pointer.
    pub unsafe fn xia_get_num_detectors(&self, count: *mut c_uint) -> c_int {
        (self.fns.get_num_detectors)(count)
    }

    /// # Safety
    /// `count` must be a valid pointer.
    pub unsafe fn xia_get_num_modules(&self, count: *mut c_uint) -> c_int {
        (self.fns.get_num_modules)(count)
    }

    /// # Safety
    /// `count` must be a valid pointer.
    pub unsafe fn xia_get_num_firmware_sets(&self, count: *mut c_uint) -> c_int {
        (self.fns.get_num_firmware_sets)(count)
    }
}

impl std::fmt::Debug for HandelLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandelLibrary")
            .field("path", &self.path)
            .field("has_close_log", &self.has_close_log())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_constants() {
        assert_eq!(XIA_PRESET_NONE, 0.0);
        assert_eq!(XIA_PRESET_FIXED_REAL, 1.0);
        assert_eq!(XIA_PRESET_FIXED_TRIGGERS, 4.0);
    }

    #[test]
    fn test_apply_mask() {
        assert_eq!(AV_MEM_PARSET | AV_MEM_GENSET, 0x06);
    }

    #[test]
    fn test_missing_library() {
        let err = HandelLibrary::load("/nonexistent/libhandel.so").unwrap_err();
        assert!(matches!(err, LoadError::Library { .. }));
        assert!(err.to_string().contains("/nonexistent/libhandel.so"));
    }

    #[test]
    fn test_missing_symbol_names_export_and_path() {
        let err = LoadError::SymbolNotFound {
            path: PathBuf::from("/opt/xia/libhandel.so"),
            symbol: "xiaStartSystem",
        };
        let text = err.to_string();
        assert!(text.contains("xiaStartSystem"));
        assert!(text.contains("/opt/xia/libhandel.so"));
        assert!(std::error::Error::source(&err).is_none());
    }
}
