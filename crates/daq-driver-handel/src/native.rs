//! Backend that forwards to the real vendor library.

#![allow(unsafe_code)]

use std::ffi::CStr;
use std::path::Path;

use handel_sys::HandelLibrary;
use tracing::trace;

use crate::api::{DataMut, HandelApi};
use crate::error::Result;

/// [`HandelApi`] over a loaded `libhandel`.
#[derive(Debug)]
pub struct NativeHandel {
    lib: HandelLibrary,
}

impl NativeHandel {
    /// Load the vendor library from `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            lib: HandelLibrary::load(path)?,
        })
    }

    /// The underlying library.
    pub fn library(&self) -> &HandelLibrary {
        &self.lib
    }
}

// SAFETY (all methods): names are NUL-terminated `CStr`s and every out
// pointer comes from a live `&mut` owned by the caller for the duration of
// the call. Buffer sizes are the session's responsibility.
impl HandelApi for NativeHandel {
    fn set_log_level(&mut self, level: i32) -> i32 {
        unsafe { self.lib.xia_set_log_level(level) }
    }

    fn set_log_output(&mut self, file_name: &CStr) -> i32 {
        unsafe { self.lib.xia_set_log_output(file_name.as_ptr()) }
    }

    fn close_log(&mut self) -> i32 {
        unsafe { self.lib.xia_close_log() }.unwrap_or(handel_sys::XIA_SUCCESS)
    }

    fn init(&mut self, ini_file: &CStr) -> i32 {
        unsafe { self.lib.xia_init(ini_file.as_ptr()) }
    }

    fn exit(&mut self) -> i32 {
        unsafe { self.lib.xia_exit() }
    }

    fn start_system(&mut self) -> i32 {
        unsafe { self.lib.xia_start_system() }
    }

    fn board_operation(&mut self, det_chan: i32, name: &CStr, mut value: DataMut<'_>) -> i32 {
        trace!(det_chan, op = ?name, kind = value.kind(), "xiaBoardOperation");
        unsafe {
            self.lib
                .xia_board_operation(det_chan, name.as_ptr(), value.as_mut_ptr())
        }
    }

    fn set_acquisition_values(&mut self, det_chan: i32, name: &CStr, value: &mut f64) -> i32 {
        unsafe {
            self.lib.xia_set_acquisition_values(
                det_chan,
                name.as_ptr(),
                (value as *mut f64).cast(),
            )
        }
    }

    fn get_acquisition_values(&mut self, det_chan: i32, name: &CStr, value: &mut f64) -> i32 {
        unsafe {
            self.lib.xia_get_acquisition_values(
                det_chan,
                name.as_ptr(),
                (value as *mut f64).cast(),
            )
        }
    }

    fn start_run(&mut self, det_chan: i32, resume: u16) -> i32 {
        unsafe { self.lib.xia_start_run(det_chan, resume) }
    }

    fn stop_run(&mut self, det_chan: i32) -> i32 {
        unsafe { self.lib.xia_stop_run(det_chan) }
    }

    fn get_run_data(&mut self, det_chan: i32, name: &CStr, mut value: DataMut<'_>) -> i32 {
        trace!(det_chan, param = ?name, kind = value.kind(), "xiaGetRunData");
        unsafe {
            self.lib
                .xia_get_run_data(det_chan, name.as_ptr(), value.as_mut_ptr())
        }
    }

    fn get_num_detectors(&mut self, count: &mut u32) -> i32 {
        unsafe { self.lib.xia_get_num_detectors(count) }
    }

    fn get_num_modules(&mut self, count: &mut u32) -> i32 {
        unsafe { self.lib.xia_get_num_modules(count) }
    }

    fn get_num_firmware_sets(&mut self, count: &mut u32) -> i32 {
        unsafe { self.lib.xia_get_num_firmware_sets(count) }
    }
}
