//! Backend seam between the session and the vendor library.
//!
//! [`HandelApi`] has one method per native function and returns the raw
//! status code, so status translation stays in one place (the session).
//! Out-parameters travel as [`DataMut`], a typed view of the caller's buffer
//! that the native backend lowers to the `void *` Handel expects.

use std::ffi::CStr;
use std::os::raw::{c_ulong, c_ushort, c_void};

/// Typed by-reference argument for `xiaBoardOperation`, `xiaGetRunData` and
/// the acquisition value calls.
#[derive(Debug)]
pub enum DataMut<'a> {
    /// `unsigned short`
    UShort(&'a mut c_ushort),
    /// `unsigned long`
    ULong(&'a mut c_ulong),
    /// `double`
    Double(&'a mut f64),
    /// `double[]`
    Doubles(&'a mut [f64]),
    /// `unsigned long[]`, used for MCA spectra.
    ULongs(&'a mut [c_ulong]),
    /// `char[]` / `byte[]`
    Bytes(&'a mut [u8]),
}

impl DataMut<'_> {
    /// Pointer handed to the native library.
    pub fn as_mut_ptr(&mut self) -> *mut c_void {
        match self {
            Self::UShort(v) => (&mut **v as *mut c_ushort).cast(),
            Self::ULong(v) => (&mut **v as *mut c_ulong).cast(),
            Self::Double(v) => (&mut **v as *mut f64).cast(),
            Self::Doubles(v) => v.as_mut_ptr().cast(),
            Self::ULongs(v) => v.as_mut_ptr().cast(),
            Self::Bytes(v) => v.as_mut_ptr().cast(),
        }
    }

    /// Short type name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UShort(_) => "unsigned short",
            Self::ULong(_) => "unsigned long",
            Self::Double(_) => "double",
            Self::Doubles(_) => "double[]",
            Self::ULongs(_) => "unsigned long[]",
            Self::Bytes(_) => "byte[]",
        }
    }
}

/// The subset of the Handel API this driver forwards to.
///
/// Every method returns the native status code unchanged.
pub trait HandelApi {
    /// `xiaSetLogLevel`
    fn set_log_level(&mut self, level: i32) -> i32;
    /// `xiaSetLogOutput`
    fn set_log_output(&mut self, file_name: &CStr) -> i32;
    /// `xiaCloseLog`; backends without it report success.
    fn close_log(&mut self) -> i32;
    /// `xiaInit`
    fn init(&mut self, ini_file: &CStr) -> i32;
    /// `xiaExit`
    fn exit(&mut self) -> i32;
    /// `xiaStartSystem`
    fn start_system(&mut self) -> i32;
    /// `xiaBoardOperation`
    fn board_operation(&mut self, det_chan: i32, name: &CStr, value: DataMut<'_>) -> i32;
    /// `xiaSetAcquisitionValues`; Handel writes the value actually used back.
    fn set_acquisition_values(&mut self, det_chan: i32, name: &CStr, value: &mut f64) -> i32;
    /// `xiaGetAcquisitionValues`
    fn get_acquisition_values(&mut self, det_chan: i32, name: &CStr, value: &mut f64) -> i32;
    /// `xiaStartRun`; `resume` 0 clears the MCA, 1 keeps it.
    fn start_run(&mut self, det_chan: i32, resume: u16) -> i32;
    /// `xiaStopRun`
    fn stop_run(&mut self, det_chan: i32) -> i32;
    /// `xiaGetRunData`
    fn get_run_data(&mut self, det_chan: i32, name: &CStr, value: DataMut<'_>) -> i32;
    /// `xiaGetNumDetectors`
    fn get_num_detectors(&mut self, count: &mut u32) -> i32;
    /// `xiaGetNumModules`
    fn get_num_modules(&mut self, count: &mut u32) -> i32;
    /// `xiaGetNumFirmwareSets`
    fn get_num_firmware_sets(&mut self, count: &mut u32) -> i32;
}

impl<T: HandelApi + ?Sized> HandelApi for Box<T> {
    fn set_log_level(&mut self, level: i32) -> i32 {
        (**self).set_log_level(level)
    }
    fn set_log_output(&mut self, file_name: &CStr) -> i32 {
        (**self).set_log_output(file_name)
    }
    fn close_log(&mut self) -> i32 {
        (**self).close_log()
    }
    fn init(&mut self, ini_file: &CStr) -> i32 {
        (**self).init(ini_file)
    }
    fn exit(&mut self) -> i32 {
        (**self).exit()
    }
    fn start_system(&mut self) -> i32 {
        (**self).start_system()
    }
    fn board_operation(&mut self, det_chan: i32, name: &CStr, value: DataMut<'_>) -> i32 {
        (**self).board_operation(det_chan, name, value)
    }
    fn set_acquisition_values(&mut self, det_chan: i32, name: &CStr, value: &mut f64) -> i32 {
        (**self).set_acquisition_values(det_chan, name, value)
    }
    fn get_acquisition_values(&mut self, det_chan: i32, name: &CStr, value: &mut f64) -> i32 {
        (**self).get_acquisition_values(det_chan, name, value)
    }
    fn start_run(&mut self, det_chan: i32, resume: u16) -> i32 {
        (**self).start_run(det_chan, resume)
    }
    fn stop_run(&mut self, det_chan: i32) -> i32 {
        (**self).stop_run(det_chan)
    }
    fn get_run_data(&mut self, det_chan: i32, name: &CStr, value: DataMut<'_>) -> i32 {
        (**self).get_run_data(det_chan, name, value)
    }
    fn get_num_detectors(&mut self, count: &mut u32) -> i32 {
        (**self).get_num_detectors(count)
    }
    fn get_num_modules(&mut self, count: &mut u32) -> i32 {
        (**self).get_num_modules(count)
    }
    fn get_num_firmware_sets(&mut self, count: &mut u32) -> i32 {
        (**self).get_num_firmware_sets(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_targets_buffer() {
        let mut buf = [0f64; 4];
        let expected = buf.as_mut_ptr() as *mut c_void;
        let mut data = DataMut::Doubles(&mut buf);
        assert_eq!(data.as_mut_ptr(), expected);
        assert_eq!(data.kind(), "double[]");
    }

    #[test]
    fn test_pointer_scalar() {
        let mut value: c_ushort = 7;
        let expected = &mut value as *mut c_ushort as *mut c_void;
        let mut data = DataMut::UShort(&mut value);
        assert_eq!(data.as_mut_ptr(), expected);
    }
}
