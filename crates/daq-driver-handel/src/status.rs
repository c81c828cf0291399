//! Handel status codes.
//!
//! Static code → (name, message) table, plus [`check`] which turns a
//! returned status into a [`Result`] and logs it the way every forwarding
//! call reports outcomes.
//!
//! The table holds only codes whose numbering has been checked against the
//! vendor's `handel_errors.h`: success, the primitive-level filter range
//! errors (101-108) and the first two file errors (201-202). Every other
//! code is reported as [`HandelError::UnknownStatus`] with its number, which
//! can be looked up in the header shipped with the installed Handel release.

use std::fmt;

use tracing::{info, warn};

use crate::error::{HandelError, Result};

/// A known Handel status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode {
    /// Numeric value returned by the library.
    pub code: i32,
    /// Symbolic name from `handel_errors.h`.
    pub name: &'static str,
    /// Human-readable description.
    pub message: &'static str,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.name, self.message)
    }
}

macro_rules! status_table {
    ($($code:literal => $name:ident, $message:literal;)*) => {
        /// All status codes known to this driver, sorted by code.
        pub static STATUS_CODES: &[StatusCode] = &[
            $(StatusCode { code: $code, name: stringify!($name), message: $message },)*
        ];
    };
}

status_table! {
    0 => XIA_SUCCESS, "Success";

    // Primitive level, 101-200
    101 => XIA_UNKNOWN_DECIM, "Decimation read from the hardware does not match known values";
    102 => XIA_SLOWLEN_OOR, "Calculated SLOWLEN value is out of range";
    103 => XIA_SLOWGAP_OOR, "Calculated SLOWGAP value is out of range";
    104 => XIA_SLOWFILTER_OOR, "Slow filter length plus gap is out of range";
    105 => XIA_FASTLEN_OOR, "Calculated FASTLEN value is out of range";
    106 => XIA_FASTGAP_OOR, "Calculated FASTGAP value is out of range";
    107 => XIA_FASTFILTER_OOR, "Fast filter length plus gap is out of range";
    108 => XIA_BASELINE_OOR, "Baseline filter length is out of range";

    // File handling, 201-300
    201 => XIA_OPEN_FILE, "Error opening file";
    202 => XIA_FILEERR, "Error reading or parsing file";
}

/// Look up a status code in the static table.
pub fn lookup(code: i32) -> Option<&'static StatusCode> {
    STATUS_CODES
        .binary_search_by_key(&code, |s| s.code)
        .ok()
        .map(|i| &STATUS_CODES[i])
}

/// Convert a native status into a `Result`, logging the outcome.
///
/// A zero status logs `context` at info level. Known failures are logged as
/// warnings with their message; codes missing from the table are logged as
/// unknown.
pub fn check(code: i32, context: &str) -> Result<()> {
    check_quiet(code, context)?;
    info!("{context}");
    Ok(())
}

/// Like [`check`], but a zero status is not logged.
///
/// Used for reads that run in tight loops (run polling, bulk value reads).
pub fn check_quiet(code: i32, context: &str) -> Result<()> {
    if code == handel_sys::XIA_SUCCESS {
        return Ok(());
    }

    match lookup(code) {
        Some(status) => {
            warn!(code, status = status.name, "{}: {}", context, status.message);
            Err(HandelError::Status {
                code,
                name: status.name,
                message: status.message,
                context: context.to_string(),
            })
        }
        None => {
            warn!(code, "{}: unknown Handel status code", context);
            Err(HandelError::UnknownStatus {
                code,
                context: context.to_string(),
            })
        }
    }
}
