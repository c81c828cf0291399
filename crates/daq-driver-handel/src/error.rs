//! Error types for Handel operations.
//!
//! Every native call returns an integer status. Non-zero codes become
//! [`HandelError::Status`] (when the code is in the status table) or
//! [`HandelError::UnknownStatus`]; everything else here covers failures that
//! happen on the Rust side before a native call is made.

use handel_sys::LoadError;
use thiserror::Error;

/// Result type alias for Handel operations.
pub type Result<T> = std::result::Result<T, HandelError>;

/// Errors that can occur when driving Handel.
#[derive(Error, Debug)]
pub enum HandelError {
    /// The vendor library could not be opened or is missing exports.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Handel returned a known non-zero status.
    #[error("{context}: Handel error {code} ({name}): {message}")]
    Status {
        /// Numeric status.
        code: i32,
        /// Symbolic name from the status table.
        name: &'static str,
        /// Description from the status table.
        message: &'static str,
        /// What the driver was doing.
        context: String,
    },

    /// Handel returned a status that is not in the status table.
    #[error("{context}: unknown Handel status code {code}")]
    UnknownStatus {
        /// Numeric status.
        code: i32,
        /// What the driver was doing.
        context: String,
    },

    /// The acquisition value name is not in the allowed set.
    #[error("Unknown acquisition value '{name}'")]
    UnknownAcquisitionValue {
        /// The rejected name.
        name: String,
    },

    /// A string argument contains an interior NUL byte.
    #[error("Argument '{argument}' contains a NUL byte")]
    InvalidString {
        /// The offending argument.
        argument: String,
    },

    /// The operation needs a prior successful `init`.
    #[error("Handel is not initialized: call init() with an .ini file before {operation}")]
    NotInitialized {
        /// The operation that was refused.
        operation: &'static str,
    },

    /// An argument is outside what the operation accepts.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong with it.
        message: String,
    },

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {message}")]
    Config {
        /// Every problem found, joined.
        message: String,
    },
}

impl HandelError {
    /// The native status code, if this error came from one.
    pub fn status_code(&self) -> Option<i32> {
        match self {
            Self::Status { code, .. } | Self::UnknownStatus { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Check whether this error came from the vendor library.
    pub fn is_native(&self) -> bool {
        self.status_code().is_some()
    }
}

impl From<figment::Error> for HandelError {
    fn from(err: figment::Error) -> Self {
        Self::Config {
            message: err.to_string(),
        }
    }
}
