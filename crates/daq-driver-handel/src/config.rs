//! Session configuration.
//!
//! A TOML file merged with `HANDEL_`-prefixed environment variables
//! (`__` separates nesting, e.g. `HANDEL_RUN__POLL_INTERVAL=500ms`).
//!
//! ```toml
//! library = "/usr/local/lib/libhandel.so"
//! ini_file = "microdxp.ini"
//!
//! [log]
//! level = "info"
//! output = "/tmp/handel.log"
//!
//! [run]
//! poll_interval = "1s"
//!
//! [acquisition]
//! peaking_time = 16.0
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::acquisition::{self, LogLevel};
use crate::error::{HandelError, Result};
use crate::run::RunPolicy;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "HANDEL_";

#[cfg(target_os = "windows")]
const DEFAULT_LIBRARY: &str = "handel.dll";
#[cfg(target_os = "macos")]
const DEFAULT_LIBRARY: &str = "libhandel.dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const DEFAULT_LIBRARY: &str = "libhandel.so";

fn default_library() -> PathBuf {
    PathBuf::from(DEFAULT_LIBRARY)
}

/// Handel's own log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Verbosity.
    #[serde(default)]
    pub level: LogLevel,
    /// File the library writes to.
    pub output: PathBuf,
}

/// Everything needed to bring a detector up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandelConfig {
    /// Path (or bare name, resolved by the loader) of the vendor library.
    #[serde(default = "default_library")]
    pub library: PathBuf,
    /// `.ini` file describing the system.
    pub ini_file: PathBuf,
    /// Detector channel addressed by the session.
    #[serde(default)]
    pub detector_channel: i32,
    /// Handel log file; left at the library default when absent.
    #[serde(default)]
    pub log: Option<LogConfig>,
    /// Polling bounds for fixed-length runs.
    #[serde(default)]
    pub run: RunPolicy,
    /// Acquisition values applied after `start_system`.
    #[serde(default)]
    pub acquisition: BTreeMap<String, f64>,
}

impl HandelConfig {
    /// Minimal configuration for `ini_file`, everything else defaulted.
    pub fn new<P: Into<PathBuf>>(ini_file: P) -> Self {
        Self {
            library: default_library(),
            ini_file: ini_file.into(),
            detector_channel: 0,
            log: None,
            run: RunPolicy::default(),
            acquisition: BTreeMap::new(),
        }
    }

    /// Load from a TOML file, applying environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HandelError::Config {
                message: format!("Config file not found: {}", path.display()),
            });
        }
        debug!("Loading Handel config from: {}", path.display());

        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        let config = Self::extract(figment)?;

        info!(
            library = %config.library.display(),
            ini_file = %config.ini_file.display(),
            "Loaded Handel config from {}",
            path.display()
        );
        Ok(config)
    }

    /// Parse TOML text. The environment is not consulted.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Self::extract(Figment::new().merge(Toml::string(content)))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        for name in self.acquisition.keys() {
            if acquisition::find(name).is_none() {
                problems.push(format!("unknown acquisition value '{name}'"));
            }
        }
        for (name, value) in &self.acquisition {
            if !value.is_finite() {
                problems.push(format!("acquisition value '{name}' is not finite"));
            }
        }
        if self.run.poll_interval.is_zero() {
            problems.push("run.poll_interval must be greater than zero".to_string());
        }
        if self.detector_channel < 0 {
            problems.push(format!(
                "detector_channel must be non-negative, got {}",
                self.detector_channel
            ));
        }
        if let Some(log) = &self.log {
            if log.output.as_os_str().is_empty() {
                problems.push("log.output must not be empty".to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(HandelError::Config {
                message: problems.join("; "),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    const FULL: &str = r#"
library = "/opt/xia/lib/libhandel.so"
ini_file = "microdxp.ini"
detector_channel = 0

[log]
level = "debug"
output = "/tmp/handel.log"

[run]
poll_interval = "250ms"
max_wait = "2m"

[acquisition]
peaking_time = 8.0
number_mca_channels = 4096.0
"#;

    #[test]
    fn test_parse_full() {
        let config = HandelConfig::from_toml_str(FULL).unwrap();
        assert_eq!(config.library, PathBuf::from("/opt/xia/lib/libhandel.so"));
        assert_eq!(config.ini_file, PathBuf::from("microdxp.ini"));
        let log = config.log.unwrap();
        assert_eq!(log.level, LogLevel::Debug);
        assert_eq!(log.output, PathBuf::from("/tmp/handel.log"));
        assert_eq!(config.run.poll_interval, Duration::from_millis(250));
        assert_eq!(config.run.grace, Duration::from_secs(2));
        assert_eq!(config.run.max_wait, Duration::from_secs(120));
        assert_eq!(config.acquisition.get("peaking_time"), Some(&8.0));
    }

    #[test]
    fn test_minimal_defaults() {
        let config = HandelConfig::from_toml_str(r#"ini_file = "x.ini""#).unwrap();
        assert_eq!(config, HandelConfig::new("x.ini"));
    }

    #[test]
    fn test_missing_ini_file() {
        assert!(HandelConfig::from_toml_str("detector_channel = 0").is_err());
    }

    #[test]
    fn test_unknown_acquisition_value() {
        let err = HandelConfig::from_toml_str(
            r#"
ini_file = "x.ini"
[acquisition]
peeking_time = 8.0
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("peeking_time"));
    }

    #[test]
    fn test_zero_poll_interval() {
        let err = HandelConfig::from_toml_str(
            r#"
ini_file = "x.ini"
[run]
poll_interval = "0s"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, HandelError::Config { .. }));
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();
        let config = HandelConfig::load(file.path()).unwrap();
        assert_eq!(config.acquisition.len(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        let err = HandelConfig::load(Path::new("/nonexistent/handel.toml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
