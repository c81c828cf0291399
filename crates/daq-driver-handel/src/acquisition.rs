//! Acquisition values, preset types and memory selectors.
//!
//! Handel addresses DSP settings by name. The binding only forwards names from
//! the closed set in [`ACQUISITION_VALUES`]; anything else is rejected before
//! reaching the library.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::HandelError;

/// A named acquisition value accepted by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AcquisitionValue {
    /// Name passed to `xiaSetAcquisitionValues` / `xiaGetAcquisitionValues`.
    pub name: &'static str,
    /// What the value controls.
    pub description: &'static str,
}

const fn av(name: &'static str, description: &'static str) -> AcquisitionValue {
    AcquisitionValue { name, description }
}

/// Acquisition values supported by the microDXP product layer.
pub static ACQUISITION_VALUES: &[AcquisitionValue] = &[
    av("parset", "Index of the active parameter set (peaking time range)"),
    av("genset", "Index of the active general settings set"),
    av("clock_speed", "DSP clock speed in MHz (read-only)"),
    av("peaking_time", "Energy filter peaking time in microseconds"),
    av("gap_time", "Energy filter gap time in microseconds (read-only)"),
    av("trigger_peak_time", "Trigger filter peaking time in microseconds"),
    av("trigger_gap_time", "Trigger filter gap time in microseconds"),
    av("trigger_threshold", "Trigger filter threshold in eV"),
    av("baseline_threshold", "Baseline filter threshold in eV"),
    av("energy_threshold", "Energy filter threshold in eV"),
    av("baseline_length", "Number of samples averaged into the baseline"),
    av("max_width", "Maximum trigger width in microseconds for pile-up inspection"),
    av("peak_interval", "Interval after a trigger at which the peak is captured"),
    av("peak_sample", "Offset of the energy sample within the peak interval"),
    av("peak_mode", "Peak capture mode: 0 = XIA, 1 = maximum"),
    av("number_mca_channels", "Number of MCA bins"),
    av("mca_bin_width", "Energy width of each MCA bin in eV"),
    av("dynamic_range", "Energy corresponding to 40% of the ADC range, in eV"),
    av("gain", "Total analog gain"),
    av("gain_trim", "Per-parameter-set gain trim factor"),
    av("polarity", "Input signal polarity: 0 = negative, 1 = positive"),
    av("reset_interval", "Preamplifier reset interval in microseconds"),
    av("preset_type", "Run preset type: 0 none, 1 real time, 2 live time, 3 events, 4 triggers"),
    av("preset_value", "Preset seconds or counts at which a fixed run ends"),
    av("number_of_scas", "Number of single channel analyzer regions"),
];

/// Look up an acquisition value by name.
pub fn find(name: &str) -> Option<&'static AcquisitionValue> {
    ACQUISITION_VALUES.iter().find(|v| v.name == name)
}

/// Check that `name` is in the allowed set.
pub fn validate(name: &str) -> crate::Result<&'static AcquisitionValue> {
    find(name).ok_or_else(|| HandelError::UnknownAcquisitionValue {
        name: name.to_string(),
    })
}

/// Condition that ends a fixed-length run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresetType {
    /// Run until stopped.
    None,
    /// Fixed real time in seconds.
    FixedReal,
    /// Fixed live time in seconds.
    FixedLive,
    /// Fixed number of output events.
    FixedEvents,
    /// Fixed number of input triggers.
    FixedTriggers,
}

impl PresetType {
    /// Value exchanged with Handel as `preset_type`.
    pub fn as_value(self) -> f64 {
        match self {
            Self::None => handel_sys::XIA_PRESET_NONE,
            Self::FixedReal => handel_sys::XIA_PRESET_FIXED_REAL,
            Self::FixedLive => handel_sys::XIA_PRESET_FIXED_LIVE,
            Self::FixedEvents => handel_sys::XIA_PRESET_FIXED_EVENTS,
            Self::FixedTriggers => handel_sys::XIA_PRESET_FIXED_TRIGGERS,
        }
    }

    /// Convert from the value Handel reports.
    pub fn from_value(value: f64) -> Option<Self> {
        [
            Self::None,
            Self::FixedReal,
            Self::FixedLive,
            Self::FixedEvents,
            Self::FixedTriggers,
        ]
        .into_iter()
        .find(|p| p.as_value() == value)
    }

    /// Whether the preset counts seconds (as opposed to events).
    pub fn is_time(self) -> bool {
        matches!(self, Self::FixedReal | Self::FixedLive)
    }
}

impl fmt::Display for PresetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "XIA_PRESET_NONE",
            Self::FixedReal => "XIA_PRESET_FIXED_REAL",
            Self::FixedLive => "XIA_PRESET_FIXED_LIVE",
            Self::FixedEvents => "XIA_PRESET_FIXED_EVENTS",
            Self::FixedTriggers => "XIA_PRESET_FIXED_TRIGGERS",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Memory regions committed by the `apply` board operation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemoryFlags: u16 {
        /// Required parameters.
        const REQ = handel_sys::AV_MEM_REQ;
        /// Parameter set.
        const PARSET = handel_sys::AV_MEM_PARSET;
        /// General settings.
        const GENSET = handel_sys::AV_MEM_GENSET;
        /// FiPPI parameters.
        const FIPPI = handel_sys::AV_MEM_FIPPI;
        /// ADC parameters.
        const ADC = handel_sys::AV_MEM_ADC;
        /// Global parameters.
        const GLOB = handel_sys::AV_MEM_GLOB;
        /// Custom parameters.
        const CUST = handel_sys::AV_MEM_CUST;
    }
}

impl MemoryFlags {
    /// Selection written by `apply`.
    pub const APPLY: Self = Self::PARSET.union(Self::GENSET);
}

/// Verbosity of Handel's own log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Warnings and errors.
    #[default]
    Warning,
    /// Informational messages.
    Info,
    /// Full debug output.
    Debug,
}

impl LogLevel {
    /// Value passed to `xiaSetLogLevel`.
    pub fn as_raw(self) -> i32 {
        match self {
            Self::Error => handel_sys::MD_ERROR,
            Self::Warning => handel_sys::MD_WARNING,
            Self::Info => handel_sys::MD_INFO,
            Self::Debug => handel_sys::MD_DEBUG,
        }
    }
}

impl FromStr for LogLevel {
    type Err = HandelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" | "1" => Ok(Self::Error),
            "warning" | "warn" | "2" => Ok(Self::Warning),
            "info" | "3" => Ok(Self::Info),
            "debug" | "4" => Ok(Self::Debug),
            other => Err(HandelError::InvalidArgument {
                message: format!("unknown log level '{other}'"),
            }),
        }
    }
}
