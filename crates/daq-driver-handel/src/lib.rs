//! Safe Rust driver for XIA Handel detector electronics.
//!
//! Handel is XIA's C library for its digital pulse processors (microDXP,
//! Saturn, Mercury, ...). This crate loads it at runtime through `handel-sys`
//! and exposes a single-channel session with status translation, logging and
//! bounded acquisition runs.
//!
//! # Architecture
//!
//! ## Session
//! - [`Handel`] - One library, one detector channel, exit on drop
//! - [`HandelConfig`] - TOML/environment configuration for bring-up
//!
//! ## Backends
//! - [`HandelApi`] - Seam with one method per native function
//! - [`NativeHandel`] - Forwards to the loaded vendor library
//! - [`MockHandel`] - In-process single-channel simulation
//!
//! ## Data
//! - [`ACQUISITION_VALUES`] - Names the driver forwards
//! - [`RunStatistics`] / [`RunSummary`] - Run counters
//! - [`BoardInfo`] - Decoded `get_board_info` block
//!
//! # Examples
//!
//! ## Fixed real-time run
//!
//! ```no_run
//! use daq_driver_handel::{Handel, HandelConfig};
//!
//! # fn example() -> daq_driver_handel::Result<()> {
//! let config = HandelConfig::load("handel.toml".as_ref())?;
//! let mut handel = Handel::open(&config)?;
//!
//! let summary = handel.fixed_realtime_run(10.0, true, |stats| {
//!     println!("{:.0} cps, {} events", stats.output_count_rate, stats.events_in_run);
//! })?;
//! let mca = handel.read_mca()?;
//! println!("{} bins after {:.1} s", mca.len(), summary.statistics.runtime);
//! # Ok(())
//! # }
//! ```
//!
//! ## Without hardware
//!
//! ```
//! use daq_driver_handel::{Handel, MockHandel};
//!
//! let mut handel = Handel::with_api(MockHandel::new());
//! assert!(handel.start_system().is_err()); // init() comes first
//! ```

pub mod acquisition;
pub mod api;
pub mod board;
pub mod config;
pub mod error;
pub mod mock;
pub mod native;
pub mod run;
pub mod session;
pub mod status;

pub use acquisition::{AcquisitionValue, LogLevel, MemoryFlags, PresetType, ACQUISITION_VALUES};
pub use api::{DataMut, HandelApi};
pub use board::{BoardInfo, BOARD_INFO_FIELDS};
pub use config::{HandelConfig, LogConfig};
pub use error::{HandelError, Result};
pub use mock::MockHandel;
pub use native::NativeHandel;
pub use run::{RunPolicy, RunStatistics, RunSummary};
pub use session::{Handel, LogSettings, MAX_MCA_CHANNELS};
pub use status::{StatusCode, STATUS_CODES};
