//! Run statistics and fixed-length runs.

use std::os::raw::c_ulong;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::acquisition::PresetType;
use crate::api::{DataMut, HandelApi};
use crate::error::{HandelError, Result};
use crate::session::Handel;

/// Snapshot of the run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunStatistics {
    /// Output count rate (counts/s).
    pub output_count_rate: f64,
    /// Input count rate (counts/s).
    pub input_count_rate: f64,
    /// Events accepted into the MCA.
    pub events_in_run: u64,
    /// Input triggers.
    pub triggers: u64,
    /// Real time (s).
    pub runtime: f64,
    /// Live time (s).
    pub livetime: f64,
    /// Whether the run was still going when sampled.
    pub run_active: bool,
}

/// Bounds for the fixed-run polling loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunPolicy {
    /// Time between polls.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Slack added to a real-time preset before giving up.
    #[serde(with = "humantime_serde")]
    pub grace: Duration,
    /// Upper bound for presets that do not count time, and the floor for
    /// live-time presets.
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            grace: Duration::from_secs(2),
            max_wait: Duration::from_secs(300),
        }
    }
}

impl RunPolicy {
    /// How long a run with this preset may take before it is stopped.
    ///
    /// A real-time preset gets its own length plus `grace`. Live time runs
    /// slower than the wall clock by the dead-time fraction, so a live-time
    /// preset gets at least `max_wait` and never less than its length plus
    /// `grace`. Counting presets get `max_wait`.
    pub fn deadline(&self, preset: PresetType, value: f64) -> Duration {
        if !preset.is_time() {
            return self.max_wait;
        }
        let Ok(length) = Duration::try_from_secs_f64(value) else {
            return self.max_wait;
        };
        let bound = length.saturating_add(self.grace);
        match preset {
            PresetType::FixedLive => bound.max(self.max_wait),
            _ => bound,
        }
    }
}

/// Outcome of [`Handel::fixed_run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Last statistics read after the run ended.
    pub statistics: RunStatistics,
    /// The library never ended the run and it was stopped at the deadline.
    pub timed_out: bool,
    /// Wall-clock time spent waiting.
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl<A: HandelApi> Handel<A> {
    /// Read all run counters.
    pub fn run_statistics(&mut self) -> Result<RunStatistics> {
        let mut stats = RunStatistics::default();

        self.run_data(
            "output_count_rate",
            DataMut::Double(&mut stats.output_count_rate),
        )?;
        self.run_data(
            "input_count_rate",
            DataMut::Double(&mut stats.input_count_rate),
        )?;

        let mut events: c_ulong = 0;
        self.run_data("events_in_run", DataMut::ULong(&mut events))?;
        stats.events_in_run = u64::from(events);

        let mut triggers: c_ulong = 0;
        self.run_data("triggers", DataMut::ULong(&mut triggers))?;
        stats.triggers = u64::from(triggers);

        self.run_data("runtime", DataMut::Double(&mut stats.runtime))?;
        self.run_data("livetime", DataMut::Double(&mut stats.livetime))?;
        stats.run_active = self.run_active()?;

        Ok(stats)
    }

    /// Run until `preset` reaches `value`, then restore an open-ended preset.
    ///
    /// Polls with the session's [`RunPolicy`]; `on_progress` sees every
    /// successful sample. If the run outlives the policy deadline it is
    /// stopped and the summary is marked `timed_out`.
    pub fn fixed_run<F>(
        &mut self,
        preset: PresetType,
        value: f64,
        clear_mca: bool,
        mut on_progress: F,
    ) -> Result<RunSummary>
    where
        F: FnMut(&RunStatistics),
    {
        if preset == PresetType::None {
            return Err(HandelError::InvalidArgument {
                message: "fixed_run needs a preset; use start_run for open-ended runs".into(),
            });
        }
        if !value.is_finite() || value <= 0.0 {
            return Err(HandelError::InvalidArgument {
                message: format!("preset value must be positive, got {value}"),
            });
        }

        self.set_acquisition_value("preset_type", preset.as_value())?;
        let result = self
            .set_acquisition_value("preset_value", value)
            .and_then(|_| self.start_run(clear_mca))
            .and_then(|()| self.wait_for_run(preset, value, &mut on_progress));

        // Once preset_type is written, leave the board in open-ended mode
        // whatever failed after it.
        let reset = self
            .set_acquisition_value("preset_type", PresetType::None.as_value())
            .map(|_| ());
        let summary = result?;
        reset?;
        Ok(summary)
    }

    /// [`Handel::fixed_run`] with a real-time preset in seconds.
    pub fn fixed_realtime_run<F>(
        &mut self,
        seconds: f64,
        clear_mca: bool,
        on_progress: F,
    ) -> Result<RunSummary>
    where
        F: FnMut(&RunStatistics),
    {
        self.fixed_run(PresetType::FixedReal, seconds, clear_mca, on_progress)
    }

    fn wait_for_run<F>(
        &mut self,
        preset: PresetType,
        value: f64,
        on_progress: &mut F,
    ) -> Result<RunSummary>
    where
        F: FnMut(&RunStatistics),
    {
        let policy = self.policy.clone();
        let deadline = policy.deadline(preset, value);
        let started = Instant::now();
        let mut timed_out = false;

        loop {
            match self.run_statistics() {
                Ok(stats) => {
                    debug!(
                        ocr = stats.output_count_rate,
                        events = stats.events_in_run,
                        runtime = stats.runtime,
                        "Run in progress"
                    );
                    on_progress(&stats);
                    if !stats.run_active {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Failed to poll run statistics"),
            }

            let elapsed = started.elapsed();
            if elapsed >= deadline {
                warn!(
                    ?deadline,
                    %preset,
                    value,
                    "Run did not finish in time, stopping it"
                );
                self.stop_run()?;
                timed_out = true;
                break;
            }
            std::thread::sleep(policy.poll_interval.min(deadline - elapsed));
        }

        let statistics = self.run_statistics()?;
        let elapsed = started.elapsed();
        info!(
            ocr = statistics.output_count_rate,
            icr = statistics.input_count_rate,
            events = statistics.events_in_run,
            runtime = statistics.runtime,
            livetime = statistics.livetime,
            timed_out,
            "Done"
        );

        Ok(RunSummary {
            statistics,
            timed_out,
            elapsed,
        })
    }
}
