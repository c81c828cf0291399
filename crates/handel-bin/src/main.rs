//! `handel` - command-line control of XIA Handel detectors.
//!
//! Every invocation is its own Handel session: it brings the system up from
//! a TOML config (see `HandelConfig`), runs one command, and calls `xiaExit`
//! on the way out. Only `set` and `run` write the config's `[acquisition]`
//! values; the read-only commands leave the board as they find it.
//!
//! # Usage
//!
//! ```bash
//! handel --config handel.toml info
//! handel --config handel.toml set peaking_time=8 number_mca_channels=4096
//! handel --config handel.toml run --realtime 10 --output run.json
//! handel --mock get all
//! ```

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use daq_driver_handel::{
    Handel, HandelApi, HandelConfig, MockHandel, NativeHandel, ACQUISITION_VALUES,
};
use tempfile::NamedTempFile;
use tracing::{debug, error};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG: &str = "handel.toml";

#[derive(Parser)]
#[command(name = "handel")]
#[command(about = "Control XIA detector electronics through Handel")]
#[command(
    long_about = "Control XIA detector electronics through Handel.\n\n\
    Each invocation loads the .ini file, starts the system, runs one command \
    and exits Handel again. Only `set` and `run` apply the [acquisition] \
    values from the config file."
)]
struct Cli {
    /// Configuration file (TOML); `HANDEL_*` environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the simulated backend instead of the vendor library
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the acquisition values that can be read and set
    Params {
        /// Include descriptions
        #[arg(long, short)]
        verbose: bool,
    },

    /// Show detector, module and firmware counts and board information
    Info {
        /// Print board information as JSON
        #[arg(long)]
        json: bool,
    },

    /// Read an acquisition value, or `all` of them
    Get {
        /// Acquisition value name or `all`
        name: String,
    },

    /// Set acquisition values and apply them
    Set {
        /// `name=value` pairs
        #[arg(required = true, value_parser = parse_assignment)]
        assignments: Vec<(String, f64)>,
    },

    /// Show the peaking times of the current parameter set
    PeakingTimes,

    /// Fixed real-time run followed by MCA readout
    Run {
        /// Real time in seconds
        #[arg(long)]
        realtime: f64,

        /// Accumulate into the existing spectrum instead of clearing it
        #[arg(long)]
        no_clear: bool,

        /// Write statistics and spectrum as JSON
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Read the MCA spectrum
    ///
    /// Runs in a fresh session, so this reads whatever the board still holds
    /// after `xiaInit` and `xiaStartSystem`.
    Mca {
        /// Write the spectrum as JSON
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Stop the active run, if any
    ///
    /// Runs in a fresh session; a run started by another process is only
    /// visible here if the board kept it going through `xiaStartSystem`.
    Stop,
}

impl Commands {
    /// Whether the command changes acquisition values, and so should apply
    /// the config's `[acquisition]` table first.
    fn writes_values(&self) -> bool {
        matches!(self, Self::Set { .. } | Self::Run { .. })
    }
}

fn parse_assignment(s: &str) -> Result<(String, f64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{s}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing name in '{s}'"));
    }
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value in '{s}': {e}"))?;
    Ok((name.to_string(), value))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Params { verbose } = cli.command {
        list_params(verbose);
        return Ok(());
    }

    // Kept alive until the session is dropped.
    let (config, _placeholder) = resolve_config(cli.config.as_deref(), cli.mock)?;
    let api: Box<dyn HandelApi> = if cli.mock {
        Box::new(MockHandel::new())
    } else {
        Box::new(NativeHandel::load(&config.library)?)
    };
    let mut handel = open_session(api, &config, cli.command.writes_values())?;

    match cli.command {
        Commands::Params { .. } => Ok(()),
        Commands::Info { json } => show_info(&mut handel, json),
        Commands::Get { name } => get_values(&mut handel, &name),
        Commands::Set { assignments } => set_values(&mut handel, &assignments),
        Commands::PeakingTimes => {
            let times = handel.current_peaking_times()?;
            for (i, t) in times.iter().enumerate() {
                println!("{i:>3}  {t:.3} µs");
            }
            Ok(())
        }
        Commands::Run {
            realtime,
            no_clear,
            output,
        } => realtime_run(&mut handel, realtime, !no_clear, output.as_deref()),
        Commands::Mca { output } => {
            let mca = handel.read_mca()?;
            match output {
                Some(path) => write_json(&path, &serde_json::json!({ "mca": mca })),
                None => {
                    print_mca(&mca);
                    Ok(())
                }
            }
        }
        Commands::Stop => {
            if handel.stop_run()? {
                println!("Run stopped");
            } else {
                println!("No run active");
            }
            Ok(())
        }
    }
}

fn resolve_config(
    path: Option<&Path>,
    mock: bool,
) -> Result<(HandelConfig, Option<NamedTempFile>)> {
    if let Some(path) = path {
        return Ok((HandelConfig::load(path)?, None));
    }
    let default = Path::new(DEFAULT_CONFIG);
    if default.exists() {
        return Ok((HandelConfig::load(default)?, None));
    }
    if !mock {
        bail!("no configuration: pass --config <file> or create {DEFAULT_CONFIG}");
    }

    let placeholder = tempfile::Builder::new()
        .prefix("handel-mock-")
        .suffix(".ini")
        .tempfile()
        .context("Failed to create placeholder .ini for the mock backend")?;
    Ok((HandelConfig::new(placeholder.path()), Some(placeholder)))
}

fn open_session(
    api: Box<dyn HandelApi>,
    config: &HandelConfig,
    apply_values: bool,
) -> Result<Handel<Box<dyn HandelApi>>> {
    let mut handel = Handel::with_api(api);
    let result = if apply_values || config.acquisition.is_empty() {
        handel.start_from_config(config)
    } else {
        debug!(
            count = config.acquisition.len(),
            "Read-only command, not applying [acquisition] values"
        );
        let mut config = config.clone();
        config.acquisition.clear();
        handel.start_from_config(&config)
    };
    result.with_context(|| format!("Failed to start system from {}", config.ini_file.display()))?;
    Ok(handel)
}

fn list_params(verbose: bool) {
    for av in ACQUISITION_VALUES {
        if verbose {
            println!("{:<22} {}", av.name, av.description);
        } else {
            println!("{}", av.name);
        }
    }
}

fn show_info(handel: &mut Handel<Box<dyn HandelApi>>, json: bool) -> Result<()> {
    if json {
        let info = handel.board_info()?;
        println!("{}", serde_json::to_string_pretty(&info.to_json())?);
        return Ok(());
    }

    println!("Detectors:     {}", handel.num_detectors()?);
    println!("Modules:       {}", handel.num_modules()?);
    println!("Firmware sets: {}", handel.num_firmware_sets()?);
    println!();

    let info = handel.board_info()?;
    for (name, value) in info.fields() {
        println!("{name:<28} {value}");
    }
    Ok(())
}

fn get_values(handel: &mut Handel<Box<dyn HandelApi>>, name: &str) -> Result<()> {
    if name == "all" {
        for (name, value) in handel.get_all_acquisition_values()? {
            println!("{name:<22} {value}");
        }
    } else {
        println!("{name} = {}", handel.get_acquisition_value(name)?);
    }
    Ok(())
}

fn set_values(handel: &mut Handel<Box<dyn HandelApi>>, assignments: &[(String, f64)]) -> Result<()> {
    let params: Vec<(&str, f64)> = assignments
        .iter()
        .map(|(name, value)| (name.as_str(), *value))
        .collect();
    handel.set_acquisition_values(&params)?;

    for (name, requested) in &params {
        let actual = handel.get_acquisition_value(name)?;
        if actual == *requested {
            println!("{name} = {actual}");
        } else {
            println!("{name} = {actual} (requested {requested})");
        }
    }
    Ok(())
}

fn realtime_run(
    handel: &mut Handel<Box<dyn HandelApi>>,
    seconds: f64,
    clear_mca: bool,
    output: Option<&Path>,
) -> Result<()> {
    let summary = handel.fixed_realtime_run(seconds, clear_mca, |stats| {
        println!(
            "runtime {:>7.2} s  OCR {:>9.1} cps  ICR {:>9.1} cps  events {:>10}",
            stats.runtime, stats.output_count_rate, stats.input_count_rate, stats.events_in_run
        );
    })?;
    if summary.timed_out {
        eprintln!("Run did not end on its own and was stopped");
    }
    let mca = handel.read_mca()?;

    match output {
        Some(path) => write_json(
            path,
            &serde_json::json!({
                "summary": summary,
                "mca": mca,
            }),
        ),
        None => {
            let s = &summary.statistics;
            println!();
            println!("Real time:  {:.3} s", s.runtime);
            println!("Live time:  {:.3} s", s.livetime);
            println!("Events:     {}", s.events_in_run);
            println!("Triggers:   {}", s.triggers);
            println!("MCA bins:   {}", mca.len());
            println!("MCA counts: {}", mca.iter().sum::<u64>());
            Ok(())
        }
    }
}

fn print_mca(mca: &[u64]) {
    for (bin, counts) in mca.iter().enumerate() {
        println!("{bin}\t{counts}");
    }
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .map_err(|e| anyhow!("Failed to write {}: {e}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}
