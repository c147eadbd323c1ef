//! CLI entry point for smu-bench.
//!
//! ```bash
//! smu-bench identify --address 192.168.0.20
//! smu-bench validate configs/endurance.toml
//! smu-bench run configs/iv_loop.toml --simulate 2600 --output data/loop.csv
//! ```
//!
//! Logging follows `RUST_LOG` (default `info`); `--json-logs` switches to
//! structured output.

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use smu_bench::{load_run_config, load_settings, open_session, supervise, BenchSettings, Target};
use smu_core::{InstrumentFamily, MeasurementRecord};
use smu_driver_keithley::Channel;
use smu_experiment::{RunController, RunState};
use smu_storage::{default_file_name, export_csv};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "smu-bench")]
#[command(about = "Memristor characterization on Keithley 2400/2600 SMUs", long_about = None)]
struct Cli {
    /// Bench settings file (TOML). `SMU_*` environment variables override it.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, print the instrument identity and disconnect
    Identify {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Execute one run configuration and export its records
    Run {
        /// Run configuration file (TOML, tagged by `kind`)
        config: PathBuf,

        #[command(flatten)]
        target: TargetArgs,

        /// CSV output path (default: `<output_dir>/<kind>_<start>.csv`)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Check a run configuration against the safety limits
    Validate {
        /// Run configuration file (TOML, tagged by `kind`)
        config: PathBuf,
    },
}

#[derive(Args)]
struct TargetArgs {
    /// Use the built-in simulator instead of hardware
    #[arg(long, value_enum, conflicts_with = "address")]
    simulate: Option<SimFamily>,

    /// Instrument address (`host` or `host:port`)
    #[arg(long)]
    address: Option<String>,

    /// 2600-series SMU channel
    #[arg(long, value_enum)]
    channel: Option<ChannelArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum SimFamily {
    #[value(name = "2400")]
    K2400,
    #[value(name = "2600")]
    K2600,
}

impl From<SimFamily> for InstrumentFamily {
    fn from(family: SimFamily) -> Self {
        match family {
            SimFamily::K2400 => InstrumentFamily::Keithley2400,
            SimFamily::K2600 => InstrumentFamily::Keithley2600,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ChannelArg {
    A,
    B,
}

impl From<ChannelArg> for Channel {
    fn from(channel: ChannelArg) -> Self {
        match channel {
            ChannelArg::A => Channel::A,
            ChannelArg::B => Channel::B,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let settings = load_settings(cli.settings.as_deref())?;

    match cli.command {
        Commands::Identify { target } => identify(target, &settings).await,
        Commands::Run {
            config,
            target,
            output,
        } => run(config, target, output, &settings).await,
        Commands::Validate { config } => validate(config, &settings),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn resolve(target: &TargetArgs, settings: &BenchSettings) -> Result<Target> {
    Target::resolve(
        target.simulate.map(Into::into),
        target.address.clone(),
        settings,
    )
}

async fn identify(target: TargetArgs, settings: &BenchSettings) -> Result<()> {
    let resolved = resolve(&target, settings)?;
    let session = open_session(&resolved, target.channel.map(Into::into), settings).await?;
    println!("{} ({})", session.identity(), session.family());
    session.disconnect().await?;
    Ok(())
}

fn validate(config: PathBuf, settings: &BenchSettings) -> Result<()> {
    let run = load_run_config(&config, &settings.engine)?;
    println!("{}: valid {} run", config.display(), run.kind());
    println!("{}", serde_json::to_string_pretty(&run.parameters_json())?);
    Ok(())
}

async fn run(
    config: PathBuf,
    target: TargetArgs,
    output: Option<PathBuf>,
    settings: &BenchSettings,
) -> Result<()> {
    let run_config = load_run_config(&config, &settings.engine)?;
    let resolved = resolve(&target, settings)?;
    let session = open_session(&resolved, target.channel.map(Into::into), settings).await?;
    let controller = RunController::new(session, settings.engine.clone());

    println!(
        "{:>6} {:>10} {:<10} {:>13} {:>13} {:>13}",
        "index", "t [s]", "phase", "source", "measured", "R [ohm]"
    );
    let report = supervise(&controller, run_config, print_record, async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    })
    .await;

    let disconnect = controller.disconnect().await;
    let report = report?;

    let path = output.unwrap_or_else(|| settings.output_dir.join(default_file_name(&report)));
    export_csv(&report, &path)?;
    println!(
        "{} records ({}) written to {}",
        report.records.len(),
        report.state,
        path.display()
    );

    if let Err(err) = disconnect {
        warn!(error = %err, "disconnect reported an error");
    }
    match (report.state, report.error) {
        (RunState::Failed, Some(err)) => bail!("run failed: {err}"),
        (RunState::Failed, None) => bail!("run failed"),
        (state, _) => {
            info!(%state, "done");
            Ok(())
        }
    }
}

fn print_record(record: &MeasurementRecord) {
    let ohms = record
        .resistance
        .map(|r| format!("{r:>13.4e}"))
        .unwrap_or_else(|| format!("{:>13}", "-"));
    println!(
        "{:>6} {:>10.3} {:<10} {:>13.4e} {:>13.4e} {}",
        record.sequence_index,
        record.timestamp.as_secs_f64(),
        record.phase.as_str(),
        record.source_value,
        record.measured_value,
        ohms
    );
}
