//! Session setup and run supervision for the CLI.

use crate::settings::BenchSettings;
use anyhow::{Context, Result};
use smu_core::{InstrumentFamily, InstrumentSession, MeasurementRecord, TestRunConfig};
use smu_driver_keithley::{connect, Channel, ConnectOptions, TcpTransport};
use smu_driver_mock::SimulatedSmu;
use smu_experiment::{RunController, RunReport};
use std::future::Future;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Where the session comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Simulated(InstrumentFamily),
    Address(String),
}

impl Target {
    /// `--simulate` wins, then `--address`, then the settings file.
    pub fn resolve(
        simulate: Option<InstrumentFamily>,
        address: Option<String>,
        settings: &BenchSettings,
    ) -> Result<Self> {
        if let Some(family) = simulate {
            return Ok(Target::Simulated(family));
        }
        address
            .or_else(|| settings.instrument.address.clone())
            .map(Target::Address)
            .context("no instrument given: pass --address host:port or --simulate 2400|2600")
    }
}

pub async fn open_session(
    target: &Target,
    channel: Option<Channel>,
    settings: &BenchSettings,
) -> Result<InstrumentSession> {
    let options = ConnectOptions {
        timeout: settings.engine.instrument_timeout,
        channel: channel.unwrap_or(settings.instrument.channel),
    };
    let session = match target {
        Target::Simulated(family) => {
            let mut sim = settings.simulator.clone();
            sim.family = *family;
            info!(%family, "using simulated instrument");
            connect(SimulatedSmu::from_config(&sim), &options).await?
        }
        Target::Address(address) => {
            let transport = TcpTransport::connect(address)
                .await
                .with_context(|| format!("connecting to {address}"))?;
            connect(transport, &options).await?
        }
    };
    Ok(session)
}

/// Start `config`, stream records to `on_record` and wait for the run to end.
///
/// `interrupt` resolving requests an abort; the run is still waited for so
/// the output is off before this returns.
pub async fn supervise<F, I>(
    controller: &RunController,
    config: TestRunConfig,
    mut on_record: F,
    interrupt: I,
) -> Result<RunReport>
where
    F: FnMut(&MeasurementRecord),
    I: Future<Output = ()>,
{
    let mut live = controller.subscribe();
    let run_id = controller.start(config)?;
    info!(%run_id, "run started");

    tokio::pin!(interrupt);
    let mut interrupted = false;
    loop {
        tokio::select! {
            record = live.recv() => match record {
                Ok(record) => on_record(&record),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "display fell behind; records are still kept in the buffer");
                }
                Err(RecvError::Closed) => break,
            },
            status = controller.wait() => {
                info!(state = %status.state, records = status.progress.records, "run ended");
                break;
            }
            _ = &mut interrupt, if !interrupted => {
                warn!("interrupt received, aborting run");
                interrupted = true;
                controller.abort();
            }
        }
    }

    // Records appended between the last receive and the end of the run.
    while let Ok(record) = live.try_recv() {
        on_record(&record);
    }

    controller
        .report()
        .context("run finished without a report")
}
