//! Test protocol state machines.
//!
//! A protocol never loops on its own. The run controller calls
//! [`Protocol::step`] repeatedly; each call performs one bounded unit of
//! work (prepare the source, one sweep point, one half-cycle, one sample)
//! and returns a [`Step`] telling the driver what to do next. Every return
//! is a suspension point where abort and pause requests are observed.
//!
//! Protocols talk to the instrument only through [`SourceMeasure`] and never
//! switch the output off themselves: safe shutdown belongs to the driver
//! loop, which runs it on every exit path.

mod bias;
mod cadence;
mod endurance;
mod resistance;
mod retention;
mod sweep;

pub use bias::BiasProtocol;
pub use endurance::EnduranceProtocol;
pub use resistance::ResistanceProtocol;
pub use retention::RetentionProtocol;
pub use sweep::SweepProtocol;

use crate::buffer::AcquisitionBuffer;
use async_trait::async_trait;
use smu_core::{
    resistance, ConfigurationError, InstrumentError, MeasureRange, MeasurementRecord, Reading,
    RecordTags, SmuResult, SourceMeasure, SourceMode, SourceSetpoint, TestKind, TestPhase,
    TestRunConfig, WireMode,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// What the driver loop should do after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Call `step` again.
    Continue,
    /// Wait until the instant, then call `step` again. The wait is
    /// interrupted by abort.
    SleepUntil(Instant),
    /// All work is done.
    Done,
}

#[async_trait]
pub trait Protocol: Send {
    fn kind(&self) -> TestKind;

    /// Whether the run may be paused between steps.
    fn pausable(&self) -> bool {
        false
    }

    /// Records a complete run produces, when known up front.
    fn expected_records(&self) -> Option<u64>;

    /// Capability check against the connected adapter. Runs before any
    /// command is sent.
    fn preflight(&self, _smu: &dyn SourceMeasure) -> Result<(), InstrumentError> {
        Ok(())
    }

    async fn step(&mut self, ctx: &mut StepContext<'_>) -> SmuResult<Step>;
}

/// Build the state machine for `config`.
pub fn build(config: &TestRunConfig) -> Result<Box<dyn Protocol>, ConfigurationError> {
    let protocol: Box<dyn Protocol> = match config {
        TestRunConfig::Sweep(cfg) => Box::new(SweepProtocol::sweep(cfg)?),
        TestRunConfig::IvLoop(cfg) => Box::new(SweepProtocol::iv_loop(cfg)?),
        TestRunConfig::Bias(cfg) => Box::new(BiasProtocol::new(cfg.clone())),
        TestRunConfig::Resistance(cfg) => Box::new(ResistanceProtocol::new(cfg.clone())),
        TestRunConfig::Retention(cfg) => Box::new(RetentionProtocol::new(cfg.clone())),
        TestRunConfig::Endurance(cfg) => Box::new(EnduranceProtocol::new(cfg.clone())),
    };
    Ok(protocol)
}

/// Assigns sequence indices and run-relative timestamps, then appends to
/// the acquisition buffer.
pub struct Recorder {
    buffer: Arc<AcquisitionBuffer>,
    origin: Instant,
    next_index: u64,
}

impl Recorder {
    pub fn new(buffer: Arc<AcquisitionBuffer>, origin: Instant) -> Self {
        Self {
            buffer,
            origin,
            next_index: 0,
        }
    }

    /// Records appended so far.
    pub fn count(&self) -> u64 {
        self.next_index
    }

    pub fn record(
        &mut self,
        phase: TestPhase,
        mode: SourceMode,
        reading: Reading,
        tags: RecordTags,
    ) -> SmuResult<()> {
        let record = MeasurementRecord {
            sequence_index: self.next_index,
            timestamp: self.origin.elapsed(),
            source_value: reading.source,
            measured_value: reading.measured,
            resistance: resistance(mode, reading),
            phase,
            loop_index: tags.loop_index,
            cycle_index: tags.cycle_index,
            since_programming: tags.since_programming,
        };
        self.buffer.append(record)?;
        self.next_index += 1;
        Ok(())
    }
}

/// Instrument and recorder handed to one [`Protocol::step`] call.
pub struct StepContext<'a> {
    smu: &'a mut dyn SourceMeasure,
    recorder: &'a mut Recorder,
}

impl<'a> StepContext<'a> {
    pub fn new(smu: &'a mut dyn SourceMeasure, recorder: &'a mut Recorder) -> Self {
        Self { smu, recorder }
    }

    pub fn smu(&mut self) -> &mut (dyn SourceMeasure + 'a) {
        &mut *self.smu
    }

    /// Select 2-wire sensing and the source function, arm compliance at 0
    /// level and switch the output on.
    pub async fn prepare_source(
        &mut self,
        mode: SourceMode,
        range: MeasureRange,
        compliance: f64,
    ) -> Result<(), InstrumentError> {
        self.prepare_wired_source(WireMode::TwoWire, mode, range, compliance)
            .await
    }

    /// As [`prepare_source`](Self::prepare_source) with explicit sense
    /// wiring. Wiring is set on every run, so a 4-wire run never carries
    /// over into the next one.
    pub async fn prepare_wired_source(
        &mut self,
        wiring: WireMode,
        mode: SourceMode,
        range: MeasureRange,
        compliance: f64,
    ) -> Result<(), InstrumentError> {
        self.smu.set_wire_mode(wiring).await?;
        self.smu.configure_source(mode, range).await?;
        self.smu
            .set_level(&SourceSetpoint {
                mode,
                level: 0.0,
                compliance,
            })
            .await?;
        self.smu.enable_output(true).await
    }

    /// Apply `setpoint`, wait `settle`, and measure.
    pub async fn apply_and_measure(
        &mut self,
        setpoint: &SourceSetpoint,
        settle: Duration,
    ) -> Result<Reading, InstrumentError> {
        self.smu.set_level(setpoint).await?;
        settle_for(settle).await;
        self.smu.measure().await
    }

    pub fn record(
        &mut self,
        phase: TestPhase,
        mode: SourceMode,
        reading: Reading,
        tags: RecordTags,
    ) -> SmuResult<()> {
        self.recorder.record(phase, mode, reading, tags)
    }

    pub fn records(&self) -> u64 {
        self.recorder.count()
    }
}

/// Fixed, non-interruptible delay.
pub(crate) async fn settle_for(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
