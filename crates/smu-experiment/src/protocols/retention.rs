//! Retention: program once, then read back on an anchored schedule.
//!
//! The read bias is only applied while sampling; between reads the source
//! sits at 0 V. Records carry the measured time since the programming pulse
//! ended, which drifts from the nominal schedule when the engine runs late.

use super::cadence::Cadence;
use super::{settle_for, Protocol, Step, StepContext};
use async_trait::async_trait;
use smu_core::{
    MeasureRange, RecordTags, RetentionConfig, SmuResult, SourceMode, SourceSetpoint, TestKind,
};
use tokio::time::Instant;
use tracing::debug;

pub struct RetentionProtocol {
    cfg: RetentionConfig,
    cadence: Cadence,
    programmed_at: Option<Instant>,
}

impl RetentionProtocol {
    pub fn new(cfg: RetentionConfig) -> Self {
        let cadence = Cadence::new(cfg.sample_interval, cfg.duration);
        Self {
            cfg,
            cadence,
            programmed_at: None,
        }
    }

    fn at(&self, level: f64) -> SourceSetpoint {
        SourceSetpoint::voltage(level, self.cfg.compliance)
    }
}

#[async_trait]
impl Protocol for RetentionProtocol {
    fn kind(&self) -> TestKind {
        TestKind::Retention
    }

    fn expected_records(&self) -> Option<u64> {
        Some(self.cadence.nominal_slots())
    }

    async fn step(&mut self, ctx: &mut StepContext<'_>) -> SmuResult<Step> {
        let Some(origin) = self.programmed_at else {
            ctx.prepare_source(SourceMode::Voltage, MeasureRange::Auto, self.cfg.compliance)
                .await?;
            ctx.smu().set_level(&self.at(self.cfg.program_level)).await?;
            settle_for(self.cfg.pulse_width).await;
            ctx.smu().set_level(&self.at(0.0)).await?;
            debug!(state = ?self.cfg.state, "device programmed");
            self.programmed_at = Some(Instant::now());
            return Ok(Step::Continue);
        };

        let Some(offset) = self.cadence.due() else {
            return Ok(Step::Done);
        };
        let deadline = origin + offset;
        if Instant::now() < deadline {
            return Ok(Step::SleepUntil(deadline));
        }

        let read = self.at(self.cfg.read_level);
        let reading = ctx.apply_and_measure(&read, self.cfg.read_settle).await?;
        let since = origin.elapsed();
        ctx.record(
            self.cfg.state.phase(),
            SourceMode::Voltage,
            reading,
            RecordTags::since_programming(since),
        )?;
        ctx.smu().set_level(&self.at(0.0)).await?;
        self.cadence.advance(origin.elapsed());

        Ok(match self.cadence.due() {
            Some(next) => Step::SleepUntil(origin + next),
            None => Step::Done,
        })
    }
}
