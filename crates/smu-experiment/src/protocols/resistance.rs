//! Single-point resistance probe, 2-wire or 4-wire.

use super::{Protocol, Step, StepContext};
use async_trait::async_trait;
use smu_core::{
    InstrumentError, RecordTags, ResistanceConfig, SmuResult, SourceMeasure, SourceSetpoint,
    TestKind, TestPhase, WireMode,
};

pub struct ResistanceProtocol {
    cfg: ResistanceConfig,
}

impl ResistanceProtocol {
    pub fn new(cfg: ResistanceConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl Protocol for ResistanceProtocol {
    fn kind(&self) -> TestKind {
        TestKind::Resistance
    }

    fn expected_records(&self) -> Option<u64> {
        Some(1)
    }

    /// 4-wire needs an adapter that routes remote sense; there is no silent
    /// fallback to 2-wire.
    fn preflight(&self, smu: &dyn SourceMeasure) -> Result<(), InstrumentError> {
        if self.cfg.wire_mode == WireMode::FourWire && !smu.supports_remote_sense() {
            return Err(InstrumentError::unsupported(format!(
                "4-wire resistance requires remote sense, which the {} adapter does not route",
                smu.family()
            )));
        }
        Ok(())
    }

    async fn step(&mut self, ctx: &mut StepContext<'_>) -> SmuResult<Step> {
        let cfg = &self.cfg;
        ctx.prepare_wired_source(cfg.wire_mode, cfg.source, cfg.range, cfg.compliance)
            .await?;

        let probe = SourceSetpoint {
            mode: cfg.source,
            level: cfg.probe_level,
            compliance: cfg.compliance,
        };
        let reading = ctx.apply_and_measure(&probe, cfg.settle).await?;
        ctx.record(TestPhase::Probe, cfg.source, reading, RecordTags::default())?;
        Ok(Step::Done)
    }
}
