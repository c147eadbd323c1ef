//! SET/RESET cycling with a read after every pulse.
//!
//! One step is one half-cycle (pulse, read, record), so an abort always
//! lands between complete records and may leave an odd-length sequence.

use super::{settle_for, Protocol, Step, StepContext};
use async_trait::async_trait;
use smu_core::{
    EnduranceConfig, MeasureRange, RecordTags, SmuResult, SourceMode, SourceSetpoint, TestKind,
    TestPhase,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HalfCycle {
    Set,
    Reset,
}

pub struct EnduranceProtocol {
    cfg: EnduranceConfig,
    cycle: u64,
    half: HalfCycle,
    prepared: bool,
}

impl EnduranceProtocol {
    pub fn new(cfg: EnduranceConfig) -> Self {
        Self {
            cfg,
            cycle: 0,
            half: HalfCycle::Set,
            prepared: false,
        }
    }
}

#[async_trait]
impl Protocol for EnduranceProtocol {
    fn kind(&self) -> TestKind {
        TestKind::Endurance
    }

    fn pausable(&self) -> bool {
        true
    }

    fn expected_records(&self) -> Option<u64> {
        Some(self.cfg.cycles.saturating_mul(2))
    }

    async fn step(&mut self, ctx: &mut StepContext<'_>) -> SmuResult<Step> {
        let cfg = &self.cfg;
        if !self.prepared {
            ctx.prepare_source(SourceMode::Voltage, MeasureRange::Auto, cfg.compliance)
                .await?;
            self.prepared = true;
            return Ok(Step::Continue);
        }
        if self.cycle >= cfg.cycles {
            return Ok(Step::Done);
        }

        let (pulse, phase) = match self.half {
            HalfCycle::Set => (cfg.set_level, TestPhase::Set),
            HalfCycle::Reset => (cfg.reset_level, TestPhase::Reset),
        };
        ctx.smu()
            .set_level(&SourceSetpoint::voltage(pulse, cfg.compliance))
            .await?;
        settle_for(cfg.pulse_width).await;

        let read = SourceSetpoint::voltage(cfg.read_level, cfg.compliance);
        let reading = ctx.apply_and_measure(&read, cfg.read_settle).await?;
        ctx.record(phase, SourceMode::Voltage, reading, RecordTags::cycle(self.cycle))?;

        self.half = match self.half {
            HalfCycle::Set => HalfCycle::Reset,
            HalfCycle::Reset => {
                self.cycle += 1;
                HalfCycle::Set
            }
        };

        Ok(if self.cycle >= self.cfg.cycles {
            Step::Done
        } else {
            Step::Continue
        })
    }
}
