//! Constant DC bias with periodic sampling.

use super::cadence::Cadence;
use super::{Protocol, Step, StepContext};
use async_trait::async_trait;
use smu_core::{BiasConfig, RecordTags, SmuResult, SourceSetpoint, TestKind, TestPhase};
use tokio::time::Instant;

pub struct BiasProtocol {
    cfg: BiasConfig,
    cadence: Cadence,
    biased_at: Option<Instant>,
}

impl BiasProtocol {
    pub fn new(cfg: BiasConfig) -> Self {
        let cadence = Cadence::new(cfg.sample_interval, cfg.duration);
        Self {
            cfg,
            cadence,
            biased_at: None,
        }
    }
}

#[async_trait]
impl Protocol for BiasProtocol {
    fn kind(&self) -> TestKind {
        TestKind::Bias
    }

    fn expected_records(&self) -> Option<u64> {
        Some(self.cadence.nominal_slots())
    }

    async fn step(&mut self, ctx: &mut StepContext<'_>) -> SmuResult<Step> {
        let origin = match self.biased_at {
            Some(origin) => origin,
            None => {
                let cfg = &self.cfg;
                ctx.prepare_source(cfg.source, cfg.range, cfg.compliance)
                    .await?;
                ctx.smu()
                    .set_level(&SourceSetpoint {
                        mode: cfg.source,
                        level: cfg.level,
                        compliance: cfg.compliance,
                    })
                    .await?;
                self.biased_at = Some(Instant::now());
                return Ok(Step::Continue);
            }
        };

        let Some(offset) = self.cadence.due() else {
            return Ok(Step::Done);
        };
        let deadline = origin + offset;
        if Instant::now() < deadline {
            return Ok(Step::SleepUntil(deadline));
        }

        let reading = ctx.smu().measure().await?;
        ctx.record(TestPhase::Hold, self.cfg.source, reading, RecordTags::default())?;
        self.cadence.advance(origin.elapsed());

        Ok(match self.cadence.due() {
            Some(next) => Step::SleepUntil(origin + next),
            None => Step::Done,
        })
    }
}
