//! Staircase sweep and repeated triangular IV loop.

use super::{Protocol, Step, StepContext};
use crate::sweep::{generate, SweepPoint};
use async_trait::async_trait;
use smu_core::{
    ConfigurationError, IvLoopConfig, MeasureRange, RecordTags, SmuResult, SourceMode,
    SourceSetpoint, SweepConfig, SweepShape, TestKind,
};
use std::time::Duration;

pub struct SweepProtocol {
    kind: TestKind,
    mode: SourceMode,
    range: MeasureRange,
    compliance: f64,
    settle: Duration,
    points: Vec<SweepPoint>,
    loops: u32,
    cursor: usize,
    prepared: bool,
}

impl SweepProtocol {
    pub fn sweep(cfg: &SweepConfig) -> Result<Self, ConfigurationError> {
        let points = generate(&cfg.range_bounds(), cfg.shape)?;
        Ok(Self {
            kind: TestKind::Sweep,
            mode: cfg.source,
            range: cfg.range,
            compliance: cfg.compliance,
            settle: cfg.settle,
            points,
            loops: 1,
            cursor: 0,
            prepared: false,
        })
    }

    /// Triangular sweep repeated `cfg.loops` times, each record tagged with
    /// its loop index.
    pub fn iv_loop(cfg: &IvLoopConfig) -> Result<Self, ConfigurationError> {
        let points = generate(&cfg.range_bounds(), SweepShape::Triangular)?;
        Ok(Self {
            kind: TestKind::IvLoop,
            mode: cfg.source,
            range: cfg.range,
            compliance: cfg.compliance,
            settle: cfg.settle,
            points,
            loops: cfg.loops,
            cursor: 0,
            prepared: false,
        })
    }

    fn total(&self) -> usize {
        self.points.len() * self.loops as usize
    }
}

#[async_trait]
impl Protocol for SweepProtocol {
    fn kind(&self) -> TestKind {
        self.kind
    }

    fn pausable(&self) -> bool {
        true
    }

    fn expected_records(&self) -> Option<u64> {
        Some(self.total() as u64)
    }

    async fn step(&mut self, ctx: &mut StepContext<'_>) -> SmuResult<Step> {
        if !self.prepared {
            ctx.prepare_source(self.mode, self.range, self.compliance)
                .await?;
            self.prepared = true;
            return Ok(Step::Continue);
        }
        if self.cursor >= self.total() || self.points.is_empty() {
            return Ok(Step::Done);
        }

        let loop_index = self.cursor / self.points.len();
        let point = self.points[self.cursor % self.points.len()];
        let setpoint = SourceSetpoint {
            mode: self.mode,
            level: point.level,
            compliance: self.compliance,
        };
        let reading = ctx.apply_and_measure(&setpoint, self.settle).await?;

        let tags = match self.kind {
            TestKind::IvLoop => RecordTags::loop_index(loop_index as u32),
            _ => RecordTags::default(),
        };
        ctx.record(point.direction.phase(), self.mode, reading, tags)?;
        self.cursor += 1;

        Ok(if self.cursor >= self.total() {
            Step::Done
        } else {
            Step::Continue
        })
    }
}
