//! Sweep generator.
//!
//! Pure functions of their parameters: the same range always yields the same
//! ordered sequence, so a sweep can be restarted by regenerating it.
//!
//! Levels are computed as `start + i·step` rather than by repeated addition,
//! and the final level snaps to `stop` when it lies within
//! [`SweepRange::epsilon`], so `0 → 1 step 0.1` ends at exactly `1.0`.

use smu_core::{ConfigurationError, SourceMode, SourceSetpoint, SweepRange, SweepShape, TestPhase};

/// Direction of travel of one sweep point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn phase(&self) -> TestPhase {
        match self {
            Direction::Up => TestPhase::SweepUp,
            Direction::Down => TestPhase::SweepDown,
        }
    }

    fn reversed(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepPoint {
    pub level: f64,
    pub direction: Direction,
}

/// Levels of one `start → stop` pass.
pub fn linear_levels(range: &SweepRange) -> Result<Vec<f64>, ConfigurationError> {
    let count = range.point_count()?;
    let eps = range.epsilon();
    let levels = (0..count)
        .map(|i| {
            let level = range.start + i as f64 * range.step;
            if (level - range.stop).abs() <= eps {
                range.stop
            } else {
                level
            }
        })
        .collect();
    Ok(levels)
}

/// Ordered sweep points for `shape`.
///
/// Triangular output is `start → stop → start` with the turning point
/// present once: length `2n - 1` for a pass of `n` points.
pub fn generate(range: &SweepRange, shape: SweepShape) -> Result<Vec<SweepPoint>, ConfigurationError> {
    let forward = linear_levels(range)?;
    let outbound = if range.step > 0.0 {
        Direction::Up
    } else {
        Direction::Down
    };

    let mut points: Vec<SweepPoint> = forward
        .iter()
        .map(|&level| SweepPoint {
            level,
            direction: outbound,
        })
        .collect();

    if shape == SweepShape::Triangular {
        let inbound = outbound.reversed();
        points.extend(forward.iter().rev().skip(1).map(|&level| SweepPoint {
            level,
            direction: inbound,
        }));
    }
    Ok(points)
}

/// Sweep as a sequence of source setpoints.
pub fn setpoints(
    range: &SweepRange,
    shape: SweepShape,
    mode: SourceMode,
    compliance: f64,
) -> Result<Vec<SourceSetpoint>, ConfigurationError> {
    Ok(generate(range, shape)?
        .into_iter()
        .map(|p| SourceSetpoint {
            mode,
            level: p.level,
            compliance,
        })
        .collect())
}
