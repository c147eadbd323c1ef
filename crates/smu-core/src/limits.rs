//! Safety limits applied during pre-flight validation.

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_PROGRAM_VOLTAGE: f64 = 20.0;
pub const DEFAULT_MAX_CYCLES: u64 = 100_000;
pub const DEFAULT_MAX_SWEEP_POINTS: usize = 100_000;

/// Bounds a run configuration must respect before any hardware command is
/// issued.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyLimits {
    /// Largest |voltage| allowed for programming, read, voltage sweep and bias levels.
    pub max_program_voltage: f64,
    /// Largest endurance cycle count.
    pub max_cycles: u64,
    /// Largest number of points a single sweep pass may generate.
    pub max_sweep_points: usize,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_program_voltage: DEFAULT_MAX_PROGRAM_VOLTAGE,
            max_cycles: DEFAULT_MAX_CYCLES,
            max_sweep_points: DEFAULT_MAX_SWEEP_POINTS,
        }
    }
}

impl SafetyLimits {
    /// No bounds beyond numeric sanity. Intended for tests and simulators.
    pub fn unlimited() -> Self {
        Self {
            max_program_voltage: f64::INFINITY,
            max_cycles: u64::MAX,
            max_sweep_points: usize::MAX,
        }
    }
}
