//! Run configuration.
//!
//! [`TestRunConfig`] is the complete externally supplied parameter set for a
//! run. It deserializes from TOML/JSON tagged by `kind`:
//!
//! ```toml
//! kind = "endurance"
//! cycles = 1000
//! set_level = 1.5
//! reset_level = -1.5
//! read_level = 0.1
//! compliance = 1e-3
//! pulse_width = "10ms"
//! ```
//!
//! Durations use humantime notation (`"250ms"`, `"2s"`, `"1h 30m"`).
//!
//! [`TestRunConfig::validate`] is pure and runs before any hardware command.
//! [`EngineSettings`] carries the engine-side knobs (per-call timeout, safety
//! limits, live channel capacity) that never change protocol semantics.

use crate::capabilities::{MeasureRange, WireMode};
use crate::data::{SourceMode, TestPhase};
use crate::error::ConfigurationError;
use crate::limits::SafetyLimits;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_settle() -> Duration {
    Duration::from_millis(10)
}

fn default_probe_level() -> f64 {
    1e-4
}

fn default_resistance_source() -> SourceMode {
    SourceMode::Current
}

fn default_loops() -> u32 {
    1
}

// =============================================================================
// Sweep ranges
// =============================================================================

/// Traversal shape of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepShape {
    /// `start → stop`
    #[default]
    Linear,
    /// `start → stop → start`, apex visited once.
    Triangular,
}

/// Numeric bounds of one sweep pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepRange {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

impl SweepRange {
    pub fn new(start: f64, stop: f64, step: f64) -> Self {
        Self { start, stop, step }
    }

    /// Tolerance for "reached stop" comparisons, proportional to the step.
    pub fn epsilon(&self) -> f64 {
        self.step.abs() * 1e-9
    }

    /// Points in one `start → stop` pass: `floor(|stop-start|/|step|) + 1`.
    ///
    /// # Errors
    /// Non-finite bounds, a zero step, or a step pointing away from `stop`.
    pub fn point_count(&self) -> Result<usize, ConfigurationError> {
        if !self.start.is_finite() || !self.stop.is_finite() {
            return Err(ConfigurationError::new(
                "start/stop",
                "sweep bounds must be finite",
            ));
        }
        if !self.step.is_finite() || self.step == 0.0 {
            return Err(ConfigurationError::new(
                "step",
                "step must be finite and non-zero",
            ));
        }
        let span = self.stop - self.start;
        if span == 0.0 {
            return Ok(1);
        }
        if span.signum() != self.step.signum() {
            return Err(ConfigurationError::new(
                "step",
                format!(
                    "step {} points away from stop ({} -> {})",
                    self.step, self.start, self.stop
                ),
            ));
        }
        // Absorb accumulated representation error so 1.0/0.1 counts 11 points.
        let intervals = (span.abs() / self.step.abs() + 1e-9).floor();
        if intervals >= usize::MAX as f64 {
            return Err(ConfigurationError::new("step", "step too small for range"));
        }
        Ok(intervals as usize + 1)
    }
}

// =============================================================================
// Per-kind parameters
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default)]
    pub source: SourceMode,
    pub start: f64,
    pub stop: f64,
    pub step: f64,
    #[serde(default)]
    pub shape: SweepShape,
    pub compliance: f64,
    #[serde(default)]
    pub range: MeasureRange,
    #[serde(default = "default_settle", with = "humantime_serde")]
    pub settle: Duration,
}

impl SweepConfig {
    pub fn range_bounds(&self) -> SweepRange {
        SweepRange::new(self.start, self.stop, self.step)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvLoopConfig {
    #[serde(default)]
    pub source: SourceMode,
    pub start: f64,
    pub stop: f64,
    pub step: f64,
    #[serde(default = "default_loops")]
    pub loops: u32,
    pub compliance: f64,
    #[serde(default)]
    pub range: MeasureRange,
    #[serde(default = "default_settle", with = "humantime_serde")]
    pub settle: Duration,
}

impl IvLoopConfig {
    pub fn range_bounds(&self) -> SweepRange {
        SweepRange::new(self.start, self.stop, self.step)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasConfig {
    #[serde(default)]
    pub source: SourceMode,
    pub level: f64,
    pub compliance: f64,
    #[serde(default)]
    pub range: MeasureRange,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    #[serde(with = "humantime_serde")]
    pub sample_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResistanceConfig {
    #[serde(default)]
    pub wire_mode: WireMode,
    #[serde(default = "default_resistance_source")]
    pub source: SourceMode,
    /// Small probe level in the source unit.
    #[serde(default = "default_probe_level")]
    pub probe_level: f64,
    pub compliance: f64,
    #[serde(default)]
    pub range: MeasureRange,
    #[serde(default = "default_settle", with = "humantime_serde")]
    pub settle: Duration,
}

/// Memristive state written before a retention run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramState {
    Set,
    Reset,
}

impl ProgramState {
    pub fn phase(&self) -> TestPhase {
        match self {
            ProgramState::Set => TestPhase::Set,
            ProgramState::Reset => TestPhase::Reset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub state: ProgramState,
    /// Programming pulse level (V).
    pub program_level: f64,
    #[serde(with = "humantime_serde")]
    pub pulse_width: Duration,
    /// Non-disturbing read level (V).
    pub read_level: f64,
    pub compliance: f64,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    #[serde(with = "humantime_serde")]
    pub sample_interval: Duration,
    #[serde(default = "default_settle", with = "humantime_serde")]
    pub read_settle: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnduranceConfig {
    pub cycles: u64,
    pub set_level: f64,
    pub reset_level: f64,
    pub read_level: f64,
    pub compliance: f64,
    #[serde(with = "humantime_serde")]
    pub pulse_width: Duration,
    #[serde(default = "default_settle", with = "humantime_serde")]
    pub read_settle: Duration,
}

// =============================================================================
// TestRunConfig
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    Sweep,
    Bias,
    Resistance,
    IvLoop,
    Retention,
    Endurance,
}

impl std::fmt::Display for TestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TestKind::Sweep => "sweep",
            TestKind::Bias => "bias",
            TestKind::Resistance => "resistance",
            TestKind::IvLoop => "iv_loop",
            TestKind::Retention => "retention",
            TestKind::Endurance => "endurance",
        };
        f.write_str(label)
    }
}

/// Parameters of one test run, discriminated by test kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestRunConfig {
    Sweep(SweepConfig),
    Bias(BiasConfig),
    Resistance(ResistanceConfig),
    IvLoop(IvLoopConfig),
    Retention(RetentionConfig),
    Endurance(EnduranceConfig),
}

impl TestRunConfig {
    pub fn kind(&self) -> TestKind {
        match self {
            TestRunConfig::Sweep(_) => TestKind::Sweep,
            TestRunConfig::Bias(_) => TestKind::Bias,
            TestRunConfig::Resistance(_) => TestKind::Resistance,
            TestRunConfig::IvLoop(_) => TestKind::IvLoop,
            TestRunConfig::Retention(_) => TestKind::Retention,
            TestRunConfig::Endurance(_) => TestKind::Endurance,
        }
    }

    /// Check parameters against numeric sanity and `limits`.
    pub fn validate(&self, limits: &SafetyLimits) -> Result<(), ConfigurationError> {
        match self {
            TestRunConfig::Sweep(cfg) => {
                check_compliance(cfg.compliance)?;
                check_range(&cfg.range)?;
                check_source_level(cfg.source, "start", cfg.start, limits)?;
                check_source_level(cfg.source, "stop", cfg.stop, limits)?;
                check_sweep_points(&cfg.range_bounds(), limits)
            }
            TestRunConfig::IvLoop(cfg) => {
                check_compliance(cfg.compliance)?;
                check_range(&cfg.range)?;
                if cfg.loops == 0 {
                    return Err(ConfigurationError::new("loops", "must be at least 1"));
                }
                check_source_level(cfg.source, "start", cfg.start, limits)?;
                check_source_level(cfg.source, "stop", cfg.stop, limits)?;
                check_sweep_points(&cfg.range_bounds(), limits)
            }
            TestRunConfig::Bias(cfg) => {
                check_compliance(cfg.compliance)?;
                check_range(&cfg.range)?;
                check_finite("level", cfg.level)?;
                check_source_level(cfg.source, "level", cfg.level, limits)?;
                check_positive_duration("duration", cfg.duration)?;
                check_positive_duration("sample_interval", cfg.sample_interval)
            }
            TestRunConfig::Resistance(cfg) => {
                check_compliance(cfg.compliance)?;
                check_range(&cfg.range)?;
                check_finite("probe_level", cfg.probe_level)?;
                if cfg.probe_level == 0.0 {
                    return Err(ConfigurationError::new(
                        "probe_level",
                        "a zero probe level cannot yield a resistance",
                    ));
                }
                Ok(())
            }
            TestRunConfig::Retention(cfg) => {
                check_compliance(cfg.compliance)?;
                check_program_level("program_level", cfg.program_level, limits)?;
                check_program_level("read_level", cfg.read_level, limits)?;
                check_positive_duration("pulse_width", cfg.pulse_width)?;
                check_positive_duration("duration", cfg.duration)?;
                check_positive_duration("sample_interval", cfg.sample_interval)
            }
            TestRunConfig::Endurance(cfg) => {
                check_compliance(cfg.compliance)?;
                if cfg.cycles == 0 {
                    return Err(ConfigurationError::new("cycles", "must be at least 1"));
                }
                if cfg.cycles > limits.max_cycles {
                    return Err(ConfigurationError::new(
                        "cycles",
                        format!("{} exceeds the limit of {}", cfg.cycles, limits.max_cycles),
                    ));
                }
                check_program_level("set_level", cfg.set_level, limits)?;
                check_program_level("reset_level", cfg.reset_level, limits)?;
                check_program_level("read_level", cfg.read_level, limits)?;
                check_positive_duration("pulse_width", cfg.pulse_width)
            }
        }
    }

    /// Parameters as JSON, for run metadata headers.
    pub fn parameters_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn check_finite(field: &str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigurationError::new(field, "must be finite"))
    }
}

fn check_compliance(limit: f64) -> Result<(), ConfigurationError> {
    if limit.is_finite() && limit > 0.0 {
        Ok(())
    } else {
        Err(ConfigurationError::new(
            "compliance",
            "must be finite and greater than 0",
        ))
    }
}

fn check_range(range: &MeasureRange) -> Result<(), ConfigurationError> {
    match range {
        MeasureRange::Auto => Ok(()),
        MeasureRange::Fixed(upper) if upper.is_finite() && *upper > 0.0 => Ok(()),
        MeasureRange::Fixed(_) => Err(ConfigurationError::new(
            "range",
            "fixed range must be finite and greater than 0",
        )),
    }
}

fn check_positive_duration(field: &str, value: Duration) -> Result<(), ConfigurationError> {
    if value.is_zero() {
        Err(ConfigurationError::new(field, "must be greater than 0"))
    } else {
        Ok(())
    }
}

fn check_program_level(
    field: &str,
    level: f64,
    limits: &SafetyLimits,
) -> Result<(), ConfigurationError> {
    check_finite(field, level)?;
    if level.abs() > limits.max_program_voltage {
        return Err(ConfigurationError::new(
            field,
            format!(
                "|{}| V exceeds the limit of {} V",
                level, limits.max_program_voltage
            ),
        ));
    }
    Ok(())
}

/// Voltage levels share the programming limit; current levels are bounded
/// by compliance alone.
fn check_source_level(
    mode: SourceMode,
    field: &str,
    level: f64,
    limits: &SafetyLimits,
) -> Result<(), ConfigurationError> {
    match mode {
        SourceMode::Voltage => check_program_level(field, level, limits),
        SourceMode::Current => check_finite(field, level),
    }
}

fn check_sweep_points(range: &SweepRange, limits: &SafetyLimits) -> Result<(), ConfigurationError> {
    let points = range.point_count()?;
    if points > limits.max_sweep_points {
        return Err(ConfigurationError::new(
            "step",
            format!(
                "sweep would generate {} points, limit is {}",
                points, limits.max_sweep_points
            ),
        ));
    }
    Ok(())
}

// =============================================================================
// EngineSettings
// =============================================================================

fn default_instrument_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_record_channel_capacity() -> usize {
    1024
}

/// Engine-side settings. None of these alter protocol semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Per-call instrument timeout.
    #[serde(default = "default_instrument_timeout", with = "humantime_serde")]
    pub instrument_timeout: Duration,
    #[serde(default)]
    pub limits: SafetyLimits,
    /// Capacity of the live record broadcast channel.
    #[serde(default = "default_record_channel_capacity")]
    pub record_channel_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            instrument_timeout: default_instrument_timeout(),
            limits: SafetyLimits::default(),
            record_channel_capacity: default_record_channel_capacity(),
        }
    }
}
