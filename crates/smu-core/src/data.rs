//! Measurement data model.
//!
//! - [`SourceSetpoint`]: one immutable source command (mode, level, compliance)
//! - [`Reading`]: the raw pair returned by `measure()`
//! - [`MeasurementRecord`]: one appended row of a test run
//!
//! Records are ordered by `sequence_index`; `timestamp` is a monotonic offset
//! from the start of the run and is non-decreasing in a correct run.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Quantity driven by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// Source voltage, measure current. Compliance is a current limit.
    #[default]
    Voltage,
    /// Source current, measure voltage. Compliance is a voltage limit.
    Current,
}

impl SourceMode {
    /// Unit of the sourced quantity.
    pub fn source_unit(&self) -> &'static str {
        match self {
            SourceMode::Voltage => "V",
            SourceMode::Current => "A",
        }
    }

    /// Unit of the measured (and compliance) quantity.
    pub fn measure_unit(&self) -> &'static str {
        match self {
            SourceMode::Voltage => "A",
            SourceMode::Current => "V",
        }
    }
}

impl std::fmt::Display for SourceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceMode::Voltage => write!(f, "voltage"),
            SourceMode::Current => write!(f, "current"),
        }
    }
}

/// A single source command. Immutable once issued.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceSetpoint {
    pub mode: SourceMode,
    pub level: f64,
    pub compliance: f64,
}

impl SourceSetpoint {
    pub fn voltage(level: f64, compliance: f64) -> Self {
        Self {
            mode: SourceMode::Voltage,
            level,
            compliance,
        }
    }

    pub fn current(level: f64, compliance: f64) -> Self {
        Self {
            mode: SourceMode::Current,
            level,
            compliance,
        }
    }

    /// Same mode and compliance at a different level.
    pub fn with_level(&self, level: f64) -> Self {
        Self { level, ..*self }
    }
}

/// Result of one `measure()` call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Read-back of the sourced quantity.
    pub source: f64,
    /// The complementary measured quantity.
    pub measured: f64,
}

/// Phase tag attached to every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestPhase {
    Set,
    Reset,
    SweepUp,
    SweepDown,
    Hold,
    Probe,
}

impl TestPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestPhase::Set => "SET",
            TestPhase::Reset => "RESET",
            TestPhase::SweepUp => "SWEEP_UP",
            TestPhase::SweepDown => "SWEEP_DOWN",
            TestPhase::Hold => "HOLD",
            TestPhase::Probe => "PROBE",
        }
    }
}

impl std::fmt::Display for TestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub sequence_index: u64,
    /// Monotonic offset from the start of the run.
    #[serde(with = "humantime_serde")]
    pub timestamp: Duration,
    pub source_value: f64,
    pub measured_value: f64,
    /// `None` when resistance is undefined for this reading.
    pub resistance: Option<f64>,
    pub phase: TestPhase,
    /// IV-loop repetition this record belongs to.
    pub loop_index: Option<u32>,
    /// Endurance cycle this record belongs to.
    pub cycle_index: Option<u64>,
    /// Retention: actual time since the programming pulse ended.
    #[serde(default, with = "humantime_serde")]
    pub since_programming: Option<Duration>,
}

/// Per-record tags supplied by a protocol; index and timestamp are assigned
/// by the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RecordTags {
    pub loop_index: Option<u32>,
    pub cycle_index: Option<u64>,
    pub since_programming: Option<Duration>,
}

impl RecordTags {
    pub fn loop_index(index: u32) -> Self {
        Self {
            loop_index: Some(index),
            ..Self::default()
        }
    }

    pub fn cycle(index: u64) -> Self {
        Self {
            cycle_index: Some(index),
            ..Self::default()
        }
    }

    pub fn since_programming(elapsed: Duration) -> Self {
        Self {
            since_programming: Some(elapsed),
            ..Self::default()
        }
    }
}

/// Resistance magnitude from a reading taken in `mode`.
///
/// Voltage sourcing gives `|source / measured|`, current sourcing gives
/// `|measured / source|`. Returns `None` if either value is non-finite, the
/// denominator is zero, or the quotient is not finite.
pub fn resistance(mode: SourceMode, reading: Reading) -> Option<f64> {
    let (volts, amps) = match mode {
        SourceMode::Voltage => (reading.source, reading.measured),
        SourceMode::Current => (reading.measured, reading.source),
    };
    if !volts.is_finite() || !amps.is_finite() || amps == 0.0 {
        return None;
    }
    let ohms = (volts / amps).abs();
    ohms.is_finite().then_some(ohms)
}
