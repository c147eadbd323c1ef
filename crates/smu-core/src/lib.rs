//! `smu-core`
//!
//! Shared types for the SMU characterization engine.
//!
//! ## Layers
//!
//! - [`Transport`]: request/response link to the instrument (socket, simulator)
//! - [`SourceMeasure`]: family-agnostic source/measure capability implemented
//!   by the 2400 and 2600 adapters
//! - [`InstrumentSession`]: the explicitly owned connected instrument
//!
//! ## Key Types
//!
//! - [`TestRunConfig`]: parameters of one run, tagged by test kind
//! - [`MeasurementRecord`]: one appended row of a run
//! - [`SmuError`]: configuration, instrument and conflict errors

pub mod capabilities;
pub mod config;
pub mod data;
pub mod error;
pub mod limits;
pub mod session;
pub mod transport;

pub use capabilities::{InstrumentFamily, MeasureRange, SourceMeasure, WireMode};
pub use config::{
    BiasConfig, EnduranceConfig, EngineSettings, IvLoopConfig, ProgramState, ResistanceConfig,
    RetentionConfig, SweepConfig, SweepRange, SweepShape, TestKind, TestRunConfig,
};
pub use data::{
    resistance, MeasurementRecord, Reading, RecordTags, SourceMode, SourceSetpoint, TestPhase,
};
pub use error::{
    ConfigurationError, ConflictError, InstrumentError, InstrumentErrorKind, SmuError, SmuResult,
};
pub use limits::SafetyLimits;
pub use session::InstrumentSession;
pub use transport::Transport;
