//! `smu-experiment`
//!
//! Test sequencing for memristor characterization.
//!
//! - [`sweep`]: pure sweep generator (linear and triangular)
//! - [`protocols`]: one state machine per test kind, advanced step by step
//! - [`AcquisitionBuffer`]: append-only record store with live subscription
//! - [`RunController`]: owns the instrument session and drives one run at a
//!   time, with abort, pause and guaranteed output shutdown

pub mod buffer;
pub mod protocols;
pub mod run_controller;
pub mod sweep;

pub use buffer::AcquisitionBuffer;
pub use protocols::{Protocol, Step, StepContext};
pub use run_controller::{
    Progress, RunController, RunMetadata, RunReport, RunState, RunStatus,
};
pub use sweep::{generate, setpoints, Direction, SweepPoint};
