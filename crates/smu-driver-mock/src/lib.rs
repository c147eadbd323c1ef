//! Simulated source-measure units for testing without hardware.
//!
//! [`SimulatedSmu`] speaks the 2400 SCPI or 2600 TSP command set over the
//! [`Transport`](smu_core::Transport) seam, with a two-state memristor across
//! its terminals. It uses async-safe delays only (`tokio::time::sleep`), so
//! tests under a paused tokio clock stay deterministic.
//!
//! # Behavior
//!
//! - Device: 1 kΩ LRS / 100 kΩ HRS, SET at ≥ +1 V, RESET at ≤ -1 V
//! - Measured quantity clamped to the active compliance limit
//! - Measurement with output off is a protocol error
//! - Unknown command text is a protocol error

pub mod common;
mod device;
mod simulated_smu;

pub use common::{ErrorConfig, ErrorScenario, Fault, MockMode, MockRng, TimingConfig};
pub use device::{Memristor, MemristorModel, ResistanceState};
pub use simulated_smu::{SimHandle, SimulatedSmu, SimulatorConfig};
