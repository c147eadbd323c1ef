//! Source-measure capability interface.
//!
//! Every instrument family is driven through [`SourceMeasure`]. Test protocols
//! only ever see this trait; the family adapters translate each call into the
//! instrument's own command dialect, so protocol code never branches on
//! family.
//!
//! # Contract
//!
//! - Calls are issued by exactly one owner at a time (the active protocol),
//!   hence `&mut self`.
//! - Every call may fail with an [`InstrumentError`]; adapters apply a
//!   per-call timeout and report it as `InstrumentErrorKind::Timeout`.
//! - `enable_output` and `set_level` have physical effect. Callers that start
//!   sourcing must reach [`SourceMeasure::safe_shutdown`] on every exit path.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn probe(smu: &mut dyn SourceMeasure) -> Result<Reading, InstrumentError> {
//!     smu.configure_source(SourceMode::Voltage, MeasureRange::Auto).await?;
//!     smu.set_compliance(1e-3).await?;
//!     smu.set_level(&SourceSetpoint::voltage(0.1, 1e-3)).await?;
//!     smu.enable_output(true).await?;
//!     let reading = smu.measure().await;
//!     smu.safe_shutdown().await?;
//!     reading
//! }
//! ```

use crate::data::{Reading, SourceMode, SourceSetpoint};
use crate::error::InstrumentError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Instrument command family, selected once at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentFamily {
    /// SCPI command set (2400, 2410, 2450 ...). Source and measure are
    /// separate commands; readings come back from `:READ?`.
    #[serde(rename = "2400")]
    Keithley2400,
    /// TSP script commands (2601, 2602, 2636 ...). Measurement is a combined
    /// script call printed back over the link.
    #[serde(rename = "2600")]
    Keithley2600,
}

impl std::fmt::Display for InstrumentFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstrumentFamily::Keithley2400 => write!(f, "2400"),
            InstrumentFamily::Keithley2600 => write!(f, "2600"),
        }
    }
}

/// Range of the measured quantity.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureRange {
    #[default]
    Auto,
    /// Fixed upper range in the measured unit (A for voltage sourcing).
    Fixed(f64),
}

/// Sense wiring for resistance measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireMode {
    #[default]
    TwoWire,
    /// Separate force and sense leads (remote sense).
    FourWire,
}

/// Capability: source a level and measure the complementary quantity.
#[async_trait]
pub trait SourceMeasure: Send {
    /// Family of the connected instrument.
    fn family(&self) -> InstrumentFamily;

    /// Identity string reported by the instrument at connect time.
    fn identity(&self) -> &str;

    /// Whether the adapter can route sense leads separately (4-wire).
    fn supports_remote_sense(&self) -> bool {
        false
    }

    /// Last output state commanded through this adapter.
    fn output_enabled(&self) -> bool;

    /// Last compliance limit commanded through this adapter.
    fn compliance(&self) -> Option<f64>;

    /// Source mode most recently configured.
    fn current_mode(&self) -> SourceMode;

    /// Return the instrument to a known idle state: defaults restored,
    /// ASCII readback format, 0 V source, output off.
    async fn reset(&mut self) -> Result<(), InstrumentError>;

    /// Select the source function and the range of the measured quantity.
    async fn configure_source(
        &mut self,
        mode: SourceMode,
        range: MeasureRange,
    ) -> Result<(), InstrumentError>;

    /// Set the compliance limit for the currently configured source mode.
    async fn set_compliance(&mut self, limit: f64) -> Result<(), InstrumentError>;

    /// Apply a setpoint. Compliance is re-issued only if it changed.
    async fn set_level(&mut self, setpoint: &SourceSetpoint) -> Result<(), InstrumentError>;

    async fn enable_output(&mut self, on: bool) -> Result<(), InstrumentError>;

    /// Trigger one reading.
    async fn measure(&mut self) -> Result<Reading, InstrumentError>;

    /// Select 2-wire or 4-wire sensing.
    ///
    /// # Default Implementation
    /// Accepts `TwoWire`, rejects `FourWire` as unsupported.
    async fn set_wire_mode(&mut self, mode: WireMode) -> Result<(), InstrumentError> {
        match mode {
            WireMode::TwoWire => Ok(()),
            WireMode::FourWire => Err(InstrumentError::unsupported(format!(
                "{} adapter cannot route remote sense",
                self.family()
            ))),
        }
    }

    /// Drive the source to zero and disable the output.
    ///
    /// Output-off is attempted even if zeroing the level fails; the first
    /// error is returned.
    async fn safe_shutdown(&mut self) -> Result<(), InstrumentError> {
        // Nothing was sourced if compliance was never configured.
        let zeroed = match self.compliance() {
            Some(compliance) => {
                let mode = self.current_mode();
                self.set_level(&SourceSetpoint {
                    mode,
                    level: 0.0,
                    compliance,
                })
                .await
            }
            None => Ok(()),
        };
        let off = self.enable_output(false).await;
        zeroed.and(off)
    }
}
