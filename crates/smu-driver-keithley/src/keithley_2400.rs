//! Keithley 2400-series adapter (SCPI).
//!
//! Protocol overview:
//! - Source and sense are configured separately (`:SOUR:FUNC`, `:SENS:FUNC`)
//! - Compliance is the sense-side protection limit (`:SENS:CURR:PROT`)
//! - `:READ?` triggers one reading; with `:FORM:ELEM VOLT,CURR` the
//!   response is `V,I`
//! - Remote sense (4-wire) via `:SYST:RSEN ON`

use crate::link::{check_compliance, check_level, parse_pair, reading_from, TimedLink};
use async_trait::async_trait;
use smu_core::{
    InstrumentError, InstrumentFamily, MeasureRange, Reading, SourceMeasure, SourceMode,
    SourceSetpoint, WireMode,
};

const MAX_VOLTS: f64 = 210.0;
const MAX_AMPS: f64 = 1.05;

pub struct Keithley2400 {
    link: TimedLink,
    identity: String,
    mode: SourceMode,
    compliance: Option<f64>,
    output: bool,
}

impl Keithley2400 {
    pub fn new(link: TimedLink, identity: impl Into<String>) -> Self {
        Self {
            link,
            identity: identity.into(),
            mode: SourceMode::Voltage,
            compliance: None,
            output: false,
        }
    }

    fn source_keyword(mode: SourceMode) -> &'static str {
        match mode {
            SourceMode::Voltage => "VOLT",
            SourceMode::Current => "CURR",
        }
    }

    /// Keyword of the measured (and protected) quantity.
    fn sense_keyword(mode: SourceMode) -> &'static str {
        match mode {
            SourceMode::Voltage => "CURR",
            SourceMode::Current => "VOLT",
        }
    }
}

#[async_trait]
impl SourceMeasure for Keithley2400 {
    fn family(&self) -> InstrumentFamily {
        InstrumentFamily::Keithley2400
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    fn supports_remote_sense(&self) -> bool {
        true
    }

    fn output_enabled(&self) -> bool {
        self.output
    }

    fn compliance(&self) -> Option<f64> {
        self.compliance
    }

    fn current_mode(&self) -> SourceMode {
        self.mode
    }

    async fn reset(&mut self) -> Result<(), InstrumentError> {
        for command in [
            "*RST",
            "*CLS",
            ":FORM:ELEM VOLT,CURR",
            ":SOUR:FUNC VOLT",
            ":SOUR:VOLT:LEV 0",
            ":OUTP OFF",
        ] {
            self.link.write(command).await?;
        }
        self.mode = SourceMode::Voltage;
        self.compliance = None;
        self.output = false;
        Ok(())
    }

    async fn configure_source(
        &mut self,
        mode: SourceMode,
        range: MeasureRange,
    ) -> Result<(), InstrumentError> {
        let source = Self::source_keyword(mode);
        let sense = Self::sense_keyword(mode);
        self.link.write(&format!(":SOUR:FUNC {source}")).await?;
        self.link.write(&format!(":SENS:FUNC '{sense}'")).await?;
        match range {
            MeasureRange::Auto => {
                self.link
                    .write(&format!(":SENS:{sense}:RANG:AUTO ON"))
                    .await?
            }
            MeasureRange::Fixed(upper) => {
                self.link
                    .write(&format!(":SENS:{sense}:RANG {upper}"))
                    .await?
            }
        }
        if mode != self.mode {
            // The protection limit is per quantity; the old one no longer applies.
            self.compliance = None;
        }
        self.mode = mode;
        Ok(())
    }

    async fn set_compliance(&mut self, limit: f64) -> Result<(), InstrumentError> {
        check_compliance(limit)?;
        let sense = Self::sense_keyword(self.mode);
        self.link.write(&format!(":SENS:{sense}:PROT {limit}")).await?;
        self.compliance = Some(limit);
        Ok(())
    }

    async fn set_level(&mut self, setpoint: &SourceSetpoint) -> Result<(), InstrumentError> {
        if setpoint.mode != self.mode {
            return Err(InstrumentError::protocol(format!(
                "{} setpoint while the source is configured for {}",
                setpoint.mode, self.mode
            )));
        }
        check_level(setpoint.mode, setpoint.level, MAX_VOLTS, MAX_AMPS)?;
        if self.compliance != Some(setpoint.compliance) {
            self.set_compliance(setpoint.compliance).await?;
        }
        let source = Self::source_keyword(self.mode);
        self.link
            .write(&format!(":SOUR:{source}:LEV {}", setpoint.level))
            .await
    }

    async fn enable_output(&mut self, on: bool) -> Result<(), InstrumentError> {
        let state = if on { "ON" } else { "OFF" };
        self.link.write(&format!(":OUTP {state}")).await?;
        self.output = on;
        Ok(())
    }

    async fn measure(&mut self) -> Result<Reading, InstrumentError> {
        let response = self.link.query(":READ?").await?;
        let (volts, amps) = parse_pair(&response)?;
        Ok(reading_from(self.mode, volts, amps))
    }

    async fn set_wire_mode(&mut self, mode: WireMode) -> Result<(), InstrumentError> {
        let state = match mode {
            WireMode::TwoWire => "OFF",
            WireMode::FourWire => "ON",
        };
        self.link.write(&format!(":SYST:RSEN {state}")).await
    }
}
