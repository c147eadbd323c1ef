//! Keithley 2600-series adapter (TSP).
//!
//! Commands are Lua statements addressed to one SMU channel (`smua` or
//! `smub`). Source and measure share one object; `smuX.measure.iv()` returns
//! current and voltage together, printed back as `I<TAB>V`.
//!
//! Remote sense is not routed by this adapter: 4-wire requests fail with
//! `Unsupported`.

use crate::link::{check_compliance, check_level, parse_pair, reading_from, TimedLink};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smu_core::{
    InstrumentError, InstrumentFamily, MeasureRange, Reading, SourceMeasure, SourceMode,
    SourceSetpoint,
};

const MAX_VOLTS: f64 = 202.0;
const MAX_AMPS: f64 = 1.5;

/// SMU channel of a 2600-series instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    #[default]
    A,
    B,
}

impl Channel {
    pub fn name(&self) -> &'static str {
        match self {
            Channel::A => "smua",
            Channel::B => "smub",
        }
    }
}

pub struct Keithley2600 {
    link: TimedLink,
    identity: String,
    channel: Channel,
    mode: SourceMode,
    compliance: Option<f64>,
    output: bool,
}

impl Keithley2600 {
    pub fn new(link: TimedLink, identity: impl Into<String>, channel: Channel) -> Self {
        Self {
            link,
            identity: identity.into(),
            channel,
            mode: SourceMode::Voltage,
            compliance: None,
            output: false,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Attribute suffix of the sourced quantity (`levelv`).
    fn source_suffix(mode: SourceMode) -> char {
        match mode {
            SourceMode::Voltage => 'v',
            SourceMode::Current => 'i',
        }
    }

    /// Attribute suffix of the measured quantity (`limiti`, `rangei`).
    fn measure_suffix(mode: SourceMode) -> char {
        match mode {
            SourceMode::Voltage => 'i',
            SourceMode::Current => 'v',
        }
    }

    async fn assign(&mut self, attribute: &str, value: &str) -> Result<(), InstrumentError> {
        let smu = self.channel.name();
        self.link
            .write(&format!("{smu}.{attribute} = {value}"))
            .await
    }
}

#[async_trait]
impl SourceMeasure for Keithley2600 {
    fn family(&self) -> InstrumentFamily {
        InstrumentFamily::Keithley2600
    }

    fn identity(&self) -> &str {
        &self.identity
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
        let smu = self.channel.name();
        self.link.write(&format!("{smu}.reset()")).await?;
        self.link.write("errorqueue.clear()").await?;
        self.link.write("format.data = format.ASCII").await?;
        self.assign("source.func", &format!("{smu}.OUTPUT_DCVOLTS"))
            .await?;
        self.assign("source.levelv", "0").await?;
        self.assign("source.output", &format!("{smu}.OUTPUT_OFF"))
            .await?;
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
        let smu = self.channel.name();
        let function = match mode {
            SourceMode::Voltage => "OUTPUT_DCVOLTS",
            SourceMode::Current => "OUTPUT_DCAMPS",
        };
        self.assign("source.func", &format!("{smu}.{function}"))
            .await?;
        let m = Self::measure_suffix(mode);
        match range {
            MeasureRange::Auto => {
                self.assign(&format!("measure.autorange{m}"), &format!("{smu}.AUTORANGE_ON"))
                    .await?
            }
            MeasureRange::Fixed(upper) => {
                self.assign(&format!("measure.range{m}"), &upper.to_string())
                    .await?
            }
        }
        if mode != self.mode {
            self.compliance = None;
        }
        self.mode = mode;
        Ok(())
    }

    async fn set_compliance(&mut self, limit: f64) -> Result<(), InstrumentError> {
        check_compliance(limit)?;
        let m = Self::measure_suffix(self.mode);
        self.assign(&format!("source.limit{m}"), &limit.to_string())
            .await?;
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
        let s = Self::source_suffix(self.mode);
        self.assign(&format!("source.level{s}"), &setpoint.level.to_string())
            .await
    }

    async fn enable_output(&mut self, on: bool) -> Result<(), InstrumentError> {
        let smu = self.channel.name();
        let state = if on { "OUTPUT_ON" } else { "OUTPUT_OFF" };
        self.assign("source.output", &format!("{smu}.{state}"))
            .await?;
        self.output = on;
        Ok(())
    }

    async fn measure(&mut self) -> Result<Reading, InstrumentError> {
        let smu = self.channel.name();
        let response = self.link.query(&format!("print({smu}.measure.iv())")).await?;
        let (amps, volts) = parse_pair(&response)?;
        Ok(reading_from(self.mode, volts, amps))
    }
}
