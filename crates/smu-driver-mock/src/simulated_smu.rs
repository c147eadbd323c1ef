//! Simulated Keithley source-measure unit.
//!
//! [`SimulatedSmu`] implements [`Transport`] and answers the same command
//! text a real 2400 (SCPI) or 2600 (TSP) instrument would, so the production
//! family adapters run against it unchanged. A memristor is wired across the
//! output terminals.
//!
//! # Example
//!
//! ```rust,ignore
//! use smu_driver_mock::{SimulatedSmu, ErrorConfig, ErrorScenario};
//!
//! let smu = SimulatedSmu::keithley_2400()
//!     .with_errors(ErrorConfig::scenario(ErrorScenario::FailAfterN {
//!         operation: "measure",
//!         count: 3,
//!     }));
//! let handle = smu.handle();
//! // ... connect and run ...
//! assert!(!handle.output_enabled());
//! ```

use crate::common::errors::{OP_CONFIGURE, OP_IDENTIFY, OP_MEASURE, OP_OUTPUT, OP_SET_LEVEL};
use crate::common::{ErrorConfig, Fault, MockMode, MockRng, TimingConfig};
use crate::device::{Memristor, MemristorModel, ResistanceState};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smu_core::{InstrumentError, InstrumentFamily, Reading, SourceMode, Transport};
use std::sync::Arc;
use tracing::debug;

const IDN_2400: &str = "KEITHLEY INSTRUMENTS INC.,MODEL 2400,1398745,C30   Mar 17 2006 09:29:29/A02  /K/J";
const IDN_2600: &str = "Keithley Instruments Inc., Model 2602B, 4381203, 3.2.2";

/// Power-on compliance limits.
const DEFAULT_CURRENT_LIMIT: f64 = 105e-6;
const DEFAULT_VOLTAGE_LIMIT: f64 = 21.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Scpi,
    Tsp,
}

impl Dialect {
    /// Largest programmable (voltage, current) magnitudes.
    fn source_limits(self) -> (f64, f64) {
        match self {
            Dialect::Scpi => (210.0, 1.05),
            Dialect::Tsp => (202.0, 1.5),
        }
    }
}

/// Parsed instrument command.
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Identify,
    Reset,
    /// Housekeeping with no simulated effect (`*CLS`, format selection).
    Accept,
    SourceFunction(SourceMode),
    MeasureRange,
    CurrentLimit(f64),
    VoltageLimit(f64),
    Level(SourceMode, f64),
    Output(bool),
    RemoteSense(bool),
    Measure,
}

impl Command {
    fn operation(&self) -> &'static str {
        match self {
            Command::Identify => OP_IDENTIFY,
            Command::Level(..) => OP_SET_LEVEL,
            Command::Output(_) => OP_OUTPUT,
            Command::Measure => OP_MEASURE,
            _ => OP_CONFIGURE,
        }
    }
}

struct SimState {
    commands: Vec<String>,
    source_mode: SourceMode,
    level: f64,
    current_limit: f64,
    voltage_limit: f64,
    output: bool,
    output_history: Vec<bool>,
    remote_sense: bool,
    device: Memristor,
    measurements: u64,
}

impl SimState {
    fn new(model: MemristorModel) -> Self {
        Self {
            commands: Vec::new(),
            source_mode: SourceMode::Voltage,
            level: 0.0,
            current_limit: DEFAULT_CURRENT_LIMIT,
            voltage_limit: DEFAULT_VOLTAGE_LIMIT,
            output: false,
            output_history: Vec::new(),
            remote_sense: false,
            device: Memristor::new(model),
            measurements: 0,
        }
    }

    fn reset(&mut self) {
        self.source_mode = SourceMode::Voltage;
        self.level = 0.0;
        self.current_limit = DEFAULT_CURRENT_LIMIT;
        self.voltage_limit = DEFAULT_VOLTAGE_LIMIT;
        if self.output {
            self.output_history.push(false);
        }
        self.output = false;
        self.remote_sense = false;
    }

    /// Voltage across the device for the present source settings.
    fn device_voltage(&self) -> f64 {
        match self.source_mode {
            SourceMode::Voltage => self.level,
            SourceMode::Current => {
                (self.level * self.device.resistance()).clamp(-self.voltage_limit, self.voltage_limit)
            }
        }
    }

    fn stimulate(&mut self) {
        if self.output {
            let volts = self.device_voltage();
            self.device.stimulate(volts);
        }
    }

    fn reading(&self, noise: f64) -> Reading {
        let ohms = self.device.resistance();
        let measured = match self.source_mode {
            SourceMode::Voltage => {
                (self.level / ohms).clamp(-self.current_limit, self.current_limit)
            }
            SourceMode::Current => {
                (self.level * ohms).clamp(-self.voltage_limit, self.voltage_limit)
            }
        };
        Reading {
            source: self.level,
            measured: measured * noise,
        }
    }
}

/// Read-side view of the simulator for assertions. Clones share state.
#[derive(Clone)]
pub struct SimHandle {
    shared: Arc<Mutex<SimState>>,
}

impl SimHandle {
    /// Every command received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.shared.lock().commands.clone()
    }

    pub fn output_enabled(&self) -> bool {
        self.shared.lock().output
    }

    /// Successive output states, one entry per change.
    pub fn output_history(&self) -> Vec<bool> {
        self.shared.lock().output_history.clone()
    }

    pub fn level(&self) -> f64 {
        self.shared.lock().level
    }

    pub fn source_mode(&self) -> SourceMode {
        self.shared.lock().source_mode
    }

    pub fn remote_sense(&self) -> bool {
        self.shared.lock().remote_sense
    }

    pub fn measurement_count(&self) -> u64 {
        self.shared.lock().measurements
    }

    pub fn device_state(&self) -> ResistanceState {
        self.shared.lock().device.state()
    }

    pub fn set_device_state(&self, state: ResistanceState) {
        self.shared.lock().device.set_state(state);
    }

    pub fn switch_count(&self) -> u64 {
        self.shared.lock().device.switch_count()
    }
}

/// Settings for building a simulator from a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub family: InstrumentFamily,
    pub device: MemristorModel,
    /// Relative measurement noise (0.01 = 1 %).
    pub noise: f64,
    pub seed: Option<u64>,
    /// Apply instrument-like latency.
    pub realistic_timing: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            family: InstrumentFamily::Keithley2400,
            device: MemristorModel::default(),
            noise: 0.0,
            seed: None,
            realistic_timing: false,
        }
    }
}

pub struct SimulatedSmu {
    dialect: Dialect,
    identity: String,
    shared: Arc<Mutex<SimState>>,
    errors: ErrorConfig,
    mode: MockMode,
    timing: TimingConfig,
    rng: MockRng,
    noise: f64,
}

impl SimulatedSmu {
    pub fn keithley_2400() -> Self {
        Self::new(Dialect::Scpi, IDN_2400, TimingConfig::keithley_2400())
    }

    pub fn keithley_2600() -> Self {
        Self::new(Dialect::Tsp, IDN_2600, TimingConfig::keithley_2600())
    }

    pub fn for_family(family: InstrumentFamily) -> Self {
        match family {
            InstrumentFamily::Keithley2400 => Self::keithley_2400(),
            InstrumentFamily::Keithley2600 => Self::keithley_2600(),
        }
    }

    pub fn from_config(config: &SimulatorConfig) -> Self {
        let mode = if config.realistic_timing {
            MockMode::Realistic
        } else {
            MockMode::Instant
        };
        Self::for_family(config.family)
            .with_model(config.device.clone())
            .with_noise(config.noise, config.seed)
            .with_mode(mode)
    }

    fn new(dialect: Dialect, identity: &str, timing: TimingConfig) -> Self {
        Self {
            dialect,
            identity: identity.to_string(),
            shared: Arc::new(Mutex::new(SimState::new(MemristorModel::default()))),
            errors: ErrorConfig::none(),
            mode: MockMode::Instant,
            timing,
            rng: MockRng::new(Some(0)),
            noise: 0.0,
        }
    }

    /// Override the `*IDN?` response.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_model(self, model: MemristorModel) -> Self {
        *self.shared.lock() = SimState::new(model);
        self
    }

    pub fn with_errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_noise(mut self, relative: f64, seed: Option<u64>) -> Self {
        self.noise = relative;
        self.rng = MockRng::new(seed);
        self
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            shared: self.shared.clone(),
        }
    }

    async fn exchange(&mut self, raw: &str) -> Result<Option<String>, InstrumentError> {
        let text = raw.trim();
        self.shared.lock().commands.push(text.to_string());
        debug!(command = text, "simulator received");

        let command = match self.dialect {
            Dialect::Scpi => parse_scpi(text)?,
            Dialect::Tsp => parse_tsp(text)?,
        };

        let operation = command.operation();
        if let Some(fault) = self.errors.check_operation(operation) {
            match fault {
                Fault::Error(err) => return Err(err),
                Fault::Hang => return std::future::pending().await,
            }
        }

        if self.mode == MockMode::Realistic {
            let mut delay = self.timing.communication_delay;
            if operation == OP_MEASURE {
                delay += self.timing.measurement_time;
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        self.apply(command)
    }

    fn apply(&self, command: Command) -> Result<Option<String>, InstrumentError> {
        let (max_volts, max_amps) = self.dialect.source_limits();
        let mut state = self.shared.lock();
        match command {
            Command::Identify => return Ok(Some(self.identity.clone())),
            Command::Reset => state.reset(),
            Command::Accept | Command::MeasureRange => {}
            Command::SourceFunction(mode) => {
                state.source_mode = mode;
                state.level = 0.0;
            }
            Command::CurrentLimit(limit) => state.current_limit = limit.abs(),
            Command::VoltageLimit(limit) => state.voltage_limit = limit.abs(),
            Command::Level(mode, level) => {
                if mode != state.source_mode {
                    return Err(InstrumentError::protocol(format!(
                        "{mode} level sent while sourcing {}",
                        state.source_mode
                    )));
                }
                let max = match mode {
                    SourceMode::Voltage => max_volts,
                    SourceMode::Current => max_amps,
                };
                if !level.is_finite() || level.abs() > max {
                    return Err(InstrumentError::out_of_range(format!(
                        "{level} {} outside ±{max} {}",
                        mode.source_unit(),
                        mode.source_unit()
                    )));
                }
                state.level = level;
                state.stimulate();
            }
            Command::Output(on) => {
                if state.output != on {
                    state.output_history.push(on);
                }
                state.output = on;
                state.stimulate();
            }
            Command::RemoteSense(on) => state.remote_sense = on,
            Command::Measure => {
                if !state.output {
                    return Err(InstrumentError::protocol("measurement requested with output off"));
                }
                state.measurements += 1;
                let reading = state.reading(self.rng.noise_factor(self.noise));
                let (volts, amps) = match state.source_mode {
                    SourceMode::Voltage => (reading.source, reading.measured),
                    SourceMode::Current => (reading.measured, reading.source),
                };
                let response = match self.dialect {
                    Dialect::Scpi => format!("{volts:+.6E},{amps:+.6E}"),
                    Dialect::Tsp => format!("{amps:.6e}\t{volts:.6e}"),
                };
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Transport for SimulatedSmu {
    async fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        self.exchange(command).await.map(|_| ())
    }

    async fn query(&mut self, command: &str) -> Result<String, InstrumentError> {
        self.exchange(command)
            .await?
            .ok_or_else(|| InstrumentError::protocol(format!("`{command}` produced no response")))
    }
}

fn number(text: &str) -> Result<f64, InstrumentError> {
    text.trim()
        .parse()
        .map_err(|_| InstrumentError::protocol(format!("numeric data expected, got `{text}`")))
}

fn undefined(command: &str) -> InstrumentError {
    InstrumentError::protocol(format!("undefined header `{command}`"))
}

fn parse_scpi(command: &str) -> Result<Command, InstrumentError> {
    let upper = command.to_ascii_uppercase();
    let (header, arg) = match upper.split_once(' ') {
        Some((h, a)) => (h, Some(a.trim())),
        None => (upper.as_str(), None),
    };
    let parsed = match (header, arg) {
        ("*IDN?", None) => Command::Identify,
        ("*RST", None) => Command::Reset,
        ("*CLS", None) | (":FORM:ELEM", Some(_)) | (":SENS:FUNC", Some(_)) => Command::Accept,
        (":SOUR:FUNC", Some("VOLT")) => Command::SourceFunction(SourceMode::Voltage),
        (":SOUR:FUNC", Some("CURR")) => Command::SourceFunction(SourceMode::Current),
        (":SENS:CURR:RANG:AUTO" | ":SENS:VOLT:RANG:AUTO", Some("ON" | "OFF")) => {
            Command::MeasureRange
        }
        (":SENS:CURR:RANG" | ":SENS:VOLT:RANG", Some(v)) => {
            number(v)?;
            Command::MeasureRange
        }
        (":SENS:CURR:PROT", Some(v)) => Command::CurrentLimit(number(v)?),
        (":SENS:VOLT:PROT", Some(v)) => Command::VoltageLimit(number(v)?),
        (":SOUR:VOLT:LEV", Some(v)) => Command::Level(SourceMode::Voltage, number(v)?),
        (":SOUR:CURR:LEV", Some(v)) => Command::Level(SourceMode::Current, number(v)?),
        (":OUTP", Some("ON")) => Command::Output(true),
        (":OUTP", Some("OFF")) => Command::Output(false),
        (":SYST:RSEN", Some("ON")) => Command::RemoteSense(true),
        (":SYST:RSEN", Some("OFF")) => Command::RemoteSense(false),
        (":READ?", None) => Command::Measure,
        _ => return Err(undefined(command)),
    };
    Ok(parsed)
}

/// Split `smua.source.levelv = 1` into (`smua`, `source.levelv = 1`).
fn split_channel(command: &str) -> Option<(&str, &str)> {
    let (channel, rest) = command.split_once('.')?;
    matches!(channel, "smua" | "smub").then_some((channel, rest))
}

fn parse_tsp(command: &str) -> Result<Command, InstrumentError> {
    match command {
        "*IDN?" => return Ok(Command::Identify),
        "errorqueue.clear()" | "format.data = format.ASCII" => return Ok(Command::Accept),
        _ => {}
    }

    if let Some(inner) = command
        .strip_prefix("print(")
        .and_then(|s| s.strip_suffix(')'))
    {
        return match split_channel(inner) {
            Some((_, "measure.iv()")) => Ok(Command::Measure),
            _ => Err(undefined(command)),
        };
    }

    let (channel, rest) = split_channel(command).ok_or_else(|| undefined(command))?;
    if rest == "reset()" {
        return Ok(Command::Reset);
    }
    let (attribute, value) = rest
        .split_once('=')
        .map(|(a, v)| (a.trim(), v.trim()))
        .ok_or_else(|| undefined(command))?;
    // Enumerated values are qualified by the same channel: smua.OUTPUT_ON
    let constant = value
        .strip_prefix(channel)
        .and_then(|v| v.strip_prefix('.'));

    let parsed = match (attribute, constant) {
        ("source.func", Some("OUTPUT_DCVOLTS")) => Command::SourceFunction(SourceMode::Voltage),
        ("source.func", Some("OUTPUT_DCAMPS")) => Command::SourceFunction(SourceMode::Current),
        ("source.output", Some("OUTPUT_ON")) => Command::Output(true),
        ("source.output", Some("OUTPUT_OFF")) => Command::Output(false),
        ("sense", Some("SENSE_REMOTE")) => Command::RemoteSense(true),
        ("sense", Some("SENSE_LOCAL")) => Command::RemoteSense(false),
        ("measure.autorangei" | "measure.autorangev", Some("AUTORANGE_ON" | "AUTORANGE_OFF")) => {
            Command::MeasureRange
        }
        ("measure.rangei" | "measure.rangev", None) => {
            number(value)?;
            Command::MeasureRange
        }
        ("source.limiti", None) => Command::CurrentLimit(number(value)?),
        ("source.limitv", None) => Command::VoltageLimit(number(value)?),
        ("source.levelv", None) => Command::Level(SourceMode::Voltage, number(value)?),
        ("source.leveli", None) => Command::Level(SourceMode::Current, number(value)?),
        _ => return Err(undefined(command)),
    };
    Ok(parsed)
}
