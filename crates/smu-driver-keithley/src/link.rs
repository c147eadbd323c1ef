//! Per-call timeout around a [`Transport`].

use smu_core::{InstrumentError, Reading, SourceMode, Transport};
use std::time::Duration;
use tokio::time::timeout;

/// Default per-call instrument timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport wrapped with a per-call deadline. Owned by exactly one adapter.
pub struct TimedLink {
    transport: Box<dyn Transport>,
    timeout: Duration,
}

impl TimedLink {
    pub fn new(transport: Box<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub async fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        tracing::debug!(command, "instrument write");
        let limit = self.timeout;
        timeout(limit, self.transport.write(command))
            .await
            .map_err(|_| timed_out(command, limit))?
    }

    pub async fn query(&mut self, command: &str) -> Result<String, InstrumentError> {
        tracing::debug!(command, "instrument query");
        let limit = self.timeout;
        let response = timeout(limit, self.transport.query(command))
            .await
            .map_err(|_| timed_out(command, limit))??;
        tracing::debug!(response = %response, "instrument response");
        Ok(response)
    }

    pub async fn identify(&mut self) -> Result<String, InstrumentError> {
        let limit = self.timeout;
        timeout(limit, self.transport.identify())
            .await
            .map_err(|_| timed_out("*IDN?", limit))?
            .map(|idn| idn.trim().to_string())
    }
}

fn timed_out(command: &str, limit: Duration) -> InstrumentError {
    InstrumentError::timeout(format!("no response to `{command}` within {limit:?}"))
}

/// Parse two numbers separated by a comma, tab or whitespace.
pub(crate) fn parse_pair(response: &str) -> Result<(f64, f64), InstrumentError> {
    let mut fields = response
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|f| !f.is_empty())
        .map(str::parse::<f64>);
    match (fields.next(), fields.next()) {
        (Some(Ok(first)), Some(Ok(second))) => Ok((first, second)),
        _ => Err(InstrumentError::protocol(format!(
            "expected two numeric fields, got `{response}`"
        ))),
    }
}

/// Reject levels the family cannot source before any command is sent.
pub(crate) fn check_level(
    mode: SourceMode,
    level: f64,
    max_volts: f64,
    max_amps: f64,
) -> Result<(), InstrumentError> {
    let max = match mode {
        SourceMode::Voltage => max_volts,
        SourceMode::Current => max_amps,
    };
    if level.is_finite() && level.abs() <= max {
        Ok(())
    } else {
        Err(InstrumentError::out_of_range(format!(
            "{level} {} outside ±{max} {}",
            mode.source_unit(),
            mode.source_unit()
        )))
    }
}

pub(crate) fn check_compliance(limit: f64) -> Result<(), InstrumentError> {
    if limit.is_finite() && limit > 0.0 {
        Ok(())
    } else {
        Err(InstrumentError::out_of_range(format!(
            "compliance {limit} must be finite and positive"
        )))
    }
}

/// Order a (voltage, current) pair as source/measured for `mode`.
pub(crate) fn reading_from(mode: SourceMode, volts: f64, amps: f64) -> Reading {
    match mode {
        SourceMode::Voltage => Reading {
            source: volts,
            measured: amps,
        },
        SourceMode::Current => Reading {
            source: amps,
            measured: volts,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scpi_and_tsp_pairs() {
        assert_eq!(parse_pair("+1.000000E-1,+1.000000E-4").unwrap(), (0.1, 1e-4));
        assert_eq!(parse_pair("1.0e-04\t1.0e-01").unwrap(), (1e-4, 0.1));
        assert_eq!(parse_pair(" 2.5 , 3.5 ,9").unwrap(), (2.5, 3.5));
    }

    #[test]
    fn rejects_malformed_pairs() {
        assert!(parse_pair("").is_err());
        assert!(parse_pair("1.0").is_err());
        assert!(parse_pair("nil,1.0").is_err());
    }

    #[test]
    fn level_limits() {
        assert!(check_level(SourceMode::Voltage, 200.0, 210.0, 1.05).is_ok());
        assert!(check_level(SourceMode::Current, 2.0, 210.0, 1.05).is_err());
        assert!(check_level(SourceMode::Voltage, f64::NAN, 210.0, 1.05).is_err());
        assert!(check_compliance(0.0).is_err());
    }

    #[test]
    fn current_mode_swaps_roles() {
        let r = reading_from(SourceMode::Current, 2.0, 1e-3);
        assert_eq!(r.source, 1e-3);
        assert_eq!(r.measured, 2.0);
    }
}
