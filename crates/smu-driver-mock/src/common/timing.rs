//! Instrument-like latency for realistic mode.

use std::time::Duration;

/// Delays applied per command when the simulator runs in
/// [`MockMode::Realistic`](super::MockMode::Realistic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingConfig {
    /// Link round trip, applied to every command.
    pub communication_delay: Duration,
    /// Integration time, added to measurement queries.
    pub measurement_time: Duration,
}

impl TimingConfig {
    /// 2400 over GPIB/RS-232 at 1 PLC.
    pub fn keithley_2400() -> Self {
        Self {
            communication_delay: Duration::from_millis(3),
            measurement_time: Duration::from_millis(20),
        }
    }

    /// 2600 over LAN at 1 PLC.
    pub fn keithley_2600() -> Self {
        Self {
            communication_delay: Duration::from_millis(1),
            measurement_time: Duration::from_millis(17),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_instant() {
        let t = TimingConfig::default();
        assert!(t.communication_delay.is_zero());
        assert!(t.measurement_time.is_zero());
    }

    #[test]
    fn presets_measure_slower_than_they_talk() {
        for t in [TimingConfig::keithley_2400(), TimingConfig::keithley_2600()] {
            assert!(t.measurement_time > t.communication_delay);
        }
    }
}
