//! Error injection for the simulated SMU.
//!
//! Every command the simulator receives is classified into an operation name
//! (see the `OP_*` constants) and checked against the configured scenarios
//! before it takes effect. A failing check either returns an
//! [`InstrumentError`] or hangs the command so the adapter's per-call timeout
//! fires.

use super::rng::MockRng;
use parking_lot::Mutex;
use smu_core::InstrumentError;
use std::collections::HashMap;
use std::sync::Arc;

pub const OP_IDENTIFY: &str = "identify";
pub const OP_CONFIGURE: &str = "configure";
pub const OP_SET_LEVEL: &str = "set_level";
pub const OP_OUTPUT: &str = "output";
pub const OP_MEASURE: &str = "measure";

/// Outcome of an injected failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    Error(InstrumentError),
    /// The command never answers.
    Hang,
}

#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Fail every call of `operation` after `count` successful ones.
    FailAfterN {
        operation: &'static str,
        count: u32,
    },
    /// `operation` never responds.
    Timeout { operation: &'static str },
    /// The link drops after `after` commands of any kind; every later
    /// command reports `Disconnected`.
    CommunicationLoss { after: u32 },
}

#[derive(Default, Debug)]
struct ErrorState {
    operation_counts: HashMap<&'static str, u32>,
    total: u32,
    communication_lost: bool,
}

/// Error injection configuration. Clones share counters.
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    failure_rates: Arc<HashMap<&'static str, f64>>,
    scenarios: Arc<Vec<ErrorScenario>>,
    rng: Arc<MockRng>,
    state: Arc<Mutex<ErrorState>>,
}

impl ErrorConfig {
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    /// Uniform random failures on every operation.
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self::build(rates, Vec::new(), seed)
    }

    fn build(
        failure_rates: HashMap<&'static str, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            failure_rates: Arc::new(failure_rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Decide whether `operation` fails this time.
    pub fn check_operation(&self, operation: &'static str) -> Option<Fault> {
        let mut state = self.state.lock();

        if state.communication_lost {
            return Some(Fault::Error(InstrumentError::disconnected(
                "communication lost",
            )));
        }
        state.total += 1;
        let total = state.total;
        let count = {
            let entry = state.operation_counts.entry(operation).or_insert(0);
            *entry += 1;
            *entry
        };

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN {
                    operation: op,
                    count: limit,
                } if *op == operation && count > *limit => {
                    return Some(Fault::Error(InstrumentError::protocol(format!(
                        "injected {operation} failure after {limit} operations"
                    ))));
                }
                ErrorScenario::Timeout { operation: op } if *op == operation => {
                    return Some(Fault::Hang);
                }
                ErrorScenario::CommunicationLoss { after } if total > *after => {
                    state.communication_lost = true;
                    return Some(Fault::Error(InstrumentError::disconnected(
                        "communication lost",
                    )));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);
        if self.rng.should_fail(rate) {
            return Some(Fault::Error(InstrumentError::protocol(format!(
                "random failure on {operation}"
            ))));
        }
        None
    }

    /// Clear counters and restore the link.
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smu_core::InstrumentErrorKind;

    fn kind(fault: Option<Fault>) -> Option<InstrumentErrorKind> {
        match fault {
            Some(Fault::Error(e)) => Some(e.kind),
            _ => None,
        }
    }

    #[test]
    fn no_errors_by_default() {
        let config = ErrorConfig::default();
        assert!((0..100).all(|_| config.check_operation(OP_MEASURE).is_none()));
    }

    #[test]
    fn fail_after_n_counts_per_operation() {
        let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: OP_MEASURE,
            count: 2,
        });
        assert!(config.check_operation(OP_MEASURE).is_none());
        assert!(config.check_operation(OP_SET_LEVEL).is_none());
        assert!(config.check_operation(OP_MEASURE).is_none());
        assert_eq!(
            kind(config.check_operation(OP_MEASURE)),
            Some(InstrumentErrorKind::ProtocolError)
        );
        // Other operations keep working.
        assert!(config.check_operation(OP_OUTPUT).is_none());

        config.reset();
        assert!(config.check_operation(OP_MEASURE).is_none());
    }

    #[test]
    fn timeout_hangs() {
        let config = ErrorConfig::scenario(ErrorScenario::Timeout {
            operation: OP_MEASURE,
        });
        assert_eq!(config.check_operation(OP_MEASURE), Some(Fault::Hang));
        assert!(config.check_operation(OP_SET_LEVEL).is_none());
    }

    #[test]
    fn communication_loss_is_sticky() {
        let config = ErrorConfig::scenario(ErrorScenario::CommunicationLoss { after: 1 });
        assert!(config.check_operation(OP_IDENTIFY).is_none());
        assert_eq!(
            kind(config.check_operation(OP_SET_LEVEL)),
            Some(InstrumentErrorKind::Disconnected)
        );
        assert_eq!(
            kind(config.check_operation(OP_OUTPUT)),
            Some(InstrumentErrorKind::Disconnected)
        );
    }

    #[test]
    fn seeded_random_failures_are_roughly_proportional() {
        let config = ErrorConfig::random_failures_seeded(0.5, Some(42));
        let failures = (0..1000)
            .filter(|_| config.check_operation(OP_MEASURE).is_some())
            .count();
        assert!(failures > 400 && failures < 600, "got {failures} failures");
    }
}
