//! Common simulator infrastructure.
//!
//! - **mode**: Instant vs Realistic timing
//! - **timing**: instrument-like latency
//! - **errors**: error injection framework
//! - **rng**: seeded random number generator

pub mod errors;
pub mod mode;
pub mod rng;
pub mod timing;

pub use errors::{ErrorConfig, ErrorScenario, Fault};
pub use mode::MockMode;
pub use rng::MockRng;
pub use timing::TimingConfig;
