//! Operational modes for the simulator.
//!
//! - **Instant**: zero delays, for unit tests
//! - **Realistic**: per-command latency from [`TimingConfig`](super::TimingConfig)

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockMode {
    #[default]
    Instant,
    Realistic,
}
