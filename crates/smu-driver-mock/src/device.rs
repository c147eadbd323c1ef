//! Bipolar memristor model attached to the simulated SMU terminals.
//!
//! Two resistance states. Applying at least `set_threshold` volts switches
//! the device to the low resistance state (LRS); applying at most
//! `reset_threshold` volts (negative) switches it to the high resistance
//! state (HRS). Anything in between reads without disturbing the state.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResistanceState {
    Low,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemristorModel {
    pub lrs_ohms: f64,
    pub hrs_ohms: f64,
    pub set_threshold: f64,
    pub reset_threshold: f64,
    pub initial_state: ResistanceState,
}

impl Default for MemristorModel {
    fn default() -> Self {
        Self {
            lrs_ohms: 1.0e3,
            hrs_ohms: 1.0e5,
            set_threshold: 1.0,
            reset_threshold: -1.0,
            initial_state: ResistanceState::High,
        }
    }
}

/// Live device: model parameters plus current state.
#[derive(Debug, Clone)]
pub struct Memristor {
    model: MemristorModel,
    state: ResistanceState,
    switch_count: u64,
}

impl Memristor {
    pub fn new(model: MemristorModel) -> Self {
        let state = model.initial_state;
        Self {
            model,
            state,
            switch_count: 0,
        }
    }

    pub fn state(&self) -> ResistanceState {
        self.state
    }

    pub fn set_state(&mut self, state: ResistanceState) {
        self.state = state;
    }

    /// Number of state transitions since creation.
    pub fn switch_count(&self) -> u64 {
        self.switch_count
    }

    pub fn resistance(&self) -> f64 {
        match self.state {
            ResistanceState::Low => self.model.lrs_ohms,
            ResistanceState::High => self.model.hrs_ohms,
        }
    }

    /// Apply `volts` across the device, switching state on threshold.
    pub fn stimulate(&mut self, volts: f64) {
        let next = if volts >= self.model.set_threshold {
            ResistanceState::Low
        } else if volts <= self.model.reset_threshold {
            ResistanceState::High
        } else {
            self.state
        };
        if next != self.state {
            self.state = next;
            self.switch_count += 1;
        }
    }
}
