//! Connected instrument session.
//!
//! An [`InstrumentSession`] is created by a successful connect and owns the
//! family adapter for one physical instrument. It is handed explicitly to the
//! run controller; there is no global "current instrument".

use crate::capabilities::{InstrumentFamily, SourceMeasure};
use crate::error::InstrumentError;
use tracing::{info, warn};

pub struct InstrumentSession {
    driver: Box<dyn SourceMeasure>,
}

impl InstrumentSession {
    pub fn new(driver: Box<dyn SourceMeasure>) -> Self {
        Self { driver }
    }

    pub fn family(&self) -> InstrumentFamily {
        self.driver.family()
    }

    pub fn identity(&self) -> &str {
        self.driver.identity()
    }

    pub fn output_enabled(&self) -> bool {
        self.driver.output_enabled()
    }

    pub fn compliance(&self) -> Option<f64> {
        self.driver.compliance()
    }

    /// Exclusive access to the adapter. Held by the active run only.
    pub fn driver_mut(&mut self) -> &mut dyn SourceMeasure {
        self.driver.as_mut()
    }

    /// Force the output off and release the adapter.
    ///
    /// The session is consumed even when shutdown fails; the error is
    /// returned so the caller can report it.
    pub async fn disconnect(mut self) -> Result<(), InstrumentError> {
        let identity = self.driver.identity().to_string();
        let result = self.driver.safe_shutdown().await;
        match &result {
            Ok(()) => info!(%identity, "instrument session closed"),
            Err(err) => warn!(%identity, error = %err, "output shutdown failed on disconnect"),
        }
        result
    }
}

impl std::fmt::Debug for InstrumentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentSession")
            .field("family", &self.family())
            .field("identity", &self.identity())
            .field("output_enabled", &self.output_enabled())
            .field("compliance", &self.compliance())
            .finish()
    }
}
