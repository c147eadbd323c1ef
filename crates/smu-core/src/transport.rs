//! Instrument transport contract.
//!
//! The engine treats the physical link (VISA, raw socket, simulator) as an
//! external collaborator providing a synchronous request/response channel.
//! Connection establishment, address resolution and low-level retries belong
//! to the implementor. Timeouts are applied by the adapters around each call.

use crate::error::InstrumentError;
use async_trait::async_trait;

#[async_trait]
pub trait Transport: Send {
    /// Send a command that produces no response.
    async fn write(&mut self, command: &str) -> Result<(), InstrumentError>;

    /// Send a command and return its (trimmed) response line.
    async fn query(&mut self, command: &str) -> Result<String, InstrumentError>;

    /// Identification string of the connected instrument.
    async fn identify(&mut self) -> Result<String, InstrumentError> {
        self.query("*IDN?").await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        (**self).write(command).await
    }

    async fn query(&mut self, command: &str) -> Result<String, InstrumentError> {
        (**self).query(command).await
    }

    async fn identify(&mut self) -> Result<String, InstrumentError> {
        (**self).identify().await
    }
}
