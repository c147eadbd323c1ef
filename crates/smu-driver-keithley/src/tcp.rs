//! Raw socket transport (SCPI/TSP over LAN).
//!
//! Keithley LAN instruments accept line-terminated commands on a raw TCP
//! socket (port 5025). Responses are single lines. Per-call deadlines are
//! applied by [`TimedLink`](crate::TimedLink); this type only bounds the
//! connection attempt.

use async_trait::async_trait;
use smu_core::{InstrumentError, Transport};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Default raw-socket port of Keithley LAN instruments.
pub const DEFAULT_PORT: u16 = 5025;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TcpTransport {
    stream: BufReader<TcpStream>,
    peer: String,
}

impl TcpTransport {
    /// Connect to `address` (`host:port`, or `host` for [`DEFAULT_PORT`]).
    pub async fn connect(address: &str) -> Result<Self, InstrumentError> {
        let target = if address.contains(':') {
            address.to_string()
        } else {
            format!("{address}:{DEFAULT_PORT}")
        };

        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&target))
            .await
            .map_err(|_| InstrumentError::timeout(format!("connection timeout to {target}")))?
            .map_err(|e| {
                InstrumentError::disconnected(format!("failed to connect to {target}: {e}"))
            })?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        tracing::info!(peer = %target, "connected to instrument");

        Ok(Self {
            stream: BufReader::new(stream),
            peer: target,
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    async fn send_line(&mut self, command: &str) -> Result<(), InstrumentError> {
        let line = format!("{command}\n");
        let socket = self.stream.get_mut();
        socket.write_all(line.as_bytes()).await?;
        socket.flush().await?;
        Ok(())
    }

    /// Drop any bytes left over from an earlier, abandoned query.
    fn discard_stale_input(&mut self) {
        let buffered = self.stream.buffer().len();
        if buffered > 0 {
            tracing::debug!(bytes = buffered, "discarding stale buffered input");
            self.stream.consume(buffered);
        }
        let mut scratch = [0u8; 256];
        while let Ok(n) = self.stream.get_mut().try_read(&mut scratch) {
            if n == 0 {
                break;
            }
            tracing::debug!(bytes = n, "discarding stale socket input");
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        self.send_line(command).await
    }

    async fn query(&mut self, command: &str) -> Result<String, InstrumentError> {
        self.discard_stale_input();
        self.send_line(command).await?;

        let mut response = String::new();
        match self.stream.read_line(&mut response).await? {
            0 => Err(InstrumentError::disconnected(format!(
                "connection closed by {}",
                self.peer
            ))),
            _ => Ok(response.trim().to_string()),
        }
    }
}
