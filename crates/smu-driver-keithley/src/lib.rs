//! Keithley source-measure unit adapters.
//!
//! Two command families sit behind [`SourceMeasure`]:
//!
//! - [`Keithley2400`]: SCPI (2400, 2410, 2450, ...)
//! - [`Keithley2600`]: TSP scripts (2601, 2602B, 2636, ...)
//!
//! [`connect`] queries the instrument identity, selects the family adapter
//! once, resets the instrument to a known idle state and hands back an
//! [`InstrumentSession`]. Protocol code never branches on family.
//!
//! # Example
//!
//! ```rust,ignore
//! use smu_driver_keithley::{connect, ConnectOptions, TcpTransport};
//!
//! let transport = TcpTransport::connect("192.168.0.20:5025").await?;
//! let session = connect(transport, &ConnectOptions::default()).await?;
//! println!("connected to {}", session.identity());
//! ```

mod identity;
mod keithley_2400;
mod keithley_2600;
mod link;
mod tcp;

pub use identity::{detect_family, model_number};
pub use keithley_2400::Keithley2400;
pub use keithley_2600::{Channel, Keithley2600};
pub use link::{TimedLink, DEFAULT_TIMEOUT};
pub use tcp::{TcpTransport, DEFAULT_PORT};

use serde::{Deserialize, Serialize};
use smu_core::{InstrumentError, InstrumentFamily, InstrumentSession, SourceMeasure, Transport};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Connection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Per-call instrument timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// SMU channel used on 2600-series instruments.
    pub channel: Channel,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            channel: Channel::default(),
        }
    }
}

/// Identify the instrument behind `transport` and open a session.
///
/// # Errors
/// `Unsupported` for identities outside the 2400/2600 families (the
/// transport is dropped, no command beyond `*IDN?` is sent); any
/// instrument error raised by the identity query or the initial reset.
#[instrument(skip_all, fields(timeout = ?options.timeout), err)]
pub async fn connect<T>(
    transport: T,
    options: &ConnectOptions,
) -> Result<InstrumentSession, InstrumentError>
where
    T: Transport + 'static,
{
    let mut link = TimedLink::new(Box::new(transport), options.timeout);
    let identity = link.identify().await?;
    let family = match detect_family(&identity) {
        Ok(family) => family,
        Err(err) => {
            warn!(%identity, "refusing connection to unsupported instrument");
            return Err(err);
        }
    };

    let mut driver: Box<dyn SourceMeasure> = match family {
        InstrumentFamily::Keithley2400 => Box::new(Keithley2400::new(link, identity.clone())),
        InstrumentFamily::Keithley2600 => Box::new(Keithley2600::new(
            link,
            identity.clone(),
            options.channel,
        )),
    };
    driver.reset().await?;

    info!(%family, %identity, "instrument session opened");
    Ok(InstrumentSession::new(driver))
}
