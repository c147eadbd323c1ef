//! Bench settings and run configuration loading.
//!
//! Settings come from built-in defaults, then an optional TOML file, then
//! `SMU_`-prefixed environment variables (`__` separates nesting levels):
//!
//! ```text
//! SMU_ENGINE__INSTRUMENT_TIMEOUT=5s
//! SMU_ENGINE__LIMITS__MAX_PROGRAM_VOLTAGE=10
//! SMU_INSTRUMENT__ADDRESS=192.168.0.20:5025
//! ```
//!
//! Run configurations are separate TOML files holding one `TestRunConfig`
//! tagged by `kind`.

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use smu_core::{EngineSettings, TestRunConfig};
use smu_driver_keithley::Channel;
use smu_driver_mock::SimulatorConfig;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const ENV_PREFIX: &str = "SMU_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Run configuration rejected: {0}")]
    Invalid(#[from] smu_core::ConfigurationError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentSettings {
    /// `host:port` of a LAN instrument (port 5025 when omitted).
    pub address: Option<String>,
    pub channel: Channel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchSettings {
    pub engine: EngineSettings,
    pub instrument: InstrumentSettings,
    pub simulator: SimulatorConfig,
    /// Directory for exports when no output file is given.
    pub output_dir: PathBuf,
}

impl Default for BenchSettings {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            instrument: InstrumentSettings::default(),
            simulator: SimulatorConfig::default(),
            output_dir: PathBuf::from("data"),
        }
    }
}

/// Load bench settings, with environment overrides applied last.
pub fn load_settings(path: Option<&Path>) -> Result<BenchSettings> {
    let mut figment = Figment::from(Serialized::defaults(BenchSettings::default()));
    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound(path.display().to_string()).into());
        }
        debug!("Loading bench settings from: {}", path.display());
        figment = figment.merge(Toml::file(path));
    }
    figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .context("Failed to load bench settings")
}

/// Load one run configuration and check it against `settings`' limits.
pub fn load_run_config(path: &Path, settings: &EngineSettings) -> Result<TestRunConfig> {
    if !path.exists() {
        return Err(ConfigLoadError::NotFound(path.display().to_string()).into());
    }
    let config: TestRunConfig = Figment::new()
        .merge(Toml::file(path))
        .extract()
        .with_context(|| format!("Failed to parse run config: {}", path.display()))?;
    config
        .validate(&settings.limits)
        .map_err(ConfigLoadError::Invalid)?;

    info!(kind = %config.kind(), "Loaded run config from {}", path.display());
    Ok(config)
}
