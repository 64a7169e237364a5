//! Rig configuration
//!
//! Which serial port each controller module sits on, plus sequence timing.
//! Stored as pretty-printed JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::control::{ControllerOptions, RampProfile, SequenceError};
use crate::transport::ConnectionConfig;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No connection is configured under this module name
    #[error("Unknown module: {0}")]
    UnknownModule(String),

    /// Reading or writing the file failed
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid config JSON
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Controller modules known out of the box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Module {
    /// R2 pump module
    R2,
    /// R2S pump module
    R2S,
}

impl Module {
    /// Every known module
    pub const ALL: [Module; 2] = [Module::R2, Module::R2S];

    /// Name used as the config key
    pub fn name(&self) -> &'static str {
        match self {
            Module::R2 => "R2",
            Module::R2S => "R2S",
        }
    }

    /// Port the module is wired to on the reference rig
    pub fn default_port(&self) -> &'static str {
        match self {
            Module::R2 => "COM4",
            Module::R2S => "COM5",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Module {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Module::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownModule(s.to_string()))
    }
}

/// Sequence timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Interval between ramp set points
    pub ramp_step_secs: u64,
    /// Hold after the first ramp set point
    pub ramp_settle_secs: u64,
    /// Wait after `PF`
    pub stop_settle_secs: u64,
    /// Longest uninterrupted wait while holding
    pub cancel_poll_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            ramp_step_secs: 15,
            ramp_settle_secs: 60,
            stop_settle_secs: 5,
            cancel_poll_ms: 500,
        }
    }
}

impl TimingConfig {
    /// Interval between ramp set points
    pub fn ramp_step(&self) -> Duration {
        Duration::from_secs(self.ramp_step_secs)
    }

    /// Hold after the first ramp set point
    pub fn ramp_settle(&self) -> Duration {
        Duration::from_secs(self.ramp_settle_secs)
    }

    /// Pause after every stop
    pub fn stop_settle(&self) -> Duration {
        Duration::from_secs(self.stop_settle_secs)
    }

    /// Controller options for these timings
    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            cancel_poll: Duration::from_millis(self.cancel_poll_ms),
            ..ControllerOptions::default()
        }
    }
}

/// Whole-rig configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    /// Connection per module name
    pub modules: BTreeMap<String, ConnectionConfig>,
    /// Sequence timing
    pub timing: TimingConfig,
    /// Where run logs are written; `None` disables them
    pub run_log_dir: Option<PathBuf>,
}

impl Default for RigConfig {
    fn default() -> Self {
        let modules = Module::ALL
            .into_iter()
            .map(|m| {
                (
                    m.name().to_string(),
                    ConnectionConfig::for_port(m.default_port()),
                )
            })
            .collect();
        Self {
            modules,
            timing: TimingConfig::default(),
            run_log_dir: None,
        }
    }
}

impl RigConfig {
    /// Load from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: RigConfig = serde_json::from_str(&content)?;
        tracing::debug!(
            path = %path.as_ref().display(),
            modules = config.modules.len(),
            "loaded rig config"
        );
        Ok(config)
    }

    /// Load if the file exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save as pretty-printed JSON, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Connection settings for a module, matched case-insensitively
    pub fn connection_for(&self, module: &str) -> Result<&ConnectionConfig, ConfigError> {
        let wanted = module.trim();
        self.modules
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
            .map(|(_, config)| config)
            .ok_or_else(|| ConfigError::UnknownModule(module.to_string()))
    }

    /// Ramp with this rig's step and settle timing
    pub fn ramp_profile(
        &self,
        start_ml_min: f64,
        end_ml_min: f64,
        duration: Duration,
    ) -> Result<RampProfile, SequenceError> {
        Ok(RampProfile::new(start_ml_min, end_ml_min, duration)?
            .with_step(self.timing.ramp_step())
            .with_settle(self.timing.ramp_settle()))
    }
}
