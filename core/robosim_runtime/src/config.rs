//! This module defines the configuration of a simulation.
//! A simulation can be fully configured programmatically, this is the optional
//! file based layer on top of it, in RON.

use crate::context_pool::DEFAULT_CAPACITY;
use robosim_traits::{SimError, SimResult};
use ron::extensions::Extensions;
use ron::Options;
use serde::{Deserialize, Serialize};
use std::fs::read_to_string;
use std::path::Path;

pub const DEFAULT_TIMESTEP: f64 = 0.015;
pub const DEFAULT_GRAPHICS_FREQUENCY: f64 = 40.0;
pub const DEFAULT_MAX_DURATION: f64 = 5.0;

/// Everything needed to build a [`crate::driver::SimulationDriver`] and its context pool.
///
/// ```ron
/// (
///     timestep: 0.01,
///     control_frequency: 100.0,
///     graphics_frequency: 30.0,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Physics step in seconds.
    pub timestep: f64,
    /// Control updates per simulated second, `None` means once per physics step.
    pub control_frequency: Option<f64>,
    /// Graphics updates per simulated second, 0 disables them.
    pub graphics_frequency: f64,
    /// Maximum number of rendering contexts alive at once.
    pub context_capacity: usize,
    pub sync_to_real_time: bool,
    /// Default duration of `run`, in simulated seconds.
    pub max_duration: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            timestep: DEFAULT_TIMESTEP,
            control_frequency: None,
            graphics_frequency: DEFAULT_GRAPHICS_FREQUENCY,
            context_capacity: DEFAULT_CAPACITY,
            sync_to_real_time: false,
            max_duration: DEFAULT_MAX_DURATION,
        }
    }
}

impl SimConfig {
    /// Control frequency once the "every physics step" default is resolved.
    pub fn effective_control_frequency(&self) -> f64 {
        self.control_frequency.unwrap_or(1.0 / self.timestep)
    }

    /// Rejects what the setters would reject. Frequencies above the physics
    /// frequency are accepted here, they are capped when applied.
    pub fn validate(&self) -> SimResult<()> {
        if !self.timestep.is_finite() || self.timestep <= 0.0 {
            return Err(SimError::invalid_configuration(format!(
                "timestep must be a positive number of seconds, got {}",
                self.timestep
            )));
        }
        let frequencies = [
            ("control_frequency", self.effective_control_frequency()),
            ("graphics_frequency", self.graphics_frequency),
        ];
        for (name, hz) in frequencies {
            if !hz.is_finite() || hz < 0.0 {
                return Err(SimError::invalid_configuration(format!(
                    "{name} must be >= 0 Hz, got {hz}"
                )));
            }
        }
        if self.context_capacity == 0 {
            return Err(SimError::invalid_configuration(
                "context_capacity must be at least 1",
            ));
        }
        if !self.max_duration.is_finite() || self.max_duration < 0.0 {
            return Err(SimError::invalid_configuration(format!(
                "max_duration must be >= 0 s, got {}",
                self.max_duration
            )));
        }
        Ok(())
    }

    fn get_options() -> Options {
        Options::default()
            .with_default_extension(Extensions::IMPLICIT_SOME)
            .with_default_extension(Extensions::UNWRAP_NEWTYPES)
    }

    pub fn serialize_ron(&self) -> SimResult<String> {
        let pretty = ron::ser::PrettyConfig::default();
        Self::get_options()
            .to_string_pretty(self, pretty)
            .map_err(|e| SimError::io("cannot serialize the configuration").with_cause(e))
    }

    pub fn deserialize_ron(ron: &str) -> SimResult<Self> {
        Self::get_options()
            .from_str(ron)
            .map_err(|e| SimError::invalid_configuration("syntax error in config").with_cause(e))
    }
}

/// Read a simulation configuration from a file and validate it.
pub fn read_configuration(config_filename: impl AsRef<Path>) -> SimResult<SimConfig> {
    let path = config_filename.as_ref();
    let config_content = read_to_string(path).map_err(|e| {
        SimError::io(format!("failed to read configuration file {}", path.display()))
            .with_cause(e)
    })?;
    read_configuration_str(&config_content)
}

/// Read a simulation configuration from a string and validate it.
pub fn read_configuration_str(config_content: &str) -> SimResult<SimConfig> {
    let config = SimConfig::deserialize_ron(config_content)?;
    config.validate()?;
    Ok(config)
}
