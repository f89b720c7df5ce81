use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::constants::*;
use super::error::ConfigError;

/// Structure representing the monitor configuration. Contains pathing, network, and calibration
/// information
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub data_path: PathBuf,
    pub ip_address: String,
    pub command_port: u16,
    pub status_port: u16,
    pub is_server: bool,
    pub hit_threshold: f64,
    pub light_readout_scale: f64,
    pub decoder_interval_ms: u64,
    pub default_run_number: i32,
    pub default_file_number: i32,
    pub log_path: PathBuf,
}

impl Default for Config {
    /// Generate the flight configuration
    fn default() -> Self {
        Self {
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            ip_address: String::from(DEFAULT_IP_ADDRESS),
            command_port: DEFAULT_COMMAND_PORT,
            status_port: DEFAULT_STATUS_PORT,
            is_server: false,
            hit_threshold: DEFAULT_HIT_THRESHOLD,
            light_readout_scale: DEFAULT_LIGHT_READOUT_SCALE,
            decoder_interval_ms: DEFAULT_DECODER_INTERVAL_MS,
            default_run_number: 0,
            default_file_number: 0,
            log_path: PathBuf::from("./pgrams_monitor.log"),
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    /// Get the path to a readout file using the pGRAMS naming convention
    pub fn get_data_file_name(&self, run_number: i32, file_number: i32) -> PathBuf {
        self.data_path
            .join(format!("pGRAMS_bin_{run_number}_{file_number}.dat"))
    }

    /// Get the path of the file the continuous decoder falls back to
    pub fn get_default_file_name(&self) -> PathBuf {
        self.get_data_file_name(self.default_run_number, self.default_file_number)
    }

    /// Check if a specific readout file exists
    pub fn does_file_exist(&self, run_number: i32, file_number: i32) -> bool {
        self.get_data_file_name(run_number, file_number).exists()
    }

    pub fn decoder_interval(&self) -> Duration {
        Duration::from_millis(self.decoder_interval_ms)
    }

    /// Check the calibration constants
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.hit_threshold.is_finite() || self.hit_threshold <= 0.0 {
            return Err(ConfigError::InvalidCalibration {
                name: "hit_threshold",
                value: self.hit_threshold,
            });
        }
        if !self.light_readout_scale.is_finite() || self.light_readout_scale <= 0.0 {
            return Err(ConfigError::InvalidCalibration {
                name: "light_readout_scale",
                value: self.light_readout_scale,
            });
        }
        Ok(())
    }
}
