use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audio::DEFAULT_FRAMES_PER_READ;
use crate::host::CaptureDeviceParams;

/// Capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub schema_version: u32,

    // Stream parameters; None uses the device default
    pub device_index: Option<usize>,
    pub num_input_channels: Option<u16>,
    pub sample_rate: Option<u32>,

    /// Host buffer size requested from the backend
    pub frames_per_buffer: u32,
    /// Frames handed to the capture callback per read
    pub frames_per_read: usize,

    /// Where CLI recordings go
    pub output_dir: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            device_index: None,
            num_input_channels: None,
            sample_rate: None,
            frames_per_buffer: 1024,
            frames_per_read: DEFAULT_FRAMES_PER_READ,
            output_dir: None,
        }
    }
}

impl CaptureConfig {
    /// Load config from file, or create default
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .context("Failed to read config file")?;
            serde_json::from_str(&content)
                .context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }
        let content = serde_json::to_string_pretty(self)
            .context("Failed to serialize config")?;
        std::fs::write(path, content)
            .context("Failed to write config file")
    }

    /// Get the default config directory
    pub fn default_config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .context("Failed to get home directory")?;
        Ok(home.join(".capture-adapter"))
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.json"))
    }

    /// Get the directory recordings are written to
    pub fn get_output_dir(&self) -> Result<PathBuf> {
        match self.output_dir {
            Some(ref dir) => Ok(dir.clone()),
            None => Ok(Self::default_config_dir()?.join("recordings")),
        }
    }

    pub fn device_params(&self) -> CaptureDeviceParams {
        CaptureDeviceParams {
            device_index: self.device_index,
            num_input_channels: self.num_input_channels,
            sample_rate: self.sample_rate,
        }
    }
}
