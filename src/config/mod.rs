// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Player settings.
//!
//! Settings live in an optional TOML file. Every key has a default, so a
//! missing file or an empty one both give a working player.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Settings for the playback loop and the command-line player
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerSettings {
    /// Longest time the playback loop sleeps without checking for commands
    pub max_idle_ms: u64,
    /// Substring of the MIDI output port name, or a port index
    pub output_port: Option<String>,
    /// Log filter used when `RUST_LOG` is not set
    pub log_level: String,
    /// Reload the composition when its file changes
    pub watch: bool,
    /// How often track positions are printed, 0 disables
    pub display_interval_ms: u64,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            max_idle_ms: 500,
            output_port: None,
            log_level: "info".to_string(),
            watch: true,
            display_interval_ms: 100,
        }
    }
}

impl PlayerSettings {
    /// Load settings from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read settings file: {:?}", path.as_ref()))?;
        Self::from_toml(&contents)
    }

    /// Load settings from a TOML file, falling back to defaults when the file
    /// does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse settings from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse player settings")
    }

    /// Serialize to a TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).context("Failed to serialize player settings")
    }

    /// Save settings to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = self.to_toml()?;
        fs::write(path.as_ref(), contents)
            .with_context(|| format!("Failed to write settings file: {:?}", path.as_ref()))
    }
}
