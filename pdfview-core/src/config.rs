use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::ViewerError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Zoom factor used for the first render of every document.
    pub initial_scale: f32,
    pub zoom_step: f32,
    /// Zooming out stops once the scale reaches this value.
    pub min_scale: f32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            initial_scale: 1.5,
            zoom_step: 0.25,
            min_scale: 0.25,
        }
    }
}

impl ViewerConfig {
    /// Reads a TOML config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ViewerError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::read(path).map_err(|source| ViewerError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        let config: ViewerConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("initial_scale", self.initial_scale),
            ("zoom_step", self.zoom_step),
            ("min_scale", self.min_scale),
        ] {
            if !value.is_finite() || value <= 0.0 {
                anyhow::bail!("{name} must be a positive number, got {value}");
            }
        }
        Ok(())
    }
}
